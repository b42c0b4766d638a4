//! HTTP health probing

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::models::workload::Health;

/// GET the endpoint once.
///
/// Refused connections and 5xx answers mean the workload is down. A probe
/// that cannot decide (timeouts, DNS, TLS) reports Unknown.
pub async fn http_health(endpoint: &str, timeout: Duration) -> Health {
    let client = match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            debug!("Unable to build probe client: {}", e);
            return Health::Unknown;
        }
    };

    match client.get(endpoint).send().await {
        Ok(response) if response.status().is_server_error() => {
            debug!("Probe {} answered {}", endpoint, response.status());
            Health::Down
        }
        Ok(_) => Health::Up,
        Err(e) if e.is_timeout() => {
            debug!("Probe {} timed out", endpoint);
            Health::Unknown
        }
        Err(e) if e.is_connect() => {
            debug!("Probe {} refused: {}", endpoint, e);
            Health::Down
        }
        Err(e) => {
            debug!("Probe {} failed: {}", endpoint, e);
            Health::Unknown
        }
    }
}
