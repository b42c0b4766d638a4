//! Orchestrator Library
//!
//! Resource provisioning and status reconciliation: validated resource
//! definitions are provisioned onto registered servers, health checked,
//! and tracked through a status state machine.

pub mod app;
pub mod deploy;
pub mod env;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod registry;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
