//! Deploy target reached through the system ssh client

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::errors::TargetError;
use crate::models::server::Server;
use crate::registry::local::run_process;
use crate::registry::target::{ExecOutput, RemoteCommand, RemoteTarget};
use crate::utils::shell_quote;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshTarget {
    user: String,
    host: String,
    port: u16,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshTarget {
    pub fn new(server: &Server, connect_timeout: Duration) -> Self {
        Self {
            user: server.user.clone(),
            host: server.host.clone(),
            port: server.port,
            identity_file: server.identity_file.clone(),
            connect_timeout,
        }
    }

    /// The local `ssh` invocation that runs `remote` on the server
    pub fn ssh_command(&self, remote: String) -> RemoteCommand {
        let mut cmd = RemoteCommand::new("ssh").args([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            self.port.to_string(),
        ]);
        if let Some(identity) = &self.identity_file {
            cmd = cmd.arg("-i").arg(identity.to_string_lossy());
        }
        cmd.arg(format!("{}@{}", self.user, self.host))
            .arg("--")
            .arg(remote)
    }

    async fn run(&self, mut command: RemoteCommand) -> Result<ExecOutput, TargetError> {
        let input = command.stdin.take();
        let mut ssh = self.ssh_command(command.to_shell());
        ssh.stdin = input;

        let output = run_process(&ssh).await?;
        if output.status == Some(SSH_CONNECTION_FAILURE) {
            return Err(TargetError::Unreachable(format!(
                "{}: {}",
                self.describe(),
                output.message()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl RemoteTarget for SshTarget {
    fn describe(&self) -> String {
        format!("ssh://{}@{}:{}", self.user, self.host, self.port)
    }

    async fn exec(&self, command: &RemoteCommand) -> Result<ExecOutput, TargetError> {
        debug!("[{}] {}", self.describe(), command);
        let forwarded = RemoteCommand {
            program: command.program.clone(),
            args: command.args.clone(),
            cwd: command.cwd.clone(),
            stdin: command
                .stdin
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_owned())),
        };
        self.run(forwarded).await
    }

    async fn write_file(
        &self,
        path: &str,
        contents: &SecretString,
        mode: u32,
    ) -> Result<(), TargetError> {
        let parent = Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        let script = format!(
            "mkdir -p {dir} && umask 077 && cat > {file} && chmod {mode:o} {file}",
            dir = shell_quote(&parent),
            file = shell_quote(path),
            mode = mode,
        );
        let command = RemoteCommand::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(SecretString::from(contents.expose_secret().to_owned()));

        let output = self.run(command).await?;
        if !output.success() {
            return Err(TargetError::Spawn {
                program: "write_file".to_string(),
                message: format!("{}: {}", path, output.message()),
            });
        }
        Ok(())
    }
}
