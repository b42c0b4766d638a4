//! Deploy target on the orchestrator's own host

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::TargetError;
use crate::registry::target::{ExecOutput, RemoteCommand, RemoteTarget};

/// Runs commands as child processes of the orchestrator
#[derive(Debug, Clone, Default)]
pub struct LocalTarget;

impl LocalTarget {
    pub fn new() -> Self {
        Self
    }
}

/// Spawn `command` on this host and collect its output.
///
/// The child is killed when the returned future is dropped, so callers can
/// bound it with a timeout.
pub(crate) async fn run_process(command: &RemoteCommand) -> Result<ExecOutput, TargetError> {
    let spawn_error = |e: std::io::Error| TargetError::Spawn {
        program: command.program.clone(),
        message: e.to_string(),
    };

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(cwd) = &command.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(spawn_error)?;
    if let (Some(input), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
        stdin
            .write_all(input.expose_secret().as_bytes())
            .await
            .map_err(spawn_error)?;
        // Close stdin so the child sees EOF
        drop(stdin);
    }

    let output = child.wait_with_output().await.map_err(spawn_error)?;
    Ok(ExecOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[async_trait]
impl RemoteTarget for LocalTarget {
    fn describe(&self) -> String {
        "local".to_string()
    }

    async fn exec(&self, command: &RemoteCommand) -> Result<ExecOutput, TargetError> {
        debug!("[local] {}", command);
        run_process(command).await
    }

    async fn write_file(
        &self,
        path: &str,
        contents: &SecretString,
        mode: u32,
    ) -> Result<(), TargetError> {
        let io_error = |e: std::io::Error| TargetError::Spawn {
            program: "write_file".to_string(),
            message: format!("{}: {}", path, e),
        };

        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(mode);
        let mut file = options.open(path).await.map_err(io_error)?;

        // An existing file keeps its old mode through open()
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(io_error)?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        file.write_all(contents.expose_secret().as_bytes())
            .await
            .map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        Ok(())
    }
}
