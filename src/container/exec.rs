//! Exec sessions inside running containers

use super::signal::Signal;
use crate::config::SandboxConfig;
use crate::error::{HatchError, Result};
use crate::runtime::{ExecConfig, ExecResult, ExecSession, ExecStreams, RuntimeClient};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Output marker of a command whose binary does not exist
pub const MISSING_FILE_MARKER: &str = "no such file or directory";

/// Treats output mentioning a missing file as success
///
/// Lets callers probe for optional binaries without handling a failure.
pub fn missing_file_probe(output: &[u8]) -> bool {
    String::from_utf8_lossy(output).contains(MISSING_FILE_MARKER)
}

/// Run `fut` unless `cancel` fires first; dropping `fut` closes its streams
pub(crate) async fn until_cancelled<T, F>(
    cancel: &CancellationToken,
    what: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HatchError::Cancelled(what.to_string())),
        res = fut => res,
    }
}

/// Output of a captured exec with its verdict
#[derive(Debug)]
pub struct CapturedOutput {
    /// Combined stdout and stderr
    pub output: Vec<u8>,
    pub result: Result<()>,
}

impl CapturedOutput {
    pub fn into_result(self) -> Result<Vec<u8>> {
        self.result.map(|()| self.output)
    }
}

/// Creates, runs and resizes exec sessions
#[derive(Clone)]
pub struct ExecSessionManager {
    client: Arc<dyn RuntimeClient>,
    capture_user: String,
}

impl ExecSessionManager {
    pub fn new(client: Arc<dyn RuntimeClient>, config: &SandboxConfig) -> Self {
        Self {
            client,
            capture_user: config.capture_user.clone(),
        }
    }

    /// Create an exec session; a TTY is always allocated
    pub async fn create_exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        attach_stdin: bool,
        attach_stdout: bool,
        attach_stderr: bool,
    ) -> Result<ExecSession> {
        let config = ExecConfig {
            cmd: command,
            attach_stdin,
            attach_stdout,
            attach_stderr,
            tty: true,
            user: None,
        };
        self.client.create_exec(container_id, &config).await
    }

    /// Run a session to completion and return its final state
    pub async fn run_exec(
        &self,
        session: &ExecSession,
        streams: ExecStreams<'_>,
    ) -> Result<ExecResult> {
        debug!("Starting exec {} in {}", session.id, session.container_id);
        self.client
            .start_exec(&session.id, streams, session.tty)
            .await?;
        self.client.inspect_exec(&session.id).await
    }

    /// Like [`run_exec`](Self::run_exec), giving up once `cancel` fires
    pub async fn run_exec_until(
        &self,
        session: &ExecSession,
        streams: ExecStreams<'_>,
        cancel: &CancellationToken,
    ) -> Result<ExecResult> {
        until_cancelled(cancel, &session.id, self.run_exec(session, streams)).await
    }

    /// Resize a session's TTY; a finished session makes this a no-op
    pub async fn resize_exec_tty(&self, session_id: &str, height: u16, width: u16) -> Result<()> {
        match self.client.resize_exec_tty(session_id, height, width).await {
            Ok(()) => Ok(()),
            Err(e) => match self.client.inspect_exec(session_id).await {
                Ok(state) if !state.running => {
                    debug!("Dropping resize of finished exec {}", session_id);
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Resize a container's TTY; a stopped container makes this a no-op
    pub async fn resize_container_tty(&self, id: &str, height: u16, width: u16) -> Result<()> {
        match self.client.resize_container_tty(id, height, width).await {
            Ok(()) => Ok(()),
            Err(e) => match self.client.inspect_container(id).await {
                Ok(container) if !container.running => {
                    debug!("Dropping resize of stopped container {}", id);
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Run a command and capture its combined output
    ///
    /// Output mentioning a missing file counts as success regardless of
    /// exit code.
    pub async fn exec_in_container(&self, container_id: &str, args: &[String]) -> CapturedOutput {
        self.exec_in_container_with(container_id, args, missing_file_probe)
            .await
    }

    /// Run a command and capture its combined output, treating any output
    /// accepted by `squash` as success
    pub async fn exec_in_container_with<P>(
        &self,
        container_id: &str,
        args: &[String],
        squash: P,
    ) -> CapturedOutput
    where
        P: Fn(&[u8]) -> bool,
    {
        let config = ExecConfig {
            cmd: args.to_vec(),
            attach_stdin: false,
            attach_stdout: true,
            attach_stderr: true,
            tty: false,
            user: Some(self.capture_user.clone()),
        };

        let session = match self.client.create_exec(container_id, &config).await {
            Ok(session) => session,
            Err(e) => {
                return CapturedOutput {
                    output: Vec::new(),
                    result: Err(e),
                }
            }
        };

        let mut output = Vec::new();
        let started = self
            .client
            .start_exec(&session.id, ExecStreams::output(&mut output), false)
            .await;
        let inspected = self.client.inspect_exec(&session.id).await;

        let result = if squash(&output) {
            Ok(())
        } else {
            match (started, inspected) {
                (Err(e), _) | (Ok(()), Err(e)) => Err(e),
                (Ok(()), Ok(state)) => match state.exit_code {
                    Some(0) => Ok(()),
                    Some(code) => Err(HatchError::NonZeroExit { code }),
                    None => Err(HatchError::Runtime(format!(
                        "exec {} finished without an exit code",
                        session.id
                    ))),
                },
            }
        };

        CapturedOutput { output, result }
    }

    /// Send a signal, by name, to a container
    pub async fn kill_container(&self, id: &str, signal: &str) -> Result<()> {
        let signal = Signal::parse(signal)?;
        debug!("Sending {} to {}", signal, id);
        self.client.kill_container(id, signal).await
    }
}
