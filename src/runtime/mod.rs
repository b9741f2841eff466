//! Container runtime boundary
//!
//! Everything Hatch does to containers goes through [`RuntimeClient`]. The
//! production implementation is [`DockerClient`]; tests substitute an
//! in-memory double.

pub mod docker;
#[cfg(test)]
pub(crate) mod mock;

pub use docker::DockerClient;

use crate::container::config::{CreationDescriptor, ImageReference};
use crate::container::runtime::Container;
use crate::container::signal::Signal;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Local image as listed by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

/// Container as listed by the runtime, before inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
}

impl ContainerSummary {
    /// Match by exact name, by `/`-prefixed name, or by ID
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.id == name_or_id
            || self.names.iter().any(|name| {
                name == name_or_id || name.strip_prefix('/') == Some(name_or_id)
            })
    }
}

/// Exec creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecConfig {
    pub cmd: Vec<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    pub user: Option<String>,
}

/// Exec session inside a running container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSession {
    /// Runtime-assigned ID
    pub id: String,
    /// Owning container
    pub container_id: String,
    pub cmd: Vec<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
}

/// Exec state as inspected after (or during) a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub id: String,
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Streams attached to an exec session or container
///
/// Without a separate `stderr` writer, error output is merged into `stdout`.
pub struct ExecStreams<'a> {
    pub stdin: Option<&'a mut (dyn AsyncRead + Send + Unpin)>,
    pub stdout: &'a mut (dyn AsyncWrite + Send + Unpin),
    pub stderr: Option<&'a mut (dyn AsyncWrite + Send + Unpin)>,
}

impl<'a> ExecStreams<'a> {
    /// Output only, stderr merged
    pub fn output(stdout: &'a mut (dyn AsyncWrite + Send + Unpin)) -> Self {
        Self {
            stdin: None,
            stdout,
            stderr: None,
        }
    }

    pub fn with_stdin(mut self, stdin: &'a mut (dyn AsyncRead + Send + Unpin)) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_stderr(mut self, stderr: &'a mut (dyn AsyncWrite + Send + Unpin)) -> Self {
        self.stderr = Some(stderr);
        self
    }
}

/// Primitive operations of a container runtime
///
/// Implementations must be safe to share between concurrent callers.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    async fn pull_image(&self, image: &ImageReference) -> Result<()>;

    /// Create a container and return its ID
    async fn create_container(&self, descriptor: &CreationDescriptor) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;

    async fn remove_container(&self, id: &str, keep_volumes: bool, force: bool) -> Result<()>;

    async fn kill_container(&self, id: &str, signal: Signal) -> Result<()>;

    /// Block until the container exits and return its exit code
    async fn wait_container(&self, id: &str) -> Result<i64>;

    async fn inspect_container(&self, id: &str) -> Result<Container>;

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    async fn resize_container_tty(&self, id: &str, height: u16, width: u16) -> Result<()>;

    /// Attach to the container's main process until its output ends
    async fn attach_container(&self, id: &str, streams: ExecStreams<'_>) -> Result<()>;

    async fn create_exec(&self, container_id: &str, config: &ExecConfig) -> Result<ExecSession>;

    /// Run an exec session until its output ends
    async fn start_exec(&self, id: &str, streams: ExecStreams<'_>, tty: bool) -> Result<()>;

    async fn inspect_exec(&self, id: &str) -> Result<ExecResult>;

    async fn resize_exec_tty(&self, id: &str, height: u16, width: u16) -> Result<()>;
}
