//! Docker Engine implementation of [`RuntimeClient`]

use super::{
    ContainerSummary, ExecConfig, ExecResult, ExecSession, ExecStreams, ImageSummary,
    RuntimeClient,
};
use crate::container::config::{CreationDescriptor, ImageReference, RestartPolicy};
use crate::container::runtime::{Container, ContainerStatus};
use crate::container::signal::Signal;
use crate::error::{HatchError, Result};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, ResizeContainerTtyOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{
    ContainerInspectResponse, HostConfig, RestartPolicy as DockerRestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Runtime client talking to a Docker daemon
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(runtime_error)?;
        Ok(Self { docker })
    }

    /// Wrap an existing connection
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

fn runtime_error(err: BollardError) -> HatchError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => HatchError::NotFound(message),
        other => HatchError::Runtime(other.to_string()),
    }
}

fn container_from_inspect(response: ContainerInspectResponse) -> Container {
    let config = response.config.unwrap_or_default();
    let state = response.state.unwrap_or_default();

    Container {
        id: response.id.unwrap_or_default(),
        name: response.name.unwrap_or_default(),
        labels: config.labels.unwrap_or_default(),
        running: state.running.unwrap_or(false),
        status: state
            .status
            .map(|s| ContainerStatus::from_runtime(&s.to_string()))
            .unwrap_or(ContainerStatus::Unknown),
        image: config.image.unwrap_or_default(),
        binds: response
            .host_config
            .and_then(|h| h.binds)
            .unwrap_or_default(),
        created: response
            .created
            .as_deref()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|t| t.with_timezone(&Utc)),
    }
}

fn create_config(descriptor: &CreationDescriptor) -> Config<String> {
    let restart_policy = match descriptor.restart_policy {
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::No => RestartPolicyNameEnum::NO,
    };

    let host_config = HostConfig {
        binds: Some(descriptor.bind_specs()),
        network_mode: descriptor.network_mode.as_runtime().map(str::to_string),
        privileged: Some(descriptor.privileged),
        restart_policy: Some(DockerRestartPolicy {
            name: Some(restart_policy),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    Config {
        hostname: descriptor.hostname.clone(),
        user: descriptor.user.clone(),
        attach_stdin: Some(descriptor.attach_stdin),
        attach_stdout: Some(descriptor.attach_stdout),
        attach_stderr: Some(descriptor.attach_stderr),
        tty: Some(descriptor.tty),
        open_stdin: Some(descriptor.open_stdin),
        cmd: descriptor.cmd.clone(),
        image: Some(descriptor.image.to_string()),
        working_dir: descriptor.working_dir.clone(),
        labels: Some(descriptor.labels.clone()),
        network_disabled: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Shuttle bytes between caller streams and an attached runtime connection
///
/// Returns once the runtime closes the output side. Stdin reaching EOF shuts
/// down the input side but keeps output flowing.
async fn pump<S>(
    mut output: S,
    mut input: Pin<Box<dyn AsyncWrite + Send>>,
    streams: ExecStreams<'_>,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<LogOutput, BollardError>> + Unpin,
{
    let ExecStreams {
        stdin,
        stdout,
        mut stderr,
    } = streams;

    let forward = async move {
        while let Some(chunk) = output.next().await {
            match chunk.map_err(runtime_error)? {
                LogOutput::StdErr { message } => match stderr.as_mut() {
                    Some(err) => err.write_all(&message).await?,
                    None => stdout.write_all(&message).await?,
                },
                LogOutput::StdIn { .. } => {}
                other => stdout.write_all(&other.into_bytes()).await?,
            }
            stdout.flush().await?;
        }
        Ok::<(), HatchError>(())
    };
    tokio::pin!(forward);

    if let Some(stdin) = stdin {
        let feed = async move {
            if let Err(e) = tokio::io::copy(stdin, &mut input).await {
                debug!("stdin forwarding stopped: {}", e);
            }
            let _ = input.shutdown().await;
        };
        tokio::pin!(feed);

        tokio::select! {
            res = &mut forward => return res,
            _ = &mut feed => {}
        }
    }

    forward.await
}

#[async_trait]
impl RuntimeClient for DockerClient {
    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(runtime_error)?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags,
            })
            .collect())
    }

    async fn pull_image(&self, image: &ImageReference) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.repository.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| HatchError::ImagePullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn create_container(&self, descriptor: &CreationDescriptor) -> Result<String> {
        let options = CreateContainerOptions {
            name: descriptor.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), create_config(descriptor))
            .await
            .map_err(runtime_error)?;

        for warning in &response.warnings {
            debug!("create {}: {}", descriptor.name, warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(runtime_error)
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: timeout.as_secs() as i64,
                }),
            )
            .await
            .map_err(runtime_error)
    }

    async fn remove_container(&self, id: &str, keep_volumes: bool, force: bool) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: !keep_volumes,
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(runtime_error)
    }

    async fn kill_container(&self, id: &str, signal: Signal) -> Result<()> {
        self.docker
            .kill_container(
                id,
                Some(KillContainerOptions {
                    signal: signal.number.to_string(),
                }),
            )
            .await
            .map_err(runtime_error)
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        tokio::pin!(stream);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as errors
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(runtime_error(e)),
            None => Err(HatchError::Runtime(format!(
                "wait on {} ended without a status",
                id
            ))),
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<Container> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(runtime_error)?;

        Ok(container_from_inspect(response))
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all,
                size: false,
                ..Default::default()
            }))
            .await
            .map_err(runtime_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
            })
            .collect())
    }

    async fn resize_container_tty(&self, id: &str, height: u16, width: u16) -> Result<()> {
        self.docker
            .resize_container_tty(id, ResizeContainerTtyOptions { width, height })
            .await
            .map_err(runtime_error)
    }

    async fn attach_container(&self, id: &str, streams: ExecStreams<'_>) -> Result<()> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(streams.stdin.is_some()),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };

        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(runtime_error)?;

        pump(output, input, streams).await
    }

    async fn create_exec(&self, container_id: &str, config: &ExecConfig) -> Result<ExecSession> {
        let options = CreateExecOptions::<String> {
            attach_stdin: Some(config.attach_stdin),
            attach_stdout: Some(config.attach_stdout),
            attach_stderr: Some(config.attach_stderr),
            tty: Some(config.tty),
            cmd: Some(config.cmd.clone()),
            user: config.user.clone(),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(runtime_error)?;

        Ok(ExecSession {
            id: created.id,
            container_id: container_id.to_string(),
            cmd: config.cmd.clone(),
            attach_stdin: config.attach_stdin,
            attach_stdout: config.attach_stdout,
            attach_stderr: config.attach_stderr,
            tty: config.tty,
        })
    }

    async fn start_exec(&self, id: &str, streams: ExecStreams<'_>, tty: bool) -> Result<()> {
        let options = StartExecOptions {
            detach: false,
            tty,
            ..Default::default()
        };

        match self
            .docker
            .start_exec(id, Some(options))
            .await
            .map_err(runtime_error)?
        {
            StartExecResults::Attached { output, input } => pump(output, input, streams).await,
            StartExecResults::Detached => Ok(()),
        }
    }

    async fn inspect_exec(&self, id: &str) -> Result<ExecResult> {
        let inspect = self.docker.inspect_exec(id).await.map_err(runtime_error)?;

        Ok(ExecResult {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            running: inspect.running.unwrap_or(false),
            exit_code: inspect.exit_code,
        })
    }

    async fn resize_exec_tty(&self, id: &str, height: u16, width: u16) -> Result<()> {
        self.docker
            .resize_exec(id, ResizeExecOptions { height, width })
            .await
            .map_err(runtime_error)
    }
}
