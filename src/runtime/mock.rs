//! In-memory runtime for unit tests

use super::{
    ContainerSummary, ExecConfig, ExecResult, ExecSession, ExecStreams, ImageSummary,
    RuntimeClient,
};
use crate::container::config::{CreationDescriptor, ImageReference};
use crate::container::runtime::{Container, ContainerStatus};
use crate::container::signal::Signal;
use crate::error::{HatchError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Scripted outcome of an exec, keyed by its command line
#[derive(Debug, Clone, Default)]
pub(crate) struct ExecScript {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
    pub start_error: Option<String>,
    pub inspect_error: Option<String>,
    /// Never finish on its own
    pub hang: bool,
}

impl ExecScript {
    pub fn output(stdout: &str, exit_code: i64) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            exit_code,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockExec {
    pub session: ExecSession,
    pub config: ExecConfig,
    pub exit_code: Option<i64>,
}

#[derive(Default)]
pub(crate) struct MockState {
    pub images: Vec<ImageSummary>,
    pub containers: Vec<Container>,
    pub pulls: Vec<String>,
    pub pull_error: Option<String>,
    /// Fail pulls before they reach a registry
    pub pull_transport_error: Option<String>,
    pub creates: usize,
    pub create_delay: Option<Duration>,
    pub fail_start: bool,
    pub stops: Vec<String>,
    pub removed: Vec<(String, bool, bool)>,
    pub kills: Vec<(String, i32)>,
    pub container_resizes: Vec<(String, u16, u16)>,
    pub exec_resizes: Vec<(String, u16, u16)>,
    pub wait_codes: HashMap<String, i64>,
    pub scripts: HashMap<String, ExecScript>,
    pub execs: HashMap<String, MockExec>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}", 0xc0ffee000 + self.next_id)
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut Container> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id || c.short_name() == id)
            .ok_or_else(|| HatchError::NotFound(format!("No such container: {}", id)))
    }
}

#[derive(Default)]
pub(crate) struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with_image(self, tag: &str) -> Self {
        self.state().images.push(ImageSummary {
            id: format!("sha256:{}", tag.len()),
            repo_tags: vec![tag.to_string()],
        });
        self
    }

    /// Add a container directly, returning its ID
    pub fn add_container(&self, name: &str, labels: &[(&str, &str)], running: bool) -> String {
        let mut state = self.state();
        let id = state.next_id();
        state.containers.push(Container {
            id: id.clone(),
            name: format!("/{}", name),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            running,
            status: if running {
                ContainerStatus::Running
            } else {
                ContainerStatus::Exited
            },
            image: "base:latest".to_string(),
            binds: Vec::new(),
            created: Some(Utc::now()),
        });
        id
    }

    pub fn script(&self, cmd: &[&str], script: ExecScript) {
        self.state().scripts.insert(cmd.join(" "), script);
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        Ok(self.state().images.clone())
    }

    async fn pull_image(&self, image: &ImageReference) -> Result<()> {
        let mut state = self.state();
        state.pulls.push(image.to_string());
        if let Some(err) = state.pull_transport_error.clone() {
            return Err(HatchError::Runtime(err));
        }
        if let Some(reason) = state.pull_error.clone() {
            return Err(HatchError::ImagePullFailed {
                image: image.to_string(),
                reason,
            });
        }
        state.images.push(ImageSummary {
            id: format!("sha256:{}", image),
            repo_tags: vec![image.to_string()],
        });
        Ok(())
    }

    async fn create_container(&self, descriptor: &CreationDescriptor) -> Result<String> {
        let delay = self.state().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.creates += 1;
        let name = format!("/{}", descriptor.name);
        if state.containers.iter().any(|c| c.name == name) {
            return Err(HatchError::Runtime(format!(
                "Conflict. The container name \"{}\" is already in use",
                name
            )));
        }

        let id = state.next_id();
        state.containers.push(Container {
            id: id.clone(),
            name,
            labels: descriptor.labels.clone(),
            running: false,
            status: ContainerStatus::Created,
            image: descriptor.image.to_string(),
            binds: descriptor.bind_specs(),
            created: Some(Utc::now()),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_start {
            return Err(HatchError::Runtime("cannot start container".to_string()));
        }
        let container = state.container_mut(id)?;
        container.running = true;
        container.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state();
        state.stops.push(id.to_string());
        let container = state.container_mut(id)?;
        if !container.running {
            return Err(HatchError::Runtime(format!("Container {} is not running", id)));
        }
        container.running = false;
        container.status = ContainerStatus::Exited;
        Ok(())
    }

    async fn remove_container(&self, id: &str, keep_volumes: bool, force: bool) -> Result<()> {
        let mut state = self.state();
        let running = state.container_mut(id)?.running;
        if running && !force {
            return Err(HatchError::Runtime(format!("Container {} is running", id)));
        }
        state
            .containers
            .retain(|c| c.id != id && c.short_name() != id);
        state.removed.push((id.to_string(), keep_volumes, force));
        Ok(())
    }

    async fn kill_container(&self, id: &str, signal: Signal) -> Result<()> {
        let mut state = self.state();
        state.container_mut(id)?;
        state.kills.push((id.to_string(), signal.number));
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let mut state = self.state();
        state.container_mut(id)?;
        Ok(state.wait_codes.get(id).copied().unwrap_or(0))
    }

    async fn inspect_container(&self, id: &str) -> Result<Container> {
        let mut state = self.state();
        Ok(state.container_mut(id)?.clone())
    }

    async fn list_containers(&self, _all: bool) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .state()
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
            })
            .collect())
    }

    async fn resize_container_tty(&self, id: &str, height: u16, width: u16) -> Result<()> {
        let mut state = self.state();
        if !state.container_mut(id)?.running {
            return Err(HatchError::Runtime(format!("Container {} is not running", id)));
        }
        state
            .container_resizes
            .push((id.to_string(), height, width));
        Ok(())
    }

    async fn attach_container(&self, id: &str, streams: ExecStreams<'_>) -> Result<()> {
        let hang = {
            let mut state = self.state();
            state.container_mut(id)?;
            state.scripts.get("attach").map(|s| s.hang).unwrap_or(false)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let ExecStreams { stdin, stdout, .. } = streams;
        if let Some(stdin) = stdin {
            let mut input = Vec::new();
            stdin.read_to_end(&mut input).await?;
            stdout.write_all(&input).await?;
        }
        stdout.write_all(format!("attached {}", id).as_bytes()).await?;
        Ok(())
    }

    async fn create_exec(&self, container_id: &str, config: &ExecConfig) -> Result<ExecSession> {
        let mut state = self.state();
        if !state.container_mut(container_id)?.running {
            return Err(HatchError::Runtime(format!(
                "Container {} is not running",
                container_id
            )));
        }
        let session = ExecSession {
            id: state.next_id(),
            container_id: container_id.to_string(),
            cmd: config.cmd.clone(),
            attach_stdin: config.attach_stdin,
            attach_stdout: config.attach_stdout,
            attach_stderr: config.attach_stderr,
            tty: config.tty,
        };
        state.execs.insert(
            session.id.clone(),
            MockExec {
                session: session.clone(),
                config: config.clone(),
                exit_code: None,
            },
        );
        Ok(session)
    }

    async fn start_exec(&self, id: &str, streams: ExecStreams<'_>, _tty: bool) -> Result<()> {
        let script = {
            let state = self.state();
            let exec = state
                .execs
                .get(id)
                .ok_or_else(|| HatchError::NotFound(format!("No such exec instance: {}", id)))?;
            state
                .scripts
                .get(&exec.session.cmd.join(" "))
                .cloned()
                .unwrap_or_default()
        };

        if let Some(err) = script.start_error {
            return Err(HatchError::Runtime(err));
        }

        let ExecStreams {
            stdin,
            stdout,
            stderr,
        } = streams;
        stdout.write_all(&script.stdout).await?;
        match stderr {
            Some(err) => err.write_all(&script.stderr).await?,
            None => stdout.write_all(&script.stderr).await?,
        }
        if let Some(stdin) = stdin {
            let mut input = Vec::new();
            stdin.read_to_end(&mut input).await?;
            stdout.write_all(&input).await?;
        }

        if script.hang {
            std::future::pending::<()>().await;
        }

        if let Some(exec) = self.state().execs.get_mut(id) {
            exec.exit_code = Some(script.exit_code);
        }
        Ok(())
    }

    async fn inspect_exec(&self, id: &str) -> Result<ExecResult> {
        let state = self.state();
        let exec = state
            .execs
            .get(id)
            .ok_or_else(|| HatchError::NotFound(format!("No such exec instance: {}", id)))?;
        let script = state.scripts.get(&exec.session.cmd.join(" "));
        if let Some(err) = script.and_then(|s| s.inspect_error.clone()) {
            return Err(HatchError::Runtime(err));
        }
        Ok(ExecResult {
            id: id.to_string(),
            running: exec.exit_code.is_none(),
            exit_code: exec.exit_code,
        })
    }

    async fn resize_exec_tty(&self, id: &str, height: u16, width: u16) -> Result<()> {
        let mut state = self.state();
        let exec = state
            .execs
            .get(id)
            .ok_or_else(|| HatchError::NotFound(format!("No such exec instance: {}", id)))?;
        if exec.exit_code.is_some() {
            return Err(HatchError::Runtime(format!("Exec {} is not running", id)));
        }
        state.exec_resizes.push((id.to_string(), height, width));
        Ok(())
    }
}
