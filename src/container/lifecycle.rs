//! Container lifecycle management

use super::config::{CreationDescriptor, EnvironmentRequest, ImageReference};
use super::exec::until_cancelled;
use super::policy::{ConfigBuilder, SiblingLookup};
use super::runtime::Container;
use crate::config::SandboxConfig;
use crate::error::{HatchError, Result};
use crate::runtime::{ExecStreams, RuntimeClient};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-name creation locks
type CreationLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// A name's entry in [`CreationLocks`], removed once its last user drops it
///
/// Dropping also covers a `create` future abandoned mid-await.
struct CreationSlot {
    name: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    creating: CreationLocks,
}

impl Drop for CreationSlot {
    fn drop(&mut self) {
        let Ok(mut creating) = self.creating.lock() else {
            return;
        };

        // The map's copy and ours; nobody else is waiting
        let ours = creating
            .get(&self.name)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock));
        if ours && Arc::strong_count(&self.lock) <= 2 {
            creating.remove(&self.name);
        }
    }
}

/// Container manager for handling container lifecycle
///
/// Holds no container state of its own; every read goes to the runtime.
#[derive(Clone)]
pub struct LifecycleManager {
    client: Arc<dyn RuntimeClient>,
    /// Grace period before forced removal
    stop_timeout: Duration,
    /// Remove containers whose start fails right after creation
    rollback_failed_start: bool,
    creating: CreationLocks,
}

impl LifecycleManager {
    /// Create a new lifecycle manager
    pub fn new(client: Arc<dyn RuntimeClient>, config: &SandboxConfig) -> Self {
        Self {
            client,
            stop_timeout: Duration::from_secs(config.stop_timeout_secs.max(0) as u64),
            rollback_failed_start: config.rollback_failed_start,
            creating: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runtime client shared with this manager
    pub fn client(&self) -> Arc<dyn RuntimeClient> {
        self.client.clone()
    }

    /// Build a descriptor for `request` and create it
    pub async fn provision(
        &self,
        builder: &ConfigBuilder,
        request: &EnvironmentRequest,
    ) -> Result<Container> {
        let descriptor = builder.build(request, self).await?;
        self.create(&descriptor).await
    }

    /// Pull the image if needed, then create, start and inspect a container
    ///
    /// Creates of the same name are serialized.
    pub async fn create(&self, descriptor: &CreationDescriptor) -> Result<Container> {
        let slot = self.creation_slot(&descriptor.name)?;
        let _guard = slot.lock.lock().await;
        self.create_unguarded(descriptor).await
    }

    async fn create_unguarded(&self, descriptor: &CreationDescriptor) -> Result<Container> {
        if !self.image_exists(&descriptor.image).await {
            self.install_image(&descriptor.image).await?;
        }

        let id = self.client.create_container(descriptor).await?;
        info!("Created container {} ({})", descriptor.name, id);

        if let Err(e) = self.client.start_container(&id).await {
            if self.rollback_failed_start {
                warn!("Start of {} failed, removing it: {}", id, e);
                if let Err(remove_err) = self.client.remove_container(&id, true, true).await {
                    warn!("Rollback of {} failed: {}", id, remove_err);
                }
            }
            return Err(e);
        }

        self.client.inspect_container(&id).await
    }

    fn creation_slot(&self, name: &str) -> Result<CreationSlot> {
        let mut creating = self
            .creating
            .lock()
            .map_err(|_| HatchError::Lock("Failed to acquire creation lock".to_string()))?;

        Ok(CreationSlot {
            name: name.to_string(),
            lock: creating.entry(name.to_string()).or_default().clone(),
            creating: self.creating.clone(),
        })
    }

    /// Start a container
    pub async fn start(&self, id: &str) -> Result<()> {
        self.client.start_container(id).await
    }

    /// Stop (best effort) and force-remove a container, keeping its volumes
    pub async fn remove(&self, id: &str) -> Result<()> {
        if let Err(e) = self.client.stop_container(id, self.stop_timeout).await {
            debug!("Stop before removing {} failed: {}", id, e);
        }

        self.client.remove_container(id, true, true).await?;
        info!("Removed container {}", id);
        Ok(())
    }

    /// Inspect a container by ID
    pub async fn inspect(&self, id: &str) -> Result<Container> {
        self.client.inspect_container(id).await
    }

    /// Find a container by name, `/`-prefixed name, or ID
    pub async fn get(&self, name_or_id: &str) -> Result<Container> {
        let summaries = self.client.list_containers(true).await?;

        match summaries.iter().find(|s| s.matches(name_or_id)) {
            Some(summary) => self.client.inspect_container(&summary.id).await,
            None => Err(HatchError::NotFound(name_or_id.to_string())),
        }
    }

    /// All containers, or those with any of `labels` set to `true`
    pub async fn list<S: AsRef<str> + Sync>(&self, labels: &[S]) -> Result<Vec<Container>> {
        let summaries = self.client.list_containers(true).await?;
        let mut containers = Vec::with_capacity(summaries.len());

        for summary in summaries {
            // Containers can disappear between list and inspect
            let container = match self.client.inspect_container(&summary.id).await {
                Ok(container) => container,
                Err(e) => {
                    debug!("Skipping {}: {}", summary.id, e);
                    continue;
                }
            };

            if labels.is_empty() || container.has_any_label(labels) {
                containers.push(container);
            }
        }

        Ok(containers)
    }

    /// Block until a container exits and return its exit code
    pub async fn wait(&self, id: &str) -> Result<i64> {
        self.client.wait_container(id).await
    }

    /// Attach to a container's main process
    pub async fn attach(&self, id: &str, streams: ExecStreams<'_>) -> Result<()> {
        self.client.attach_container(id, streams).await
    }

    /// Attach until the process ends or `cancel` fires
    pub async fn attach_until(
        &self,
        id: &str,
        streams: ExecStreams<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        until_cancelled(cancel, id, self.client.attach_container(id, streams)).await
    }

    /// Whether `image` is present locally, by exact `repository:tag`
    pub async fn image_exists(&self, image: &ImageReference) -> bool {
        let wanted = image.to_string();
        match self.client.list_images().await {
            Ok(images) => images
                .iter()
                .any(|i| i.repo_tags.iter().any(|tag| *tag == wanted)),
            Err(e) => {
                debug!("Listing images failed: {}", e);
                false
            }
        }
    }

    /// Pull an image
    pub async fn install_image(&self, image: &ImageReference) -> Result<()> {
        info!("Pulling image {}", image);
        self.client
            .pull_image(image)
            .await
            .map_err(|e| match e {
                HatchError::ImagePullFailed { .. } => e,
                other => HatchError::ImagePullFailed {
                    image: image.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Pull an image again, whether or not it is present
    pub async fn update_image(&self, image: &ImageReference) -> Result<()> {
        self.install_image(image).await
    }
}

#[async_trait]
impl SiblingLookup for LifecycleManager {
    async fn find_sibling(&self, name: &str) -> Option<String> {
        self.get(name).await.ok().map(|c| c.id)
    }
}
