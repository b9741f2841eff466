//! Containers as reported by the runtime

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label value marking a flag as set
pub const LABEL_TRUE: &str = "true";

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container is paused
    Paused,
    /// Container is restarting
    Restarting,
    /// Container is being removed
    Removing,
    /// Container has exited
    Exited,
    /// Container is in an error state
    Dead,
    /// Runtime reported something else
    Unknown,
}

impl ContainerStatus {
    /// Parse the runtime's status string
    pub fn from_runtime(status: &str) -> Self {
        match status {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Restarting => write!(f, "restarting"),
            ContainerStatus::Removing => write!(f, "removing"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Dead => write!(f, "dead"),
            ContainerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Container instance
///
/// A snapshot of runtime state. Nothing here is cached; every read goes back
/// to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Runtime-assigned ID
    pub id: String,
    /// Name as the runtime reports it, usually with a leading `/`
    pub name: String,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Whether the main process is running
    pub running: bool,
    /// Status
    pub status: ContainerStatus,
    /// Image the container was created from
    pub image: String,
    /// Host bind specs
    pub binds: Vec<String>,
    /// Creation time
    pub created: Option<DateTime<Utc>>,
}

impl Container {
    /// Get container ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name without the runtime's leading separator
    pub fn short_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// Check if container is running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether `label` is set to `true`
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.get(label).map(String::as_str) == Some(LABEL_TRUE)
    }

    /// Whether any of `labels` is set to `true`
    pub fn has_any_label<S: AsRef<str>>(&self, labels: &[S]) -> bool {
        labels.iter().any(|l| self.has_label(l.as_ref()))
    }
}
