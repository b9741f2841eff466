//! Environment requests and creation descriptors

use crate::error::{HatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Default tag applied to image references without one
pub const DEFAULT_TAG: &str = "latest";

/// Purpose of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Interactive shell access to the app's code
    Exec,
    /// Long-lived builder that exec sessions run inside
    Build,
    /// Builder for a base image
    Bootstrap,
    /// Runs built code
    Code,
    /// Auxiliary service
    Service,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Exec,
        Category::Build,
        Category::Bootstrap,
        Category::Code,
        Category::Service,
    ];

    /// Label key marking containers of this category
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Exec => "exec",
            Category::Build => "build",
            Category::Bootstrap => "bootstrap",
            Category::Code => "code",
            Category::Service => "service",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = HatchError;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| HatchError::InvalidRequest(format!("unknown category: {}", s)))
    }
}

/// Request for an environment of some category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRequest {
    category: Category,
    identity: String,
    name: String,
    command: Option<Vec<String>>,
    image: String,
}

impl EnvironmentRequest {
    /// Create a request; identity and image must be non-empty
    pub fn new(category: Category, identity: &str, image: &str) -> Result<Self> {
        if image.trim().is_empty() {
            return Err(HatchError::InvalidRequest(
                "Cannot create a container without an image".to_string(),
            ));
        }
        if identity.trim().is_empty() {
            return Err(HatchError::InvalidRequest(
                "Cannot create a container without an identity".to_string(),
            ));
        }

        Ok(Self {
            category,
            identity: identity.to_string(),
            name: identity.to_string(),
            command: None,
            image: image.to_string(),
        })
    }

    /// Set the display name
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the command to run
    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = Some(command);
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    pub fn cmd(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

/// Image repository and tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Parse `repo[:tag]`, defaulting the tag to `latest`
    ///
    /// Digest references (`repo@sha256:...`) are rejected; images are
    /// pulled and matched by tag only.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(HatchError::InvalidRequest("empty image reference".to_string()));
        }
        if reference.contains('@') {
            return Err(HatchError::InvalidRequest(format!(
                "digest references are not supported: {}",
                reference
            )));
        }

        // A colon before the last slash belongs to a registry port
        let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                let (repository, tag) = (&reference[..split], &reference[split + 1..]);
                if repository.is_empty() || tag.is_empty() {
                    return Err(HatchError::InvalidRequest(format!(
                        "invalid image reference: {}",
                        reference
                    )));
                }
                Ok(Self {
                    repository: repository.to_string(),
                    tag: tag.to_string(),
                })
            }
            None => Ok(Self {
                repository: reference.to_string(),
                tag: DEFAULT_TAG.to_string(),
            }),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Host bind mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub mode: Option<String>,
}

impl BindMount {
    pub fn rw(host_path: &str, container_path: &str) -> Self {
        Self {
            host_path: host_path.to_string(),
            container_path: container_path.to_string(),
            mode: None,
        }
    }

    pub fn ro(host_path: &str, container_path: &str) -> Self {
        Self {
            mode: Some("ro".to_string()),
            ..Self::rw(host_path, container_path)
        }
    }

    /// Parse a `host:container[:mode]` spec
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [host, container] if !host.is_empty() && !container.is_empty() => {
                Ok(Self::rw(host, container))
            }
            [host, container, mode] if !host.is_empty() && !container.is_empty() => Ok(Self {
                mode: Some(mode.to_string()),
                ..Self::rw(host, container)
            }),
            _ => Err(HatchError::InvalidConfig(format!("invalid bind spec: {}", spec))),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.mode.as_deref() == Some("ro")
    }
}

impl fmt::Display for BindMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            Some(mode) => write!(f, "{}:{}:{}", self.host_path, self.container_path, mode),
            None => write!(f, "{}:{}", self.host_path, self.container_path),
        }
    }
}

/// Container network mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Whatever the runtime defaults to
    #[default]
    Default,
    /// Share the host's network stack
    Host,
}

impl NetworkMode {
    /// Value handed to the runtime, if any
    pub fn as_runtime(&self) -> Option<&'static str> {
        match self {
            NetworkMode::Default => None,
            NetworkMode::Host => Some("host"),
        }
    }
}

/// Container restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
}

/// Fully resolved creation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationDescriptor {
    /// Container name, the request identity
    pub name: String,
    /// Image reference
    pub image: ImageReference,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Category flag, identity and display name
    pub labels: HashMap<String, String>,
    /// Hostname
    pub hostname: Option<String>,
    /// Allocate a TTY
    pub tty: bool,
    /// Keep stdin open
    pub open_stdin: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    /// Working directory
    pub working_dir: Option<String>,
    /// User to run as
    pub user: Option<String>,
    /// Privileged mode
    pub privileged: bool,
    /// Restart policy
    pub restart_policy: RestartPolicy,
    /// Bind mounts, in order
    pub binds: Vec<BindMount>,
    /// Network mode
    pub network_mode: NetworkMode,
}

impl CreationDescriptor {
    /// Bind specs in runtime form
    pub fn bind_specs(&self) -> Vec<String> {
        self.binds.iter().map(|b| b.to_string()).collect()
    }
}
