//! Sandbox host configuration
//!
//! Describes where the host keeps application code, engines and the shared
//! cache/deploy/build directories, plus the handful of constants the category
//! policy needs.

use crate::error::{HatchError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of application code on the host
pub const DEFAULT_CODE_ROOT: &str = "/vagrant/code";

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Application name, the single directory under `code_root`
    pub app: String,
    /// Host directory holding application code
    pub code_root: PathBuf,
    /// Host directory holding engines
    pub engines_dir: PathBuf,
    /// Parent of the `cache/`, `deploy/` and `build/` directories
    pub var_root: PathBuf,
    /// Where the runtime exposes each container's writable layer
    pub container_storage_root: PathBuf,
    /// Extra bind specs added to exec environments
    pub lib_dirs: Vec<String>,
    /// User for exec environments
    pub exec_user: String,
    /// Appended to the app name to form the exec hostname
    pub hostname_suffix: String,
    /// Placeholder command keeping build/bootstrap containers alive
    pub sleep_command: Vec<String>,
    /// Container whose data directory is shared into exec environments
    pub shared_data_container: String,
    /// User for captured (non-interactive) execs
    pub capture_user: String,
    /// Grace period before a forced removal, in seconds
    pub stop_timeout_secs: i64,
    /// Remove a container whose start failed right after creation
    pub rollback_failed_start: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            app: String::new(),
            code_root: PathBuf::from(DEFAULT_CODE_ROOT),
            engines_dir: PathBuf::from("/vagrant/engines"),
            var_root: PathBuf::from("/mnt/sda/var/hatch"),
            container_storage_root: PathBuf::from("/mnt/sda/var/lib/docker/aufs/mnt"),
            lib_dirs: Vec::new(),
            exec_user: "gonano".to_string(),
            hostname_suffix: ".dev".to_string(),
            sleep_command: vec!["/bin/sleep".to_string(), "365d".to_string()],
            shared_data_container: "build1".to_string(),
            capture_user: "root".to_string(),
            stop_timeout_secs: 0,
            rollback_failed_start: false,
        }
    }
}

impl SandboxConfig {
    /// Create a configuration for the given application
    pub fn new(app: &str) -> Self {
        Self {
            app: app.to_string(),
            ..Self::default()
        }
    }

    /// Load a configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: SandboxConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("hatch")
            .join("config.yaml")
    }

    /// Fill in `app` from the code root when it was not configured
    pub fn resolve_app(mut self) -> Result<Self> {
        if self.app.is_empty() {
            self.app = Self::discover_app(&self.code_root)?;
        }
        Ok(self)
    }

    /// The application is the first entry of the code root, which must be a directory
    pub fn discover_app(code_root: &Path) -> Result<String> {
        let mut entries = fs::read_dir(code_root)?
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        let first = entries.first().ok_or_else(|| {
            HatchError::InvalidConfig(format!("There is no code in {}", code_root.display()))
        })?;

        if !first.file_type()?.is_dir() {
            return Err(HatchError::InvalidConfig(format!(
                "There is no code in {}",
                code_root.display()
            )));
        }

        Ok(first.file_name().to_string_lossy().to_string())
    }

    /// Host directory holding this app's code
    pub fn app_code_dir(&self) -> PathBuf {
        self.code_root.join(&self.app)
    }

    /// Hostname given to exec environments
    pub fn exec_hostname(&self) -> String {
        format!("{}{}", self.app, self.hostname_suffix)
    }
}
