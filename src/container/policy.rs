//! Category policy
//!
//! Each [`Category`] maps to a fixed row in [`POLICIES`] describing its
//! command, network and mounts. [`ConfigBuilder`] applies a row to an
//! [`EnvironmentRequest`] to produce a [`CreationDescriptor`].

use super::config::{
    BindMount, Category, CreationDescriptor, EnvironmentRequest, ImageReference, NetworkMode,
    RestartPolicy,
};
use super::runtime::LABEL_TRUE;
use crate::config::SandboxConfig;
use crate::error::{HatchError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Working directory of interactive environments
pub const EXEC_WORKING_DIR: &str = "/code";

/// Host directories a mount rule can draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostDir {
    /// This app's code directory
    AppCode,
    /// Shared engines
    Engines,
    Cache,
    Deploy,
    Build,
}

impl HostDir {
    fn resolve(&self, config: &SandboxConfig) -> Result<String> {
        let path = match self {
            HostDir::AppCode => {
                if config.app.trim().is_empty() {
                    return Err(HatchError::InvalidConfig(
                        "No app configured; refusing to mount the whole code root".to_string(),
                    ));
                }
                config.app_code_dir()
            }
            HostDir::Engines => config.engines_dir.clone(),
            HostDir::Cache => config.var_root.join("cache"),
            HostDir::Deploy => config.var_root.join("deploy"),
            HostDir::Build => config.var_root.join("build"),
        };
        Ok(dir_spec(&path))
    }
}

fn dir_spec(path: &Path) -> String {
    format!("{}/", path.display().to_string().trim_end_matches('/'))
}

/// One bind mount of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountRule {
    pub source: HostDir,
    pub target: &'static str,
    pub read_only: bool,
}

const fn rw(source: HostDir, target: &'static str) -> MountRule {
    MountRule {
        source,
        target,
        read_only: false,
    }
}

const fn ro(source: HostDir, target: &'static str) -> MountRule {
    MountRule {
        source,
        target,
        read_only: true,
    }
}

/// Where the container command comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRule {
    /// Whatever the request carries
    Caller,
    /// The configured sleep placeholder
    Sleep,
}

/// Policy row for a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryPolicy {
    pub category: Category,
    pub command: CommandRule,
    /// Attach all streams, open stdin, run as the exec user in the code dir
    pub interactive: bool,
    pub network: NetworkMode,
    pub mounts: &'static [MountRule],
    /// Append the configured library dirs
    pub lib_dirs: bool,
    /// Bind the shared data container's `/data`, when it exists
    pub shared_data: bool,
}

const EXEC_POLICY: CategoryPolicy = CategoryPolicy {
    category: Category::Exec,
    command: CommandRule::Caller,
    interactive: true,
    network: NetworkMode::Host,
    mounts: &[
        rw(HostDir::AppCode, "/code/"),
        ro(HostDir::Engines, "/share/engines/"),
    ],
    lib_dirs: true,
    shared_data: true,
};

const BUILD_POLICY: CategoryPolicy = CategoryPolicy {
    category: Category::Build,
    command: CommandRule::Sleep,
    interactive: false,
    network: NetworkMode::Default,
    mounts: &[
        rw(HostDir::Cache, "/mnt/cache/"),
        rw(HostDir::Deploy, "/mnt/deploy/"),
        rw(HostDir::Build, "/mnt/build/"),
        ro(HostDir::AppCode, "/share/code/"),
        ro(HostDir::Engines, "/share/engines/"),
    ],
    lib_dirs: false,
    shared_data: false,
};

const BOOTSTRAP_POLICY: CategoryPolicy = CategoryPolicy {
    category: Category::Bootstrap,
    command: CommandRule::Sleep,
    interactive: false,
    network: NetworkMode::Default,
    mounts: &[
        rw(HostDir::Cache, "/mnt/cache/"),
        rw(HostDir::Deploy, "/mnt/deploy/"),
        rw(HostDir::AppCode, "/code/"),
        ro(HostDir::Engines, "/share/engines/"),
    ],
    lib_dirs: false,
    shared_data: false,
};

const CODE_POLICY: CategoryPolicy = CategoryPolicy {
    category: Category::Code,
    command: CommandRule::Caller,
    interactive: false,
    network: NetworkMode::Default,
    mounts: &[rw(HostDir::Deploy, "/data/"), rw(HostDir::Build, "/code/")],
    lib_dirs: false,
    shared_data: false,
};

const SERVICE_POLICY: CategoryPolicy = CategoryPolicy {
    category: Category::Service,
    command: CommandRule::Caller,
    interactive: false,
    network: NetworkMode::Default,
    mounts: &[],
    lib_dirs: false,
    shared_data: false,
};

pub const POLICIES: &[CategoryPolicy] = &[
    EXEC_POLICY,
    BUILD_POLICY,
    BOOTSTRAP_POLICY,
    CODE_POLICY,
    SERVICE_POLICY,
];

/// Policy row for `category`
pub fn policy_for(category: Category) -> &'static CategoryPolicy {
    match category {
        Category::Exec => &EXEC_POLICY,
        Category::Build => &BUILD_POLICY,
        Category::Bootstrap => &BOOTSTRAP_POLICY,
        Category::Code => &CODE_POLICY,
        Category::Service => &SERVICE_POLICY,
    }
}

/// Finds a sibling container by name
///
/// A miss is not an error; it only means the enrichment is skipped.
#[async_trait]
pub trait SiblingLookup: Send + Sync {
    /// ID of the container called `name`, if one exists
    async fn find_sibling(&self, name: &str) -> Option<String>;
}

/// Lookup that never finds anything
pub struct NoSiblings;

#[async_trait]
impl SiblingLookup for NoSiblings {
    async fn find_sibling(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Turns environment requests into creation descriptors
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: SandboxConfig,
}

impl ConfigBuilder {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Build a descriptor, looking up the shared data container when the
    /// category asks for it
    pub async fn build(
        &self,
        request: &EnvironmentRequest,
        lookup: &dyn SiblingLookup,
    ) -> Result<CreationDescriptor> {
        let policy = policy_for(request.category());

        let shared_data = if policy.shared_data {
            let found = lookup.find_sibling(&self.config.shared_data_container).await;
            if found.is_none() {
                debug!(
                    "{} not found, skipping shared data mount for {}",
                    self.config.shared_data_container,
                    request.identity()
                );
            }
            found
        } else {
            None
        };

        self.assemble(request, shared_data.as_deref())
    }

    /// Build a descriptor from an already resolved sibling lookup
    pub fn assemble(
        &self,
        request: &EnvironmentRequest,
        shared_data_id: Option<&str>,
    ) -> Result<CreationDescriptor> {
        if request.image().trim().is_empty() {
            return Err(HatchError::InvalidRequest(
                "Cannot create a container without an image".to_string(),
            ));
        }
        let image = ImageReference::parse(request.image())?;
        let policy = policy_for(request.category());

        let labels = HashMap::from([
            (request.category().to_string(), LABEL_TRUE.to_string()),
            ("uid".to_string(), request.identity().to_string()),
            ("name".to_string(), request.display_name().to_string()),
        ]);

        let cmd = match policy.command {
            CommandRule::Caller => request.cmd().map(<[String]>::to_vec),
            CommandRule::Sleep => Some(self.config.sleep_command.clone()),
        };

        let mut binds: Vec<BindMount> = policy
            .mounts
            .iter()
            .map(|rule| {
                let host = rule.source.resolve(&self.config)?;
                Ok(if rule.read_only {
                    BindMount::ro(&host, rule.target)
                } else {
                    BindMount::rw(&host, rule.target)
                })
            })
            .collect::<Result<_>>()?;

        if policy.lib_dirs {
            for spec in &self.config.lib_dirs {
                binds.push(BindMount::parse(spec)?);
            }
        }

        if policy.shared_data {
            if let Some(id) = shared_data_id {
                let host = dir_spec(&self.config.container_storage_root.join(id).join("data"));
                binds.push(BindMount::rw(&host, "/data/"));
            }
        }

        let interactive = policy.interactive;

        Ok(CreationDescriptor {
            name: request.identity().to_string(),
            image,
            cmd,
            labels,
            hostname: interactive.then(|| self.config.exec_hostname()),
            tty: true,
            open_stdin: interactive,
            attach_stdin: interactive,
            attach_stdout: interactive,
            attach_stderr: interactive,
            working_dir: interactive.then(|| EXEC_WORKING_DIR.to_string()),
            user: interactive.then(|| self.config.exec_user.clone()),
            privileged: true,
            restart_policy: RestartPolicy::Always,
            binds,
            network_mode: policy.network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Found(&'static str);

    #[async_trait]
    impl SiblingLookup for Found {
        async fn find_sibling(&self, name: &str) -> Option<String> {
            (name == "build1").then(|| self.0.to_string())
        }
    }

    fn builder() -> ConfigBuilder {
        ConfigBuilder::new(SandboxConfig::new("blog"))
    }

    fn specs(descriptor: &CreationDescriptor) -> Vec<String> {
        descriptor.bind_specs()
    }

    #[test]
    fn test_every_category_has_one_policy() {
        for category in Category::ALL {
            let rows = POLICIES.iter().filter(|p| p.category == category).count();
            assert_eq!(rows, 1, "{}", category);
            assert_eq!(policy_for(category).category, category);
        }
    }

    #[tokio::test]
    async fn test_exec_without_shared_container() {
        let request = EnvironmentRequest::new(Category::Exec, "app1", "base:latest").unwrap();
        let descriptor = builder().build(&request, &NoSiblings).await.unwrap();

        assert_eq!(
            specs(&descriptor),
            vec![
                "/vagrant/code/blog/:/code/",
                "/vagrant/engines/:/share/engines/:ro",
            ]
        );
        assert_eq!(descriptor.network_mode, NetworkMode::Host);
        assert!(descriptor.tty && descriptor.open_stdin);
        assert!(descriptor.attach_stdin && descriptor.attach_stdout && descriptor.attach_stderr);
        assert_eq!(descriptor.working_dir.as_deref(), Some("/code"));
        assert_eq!(descriptor.user.as_deref(), Some("gonano"));
        assert_eq!(descriptor.hostname.as_deref(), Some("blog.dev"));
    }

    #[tokio::test]
    async fn test_exec_with_shared_container() {
        let request = EnvironmentRequest::new(Category::Exec, "app1", "base:latest").unwrap();
        let descriptor = builder().build(&request, &Found("f00d")).await.unwrap();

        assert_eq!(
            specs(&descriptor).last().unwrap(),
            "/mnt/sda/var/lib/docker/aufs/mnt/f00d/data/:/data/"
        );
        assert_eq!(descriptor.binds.len(), 3);
    }

    #[tokio::test]
    async fn test_exec_appends_lib_dirs_before_shared_data() {
        let mut config = SandboxConfig::new("blog");
        config.lib_dirs = vec!["/opt/lib/:/share/lib/:ro".to_string()];
        let builder = ConfigBuilder::new(config);

        let request = EnvironmentRequest::new(Category::Exec, "app1", "base").unwrap();
        let descriptor = builder.build(&request, &Found("f00d")).await.unwrap();

        let specs = specs(&descriptor);
        assert_eq!(specs[2], "/opt/lib/:/share/lib/:ro");
        assert!(specs[3].ends_with(":/data/"));
    }

    #[test]
    fn test_build_uses_sleep_placeholder() {
        let request = EnvironmentRequest::new(Category::Build, "b1", "builder:latest")
            .unwrap()
            .command(vec!["ignored".to_string()]);
        let descriptor = builder().assemble(&request, None).unwrap();

        assert_eq!(
            descriptor.cmd,
            Some(vec!["/bin/sleep".to_string(), "365d".to_string()])
        );
        assert_eq!(
            specs(&descriptor),
            vec![
                "/mnt/sda/var/hatch/cache/:/mnt/cache/",
                "/mnt/sda/var/hatch/deploy/:/mnt/deploy/",
                "/mnt/sda/var/hatch/build/:/mnt/build/",
                "/vagrant/code/blog/:/share/code/:ro",
                "/vagrant/engines/:/share/engines/:ro",
            ]
        );
        let read_only = descriptor.binds.iter().filter(|b| b.is_read_only()).count();
        assert_eq!(read_only, 2);
        assert_eq!(descriptor.network_mode, NetworkMode::Default);
        assert!(!descriptor.attach_stdin);
    }

    #[test]
    fn test_bootstrap_mounts_code_writable() {
        let request = EnvironmentRequest::new(Category::Bootstrap, "boot", "base").unwrap();
        let descriptor = builder().assemble(&request, None).unwrap();

        assert_eq!(
            specs(&descriptor),
            vec![
                "/mnt/sda/var/hatch/cache/:/mnt/cache/",
                "/mnt/sda/var/hatch/deploy/:/mnt/deploy/",
                "/vagrant/code/blog/:/code/",
                "/vagrant/engines/:/share/engines/:ro",
            ]
        );
        assert_eq!(descriptor.cmd.unwrap()[0], "/bin/sleep");
    }

    #[test]
    fn test_code_and_service() {
        let cmd = vec!["/opt/run".to_string()];
        let request = EnvironmentRequest::new(Category::Code, "web1", "code")
            .unwrap()
            .command(cmd.clone());
        let descriptor = builder().assemble(&request, None).unwrap();
        assert_eq!(descriptor.cmd, Some(cmd));
        assert_eq!(
            specs(&descriptor),
            vec![
                "/mnt/sda/var/hatch/deploy/:/data/",
                "/mnt/sda/var/hatch/build/:/code/",
            ]
        );

        let request = EnvironmentRequest::new(Category::Service, "db1", "postgres:15").unwrap();
        let descriptor = builder().assemble(&request, None).unwrap();
        assert!(descriptor.binds.is_empty());
        assert!(descriptor.cmd.is_none());
        assert_eq!(descriptor.image.tag, "15");
    }

    #[test]
    fn test_blanket_privilege_and_restart() {
        for category in Category::ALL {
            let request = EnvironmentRequest::new(category, "x1", "img").unwrap();
            let descriptor = builder().assemble(&request, None).unwrap();
            assert!(descriptor.privileged);
            assert_eq!(descriptor.restart_policy, RestartPolicy::Always);
            assert!(descriptor.tty);
        }
    }

    #[test]
    fn test_labels() {
        let request = EnvironmentRequest::new(Category::Service, "db1", "redis")
            .unwrap()
            .name("cache");
        let descriptor = builder().assemble(&request, None).unwrap();

        assert_eq!(descriptor.name, "db1");
        assert_eq!(descriptor.labels["service"], "true");
        assert_eq!(descriptor.labels["uid"], "db1");
        assert_eq!(descriptor.labels["name"], "cache");
        assert_eq!(descriptor.labels.len(), 3);
    }

    #[test]
    fn test_shared_data_ignored_for_other_categories() {
        let request = EnvironmentRequest::new(Category::Code, "web1", "code").unwrap();
        let descriptor = builder().assemble(&request, Some("f00d")).unwrap();
        assert!(!specs(&descriptor).iter().any(|s| s.contains("f00d")));
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let request = EnvironmentRequest::new(Category::Exec, "app1", "base:latest").unwrap();
        let builder = builder();
        let first = builder.build(&request, &Found("f00d")).await.unwrap();
        let second = builder.build(&request, &Found("f00d")).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_lib_dir_is_rejected() {
        let mut config = SandboxConfig::new("blog");
        config.lib_dirs = vec!["nonsense".to_string()];
        let request = EnvironmentRequest::new(Category::Exec, "app1", "base").unwrap();
        assert!(ConfigBuilder::new(config).assemble(&request, None).is_err());
    }

    #[test]
    fn test_app_code_requires_an_app() {
        let builder = ConfigBuilder::new(SandboxConfig::default());

        for category in [Category::Exec, Category::Build, Category::Bootstrap] {
            let request = EnvironmentRequest::new(category, "app1", "base").unwrap();
            let err = builder.assemble(&request, None).unwrap_err();
            assert!(matches!(err, HatchError::InvalidConfig(_)), "{}", category);
        }

        // Categories without the app code mount don't need one
        for category in [Category::Code, Category::Service] {
            let request = EnvironmentRequest::new(category, "app1", "base").unwrap();
            assert!(builder.assemble(&request, None).is_ok(), "{}", category);
        }
    }
}
