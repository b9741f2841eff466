//! Container management module
//!
//! This module turns environment requests into containers and manages them
//! afterwards: category policy, lifecycle, and exec sessions.

pub mod config;
pub mod exec;
pub mod lifecycle;
pub mod policy;
pub mod runtime;
pub mod signal;

pub use config::{
    BindMount, Category, CreationDescriptor, EnvironmentRequest, ImageReference, NetworkMode,
    RestartPolicy,
};
pub use exec::{missing_file_probe, CapturedOutput, ExecSessionManager};
pub use lifecycle::LifecycleManager;
pub use policy::{ConfigBuilder, NoSiblings, SiblingLookup};
pub use runtime::{Container, ContainerStatus};
pub use signal::Signal;
