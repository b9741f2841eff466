//! Hatch - category-driven sandbox containers
//!
//! Hatch turns an abstract "give me an environment of category X" request
//! into a concrete container on an external runtime and manages it from
//! there on:
//!
//! - Category policy (mounts, network, command, privilege)
//! - Idempotent create/start/inspect/list/remove
//! - Interactive and captured exec sessions
//! - TTY resizing and signal delivery

pub mod config;
pub mod container;
pub mod error;
pub mod runtime;

pub use config::SandboxConfig;
pub use error::{HatchError, Result};
