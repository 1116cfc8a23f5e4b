//! vm-sweeper - best-effort cleanup of freshly provisioned Linux VMs
//!
//! This crate provides:
//! - Distro detection and a package manager abstraction over apt, dnf and yum
//! - A dry-run aware executor through which every host mutation passes
//! - The cleanup stages and the orchestrator that runs them in order

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod exec;
pub mod host;
pub mod pkg;
pub mod report;
pub mod stages;

// Re-export commonly used types
pub use config::{Config, RunConfig};
pub use error::{Result, SweeperError};
