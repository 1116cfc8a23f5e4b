//! Command execution.
//!
//! This module provides:
//! - [`CommandRunner`], the seam between the tool and the host's processes
//! - [`Executor`], the dry-run chokepoint for every mutating action

mod executor;
mod runner;

#[cfg(test)]
pub mod testing;

pub use executor::{backup_path, ActionOutcome, ActionStats, Executor};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
