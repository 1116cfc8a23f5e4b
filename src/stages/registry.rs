//! Stage registry holding the canonical pipeline order.

use super::{all_stages, Stage};
use std::collections::HashSet;

/// Ordered set of stages to run.
///
/// Supports leaving stages out by id, which backs `--skip`.
pub struct StageRegistry {
    stages: Vec<Box<dyn Stage>>,
}

impl StageRegistry {
    /// Create a registry with every stage in canonical order.
    pub fn new() -> Self {
        Self {
            stages: all_stages(),
        }
    }

    /// Create a registry excluding the given stage ids.
    pub fn without_ids(ids: &[&str]) -> Self {
        let excluded: HashSet<&str> = ids.iter().copied().collect();
        Self {
            stages: all_stages()
                .into_iter()
                .filter(|s| !excluded.contains(s.id()))
                .collect(),
        }
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    /// Get a stage by id.
    pub fn get(&self, id: &str) -> Option<&dyn Stage> {
        self.stages
            .iter()
            .find(|s| s.id() == id)
            .map(|s| s.as_ref())
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
