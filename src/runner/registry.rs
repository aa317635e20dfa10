//! Ordered step registry.

use std::collections::HashSet;

use crate::error::{ProvisionError, Result};
use crate::step::Step;

/// Steps in registration order; names are unique
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: Vec<Step>,
    names: HashSet<String>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step: Step) -> Result<()> {
        if !self.names.insert(step.name.clone()) {
            return Err(ProvisionError::DuplicateStep(step.name));
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}
