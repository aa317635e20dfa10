//! Which stages take part in a run.

use std::collections::BTreeSet;

use crate::config::StagesConfig;
use crate::step::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSelection {
    enabled: BTreeSet<Stage>,
}

impl Default for StageSelection {
    fn default() -> Self {
        Self::from_config(&StagesConfig::default())
    }
}

impl StageSelection {
    /// Every stage
    pub fn all() -> Self {
        Self {
            enabled: Stage::ALL.into_iter().collect(),
        }
    }

    /// Start from the config file: opt-in virtualization, opt-out kernel,
    /// and the explicitly disabled list
    pub fn from_config(stages: &StagesConfig) -> Self {
        let selection = Self::all().skip_kernel(!stages.kernel).skip(&stages.disabled);
        if stages.virtualization {
            selection
        } else {
            selection.without(Stage::Virtualization)
        }
    }

    /// Turn the virtualization stage on; `false` leaves the selection as is
    pub fn with_virtualization(mut self, enable: bool) -> Self {
        if enable {
            self.enabled.insert(Stage::Virtualization);
        }
        self
    }

    pub fn skip_kernel(self, skip: bool) -> Self {
        if skip { self.without(Stage::Kernel) } else { self }
    }

    /// Drop the given stages. The prepare stage cannot be skipped.
    pub fn skip(mut self, stages: &[Stage]) -> Self {
        for stage in stages {
            if *stage == Stage::Prepare {
                log::warn!("the prepare stage cannot be skipped; ignoring");
                continue;
            }
            self.enabled.remove(stage);
        }
        self
    }

    fn without(mut self, stage: Stage) -> Self {
        if stage != Stage::Prepare {
            self.enabled.remove(&stage);
        }
        self
    }

    pub fn includes(&self, stage: Stage) -> bool {
        self.enabled.contains(&stage)
    }

    /// Enabled stages in run order
    pub fn stages(&self) -> Vec<Stage> {
        Stage::ALL.into_iter().filter(|s| self.includes(*s)).collect()
    }
}
