//! Turns the configuration into the ordered step list for one run.
//!
//! Stages run in [`Stage::ALL`] order. Within a stage, built-in steps come
//! first, then vendor installers, then free-form extra steps, each in manifest
//! order. Steps of stages left out of the selection are never registered.

mod selection;
mod stages;

pub use selection::StageSelection;

use crate::config::Config;
use crate::error::Result;
use crate::runner::StepRegistry;
use crate::step::Stage;

use stages::StageBuilder;

pub fn build(config: &Config, selection: &StageSelection) -> Result<StepRegistry> {
    let builder = StageBuilder::new(config);
    let mut registry = StepRegistry::new();
    for stage in Stage::ALL {
        if !selection.includes(stage) {
            log::debug!("stage {} not selected", stage);
            continue;
        }
        for step in builder.steps(stage) {
            registry.register(step)?;
        }
    }
    log::info!(
        "registered {} steps across {} stages",
        registry.len(),
        selection.stages().len()
    );
    Ok(registry)
}
