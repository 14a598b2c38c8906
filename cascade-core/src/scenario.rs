//! Scenario driver interface.
//!
//! A scenario mutates forcings at the start of each tick through the ambient
//! surface on [`Model`]: agent forcing, geographic passage, and tax
//! definitions. Concrete drivers (event series, rasters) live outside the
//! core; applied deltas are symmetric — after a shock window ends, the
//! scenario restores the defaults itself.

use crate::model::Model;
use crate::types::TimeStep;

pub trait Scenario: Send {
    /// Called once per tick during the SCENARIO phase.
    fn apply(&mut self, model: &mut Model, timestep: TimeStep);
}

/// The undisturbed baseline: applies nothing.
#[derive(Debug, Default)]
pub struct BaselineScenario;

impl Scenario for BaselineScenario {
    fn apply(&mut self, _model: &mut Model, _timestep: TimeStep) {}
}

/// Adapter turning a closure into a scenario; handy for tests and small
/// event-series drivers.
pub struct FnScenario<F>(pub F);

impl<F: FnMut(&mut Model, TimeStep) + Send> Scenario for FnScenario<F> {
    fn apply(&mut self, model: &mut Model, timestep: TimeStep) {
        (self.0)(model, timestep)
    }
}
