//! Event kinds and the run-wide event bus.
//!
//! Degenerate economic conditions and optimizer trouble do not abort the run;
//! they are recorded here under a dedicated lock and pulled by outputs.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::{FloatType, TimeStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    NoConsumption,
    StorageUnderrun,
    StorageOverrun,
    NoProductionSupplyShortage,
    NoProductionDemandQuantityShortage,
    NoProductionDemandValueShortage,
    NoProductionHighCosts,
    NoExpProductionSupplyShortage,
    NoExpProductionDemandQuantityShortage,
    NoExpProductionDemandValueShortage,
    NoExpProductionHighCosts,
    OptimizerTimeout,
    OptimizerMaxiter,
    OptimizerRoundoffLimited,
}

pub const EVENT_NAMES: [&str; 14] = [
    "NO_CONSUMPTION",
    "STORAGE_UNDERRUN",
    "STORAGE_OVERRUN",
    "NO_PRODUCTION_SUPPLY_SHORTAGE",
    "NO_PRODUCTION_DEMAND_QUANTITY_SHORTAGE",
    "NO_PRODUCTION_DEMAND_VALUE_SHORTAGE",
    "NO_PRODUCTION_HIGH_COSTS",
    "NO_EXP_PRODUCTION_SUPPLY_SHORTAGE",
    "NO_EXP_PRODUCTION_DEMAND_QUANTITY_SHORTAGE",
    "NO_EXP_PRODUCTION_DEMAND_VALUE_SHORTAGE",
    "NO_EXP_PRODUCTION_HIGH_COSTS",
    "OPTIMIZER_TIMEOUT",
    "OPTIMIZER_MAXITER",
    "OPTIMIZER_ROUNDOFF_LIMITED",
];

impl EventKind {
    pub fn name(&self) -> &'static str {
        EVENT_NAMES[*self as usize]
    }
}

/// One recorded event. Indices refer to the model's agent arena; either may
/// be absent depending on the event kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestep: TimeStep,
    pub kind: EventKind,
    pub agent_from: Option<usize>,
    pub agent_to: Option<usize>,
    pub value: FloatType,
}

#[derive(Debug, Default)]
pub struct EventBus {
    records: Mutex<Vec<EventRecord>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        timestep: TimeStep,
        kind: EventKind,
        agent_from: Option<usize>,
        agent_to: Option<usize>,
        value: FloatType,
    ) {
        tracing::debug!(
            target: "event",
            timestep,
            kind = kind.name(),
            agent_from,
            agent_to,
            value,
        );
        self.records.lock().unwrap().push(EventRecord {
            timestep,
            kind,
            agent_from,
            agent_to,
            value,
        });
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<EventRecord> {
        std::mem::take(&mut self.records.lock().unwrap())
    }

    /// Copy of the recorded events, left in place.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_align_with_kinds() {
        assert_eq!(EventKind::NoConsumption.name(), "NO_CONSUMPTION");
        assert_eq!(
            EventKind::OptimizerRoundoffLimited.name(),
            "OPTIMIZER_ROUNDOFF_LIMITED"
        );
        assert_eq!(
            EventKind::NoExpProductionHighCosts.name(),
            "NO_EXP_PRODUCTION_HIGH_COSTS"
        );
    }

    #[test]
    fn bus_records_and_drains() {
        let bus = EventBus::new();
        bus.record(3, EventKind::StorageUnderrun, Some(1), None, f64::NAN);
        bus.record(3, EventKind::StorageOverrun, Some(2), None, 0.5);
        assert_eq!(bus.count(EventKind::StorageUnderrun), 1);
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert!(bus.drain().is_empty());
    }
}
