//! Sectors: immutable parameters plus lock-guarded tick aggregates.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::AgentId;
use super::geo::TransportType;
use crate::parameters::SectorParameters;
use crate::types::{Demand, Flow, Ratio, Time};

/// Aggregate counters, `+=`-only within their phase under the lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorAggregates {
    pub total_demand: Demand,
    pub total_production: Flow,
    pub last_total_production: Flow,
}

#[derive(Debug)]
pub struct Sector {
    pub name: String,
    pub transport_type: TransportType,
    /// ω: storage content cap as a multiple of baseline content.
    pub upper_storage_limit: Ratio,
    /// ψ: baseline content expressed as a fill time of the baseline input.
    pub baseline_storage_fill_factor: Time,
    pub parameters: SectorParameters,
    pub firms: Vec<AgentId>,
    aggregates: Mutex<SectorAggregates>,
}

impl Sector {
    pub fn new(
        name: String,
        transport_type: TransportType,
        upper_storage_limit: Ratio,
        baseline_storage_fill_factor: Time,
        parameters: SectorParameters,
    ) -> Self {
        Self {
            name,
            transport_type,
            upper_storage_limit,
            baseline_storage_fill_factor,
            parameters,
            firms: Vec::new(),
            aggregates: Mutex::new(SectorAggregates::default()),
        }
    }

    /// PURCHASE phase: buyers report their demand requests.
    pub fn add_demand_request(&self, demand: Demand) {
        self.aggregates.lock().unwrap().total_demand += demand;
    }

    /// CONSUMPTION_AND_PRODUCTION phase: firms report realized production.
    pub fn add_production(&self, flow: Flow) {
        self.aggregates.lock().unwrap().total_production += flow;
    }

    /// Start-of-phase reset: demand clears, production rolls into `last`.
    pub fn iterate_consumption_and_production(&self) {
        let mut agg = self.aggregates.lock().unwrap();
        agg.total_demand = Demand::ZERO;
        agg.last_total_production = agg.total_production;
        agg.total_production = Flow::ZERO;
    }

    pub fn aggregates(&self) -> SectorAggregates {
        self.aggregates.lock().unwrap().clone()
    }

    pub fn restore_aggregates(&self, aggregates: SectorAggregates) {
        *self.aggregates.lock().unwrap() = aggregates;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Price, Quantity};

    fn sector() -> Sector {
        Sector::new(
            "A".into(),
            TransportType::Immediate,
            2.0,
            Time::new(10.0),
            SectorParameters::default(),
        )
    }

    #[test]
    fn aggregates_accumulate_and_reset() {
        let s = sector();
        s.add_production(Flow::new(Quantity::new(2.0), Price::new(1.0)));
        s.add_demand_request(Flow::new(Quantity::new(3.0), Price::new(1.0)));
        let agg = s.aggregates();
        assert_eq!(agg.total_production.quantity().get(), 2.0);
        assert_eq!(agg.total_demand.quantity().get(), 3.0);

        s.iterate_consumption_and_production();
        let agg = s.aggregates();
        assert_eq!(agg.total_demand.quantity().get(), 0.0);
        assert_eq!(agg.total_production.quantity().get(), 0.0);
        assert_eq!(agg.last_total_production.quantity().get(), 2.0);
    }
}
