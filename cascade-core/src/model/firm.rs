//! Firms: production, input use, and the per-phase wiring of the managers.

use serde::{Deserialize, Serialize};

use super::capacity::CapacityState;
use super::sales::{self, SalesState};
use super::storage::Storage;
use super::{Model, purchasing};
use crate::types::{Flow, Quantity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmState {
    pub production: Flow,
    pub storages: Vec<Storage>,
    pub capacity: CapacityState,
    pub sales: SalesState,
}

impl FirmState {
    pub fn new(baseline_production: Flow, storages: Vec<Storage>, sales: SalesState) -> Self {
        Self {
            production: baseline_production,
            storages,
            capacity: CapacityState {
                desired_production: baseline_production,
            },
            sales,
        }
    }
}

/// Produce, draw inputs, distribute: the firm's CONSUMPTION_AND_PRODUCTION.
pub fn iterate_consumption_and_production(model: &Model, agent_index: usize, state: &mut FirmState) {
    let agent = &model.agents[agent_index];
    let info = agent.firm_info().expect("agent must be a firm");
    let forcing = agent.forcing;

    let production = sales::calc_production(model, info, forcing, state);
    debug_assert!(production.quantity() >= Quantity::new(0.0));
    state.production = production;
    model.sectors[info.sector.0].add_production(production);

    for storage in &mut state.storages {
        let mut used_flow = production.scaled_by(storage.technology_coefficient).round();
        if production.quantity() > Quantity::new(0.0) {
            used_flow.set_price(storage.possible_use(model.delta_t()).price());
        }
        storage.use_content(used_flow);
        storage.iterate_consumption_and_production(model, agent_index, forcing);
    }

    sales::distribute(model, info, forcing, state);
}

/// Expectation step plus the desired input flows derived from it.
pub fn iterate_expectation(model: &Model, agent_index: usize, state: &mut FirmState) {
    let agent = &model.agents[agent_index];
    let info = agent.firm_info().expect("agent must be a firm");
    let forcing = agent.forcing;

    let sum_demand = sales::iterate_expectation(model, info, forcing, state);
    let expected = model.supply_channels[info.index.0]
        .params
        .read()
        .unwrap()
        .expected_production;
    let desired_production = expected.quantity().max(sum_demand.quantity());
    for storage in &mut state.storages {
        let desired = (desired_production * storage.technology_coefficient).round();
        storage.set_desired_used_flow(Flow::with_unit_price(desired));
    }
}

pub fn iterate_purchase(model: &Model, agent_index: usize, state: &mut FirmState) {
    for storage in &mut state.storages {
        purchasing::iterate_purchase(model, agent_index, storage);
    }
}

pub fn iterate_investment(model: &Model, state: &FirmState) {
    if !model.parameters.with_investment_dynamics {
        return;
    }
    for storage in &state.storages {
        purchasing::iterate_investment(model, storage);
    }
}
