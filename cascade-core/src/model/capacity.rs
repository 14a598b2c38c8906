//! Capacity manager: what a firm could produce and what it wants to produce.

use serde::{Deserialize, Serialize};

use super::agent::FirmInfo;
use super::storage::Storage;
use super::{Model, sales::SalesState};
use crate::types::{Flow, Forcing, Price, Quantity, Ratio};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacityState {
    /// Sum of last tick's demand requests: what buyers want from us.
    pub desired_production: Flow,
}

/// Possible production is the storage-limited share of baseline production,
/// capped at β·forcing. Its price is the unit commodity cost over inputs plus
/// the baseline variable cost; in estimation mode the in-transit goods enter
/// the commodity price.
fn possible_production_intern(
    model: &Model,
    info: &FirmInfo,
    forcing: Forcing,
    sales: &SalesState,
    storages: &[Storage],
    estimate: bool,
) -> Flow {
    let beta = model.sectors[info.sector.0]
        .parameters
        .possible_overcapacity_ratio;
    let mut capacity: Ratio = forcing * beta;
    let mut unit_commodity_costs = Price::new(0.0);

    for storage in storages {
        let possible_use = if estimate {
            let next_input = *model.inflows[storage.id.0].lock().unwrap();
            storage.estimate_possible_use(model.delta_t(), next_input)
        } else {
            storage.possible_use(model.delta_t())
        };
        if estimate {
            let total_flow = storage.transport_flow(model);
            unit_commodity_costs +=
                (possible_use + total_flow).price() * storage.technology_coefficient;
        } else {
            unit_commodity_costs += possible_use.price() * storage.technology_coefficient;
        }
        let available = possible_use.quantity() / storage.baseline_used_flow().quantity();
        if available < capacity {
            capacity = available;
        }
    }
    debug_assert!(capacity >= 0.0);

    let mut result = info.baseline_production.scaled_by(capacity).round();
    if result.quantity() > Quantity::new(0.0) {
        result.set_price(
            (unit_commodity_costs + sales.baseline_unit_variable_production_costs).round(),
        );
    }
    result
}

/// CONSUMPTION_AND_PRODUCTION view.
pub fn possible_production(
    model: &Model,
    info: &FirmInfo,
    forcing: Forcing,
    sales: &SalesState,
    storages: &[Storage],
) -> Flow {
    possible_production_intern(model, info, forcing, sales, storages, false)
}

/// EXPECTATION view: next tick's inputs, transport in the commodity cost.
pub fn estimate_possible_production(
    model: &Model,
    info: &FirmInfo,
    forcing: Forcing,
    sales: &SalesState,
    storages: &[Storage],
) -> Flow {
    possible_production_intern(model, info, forcing, sales, storages, true)
}
