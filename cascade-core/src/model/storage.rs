//! Per-(sector, agent) input storages.
//!
//! A storage buffers deliveries against use. Deliveries of the running tick
//! accumulate in the model-level inflow register (locked, written by the
//! sellers' chains); the storage itself keeps the two historical registers:
//! `current_input_flow` (delivered last tick, consumed this tick) and
//! `last_input_flow` (the tick before, read by OUTPUT and PURCHASE).

use serde::{Deserialize, Serialize};

use super::purchasing::PurchasingState;
use super::{ConnectionId, Model, SectorId, StorageId};
use crate::events::EventKind;
use crate::parameters::StorageParameters;
use crate::types::{Flow, Forcing, Quantity, Ratio, Stock, Time};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    pub sector: SectorId,
    pub id: StorageId,
    pub baseline_input_flow: Flow,
    pub baseline_content: Stock,
    pub content: Stock,
    pub used_flow: Flow,
    pub desired_used_flow: Flow,
    /// Delivered last tick; consumed by this tick's production.
    pub current_input_flow: Flow,
    /// Delivered the tick before; the historical view for OUTPUT/PURCHASE.
    pub last_input_flow: Flow,
    /// Input per unit of the owning firm's production (zero for consumers).
    pub technology_coefficient: Ratio,
    pub parameters: StorageParameters,
    /// Incoming connections feeding this storage.
    pub connections: Vec<ConnectionId>,
    pub purchasing: PurchasingState,
}

impl Storage {
    pub fn new(
        sector: SectorId,
        id: StorageId,
        baseline_input_flow: Flow,
        fill_factor: Time,
        parameters: StorageParameters,
    ) -> Self {
        let baseline_content = (baseline_input_flow * fill_factor).round();
        Self {
            sector,
            id,
            baseline_input_flow,
            baseline_content,
            content: baseline_content,
            used_flow: baseline_input_flow,
            desired_used_flow: baseline_input_flow,
            current_input_flow: baseline_input_flow,
            last_input_flow: baseline_input_flow,
            technology_coefficient: 0.0,
            parameters,
            connections: Vec::new(),
            purchasing: PurchasingState::new(baseline_input_flow),
        }
    }

    /// The baseline used flow equals the baseline input in equilibrium.
    pub fn baseline_used_flow(&self) -> Flow {
        self.baseline_input_flow
    }

    /// CONSUMPTION_AND_PRODUCTION view: content plus this tick's input.
    pub fn possible_use(&self, delta_t: Time) -> Flow {
        self.content / delta_t + self.current_input_flow
    }

    /// OUTPUT/PURCHASE view: content plus the historical input.
    pub fn last_possible_use(&self, delta_t: Time) -> Flow {
        self.content / delta_t + self.last_input_flow
    }

    /// EXPECTATION view: content plus what has been delivered this tick.
    pub fn estimate_possible_use(&self, delta_t: Time, next_input_flow: Flow) -> Flow {
        self.content / delta_t + next_input_flow
    }

    pub fn use_content(&mut self, flow: Flow) {
        self.used_flow = flow;
    }

    pub fn set_desired_used_flow(&mut self, flow: Flow) {
        self.desired_used_flow = flow;
    }

    /// Content evolution plus the register shift, run once per tick inside
    /// the owner's CONSUMPTION_AND_PRODUCTION step.
    pub fn iterate_consumption_and_production(
        &mut self,
        model: &Model,
        agent_index: usize,
        forcing: Forcing,
    ) {
        self.calc_content(model, agent_index, forcing);
        self.last_input_flow = self.current_input_flow;
    }

    fn calc_content(&mut self, model: &Model, agent_index: usize, forcing: Forcing) {
        debug_assert!(
            self.used_flow.quantity() * model.delta_t().get()
                <= (self.content.quantity()
                    + self.current_input_flow.quantity() * model.delta_t().get())
                    + Quantity::new(Quantity::PRECISION)
        );
        let former_price = self.content.price();
        self.content =
            (self.content + (self.current_input_flow - self.used_flow) * model.delta_t()).round();

        let minimum = self.baseline_content.quantity() * model.parameters.min_storage;
        if self.content.quantity() <= minimum {
            model.events.record(
                model.timestep(),
                EventKind::StorageUnderrun,
                Some(agent_index),
                None,
                f64::NAN,
            );
            // an already-empty storage has no price of its own
            let clamp_price = if former_price.is_nan() {
                self.baseline_content.price()
            } else {
                former_price
            };
            self.content = Stock::new(minimum, clamp_price);
        }

        let maximum = self
            .baseline_content
            .scaled_by(forcing * model.sectors[self.sector.0].upper_storage_limit);
        if maximum.quantity() < self.content.quantity() {
            model.events.record(
                model.timestep(),
                EventKind::StorageOverrun,
                Some(agent_index),
                None,
                (self.content.quantity() - maximum.quantity()).get(),
            );
            let price = self.content.price();
            self.content = maximum;
            self.content.set_price(price);
        }
    }

    /// Sum of the incoming connections' transport flow deficits.
    pub fn flow_deficit(&self, model: &Model) -> Quantity {
        let total = self.connections.iter().fold(Quantity::new(0.0), |acc, c| {
            acc + model.conn_states[c.0].lock().unwrap().flow_deficit()
        });
        total.round()
    }

    /// Sum of the incoming connections' in-flight transport flows.
    pub fn transport_flow(&self, model: &Model) -> Flow {
        self.connections
            .iter()
            .fold(Flow::ZERO, |acc, c| {
                acc + model.conn_states[c.0].lock().unwrap().transport_flow()
            })
            .round()
    }
}
