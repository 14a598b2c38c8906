//! Business connections: the buyer↔seller edges of the trade graph.
//!
//! The immutable endpoints live in [`BusinessConnection`]; everything a tick
//! mutates — transport chain, last shipment/delivery/demand, the investable
//! baseline flow — sits in [`ConnectionState`] behind the model's per-edge
//! lock. Within a phase each edge has exactly one writer: the seller in
//! CONSUMPTION_AND_PRODUCTION, the buyer in PURCHASE and INVESTMENT.

use serde::{Deserialize, Serialize};

use super::transport::TransportChainLink;
use super::{AgentId, ConnectionId, FirmIndex, Model, StorageId};
use crate::types::{AnnotatedFlow, Demand, Flow, FloatType, Quantity, Time, TransportDelay};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessConnection {
    pub id: ConnectionId,
    pub seller: AgentId,
    pub seller_firm: FirmIndex,
    pub buyer: AgentId,
    /// Position of the target storage in the buyer's storage list.
    pub buyer_storage_slot: usize,
    /// Global storage index (inflow register).
    pub buyer_storage: StorageId,
    pub domestic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub baseline_flow: Flow,
    pub last_shipment: Flow,
    pub last_delivery: AnnotatedFlow,
    pub last_demand_request: Demand,
    pub links: Vec<TransportChainLink>,
}

impl ConnectionState {
    pub fn new(baseline_flow: Flow, links: Vec<TransportChainLink>) -> Self {
        Self {
            baseline_flow,
            last_shipment: baseline_flow,
            last_delivery: AnnotatedFlow::new(baseline_flow, baseline_flow.quantity()),
            last_demand_request: baseline_flow,
            links,
        }
    }

    /// Min over links of the non-negative link forcings, clamped to [0, 1].
    pub fn minimum_passage(&self) -> FloatType {
        let mut minimum: FloatType = 1.0;
        for link in &self.links {
            if link.forcing >= 0.0 && link.forcing < minimum {
                minimum = link.forcing;
            }
        }
        minimum.clamp(0.0, 1.0)
    }

    pub fn transport_delay(&self) -> TransportDelay {
        self.links.iter().map(|l| l.transport_delay()).sum()
    }

    /// In-flight goods only.
    pub fn transport_flow(&self) -> Flow {
        self.links
            .iter()
            .fold(Flow::ZERO, |acc, l| acc + l.total_flow())
            .round()
    }

    /// In-flight goods plus the last delivery.
    pub fn total_flow(&self) -> Flow {
        (self.transport_flow() + self.last_delivery.current).round()
    }

    pub fn flow_mean(&self) -> Flow {
        let delay = self.transport_delay();
        let total = self
            .links
            .iter()
            .fold(self.last_delivery.current, |acc, l| acc + l.total_flow());
        if delay == 0 {
            total.round()
        } else {
            total.scaled_by(1.0 / delay as FloatType).round()
        }
    }

    pub fn flow_deficit(&self) -> Quantity {
        let deficit = self
            .links
            .iter()
            .fold(self.last_delivery.deficit(), |acc, l| acc + l.flow_deficit());
        deficit.round()
    }

    pub fn disequilibrium(&self) -> Quantity {
        self.links
            .iter()
            .fold(Quantity::new(0.0), |acc, l| acc + l.disequilibrium())
    }

    pub fn stddeviation(&self) -> FloatType {
        self.links.iter().map(|l| l.stddeviation()).sum()
    }

    /// INVESTMENT phase: relax the baseline flow toward the last shipment.
    pub fn iterate_investment(&mut self, delta_t: Time, adjustment_time: Time) {
        let rate = delta_t.get() / adjustment_time.get();
        self.baseline_flow += (self.last_shipment - self.baseline_flow).scaled_by(rate);
    }
}

/// CONSUMPTION_AND_PRODUCTION: the seller ships `flow`. The chain advances
/// link by link; the terminal outflow lands in the buyer storage's inflow
/// register, and cross-region edges book export/import on their regions.
pub fn push_flow(model: &Model, connection: &BusinessConnection, flow: Flow) {
    model.assert_step(super::IterationStep::ConsumptionAndProduction);
    let register = model.current_register();
    let mut state = model.conn_states[connection.id.0].lock().unwrap();
    let state = &mut *state;
    state.last_shipment = flow.round();

    let mut current = state.last_shipment;
    let mut baseline = state.baseline_flow.quantity();
    for link in &mut state.links {
        let (outflow, front_baseline) = link.push(current, baseline);
        current = outflow;
        baseline = front_baseline;
    }
    let delivered = AnnotatedFlow::new(current, baseline);
    state.last_delivery = delivered;
    *model.inflows[connection.buyer_storage.0].lock().unwrap() += delivered.current;

    if !connection.domestic {
        let seller_region = &model.regions[model.agents[connection.seller.0].region.0];
        seller_region.add_export(register, state.last_shipment);
        let buyer_region = &model.regions[model.agents[connection.buyer.0].region.0];
        buyer_region.add_import(register, delivered.current);
    }
}

/// PURCHASE: the buyer communicates its demand request to the seller.
pub fn send_demand_request(model: &Model, connection: &BusinessConnection, demand: Demand) {
    model.assert_step(super::IterationStep::Purchase);
    let rounded = demand.round();
    model.conn_states[connection.id.0]
        .lock()
        .unwrap()
        .last_demand_request = rounded;
    let channel = &model.supply_channels[connection.seller_firm.0];
    *channel.sum_demand.lock().unwrap() += rounded;
    let seller = &model.agents[connection.seller.0];
    if let Some(firm) = seller.firm_info() {
        model.sectors[firm.sector.0].add_demand_request(rounded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Price;

    fn flow(q: f64) -> Flow {
        Flow::new(Quantity::new(q), Price::new(1.0))
    }

    fn state_with_delays(delays: &[TransportDelay]) -> ConnectionState {
        let links = delays
            .iter()
            .map(|&d| TransportChainLink::new(d, flow(1.0), None))
            .collect();
        ConnectionState::new(flow(1.0), links)
    }

    #[test]
    fn transport_delay_sums_over_links() {
        let state = state_with_delays(&[2, 3, 0]);
        assert_eq!(state.transport_delay(), 5);
    }

    #[test]
    fn minimum_passage_ignores_uncapped_links() {
        let mut state = state_with_delays(&[1, 1, 1]);
        assert_eq!(state.minimum_passage(), 1.0);
        state.links[1].forcing = 0.3;
        state.links[2].forcing = 0.8;
        assert_eq!(state.minimum_passage(), 0.3);
    }

    #[test]
    fn total_flow_counts_queue_and_delivery() {
        let state = state_with_delays(&[2]);
        // Queue holds 2 baseline cells, last delivery is baseline.
        assert!((state.total_flow().quantity().get() - 3.0).abs() < 1e-9);
        assert!((state.transport_flow().quantity().get() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn investment_relaxes_baseline_toward_shipment() {
        let mut state = state_with_delays(&[1]);
        state.last_shipment = flow(0.5);
        let dt = Time::new(1.0);
        let adjustment = Time::new(10.0);
        for _ in 0..200 {
            state.iterate_investment(dt, adjustment);
        }
        assert!((state.baseline_flow.quantity().get() - 0.5).abs() < 1e-6);
    }
}
