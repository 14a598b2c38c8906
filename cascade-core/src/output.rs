//! Observability: pull-based sampling of named observables.
//!
//! Entities enumerate `(name, value)` pairs through `observe_*` functions;
//! an [`ArrayOutput`] resolves its selection once against the declared graph
//! order and pulls every OUTPUT step into time-major series. Observation
//! never mutates the model; the event bus is drained separately.

use std::collections::HashMap;

use crate::events::EventRecord;
use crate::model::agent::AgentState;
use crate::model::{Model, connection::ConnectionState, storage::Storage};
use crate::types::FloatType;

/// Receives the observables an entity enumerates.
pub trait ObservableCollector {
    fn set(&mut self, name: &'static str, value: FloatType);
}

impl ObservableCollector for Vec<(&'static str, FloatType)> {
    fn set(&mut self, name: &'static str, value: FloatType) {
        self.push((name, value));
    }
}

pub fn observe_agent<C: ObservableCollector>(
    model: &Model,
    index: usize,
    state: &AgentState,
    out: &mut C,
) {
    let agent = &model.agents[index];
    out.set("forcing", agent.forcing);
    match state {
        AgentState::Firm(firm) => {
            out.set("production_quantity", firm.production.quantity().get());
            out.set("production_value", firm.production.value().get());
            out.set(
                "desired_production_quantity",
                firm.capacity.desired_production.quantity().get(),
            );
            out.set(
                "total_production_costs",
                firm.sales.total_production_costs.get(),
            );
            out.set("total_revenue", firm.sales.total_revenue.get());
            out.set("tax", firm.sales.tax);
            let info = agent.firm_info().expect("agent must be a firm");
            let params = model.supply_channels[info.index.0].params.read().unwrap();
            out.set("offer_price", params.offer_price.get());
            out.set(
                "expected_production_quantity",
                params.expected_production.quantity().get(),
            );
            out.set(
                "possible_production_quantity",
                params.possible_production.quantity().get(),
            );
        }
        AgentState::Consumer(consumer) => {
            out.set("utility", consumer.utility);
            out.set("baseline_utility", consumer.baseline_utility);
            out.set("consumption_budget", consumer.consumption_budget.get());
            out.set("not_spent_budget", consumer.not_spent_budget.get());
        }
    }
}

pub fn observe_storage<C: ObservableCollector>(model: &Model, storage: &Storage, out: &mut C) {
    out.set("content", storage.content.quantity().get());
    out.set("content_value", storage.content.value().get());
    out.set("input_flow", storage.current_input_flow.quantity().get());
    out.set("used_flow", storage.used_flow.quantity().get());
    out.set(
        "desired_used_flow",
        storage.desired_used_flow.quantity().get(),
    );
    out.set(
        "last_possible_use",
        storage.last_possible_use(model.delta_t()).quantity().get(),
    );
    out.set("purchase", storage.purchasing.purchase.quantity().get());
    out.set(
        "desired_purchase",
        storage.purchasing.desired_purchase.get(),
    );
    out.set("expected_costs", storage.purchasing.expected_costs.get());
    out.set(
        "total_transport_penalty",
        storage.purchasing.total_transport_penalty.get(),
    );
}

pub fn observe_connection<C: ObservableCollector>(state: &ConnectionState, out: &mut C) {
    out.set("last_shipment", state.last_shipment.quantity().get());
    out.set("last_delivery", state.last_delivery.current.quantity().get());
    out.set(
        "last_demand_request",
        state.last_demand_request.quantity().get(),
    );
    out.set(
        "last_demand_request_price",
        state.last_demand_request.price().get(),
    );
    out.set("baseline_flow", state.baseline_flow.quantity().get());
    out.set("total_flow", state.total_flow().quantity().get());
    out.set("transport_flow", state.transport_flow().quantity().get());
    out.set("flow_deficit", state.flow_deficit().get());
    out.set("flow_mean", state.flow_mean().quantity().get());
    out.set("transport_delay", state.transport_delay() as FloatType);
    out.set("minimum_passage", state.minimum_passage());
    out.set("disequilibrium", state.disequilibrium().get());
    out.set("stddeviation", state.stddeviation());
}

pub fn observe_region<C: ObservableCollector>(model: &Model, index: usize, out: &mut C) {
    let region = &model.regions[index];
    let register = model.current_register();
    out.set("gdp", region.gdp(register).quantity().get());
    out.set("import_flow", region.import_flow(register).quantity().get());
    out.set("export_flow", region.export_flow(register).quantity().get());
    out.set("consumption", region.consumption(register).quantity().get());
}

pub fn observe_sector<C: ObservableCollector>(model: &Model, index: usize, out: &mut C) {
    let aggregates = model.sectors[index].aggregates();
    out.set(
        "total_production",
        aggregates.total_production.quantity().get(),
    );
    out.set("total_demand", aggregates.total_demand.quantity().get());
    out.set(
        "last_total_production",
        aggregates.last_total_production.quantity().get(),
    );
}

/// An output sink, pulled once per OUTPUT step.
pub trait Output {
    fn sample(&mut self, model: &Model);
}

/// Observation scopes an [`ArrayOutput`] can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationScope {
    Agents,
    Sectors,
    Regions,
    Storages,
    Flows,
}

/// In-memory time-major arrays of all observables within the selected
/// scopes, with an optional entity-name allowlist. This is the canonical
/// binary output format's collection layer; file writers live outside the
/// core and consume the series.
pub struct ArrayOutput {
    scopes: Vec<ObservationScope>,
    allowlist: Option<Vec<String>>,
    pub timesteps: Vec<u64>,
    /// (entity, observable) → per-tick samples, in declared graph order.
    pub series: HashMap<(String, &'static str), Vec<FloatType>>,
    pub events: Vec<EventRecord>,
}

impl ArrayOutput {
    pub fn new(scopes: Vec<ObservationScope>) -> Self {
        Self {
            scopes,
            allowlist: None,
            timesteps: Vec::new(),
            series: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Restrict sampling to the named entities.
    pub fn with_allowlist(mut self, names: Vec<String>) -> Self {
        self.allowlist = Some(names);
        self
    }

    fn allowed(&self, name: &str) -> bool {
        match &self.allowlist {
            Some(list) => list.iter().any(|n| n == name),
            None => true,
        }
    }

    fn record(&mut self, entity: String, observables: Vec<(&'static str, FloatType)>) {
        let tick = self.timesteps.len();
        for (name, value) in observables {
            let series = self
                .series
                .entry((entity.clone(), name))
                .or_insert_with(|| vec![FloatType::NAN; tick]);
            series.push(value);
        }
    }

    pub fn series_for(&self, entity: &str, observable: &str) -> Option<&[FloatType]> {
        self.series
            .iter()
            .find(|((e, o), _)| e == entity && *o == observable)
            .map(|(_, v)| v.as_slice())
    }
}

impl Output for ArrayOutput {
    fn sample(&mut self, model: &Model) {
        for scope in self.scopes.clone() {
            match scope {
                ObservationScope::Agents => {
                    for (i, agent) in model.agents.iter().enumerate() {
                        if !self.allowed(&agent.name) {
                            continue;
                        }
                        let state = model.agent_states[i].lock().unwrap();
                        let mut observables = Vec::new();
                        observe_agent(model, i, &state, &mut observables);
                        self.record(agent.name.clone(), observables);
                    }
                }
                ObservationScope::Sectors => {
                    for (i, sector) in model.sectors.iter().enumerate() {
                        if !self.allowed(&sector.name) {
                            continue;
                        }
                        let mut observables = Vec::new();
                        observe_sector(model, i, &mut observables);
                        self.record(sector.name.clone(), observables);
                    }
                }
                ObservationScope::Regions => {
                    for (i, region) in model.regions.iter().enumerate() {
                        if !self.allowed(&region.name) {
                            continue;
                        }
                        let mut observables = Vec::new();
                        observe_region(model, i, &mut observables);
                        self.record(region.name.clone(), observables);
                    }
                }
                ObservationScope::Storages => {
                    for (i, agent) in model.agents.iter().enumerate() {
                        let state = model.agent_states[i].lock().unwrap();
                        for storage in state.storages() {
                            let name = format!(
                                "{}->{}",
                                model.sectors[storage.sector.0].name, agent.name
                            );
                            if !self.allowed(&name) {
                                continue;
                            }
                            let mut observables = Vec::new();
                            observe_storage(model, storage, &mut observables);
                            self.record(name, observables);
                        }
                    }
                }
                ObservationScope::Flows => {
                    for connection in &model.connections {
                        let name = format!(
                            "{}->{}",
                            model.agents[connection.seller.0].name,
                            model.agents[connection.buyer.0].name
                        );
                        if !self.allowed(&name) {
                            continue;
                        }
                        let state = model.conn_states[connection.id.0].lock().unwrap();
                        let mut observables = Vec::new();
                        observe_connection(&state, &mut observables);
                        self.record(name, observables);
                    }
                }
            }
        }
        self.timesteps.push(model.timestep());
        self.events.extend(model.events.drain());
    }
}
