//! State snapshot: every mutable register of a model, serializable.
//!
//! Capturing at the end of a tick and restoring into a model built from the
//! same description yields a model whose next tick produces identical
//! observables. The frozen graph itself is not part of the snapshot — it is
//! reproducible from the builder inputs.

use serde::{Deserialize, Serialize};

use crate::model::Model;
use crate::model::agent::AgentState;
use crate::model::connection::ConnectionState;
use crate::model::government::Government;
use crate::model::region::RegionRegisters;
use crate::model::sales::SupplyParameters;
use crate::model::sector::SectorAggregates;
use crate::types::{Demand, Flow, Forcing, Time, TimeStep};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub timestep: TimeStep,
    pub time: Time,
    pub current_register: usize,
    pub agent_forcings: Vec<Forcing>,
    pub agent_states: Vec<AgentState>,
    pub supply_params: Vec<SupplyParameters>,
    pub sum_demand: Vec<Demand>,
    pub conn_states: Vec<ConnectionState>,
    pub inflows: Vec<Flow>,
    pub region_registers: Vec<RegionRegisters>,
    pub governments: Vec<Option<Government>>,
    pub sector_aggregates: Vec<SectorAggregates>,
}

impl ModelSnapshot {
    pub fn capture(model: &Model) -> Self {
        Self {
            timestep: model.timestep(),
            time: model.time(),
            current_register: model.current_register(),
            agent_forcings: model.agents.iter().map(|a| a.forcing).collect(),
            agent_states: model
                .agent_states
                .iter()
                .map(|s| s.lock().unwrap().clone())
                .collect(),
            supply_params: model
                .supply_channels
                .iter()
                .map(|c| c.params.read().unwrap().clone())
                .collect(),
            sum_demand: model
                .supply_channels
                .iter()
                .map(|c| *c.sum_demand.lock().unwrap())
                .collect(),
            conn_states: model
                .conn_states
                .iter()
                .map(|s| s.lock().unwrap().clone())
                .collect(),
            inflows: model.inflows.iter().map(|f| *f.lock().unwrap()).collect(),
            region_registers: model.regions.iter().map(|r| r.registers()).collect(),
            governments: model
                .regions
                .iter()
                .map(|r| r.government.lock().unwrap().clone())
                .collect(),
            sector_aggregates: model.sectors.iter().map(|s| s.aggregates()).collect(),
        }
    }

    /// Restores into a model with the same graph shape.
    pub fn restore(&self, model: &mut Model) {
        assert_eq!(self.agent_states.len(), model.agent_states.len());
        assert_eq!(self.conn_states.len(), model.conn_states.len());
        model.timestep = self.timestep;
        model.time = self.time;
        model.current_register = self.current_register;
        for (agent, &forcing) in model.agents.iter_mut().zip(&self.agent_forcings) {
            agent.forcing = forcing;
        }
        for (slot, state) in model.agent_states.iter().zip(&self.agent_states) {
            *slot.lock().unwrap() = state.clone();
        }
        for (channel, params) in model.supply_channels.iter().zip(&self.supply_params) {
            *channel.params.write().unwrap() = params.clone();
        }
        for (channel, demand) in model.supply_channels.iter().zip(&self.sum_demand) {
            *channel.sum_demand.lock().unwrap() = *demand;
        }
        for (slot, state) in model.conn_states.iter().zip(&self.conn_states) {
            *slot.lock().unwrap() = state.clone();
        }
        for (slot, flow) in model.inflows.iter().zip(&self.inflows) {
            *slot.lock().unwrap() = *flow;
        }
        for (region, registers) in model.regions.iter().zip(&self.region_registers) {
            region.restore_registers(registers.clone());
        }
        for (region, government) in model.regions.iter().zip(&self.governments) {
            *region.government.lock().unwrap() = government.clone();
        }
        for (sector, aggregates) in model.sectors.iter().zip(&self.sector_aggregates) {
            sector.restore_aggregates(aggregates.clone());
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
