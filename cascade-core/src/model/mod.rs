//! The model graph: frozen arenas, lock-guarded cross-agent registers, and
//! the per-phase dispatch.
//!
//! Ownership is index-based: every entity kind lives in its own arena on
//! [`Model`] and cross-references are typed indices. State that more than one
//! agent touches within a phase sits in dedicated lock arenas (connection
//! states, storage inflow registers, per-firm supply channels); each agent's
//! own state is behind its per-agent mutex, locked only by the thread running
//! that agent's step. Writers and readers of any register are phase-disjoint,
//! which the debug-only step assertions check.

pub mod agent;
pub mod capacity;
pub mod connection;
pub mod consumer;
pub mod firm;
pub mod geo;
pub mod government;
pub mod purchasing;
pub mod region;
pub mod sales;
pub mod sector;
pub mod storage;
pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::events::EventBus;
use crate::parameters::ModelParameters;
use crate::types::{Demand, Flow, Forcing, Time, TimeStep};
use agent::{AgentState, EconomicAgent};
use connection::{BusinessConnection, ConnectionState};
use geo::{GeoConnection, GeoEntityRef, GeoLocation};
use region::Region;
use sales::SupplyParameters;
use sector::Sector;

macro_rules! arena_index {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub usize);
    };
}

arena_index!(SectorId);
arena_index!(RegionId);
arena_index!(AgentId);
arena_index!(StorageId);
arena_index!(ConnectionId);
arena_index!(FirmIndex);
arena_index!(LocationId);
arena_index!(GeoConnectionId);

/// The fixed phase order of one simulated time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IterationStep {
    Initialization = 0,
    Scenario,
    ConsumptionAndProduction,
    Expectation,
    Purchase,
    Investment,
    Output,
    Cleanup,
}

impl IterationStep {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Initialization,
            1 => Self::Scenario,
            2 => Self::ConsumptionAndProduction,
            3 => Self::Expectation,
            4 => Self::Purchase,
            5 => Self::Investment,
            6 => Self::Output,
            _ => Self::Cleanup,
        }
    }
}

/// Per-firm channel between the sales manager and its buyers: communicated
/// supply parameters (written by the seller's phase, read during PURCHASE)
/// and the demand accumulator (written during PURCHASE, read by the seller).
#[derive(Debug)]
pub struct SupplyChannel {
    pub params: RwLock<SupplyParameters>,
    pub sum_demand: Mutex<Demand>,
}

impl SupplyChannel {
    pub fn new(params: SupplyParameters, sum_demand: Demand) -> Self {
        Self {
            params: RwLock::new(params),
            sum_demand: Mutex::new(sum_demand),
        }
    }
}

pub struct Model {
    pub parameters: ModelParameters,
    pub sectors: Vec<Sector>,
    pub regions: Vec<Region>,
    pub locations: Vec<GeoLocation>,
    pub geo_connections: Vec<GeoConnection>,
    pub agents: Vec<EconomicAgent>,
    pub agent_states: Vec<Mutex<AgentState>>,
    pub supply_channels: Vec<SupplyChannel>,
    pub connections: Vec<BusinessConnection>,
    pub conn_states: Vec<Mutex<ConnectionState>>,
    /// Per-storage accumulation register for this tick's deliveries.
    pub inflows: Vec<Mutex<Flow>>,
    /// Geo entity → the chain links that traverse it.
    pub geo_link_index: HashMap<GeoEntityRef, Vec<(ConnectionId, usize)>>,
    pub events: EventBus,
    pub(crate) time: Time,
    pub(crate) timestep: TimeStep,
    pub(crate) delta_t: Time,
    pub(crate) current_register: usize,
    step: AtomicU8,
    fatal: Mutex<Option<String>>,
}

impl Model {
    /// Empty model shell; the builder fills the arenas before freezing.
    pub(crate) fn empty(parameters: ModelParameters, delta_t: Time) -> Self {
        Self {
            parameters,
            sectors: Vec::new(),
            regions: Vec::new(),
            locations: Vec::new(),
            geo_connections: Vec::new(),
            agents: Vec::new(),
            agent_states: Vec::new(),
            supply_channels: Vec::new(),
            connections: Vec::new(),
            conn_states: Vec::new(),
            inflows: Vec::new(),
            geo_link_index: HashMap::new(),
            events: EventBus::new(),
            time: Time::new(0.0),
            timestep: 0,
            delta_t,
            current_register: 1,
            step: AtomicU8::new(IterationStep::Initialization as u8),
            fatal: Mutex::new(None),
        }
    }

    pub fn delta_t(&self) -> Time {
        self.delta_t
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn timestep(&self) -> TimeStep {
        self.timestep
    }

    pub fn is_first_timestep(&self) -> bool {
        self.timestep == 0
    }

    pub fn current_register(&self) -> usize {
        self.current_register
    }

    pub fn other_register(&self) -> usize {
        1 - self.current_register
    }

    pub fn step(&self) -> IterationStep {
        IterationStep::from_u8(self.step.load(Ordering::Acquire))
    }

    /// Published by the scheduler before launching a phase's parallel work.
    pub fn set_step(&self, step: IterationStep) {
        self.step.store(step as u8, Ordering::Release);
    }

    /// Debug-only check that a mutator runs in its legal phase.
    #[inline]
    pub fn assert_step(&self, expected: IterationStep) {
        #[cfg(debug_assertions)]
        {
            let current = self.step();
            assert!(
                current == expected,
                "should be in {expected:?} step, but model is in {current:?}"
            );
        }
        #[cfg(not(debug_assertions))]
        let _ = expected;
    }

    #[inline]
    pub fn assert_step_not(&self, forbidden: IterationStep) {
        #[cfg(debug_assertions)]
        {
            let current = self.step();
            assert!(
                current != forbidden,
                "should NOT be in {forbidden:?} step"
            );
        }
        #[cfg(not(debug_assertions))]
        let _ = forbidden;
    }

    /// SCENARIO: advance the clock (not the register).
    pub fn tick(&mut self) {
        self.assert_step(IterationStep::Scenario);
        self.time += self.delta_t;
        self.timestep += 1;
    }

    /// Tick boundary: hand the accumulated inflow registers over to the
    /// storages' read registers and flip the register index.
    pub fn switch_registers(&mut self) {
        self.assert_step(IterationStep::Scenario);
        for state in self.agent_states.iter_mut() {
            let state = state.get_mut().unwrap();
            for storage in state.storages_mut() {
                let delivered = std::mem::take(&mut *self.inflows[storage.id.0].lock().unwrap());
                storage.current_input_flow = delivered;
            }
        }
        self.current_register = 1 - self.current_register;
    }

    // --- scenario surface ---------------------------------------------------

    pub fn set_agent_forcing(&mut self, agent: AgentId, forcing: Forcing) {
        self.assert_step(IterationStep::Scenario);
        debug_assert!(forcing >= 0.0);
        self.agents[agent.0].forcing = forcing;
    }

    /// Passage forcing on a geography entity: pushed onto every transport
    /// chain link traversing it. -1 means uncapped.
    pub fn set_geo_forcing(&mut self, entity: GeoEntityRef, forcing: Forcing) {
        self.assert_step(IterationStep::Scenario);
        if let Some(links) = self.geo_link_index.get(&entity) {
            for &(connection, link_index) in links {
                self.conn_states[connection.0].lock().unwrap().links[link_index].forcing = forcing;
            }
        }
    }

    pub fn define_tax(&mut self, region: RegionId, sector_name: &str, tax_ratio: f64) {
        self.assert_step(IterationStep::Scenario);
        let region = &self.regions[region.0];
        let mut government = region.government.lock().unwrap();
        if let Some(government) = government.as_mut() {
            // split borrow: the closure below only reads arenas
            government.define_tax(self, &region.agents, sector_name, tax_ratio);
        }
    }

    // --- fatal error channel ------------------------------------------------

    pub fn report_fatal(&self, message: String) {
        let mut fatal = self.fatal.lock().unwrap();
        if fatal.is_none() {
            *fatal = Some(message);
        }
    }

    pub fn take_fatal(&self) -> Option<String> {
        self.fatal.lock().unwrap().take()
    }

    // --- per-item phase dispatch (driven by the run scheduler) --------------

    pub fn sector_phase(&self, index: usize, step: IterationStep) {
        if step == IterationStep::ConsumptionAndProduction {
            self.sectors[index].iterate_consumption_and_production();
        }
    }

    pub fn region_phase(&self, index: usize, step: IterationStep) {
        let region = &self.regions[index];
        match step {
            IterationStep::ConsumptionAndProduction => {
                region.iterate_consumption_and_production(self.other_register());
            }
            IterationStep::Expectation => {
                let mut government = region.government.lock().unwrap();
                if let Some(government) = government.as_mut() {
                    government.iterate_expectation(self, self.delta_t);
                }
            }
            _ => {}
        }
    }

    pub fn agent_phase(&self, index: usize, step: IterationStep) {
        let mut state = self.agent_states[index].lock().unwrap();
        match &mut *state {
            AgentState::Firm(firm_state) => match step {
                IterationStep::ConsumptionAndProduction => {
                    firm::iterate_consumption_and_production(self, index, firm_state);
                }
                IterationStep::Expectation => {
                    firm::iterate_expectation(self, index, firm_state);
                }
                IterationStep::Purchase => {
                    firm::iterate_purchase(self, index, firm_state);
                }
                IterationStep::Investment => {
                    firm::iterate_investment(self, firm_state);
                }
                _ => {}
            },
            AgentState::Consumer(consumer_state) => match step {
                IterationStep::ConsumptionAndProduction => {
                    let agent = &self.agents[index];
                    let info = agent.consumer_info().expect("agent must be a consumer");
                    consumer::iterate_consumption_and_production(
                        self,
                        index,
                        info,
                        agent.forcing,
                        consumer_state,
                    );
                }
                IterationStep::Purchase => {
                    consumer::iterate_purchase(self, index, consumer_state);
                }
                IterationStep::Investment => {
                    consumer::iterate_investment(self, consumer_state);
                }
                _ => {}
            },
        }
    }

    /// PURCHASE schedule granularity: a single storage's purchasing program.
    pub fn storage_purchase(&self, agent_index: usize, slot: usize) {
        let mut state = self.agent_states[agent_index].lock().unwrap();
        let storage = &mut state.storages_mut()[slot];
        purchasing::iterate_purchase(self, agent_index, storage);
    }

    /// The flattened (agent, storage slot) schedule for PURCHASE.
    pub fn storage_schedule(&self) -> Vec<(usize, usize)> {
        let mut schedule = Vec::new();
        for (i, state) in self.agent_states.iter().enumerate() {
            let state = state.lock().unwrap();
            for slot in 0..state.storages().len() {
                schedule.push((i, slot));
            }
        }
        schedule
    }
}
