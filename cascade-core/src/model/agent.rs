//! Economic agents: the frozen graph half.
//!
//! An agent's topology (region membership, sector, connection lists, baseline
//! magnitudes, consumer basket structure) never changes after initialization;
//! only `forcing` is written, and only by the sequential SCENARIO phase. The
//! mutable per-tick half lives in [`super::firm::FirmState`] /
//! [`super::consumer::ConsumerState`] behind the model's per-agent lock.

use serde::{Deserialize, Serialize};

use super::consumer::ConsumerState;
use super::firm::FirmState;
use super::storage::Storage;
use super::{ConnectionId, FirmIndex, RegionId, SectorId};
use crate::types::{Flow, Forcing, Quantity, Ratio};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicAgent {
    pub name: String,
    pub region: RegionId,
    /// Productive capacity multiplier, SCENARIO-writable, 1.0 = nominal.
    pub forcing: Forcing,
    pub kind: AgentKindInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentKindInfo {
    Firm(FirmInfo),
    Consumer(ConsumerInfo),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmInfo {
    pub sector: SectorId,
    /// Index into the model's per-firm supply channel arena.
    pub index: FirmIndex,
    /// Position of the owning agent in the agent arena.
    pub agent_index: usize,
    pub baseline_production: Flow,
    pub baseline_use: Flow,
    pub sales_connections: Vec<ConnectionId>,
    pub self_supply: Option<ConnectionId>,
}

impl FirmInfo {
    /// λ·X*: the forcing-scaled baseline production quantity.
    pub fn forced_baseline_production_quantity(&self, forcing: Forcing) -> Quantity {
        (self.baseline_production.quantity() * forcing).round()
    }

    pub fn forced_baseline_production(&self, forcing: Forcing) -> Flow {
        self.baseline_production.scaled_by(forcing).round()
    }

    /// λ·β·X*: the hard cap on production under forcing.
    pub fn forced_maximal_production_quantity(&self, forcing: Forcing, beta: Ratio) -> Quantity {
        (self.baseline_production.quantity() * (beta * forcing)).round()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerBasket {
    pub sectors: Vec<SectorId>,
    pub intra_basket_substitution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub baskets: Vec<ConsumerBasket>,
    pub inter_basket_substitution: f64,
    /// Whether consumption solves the utility program or the elasticity
    /// fallback rule.
    pub utilitarian: bool,
}

impl EconomicAgent {
    pub fn firm_info(&self) -> Option<&FirmInfo> {
        match &self.kind {
            AgentKindInfo::Firm(info) => Some(info),
            AgentKindInfo::Consumer(_) => None,
        }
    }

    pub fn consumer_info(&self) -> Option<&ConsumerInfo> {
        match &self.kind {
            AgentKindInfo::Consumer(info) => Some(info),
            AgentKindInfo::Firm(_) => None,
        }
    }

    pub fn is_firm(&self) -> bool {
        matches!(self.kind, AgentKindInfo::Firm(_))
    }
}

/// The mutable per-agent half, owned by the agent's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentState {
    Firm(FirmState),
    Consumer(ConsumerState),
}

impl AgentState {
    pub fn storages(&self) -> &[Storage] {
        match self {
            AgentState::Firm(f) => &f.storages,
            AgentState::Consumer(c) => &c.storages,
        }
    }

    pub fn storages_mut(&mut self) -> &mut [Storage] {
        match self {
            AgentState::Firm(f) => &mut f.storages,
            AgentState::Consumer(c) => &mut c.storages,
        }
    }

    pub fn as_firm(&self) -> Option<&FirmState> {
        match self {
            AgentState::Firm(f) => Some(f),
            AgentState::Consumer(_) => None,
        }
    }

    pub fn as_firm_mut(&mut self) -> Option<&mut FirmState> {
        match self {
            AgentState::Firm(f) => Some(f),
            AgentState::Consumer(_) => None,
        }
    }

    pub fn as_consumer(&self) -> Option<&ConsumerState> {
        match self {
            AgentState::Consumer(c) => Some(c),
            AgentState::Firm(_) => None,
        }
    }

    pub fn as_consumer_mut(&mut self) -> Option<&mut ConsumerState> {
        match self {
            AgentState::Consumer(c) => Some(c),
            AgentState::Firm(_) => None,
        }
    }
}
