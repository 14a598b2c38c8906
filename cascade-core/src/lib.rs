//! Economic shock propagation engine
//!
//! This crate simulates the short-term propagation of economic shocks
//! (production losses, transport disruptions) through a global network of
//! firms and consumers linked by directed trade flows with finite transport
//! delays.
//!
//! ## Agents
//!
//! A **Firm** produces one sector's good from its input storages and sells it
//! over business connections. Each tick it:
//!
//! - computes **possible production** from storage levels, capped by its
//!   forcing and overcapacity ratio
//! - serves the price-sorted incoming **demand requests** up to the point
//!   where marginal cost exceeds the offered price (the production extension)
//! - ships goods along **transport chains** with per-link delay queues
//!
//! A **Consumer** maximizes a nested CES utility over its consumption goods
//! under a budget constraint, or falls back to a per-good price-elasticity
//! rule.
//!
//! ## Buying
//!
//! Every input storage runs a **purchasing manager** that solves a small
//! constrained optimization each tick: how much to request from each
//! supplier, given the prices and penalties the suppliers communicated. The
//! objective couples expected unit prices with a transport penalty pulling
//! requests toward their baseline; the constraint pins total requests to the
//! desired purchase.
//!
//! ## Tick phases
//!
//! `SCENARIO → CONSUMPTION_AND_PRODUCTION → EXPECTATION → PURCHASE →
//! INVESTMENT → OUTPUT → CLEANUP → register flip`, each phase a parallel
//! pass with a global barrier; see [`run::ModelRun`].
//!
//! ## Module structure
//!
//! - `types`        Dimensioned quantity algebra (prices, quantities, flows)
//! - `autodiff`     Forward-mode dual scalar for the consumer objective
//! - `optimization` Constrained solver behind a minimal pluggable surface
//! - `parameters`   Frozen configuration bags
//! - `events`       Event kinds and the run-wide event bus
//! - `model`        Graph arenas, entities, managers, phase dispatch
//! - `builder`      Assembly, transport routing, cleanup sweep, freeze
//! - `run`          Phase scheduler and parallel dispatch
//! - `scenario`     Forcing driver interface
//! - `output`       Pull-based observables and the array output sink
//! - `snapshot`     Serializable state capture/restore

pub mod autodiff;
pub mod builder;
pub mod error;
pub mod events;
pub mod model;
pub mod optimization;
pub mod output;
pub mod parameters;
pub mod run;
pub mod scenario;
pub mod snapshot;
pub mod types;

// Re-export commonly used types at the crate root

pub use builder::{ModelBuilder, TransportNode, TransportNodeKind, TransportSpec, TransportTopology};
pub use error::ModelError;
pub use events::{EVENT_NAMES, EventKind, EventRecord};
pub use model::geo::TransportType;
pub use model::{
    AgentId, ConnectionId, FirmIndex, GeoConnectionId, IterationStep, LocationId, Model, RegionId,
    SectorId, StorageId,
};
pub use optimization::{Algorithm, Optimization, OptimizationResult, Problem};
pub use output::{ArrayOutput, ObservationScope, Output};
pub use parameters::{ModelParameters, OptimizerSettings, SectorParameters, StorageParameters};
pub use run::ModelRun;
pub use scenario::{BaselineScenario, FnScenario, Scenario};
pub use snapshot::ModelSnapshot;
pub use types::{Demand, Flow, FloatType, Forcing, Price, Quantity, Ratio, Stock, Time, Value};
