//! Regions: double-buffered trade registers, routing table, government.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::geo::{GeoPoint, GeoRoute, TransportType};
use super::government::Government;
use super::{AgentId, RegionId};
use crate::types::Flow;

/// The three lock-guarded registers, double-buffered: the phase writes into
/// `current`, readers elsewhere see `current` as well — the split is between
/// phases, the flip happens at end of tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionRegisters {
    pub export_flow: [Flow; 2],
    pub import_flow: [Flow; 2],
    pub consumption_flow: [Flow; 2],
}

#[derive(Debug)]
pub struct Region {
    pub name: String,
    pub centroid: Option<GeoPoint>,
    pub agents: Vec<AgentId>,
    /// (destination region, transport type) → precomputed path.
    pub routes: HashMap<(RegionId, TransportType), GeoRoute>,
    registers: Mutex<RegionRegisters>,
    pub government: Mutex<Option<Government>>,
}

impl Region {
    pub fn new(name: String, centroid: Option<GeoPoint>) -> Self {
        Self {
            name,
            centroid,
            agents: Vec::new(),
            routes: HashMap::new(),
            registers: Mutex::new(RegionRegisters::default()),
            government: Mutex::new(None),
        }
    }

    pub fn add_export(&self, register: usize, flow: Flow) {
        self.registers.lock().unwrap().export_flow[register] += flow;
    }

    pub fn add_import(&self, register: usize, flow: Flow) {
        self.registers.lock().unwrap().import_flow[register] += flow;
    }

    pub fn add_consumption(&self, register: usize, flow: Flow) {
        self.registers.lock().unwrap().consumption_flow[register] += flow;
    }

    /// Zeroes the other register at the start of the phase; writers of this
    /// tick accumulate into `current`.
    pub fn iterate_consumption_and_production(&self, other_register: usize) {
        let mut regs = self.registers.lock().unwrap();
        regs.export_flow[other_register] = Flow::ZERO;
        regs.import_flow[other_register] = Flow::ZERO;
        regs.consumption_flow[other_register] = Flow::ZERO;
    }

    /// C + X − M on the current registers.
    pub fn gdp(&self, register: usize) -> Flow {
        let regs = self.registers.lock().unwrap();
        regs.consumption_flow[register] + regs.export_flow[register] - regs.import_flow[register]
    }

    pub fn export_flow(&self, register: usize) -> Flow {
        self.registers.lock().unwrap().export_flow[register]
    }

    pub fn import_flow(&self, register: usize) -> Flow {
        self.registers.lock().unwrap().import_flow[register]
    }

    pub fn consumption(&self, register: usize) -> Flow {
        self.registers.lock().unwrap().consumption_flow[register]
    }

    pub fn registers(&self) -> RegionRegisters {
        self.registers.lock().unwrap().clone()
    }

    pub fn restore_registers(&self, registers: RegionRegisters) {
        *self.registers.lock().unwrap() = registers;
    }

    pub fn find_route(&self, to: RegionId, transport_type: TransportType) -> Option<&GeoRoute> {
        self.routes.get(&(to, transport_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Price, Quantity};

    fn flow(q: f64) -> Flow {
        Flow::new(Quantity::new(q), Price::new(1.0))
    }

    #[test]
    fn gdp_is_consumption_plus_net_exports() {
        let r = Region::new("R1".into(), None);
        r.add_consumption(0, flow(5.0));
        r.add_export(0, flow(2.0));
        r.add_import(0, flow(3.0));
        assert!((r.gdp(0).quantity().get() - 4.0).abs() < 1e-12);
        // The other register is untouched.
        assert_eq!(r.gdp(1).quantity().get(), 0.0);
    }

    #[test]
    fn phase_reset_clears_only_other_register() {
        let r = Region::new("R1".into(), None);
        r.add_export(0, flow(2.0));
        r.add_export(1, flow(7.0));
        r.iterate_consumption_and_production(1);
        assert_eq!(r.export_flow(0).quantity().get(), 2.0);
        assert_eq!(r.export_flow(1).quantity().get(), 0.0);
    }
}
