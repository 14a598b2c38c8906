//! Governments: per-region tax authority.
//!
//! Tax rates are defined by the scenario, imposed on the region's firms in
//! EXPECTATION, and the collected revenue accumulates in the budget.

use serde::{Deserialize, Serialize};

use super::{AgentId, Model};
use crate::types::{Ratio, Time, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Government {
    pub budget: Value,
    /// Tax ratio per firm, set via `define_tax`.
    pub tax_rates: Vec<(AgentId, Ratio)>,
}

impl Government {
    pub fn new() -> Self {
        Self::default()
    }

    /// SCENARIO phase: register a tax ratio for all firms of `sector_name`
    /// within the region's jurisdiction.
    pub fn define_tax(
        &mut self,
        model: &Model,
        region_agents: &[AgentId],
        sector_name: &str,
        tax_ratio: Ratio,
    ) {
        for &agent_id in region_agents {
            let agent = &model.agents[agent_id.0];
            if let Some(firm) = agent.firm_info()
                && model.sectors[firm.sector.0].name == sector_name
            {
                match self.tax_rates.iter_mut().find(|(id, _)| *id == agent_id) {
                    Some(entry) => entry.1 = tax_ratio,
                    None => self.tax_rates.push((agent_id, tax_ratio)),
                }
            }
        }
    }

    /// EXPECTATION phase: collect tax on last tick's production value and
    /// impose the registered rates on the firms' sales managers.
    pub fn iterate_expectation(&mut self, model: &Model, delta_t: Time) {
        for &(agent_id, ratio) in &self.tax_rates {
            let mut state = model.agent_states[agent_id.0].lock().unwrap();
            if let Some(firm) = state.as_firm_mut() {
                self.budget += (firm.production.value() * ratio) * delta_t.get();
                firm.sales.tax = ratio;
            }
        }
    }
}
