//! The run loop: phase scheduling, parallel dispatch, output sampling.
//!
//! Each phase publishes its [`IterationStep`] and then drives a rayon pass
//! over the relevant pool; a phase is a global barrier. The two hot pools
//! (agents and purchasing storages) are permutation-scheduled: per-item
//! wall-clock cost is measured every pass and the iteration order re-sorted
//! descending, so the long-running optimizations are dispatched first.

use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::error::ModelError;
use crate::model::{IterationStep, Model};
use crate::output::Output;
use crate::scenario::Scenario;
use crate::types::TimeStep;

pub struct ModelRun {
    model: Model,
    scenario: Box<dyn Scenario>,
    outputs: Vec<Box<dyn Output>>,
    agent_pool: Vec<(usize, u64)>,
    storage_pool: Vec<((usize, usize), u64)>,
    duration: std::time::Duration,
}

impl ModelRun {
    pub fn new(model: Model, scenario: Box<dyn Scenario>) -> Self {
        // Start from a shuffled order so initial cost imbalance spreads out.
        let mut rng = StdRng::seed_from_u64(model.parameters.seed);
        let mut agent_pool: Vec<(usize, u64)> =
            (0..model.agents.len()).map(|i| (i, 0)).collect();
        agent_pool.shuffle(&mut rng);
        let mut storage_pool: Vec<((usize, usize), u64)> = model
            .storage_schedule()
            .into_iter()
            .map(|item| (item, 0))
            .collect();
        storage_pool.shuffle(&mut rng);
        Self {
            model,
            scenario,
            outputs: Vec::new(),
            agent_pool,
            storage_pool,
            duration: std::time::Duration::ZERO,
        }
    }

    pub fn add_output(&mut self, output: Box<dyn Output>) {
        self.outputs.push(output);
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn outputs(&self) -> &[Box<dyn Output>] {
        &self.outputs
    }

    pub fn duration(&self) -> std::time::Duration {
        self.duration
    }

    pub fn timestep(&self) -> TimeStep {
        self.model.timestep()
    }

    /// Runs `timesteps` ticks.
    pub fn run(&mut self, timesteps: usize) -> Result<(), ModelError> {
        let started = Instant::now();
        for _ in 0..timesteps {
            self.step_once()?;
        }
        self.duration = started.elapsed();
        Ok(())
    }

    /// One simulated tick in the fixed phase order.
    pub fn step_once(&mut self) -> Result<(), ModelError> {
        self.model.set_step(IterationStep::Scenario);
        // the double-buffered registers swap at the tick boundary, before any
        // of this tick's writers run
        self.model.switch_registers();
        let timestep = self.model.timestep();
        self.scenario.apply(&mut self.model, timestep);
        self.model.tick();

        let model = &self.model;

        model.set_step(IterationStep::ConsumptionAndProduction);
        (0..model.sectors.len())
            .into_par_iter()
            .for_each(|i| model.sector_phase(i, IterationStep::ConsumptionAndProduction));
        (0..model.regions.len())
            .into_par_iter()
            .for_each(|i| model.region_phase(i, IterationStep::ConsumptionAndProduction));
        run_agent_pool(model, &mut self.agent_pool, IterationStep::ConsumptionAndProduction);
        self.check_fatal()?;

        let model = &self.model;
        model.set_step(IterationStep::Expectation);
        (0..model.regions.len())
            .into_par_iter()
            .for_each(|i| model.region_phase(i, IterationStep::Expectation));
        run_agent_pool(model, &mut self.agent_pool, IterationStep::Expectation);
        self.check_fatal()?;

        let model = &self.model;
        model.set_step(IterationStep::Purchase);
        (0..model.regions.len())
            .into_par_iter()
            .for_each(|i| model.region_phase(i, IterationStep::Purchase));
        let results: Vec<((usize, usize), u64)> = self
            .storage_pool
            .par_iter()
            .map(|&((agent, slot), _)| {
                let started = Instant::now();
                model.storage_purchase(agent, slot);
                ((agent, slot), started.elapsed().as_nanos() as u64)
            })
            .collect();
        self.storage_pool = results;
        self.storage_pool.sort_by(|a, b| b.1.cmp(&a.1));
        self.check_fatal()?;

        let model = &self.model;
        model.set_step(IterationStep::Investment);
        (0..model.regions.len())
            .into_par_iter()
            .for_each(|i| model.region_phase(i, IterationStep::Investment));
        run_agent_pool(model, &mut self.agent_pool, IterationStep::Investment);
        self.check_fatal()?;

        self.model.set_step(IterationStep::Output);
        #[cfg(feature = "instrument")]
        emit_series(&self.model);
        for output in &mut self.outputs {
            output.sample(&self.model);
        }

        self.model.set_step(IterationStep::Cleanup);
        Ok(())
    }

    fn check_fatal(&self) -> Result<(), ModelError> {
        match self.model.take_fatal() {
            Some(message) => Err(ModelError::Optimizer(message)),
            None => Ok(()),
        }
    }
}

/// Per-tick series rows for the instrumentation tables.
#[cfg(feature = "instrument")]
fn emit_series(model: &Model) {
    use crate::model::agent::AgentState;

    let timestep = model.timestep();
    let register = model.current_register();
    for region in &model.regions {
        tracing::info!(
            target: "region",
            timestep,
            name = %region.name,
            gdp = region.gdp(register).quantity().get(),
            imports = region.import_flow(register).quantity().get(),
            exports = region.export_flow(register).quantity().get(),
            consumption = region.consumption(register).quantity().get(),
        );
    }
    for (i, agent) in model.agents.iter().enumerate() {
        let state = model.agent_states[i].lock().unwrap();
        match &*state {
            AgentState::Firm(firm) => {
                tracing::info!(
                    target: "production",
                    timestep,
                    name = %agent.name,
                    quantity = firm.production.quantity().get(),
                    value = firm.production.value().get(),
                );
            }
            AgentState::Consumer(consumer) => {
                tracing::info!(
                    target: "consumption",
                    timestep,
                    name = %agent.name,
                    utility = consumer.utility,
                );
            }
        }
    }
}

fn run_agent_pool(model: &Model, pool: &mut Vec<(usize, u64)>, step: IterationStep) {
    let results: Vec<(usize, u64)> = pool
        .par_iter()
        .map(|&(index, _)| {
            let started = Instant::now();
            model.agent_phase(index, step);
            (index, started.elapsed().as_nanos() as u64)
        })
        .collect();
    *pool = results;
    pool.sort_by(|a, b| b.1.cmp(&a.1));
}
