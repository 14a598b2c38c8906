//! Budget binding: with the equality constraint the consumer spends exactly
//! its budget every tick; with the inequality constraint it may underspend
//! but never overspend. Rounding of consumption quantities bounds how exact
//! "exactly" can be.

use cascade_core::model::Model;
use cascade_core::{
    AgentId, FnScenario, ModelBuilder, ModelParameters, ModelRun, SectorParameters, Time,
    TransportType,
};

const SPEND_EPS: f64 = 2e-3;

fn economy(parameters: ModelParameters) -> Model {
    let mut builder = ModelBuilder::new(Time::new(1.0), parameters);
    let sector_a = builder
        .add_sector(
            "A",
            TransportType::Immediate,
            2.0,
            Time::new(10.0),
            SectorParameters::default(),
        )
        .unwrap();
    let sector_b = builder
        .add_sector(
            "B",
            TransportType::Immediate,
            2.0,
            Time::new(10.0),
            SectorParameters::default(),
        )
        .unwrap();
    let region = builder.add_region("R1").unwrap();
    let firm_a = builder.add_firm("A:R1", sector_a, region).unwrap();
    let firm_b = builder.add_firm("B:R1", sector_b, region).unwrap();
    let consumer = builder
        .add_consumer(
            "C:R1",
            region,
            vec![(vec![sector_a], 2.0), (vec![sector_b], 2.0)],
            5.0,
            true,
        )
        .unwrap();
    builder.add_connection(firm_a, firm_b, 365.0).unwrap();
    builder.add_connection(firm_b, firm_a, 365.0).unwrap();
    builder.add_connection(firm_a, consumer, 365.0).unwrap();
    builder.add_connection(firm_b, consumer, 365.0).unwrap();
    builder.build().unwrap()
}

fn consumer_spend_and_budget(model: &Model) -> (f64, f64) {
    let index = model
        .agents
        .iter()
        .position(|a| a.name == "C:R1")
        .unwrap();
    let state = model.agent_states[index].lock().unwrap();
    let consumer = state.as_consumer().unwrap();
    let spend: f64 = consumer
        .storages
        .iter()
        .map(|s| s.used_flow.value().get())
        .sum();
    (spend, consumer.consumption_budget.get())
}

fn mild_supply_shock(model: &mut Model, timestep: u64) {
    let index = model.agents.iter().position(|a| a.name == "A:R1").unwrap();
    let forcing = if (2..=3).contains(&timestep) { 0.9 } else { 1.0 };
    model.set_agent_forcing(AgentId(index), forcing);
}

#[test]
fn equality_constraint_spends_the_budget() {
    let model = economy(ModelParameters::default());
    let mut run = ModelRun::new(model, Box::new(FnScenario(mild_supply_shock)));
    for _ in 0..8 {
        run.step_once().unwrap();
        let (spend, budget) = consumer_spend_and_budget(run.model());
        assert!(
            (spend - budget).abs() <= SPEND_EPS,
            "spend {spend} vs budget {budget}"
        );
    }
}

#[test]
fn inequality_constraint_never_overspends() {
    let parameters = ModelParameters {
        budget_inequality_constrained: true,
        ..ModelParameters::default()
    };
    let model = economy(parameters);
    let mut run = ModelRun::new(model, Box::new(FnScenario(mild_supply_shock)));
    for _ in 0..8 {
        run.step_once().unwrap();
        let (spend, budget) = consumer_spend_and_budget(run.model());
        let index = run
            .model()
            .agents
            .iter()
            .position(|a| a.name == "C:R1")
            .unwrap();
        let not_spent = run.model().agent_states[index]
            .lock()
            .unwrap()
            .as_consumer()
            .unwrap()
            .not_spent_budget
            .get();
        assert!(
            spend <= budget + not_spent.max(0.0) + SPEND_EPS,
            "spend {spend} vs budget {budget} (+{not_spent})"
        );
    }
}

#[test]
fn two_baskets_split_budget_by_baseline_shares() {
    let model = economy(ModelParameters::default());
    let index = model
        .agents
        .iter()
        .position(|a| a.name == "C:R1")
        .unwrap();
    let state = model.agent_states[index].lock().unwrap();
    let consumer = state.as_consumer().unwrap();
    assert_eq!(consumer.basket_share_factors.len(), 2);
    assert!((consumer.basket_share_factors[0] - 0.5).abs() < 1e-12);
    assert!((consumer.basket_share_factors[1] - 0.5).abs() < 1e-12);
    assert!((consumer.consumption_budget.get() - 2.0).abs() < 1e-9);
}
