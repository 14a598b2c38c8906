//! Government taxation: scenario-defined tax rates reach the firms' sales
//! managers in EXPECTATION, revenue accumulates in the budget, and the tax
//! raises the minimal offer price.

use cascade_core::model::Model;
use cascade_core::output::{ArrayOutput, ObservationScope, Output};
use cascade_core::{
    FnScenario, ModelBuilder, ModelParameters, ModelRun, RegionId, SectorParameters, Time,
    TransportType,
};

fn economy() -> Model {
    let mut builder = ModelBuilder::new(Time::new(1.0), ModelParameters::default());
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
    builder.with_government(region);
    let firm_a = builder.add_firm("A:R1", sector_a, region).unwrap();
    let firm_b = builder.add_firm("B:R1", sector_b, region).unwrap();
    let consumer = builder
        .add_consumer(
            "C:R1",
            region,
            vec![(vec![sector_a, sector_b], 2.0)],
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

#[test]
fn defined_tax_reaches_firms_and_collects_revenue() {
    let model = economy();
    let scenario = |model: &mut Model, timestep: u64| {
        if timestep == 1 {
            model.define_tax(RegionId(0), "A", 0.1);
        }
    };
    let mut run = ModelRun::new(model, Box::new(FnScenario(scenario)));
    run.run(4).unwrap();

    let model = run.model();
    let firm_a = model.agents.iter().position(|a| a.name == "A:R1").unwrap();
    let tax = model.agent_states[firm_a]
        .lock()
        .unwrap()
        .as_firm()
        .unwrap()
        .sales
        .tax;
    assert!((tax - 0.1).abs() < 1e-12, "tax rate not imposed: {tax}");

    // the other sector's firm stays untaxed
    let firm_b = model.agents.iter().position(|a| a.name == "B:R1").unwrap();
    let untaxed = model.agent_states[firm_b]
        .lock()
        .unwrap()
        .as_firm()
        .unwrap()
        .sales
        .tax;
    assert_eq!(untaxed, 0.0);

    let government = model.regions[0].government.lock().unwrap();
    let budget = government.as_ref().unwrap().budget.get();
    assert!(budget > 0.0, "government budget should accumulate: {budget}");
}

#[test]
fn array_output_samples_named_series() {
    let model = economy();
    let mut run = ModelRun::new(model, Box::new(cascade_core::BaselineScenario));
    run.run(5).unwrap();

    let mut output = ArrayOutput::new(vec![
        ObservationScope::Agents,
        ObservationScope::Regions,
        ObservationScope::Sectors,
    ]);
    output.sample(run.model());

    let production = output.series_for("A:R1", "production_quantity").unwrap();
    assert_eq!(production.len(), 1);
    assert!((production[0] - 2.0).abs() < 5e-3);
    let gdp = output.series_for("R1", "gdp").unwrap();
    assert!((gdp[0] - 2.0).abs() < 5e-3);
    let utility = output.series_for("C:R1", "utility").unwrap();
    assert!((utility[0] - 1.0).abs() < 1e-3);
    assert_eq!(output.timesteps, vec![5]);
}
