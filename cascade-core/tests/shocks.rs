//! Forcing shock scenarios: capacity cuts on a supplier propagate downstream,
//! demand surges push sellers into the production extension, and the system
//! relaxes back to baseline after a symmetric shock.

use cascade_core::model::Model;
use cascade_core::{
    EventKind, ModelBuilder, ModelParameters, ModelRun, SectorParameters, Time, TransportType,
};

fn economy(parameters: ModelParameters, sector_params: SectorParameters, fill: f64) -> Model {
    let mut builder = ModelBuilder::new(Time::new(1.0), parameters);
    let sector_a = builder
        .add_sector(
            "A",
            TransportType::Immediate,
            2.0,
            Time::new(fill),
            sector_params.clone(),
        )
        .unwrap();
    let sector_b = builder
        .add_sector(
            "B",
            TransportType::Immediate,
            2.0,
            Time::new(fill),
            sector_params,
        )
        .unwrap();
    let region = builder.add_region("R1").unwrap();
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

fn agent_index(model: &Model, name: &str) -> usize {
    model.agents.iter().position(|a| a.name == name).unwrap()
}

fn production(model: &Model, name: &str) -> f64 {
    let state = model.agent_states[agent_index(model, name)].lock().unwrap();
    state.as_firm().unwrap().production.quantity().get()
}

fn utility(model: &Model, name: &str) -> f64 {
    let state = model.agent_states[agent_index(model, name)].lock().unwrap();
    state.as_consumer().unwrap().utility
}

fn offer_price(model: &Model, name: &str) -> f64 {
    let index = agent_index(model, name);
    let info = model.agents[index].firm_info().unwrap();
    model.supply_channels[info.index.0]
        .params
        .read()
        .unwrap()
        .offer_price
        .get()
}

#[test]
fn supplier_forcing_caps_production() {
    // a steep extension slope keeps the forced firm at its forcing level
    let sector_params = SectorParameters {
        price_increase_production_extension: cascade_core::Price::new(100.0),
        estimated_price_increase_production_extension: cascade_core::Price::new(100.0),
        ..SectorParameters::default()
    };
    let model = economy(ModelParameters::default(), sector_params, 10.0);
    let shock = |model: &mut Model, timestep: u64| {
        let index = model.agents.iter().position(|a| a.name == "A:R1").unwrap();
        let forcing = if (2..=4).contains(&timestep) { 0.3 } else { 1.0 };
        model.set_agent_forcing(cascade_core::AgentId(index), forcing);
    };
    let mut run = ModelRun::new(model, Box::new(cascade_core::FnScenario(shock)));

    run.run(2).unwrap();
    let mut max_shocked_production: f64 = 0.0;
    for _ in 0..3 {
        run.step_once().unwrap();
        max_shocked_production = max_shocked_production.max(production(run.model(), "A:R1"));
    }
    assert!(
        max_shocked_production <= 0.3 * 2.0 + 5e-2,
        "production during shock: {max_shocked_production}"
    );

    run.run(30).unwrap();
    let recovered = production(run.model(), "A:R1");
    assert!((recovered - 2.0).abs() <= 5e-2, "recovered to {recovered}");
}

#[test]
fn deep_shock_starves_storages_and_consumer() {
    // thin storages (two days of input) and a content floor so a deep cut
    // drains them to the clamp within the shock window
    let parameters = ModelParameters {
        min_storage: 0.1,
        ..ModelParameters::default()
    };
    let model = economy(parameters, SectorParameters::default(), 2.0);
    let shock = |model: &mut Model, timestep: u64| {
        let index = model.agents.iter().position(|a| a.name == "A:R1").unwrap();
        let forcing = if (2..=6).contains(&timestep) { 0.2 } else { 1.0 };
        model.set_agent_forcing(cascade_core::AgentId(index), forcing);
    };
    let mut run = ModelRun::new(model, Box::new(cascade_core::FnScenario(shock)));

    run.run(7).unwrap();
    let shocked_utility = utility(run.model(), "C:R1");
    assert!(
        shocked_utility < 1.0 - 1e-3,
        "utility should drop below baseline, got {shocked_utility}"
    );
    assert!(
        run.model().events.count(EventKind::StorageUnderrun) > 0,
        "expected storage underruns during the outage"
    );
    let gdp = run.model().regions[0]
        .gdp(run.model().current_register())
        .quantity()
        .get();
    assert!(gdp < 2.0 - 1e-2, "gdp should drop, got {gdp}");

    // recovery is bounded by the refill time once forcing is back
    run.run(60).unwrap();
    let recovered_utility = utility(run.model(), "C:R1");
    assert!(
        recovered_utility > 0.95,
        "utility should recover, got {recovered_utility}"
    );
}

#[test]
fn demand_surge_raises_offer_price_without_optimizer_trouble() {
    // non-utilitarian consumer so its forcing scales desired consumption
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
    let firm_a = builder.add_firm("A:R1", sector_a, region).unwrap();
    let firm_b = builder.add_firm("B:R1", sector_b, region).unwrap();
    let consumer = builder
        .add_consumer(
            "C:R1",
            region,
            vec![(vec![sector_a, sector_b], 2.0)],
            5.0,
            false,
        )
        .unwrap();
    builder.add_connection(firm_a, firm_b, 365.0).unwrap();
    builder.add_connection(firm_b, firm_a, 365.0).unwrap();
    builder.add_connection(firm_a, consumer, 365.0).unwrap();
    builder.add_connection(firm_b, consumer, 365.0).unwrap();
    let model = builder.build().unwrap();

    let shock = |model: &mut Model, timestep: u64| {
        let index = model.agents.iter().position(|a| a.name == "C:R1").unwrap();
        let forcing = if timestep == 2 { 2.0 } else { 1.0 };
        model.set_agent_forcing(cascade_core::AgentId(index), forcing);
    };
    let mut run = ModelRun::new(model, Box::new(cascade_core::FnScenario(shock)));

    run.run(2).unwrap();
    let mut max_offer: f64 = 0.0;
    let mut max_production: f64 = 0.0;
    for _ in 0..4 {
        run.step_once().unwrap();
        max_offer = max_offer.max(offer_price(run.model(), "A:R1"));
        max_production = max_production.max(production(run.model(), "A:R1"));
    }
    assert!(
        max_offer > 1.0 + 1e-4,
        "offer price should rise above baseline, got {max_offer}"
    );
    assert!(
        max_production > 2.0 + 1e-3,
        "production should extend above baseline, got {max_production}"
    );
    for kind in [
        EventKind::OptimizerTimeout,
        EventKind::OptimizerMaxiter,
    ] {
        assert_eq!(
            run.model().events.count(kind),
            0,
            "unexpected optimizer event {kind:?}"
        );
    }
}
