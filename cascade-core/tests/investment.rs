//! Investment dynamics: with `with_investment_dynamics` enabled, connection
//! baseline flows relax toward the realized shipments with the sector's
//! adjustment time constant.

use cascade_core::model::Model;
use cascade_core::{
    AgentId, FnScenario, ModelBuilder, ModelParameters, ModelRun, Price, SectorParameters, Time,
    TransportType,
};

fn economy() -> Model {
    let parameters = ModelParameters {
        with_investment_dynamics: true,
        ..ModelParameters::default()
    };
    // steep extension slope: the forced firm's shipments track its forcing
    let sector_parameters = SectorParameters {
        price_increase_production_extension: Price::new(100.0),
        estimated_price_increase_production_extension: Price::new(100.0),
        transport_investment_adjustment_time: Time::new(5.0),
        ..SectorParameters::default()
    };
    let mut builder = ModelBuilder::new(Time::new(1.0), parameters);
    let sector_a = builder
        .add_sector(
            "A",
            TransportType::Immediate,
            2.0,
            Time::new(10.0),
            sector_parameters.clone(),
        )
        .unwrap();
    let sector_b = builder
        .add_sector(
            "B",
            TransportType::Immediate,
            2.0,
            Time::new(10.0),
            sector_parameters,
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

#[test]
fn baseline_flows_follow_a_permanent_capacity_cut() {
    let model = economy();
    let shocked = |model: &mut Model, timestep: u64| {
        let index = model.agents.iter().position(|a| a.name == "A:R1").unwrap();
        let forcing = if timestep >= 1 { 0.5 } else { 1.0 };
        model.set_agent_forcing(AgentId(index), forcing);
    };
    let mut run = ModelRun::new(model, Box::new(FnScenario(shocked)));

    // 5 time constants (5 · 5 days) plus settling slack
    run.run(120).unwrap();

    let model = run.model();
    let seller = model.agents.iter().position(|a| a.name == "A:R1").unwrap();
    for connection in &model.connections {
        if connection.seller.0 != seller {
            continue;
        }
        let state = model.conn_states[connection.id.0].lock().unwrap();
        let baseline = state.baseline_flow.quantity().get();
        let shipment = state.last_shipment.quantity().get();
        assert!(
            (baseline - shipment).abs() <= 0.02 * shipment.max(1e-6),
            "baseline {baseline} should track shipment {shipment}"
        );
        // original baseline was 1.0 per connection; under forcing 0.5 the
        // relaxed baseline converges to roughly half of it
        assert!(
            baseline < 0.75,
            "baseline flow should shrink well below 1.0, got {baseline}"
        );
    }
}

#[test]
fn baseline_flows_stay_put_without_investment_dynamics() {
    let parameters = ModelParameters::default();
    assert!(!parameters.with_investment_dynamics);
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
            vec![(vec![sector_a, sector_b], 2.0)],
            5.0,
            true,
        )
        .unwrap();
    builder.add_connection(firm_a, firm_b, 365.0).unwrap();
    builder.add_connection(firm_b, firm_a, 365.0).unwrap();
    builder.add_connection(firm_a, consumer, 365.0).unwrap();
    builder.add_connection(firm_b, consumer, 365.0).unwrap();
    let model = builder.build().unwrap();

    let shocked = |model: &mut Model, timestep: u64| {
        let index = model.agents.iter().position(|a| a.name == "A:R1").unwrap();
        let forcing = if timestep >= 1 { 0.5 } else { 1.0 };
        model.set_agent_forcing(AgentId(index), forcing);
    };
    let mut run = ModelRun::new(model, Box::new(FnScenario(shocked)));
    run.run(20).unwrap();
    for state in &run.model().conn_states {
        let state = state.lock().unwrap();
        assert!(
            (state.baseline_flow.quantity().get() - 1.0).abs() < 1e-12,
            "baseline flow must stay frozen without investment dynamics"
        );
    }
}
