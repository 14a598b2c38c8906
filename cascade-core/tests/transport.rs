//! Transport shock scenario: a passage forcing on a geographic connection
//! throttles every chain crossing it; the downstream storage dips, demand
//! shifts toward the unaffected supplier, and the system recovers after the
//! passage is restored.

use cascade_core::model::Model;
use cascade_core::model::geo::GeoEntityRef;
use cascade_core::{
    FnScenario, GeoConnectionId, ModelBuilder, ModelParameters, ModelRun, SectorParameters, Time,
    TransportType, TransportSpec,
};

/// Two regions: sector-A firms on both sides feed firm B in R2, which
/// supplies them and the consumer back. Only A1→B crosses regions on a
/// two-day chain.
fn two_region_economy() -> Model {
    let mut builder = ModelBuilder::new(Time::new(1.0), ModelParameters::default());
    let sector_a = builder
        .add_sector(
            "A",
            TransportType::RoadSea,
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
    let r1 = builder.add_region("R1").unwrap();
    let r2 = builder.add_region("R2").unwrap();
    let firm_a1 = builder.add_firm("A1:R1", sector_a, r1).unwrap();
    let firm_a2 = builder.add_firm("A2:R2", sector_a, r2).unwrap();
    let firm_b = builder.add_firm("B:R2", sector_b, r2).unwrap();
    let consumer = builder
        .add_consumer("C:R2", r2, vec![(vec![sector_b], 2.0)], 5.0, true)
        .unwrap();
    builder.add_connection(firm_a1, firm_b, 182.5).unwrap();
    builder.add_connection(firm_a2, firm_b, 182.5).unwrap();
    builder.add_connection(firm_b, consumer, 365.0).unwrap();
    builder.add_connection(firm_b, firm_a1, 91.25).unwrap();
    builder.add_connection(firm_b, firm_a2, 91.25).unwrap();
    builder.transport(TransportSpec::ConstantDelay(2));
    builder.build().unwrap()
}

fn connection_index(model: &Model, seller: &str, buyer: &str) -> usize {
    model
        .connections
        .iter()
        .position(|c| {
            model.agents[c.seller.0].name == seller && model.agents[c.buyer.0].name == buyer
        })
        .unwrap()
}

fn a_storage_content(model: &Model) -> f64 {
    let index = model
        .agents
        .iter()
        .position(|a| a.name == "B:R2")
        .unwrap();
    let state = model.agent_states[index].lock().unwrap();
    state.storages()[0].content.quantity().get()
}

#[test]
fn chain_delay_matches_route() {
    let model = two_region_economy();
    let cross = connection_index(&model, "A1:R1", "B:R2");
    let state = model.conn_states[cross].lock().unwrap();
    assert_eq!(state.transport_delay(), 2);
    // the domestic edge ships immediately
    let domestic = connection_index(&model, "A2:R2", "B:R2");
    let state = model.conn_states[domestic].lock().unwrap();
    assert_eq!(state.transport_delay(), 0);
}

#[test]
fn baseline_chains_deliver_baseline() {
    let model = two_region_economy();
    let cross = connection_index(&model, "A1:R1", "B:R2");
    let mut run = ModelRun::new(model, Box::new(cascade_core::BaselineScenario));
    run.run(4).unwrap();
    let state = run.model().conn_states[cross].lock().unwrap();
    assert!(
        (state.last_delivery.current.quantity().get() - 0.5).abs() < 2e-3,
        "delivery {}",
        state.last_delivery.current.quantity().get()
    );
    assert!(state.flow_deficit().get().abs() < 2e-3);
    drop(state);
    let content = a_storage_content(run.model());
    assert!((content - 10.0).abs() < 5e-2, "content {content}");
}

#[test]
fn passage_forcing_throttles_and_recovers() {
    let model = two_region_economy();
    let cross = connection_index(&model, "A1:R1", "B:R2");
    let domestic = connection_index(&model, "A2:R2", "B:R2");

    let shock = |model: &mut Model, timestep: u64| {
        let passage = if (3..=5).contains(&timestep) { 0.5 } else { -1.0 };
        model.set_geo_forcing(GeoEntityRef::Connection(GeoConnectionId(0)), passage);
    };
    let mut run = ModelRun::new(model, Box::new(FnScenario(shock)));

    run.run(5).unwrap();
    {
        let state = run.model().conn_states[cross].lock().unwrap();
        assert!(
            state.last_delivery.current.quantity().get() < 0.5 - 1e-3,
            "throttled delivery {}",
            state.last_delivery.current.quantity().get()
        );
        assert!(
            state.flow_deficit().get() > 1e-3,
            "deficit {}",
            state.flow_deficit().get()
        );
        assert!((state.minimum_passage() - 0.5).abs() < 1e-12);
    }

    run.run(2).unwrap();
    let dipped = a_storage_content(run.model());
    assert!(dipped < 10.0 - 0.1, "content should dip, got {dipped}");
    {
        // the shortfall pushes demand up, including toward the unaffected
        // domestic supplier
        let state = run.model().conn_states[domestic].lock().unwrap();
        assert!(
            state.last_demand_request.quantity().get() > 0.5 + 1e-3,
            "domestic demand {}",
            state.last_demand_request.quantity().get()
        );
    }

    run.run(30).unwrap();
    let recovered = a_storage_content(run.model());
    assert!(
        (recovered - 10.0).abs() < 0.1,
        "content should recover, got {recovered}"
    );
    let state = run.model().conn_states[cross].lock().unwrap();
    assert!(
        state.flow_deficit().get().abs() < 5e-2,
        "residual deficit {}",
        state.flow_deficit().get()
    );
    assert_eq!(state.minimum_passage(), 1.0);
}
