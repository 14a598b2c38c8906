//! Universal invariants, checked every tick of a shocked run: storage
//! clamps, the forced production cap, shipments versus communicated
//! production, regional accounting, chain delays and purchase bounds.

use cascade_core::model::Model;
use cascade_core::model::agent::AgentState;
use cascade_core::{
    AgentId, FnScenario, ModelBuilder, ModelParameters, ModelRun, SectorParameters, Time,
    TransportType, TransportSpec,
};

const EPS: f64 = 5e-3;

fn economy() -> Model {
    let mut builder = ModelBuilder::new(Time::new(1.0), ModelParameters::default());
    let sector_a = builder
        .add_sector(
            "A",
            TransportType::RoadSea,
            2.0,
            Time::new(5.0),
            SectorParameters::default(),
        )
        .unwrap();
    let sector_b = builder
        .add_sector(
            "B",
            TransportType::Immediate,
            2.0,
            Time::new(5.0),
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
    builder.transport(TransportSpec::ConstantDelay(1));
    builder.build().unwrap()
}

fn check_invariants(model: &Model) {
    // storage clamps and purchase bounds
    for (i, agent) in model.agents.iter().enumerate() {
        let state = model.agent_states[i].lock().unwrap();
        for storage in state.storages() {
            let content = storage.content.quantity().get();
            let baseline = storage.baseline_content.quantity().get();
            let minimum = model.parameters.min_storage * baseline;
            let sector = &model.sectors[storage.sector.0];
            let maximum = sector.upper_storage_limit * agent.forcing * baseline;
            assert!(content >= minimum - EPS, "content {content} below clamp");
            assert!(
                content <= maximum + EPS,
                "content {content} above clamp {maximum}"
            );
            assert!(
                storage.purchasing.purchase.quantity().get()
                    <= storage.purchasing.desired_purchase.get() + EPS,
                "purchase above desired purchase"
            );
        }
        if let AgentState::Firm(firm) = &*state {
            let info = agent.firm_info().unwrap();
            let beta = model.sectors[info.sector.0]
                .parameters
                .possible_overcapacity_ratio;
            let cap = info.baseline_production.quantity().get() * beta * agent.forcing;
            assert!(
                firm.production.quantity().get() <= cap + EPS,
                "production {} above forced maximum {cap}",
                firm.production.quantity().get()
            );
        }
    }

    // shipments never exceed communicated production
    for (f, channel) in model.supply_channels.iter().enumerate() {
        let production = channel.params.read().unwrap().production.quantity().get();
        let shipped: f64 = model
            .connections
            .iter()
            .filter(|c| c.seller_firm.0 == f)
            .map(|c| {
                model.conn_states[c.id.0]
                    .lock()
                    .unwrap()
                    .last_shipment
                    .quantity()
                    .get()
            })
            .sum();
        assert!(
            shipped <= production + EPS,
            "shipped {shipped} above production {production}"
        );
    }

    // regional accounting identity
    let register = model.current_register();
    for region in &model.regions {
        let gdp = region.gdp(register).quantity().get();
        let identity = region.consumption(register).quantity().get()
            + region.export_flow(register).quantity().get()
            - region.import_flow(register).quantity().get();
        assert!((gdp - identity).abs() < 1e-9);
    }

    // chain delay equals the sum of its links' baseline delays
    for connection in &model.connections {
        let state = model.conn_states[connection.id.0].lock().unwrap();
        let total: usize = state.links.iter().map(|l| l.baseline_delay).sum();
        assert_eq!(state.transport_delay(), total);
    }
}

#[test]
fn invariants_hold_through_a_shock() {
    let model = economy();
    let shock = |model: &mut Model, timestep: u64| {
        let index = model.agents.iter().position(|a| a.name == "A1:R1").unwrap();
        let forcing = if (2..=4).contains(&timestep) { 0.5 } else { 1.0 };
        model.set_agent_forcing(AgentId(index), forcing);
    };
    let mut run = ModelRun::new(model, Box::new(FnScenario(shock)));
    for _ in 0..20 {
        run.step_once().unwrap();
        check_invariants(run.model());
    }
}

#[test]
fn consumer_shares_sum_to_one_after_init() {
    let model = economy();
    for (i, agent) in model.agents.iter().enumerate() {
        if agent.consumer_info().is_none() {
            continue;
        }
        let state = model.agent_states[i].lock().unwrap();
        let consumer = state.as_consumer().unwrap();
        let basket_total: f64 = consumer.basket_share_factors.iter().sum();
        assert!((basket_total - 1.0).abs() < 1e-12);
        for indices in &consumer.basket_indices {
            let share_total: f64 = indices.iter().map(|&j| consumer.share_factors[j]).sum();
            assert!((share_total - 1.0).abs() < 1e-12);
        }
    }
}

#[test]
fn cleanup_prunes_degenerate_agents() {
    use cascade_core::ModelError;

    // a firm with no buyers is pruned; pruning its inputs starves the rest
    // of the chain, so the whole graph collapses and build reports it
    let mut builder = ModelBuilder::new(Time::new(1.0), ModelParameters::default());
    let sector = builder
        .add_sector(
            "A",
            TransportType::Immediate,
            2.0,
            Time::new(5.0),
            SectorParameters::default(),
        )
        .unwrap();
    let region = builder.add_region("R1").unwrap();
    let lonely = builder.add_firm("lonely", sector, region).unwrap();
    let other = builder.add_firm("other", sector, region).unwrap();
    builder.add_connection(lonely, other, 365.0).unwrap();
    builder.add_connection(other, lonely, 365.0).unwrap();
    // "other" has value added zero (1.0 in, 1.0 out)
    let result = builder.build();
    assert!(matches!(result, Err(ModelError::Graph(_))));
}
