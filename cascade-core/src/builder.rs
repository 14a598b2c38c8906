//! Model assembly.
//!
//! The builder collects sectors, regions, agents and annual baseline flows,
//! derives the transport geography, prunes degenerate agents to a fixed
//! point, and freezes everything into the index-addressed arenas of
//! [`Model`]. Assembly uses generational slotmap keys so the cleanup sweep
//! can remove agents and connections without dangling references; indices
//! only become stable at freeze time.

use std::collections::HashMap;

use pathfinding::prelude::dijkstra;
use slotmap::{SecondaryMap, SlotMap, new_key_type};

use crate::error::ModelError;
use crate::model::agent::{
    AgentKindInfo, AgentState, ConsumerBasket, ConsumerInfo, EconomicAgent, FirmInfo,
};
use crate::model::connection::{BusinessConnection, ConnectionState};
use crate::model::consumer::ConsumerState;
use crate::model::firm::FirmState;
use crate::model::geo::{
    ConnectionKind, GeoConnection, GeoEntityRef, GeoLocation, GeoPoint, GeoRoute, LocationKind,
    TransportType,
};
use crate::model::government::Government;
use crate::model::region::Region;
use crate::model::sales::{SalesState, SupplyParameters};
use crate::model::sector::Sector;
use crate::model::storage::Storage;
use crate::model::transport::TransportChainLink;
use crate::model::{
    AgentId, ConnectionId, FirmIndex, GeoConnectionId, IterationStep, LocationId, Model, RegionId,
    SectorId, StorageId, SupplyChannel,
};
use crate::parameters::{ModelParameters, SectorParameters, StorageParameters};
use crate::types::{Flow, FloatType, Price, Quantity, Ratio, Time, TransportDelay};

new_key_type! {
    pub struct AgentKey;
    pub struct ConnectionKey;
}

struct SectorSpec {
    name: String,
    transport_type: TransportType,
    upper_storage_limit: Ratio,
    baseline_storage_fill_factor: Time,
    parameters: SectorParameters,
}

struct RegionSpec {
    name: String,
    centroid: Option<GeoPoint>,
    with_government: bool,
}

enum AgentSpecKind {
    Firm {
        sector: usize,
    },
    Consumer {
        baskets: Vec<(Vec<usize>, FloatType)>,
        inter_basket_substitution: FloatType,
        utilitarian: bool,
        consumption_price_elasticity: FloatType,
    },
}

struct AgentSpec {
    name: String,
    region: usize,
    kind: AgentSpecKind,
}

struct ConnectionSpec {
    seller: AgentKey,
    buyer: AgentKey,
    flow: Flow,
}

/// How the transport geography is specified.
pub enum TransportSpec {
    /// Every cross-region chain gets a single link with this delay.
    ConstantDelay(TransportDelay),
    /// Symmetric per-region-pair delays; `None` means unconnected.
    DelayMatrix(Vec<Vec<Option<TransportDelay>>>),
    /// Delays from great-circle distances between region centroids.
    Centroids {
        road_speed: FloatType,
        sea_speed: FloatType,
        aviation_speed: FloatType,
        /// Distances at or above this use sea speed for the roadsea route.
        threshold_road_transport: FloatType,
    },
    /// Full typed topology with cheapest-path routing.
    Topology(TransportTopology),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportNodeKind {
    Region,
    Sea,
    Port,
}

pub struct TransportNode {
    pub name: String,
    pub kind: TransportNodeKind,
    pub lon: FloatType,
    pub lat: FloatType,
}

pub struct TransportTopology {
    pub nodes: Vec<TransportNode>,
    /// Symmetric adjacency matrix over `nodes`.
    pub connected: Vec<Vec<bool>>,
    pub road_speed: FloatType,
    pub sea_speed: FloatType,
    pub aviation_speed: FloatType,
    pub port_delay: TransportDelay,
    pub road_km_costs: FloatType,
    pub sea_km_costs: FloatType,
}

/// One hop of a precomputed route, before index freeze.
#[derive(Clone)]
struct RouteHop {
    entity: GeoEntityRef,
    delay: TransportDelay,
}

pub struct ModelBuilder {
    delta_t: Time,
    parameters: ModelParameters,
    /// Annual flows at or below this quantity are dropped.
    flow_threshold: FloatType,
    sectors: Vec<SectorSpec>,
    regions: Vec<RegionSpec>,
    agents: SlotMap<AgentKey, AgentSpec>,
    connections: SlotMap<ConnectionKey, ConnectionSpec>,
    transport: TransportSpec,
}

impl ModelBuilder {
    pub fn new(delta_t: Time, parameters: ModelParameters) -> Self {
        Self {
            delta_t,
            parameters,
            flow_threshold: 0.0,
            sectors: Vec::new(),
            regions: Vec::new(),
            agents: SlotMap::with_key(),
            connections: SlotMap::with_key(),
            transport: TransportSpec::ConstantDelay(0),
        }
    }

    pub fn flow_threshold(&mut self, threshold: FloatType) -> &mut Self {
        self.flow_threshold = threshold;
        self
    }

    pub fn transport(&mut self, spec: TransportSpec) -> &mut Self {
        self.transport = spec;
        self
    }

    pub fn add_sector(
        &mut self,
        name: &str,
        transport_type: TransportType,
        upper_storage_limit: Ratio,
        baseline_storage_fill_factor: Time,
        parameters: SectorParameters,
    ) -> Result<usize, ModelError> {
        if self.sectors.iter().any(|s| s.name == name) {
            return Err(ModelError::Config(format!("duplicate sector name '{name}'")));
        }
        self.sectors.push(SectorSpec {
            name: name.to_string(),
            transport_type,
            upper_storage_limit,
            baseline_storage_fill_factor,
            parameters,
        });
        Ok(self.sectors.len() - 1)
    }

    pub fn add_region(&mut self, name: &str) -> Result<usize, ModelError> {
        if self.regions.iter().any(|r| r.name == name) {
            return Err(ModelError::Config(format!("duplicate region name '{name}'")));
        }
        self.regions.push(RegionSpec {
            name: name.to_string(),
            centroid: None,
            with_government: false,
        });
        Ok(self.regions.len() - 1)
    }

    pub fn set_centroid(&mut self, region: usize, lon: FloatType, lat: FloatType) {
        self.regions[region].centroid = Some(GeoPoint::new(lon, lat));
    }

    pub fn with_government(&mut self, region: usize) {
        self.regions[region].with_government = true;
    }

    pub fn add_firm(
        &mut self,
        name: &str,
        sector: usize,
        region: usize,
    ) -> Result<AgentKey, ModelError> {
        self.check_agent(name, region)?;
        if sector >= self.sectors.len() {
            return Err(ModelError::Config(format!("unknown sector index {sector}")));
        }
        Ok(self.agents.insert(AgentSpec {
            name: name.to_string(),
            region,
            kind: AgentSpecKind::Firm { sector },
        }))
    }

    pub fn add_consumer(
        &mut self,
        name: &str,
        region: usize,
        baskets: Vec<(Vec<usize>, FloatType)>,
        inter_basket_substitution: FloatType,
        utilitarian: bool,
    ) -> Result<AgentKey, ModelError> {
        self.check_agent(name, region)?;
        for (sectors, _) in &baskets {
            for &s in sectors {
                if s >= self.sectors.len() {
                    return Err(ModelError::Config(format!("unknown sector index {s}")));
                }
            }
        }
        Ok(self.agents.insert(AgentSpec {
            name: name.to_string(),
            region,
            kind: AgentSpecKind::Consumer {
                baskets,
                inter_basket_substitution,
                utilitarian,
                consumption_price_elasticity: StorageParameters::default()
                    .consumption_price_elasticity,
            },
        }))
    }

    pub fn set_consumption_price_elasticity(&mut self, consumer: AgentKey, elasticity: FloatType) {
        if let Some(spec) = self.agents.get_mut(consumer)
            && let AgentSpecKind::Consumer {
                consumption_price_elasticity,
                ..
            } = &mut spec.kind
        {
            *consumption_price_elasticity = elasticity;
        }
    }

    fn check_agent(&self, name: &str, region: usize) -> Result<(), ModelError> {
        if self.agents.values().any(|a| a.name == name) {
            return Err(ModelError::Config(format!("duplicate agent name '{name}'")));
        }
        if region >= self.regions.len() {
            return Err(ModelError::Config(format!("unknown region index {region}")));
        }
        Ok(())
    }

    /// Registers an annual baseline flow from a selling firm to a buyer.
    /// Quantities convert to per-Δt with `time_factor = Δt / 365`; flows at
    /// or below the threshold are dropped.
    pub fn add_connection(
        &mut self,
        seller: AgentKey,
        buyer: AgentKey,
        annual_quantity: FloatType,
    ) -> Result<(), ModelError> {
        let seller_spec = self
            .agents
            .get(seller)
            .ok_or_else(|| ModelError::Config("unknown seller".into()))?;
        if !matches!(seller_spec.kind, AgentSpecKind::Firm { .. }) {
            return Err(ModelError::Config(format!(
                "seller '{}' is not a firm",
                seller_spec.name
            )));
        }
        if self.agents.get(buyer).is_none() {
            return Err(ModelError::Config("unknown buyer".into()));
        }
        let time_factor = self.delta_t.get() / 365.0;
        let quantity = Quantity::new(annual_quantity * time_factor).round();
        if annual_quantity <= self.flow_threshold || quantity <= Quantity::new(0.0) {
            return Ok(());
        }
        self.connections.insert(ConnectionSpec {
            seller,
            buyer,
            flow: Flow::with_unit_price(quantity),
        });
        Ok(())
    }

    pub fn build(mut self) -> Result<Model, ModelError> {
        self.clean_network()?;
        let geography = prune_geography(self.build_routes()?);
        self.freeze(geography)
    }

    /// Removes firms with non-positive value added, no outgoing connection
    /// (a self-supply alone does not count) or no inputs, and consumers with
    /// no inputs; repeats until stable, subtracting flows consistently by
    /// dropping the removed agents' connections.
    fn clean_network(&mut self) -> Result<(), ModelError> {
        loop {
            let mut to_remove: Vec<AgentKey> = Vec::new();
            for (key, agent) in &self.agents {
                match &agent.kind {
                    AgentSpecKind::Firm { .. } => {
                        let mut production = Quantity::new(0.0);
                        let mut inputs = Quantity::new(0.0);
                        let mut outgoing = 0usize;
                        let mut incoming = 0usize;
                        for connection in self.connections.values() {
                            if connection.seller == key {
                                production += connection.flow.quantity();
                                if connection.buyer != key {
                                    outgoing += 1;
                                }
                            }
                            if connection.buyer == key {
                                inputs += connection.flow.quantity();
                                if connection.seller != key {
                                    incoming += 1;
                                }
                            }
                        }
                        let value_added = production - inputs;
                        if value_added <= Quantity::new(0.0) || outgoing == 0 || incoming == 0 {
                            tracing::warn!(
                                target: "cleanup",
                                agent = %agent.name,
                                value_added = value_added.get(),
                                outgoing,
                                incoming,
                                "removing degenerate firm"
                            );
                            to_remove.push(key);
                        }
                    }
                    AgentSpecKind::Consumer { .. } => {
                        let incoming = self
                            .connections
                            .values()
                            .filter(|c| c.buyer == key)
                            .count();
                        if incoming == 0 {
                            tracing::warn!(
                                target: "cleanup",
                                agent = %agent.name,
                                "removing consumer without inputs"
                            );
                            to_remove.push(key);
                        }
                    }
                }
            }
            if to_remove.is_empty() {
                break;
            }
            for key in to_remove {
                self.agents.remove(key);
                self.connections
                    .retain(|_, c| c.seller != key && c.buyer != key);
            }
        }
        if self.agents.is_empty() {
            return Err(ModelError::Graph("no economic agents present".into()));
        }
        Ok(())
    }

    // --- transport geography ------------------------------------------------

    /// Builds all cross-region routes plus the geography arenas referenced by
    /// them. Returned routes are keyed by (from, to, transport type).
    #[allow(clippy::type_complexity)]
    fn build_routes(
        &mut self,
    ) -> Result<
        (
            HashMap<(usize, usize, TransportType), Vec<RouteHop>>,
            Vec<GeoLocation>,
            Vec<GeoConnection>,
        ),
        ModelError,
    > {
        let mut routes = HashMap::new();
        let mut locations: Vec<GeoLocation> = Vec::new();
        let mut geo_connections: Vec<GeoConnection> = Vec::new();
        let n = self.regions.len();

        let add_pair_connection = |geo_connections: &mut Vec<GeoConnection>,
                                       routes: &mut HashMap<
            (usize, usize, TransportType),
            Vec<RouteHop>,
        >,
                                       i: usize,
                                       j: usize,
                                       kind: ConnectionKind,
                                       delay: TransportDelay,
                                       transport_type: TransportType| {
            let id = GeoConnectionId(geo_connections.len());
            geo_connections.push(GeoConnection {
                kind,
                delay,
                endpoints: (
                    GeoEntityRef::Region(RegionId(i)),
                    GeoEntityRef::Region(RegionId(j)),
                ),
            });
            let hop = RouteHop {
                entity: GeoEntityRef::Connection(id),
                delay,
            };
            routes.insert((i, j, transport_type), vec![hop.clone()]);
            routes.insert((j, i, transport_type), vec![hop]);
        };

        match &self.transport {
            TransportSpec::ConstantDelay(delay) => {
                for i in 0..n {
                    for j in (i + 1)..n {
                        let id = GeoConnectionId(geo_connections.len());
                        geo_connections.push(GeoConnection {
                            kind: ConnectionKind::Unspecified,
                            delay: *delay,
                            endpoints: (
                                GeoEntityRef::Region(RegionId(i)),
                                GeoEntityRef::Region(RegionId(j)),
                            ),
                        });
                        let hop = RouteHop {
                            entity: GeoEntityRef::Connection(id),
                            delay: *delay,
                        };
                        for transport_type in [TransportType::RoadSea, TransportType::Aviation] {
                            routes.insert((i, j, transport_type), vec![hop.clone()]);
                            routes.insert((j, i, transport_type), vec![hop.clone()]);
                        }
                    }
                }
            }
            TransportSpec::DelayMatrix(matrix) => {
                if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
                    return Err(ModelError::Config(
                        "transport matrix dimension does not match region count".into(),
                    ));
                }
                for i in 0..n {
                    for j in (i + 1)..n {
                        if matrix[i][j] != matrix[j][i] {
                            return Err(ModelError::Config(
                                "transport matrix is not symmetric".into(),
                            ));
                        }
                        if let Some(delay) = matrix[i][j] {
                            let id = GeoConnectionId(geo_connections.len());
                            geo_connections.push(GeoConnection {
                                kind: ConnectionKind::Unspecified,
                                delay,
                                endpoints: (
                                    GeoEntityRef::Region(RegionId(i)),
                                    GeoEntityRef::Region(RegionId(j)),
                                ),
                            });
                            let hop = RouteHop {
                                entity: GeoEntityRef::Connection(id),
                                delay,
                            };
                            for transport_type in [TransportType::RoadSea, TransportType::Aviation]
                            {
                                routes.insert((i, j, transport_type), vec![hop.clone()]);
                                routes.insert((j, i, transport_type), vec![hop.clone()]);
                            }
                        }
                    }
                }
            }
            TransportSpec::Centroids {
                road_speed,
                sea_speed,
                aviation_speed,
                threshold_road_transport,
            } => {
                let delta_t = self.delta_t.get();
                for i in 0..n {
                    for j in (i + 1)..n {
                        let (a, b) = (&self.regions[i], &self.regions[j]);
                        let (ca, cb) = match (&a.centroid, &b.centroid) {
                            (Some(ca), Some(cb)) => (ca, cb),
                            _ => {
                                return Err(ModelError::Config(format!(
                                    "missing centroid for region pair {} / {}",
                                    a.name, b.name
                                )));
                            }
                        };
                        let distance = ca.distance_to(cb);
                        let (kind, speed) = if distance >= *threshold_road_transport {
                            (ConnectionKind::SeaRoute, *sea_speed)
                        } else {
                            (ConnectionKind::Road, *road_speed)
                        };
                        let delay = (distance / speed / 24.0 / delta_t).round() as TransportDelay;
                        add_pair_connection(
                            &mut geo_connections,
                            &mut routes,
                            i,
                            j,
                            kind,
                            delay,
                            TransportType::RoadSea,
                        );
                        let aviation_delay =
                            (distance / aviation_speed / 24.0 / delta_t).round() as TransportDelay;
                        add_pair_connection(
                            &mut geo_connections,
                            &mut routes,
                            i,
                            j,
                            ConnectionKind::Aviation,
                            aviation_delay,
                            TransportType::Aviation,
                        );
                    }
                }
            }
            TransportSpec::Topology(topology) => {
                self.build_topology_routes(
                    topology,
                    &mut routes,
                    &mut locations,
                    &mut geo_connections,
                )?;
            }
        }
        Ok((routes, locations, geo_connections))
    }

    /// Cheapest-path routing over a typed node topology. Region nodes map to
    /// model regions by name; sea and port nodes become geography locations,
    /// pruned again when no route uses them.
    fn build_topology_routes(
        &self,
        topology: &TransportTopology,
        routes: &mut HashMap<(usize, usize, TransportType), Vec<RouteHop>>,
        locations: &mut Vec<GeoLocation>,
        geo_connections: &mut Vec<GeoConnection>,
    ) -> Result<(), ModelError> {
        let delta_t = self.delta_t.get();
        let node_count = topology.nodes.len();
        if topology.connected.len() != node_count
            || topology.connected.iter().any(|row| row.len() != node_count)
        {
            return Err(ModelError::Config(
                "transport matrix dimension does not match node count".into(),
            ));
        }
        for i in 0..node_count {
            for j in 0..node_count {
                if topology.connected[i][j] != topology.connected[j][i] {
                    return Err(ModelError::Config("transport matrix is not symmetric".into()));
                }
            }
        }

        // node → model entity (regions by name, sea/port appended locations)
        let mut node_entity: Vec<Option<GeoEntityRef>> = Vec::with_capacity(node_count);
        let mut node_delay: Vec<TransportDelay> = Vec::with_capacity(node_count);
        let mut node_region: Vec<Option<usize>> = Vec::with_capacity(node_count);
        for node in &topology.nodes {
            match node.kind {
                TransportNodeKind::Region => {
                    match self.regions.iter().position(|r| r.name == node.name) {
                        Some(region) => {
                            node_entity.push(Some(GeoEntityRef::Region(RegionId(region))));
                            node_region.push(Some(region));
                        }
                        None => {
                            tracing::warn!(
                                target: "transport",
                                node = %node.name,
                                "geographic region not used by economy"
                            );
                            node_entity.push(None);
                            node_region.push(None);
                        }
                    }
                    node_delay.push(0);
                }
                TransportNodeKind::Sea => {
                    let id = LocationId(locations.len());
                    locations.push(GeoLocation {
                        name: node.name.clone(),
                        kind: LocationKind::Sea,
                        delay: 0,
                        centroid: Some(GeoPoint::new(node.lon, node.lat)),
                    });
                    node_entity.push(Some(GeoEntityRef::Location(id)));
                    node_region.push(None);
                    node_delay.push(0);
                }
                TransportNodeKind::Port => {
                    let id = LocationId(locations.len());
                    locations.push(GeoLocation {
                        name: node.name.clone(),
                        kind: LocationKind::Port,
                        delay: topology.port_delay,
                        centroid: Some(GeoPoint::new(node.lon, node.lat)),
                    });
                    node_entity.push(Some(GeoEntityRef::Location(id)));
                    node_region.push(None);
                    node_delay.push(topology.port_delay);
                }
            }
        }

        // concrete edges with costs in integer micro-units for the search
        let mut edge_connection: HashMap<(usize, usize), GeoConnectionId> = HashMap::new();
        let mut edge_cost: HashMap<(usize, usize), u64> = HashMap::new();
        for i in 0..node_count {
            for j in (i + 1)..node_count {
                if !topology.connected[i][j]
                    || node_entity[i].is_none()
                    || node_entity[j].is_none()
                {
                    continue;
                }
                let a = &topology.nodes[i];
                let b = &topology.nodes[j];
                let distance =
                    GeoPoint::new(a.lon, a.lat).distance_to(&GeoPoint::new(b.lon, b.lat));
                let sea = a.kind == TransportNodeKind::Sea || b.kind == TransportNodeKind::Sea;
                let (kind, speed, km_costs) = if sea {
                    (
                        ConnectionKind::SeaRoute,
                        topology.sea_speed,
                        topology.sea_km_costs,
                    )
                } else {
                    (
                        ConnectionKind::Road,
                        topology.road_speed,
                        topology.road_km_costs,
                    )
                };
                let delay = (distance / speed / 24.0 / delta_t).round() as TransportDelay;
                let id = GeoConnectionId(geo_connections.len());
                geo_connections.push(GeoConnection {
                    kind,
                    delay,
                    endpoints: (node_entity[i].unwrap(), node_entity[j].unwrap()),
                });
                let cost = (km_costs * distance * 1e6).round() as u64;
                edge_connection.insert((i, j), id);
                edge_connection.insert((j, i), id);
                edge_cost.insert((i, j), cost);
                edge_cost.insert((j, i), cost);
            }
        }

        let region_nodes: Vec<usize> = (0..node_count)
            .filter(|&i| node_region[i].is_some())
            .collect();
        for &from in &region_nodes {
            for &to in &region_nodes {
                if from == to {
                    continue;
                }
                let path = dijkstra(
                    &from,
                    |&node| {
                        let edge_cost = &edge_cost;
                        (0..node_count)
                            .filter(move |&next| edge_cost.contains_key(&(node, next)))
                            .map(move |next| (next, edge_cost[&(node, next)]))
                    },
                    |&node| node == to,
                );
                let Some((path, _)) = path else {
                    return Err(ModelError::Graph(format!(
                        "no roadsea transport connection from {} to {}",
                        topology.nodes[from].name, topology.nodes[to].name
                    )));
                };
                let mut hops = Vec::new();
                for window in path.windows(2) {
                    let (a, b) = (window[0], window[1]);
                    let connection = edge_connection[&(a, b)];
                    hops.push(RouteHop {
                        entity: GeoEntityRef::Connection(connection),
                        delay: geo_connections[connection.0].delay,
                    });
                    if b != to {
                        hops.push(RouteHop {
                            entity: node_entity[b].unwrap(),
                            delay: node_delay[b],
                        });
                    }
                }
                routes.insert(
                    (
                        node_region[from].unwrap(),
                        node_region[to].unwrap(),
                        TransportType::RoadSea,
                    ),
                    hops,
                );
            }
        }

        // direct aviation lanes between every pair of economic regions
        for (a, &from) in region_nodes.iter().enumerate() {
            for &to in region_nodes.iter().skip(a + 1) {
                let na = &topology.nodes[from];
                let nb = &topology.nodes[to];
                let distance =
                    GeoPoint::new(na.lon, na.lat).distance_to(&GeoPoint::new(nb.lon, nb.lat));
                let delay =
                    (distance / topology.aviation_speed / 24.0 / delta_t).round() as TransportDelay;
                let id = GeoConnectionId(geo_connections.len());
                geo_connections.push(GeoConnection {
                    kind: ConnectionKind::Aviation,
                    delay,
                    endpoints: (node_entity[from].unwrap(), node_entity[to].unwrap()),
                });
                let hop = RouteHop {
                    entity: GeoEntityRef::Connection(id),
                    delay,
                };
                let (ra, rb) = (node_region[from].unwrap(), node_region[to].unwrap());
                routes.insert((ra, rb, TransportType::Aviation), vec![hop.clone()]);
                routes.insert((rb, ra, TransportType::Aviation), vec![hop]);
            }
        }
        Ok(())
    }

    // --- freeze ----------------------------------------------------------

    #[allow(clippy::type_complexity)]
    fn freeze(
        self,
        (routes, locations, geo_connections): (
            HashMap<(usize, usize, TransportType), Vec<RouteHop>>,
            Vec<GeoLocation>,
            Vec<GeoConnection>,
        ),
    ) -> Result<Model, ModelError> {
        let mut model = Model::empty(self.parameters, self.delta_t);
        model.locations = locations;
        model.geo_connections = geo_connections;

        for spec in &self.sectors {
            model.sectors.push(Sector::new(
                spec.name.clone(),
                spec.transport_type,
                spec.upper_storage_limit,
                spec.baseline_storage_fill_factor,
                spec.parameters.clone(),
            ));
        }
        for (r, spec) in self.regions.iter().enumerate() {
            let mut region = Region::new(spec.name.clone(), spec.centroid);
            for (&(from, to, transport_type), hops) in &routes {
                if from == r {
                    region.routes.insert(
                        (RegionId(to), transport_type),
                        GeoRoute {
                            path: hops.iter().map(|h| h.entity).collect(),
                        },
                    );
                }
            }
            if spec.with_government {
                *region.government.lock().unwrap() = Some(Government::new());
            }
            model.regions.push(region);
        }

        // stable index assignment
        let mut agent_ids: SecondaryMap<AgentKey, AgentId> = SecondaryMap::new();
        for (key, spec) in &self.agents {
            let id = AgentId(agent_ids.len());
            agent_ids.insert(key, id);
            model.regions[spec.region].agents.push(id);
            if let AgentSpecKind::Firm { sector } = &spec.kind {
                model.sectors[*sector].firms.push(id);
            }
        }

        // per-buyer storages, grouped by the selling sector, ordered by it
        let mut storage_ids: HashMap<(AgentKey, usize), StorageId> = HashMap::new();
        let mut buyer_sectors: HashMap<AgentKey, Vec<usize>> = HashMap::new();
        for connection in self.connections.values() {
            let AgentSpecKind::Firm { sector } = self.agents[connection.seller].kind else {
                unreachable!("sellers are validated as firms");
            };
            let sectors = buyer_sectors.entry(connection.buyer).or_default();
            if !sectors.contains(&sector) {
                sectors.push(sector);
            }
        }
        for sectors in buyer_sectors.values_mut() {
            sectors.sort_unstable();
        }
        let mut next_storage = 0usize;
        let mut agent_storage_sectors: SecondaryMap<AgentKey, Vec<usize>> = SecondaryMap::new();
        for (key, _) in &self.agents {
            let sectors = buyer_sectors.remove(&key).unwrap_or_default();
            for &sector in &sectors {
                storage_ids.insert((key, sector), StorageId(next_storage));
                next_storage += 1;
            }
            agent_storage_sectors.insert(key, sectors);
        }
        model.inflows = (0..next_storage).map(|_| std::sync::Mutex::new(Flow::ZERO)).collect();

        // firm indices for the supply channel arena
        let mut firm_indices: SecondaryMap<AgentKey, FirmIndex> = SecondaryMap::new();
        for (key, spec) in &self.agents {
            if matches!(spec.kind, AgentSpecKind::Firm { .. }) {
                let index = FirmIndex(firm_indices.len());
                firm_indices.insert(key, index);
            }
        }

        // connection arena with transport chains
        let mut incoming: SecondaryMap<AgentKey, Vec<ConnectionId>> = SecondaryMap::new();
        let mut outgoing: SecondaryMap<AgentKey, Vec<ConnectionId>> = SecondaryMap::new();
        for spec in self.connections.values() {
            let id = ConnectionId(model.connections.len());
            let seller_spec = &self.agents[spec.seller];
            let buyer_spec = &self.agents[spec.buyer];
            let AgentSpecKind::Firm { sector } = seller_spec.kind else {
                unreachable!("sellers are validated as firms");
            };
            let storage_id = storage_ids[&(spec.buyer, sector)];
            let slot = agent_storage_sectors[spec.buyer]
                .iter()
                .position(|&s| s == sector)
                .unwrap();
            let domestic = seller_spec.region == buyer_spec.region;
            let transport_type = self.sectors[sector].transport_type;
            let links = if transport_type == TransportType::Immediate || domestic {
                vec![TransportChainLink::new(0, spec.flow, None)]
            } else {
                let hops = routes
                    .get(&(seller_spec.region, buyer_spec.region, transport_type))
                    .ok_or_else(|| {
                        ModelError::Graph(format!(
                            "no transport data from {} to {} via {}",
                            self.regions[seller_spec.region].name,
                            self.regions[buyer_spec.region].name,
                            transport_type.name()
                        ))
                    })?;
                hops.iter()
                    .map(|hop| TransportChainLink::new(hop.delay, spec.flow, Some(hop.entity)))
                    .collect()
            };
            for (link_index, link) in links.iter().enumerate() {
                if let Some(entity) = link.geo {
                    model
                        .geo_link_index
                        .entry(entity)
                        .or_default()
                        .push((id, link_index));
                }
            }
            model.connections.push(BusinessConnection {
                id,
                seller: agent_ids[spec.seller],
                seller_firm: firm_indices[spec.seller],
                buyer: agent_ids[spec.buyer],
                buyer_storage_slot: slot,
                buyer_storage: storage_id,
                domestic,
            });
            model
                .conn_states
                .push(std::sync::Mutex::new(ConnectionState::new(spec.flow, links)));
            incoming
                .entry(spec.buyer)
                .unwrap()
                .or_insert_with(Vec::new)
                .push(id);
            outgoing
                .entry(spec.seller)
                .unwrap()
                .or_insert_with(Vec::new)
                .push(id);
        }

        // agent arena with states
        for (key, spec) in &self.agents {
            let region = RegionId(spec.region);
            let incoming_ids = incoming.get(key).cloned().unwrap_or_default();
            let storage_sectors = agent_storage_sectors[key].clone();

            // baseline input per storage
            let mut baseline_inputs: Vec<Flow> = vec![Flow::ZERO; storage_sectors.len()];
            for &cid in &incoming_ids {
                let slot = model.connections[cid.0].buyer_storage_slot;
                baseline_inputs[slot] += model.conn_states[cid.0].lock().unwrap().baseline_flow;
            }

            match &spec.kind {
                AgentSpecKind::Firm { sector } => {
                    let outgoing_ids = outgoing.get(key).cloned().unwrap_or_default();
                    let baseline_production: Flow = outgoing_ids
                        .iter()
                        .fold(Flow::ZERO, |acc, c| {
                            acc + model.conn_states[c.0].lock().unwrap().baseline_flow
                        });
                    let baseline_use: Flow =
                        baseline_inputs.iter().fold(Flow::ZERO, |acc, f| acc + *f);
                    let self_supply = outgoing_ids
                        .iter()
                        .find(|&&c| model.connections[c.0].buyer == agent_ids[key])
                        .copied();

                    let mut storages = Vec::with_capacity(storage_sectors.len());
                    let mut unit_commodity_costs = Price::new(0.0);
                    for (slot, &storage_sector) in storage_sectors.iter().enumerate() {
                        let mut storage = Storage::new(
                            SectorId(storage_sector),
                            storage_ids[&(key, storage_sector)],
                            baseline_inputs[slot],
                            self.sectors[storage_sector].baseline_storage_fill_factor,
                            StorageParameters::default(),
                        );
                        storage.technology_coefficient = baseline_inputs[slot].quantity()
                            / baseline_production.quantity();
                        storage.connections = incoming_ids
                            .iter()
                            .filter(|&&c| model.connections[c.0].buyer_storage_slot == slot)
                            .copied()
                            .collect();
                        unit_commodity_costs +=
                            Price::new(1.0) * storage.technology_coefficient;
                        storages.push(storage);
                    }

                    let sector_parameters = &self.sectors[*sector].parameters;
                    let mut sales =
                        SalesState::new(unit_commodity_costs, sector_parameters.baseline_markup);
                    let beta = sector_parameters.possible_overcapacity_ratio;
                    let n_c = sales.baseline_unit_commodity_costs
                        + sales.baseline_unit_variable_production_costs;
                    let mut estimated = baseline_production.scaled_by(beta).round();
                    estimated.set_price(n_c);
                    sales.estimated_possible_production = estimated;

                    model.supply_channels.push(SupplyChannel::new(
                        SupplyParameters {
                            offer_price: Price::new(1.0),
                            production: baseline_production,
                            expected_production: baseline_production,
                            possible_production: estimated,
                        },
                        baseline_production,
                    ));

                    model.agents.push(EconomicAgent {
                        name: spec.name.clone(),
                        region,
                        forcing: 1.0,
                        kind: AgentKindInfo::Firm(FirmInfo {
                            sector: SectorId(*sector),
                            index: firm_indices[key],
                            agent_index: agent_ids[key].0,
                            baseline_production,
                            baseline_use,
                            sales_connections: outgoing_ids,
                            self_supply,
                        }),
                    });
                    model
                        .agent_states
                        .push(std::sync::Mutex::new(AgentState::Firm(FirmState::new(
                            baseline_production,
                            storages,
                            sales,
                        ))));
                }
                AgentSpecKind::Consumer {
                    baskets,
                    inter_basket_substitution,
                    utilitarian,
                    consumption_price_elasticity,
                } => {
                    let mut storages = Vec::with_capacity(storage_sectors.len());
                    for (slot, &storage_sector) in storage_sectors.iter().enumerate() {
                        let mut storage = Storage::new(
                            SectorId(storage_sector),
                            storage_ids[&(key, storage_sector)],
                            baseline_inputs[slot],
                            self.sectors[storage_sector].baseline_storage_fill_factor,
                            StorageParameters {
                                consumption_price_elasticity: *consumption_price_elasticity,
                            },
                        );
                        storage.connections = incoming_ids
                            .iter()
                            .filter(|&&c| model.connections[c.0].buyer_storage_slot == slot)
                            .copied()
                            .collect();
                        storages.push(storage);
                    }
                    let info = ConsumerInfo {
                        baskets: baskets
                            .iter()
                            .map(|(sectors, sigma)| ConsumerBasket {
                                sectors: sectors.iter().map(|&s| SectorId(s)).collect(),
                                intra_basket_substitution: *sigma,
                            })
                            .collect(),
                        inter_basket_substitution: *inter_basket_substitution,
                        utilitarian: *utilitarian,
                    };
                    let state = ConsumerState::initialize(&info, storages);
                    model.agents.push(EconomicAgent {
                        name: spec.name.clone(),
                        region,
                        forcing: 1.0,
                        kind: AgentKindInfo::Consumer(info),
                    });
                    model
                        .agent_states
                        .push(std::sync::Mutex::new(AgentState::Consumer(state)));
                }
            }
        }

        // the inflow write registers hand over at the first tick boundary,
        // so they start at baseline like the storages' read registers
        for state in &model.agent_states {
            let state = state.lock().unwrap();
            for storage in state.storages() {
                *model.inflows[storage.id.0].lock().unwrap() = storage.baseline_input_flow;
            }
        }

        model.set_step(IterationStep::Cleanup);
        Ok(model)
    }
}

/// Drops geography entities no route references and remaps the survivors'
/// indices; connection endpoints can only reference surviving entities
/// because a kept connection's intermediate endpoints are themselves hops.
#[allow(clippy::type_complexity)]
fn prune_geography(
    (mut routes, locations, geo_connections): (
        HashMap<(usize, usize, TransportType), Vec<RouteHop>>,
        Vec<GeoLocation>,
        Vec<GeoConnection>,
    ),
) -> (
    HashMap<(usize, usize, TransportType), Vec<RouteHop>>,
    Vec<GeoLocation>,
    Vec<GeoConnection>,
) {
    let mut location_used = vec![false; locations.len()];
    let mut connection_used = vec![false; geo_connections.len()];
    for hops in routes.values() {
        for hop in hops {
            match hop.entity {
                GeoEntityRef::Location(id) => location_used[id.0] = true,
                GeoEntityRef::Connection(id) => connection_used[id.0] = true,
                GeoEntityRef::Region(_) => {}
            }
        }
    }

    let mut location_remap = vec![None; locations.len()];
    let mut kept_locations = Vec::new();
    for (i, location) in locations.into_iter().enumerate() {
        if location_used[i] {
            location_remap[i] = Some(LocationId(kept_locations.len()));
            kept_locations.push(location);
        }
    }
    let mut connection_remap = vec![None; geo_connections.len()];
    let mut kept_connections = Vec::new();
    for (i, connection) in geo_connections.into_iter().enumerate() {
        if connection_used[i] {
            connection_remap[i] = Some(GeoConnectionId(kept_connections.len()));
            kept_connections.push(connection);
        }
    }

    let remap = |entity: GeoEntityRef| match entity {
        GeoEntityRef::Location(id) => GeoEntityRef::Location(location_remap[id.0].unwrap()),
        GeoEntityRef::Connection(id) => GeoEntityRef::Connection(connection_remap[id.0].unwrap()),
        region => region,
    };
    for connection in &mut kept_connections {
        connection.endpoints = (remap(connection.endpoints.0), remap(connection.endpoints.1));
    }
    for hops in routes.values_mut() {
        for hop in hops.iter_mut() {
            hop.entity = remap(hop.entity);
        }
    }
    (routes, kept_locations, kept_connections)
}
