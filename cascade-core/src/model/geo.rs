//! Geography: locations, connections, precomputed routes.
//!
//! Regions, seas and ports are locations; roads, sea routes and aviation
//! lanes are connections between them. A [`GeoRoute`] is the frozen cheapest
//! path between two regions for one transport mode; business connections
//! instantiate their transport chains from it at build time.

use serde::{Deserialize, Serialize};

use super::{GeoConnectionId, LocationId, RegionId};
use crate::types::{FloatType, TransportDelay};

/// Transport mode of a sector's goods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Aviation,
    RoadSea,
    Immediate,
}

impl TransportType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aviation" => Some(Self::Aviation),
            "roadsea" => Some(Self::RoadSea),
            "immediate" => Some(Self::Immediate),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Aviation => "aviation",
            Self::RoadSea => "roadsea",
            Self::Immediate => "immediate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: FloatType,
    pub lat: FloatType,
}

impl GeoPoint {
    pub fn new(lon: FloatType, lat: FloatType) -> Self {
        Self { lon, lat }
    }

    /// Great-circle distance in km (haversine, R = 6371).
    pub fn distance_to(&self, other: &GeoPoint) -> FloatType {
        const R: FloatType = 6371.0;
        let lat_sin = ((other.lat - self.lat).to_radians() / 2.0).sin();
        let lon_sin = ((other.lon - self.lon).to_radians() / 2.0).sin();
        let a = lat_sin * lat_sin
            + other.lat.to_radians().cos() * self.lat.to_radians().cos() * lon_sin * lon_sin;
        2.0 * R * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Kind of a non-region geography node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationKind {
    Sea,
    Port,
}

/// A sea or port node of the transport topology. Regions live in their own
/// arena; routes reference both through [`GeoEntityRef`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocation {
    pub name: String,
    pub kind: LocationKind,
    pub delay: TransportDelay,
    pub centroid: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionKind {
    Road,
    Aviation,
    SeaRoute,
    Unspecified,
}

/// A concrete transport edge between two geography nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConnection {
    pub kind: ConnectionKind,
    pub delay: TransportDelay,
    pub endpoints: (GeoEntityRef, GeoEntityRef),
}

/// Typed handle to any geography entity. Routes are sequences of these, and
/// scenario passage forcing addresses one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeoEntityRef {
    Region(RegionId),
    Location(LocationId),
    Connection(GeoConnectionId),
}

/// Frozen cheapest path between two regions for one transport mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoRoute {
    pub path: Vec<GeoEntityRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Berlin to Paris is roughly 878 km.
        let berlin = GeoPoint::new(13.405, 52.52);
        let paris = GeoPoint::new(2.3522, 48.8566);
        let d = berlin.distance_to(&paris);
        assert!((d - 878.0).abs() < 10.0, "distance {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = GeoPoint::new(10.0, 45.0);
        assert!(p.distance_to(&p).abs() < 1e-9);
    }

    #[test]
    fn transport_type_names_roundtrip() {
        for t in [
            TransportType::Aviation,
            TransportType::RoadSea,
            TransportType::Immediate,
        ] {
            assert_eq!(TransportType::from_name(t.name()), Some(t));
        }
        assert_eq!(TransportType::from_name("teleport"), None);
    }
}
