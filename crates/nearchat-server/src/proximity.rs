//! Who is within earshot of a point.
//!
//! Linear scan over a registry snapshot. The snapshot is taken under the
//! registry lock; distances are computed after it is released.

use std::sync::Arc;

use nearchat_shared::constants::{PROXIMITY_EPSILON_M, PROXIMITY_RADIUS_M};
use nearchat_shared::protocol::NearbyUser;
use nearchat_shared::{ConnectionId, Position};

use crate::registry::{Entry, Registry};

/// A peer found within the radius of some origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityResult {
    pub id: ConnectionId,
    pub name: String,
    /// Rounded to the nearest whole meter.
    pub distance: u32,
    pub position: Position,
}

impl From<&ProximityResult> for NearbyUser {
    fn from(r: &ProximityResult) -> Self {
        NearbyUser {
            socket_id: r.id,
            username: r.name.clone(),
            distance: r.distance,
            latitude: r.position.latitude(),
            longitude: r.position.longitude(),
        }
    }
}

/// Whether a computed distance counts as nearby.
pub fn within_radius(distance_m: f64, radius_m: f64) -> bool {
    distance_m <= radius_m + PROXIMITY_EPSILON_M
}

/// Entries of `snapshot` within `radius_m` of `origin`, excluding `exclude`
/// and anything without a position. Order is unspecified.
pub fn nearby_in(
    snapshot: &[Entry],
    origin: &Position,
    exclude: &ConnectionId,
    radius_m: f64,
) -> Vec<ProximityResult> {
    snapshot
        .iter()
        .filter(|entry| entry.id != *exclude)
        .filter_map(|entry| {
            let position = entry.position?;
            let distance = origin.distance_to(&position);
            within_radius(distance, radius_m).then(|| ProximityResult {
                id: entry.id,
                name: entry.name.clone(),
                distance: distance.round() as u32,
                position,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ProximityResolver {
    registry: Arc<Registry>,
    radius_m: f64,
}

impl ProximityResolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            radius_m: PROXIMITY_RADIUS_M,
        }
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    pub async fn find_nearby(
        &self,
        origin: &Position,
        exclude: &ConnectionId,
    ) -> Vec<ProximityResult> {
        let snapshot = self.registry.snapshot().await;
        nearby_in(&snapshot, origin, exclude, self.radius_m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nearchat_shared::constants::EARTH_RADIUS_M;

    /// Longitude offset on the equator that is `meters` away from (0, 0).
    fn lon_for_meters(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    fn entry(name: &str, position: Option<(f64, f64)>) -> Entry {
        Entry {
            id: ConnectionId::new(),
            name: name.to_string(),
            position: position.map(|(lat, lon)| Position::new(lat, lon).unwrap()),
            last_seen: Utc::now(),
        }
    }

    fn names(results: &[ProximityResult]) -> Vec<String> {
        let mut names: Vec<_> = results.iter().map(|r| r.name.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_same_spot_is_nearby() {
        let a = entry("a", Some((37.5, 127.0)));
        let b = entry("b", Some((37.5, 127.0)));
        let snapshot = vec![a.clone(), b.clone()];

        let from_a = nearby_in(&snapshot, &a.position.unwrap(), &a.id, 30.0);
        let from_b = nearby_in(&snapshot, &b.position.unwrap(), &b.id, 30.0);
        assert_eq!(names(&from_a), vec!["b"]);
        assert_eq!(names(&from_b), vec!["a"]);
        assert_eq!(from_a[0].distance, 0);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let origin = entry("origin", Some((0.0, 0.0)));
        let at_30 = entry("at_30", Some((0.0, lon_for_meters(30.0))));
        let under = entry("under", Some((0.0, lon_for_meters(29.5))));
        let at_31 = entry("at_31", Some((0.0, lon_for_meters(31.0))));
        let snapshot = vec![origin.clone(), at_30.clone(), under, at_31.clone()];

        let found = nearby_in(&snapshot, &origin.position.unwrap(), &origin.id, 30.0);
        assert_eq!(names(&found), vec!["at_30", "under"]);

        let from_edge = nearby_in(&snapshot, &at_30.position.unwrap(), &at_30.id, 30.0);
        assert!(names(&from_edge).contains(&"origin".to_string()));

        let from_far = nearby_in(&snapshot, &at_31.position.unwrap(), &at_31.id, 30.0);
        assert!(!names(&from_far).contains(&"origin".to_string()));
    }

    #[test]
    fn test_excludes_self_and_unpositioned() {
        let me = entry("me", Some((1.0, 1.0)));
        let ghost = entry("ghost", None);
        let snapshot = vec![me.clone(), ghost];

        let found = nearby_in(&snapshot, &me.position.unwrap(), &me.id, 30.0);
        assert!(found.is_empty());
    }

    #[test]
    fn test_distance_is_rounded() {
        let origin = entry("origin", Some((0.0, 0.0)));
        let b = entry("b", Some((0.0, 0.0002)));
        let found = nearby_in(&[origin.clone(), b], &origin.position.unwrap(), &origin.id, 30.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].distance, 22);

        let wire = NearbyUser::from(&found[0]);
        assert_eq!(wire.distance, 22);
        assert_eq!(wire.longitude, 0.0002);
    }

    #[tokio::test]
    async fn test_resolver_reads_live_registry() {
        let registry = Arc::new(Registry::new());
        let resolver = ProximityResolver::new(registry.clone());
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.register(a, "a", 0.0, 0.0).await.unwrap();
        registry.register(b, "b", 0.0, 0.0001).await.unwrap();

        let origin = Position::new(0.0, 0.0).unwrap();
        assert_eq!(resolver.find_nearby(&origin, &a).await.len(), 1);

        registry.update_position(b, 0.0, 0.01).await.unwrap();
        assert!(resolver.find_nearby(&origin, &a).await.is_empty());
        assert_eq!(resolver.radius_m(), 30.0);
    }
}
