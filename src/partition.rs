//! # Partition / Sort / Group
//!
//! The ordering contract the segmentation state machine depends on:
//!
//! | Step | Function | Guarantee |
//! |------|----------|-----------|
//! | Partition | [`partition_for`] | every record of a vehicle lands on one worker |
//! | Sort | [`VehicleKey`] ordering | `(vehicle_id, start_timestamp)` ascending |
//! | Group | [`group_by_vehicle`] | one sequence per vehicle, never split by time |
//!
//! Breaking any of the three silently produces wrong trip boundaries, since
//! the state machine has no lookahead.

use std::cmp::Ordering;
use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::{RawSegment, Timestamp};

/// Compare vehicle ids: all-numeric ids numerically and before other ids,
/// everything else lexicographically.
pub fn compare_vehicle_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Composite sort key: vehicle first, then start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleKey {
    pub vehicle_id: String,
    pub start_timestamp: Timestamp,
}

impl VehicleKey {
    pub fn of(segment: &RawSegment) -> Self {
        Self {
            vehicle_id: segment.vehicle_id.clone(),
            start_timestamp: segment.start.timestamp,
        }
    }
}

impl Ord for VehicleKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_vehicle_ids(&self.vehicle_id, &other.vehicle_id)
            .then_with(|| self.start_timestamp.cmp(&other.start_timestamp))
    }
}

impl PartialOrd for VehicleKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Worker index for a vehicle. Deterministic across runs and processes.
///
/// # Example
/// ```
/// use cab_trips::partition_for;
/// assert_eq!(partition_for("17", 4), 1);
/// assert_eq!(partition_for("abboip", 4), partition_for("abboip", 4));
/// ```
pub fn partition_for(vehicle_id: &str, partitions: usize) -> usize {
    let partitions = partitions.max(1);
    match vehicle_id.parse::<u64>() {
        Ok(n) => (n % partitions as u64) as usize,
        Err(_) => {
            let mut hasher = FxHasher::default();
            hasher.write(vehicle_id.as_bytes());
            (hasher.finish() % partitions as u64) as usize
        }
    }
}

/// Distribute segments across `partitions` buckets, keeping input order
/// within each bucket.
pub fn partition_segments(segments: Vec<RawSegment>, partitions: usize) -> Vec<Vec<RawSegment>> {
    let mut buckets: Vec<Vec<RawSegment>> = (0..partitions.max(1)).map(|_| Vec::new()).collect();
    for segment in segments {
        let idx = partition_for(&segment.vehicle_id, buckets.len());
        buckets[idx].push(segment);
    }
    buckets
}

/// All of one vehicle's segments, ascending by start time.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSequence {
    pub vehicle_id: String,
    pub segments: Vec<RawSegment>,
}

/// Sort by [`VehicleKey`] and group by vehicle id only.
///
/// The sort is stable, so segments sharing a start time keep input order.
pub fn group_by_vehicle(mut segments: Vec<RawSegment>) -> Vec<VehicleSequence> {
    segments.sort_by_cached_key(VehicleKey::of);

    let mut groups: Vec<VehicleSequence> = Vec::new();
    for segment in segments {
        match groups.last_mut() {
            Some(group) if group.vehicle_id == segment.vehicle_id => group.segments.push(segment),
            _ => groups.push(VehicleSequence {
                vehicle_id: segment.vehicle_id.clone(),
                segments: vec![segment],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoPoint, Marker, MeterStatus};

    fn seg(vehicle: &str, start: i64) -> RawSegment {
        RawSegment::new(
            vehicle,
            Marker::new(start, GeoPoint::new(37.7, -122.4), MeterStatus::Hired),
            Marker::new(start + 60, GeoPoint::new(37.71, -122.41), MeterStatus::Hired),
        )
    }

    #[test]
    fn test_numeric_ids_sort_numerically() {
        assert_eq!(compare_vehicle_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_vehicle_ids("10", "abc"), Ordering::Less);
        assert_eq!(compare_vehicle_ids("abc", "abd"), Ordering::Less);
        assert_eq!(compare_vehicle_ids("09", "9"), Ordering::Less);
        assert_eq!(compare_vehicle_ids("9", "9"), Ordering::Equal);
    }

    #[test]
    fn test_vehicle_key_order() {
        let mut keys = vec![
            VehicleKey { vehicle_id: "10".into(), start_timestamp: 5 },
            VehicleKey { vehicle_id: "9".into(), start_timestamp: 50 },
            VehicleKey { vehicle_id: "9".into(), start_timestamp: 7 },
        ];
        keys.sort();
        assert_eq!(keys[0], VehicleKey { vehicle_id: "9".into(), start_timestamp: 7 });
        assert_eq!(keys[2].vehicle_id, "10");
    }

    #[test]
    fn test_partition_is_deterministic() {
        assert_eq!(partition_for("17", 4), 1);
        assert_eq!(partition_for("17", 0), 0);
        for id in ["abboip", "udwadla", "ojumna"] {
            let p = partition_for(id, 8);
            assert!(p < 8);
            assert_eq!(p, partition_for(id, 8));
        }
    }

    #[test]
    fn test_partition_keeps_vehicle_together() {
        let segments = vec![seg("a", 0), seg("b", 0), seg("a", 100), seg("3", 0), seg("a", 50)];
        let buckets = partition_segments(segments, 3);
        assert_eq!(buckets.len(), 3);
        let holders: Vec<_> = buckets
            .iter()
            .filter(|b| b.iter().any(|s| s.vehicle_id == "a"))
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].iter().filter(|s| s.vehicle_id == "a").count(), 3);
    }

    #[test]
    fn test_group_by_vehicle_orders_by_time() {
        let segments = vec![seg("b", 300), seg("a", 200), seg("b", 100), seg("a", 0)];
        let groups = group_by_vehicle(segments);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].vehicle_id, "a");
        let starts: Vec<_> = groups[1].segments.iter().map(|s| s.start.timestamp).collect();
        assert_eq!(starts, vec![100, 300]);
    }

    #[test]
    fn test_group_by_vehicle_follows_key_order() {
        let segments = vec![seg("abc", 5), seg("10", 9), seg("9", 40), seg("10", 1), seg("9", 3)];
        let mut keys: Vec<VehicleKey> = segments.iter().map(VehicleKey::of).collect();
        keys.sort();

        let grouped: Vec<VehicleKey> = group_by_vehicle(segments)
            .iter()
            .flat_map(|g| g.segments.iter().map(VehicleKey::of))
            .collect();
        assert_eq!(grouped, keys);
    }

    #[test]
    fn test_group_keeps_input_order_for_equal_keys() {
        let mut first = seg("7", 100);
        first.end.timestamp = 130;
        let second = seg("7", 100);
        let groups = group_by_vehicle(vec![first, second]);
        assert_eq!(groups[0].segments[0].end.timestamp, 130);
        assert_eq!(groups[0].segments[1].end.timestamp, 160);
    }

    #[test]
    fn test_group_empty() {
        assert!(group_by_vehicle(Vec::new()).is_empty());
    }
}
