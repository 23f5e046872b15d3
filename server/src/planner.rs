//! Mission planner
//!
//! Partitions a surveyed area into vertical patrol bands and assigns one
//! out-and-back lap per drone, with vertical separation between drones so
//! the laps never conflict.

use std::collections::BTreeMap;

use aerolink_shared::Waypoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Meters per degree of longitude at the equator.
const METERS_PER_DEGREE: f64 = 111_320.0;
/// Minimum horizontal spacing between adjacent bands, meters.
const MIN_BAND_SPACING_M: f64 = 5.0;
/// Patrol altitude for the first drone, meters.
const BASE_ALTITUDE_M: f64 = 30.0;
/// Vertical separation between consecutive drones, meters.
const ALTITUDE_STEP_M: f64 = 5.0;
/// Substitute band step for a degenerate zero-width area, degrees.
const DEGENERATE_STEP_DEG: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("mission area needs at least 3 vertices, got {0}")]
    MalformedArea(usize),
    #[error("no drones requested for the mission")]
    NoDrones,
    #[error("band spacing {spacing_m:.2} m is below the {MIN_BAND_SPACING_M} m minimum; too many drones for this area")]
    BandTooNarrow { spacing_m: f64 },
}

/// Compute one patrol lap per drone over the bounding box of `area`.
///
/// The box is split into `2 * n` vertical bands. Drone `i` flies north along
/// the center of band `2i + 1` and returns south along the center of band
/// `2i`, at `30 + 5i` meters, so no two drones share a band or an altitude.
pub fn plan_mission(
    area: &[GeoPoint],
    drone_names: &[String],
) -> Result<BTreeMap<String, Vec<Waypoint>>, PlanError> {
    if area.len() < 3 {
        return Err(PlanError::MalformedArea(area.len()));
    }
    if drone_names.is_empty() {
        return Err(PlanError::NoDrones);
    }

    let lat_min = fold_coord(area, f64::min, |p| p.lat);
    let lat_max = fold_coord(area, f64::max, |p| p.lat);
    let lon_min = fold_coord(area, f64::min, |p| p.lon);
    let lon_max = fold_coord(area, f64::max, |p| p.lon);

    let sections = (2 * drone_names.len()) as f64;
    let lon_step = if lon_max > lon_min {
        (lon_max - lon_min) / sections
    } else {
        DEGENERATE_STEP_DEG
    };

    // Adjacent band centers are one step apart; reject plans that would put
    // drones closer than the horizontal minimum.
    let mean_lat = (lat_min + lat_max) / 2.0;
    let spacing_m = lon_step * METERS_PER_DEGREE * mean_lat.to_radians().cos();
    if spacing_m < MIN_BAND_SPACING_M {
        return Err(PlanError::BandTooNarrow { spacing_m });
    }

    let mut plan = BTreeMap::new();
    for (idx, name) in drone_names.iter().enumerate() {
        let outbound_lon = lon_min + (2.0 * idx as f64 + 1.5) * lon_step;
        let return_lon = lon_min + (2.0 * idx as f64 + 0.5) * lon_step;
        let alt = BASE_ALTITUDE_M + ALTITUDE_STEP_M * idx as f64;
        let lap = vec![
            Waypoint { lat: lat_min, lon: outbound_lon, alt },
            Waypoint { lat: lat_max, lon: outbound_lon, alt },
            Waypoint { lat: lat_max, lon: return_lon, alt },
            Waypoint { lat: lat_min, lon: return_lon, alt },
        ];
        plan.insert(name.clone(), lap);
    }
    Ok(plan)
}

fn fold_coord(area: &[GeoPoint], pick: fn(f64, f64) -> f64, coord: fn(&GeoPoint) -> f64) -> f64 {
    area.iter().map(coord).fold(coord(&area[0]), pick)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint { lat: 0.0, lon: 0.0 },
            GeoPoint { lat: 0.0, lon: 1.0 },
            GeoPoint { lat: 1.0, lon: 1.0 },
            GeoPoint { lat: 1.0, lon: 0.0 },
        ]
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("drone{i}")).collect()
    }

    #[test]
    fn two_drones_split_the_box_into_four_bands() {
        let plan = plan_mission(&square(), &names(2)).unwrap();
        assert_eq!(plan.len(), 2);

        let first = &plan["drone0"];
        let second = &plan["drone1"];
        assert_eq!(first.len(), 4);

        // Band centers at 1.5, 0.5, 3.5, 2.5 quarter-steps.
        assert!((first[0].lon - 0.375).abs() < 1e-9);
        assert!((first[2].lon - 0.125).abs() < 1e-9);
        assert!((second[0].lon - 0.875).abs() < 1e-9);
        assert!((second[2].lon - 0.625).abs() < 1e-9);

        // Out north along one band, back south along the other.
        assert_eq!(first[0].lat, 0.0);
        assert_eq!(first[1].lat, 1.0);
        assert_eq!(first[2].lat, 1.0);
        assert_eq!(first[3].lat, 0.0);
    }

    #[test]
    fn altitudes_separate_drones_vertically() {
        let plan = plan_mission(&square(), &names(3)).unwrap();
        for (i, name) in names(3).iter().enumerate() {
            for wp in &plan[name] {
                assert_eq!(wp.alt, 30.0 + 5.0 * i as f64);
            }
        }
    }

    #[test]
    fn lanes_never_overlap() {
        let plan = plan_mission(&square(), &names(4)).unwrap();
        let mut lons: Vec<f64> = plan
            .values()
            .flat_map(|lap| [lap[0].lon, lap[2].lon])
            .collect();
        lons.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for pair in lons.windows(2) {
            assert!(pair[1] - pair[0] > 1e-9);
        }
    }

    #[test]
    fn too_many_drones_for_a_small_area_is_rejected() {
        let area = vec![
            GeoPoint { lat: 0.0, lon: 0.0 },
            GeoPoint { lat: 0.0001, lon: 0.0001 },
            GeoPoint { lat: 0.0001, lon: 0.0 },
        ];
        let err = plan_mission(&area, &names(10)).unwrap_err();
        assert!(matches!(err, PlanError::BandTooNarrow { .. }));
    }

    #[test]
    fn degenerate_width_falls_back_to_a_fixed_step() {
        let area = vec![
            GeoPoint { lat: 0.0, lon: 4.5 },
            GeoPoint { lat: 0.5, lon: 4.5 },
            GeoPoint { lat: 1.0, lon: 4.5 },
        ];
        let plan = plan_mission(&area, &names(1)).unwrap();
        let lap = &plan["drone0"];
        assert!((lap[0].lon - (4.5 + 1.5 * DEGENERATE_STEP_DEG)).abs() < 1e-12);
        assert!((lap[2].lon - (4.5 + 0.5 * DEGENERATE_STEP_DEG)).abs() < 1e-12);
    }

    #[test]
    fn malformed_area_is_rejected() {
        let area = vec![GeoPoint { lat: 0.0, lon: 0.0 }, GeoPoint { lat: 1.0, lon: 1.0 }];
        assert_eq!(
            plan_mission(&area, &names(1)).unwrap_err(),
            PlanError::MalformedArea(2)
        );
        assert_eq!(
            plan_mission(&square(), &[]).unwrap_err(),
            PlanError::NoDrones
        );
    }
}
