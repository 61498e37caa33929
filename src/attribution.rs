//! Slope attribution: per-polygon dwell voting while riding, a transient
//! pass-through filter at run end, and a smallest-area tie-break so an
//! enclosing super-region never shadows the slope actually skied.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use geo::{Area, Contains, LineString, Point, Polygon};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::types::TrackerError;

/// Slope boundary as stored in the resort database: name, surveyed area
/// and boundary vertices as `[lat, lon, elevation]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlopeZone {
    pub name: String,
    #[serde(default)]
    pub area: f64,
    pub polygon: Vec<[f64; 3]>,
}

struct PreparedZone {
    name: String,
    area: f64,
    boundary: Polygon<f64>,
    top_altitude: f64,
    bottom_altitude: f64,
}

#[derive(Clone, Debug)]
pub struct AttributionConfig {
    /// Polygons visited less than this fraction of the maximum count are
    /// treated as transient pass-throughs.
    pub transient_ratio: f64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self { transient_ratio: 0.10 }
    }
}

/// Static-for-a-session set of candidate slope polygons.
pub struct SlopeMap {
    zones: Vec<PreparedZone>,
}

impl SlopeMap {
    pub fn new(zones: Vec<SlopeZone>) -> Self {
        let prepared = zones
            .into_iter()
            .filter(|z| z.polygon.len() >= 3)
            .map(|z| {
                let ring: Vec<(f64, f64)> =
                    z.polygon.iter().map(|v| (v[1], v[0])).collect(); // (lon, lat)
                let boundary = Polygon::new(LineString::from(ring), vec![]);
                let top = z.polygon.iter().map(|v| v[2]).fold(f64::NEG_INFINITY, f64::max);
                let bottom = z.polygon.iter().map(|v| v[2]).fold(f64::INFINITY, f64::min);
                let area = if z.area > 0.0 { z.area } else { boundary.unsigned_area() };
                PreparedZone {
                    name: z.name,
                    area,
                    boundary,
                    top_altitude: top,
                    bottom_altitude: bottom,
                }
            })
            .collect();
        Self { zones: prepared }
    }

    pub fn load_json(path: &Path) -> Result<Self, TrackerError> {
        let file = File::open(path).map_err(|e| TrackerError::Storage(e.to_string()))?;
        let zones: Vec<SlopeZone> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| TrackerError::Storage(e.to_string()))?;
        Ok(Self::new(zones))
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Descent progress through a named slope at the given altitude,
    /// clamped to [0, 1]. Display only; classification never reads it.
    pub fn progress(&self, slope_name: &str, altitude: f64) -> Option<f64> {
        let zone = self.zones.iter().find(|z| z.name == slope_name)?;
        let span = zone.top_altitude - zone.bottom_altitude;
        if span <= 0.0 {
            return Some(0.0);
        }
        Some(((zone.top_altitude - altitude) / span).clamp(0.0, 1.0))
    }
}

/// Per-run dwell counters. Reset at every run start; read out once at
/// run end.
pub struct SlopeAttributor {
    config: AttributionConfig,
    counts: Vec<u32>,
}

impl SlopeAttributor {
    pub fn new(config: AttributionConfig) -> Self {
        Self { config, counts: Vec::new() }
    }

    pub fn begin_run(&mut self, map: &SlopeMap) {
        self.counts = vec![0; map.zones.len()];
    }

    /// Count every polygon containing the sample; overlapping polygons
    /// all increment.
    pub fn observe(&mut self, map: &SlopeMap, latitude: f64, longitude: f64) {
        let point = Point::new(longitude, latitude);
        for (i, zone) in map.zones.iter().enumerate() {
            if zone.boundary.contains(&point) {
                if let Some(c) = self.counts.get_mut(i) {
                    *c += 1;
                }
            }
        }
    }

    /// Pick the attributed slope: drop transient visits, then prefer the
    /// smallest surviving polygon. `None` when nothing survives.
    pub fn finalize(&mut self, map: &SlopeMap) -> Option<String> {
        let counts = std::mem::take(&mut self.counts);
        let max = counts.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return None;
        }
        let floor = (max as f64 * self.config.transient_ratio).ceil() as u32;
        let winner = counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c >= floor.max(1))
            .min_by(|(a, _), (b, _)| {
                map.zones[*a]
                    .area
                    .partial_cmp(&map.zones[*b].area)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| map.zones[i].name.clone());
        debug!("slope attribution: {:?} (max dwell {})", winner, max);
        winner
    }
}
