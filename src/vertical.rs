//! Fused vertical signal: barometric relative altitude when the sensor is
//! present, GPS altitude otherwise. Downstream consumers read one altitude
//! and one vertical speed and never branch on the source.

use log::{debug, info};

use crate::types::{haversine_distance, BaroSample, LocationSample};

#[derive(Clone, Debug)]
pub struct VerticalConfig {
    /// Barometric samples collected before the baseline is fixed.
    pub baseline_samples: usize,
    /// Drift correction runs only when run start/end displacement is
    /// within this, meters.
    pub drift_max_displacement_m: f64,
    /// ... and the GPS altitude delta is within this, meters.
    pub drift_max_gps_delta_m: f64,
    /// Fraction of the estimated drift applied at run end.
    pub drift_correction_factor: f64,
    /// Resting-only blend toward GPS altitude, meters per second.
    pub rest_blend_rate: f64,
}

impl Default for VerticalConfig {
    fn default() -> Self {
        Self {
            baseline_samples: 5,
            drift_max_displacement_m: 100.0,
            drift_max_gps_delta_m: 5.0,
            drift_correction_factor: 0.5,
            rest_blend_rate: 0.05,
        }
    }
}

/// Per-run vertical totals, produced at run end.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunVertical {
    pub gain: f64,
    pub drop: f64,
}

#[derive(Clone, Copy, Debug)]
struct RunStart {
    latitude: f64,
    longitude: f64,
    gps_altitude: Option<f64>,
    altitude: f64,
}

pub struct VerticalEstimator {
    config: VerticalConfig,
    baro_available: bool,

    baseline_buf: Vec<f64>,
    baseline: Option<f64>,
    /// Accumulated drift/blend correction, added to the barometric signal.
    offset: f64,

    altitude: Option<f64>,
    last_alt_ts: Option<f64>,
    vertical_speed: f64,

    run_gain: f64,
    run_drop: f64,
    run_active: bool,
    run_start: Option<RunStart>,

    /// Reference pairing of GPS and fused altitude, taken at the first
    /// fix after the baseline exists. Anchors the resting-time blend.
    gps_ref: Option<(f64, f64)>,
    last_gps: Option<LocationSample>,
    last_blend_ts: Option<f64>,
}

impl VerticalEstimator {
    /// `baro_available` is the platform availability flag, queried once
    /// at session start.
    pub fn new(baro_available: bool, config: VerticalConfig) -> Self {
        Self {
            config,
            baro_available,
            baseline_buf: Vec::new(),
            baseline: None,
            offset: 0.0,
            altitude: None,
            last_alt_ts: None,
            vertical_speed: 0.0,
            run_gain: 0.0,
            run_drop: 0.0,
            run_active: false,
            run_start: None,
            gps_ref: None,
            last_gps: None,
            last_blend_ts: None,
        }
    }

    pub fn is_baro_available(&self) -> bool {
        self.baro_available
    }

    /// Current fused altitude, meters. Relative in barometric mode,
    /// absolute in GPS mode; consumers only use deltas.
    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    pub fn vertical_speed(&self) -> f64 {
        self.vertical_speed
    }

    pub fn feed_baro(&mut self, sample: &BaroSample) {
        if !self.baro_available {
            return;
        }
        if self.baseline.is_none() {
            self.baseline_buf.push(sample.relative_altitude);
            if self.baseline_buf.len() >= self.config.baseline_samples {
                let baseline = median(&mut self.baseline_buf);
                debug!("barometric baseline fixed at {:.2} m", baseline);
                self.baseline = Some(baseline);
                self.altitude = Some(sample.relative_altitude - baseline);
                self.last_alt_ts = Some(sample.timestamp);
            }
            return;
        }
        let baseline = self.baseline.unwrap_or(0.0);
        let alt = sample.relative_altitude - baseline + self.offset;
        self.update_altitude(sample.timestamp, alt);
    }

    /// Feed an accepted location sample. In GPS-fallback mode this drives
    /// the altitude signal; in barometric mode it anchors drift handling
    /// and, while `resting`, the bounded blend toward GPS altitude.
    pub fn feed_location(&mut self, sample: &LocationSample, resting: bool) {
        if !self.baro_available {
            self.update_altitude(sample.timestamp, sample.altitude);
            self.last_gps = Some(sample.clone());
            return;
        }

        if let Some(alt) = self.altitude {
            if self.gps_ref.is_none() {
                self.gps_ref = Some((sample.altitude, alt));
            }
            if resting {
                if let (Some((ref_gps, ref_alt)), Some(last_ts)) = (self.gps_ref, self.last_blend_ts)
                {
                    let dt = (sample.timestamp - last_ts).max(0.0);
                    let target = (sample.altitude - ref_gps) + ref_alt;
                    let err = target - alt;
                    let step = err.clamp(
                        -self.config.rest_blend_rate * dt,
                        self.config.rest_blend_rate * dt,
                    );
                    if step != 0.0 {
                        self.offset += step;
                        self.altitude = Some(alt + step);
                    }
                }
                self.last_blend_ts = Some(sample.timestamp);
            } else {
                self.last_blend_ts = None;
            }
        }
        self.last_gps = Some(sample.clone());
    }

    fn update_altitude(&mut self, timestamp: f64, altitude: f64) {
        if let (Some(prev_alt), Some(prev_ts)) = (self.altitude, self.last_alt_ts) {
            let dt = timestamp - prev_ts;
            if dt > 0.0 {
                let delta = altitude - prev_alt;
                self.vertical_speed = delta / dt;
                if self.run_active {
                    if delta > 0.0 {
                        self.run_gain += delta;
                    } else {
                        self.run_drop -= delta;
                    }
                }
            }
        }
        self.altitude = Some(altitude);
        self.last_alt_ts = Some(timestamp);
    }

    /// Reset the per-run integrators and remember the run anchor for the
    /// end-of-run drift estimate.
    pub fn begin_run(&mut self) {
        self.run_gain = 0.0;
        self.run_drop = 0.0;
        self.run_active = true;
        self.run_start = match (&self.last_gps, self.altitude) {
            (Some(gps), Some(alt)) => Some(RunStart {
                latitude: gps.latitude,
                longitude: gps.longitude,
                gps_altitude: Some(gps.altitude),
                altitude: alt,
            }),
            (None, Some(alt)) => Some(RunStart {
                latitude: 0.0,
                longitude: 0.0,
                gps_altitude: None,
                altitude: alt,
            }),
            _ => None,
        };
    }

    /// Seal the run integrators and apply the partial drift correction
    /// when the run looks like a closed loop.
    pub fn end_run(&mut self) -> RunVertical {
        let result = RunVertical { gain: self.run_gain, drop: self.run_drop };
        self.run_active = false;

        if self.baro_available {
            if let (Some(start), Some(end_gps), Some(alt)) =
                (self.run_start.take(), self.last_gps.clone(), self.altitude)
            {
                if let Some(start_gps_alt) = start.gps_altitude {
                    let displacement = haversine_distance(
                        start.latitude,
                        start.longitude,
                        end_gps.latitude,
                        end_gps.longitude,
                    );
                    let gps_delta = end_gps.altitude - start_gps_alt;
                    if displacement <= self.config.drift_max_displacement_m
                        && gps_delta.abs() <= self.config.drift_max_gps_delta_m
                    {
                        let baro_delta = alt - start.altitude;
                        let drift = gps_delta - baro_delta;
                        let applied = drift * self.config.drift_correction_factor;
                        if applied.abs() > f64::EPSILON {
                            info!(
                                "barometric drift correction: drift {:.2} m, applied {:.2} m",
                                drift, applied
                            );
                            self.offset += applied;
                            self.altitude = Some(alt + applied);
                        }
                    }
                }
            }
        } else {
            self.run_start = None;
        }
        self.run_gain = 0.0;
        self.run_drop = 0.0;
        result
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values[values.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn baro(ts: f64, alt: f64) -> BaroSample {
        BaroSample { timestamp: ts, relative_altitude: alt }
    }

    fn fix(ts: f64, lat: f64, lon: f64, alt: f64) -> LocationSample {
        LocationSample {
            timestamp: ts,
            latitude: lat,
            longitude: lon,
            speed: 0.0,
            horizontal_accuracy: 5.0,
            speed_accuracy: 1.0,
            course: 0.0,
            altitude: alt,
        }
    }

    fn seed_baseline(est: &mut VerticalEstimator) {
        // Median of the first 5 samples ignores the outlier
        for (i, v) in [0.1, -0.2, 8.0, 0.0, 0.2].iter().enumerate() {
            est.feed_baro(&baro(i as f64, *v));
        }
    }

    #[test]
    fn test_baseline_is_median() {
        let mut est = VerticalEstimator::new(true, VerticalConfig::default());
        seed_baseline(&mut est);
        // Baseline 0.1, last sample 0.2 -> altitude 0.1
        assert_relative_eq!(est.altitude().unwrap(), 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_run_integrators_split_gain_and_drop() {
        let mut est = VerticalEstimator::new(true, VerticalConfig::default());
        seed_baseline(&mut est);
        est.begin_run();
        est.feed_baro(&baro(10.0, -5.0));
        est.feed_baro(&baro(11.0, -12.0));
        est.feed_baro(&baro(12.0, -10.0));
        let v = est.end_run();
        assert_relative_eq!(v.drop, 12.2, epsilon = 1e-9);
        assert_relative_eq!(v.gain, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gps_fallback_vertical_speed() {
        let mut est = VerticalEstimator::new(false, VerticalConfig::default());
        est.feed_baro(&baro(0.0, 0.0)); // ignored without a barometer
        est.feed_location(&fix(0.0, 37.64, 128.68, 800.0), false);
        est.feed_location(&fix(2.0, 37.64, 128.68, 794.0), false);
        assert_relative_eq!(est.vertical_speed(), -3.0, epsilon = 1e-9);
        assert_relative_eq!(est.altitude().unwrap(), 794.0, epsilon = 1e-9);
    }

    #[test]
    fn test_drift_correction_on_closed_loop() {
        let mut est = VerticalEstimator::new(true, VerticalConfig::default());
        seed_baseline(&mut est);
        est.feed_location(&fix(5.0, 37.64, 128.68, 800.0), false);
        est.begin_run();
        // Baro says we dropped 4 m, GPS says we returned to the start
        est.feed_baro(&baro(10.0, -3.8));
        est.feed_location(&fix(10.0, 37.64, 128.68, 800.0), false);
        let before = est.altitude().unwrap();
        est.end_run();
        // drift = 0 - (-4) = 4, applied at 50%
        assert_relative_eq!(est.altitude().unwrap(), before + 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rest_blend_is_rate_bounded() {
        let mut est = VerticalEstimator::new(true, VerticalConfig::default());
        seed_baseline(&mut est);
        est.feed_location(&fix(10.0, 37.64, 128.68, 800.0), true);
        let alt0 = est.altitude().unwrap();
        // GPS reports 10 m higher after 20 s: blend limited to 0.05 * 20 = 1 m
        est.feed_location(&fix(30.0, 37.64, 128.68, 810.0), true);
        assert_relative_eq!(est.altitude().unwrap(), alt0 + 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_blend_outside_resting() {
        let mut est = VerticalEstimator::new(true, VerticalConfig::default());
        seed_baseline(&mut est);
        est.feed_location(&fix(10.0, 37.64, 128.68, 800.0), false);
        let alt0 = est.altitude().unwrap();
        est.feed_location(&fix(30.0, 37.64, 128.68, 810.0), false);
        assert_relative_eq!(est.altitude().unwrap(), alt0, epsilon = 1e-9);
    }
}
