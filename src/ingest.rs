//! Accuracy gate in front of everything downstream. Location samples that
//! fail the gate are not folded into any accumulator; their timestamps
//! still advance internal clocks so Δt bookkeeping stays honest.

use log::debug;

use crate::types::LocationSample;

#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Normal horizontal accuracy bound, meters.
    pub max_horizontal_accuracy: f64,
    /// Bound while a tightening window is active (lift disembark).
    pub tightened_horizontal_accuracy: f64,
    /// Speed accuracy bound for the scorer stability window, m/s.
    pub max_speed_accuracy: f64,
    /// Length of a tightening window, seconds.
    pub tighten_secs: f64,
    /// Minimum spacing between tightening windows, seconds.
    pub tighten_cooldown_secs: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_horizontal_accuracy: 50.0,
            tightened_horizontal_accuracy: 20.0,
            max_speed_accuracy: 3.0,
            tighten_secs: 20.0,
            tighten_cooldown_secs: 20.0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum IngestEvent {
    Rejected { accuracy: f64, bound: f64 },
    TightenStarted { until: f64 },
}

pub struct SampleGate {
    config: GateConfig,
    tightened_until: f64,
    last_tighten_ts: f64,
}

impl SampleGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            tightened_until: f64::NEG_INFINITY,
            last_tighten_ts: f64::NEG_INFINITY,
        }
    }

    /// Horizontal accuracy bound in effect at `timestamp`.
    pub fn bound_at(&self, timestamp: f64) -> f64 {
        if timestamp < self.tightened_until {
            self.config.tightened_horizontal_accuracy
        } else {
            self.config.max_horizontal_accuracy
        }
    }

    /// Whether a location sample may feed time-critical accumulators.
    pub fn accepts(&mut self, sample: &LocationSample) -> Option<IngestEvent> {
        let bound = self.bound_at(sample.timestamp);
        let ok = sample.horizontal_accuracy.is_finite()
            && sample.horizontal_accuracy <= bound
            && sample.speed.is_finite()
            && sample.speed >= 0.0;
        if ok {
            None
        } else {
            debug!(
                "location sample rejected: accuracy {:.1} m > bound {:.1} m",
                sample.horizontal_accuracy, bound
            );
            Some(IngestEvent::Rejected { accuracy: sample.horizontal_accuracy, bound })
        }
    }

    /// Whether the reported speed is trustworthy enough for the
    /// stability window.
    pub fn trusts_speed(&self, sample: &LocationSample) -> bool {
        sample.speed_accuracy.is_finite() && sample.speed_accuracy <= self.config.max_speed_accuracy
    }

    /// Request a tightening window. Refused while the cooldown since the
    /// previous request has not elapsed.
    pub fn tighten(&mut self, now: f64) -> Option<IngestEvent> {
        if now - self.last_tighten_ts < self.config.tighten_cooldown_secs {
            return None;
        }
        self.last_tighten_ts = now;
        self.tightened_until = now + self.config.tighten_secs;
        debug!("accuracy gate tightened until t={:.1}", self.tightened_until);
        Some(IngestEvent::TightenStarted { until: self.tightened_until })
    }
}
