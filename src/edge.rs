//! Carving precision ("edge") scorer. Integrates tier-weighted lateral
//! g-force over riding time into a log-compressed 0-1000 score, with caps
//! that keep short bursts and low-intensity padding from inflating it.

use std::collections::VecDeque;

use log::debug;

use crate::types::ScoreBreakdown;

#[derive(Clone, Debug)]
pub struct EdgeConfig {
    /// Speed gate: magnitudes only accumulate above this, m/s (~15 km/h).
    pub min_speed: f64,
    /// Single-sample magnitude jump treated as a bump, g.
    pub bump_delta: f64,
    /// Trailing window for the smoothed magnitude.
    pub smooth_window: usize,
    /// Tier thresholds, g, with their weights. Below the first tier the
    /// weight is zero.
    pub tier_low: f64,
    pub tier_mid: f64,
    pub tier_high: f64,
    pub weight_low: f64,
    pub weight_mid: f64,
    pub weight_high: f64,
    /// Log normalization constant for the raw integral.
    pub log_norm: f64,
    /// Peak cap: score ceiling when the smoothed signal never reaches
    /// `peak_g`.
    pub peak_g: f64,
    pub peak_cap: u32,
    /// Sustain cap: score ceiling when less than `sustain_ratio` of
    /// active time sits at or above the mid tier.
    pub sustain_ratio: f64,
    pub sustain_cap: u32,
    /// Max inter-sample gap credited to the integral, seconds.
    pub max_sample_dt: f64,
    /// Runs with less active time than this score zero.
    pub min_active_secs: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_speed: 15.0 / 3.6,
            bump_delta: 0.5,
            smooth_window: 10,
            tier_low: 1.2,
            tier_mid: 1.4,
            tier_high: 1.7,
            weight_low: 0.2,
            weight_mid: 2.5,
            weight_high: 6.0,
            log_norm: 260.0,
            peak_g: 1.7,
            peak_cap: 940,
            sustain_ratio: 0.25,
            sustain_cap: 790,
            max_sample_dt: 0.5,
            min_active_secs: 5.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EdgeResult {
    pub score: u32,
    pub max_g: f64,
    pub breakdown: ScoreBreakdown,
}

pub struct EdgeScorer {
    config: EdgeConfig,

    latest_speed: f64,
    window: VecDeque<f64>,
    last_mag: Option<f64>,
    last_ts: Option<f64>,

    raw: f64,
    active_secs: f64,
    high_tier_secs: f64,
    max_g: f64,
}

impl EdgeScorer {
    pub fn new(config: EdgeConfig) -> Self {
        let mut s = Self {
            config,
            latest_speed: 0.0,
            window: VecDeque::new(),
            last_mag: None,
            last_ts: None,
            raw: 0.0,
            active_secs: 0.0,
            high_tier_secs: 0.0,
            max_g: 0.0,
        };
        s.reset();
        s
    }

    pub fn begin_run(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.latest_speed = 0.0;
        self.window.clear();
        self.last_mag = None;
        self.last_ts = None;
        self.raw = 0.0;
        self.active_secs = 0.0;
        self.high_tier_secs = 0.0;
        self.max_g = 0.0;
    }

    /// Cache the most recent speed so the motion path can apply the
    /// speed gate without a location sample in hand.
    pub fn note_speed(&mut self, speed: f64) {
        self.latest_speed = speed;
    }

    pub fn feed_motion(&mut self, ts: f64, magnitude: f64) {
        let dt = match self.last_ts {
            Some(prev) => (ts - prev).clamp(0.0, self.config.max_sample_dt),
            None => 0.0,
        };
        self.last_ts = Some(ts);

        // Bump rejection: a single-sample spike updates the comparison
        // point but never enters the smoothing window.
        if let Some(prev) = self.last_mag {
            if (magnitude - prev).abs() >= self.config.bump_delta {
                self.last_mag = Some(magnitude);
                return;
            }
        }
        self.last_mag = Some(magnitude);

        self.window.push_back(magnitude);
        while self.window.len() > self.config.smooth_window {
            self.window.pop_front();
        }
        let smoothed = self.window.iter().sum::<f64>() / self.window.len() as f64;
        if smoothed > self.max_g {
            self.max_g = smoothed;
        }

        if self.latest_speed < self.config.min_speed || dt <= 0.0 {
            return;
        }
        self.active_secs += dt;
        if smoothed >= self.config.tier_mid {
            self.high_tier_secs += dt;
        }
        let weight = if smoothed >= self.config.tier_high {
            self.config.weight_high
        } else if smoothed >= self.config.tier_mid {
            self.config.weight_mid
        } else if smoothed >= self.config.tier_low {
            self.config.weight_low
        } else {
            0.0
        };
        if weight > 0.0 {
            self.raw += smoothed * weight * dt;
        }
    }

    /// Seal the run and reset. Returns the score alongside the peak
    /// smoothed magnitude for the run record.
    pub fn finalize(&mut self) -> EdgeResult {
        let result = if self.active_secs < self.config.min_active_secs {
            EdgeResult { score: 0, max_g: self.max_g, breakdown: ScoreBreakdown::Empty }
        } else {
            let unclamped =
                1000.0 * (1.0 + self.raw).ln() / (1.0 + self.config.log_norm).ln();
            let mut score = unclamped.clamp(0.0, 1000.0).round() as u32;
            if self.max_g < self.config.peak_g {
                score = score.min(self.config.peak_cap);
            }
            let high_tier_ratio = self.high_tier_secs / self.active_secs;
            if high_tier_ratio < self.config.sustain_ratio {
                score = score.min(self.config.sustain_cap);
            }
            debug!(
                "edge score {}: raw {:.1}, active {:.1} s, high-tier {:.0}%",
                score,
                self.raw,
                self.active_secs,
                high_tier_ratio * 100.0
            );
            EdgeResult {
                score,
                max_g: self.max_g,
                breakdown: ScoreBreakdown::Edge {
                    raw_score: self.raw,
                    active_seconds: self.active_secs,
                    high_tier_ratio,
                    max_g: self.max_g,
                },
            }
        };
        self.reset();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scorer() -> EdgeScorer {
        let mut s = EdgeScorer::new(EdgeConfig::default());
        s.begin_run();
        s.note_speed(12.0);
        s
    }

    fn feed_level(s: &mut EdgeScorer, from: f64, secs: u32, mag: f64) -> f64 {
        let mut ts = from;
        // 10 Hz
        for _ in 0..secs * 10 {
            s.feed_motion(ts, mag);
            ts += 0.1;
        }
        ts
    }

    #[test]
    fn test_below_first_tier_contributes_nothing() {
        let mut s = scorer();
        feed_level(&mut s, 0.0, 60, 1.1);
        let r = s.finalize();
        assert_eq!(r.score, 0);
        match r.breakdown {
            ScoreBreakdown::Edge { raw_score, .. } => {
                assert_relative_eq!(raw_score, 0.0, epsilon = 1e-9)
            }
            _ => panic!("expected edge breakdown"),
        }
    }

    #[test]
    fn test_hard_carving_beats_gentle() {
        let mut gentle = scorer();
        feed_level(&mut gentle, 0.0, 120, 1.3);
        let g = gentle.finalize();

        let mut hard = scorer();
        feed_level(&mut hard, 0.0, 60, 1.8);
        let h = hard.finalize();

        // Half the time at 1.8 g far outscores twice the time at 1.3 g
        assert!(h.score > g.score, "hard {} vs gentle {}", h.score, g.score);
    }

    #[test]
    fn test_peak_cap_without_high_g() {
        let mut s = scorer();
        // Heavy sustained mid-tier riding, never touching 1.7 g
        feed_level(&mut s, 0.0, 600, 1.65);
        let r = s.finalize();
        assert_eq!(r.score, 940);
    }

    #[test]
    fn test_sustain_cap_on_bursty_run() {
        let mut s = scorer();
        // One strong burst inside a long low-intensity run
        let ts = feed_level(&mut s, 0.0, 110, 1.25);
        feed_level(&mut s, ts, 10, 1.8);
        let r = s.finalize();
        match r.breakdown {
            ScoreBreakdown::Edge { high_tier_ratio, .. } => assert!(high_tier_ratio < 0.25),
            _ => panic!("expected edge breakdown"),
        }
        assert!(r.score <= 790);
    }

    #[test]
    fn test_bump_rejected_from_smoothing() {
        let mut s = scorer();
        feed_level(&mut s, 0.0, 2, 1.0);
        // 2.5 g pothole spike between 1.0 g samples
        s.feed_motion(2.0, 2.5);
        s.feed_motion(2.1, 1.0);
        feed_level(&mut s, 2.2, 2, 1.0);
        let r = s.finalize();
        assert!(r.max_g < 1.1, "spike leaked into smoothing: {}", r.max_g);
    }

    #[test]
    fn test_speed_gate_blocks_slow_motion() {
        let mut s = EdgeScorer::new(EdgeConfig::default());
        s.begin_run();
        s.note_speed(2.0); // walking pace
        feed_level(&mut s, 0.0, 60, 1.8);
        assert_eq!(s.finalize().score, 0);
    }

    #[test]
    fn test_long_gap_credited_bounded_time() {
        let mut s = scorer();
        s.feed_motion(0.0, 1.5);
        // 10 s dropout; only max_sample_dt of it counts
        s.feed_motion(10.0, 1.5);
        feed_level(&mut s, 10.1, 10, 1.5);
        let r = s.finalize();
        match r.breakdown {
            ScoreBreakdown::Edge { active_seconds, .. } => {
                assert!(active_seconds < 11.0, "gap over-credited: {}", active_seconds)
            }
            _ => panic!("expected edge breakdown"),
        }
    }

    #[test]
    fn test_finalize_resets_for_next_run() {
        let mut s = scorer();
        feed_level(&mut s, 0.0, 60, 1.8);
        assert!(s.finalize().score > 0);
        s.begin_run();
        s.note_speed(12.0);
        assert_eq!(s.finalize().score, 0);
    }
}
