//! Ride smoothness ("flow") scorer. Active only while riding; finalized
//! and reset at every riding -> non-riding transition. Accumulates local
//! speed stability plus infraction/bonus episodes into a 0-1000 score.

use std::collections::VecDeque;

use log::debug;

use crate::types::ScoreBreakdown;

#[derive(Clone, Debug)]
pub struct FlowConfig {
    /// Trailing speed window for the stability statistic.
    pub stability_window: usize,
    /// Stddev scale in `1 / (1 + sigma/scale)`.
    pub stability_sigma_scale: f64,
    /// Speeds at or below this count as stopped, m/s (~7.2 km/h).
    pub stop_speed: f64,
    /// Frame-to-frame deceleration marking a hard brake, m/s^2.
    pub hard_brake_decel: f64,
    /// Consecutive frames the deceleration must persist.
    pub hard_brake_frames: u32,
    /// Motion jerk threshold for chatter, g per second.
    pub chatter_jerk: f64,
    /// Max spacing between motion samples for a jerk estimate, seconds.
    pub chatter_sample_gap: f64,
    /// Speed gate for chatter detection, m/s (~15 km/h).
    pub chatter_min_speed: f64,
    pub chatter_cooldown: f64,
    /// Quiet phase: |magnitude - 1 g| band, entry duration, speed gate
    /// and re-entry grace.
    pub quiet_band: f64,
    pub quiet_min_duration: f64,
    pub quiet_min_speed: f64,
    pub quiet_reentry_grace: f64,
    /// Max inter-sample gap credited to the stopped/moving clocks,
    /// seconds. A GPS dropout is not evidence of either.
    pub max_sample_dt: f64,
    /// Runs shorter than these produce a zero score.
    pub min_active_secs: f64,
    pub min_moving_secs: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            stability_window: 5,
            stability_sigma_scale: 3.5,
            stop_speed: 2.0,
            hard_brake_decel: -2.0,
            hard_brake_frames: 2,
            chatter_jerk: 4.5,
            chatter_sample_gap: 0.1,
            chatter_min_speed: 15.0 / 3.6,
            chatter_cooldown: 1.0,
            quiet_band: 0.05,
            quiet_min_duration: 0.3,
            quiet_min_speed: 20.0 / 3.6,
            quiet_reentry_grace: 0.5,
            max_sample_dt: 3.0,
            min_active_secs: 5.0,
            min_moving_secs: 5.0,
        }
    }
}

const BASE_SCORE: f64 = 300.0;
const STABILITY_WEIGHT: f64 = 700.0;
const STOP_PENALTY_PER_SEC: f64 = 5.0;
const STOP_PENALTY_CAP: f64 = 300.0;
const HARD_BRAKE_PENALTY: f64 = 40.0;
const CHATTER_PENALTY: f64 = 20.0;
const QUIET_BONUS: f64 = 20.0;

#[derive(Clone, Debug, PartialEq)]
pub struct FlowResult {
    pub score: u32,
    pub breakdown: ScoreBreakdown,
}

pub struct FlowScorer {
    config: FlowConfig,

    speed_window: VecDeque<f64>,
    stability_sum: f64,
    stability_samples: u32,

    first_ts: Option<f64>,
    last_ts: Option<f64>,
    last_speed: Option<(f64, f64)>,
    latest_speed: f64,
    moving_secs: f64,
    stopped_secs: f64,

    brake_frames: u32,
    brake_counted: bool,
    hard_brake_count: u32,

    last_motion: Option<(f64, f64)>,
    chatter_count: u32,
    last_chatter_ts: f64,

    in_quiet: bool,
    quiet_entered: f64,
    quiet_counted: bool,
    quiet_exit_ts: f64,
    quiet_exit_counted: bool,
    quiet_count: u32,
}

impl FlowScorer {
    pub fn new(config: FlowConfig) -> Self {
        let mut s = Self {
            config,
            speed_window: VecDeque::new(),
            stability_sum: 0.0,
            stability_samples: 0,
            first_ts: None,
            last_ts: None,
            last_speed: None,
            latest_speed: 0.0,
            moving_secs: 0.0,
            stopped_secs: 0.0,
            brake_frames: 0,
            brake_counted: false,
            hard_brake_count: 0,
            last_motion: None,
            chatter_count: 0,
            last_chatter_ts: f64::NEG_INFINITY,
            in_quiet: false,
            quiet_entered: 0.0,
            quiet_counted: false,
            quiet_exit_ts: f64::NEG_INFINITY,
            quiet_exit_counted: false,
            quiet_count: 0,
        };
        s.reset();
        s
    }

    pub fn begin_run(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.speed_window.clear();
        self.stability_sum = 0.0;
        self.stability_samples = 0;
        self.first_ts = None;
        self.last_ts = None;
        self.last_speed = None;
        self.latest_speed = 0.0;
        self.moving_secs = 0.0;
        self.stopped_secs = 0.0;
        self.brake_frames = 0;
        self.brake_counted = false;
        self.hard_brake_count = 0;
        self.last_motion = None;
        self.chatter_count = 0;
        self.last_chatter_ts = f64::NEG_INFINITY;
        self.in_quiet = false;
        self.quiet_counted = false;
        self.quiet_exit_ts = f64::NEG_INFINITY;
        self.quiet_exit_counted = false;
        self.quiet_count = 0;
    }

    /// Feed a riding-state speed sample. `trusted` reflects the speed
    /// accuracy gate; untrusted samples advance the clocks but stay out
    /// of the stability window.
    pub fn feed_speed(&mut self, ts: f64, speed: f64, trusted: bool) {
        self.first_ts.get_or_insert(ts);
        self.latest_speed = speed;

        if let Some((prev_ts, prev_speed)) = self.last_speed {
            let dt = ts - prev_ts;
            if dt > 0.0 {
                let credited = dt.min(self.config.max_sample_dt);
                if speed <= self.config.stop_speed {
                    self.stopped_secs += credited;
                } else {
                    self.moving_secs += credited;
                }
                let decel = (speed - prev_speed) / dt;
                if decel <= self.config.hard_brake_decel {
                    self.brake_frames += 1;
                    if self.brake_frames >= self.config.hard_brake_frames && !self.brake_counted {
                        self.hard_brake_count += 1;
                        self.brake_counted = true;
                        debug!("hard brake at t={:.1} ({:.2} m/s^2)", ts, decel);
                    }
                } else {
                    self.brake_frames = 0;
                    self.brake_counted = false;
                }
            }
        }
        self.last_speed = Some((ts, speed));
        self.last_ts = Some(ts);

        if trusted {
            self.speed_window.push_back(speed);
            while self.speed_window.len() > self.config.stability_window {
                self.speed_window.pop_front();
            }
            if self.speed_window.len() == self.config.stability_window {
                let sigma = sample_stddev(&self.speed_window);
                let stability = 1.0 / (1.0 + sigma / self.config.stability_sigma_scale);
                self.stability_sum += stability;
                self.stability_samples += 1;
            }
        }
    }

    /// Feed a riding-state motion magnitude sample (g units).
    pub fn feed_motion(&mut self, ts: f64, magnitude: f64) {
        self.first_ts.get_or_insert(ts);
        self.last_ts = Some(ts);

        // Chatter: jerk between close samples, speed-gated, cooled down.
        if let Some((prev_ts, prev_mag)) = self.last_motion {
            let dt = ts - prev_ts;
            if dt > 0.0 && dt <= self.config.chatter_sample_gap {
                let jerk = (magnitude - prev_mag) / dt;
                if jerk.abs() >= self.config.chatter_jerk
                    && self.latest_speed >= self.config.chatter_min_speed
                    && ts - self.last_chatter_ts >= self.config.chatter_cooldown
                {
                    self.chatter_count += 1;
                    self.last_chatter_ts = ts;
                    debug!("chatter at t={:.1} (jerk {:.1} g/s)", ts, jerk);
                }
            }
        }
        self.last_motion = Some((ts, magnitude));

        // Quiet phase: sustained near-1g interval at speed.
        let in_band = (magnitude - 1.0).abs() <= self.config.quiet_band
            && self.latest_speed >= self.config.quiet_min_speed;
        if in_band {
            if !self.in_quiet {
                self.in_quiet = true;
                self.quiet_entered = ts;
                // Re-entry within the grace of a counted phase continues
                // it instead of counting again.
                self.quiet_counted = self.quiet_exit_counted
                    && ts - self.quiet_exit_ts < self.config.quiet_reentry_grace;
            }
            if !self.quiet_counted && ts - self.quiet_entered >= self.config.quiet_min_duration {
                self.quiet_count += 1;
                self.quiet_counted = true;
            }
        } else if self.in_quiet {
            self.in_quiet = false;
            self.quiet_exit_ts = ts;
            self.quiet_exit_counted = self.quiet_counted;
        }
    }

    /// Seal the run and reset for the next one. Atomic with respect to
    /// the scorer's own state: nothing fed after this lands in the
    /// outgoing run.
    pub fn finalize(&mut self) -> FlowResult {
        let active = match (self.first_ts, self.last_ts) {
            (Some(f), Some(l)) => l - f,
            _ => 0.0,
        };
        let result = if active < self.config.min_active_secs
            || self.moving_secs < self.config.min_moving_secs
            || self.stability_samples == 0
        {
            FlowResult { score: 0, breakdown: ScoreBreakdown::Empty }
        } else {
            let avg_stability = self.stability_sum / self.stability_samples as f64;
            let stop_penalty = (self.stopped_secs * STOP_PENALTY_PER_SEC).min(STOP_PENALTY_CAP);
            let score = BASE_SCORE + STABILITY_WEIGHT * avg_stability
                - stop_penalty
                - self.hard_brake_count as f64 * HARD_BRAKE_PENALTY
                - self.chatter_count as f64 * CHATTER_PENALTY
                + self.quiet_count as f64 * QUIET_BONUS;
            FlowResult {
                score: score.clamp(0.0, 1000.0).round() as u32,
                breakdown: ScoreBreakdown::Flow {
                    avg_stability,
                    stop_seconds: self.stopped_secs,
                    hard_brake_count: self.hard_brake_count,
                    chatter_count: self.chatter_count,
                    quiet_count: self.quiet_count,
                },
            }
        };
        self.reset();
        result
    }
}

fn sample_stddev(values: &VecDeque<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n as f64 - 1.0);
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scorer() -> FlowScorer {
        FlowScorer::new(FlowConfig::default())
    }

    fn feed_steady(s: &mut FlowScorer, from: f64, secs: u32, speed: f64) {
        for i in 0..secs {
            s.feed_speed(from + i as f64, speed, true);
        }
    }

    #[test]
    fn test_steady_run_scores_high() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 30, 10.0);
        let r = s.finalize();
        // Perfect stability: 300 + 700*1.0 = 1000
        assert_eq!(r.score, 1000);
        match r.breakdown {
            ScoreBreakdown::Flow { avg_stability, .. } => {
                assert_relative_eq!(avg_stability, 1.0, epsilon = 1e-9)
            }
            _ => panic!("expected flow breakdown"),
        }
    }

    #[test]
    fn test_short_run_scores_zero() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 4, 10.0);
        assert_eq!(s.finalize().score, 0);
    }

    #[test]
    fn test_lift_only_segment_scores_zero() {
        let mut s = scorer();
        s.begin_run();
        // Plenty of time but never moving
        feed_steady(&mut s, 0.0, 30, 1.0);
        assert_eq!(s.finalize().score, 0);
    }

    #[test]
    fn test_untrusted_speed_stays_out_of_stability() {
        let mut s = scorer();
        s.begin_run();
        for i in 0..30 {
            s.feed_speed(i as f64, 10.0, false);
        }
        // Clocks advanced but no stability samples collected
        assert_eq!(s.finalize().score, 0);
    }

    #[test]
    fn test_hard_brake_counted_once_per_episode() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 10, 15.0);
        // Sustained braking: 15 -> 3 m/s over 4 frames (-3 m/s^2 each)
        for (i, v) in [12.0, 9.0, 6.0, 3.0].iter().enumerate() {
            s.feed_speed(10.0 + i as f64, *v, true);
        }
        feed_steady(&mut s, 14.0, 16, 10.0);
        let r = s.finalize();
        match r.breakdown {
            ScoreBreakdown::Flow { hard_brake_count, .. } => assert_eq!(hard_brake_count, 1),
            _ => panic!("expected flow breakdown"),
        }
    }

    #[test]
    fn test_stop_penalty_capped() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 10, 10.0);
        // 120 s standing still: raw penalty 600 capped at 300
        feed_steady(&mut s, 10.0, 120, 0.5);
        let r = s.finalize();
        match r.breakdown {
            ScoreBreakdown::Flow { stop_seconds, .. } => assert!(stop_seconds >= 100.0),
            _ => panic!("expected flow breakdown"),
        }
        // 300 + 700*avg - 300; avg stability is ~1 except around the stop edge
        assert!(r.score >= 600 && r.score <= 700);
    }

    #[test]
    fn test_dropout_gap_credited_bounded_time() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 10, 10.0);
        // 60 s GPS dropout, next fix standing still: the gap is not 60 s
        // of stopping.
        s.feed_speed(69.0, 0.5, true);
        feed_steady(&mut s, 70.0, 10, 10.0);
        let r = s.finalize();
        match r.breakdown {
            ScoreBreakdown::Flow { stop_seconds, .. } => {
                assert!(stop_seconds <= 3.0, "dropout over-credited: {}", stop_seconds)
            }
            _ => panic!("expected flow breakdown"),
        }
    }

    #[test]
    fn test_chatter_gated_and_cooled_down() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 10, 10.0);
        // 60 Hz jitter bursts: |dmag/dt| = 0.2/0.016 = 12.5 g/s > 4.5
        let mut ts = 10.0;
        for i in 0..30 {
            s.feed_motion(ts, if i % 2 == 0 { 1.2 } else { 1.0 });
            ts += 0.016;
        }
        feed_steady(&mut s, 12.0, 10, 10.0);
        let r = s.finalize();
        match r.breakdown {
            // Half a second of jitter with a 1 s cooldown: exactly one event
            ScoreBreakdown::Flow { chatter_count, .. } => assert_eq!(chatter_count, 1),
            _ => panic!("expected flow breakdown"),
        }
    }

    #[test]
    fn test_chatter_needs_speed() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 10, 2.5); // below the 15 km/h gate
        let mut ts = 10.0;
        for i in 0..30 {
            s.feed_motion(ts, if i % 2 == 0 { 1.2 } else { 1.0 });
            ts += 0.016;
        }
        feed_steady(&mut s, 12.0, 10, 10.0);
        let r = s.finalize();
        match r.breakdown {
            ScoreBreakdown::Flow { chatter_count, .. } => assert_eq!(chatter_count, 0),
            _ => panic!("expected flow breakdown"),
        }
    }

    #[test]
    fn test_quiet_phase_counted_once_per_entry() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 10, 10.0);
        // 0.5 s inside the 1 g band at speed
        let mut ts = 10.0;
        for _ in 0..30 {
            s.feed_motion(ts, 1.02);
            ts += 0.016;
        }
        // Leave the band well past the grace, then a second phase
        for _ in 0..60 {
            s.feed_motion(ts, 1.3);
            ts += 0.016;
        }
        for _ in 0..30 {
            s.feed_motion(ts, 0.98);
            ts += 0.016;
        }
        s.feed_speed(ts, 10.0, true);
        feed_steady(&mut s, ts + 1.0, 5, 10.0);
        let r = s.finalize();
        match r.breakdown {
            ScoreBreakdown::Flow { quiet_count, .. } => assert_eq!(quiet_count, 2),
            _ => panic!("expected flow breakdown"),
        }
    }

    #[test]
    fn test_quiet_reentry_grace_blocks_double_count() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 10, 10.0);
        let mut ts = 10.0;
        for _ in 0..30 {
            s.feed_motion(ts, 1.0);
            ts += 0.016;
        }
        // Single noisy frame out of band, then right back in
        s.feed_motion(ts, 1.2);
        ts += 0.016;
        for _ in 0..30 {
            s.feed_motion(ts, 1.0);
            ts += 0.016;
        }
        s.feed_speed(ts, 10.0, true);
        feed_steady(&mut s, ts + 1.0, 5, 10.0);
        let r = s.finalize();
        match r.breakdown {
            ScoreBreakdown::Flow { quiet_count, .. } => assert_eq!(quiet_count, 1),
            _ => panic!("expected flow breakdown"),
        }
    }

    #[test]
    fn test_finalize_resets_for_next_run() {
        let mut s = scorer();
        s.begin_run();
        feed_steady(&mut s, 0.0, 30, 10.0);
        assert_eq!(s.finalize().score, 1000);
        s.begin_run();
        assert_eq!(s.finalize().score, 0);
    }
}
