//! Activity state machine: maps the fused sample stream to a single
//! current `ActivityState` with hysteresis and debounce, and keeps the
//! confirmed transitions temporally honest (pre-rolled run starts,
//! retroactive end times).

use std::collections::VecDeque;

use log::info;

use crate::types::{haversine_distance, ActivityState, TimelineEvent, TimelineKind};

/// One fused sample: filtered horizontal speed/heading from the location
/// stream, altitude from the vertical estimator.
#[derive(Clone, Copy, Debug)]
pub struct TrackSample {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub course: f64,
    pub altitude: f64,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    /// Ride trigger speed, m/s (5 km/h).
    pub ride_trigger_speed: f64,
    /// Cumulative drop marking descent, meters, over `signal_window` samples.
    pub descend_cum_drop: f64,
    /// Single-frame drop that marks descent on its own, meters.
    pub descend_frame_drop: f64,
    /// Minimum samples before the cumulative descent test applies.
    pub descend_min_samples: usize,
    /// Cumulative gain marking a lift ride (relaxed to catch slow lift
    /// starts), meters.
    pub climb_gain: f64,
    /// Stricter gain used to end a run, meters.
    pub climb_strict_gain: f64,
    /// Cumulative drop marking strong descent, meters.
    pub strong_descent_drop: f64,
    /// Sample count for the climb/strong-descent windows.
    pub signal_window: usize,

    /// Pre-roll confirmation window, seconds.
    pub pending_ride_secs: f64,
    pub pending_ride_displacement: f64,
    pub pending_ride_drop: f64,

    /// Idle window that arms PENDING_REST, seconds.
    pub rest_window_secs: f64,
    /// Max speed inside the idle window, m/s (6 km/h).
    pub rest_max_speed: f64,
    /// Max net drop inside the idle window, meters.
    pub rest_max_drop: f64,
    /// Resume thresholds out of PENDING_REST.
    pub resume_speed: f64,
    pub resume_drop: f64,
    pub pending_rest_timeout: f64,

    /// Lift exit to resting: speed floor, m/s (1.5 km/h) and sustain.
    pub lift_exit_speed: f64,
    pub lift_rest_sustain: f64,

    /// Lift-line filter: window, minimum path, thresholds.
    pub linearity_window_secs: f64,
    pub linearity_min_path: f64,
    pub lift_linearity: f64,
    pub lift_course_stddev_deg: f64,
    /// Samples slower than this are excluded from the course stddev.
    pub course_speed_floor: f64,

    /// Dwell for ad-hoc transitions, seconds.
    pub dwell_secs: f64,

    /// Accuracy-tightening trigger: baro descent over the trigger window
    /// while ON_LIFT, plus its cooldown.
    pub tighten_descent: f64,
    pub tighten_window_secs: f64,
    pub tighten_cooldown_secs: f64,

    /// Rolling sample window retention, seconds.
    pub window_secs: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            ride_trigger_speed: 5.0 / 3.6,
            descend_cum_drop: 1.5,
            descend_frame_drop: 0.5,
            descend_min_samples: 3,
            climb_gain: 5.0,
            climb_strict_gain: 7.0,
            strong_descent_drop: 5.0,
            signal_window: 10,
            pending_ride_secs: 5.0,
            pending_ride_displacement: 5.0,
            pending_ride_drop: 3.0,
            rest_window_secs: 20.0,
            rest_max_speed: 6.0 / 3.6,
            rest_max_drop: 10.0,
            resume_speed: 10.0 / 3.6,
            resume_drop: 3.0,
            pending_rest_timeout: 180.0,
            lift_exit_speed: 1.5 / 3.6,
            lift_rest_sustain: 60.0,
            linearity_window_secs: 20.0,
            linearity_min_path: 60.0,
            lift_linearity: 0.95,
            lift_course_stddev_deg: 5.0,
            course_speed_floor: 1.5,
            dwell_secs: 5.0,
            tighten_descent: 5.0,
            tighten_window_secs: 20.0,
            tighten_cooldown_secs: 20.0,
            window_secs: 30.0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ClassifierEvent {
    StateChanged { from: ActivityState, to: ActivityState, timestamp: f64 },
    /// A run was confirmed. `start` is pre-rolled to the candidate time.
    RunStarted { start: f64 },
    /// A run ended. `end` may lie before the emitting sample when the
    /// confirmation was retroactive (idle correction).
    RunEnded { start: f64, end: f64 },
    /// Degraded positioning expected (lift disembark); the session wires
    /// this to the ingest gate.
    TightenAccuracy { timestamp: f64 },
}

#[derive(Clone, Copy, Debug)]
struct PendingRide {
    entered: f64,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    speed_sum: f64,
    samples: u32,
}

#[derive(Clone, Copy, Debug)]
struct DwellTimer {
    target: ActivityState,
    since: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct Signals {
    descending: bool,
    climbing: bool,
    climbing_strict: bool,
    strong_descent: bool,
    lift_line: bool,
}

pub struct ActivityClassifier {
    config: ClassifierConfig,
    state: ActivityState,
    window: VecDeque<TrackSample>,
    timeline: Vec<TimelineEvent>,

    pending_ride: Option<PendingRide>,
    idle_start: Option<f64>,
    idle_altitude: f64,
    dwell: Option<DwellTimer>,
    lift_rest_since: Option<f64>,
    run_start: Option<f64>,
    last_tighten_ts: f64,
}

impl ActivityClassifier {
    pub fn new(config: ClassifierConfig, start_ts: f64) -> Self {
        Self {
            config,
            state: ActivityState::Resting,
            window: VecDeque::new(),
            timeline: vec![TimelineEvent { kind: TimelineKind::Resting, start: start_ts, end: None }],
            pending_ride: None,
            idle_start: None,
            idle_altitude: 0.0,
            dwell: None,
            lift_rest_since: None,
            run_start: None,
            last_tighten_ts: f64::NEG_INFINITY,
        }
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn timeline(&self) -> &[TimelineEvent] {
        &self.timeline
    }

    /// Feed one fused sample; returns the transitions it confirmed.
    /// Events are emitted before the caller folds the sample into any
    /// state-gated consumer, which is what keeps transition application
    /// ordered before the next data sample.
    pub fn update(&mut self, s: TrackSample) -> Vec<ClassifierEvent> {
        let mut events = Vec::new();
        self.window.push_back(s);
        let horizon = s.timestamp - self.config.window_secs;
        while self.window.front().map(|f| f.timestamp < horizon).unwrap_or(false) {
            self.window.pop_front();
        }

        let sig = self.signals();
        let now = s.timestamp;

        match self.state {
            ActivityState::Resting => {
                if s.speed > self.config.ride_trigger_speed && sig.descending {
                    self.pending_ride = Some(PendingRide {
                        entered: now,
                        latitude: s.latitude,
                        longitude: s.longitude,
                        altitude: s.altitude,
                        speed_sum: s.speed,
                        samples: 1,
                    });
                    self.dwell = None;
                    self.set_state(ActivityState::PendingRide, now, &mut events);
                } else if sig.climbing {
                    if let Some(since) = self.dwell_check(ActivityState::OnLift, now) {
                        self.transition_timeline(TimelineKind::OnLift, since);
                        self.set_state(ActivityState::OnLift, since, &mut events);
                    }
                } else {
                    self.clear_dwell(ActivityState::OnLift);
                }
            }

            ActivityState::PendingRide => {
                if let Some(mut p) = self.pending_ride {
                    p.speed_sum += s.speed;
                    p.samples += 1;
                    self.pending_ride = Some(p);

                    if now - p.entered >= self.config.pending_ride_secs {
                        let avg = p.speed_sum / p.samples as f64;
                        let displacement =
                            haversine_distance(p.latitude, p.longitude, s.latitude, s.longitude);
                        let net_drop = p.altitude - s.altitude;
                        if avg >= self.config.ride_trigger_speed
                            && displacement >= self.config.pending_ride_displacement
                            && net_drop >= self.config.pending_ride_drop
                        {
                            self.pending_ride = None;
                            self.run_start = Some(p.entered);
                            self.transition_timeline(TimelineKind::Riding, p.entered);
                            self.set_state(ActivityState::Riding, now, &mut events);
                            events.push(ClassifierEvent::RunStarted { start: p.entered });
                        } else {
                            self.pending_ride = None;
                            self.set_state(ActivityState::Resting, now, &mut events);
                        }
                    }
                }
            }

            ActivityState::Riding => {
                if sig.climbing_strict {
                    if let Some(since) = self.dwell_check(ActivityState::OnLift, now) {
                        let start = self.run_start.take().unwrap_or(since);
                        self.transition_timeline(TimelineKind::OnLift, since);
                        self.set_state(ActivityState::OnLift, since, &mut events);
                        events.push(ClassifierEvent::RunEnded { start, end: since });
                    }
                } else {
                    self.clear_dwell(ActivityState::OnLift);
                    if let Some((idle_start, idle_alt)) = self.idle_window(now) {
                        self.idle_start = Some(idle_start);
                        self.idle_altitude = idle_alt;
                        self.set_state(ActivityState::PendingRest, now, &mut events);
                    }
                }
            }

            ActivityState::PendingRest => {
                let idle = self.idle_start.unwrap_or(now);
                if s.speed >= self.config.resume_speed
                    && (self.idle_altitude - s.altitude) >= self.config.resume_drop
                {
                    self.idle_start = None;
                    self.dwell = None;
                    self.set_state(ActivityState::Riding, now, &mut events);
                } else if sig.climbing_strict {
                    if let Some(since) = self.dwell_check(ActivityState::OnLift, now) {
                        let start = self.run_start.take().unwrap_or(idle);
                        self.idle_start = None;
                        self.seal_open(idle);
                        self.open(TimelineKind::OnLift, since);
                        self.set_state(ActivityState::OnLift, since, &mut events);
                        events.push(ClassifierEvent::RunEnded { start, end: idle });
                    }
                } else {
                    self.clear_dwell(ActivityState::OnLift);
                    self.check_pending_rest_timeout(now, &mut events);
                }
            }

            ActivityState::OnLift => {
                if let Some(ev) = self.check_tighten(now) {
                    events.push(ev);
                }
                if s.speed > self.config.ride_trigger_speed && sig.strong_descent && !sig.lift_line
                {
                    if let Some(since) = self.dwell_check(ActivityState::Riding, now) {
                        self.run_start = Some(since);
                        self.transition_timeline(TimelineKind::Riding, since);
                        self.set_state(ActivityState::Riding, since, &mut events);
                        events.push(ClassifierEvent::RunStarted { start: since });
                    }
                } else {
                    self.clear_dwell(ActivityState::Riding);
                    if s.speed < self.config.lift_exit_speed
                        && !sig.climbing
                        && !sig.strong_descent
                    {
                        let since = *self.lift_rest_since.get_or_insert(now);
                        if now - since >= self.config.lift_rest_sustain {
                            self.lift_rest_since = None;
                            self.transition_timeline(TimelineKind::Resting, since);
                            self.set_state(ActivityState::Resting, since, &mut events);
                        }
                    } else {
                        self.lift_rest_since = None;
                    }
                }
            }
        }

        events
    }

    /// Advance wall-clock-relative timers without folding a sample in.
    /// Called for rejected samples and from pipeline timeout ticks so the
    /// pending windows re-arm across scheduling gaps.
    pub fn advance_clock(&mut self, now: f64) -> Vec<ClassifierEvent> {
        let mut events = Vec::new();
        match self.state {
            ActivityState::PendingRide => {
                if let Some(p) = self.pending_ride {
                    if now - p.entered >= self.config.pending_ride_secs {
                        // No usable evidence arrived in time.
                        self.pending_ride = None;
                        self.set_state(ActivityState::Resting, now, &mut events);
                    }
                }
            }
            ActivityState::PendingRest => {
                self.check_pending_rest_timeout(now, &mut events);
            }
            _ => {}
        }
        events
    }

    /// Seal everything at session stop. A still-open riding event is
    /// sealed with the current timestamp regardless of state.
    pub fn flush(&mut self, now: f64) -> Vec<ClassifierEvent> {
        let mut events = Vec::new();
        if let Some(start) = self.run_start.take() {
            events.push(ClassifierEvent::RunEnded { start, end: now });
        }
        self.seal_open(now);
        self.pending_ride = None;
        self.idle_start = None;
        self.dwell = None;
        self.lift_rest_since = None;
        events
    }

    // ── Derived signals ──────────────────────────────────────────────

    fn signals(&self) -> Signals {
        let n = self.window.len();
        if n < 2 {
            return Signals::default();
        }
        let tail: Vec<&TrackSample> =
            self.window.iter().rev().take(self.config.signal_window).rev().collect();
        let mut gain = 0.0;
        let mut drop = 0.0;
        for pair in tail.windows(2) {
            let d = pair[1].altitude - pair[0].altitude;
            if d > 0.0 {
                gain += d;
            } else {
                drop -= d;
            }
        }
        let last_delta = self.window[n - 1].altitude - self.window[n - 2].altitude;

        let full_window = tail.len() >= self.config.signal_window;
        Signals {
            descending: (tail.len() >= self.config.descend_min_samples
                && drop >= self.config.descend_cum_drop)
                || -last_delta >= self.config.descend_frame_drop,
            climbing: full_window && gain >= self.config.climb_gain,
            climbing_strict: full_window && gain >= self.config.climb_strict_gain,
            strong_descent: full_window && drop >= self.config.strong_descent_drop,
            lift_line: self.lift_line(),
        }
    }

    /// True when the recent track looks like a fixed lift line: nearly
    /// straight and with a steady heading. Not applicable (false) until
    /// the window covers enough path.
    fn lift_line(&self) -> bool {
        let now = match self.window.back() {
            Some(s) => s.timestamp,
            None => return false,
        };
        let horizon = now - self.config.linearity_window_secs;
        let recent: Vec<&TrackSample> =
            self.window.iter().filter(|s| s.timestamp >= horizon).collect();
        if recent.len() < 2 {
            return false;
        }

        let mut path = 0.0;
        for pair in recent.windows(2) {
            path += haversine_distance(
                pair[0].latitude,
                pair[0].longitude,
                pair[1].latitude,
                pair[1].longitude,
            );
        }
        if path < self.config.linearity_min_path {
            return false;
        }
        let first = recent[0];
        let last = recent[recent.len() - 1];
        let straight =
            haversine_distance(first.latitude, first.longitude, last.latitude, last.longitude);
        let linearity = straight / path;

        let courses: Vec<f64> = recent
            .iter()
            .filter(|s| s.speed >= self.config.course_speed_floor)
            .map(|s| s.course)
            .collect();
        if courses.is_empty() {
            return false;
        }
        // Circular statistic: headings wrap at 0/360, so deviations are
        // measured around the vector-mean course.
        let (sin_sum, cos_sum) = courses.iter().fold((0.0, 0.0), |(s, c), deg| {
            let r = deg.to_radians();
            (s + r.sin(), c + r.cos())
        });
        let mean = sin_sum.atan2(cos_sum).to_degrees();
        let var = courses
            .iter()
            .map(|c| {
                let mut d = (c - mean) % 360.0;
                if d > 180.0 {
                    d -= 360.0;
                } else if d < -180.0 {
                    d += 360.0;
                }
                d * d
            })
            .sum::<f64>()
            / courses.len() as f64;
        let stddev = var.sqrt();

        linearity >= self.config.lift_linearity && stddev <= self.config.lift_course_stddev_deg
    }

    /// The trailing idle window that arms PENDING_REST. Returns the
    /// window start (idleStartTime) and the altitude there.
    fn idle_window(&self, now: f64) -> Option<(f64, f64)> {
        let horizon = now - self.config.rest_window_secs;
        let recent: Vec<&TrackSample> =
            self.window.iter().filter(|s| s.timestamp >= horizon).collect();
        let first = *recent.first()?;
        let last = *recent.last()?;
        // Require the window to actually span the idle period.
        if now - first.timestamp < self.config.rest_window_secs - 1.0 {
            return None;
        }
        let max_speed = recent.iter().map(|s| s.speed).fold(0.0, f64::max);
        let net_drop = first.altitude - last.altitude;
        if max_speed <= self.config.rest_max_speed && net_drop <= self.config.rest_max_drop {
            Some((first.timestamp, first.altitude))
        } else {
            None
        }
    }

    fn check_pending_rest_timeout(&mut self, now: f64, events: &mut Vec<ClassifierEvent>) {
        if let Some(idle) = self.idle_start {
            if now - idle >= self.config.pending_rest_timeout {
                let start = self.run_start.take().unwrap_or(idle);
                self.idle_start = None;
                self.seal_open(idle);
                self.open(TimelineKind::Resting, idle);
                self.set_state(ActivityState::Resting, now, events);
                events.push(ClassifierEvent::RunEnded { start, end: idle });
            }
        }
    }

    fn check_tighten(&mut self, now: f64) -> Option<ClassifierEvent> {
        if now - self.last_tighten_ts < self.config.tighten_cooldown_secs {
            return None;
        }
        let horizon = now - self.config.tighten_window_secs;
        let first = self.window.iter().find(|s| s.timestamp >= horizon)?;
        let last = self.window.back()?;
        if first.altitude - last.altitude >= self.config.tighten_descent {
            self.last_tighten_ts = now;
            Some(ClassifierEvent::TightenAccuracy { timestamp: now })
        } else {
            None
        }
    }

    // ── Dwell debounce ───────────────────────────────────────────────

    /// Track a candidate transition. Returns the candidate start once it
    /// has held for the configured dwell; the confirmed transition is
    /// stamped at that start so no leading seconds are lost.
    fn dwell_check(&mut self, target: ActivityState, now: f64) -> Option<f64> {
        match self.dwell {
            Some(d) if d.target == target => {
                if now - d.since >= self.config.dwell_secs {
                    self.dwell = None;
                    Some(d.since)
                } else {
                    None
                }
            }
            _ => {
                self.dwell = Some(DwellTimer { target, since: now });
                None
            }
        }
    }

    fn clear_dwell(&mut self, target: ActivityState) {
        if let Some(d) = self.dwell {
            if d.target == target {
                self.dwell = None;
            }
        }
    }

    // ── Timeline bookkeeping ─────────────────────────────────────────

    fn seal_open(&mut self, at: f64) {
        if let Some(ev) = self.timeline.last_mut() {
            if ev.end.is_none() {
                ev.end = Some(at.max(ev.start));
            }
        }
    }

    fn open(&mut self, kind: TimelineKind, at: f64) {
        self.timeline.push(TimelineEvent { kind, start: at, end: None });
    }

    fn transition_timeline(&mut self, kind: TimelineKind, at: f64) {
        self.seal_open(at);
        self.open(kind, at);
    }

    fn set_state(&mut self, to: ActivityState, timestamp: f64, events: &mut Vec<ClassifierEvent>) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("activity: {:?} -> {:?} at t={:.1}", from, to, timestamp);
        self.state = to;
        events.push(ClassifierEvent::StateChanged { from, to, timestamp });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAT_PER_M: f64 = 1.0 / 111_195.0;

    fn classifier() -> ActivityClassifier {
        ActivityClassifier::new(ClassifierConfig::default(), 0.0)
    }

    fn sample(ts: f64, lat: f64, speed: f64, course: f64, alt: f64) -> TrackSample {
        TrackSample { timestamp: ts, latitude: lat, longitude: 128.68, speed, course, altitude: alt }
    }

    fn feed_resting(c: &mut ActivityClassifier, from: f64, to: f64) {
        let mut ts = from;
        while ts < to {
            c.update(sample(ts, 37.64, 0.0, 0.0, 1000.0));
            ts += 1.0;
        }
    }

    /// Drive a classifier from Resting into Riding with a clean descent.
    fn start_run(c: &mut ActivityClassifier, t0: f64) -> f64 {
        feed_resting(c, t0, t0 + 3.0);
        let mut ts = t0 + 3.0;
        let mut lat = 37.64;
        let mut alt = 1000.0;
        let mut entered = None;
        while c.state() != ActivityState::Riding {
            lat += 5.0 * LAT_PER_M;
            alt -= 1.0;
            let events = c.update(sample(ts, lat, 5.0, 170.0, alt));
            for e in &events {
                if let ClassifierEvent::RunStarted { start } = e {
                    entered = Some(*start);
                }
            }
            ts += 1.0;
            assert!(ts < t0 + 30.0, "never reached Riding");
        }
        entered.expect("run start event")
    }

    #[test]
    fn test_descent_reaches_riding_with_preroll() {
        let mut c = classifier();
        feed_resting(&mut c, 0.0, 3.0);

        // 18 km/h with 1 m/s descent starting at t=3
        let mut lat = 37.64;
        let mut alt = 1000.0;
        let mut run_start = None;
        for i in 0..8 {
            let ts = 3.0 + i as f64;
            lat += 5.0 * LAT_PER_M;
            alt -= 1.0;
            let events = c.update(sample(ts, lat, 5.0, 170.0, alt));
            for e in events {
                if let ClassifierEvent::RunStarted { start } = e {
                    run_start = Some(start);
                }
            }
        }
        assert_eq!(c.state(), ActivityState::Riding);
        // Pre-roll: the run starts when PENDING_RIDE was entered (t=3,
        // the first sample with a frame drop behind it).
        assert_eq!(run_start, Some(3.0));
        let open = c.timeline().last().unwrap();
        assert_eq!(open.kind, TimelineKind::Riding);
        assert_eq!(open.start, 3.0);
    }

    #[test]
    fn test_pending_ride_fails_back_to_resting() {
        let mut c = classifier();
        feed_resting(&mut c, 0.0, 3.0);
        // One sharp altitude drop arms PENDING_RIDE, then everything stalls
        c.update(sample(3.0, 37.64, 2.0, 0.0, 999.0));
        assert_eq!(c.state(), ActivityState::PendingRide);
        for i in 0..7 {
            c.update(sample(4.0 + i as f64, 37.64, 0.2, 0.0, 999.0));
        }
        assert_eq!(c.state(), ActivityState::Resting);
        // No riding event was ever opened
        assert!(c.timeline().iter().all(|e| e.kind != TimelineKind::Riding));
    }

    #[test]
    fn test_climb_with_dwell_reaches_on_lift() {
        let mut c = classifier();
        let mut alt = 1000.0;
        let mut ts = 0.0;
        // Slow steady gain: 0.6 m per sample
        while c.state() != ActivityState::OnLift {
            alt += 0.6;
            c.update(sample(ts, 37.64, 1.0, 10.0, alt));
            ts += 1.0;
            assert!(ts < 40.0, "never reached OnLift");
        }
        // Gain crosses 5 m within 10 samples after ~9 samples; dwell adds 5 s
        assert!(ts >= 14.0);
    }

    #[test]
    fn test_dwell_resets_when_candidate_reverts() {
        let mut c = classifier();
        let mut ts = 0.0;
        let mut alt = 1000.0;
        // Climb long enough to arm the dwell
        for _ in 0..12 {
            alt += 0.6;
            c.update(sample(ts, 37.64, 1.0, 10.0, alt));
            ts += 1.0;
        }
        assert_eq!(c.state(), ActivityState::Resting);
        // Candidate reverts: flat samples wash the gain out of the window
        for _ in 0..12 {
            c.update(sample(ts, 37.64, 0.0, 10.0, alt));
            ts += 1.0;
        }
        assert_eq!(c.state(), ActivityState::Resting);
    }

    #[test]
    fn test_lift_line_suppresses_false_run() {
        let mut c = classifier();
        // Get on the lift
        let mut alt = 1000.0;
        let mut ts = 0.0;
        let mut lat = 37.64;
        while c.state() != ActivityState::OnLift {
            alt += 0.8;
            lat += 3.0 * LAT_PER_M;
            c.update(sample(ts, lat, 3.0, 10.0, alt));
            ts += 1.0;
            assert!(ts < 40.0);
        }
        // A descending lift span: straight line, fixed course, fast enough
        // and dropping hard, but linearity ~1 and course stddev ~0.
        for _ in 0..30 {
            alt -= 0.8;
            lat += 4.0 * LAT_PER_M;
            c.update(sample(ts, lat, 4.0, 10.0, alt));
            ts += 1.0;
        }
        assert_eq!(c.state(), ActivityState::OnLift);
    }

    #[test]
    fn test_lift_line_holds_across_due_north() {
        let mut c = classifier();
        let mut alt = 1000.0;
        let mut ts = 0.0;
        let mut lat = 37.64;
        while c.state() != ActivityState::OnLift {
            alt += 0.8;
            lat += 3.0 * LAT_PER_M;
            c.update(sample(ts, lat, 3.0, 1.0, alt));
            ts += 1.0;
            assert!(ts < 40.0);
        }
        // Same straight descending span, but the heading jitters across
        // the 0/360 seam. The wraparound must not read as a curved track.
        for i in 0..30 {
            alt -= 0.8;
            lat += 4.0 * LAT_PER_M;
            let course = if i % 2 == 0 { 359.0 } else { 1.0 };
            c.update(sample(ts, lat, 4.0, course, alt));
            ts += 1.0;
        }
        assert_eq!(c.state(), ActivityState::OnLift);
    }

    #[test]
    fn test_lift_exit_to_riding_with_curved_track() {
        let mut c = classifier();
        let mut alt = 1000.0;
        let mut ts = 0.0;
        let mut lat = 37.64;
        while c.state() != ActivityState::OnLift {
            alt += 0.8;
            lat += 3.0 * LAT_PER_M;
            c.update(sample(ts, lat, 3.0, 10.0, alt));
            ts += 1.0;
            assert!(ts < 40.0);
        }
        // Irregular heading, strong descent: a real run off the lift
        let mut saw_start = false;
        for i in 0..30 {
            alt -= 1.0;
            lat += 4.0 * LAT_PER_M;
            let course = if i % 2 == 0 { 120.0 } else { 210.0 };
            let events = c.update(sample(ts, lat, 5.0, course, alt));
            saw_start |= events.iter().any(|e| matches!(e, ClassifierEvent::RunStarted { .. }));
            ts += 1.0;
            if c.state() == ActivityState::Riding {
                break;
            }
        }
        assert_eq!(c.state(), ActivityState::Riding);
        assert!(saw_start);
    }

    #[test]
    fn test_pending_rest_timeout_corrects_end_time() {
        let mut c = classifier();
        let run_start = start_run(&mut c, 0.0);

        // Keep riding until t=100, then stall
        let mut ts = 12.0;
        let mut lat = 37.66;
        let mut alt = 950.0;
        while ts < 100.0 {
            lat += 8.0 * LAT_PER_M;
            alt -= 1.5;
            c.update(sample(ts, lat, 8.0, if ts as u64 % 2 == 0 { 140.0 } else { 200.0 }, alt));
            ts += 1.0;
        }
        assert_eq!(c.state(), ActivityState::Riding);

        // Idle from t=100; PENDING_REST arms once the 20 s window is idle
        let mut events = Vec::new();
        while ts <= 121.0 {
            events.extend(c.update(sample(ts, lat, 0.3, 0.0, alt)));
            ts += 1.0;
        }
        assert_eq!(c.state(), ActivityState::PendingRest);

        // Timeout with no recovery: resting at idle + 180 s
        let timeout_events = c.advance_clock(280.0);
        assert_eq!(c.state(), ActivityState::Resting);
        let end = timeout_events
            .iter()
            .find_map(|e| match e {
                ClassifierEvent::RunEnded { start, end } => {
                    assert_eq!(*start, run_start);
                    Some(*end)
                }
                _ => None,
            })
            .expect("run ended");
        assert_eq!(end, 100.0);

        // The sealed riding event carries the corrected end time
        let riding = c
            .timeline()
            .iter()
            .find(|e| e.kind == TimelineKind::Riding)
            .expect("riding event");
        assert_eq!(riding.end, Some(100.0));
    }

    #[test]
    fn test_pending_rest_resume() {
        let mut c = classifier();
        start_run(&mut c, 0.0);
        let mut ts = 12.0;
        let mut lat = 37.66;
        let mut alt = 950.0;
        while ts < 60.0 {
            lat += 8.0 * LAT_PER_M;
            alt -= 1.5;
            c.update(sample(ts, lat, 8.0, 150.0, alt));
            ts += 1.0;
        }
        while c.state() != ActivityState::PendingRest {
            c.update(sample(ts, lat, 0.3, 0.0, alt));
            ts += 1.0;
            assert!(ts < 120.0);
        }
        // Fast descent again: resume the same run, riding event stays open
        let events = c.update(sample(ts, lat, 3.5, 150.0, alt - 4.0));
        assert_eq!(c.state(), ActivityState::Riding);
        assert!(!events.iter().any(|e| matches!(e, ClassifierEvent::RunEnded { .. })));
        let open = c.timeline().last().unwrap();
        assert_eq!(open.kind, TimelineKind::Riding);
        assert!(open.end.is_none());
    }

    #[test]
    fn test_flush_seals_open_run_at_now() {
        let mut c = classifier();
        let run_start = start_run(&mut c, 0.0);
        let events = c.flush(50.0);
        let ended = events.iter().any(|e| {
            matches!(e, ClassifierEvent::RunEnded { start, end } if *start == run_start && *end == 50.0)
        });
        assert!(ended);
        assert!(c.timeline().iter().all(|e| e.end.is_some()));
    }

    #[test]
    fn test_single_open_timeline_event() {
        let mut c = classifier();
        start_run(&mut c, 0.0);
        let open = c.timeline().iter().filter(|e| e.end.is_none()).count();
        assert_eq!(open, 1);
        for w in c.timeline().windows(2) {
            assert!(w[0].end.is_some());
        }
    }
}
