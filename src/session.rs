//! Session orchestration: owns every analyzer, routes the three sensor
//! streams through them in arrival order, and turns confirmed runs into
//! immutable `RunRecord`s. All methods take `&mut self`; the pipeline
//! provides the single caller.

use chrono::Utc;
use log::{info, warn};

use crate::activity::{ActivityClassifier, ClassifierConfig, ClassifierEvent, TrackSample};
use crate::attribution::{AttributionConfig, SlopeAttributor, SlopeMap};
use crate::diagnostics::{DiagnosticEntry, DiagnosticLog};
use crate::edge::{EdgeConfig, EdgeScorer};
use crate::flow::{FlowConfig, FlowScorer};
use crate::ingest::{GateConfig, SampleGate};
use crate::types::{
    haversine_distance, ActivityState, BaroSample, LocationSample, MotionSample, RunRecord,
    SessionSummary, TimelineEvent, TrackerError, TrackerResult,
};
use crate::vertical::{VerticalConfig, VerticalEstimator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub gate: GateConfig,
    pub vertical: VerticalConfig,
    pub classifier: ClassifierConfig,
    pub attribution: AttributionConfig,
    pub flow: FlowConfig,
    pub edge: EdgeConfig,
    /// Platform barometer availability, queried once at session start.
    pub baro_available: bool,
    /// Record the per-sample diagnostic trace.
    pub diagnostics: bool,
    /// Runs shorter than this are discarded as noise, seconds.
    pub min_run_secs: f64,
    /// ... as are short runs with little drop (a lift-line false start).
    pub short_run_secs: f64,
    pub short_run_min_drop: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(false)
    }
}

impl SessionConfig {
    pub fn new(baro_available: bool) -> Self {
        Self {
            gate: GateConfig::default(),
            vertical: VerticalConfig::default(),
            classifier: ClassifierConfig::default(),
            attribution: AttributionConfig::default(),
            flow: FlowConfig::default(),
            edge: EdgeConfig::default(),
            baro_available,
            diagnostics: false,
            min_run_secs: 5.0,
            short_run_secs: 40.0,
            short_run_min_drop: 30.0,
        }
    }
}

pub struct SessionTracker {
    config: SessionConfig,
    state: SessionState,
    session_id: String,
    started_at: f64,

    gate: SampleGate,
    vertical: VerticalEstimator,
    classifier: Option<ActivityClassifier>,
    slopes: SlopeMap,
    attributor: SlopeAttributor,
    flow: FlowScorer,
    edge: EdgeScorer,
    diagnostics: DiagnosticLog,

    runs: Vec<RunRecord>,
    run_counter: u32,
    run_max_speed: f64,
    run_speed_sum: f64,
    run_speed_samples: u32,

    total_distance: f64,
    total_drop: f64,
    last_fix: Option<(f64, f64)>,

    summary: Option<SessionSummary>,
}

impl SessionTracker {
    pub fn new(config: SessionConfig, slopes: SlopeMap) -> Self {
        let gate = SampleGate::new(config.gate.clone());
        let vertical = VerticalEstimator::new(config.baro_available, config.vertical.clone());
        let attributor = SlopeAttributor::new(config.attribution.clone());
        let flow = FlowScorer::new(config.flow.clone());
        let edge = EdgeScorer::new(config.edge.clone());
        let diagnostics = DiagnosticLog::new(config.diagnostics);
        Self {
            config,
            state: SessionState::Idle,
            session_id: String::new(),
            started_at: 0.0,
            gate,
            vertical,
            classifier: None,
            slopes,
            attributor,
            flow,
            edge,
            diagnostics,
            runs: Vec::new(),
            run_counter: 0,
            run_max_speed: 0.0,
            run_speed_sum: 0.0,
            run_speed_samples: 0,
            total_distance: 0.0,
            total_drop: 0.0,
            last_fix: None,
            summary: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn activity(&self) -> Option<ActivityState> {
        self.classifier.as_ref().map(|c| c.state())
    }

    pub fn timeline(&self) -> &[TimelineEvent] {
        self.classifier.as_ref().map(|c| c.timeline()).unwrap_or(&[])
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn start(&mut self, now: f64) -> TrackerResult<()> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Running | SessionState::Paused => return Err(TrackerError::AlreadyRunning),
            SessionState::Stopped => {
                return Err(TrackerError::InvalidState("session already stopped".into()))
            }
        }
        self.session_id = format!("session-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        self.started_at = now;
        self.classifier = Some(ActivityClassifier::new(self.config.classifier.clone(), now));
        self.state = SessionState::Running;
        info!(
            "session {} started at t={:.1} (barometer: {})",
            self.session_id,
            now,
            if self.vertical.is_baro_available() { "yes" } else { "no" }
        );
        Ok(())
    }

    pub fn pause(&mut self) -> TrackerResult<()> {
        if self.state != SessionState::Running {
            return Err(TrackerError::NotRunning);
        }
        self.state = SessionState::Paused;
        info!("session {} paused", self.session_id);
        Ok(())
    }

    pub fn resume(&mut self) -> TrackerResult<()> {
        if self.state != SessionState::Paused {
            return Err(TrackerError::InvalidState("session is not paused".into()));
        }
        self.state = SessionState::Running;
        info!("session {} resumed", self.session_id);
        Ok(())
    }

    /// Stop the session and seal the summary. Idempotent: repeated stops
    /// return the same sealed summary.
    pub fn stop(&mut self, now: f64) -> TrackerResult<SessionSummary> {
        match self.state {
            SessionState::Stopped => {
                return self.summary.clone().ok_or(TrackerError::NotRunning)
            }
            SessionState::Running | SessionState::Paused => {}
            SessionState::Idle => return Err(TrackerError::NotRunning),
        }
        if let Some(mut classifier) = self.classifier.take() {
            let events = classifier.flush(now);
            self.classifier = Some(classifier);
            self.apply_events(&events);
        }
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            ended_at: now,
            total_distance_m: self.total_distance,
            total_vertical_drop_m: self.total_drop,
            run_count: self.runs.len() as u32,
            best_edge_score: self.runs.iter().map(|r| r.edge_score).max().unwrap_or(0),
            best_flow_score: self.runs.iter().map(|r| r.flow_score).max().unwrap_or(0),
            runs: self.runs.clone(),
        };
        info!(
            "session {} stopped: {} runs, {:.0} m descended",
            summary.session_id, summary.run_count, summary.total_vertical_drop_m
        );
        self.summary = Some(summary.clone());
        self.state = SessionState::Stopped;
        Ok(summary)
    }

    pub fn handle_location(&mut self, sample: &LocationSample) -> TrackerResult<()> {
        match self.state {
            SessionState::Running => {}
            SessionState::Paused => return Ok(()),
            _ => return Err(TrackerError::NotRunning),
        }

        if self.gate.accepts(sample).is_some() {
            // Rejected fix: nothing is folded in, but the pending windows
            // still see time pass.
            let events = self
                .classifier
                .as_mut()
                .map(|c| c.advance_clock(sample.timestamp))
                .unwrap_or_default();
            self.apply_events(&events);
            return Ok(());
        }

        let resting = self.activity() == Some(ActivityState::Resting);
        self.vertical.feed_location(sample, resting);
        let altitude = self.vertical.altitude().unwrap_or(sample.altitude);

        let track = TrackSample {
            timestamp: sample.timestamp,
            latitude: sample.latitude,
            longitude: sample.longitude,
            speed: sample.speed,
            course: sample.course,
            altitude,
        };
        let events = self
            .classifier
            .as_mut()
            .map(|c| c.update(track))
            .unwrap_or_default();
        self.apply_events(&events);

        if self.activity() == Some(ActivityState::Riding) {
            let trusted = self.gate.trusts_speed(sample);
            self.flow.feed_speed(sample.timestamp, sample.speed, trusted);
            self.edge.note_speed(sample.speed);
            self.attributor.observe(&self.slopes, sample.latitude, sample.longitude);

            self.run_max_speed = self.run_max_speed.max(sample.speed);
            self.run_speed_sum += sample.speed;
            self.run_speed_samples += 1;
        }

        // Session distance is travel over every accepted fix, lift legs
        // and traverses included.
        if let Some((lat, lon)) = self.last_fix {
            self.total_distance += haversine_distance(lat, lon, sample.latitude, sample.longitude);
        }
        self.last_fix = Some((sample.latitude, sample.longitude));

        self.diagnostics.record(DiagnosticEntry {
            timestamp: sample.timestamp,
            altitude: self.vertical.altitude(),
            vertical_speed: self.vertical.vertical_speed(),
            speed: sample.speed,
            state: self.activity().unwrap_or(ActivityState::Resting),
        });
        Ok(())
    }

    pub fn handle_motion(&mut self, sample: &MotionSample) -> TrackerResult<()> {
        match self.state {
            SessionState::Running => {}
            SessionState::Paused => return Ok(()),
            _ => return Err(TrackerError::NotRunning),
        }
        if self.activity() == Some(ActivityState::Riding) {
            self.flow.feed_motion(sample.timestamp, sample.magnitude);
            self.edge.feed_motion(sample.timestamp, sample.magnitude);
        }
        Ok(())
    }

    pub fn handle_baro(&mut self, sample: &BaroSample) -> TrackerResult<()> {
        match self.state {
            SessionState::Running => {}
            SessionState::Paused => return Ok(()),
            _ => return Err(TrackerError::NotRunning),
        }
        self.vertical.feed_baro(sample);
        Ok(())
    }

    fn apply_events(&mut self, events: &[ClassifierEvent]) {
        for event in events {
            match event {
                ClassifierEvent::RunStarted { start } => self.begin_run(*start),
                ClassifierEvent::RunEnded { start, end } => self.finish_run(*start, *end),
                ClassifierEvent::TightenAccuracy { timestamp } => {
                    self.gate.tighten(*timestamp);
                }
                ClassifierEvent::StateChanged { from, to, timestamp } => {
                    info!("state {:?} -> {:?} at t={:.1}", from, to, timestamp);
                }
            }
        }
    }

    fn begin_run(&mut self, start: f64) {
        info!("run candidate confirmed, start t={:.1}", start);
        self.vertical.begin_run();
        self.flow.begin_run();
        self.edge.begin_run();
        self.attributor.begin_run(&self.slopes);
        self.run_max_speed = 0.0;
        self.run_speed_sum = 0.0;
        self.run_speed_samples = 0;
    }

    fn finish_run(&mut self, start: f64, end: f64) {
        let vert = self.vertical.end_run();
        let flow = self.flow.finalize();
        let edge = self.edge.finalize();
        let slope = self.attributor.finalize(&self.slopes);
        let duration = (end - start).max(0.0);

        // Session totals count every confirmed descent, including ones
        // too short to record.
        self.total_drop += vert.drop;

        let degenerate = duration < self.config.min_run_secs
            || (duration <= self.config.short_run_secs
                && vert.drop <= self.config.short_run_min_drop);
        if degenerate {
            warn!(
                "discarding degenerate run: {:.1} s, {:.1} m drop",
                duration, vert.drop
            );
            return;
        }

        self.run_counter += 1;
        let avg_speed = if self.run_speed_samples > 0 {
            self.run_speed_sum / self.run_speed_samples as f64
        } else {
            0.0
        };
        let record = RunRecord {
            run_number: self.run_counter,
            slope,
            start_time: start,
            end_time: end,
            duration,
            max_speed: self.run_max_speed,
            avg_speed,
            vertical_drop: vert.drop,
            edge_score: edge.score,
            flow_score: flow.score,
            max_g_force: edge.max_g,
            edge_breakdown: edge.breakdown,
            flow_breakdown: flow.breakdown,
        };
        info!(
            "run {} recorded: {:?}, {:.0} m drop, edge {}, flow {}",
            record.run_number, record.slope, record.vertical_drop, record.edge_score,
            record.flow_score
        );
        self.runs.push(record);
    }
}
