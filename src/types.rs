use serde::{Deserialize, Serialize};
use thiserror::Error;

/// GPS fix from the platform location service. Speeds are m/s, accuracies
/// are meters (horizontal) and m/s (speed), course is degrees from north.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationSample {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub horizontal_accuracy: f64,
    pub speed_accuracy: f64,
    pub course: f64,
    pub altitude: f64,
}

/// Total acceleration magnitude (gravity + user) in g units, ~60 Hz.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp: f64,
    pub magnitude: f64,
}

/// Relative altitude delta from the platform's barometric baseline, meters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BaroSample {
    pub timestamp: f64,
    pub relative_altitude: f64,
}

/// Current activity classification. Exactly one is active at a time,
/// owned by the activity classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Resting,
    PendingRide,
    Riding,
    PendingRest,
    OnLift,
}

/// Timeline entry types exposed to consumers. The pending states are
/// internal to the classifier and never appear on the timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Riding,
    OnLift,
    Resting,
}

/// Append-only timeline entry. `end` stays `None` while the entry is open
/// and is sealed exactly once, when a transition away is confirmed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub kind: TimelineKind,
    pub start: f64,
    pub end: Option<f64>,
}

impl TimelineEvent {
    pub fn duration(&self) -> Option<f64> {
        self.end.map(|e| e - self.start)
    }
}

/// Per-metric score breakdown. `Empty` is the explicit default for runs
/// where a scorer collected nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreBreakdown {
    #[default]
    Empty,
    Flow {
        avg_stability: f64,
        stop_seconds: f64,
        hard_brake_count: u32,
        chatter_count: u32,
        quiet_count: u32,
    },
    Edge {
        raw_score: f64,
        active_seconds: f64,
        high_tier_ratio: f64,
        max_g: f64,
    },
}

/// Finalized run. Immutable after creation; owned by the session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_number: u32,
    pub slope: Option<String>,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub max_speed: f64,
    pub avg_speed: f64,
    pub vertical_drop: f64,
    pub edge_score: u32,
    pub flow_score: u32,
    pub max_g_force: f64,
    pub edge_breakdown: ScoreBreakdown,
    pub flow_breakdown: ScoreBreakdown,
}

/// Session-wide totals, sealed at stop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: f64,
    pub ended_at: f64,
    pub total_distance_m: f64,
    pub total_vertical_drop_m: f64,
    pub run_count: u32,
    pub best_edge_score: u32,
    pub best_flow_score: u32,
    pub runs: Vec<RunRecord>,
}

/// Tracker error types
#[derive(Error, Debug, Clone)]
pub enum TrackerError {
    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Pipeline channel closed")]
    ChannelClosed,
}

pub type TrackerResult<T> = Result<T, TrackerError>;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two fixes, meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        assert_eq!(haversine_distance(37.5, 128.6, 37.5, 128.6), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111 km
        let d = haversine_distance(37.0, 128.6, 38.0, 128.6);
        assert!((d - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn test_breakdown_default_is_empty() {
        assert_eq!(ScoreBreakdown::default(), ScoreBreakdown::Empty);
    }

    #[test]
    fn test_timeline_duration() {
        let mut ev = TimelineEvent { kind: TimelineKind::Riding, start: 10.0, end: None };
        assert!(ev.duration().is_none());
        ev.end = Some(25.0);
        assert_eq!(ev.duration(), Some(15.0));
    }
}
