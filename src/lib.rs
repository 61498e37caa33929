//! Ski activity tracking engine: classifies a skier's current activity
//! (riding, on a lift, resting) from phone-grade GPS, barometer and
//! accelerometer streams, and scores each confirmed run for carving
//! precision and ride smoothness.

pub mod activity;
pub mod attribution;
pub mod diagnostics;
pub mod edge;
pub mod flow;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod types;
pub mod vertical;

pub use activity::{ActivityClassifier, ClassifierConfig, ClassifierEvent};
pub use attribution::{SlopeMap, SlopeZone};
pub use pipeline::{PipelineConfig, PipelineHandle};
pub use session::{SessionConfig, SessionState, SessionTracker};
pub use types::{
    ActivityState, BaroSample, LocationSample, MotionSample, RunRecord, ScoreBreakdown,
    SessionSummary, TimelineEvent, TimelineKind, TrackerError, TrackerResult,
};
