//! Optional per-sample diagnostic trace. Off by default; when enabled the
//! session appends one entry per accepted location sample and the whole
//! trace can be dumped to JSON after the fact.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{ActivityState, TrackerError};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub timestamp: f64,
    pub altitude: Option<f64>,
    pub vertical_speed: f64,
    pub speed: f64,
    pub state: ActivityState,
}

pub struct DiagnosticLog {
    enabled: bool,
    entries: Vec<DiagnosticEntry>,
}

impl DiagnosticLog {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, entries: Vec::new() }
    }

    pub fn record(&mut self, entry: DiagnosticEntry) {
        if self.enabled {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[DiagnosticEntry] {
        &self.entries
    }

    pub fn save(&self, path: &Path) -> Result<(), TrackerError> {
        let file = File::create(path).map_err(|e| TrackerError::Storage(e.to_string()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.entries)
            .map_err(|e| TrackerError::Storage(e.to_string()))
    }
}
