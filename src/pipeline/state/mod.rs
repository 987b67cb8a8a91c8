// herringbone/src/pipeline/state/mod.rs
//!
//! Event state tracker: one mutable record per event id, recording progress
//! through the pipeline stages.
//!
//! Stage flags are cumulative; each stage sets its own flag plus the
//! last-stage marker and timestamp. Updates are idempotent upserts: the same
//! event id always lands on the same record. There is no terminal state;
//! any stage may re-run later. All mutations for a given key are serialized
//! behind the tracker's lock (single-writer-per-key discipline).

use crate::pipeline::models::{Analysis, EventId, EventState, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory tracker keyed by event id.
#[derive(Debug, Clone, Default)]
pub struct EventStateTracker {
    states: Arc<Mutex<HashMap<EventId, EventState>>>,
}

impl EventStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a state record exists for a freshly ingested event
    pub fn ensure(&self, event_id: &str, now: u64) -> EventState {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .entry(event_id.to_string())
            .or_insert_with(|| EventState::new(event_id.to_string(), now))
            .clone()
    }

    /// Parser stage completed for this event
    pub fn mark_parsed(&self, event_id: &str, now: u64) -> EventState {
        self.update(event_id, now, |state| {
            state.parsed = true;
            state.last_stage = Stage::Parser;
        })
    }

    /// Enrichment stage completed for this event
    pub fn mark_enriched(&self, event_id: &str, now: u64) -> EventState {
        self.update(event_id, now, |state| {
            state.enriched = true;
            state.last_stage = Stage::Enrichment;
        })
    }

    /// Detection stage completed: record the analysis snapshot. `detected`
    /// means the stage ran; `analysis.detection` says whether any rule
    /// matched. Severity is the max across matched rules, untouched when
    /// nothing matched.
    pub fn apply_detection(&self, event_id: &str, analysis: Analysis, now: u64) -> EventState {
        let severity = analysis.max_severity();
        self.update(event_id, now, |state| {
            state.detected = true;
            state.detection = analysis.detection;
            if severity.is_some() {
                state.severity = severity;
            }
            state.analysis = Some(analysis.clone());
            state.last_stage = Stage::Detector;
            state.error = None;
        })
    }

    /// Detection stage failed for this event; the failure is recorded on the
    /// state record so the event is not silently stuck.
    pub fn mark_failed(&self, event_id: &str, reason: &str, now: u64) -> EventState {
        self.update(event_id, now, |state| {
            state.detected = true;
            state.detection = false;
            state.last_stage = Stage::Detector;
            state.error = Some(reason.to_string());
        })
    }

    pub fn get(&self, event_id: &str) -> Option<EventState> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(event_id).cloned()
    }

    /// Event ids whose parser stage has not run yet
    pub fn unparsed(&self) -> Vec<EventId> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<EventId> = states
            .values()
            .filter(|s| !s.parsed)
            .map(|s| s.event_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Event ids whose detection stage has not run yet
    pub fn undetected(&self) -> Vec<EventId> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<EventId> = states
            .values()
            .filter(|s| !s.detected)
            .map(|s| s.event_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Import a record from the legacy `event_status` shape
    pub fn import_legacy(&self, legacy: LegacyEventStatus, now: u64) -> EventState {
        let state = from_legacy_status(legacy, now);
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.insert(state.event_id.clone(), state.clone());
        state
    }

    fn update<F>(&self, event_id: &str, now: u64, apply: F) -> EventState
    where
        F: FnOnce(&mut EventState),
    {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states
            .entry(event_id.to_string())
            .or_insert_with(|| EventState::new(event_id.to_string(), now));
        apply(state);
        state.last_updated = now;
        state.clone()
    }
}

/// Earlier schema generation: bare parsed/detected booleans without the
/// analysis snapshot. Accepted as migration input only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyEventStatus {
    pub event_id: EventId,
    #[serde(default)]
    pub parsed: bool,
    #[serde(default)]
    pub detected: bool,
}

/// Convert a legacy status row to the canonical state shape. The legacy
/// `detected` flag only said the stage ran, so `detection` starts false and
/// the next detector pass fills in the analysis.
pub fn from_legacy_status(legacy: LegacyEventStatus, now: u64) -> EventState {
    let mut state = EventState::new(legacy.event_id, now);
    state.parsed = legacy.parsed;
    state.detected = legacy.detected;
    if legacy.detected {
        state.last_stage = Stage::Detector;
    } else if legacy.parsed {
        state.last_stage = Stage::Parser;
    }
    state
}
