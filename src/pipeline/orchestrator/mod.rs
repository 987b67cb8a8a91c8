// herringbone/src/pipeline/orchestrator/mod.rs
//!
//! Incident orchestrator: turns correlated candidates into incidents and
//! manages their lifecycle.
//!
//! Reconciliation is create-or-update: a candidate attaches to an
//! unresolved, recently-updated incident when their entity signatures match
//! or when the incident already holds one of the candidate's detection ids
//! (the latter keeps entity-less detections from re-opening a fresh incident
//! on every correlation pass). Anything else opens a new incident. Lookup and
//! mutation happen under one lock so two candidates with the same signature
//! can never race into duplicate incidents. Every mutation, automatic or
//! analyst-driven, appends a timestamped note; notes are append-only and a
//! pass that attaches nothing new leaves the incident untouched.

use crate::error::{HerringboneError, Result};
use crate::orchestrator_log;
use crate::pipeline::models::{
    Detection, Incident, IncidentCandidate, IncidentId, IncidentStatus, Note, Priority,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Note text for automatic incident creation
pub const NOTE_CREATED: &str = "Incident created from detection";
/// Note text for automatic incident updates
pub const NOTE_UPDATED: &str = "Incident updated from detection";

/// Configuration for reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// A candidate only attaches to an incident updated within this window
    pub reattach_window_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reattach_window_seconds: 30 * 60,
        }
    }
}

/// What reconciliation did with a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Attached,
}

/// Owns the live incident set and serializes all mutations.
#[derive(Debug, Clone, Default)]
pub struct IncidentOrchestrator {
    config: OrchestratorConfig,
    incidents: Arc<Mutex<HashMap<IncidentId, Incident>>>,
}

impl IncidentOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            incidents: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create-or-update an incident from a candidate. The signature lookup
    /// and the mutation run under the same lock, which is the
    /// compare-and-swap discipline that keeps concurrent reconciles of the
    /// same signature from creating duplicates.
    pub fn reconcile(
        &self,
        candidate: &IncidentCandidate,
        now: u64,
    ) -> (Incident, ReconcileAction) {
        let mut incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());

        let signature = candidate.entities.signature();
        let window_start = now.saturating_sub(self.config.reattach_window_seconds);

        // match by entity signature, or by detection-id overlap so an
        // entity-less candidate re-correlated on a later pass lands on the
        // incident that already holds its detections
        let existing = incidents
            .values_mut()
            .filter(|i| !i.is_resolved())
            .filter(|i| i.updated_at >= window_start)
            .filter(|i| {
                (!signature.is_empty() && i.signature() == signature)
                    || candidate
                        .detections
                        .iter()
                        .any(|d| i.detections.contains(d))
            })
            .max_by_key(|i| i.updated_at);

        if let Some(incident) = existing {
            if attach_candidate(incident, candidate, now) {
                orchestrator_log!(
                    info,
                    "attached {} detection(s) to incident {}",
                    candidate.detections.len(),
                    incident.id
                );
            }
            return (incident.clone(), ReconcileAction::Attached);
        }

        let incident = create_incident(candidate, now);
        orchestrator_log!(
            info,
            "created incident {} ({:?}, severity {})",
            incident.id,
            incident.priority,
            incident.severity
        );
        incidents.insert(incident.id.clone(), incident.clone());
        (incident, ReconcileAction::Created)
    }

    /// Analyst action: assign an owner
    pub fn assign(&self, incident_id: &str, owner: &str, now: u64) -> Result<Incident> {
        self.mutate(incident_id, now, |incident| {
            incident.owner = Some(owner.to_string());
            if incident.status == IncidentStatus::Open {
                incident.status = IncidentStatus::Investigating;
            }
            format!("Incident assigned to {}", owner)
        })
    }

    /// Analyst action: resolve the incident. An owner is recommended but not
    /// enforced; closing an unowned incident is logged.
    pub fn close(&self, incident_id: &str, now: u64) -> Result<Incident> {
        self.mutate(incident_id, now, |incident| {
            if incident.owner.is_none() {
                orchestrator_log!(warn, "closing incident {} without an owner", incident.id);
            }
            incident.status = IncidentStatus::Resolved;
            "Incident closed".to_string()
        })
    }

    /// Analyst action: override the priority
    pub fn escalate(&self, incident_id: &str, priority: Priority, now: u64) -> Result<Incident> {
        self.mutate(incident_id, now, |incident| {
            incident.priority = priority;
            format!("Incident escalated to {:?}", priority)
        })
    }

    /// Seed the live set from persisted incidents, e.g. at process start
    pub fn import(&self, incident: Incident) {
        let mut incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        incidents.insert(incident.id.clone(), incident);
    }

    pub fn get(&self, incident_id: &str) -> Option<Incident> {
        let incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        incidents.get(incident_id).cloned()
    }

    /// All incidents, oldest first
    pub fn list(&self) -> Vec<Incident> {
        let incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Incident> = incidents.values().cloned().collect();
        all.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        all
    }

    fn mutate<F>(&self, incident_id: &str, now: u64, apply: F) -> Result<Incident>
    where
        F: FnOnce(&mut Incident) -> String,
    {
        let mut incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        let incident = incidents.get_mut(incident_id).ok_or_else(|| {
            HerringboneError::InputError(format!("unknown incident: {}", incident_id))
        })?;

        let message = apply(incident);
        incident.notes.push(Note {
            message,
            author: incident.owner.clone(),
            created_at: now,
        });
        incident.updated_at = now;
        Ok(incident.clone())
    }
}

fn create_incident(candidate: &IncidentCandidate, now: u64) -> Incident {
    let title = candidate
        .rule_names
        .first()
        .cloned()
        .unwrap_or_else(|| "New incident from detection".to_string());

    Incident {
        id: Uuid::new_v4().to_string(),
        title,
        description: "Incident created automatically from detection".to_string(),
        status: IncidentStatus::Open,
        priority: candidate.priority,
        severity: candidate.severity,
        entities: candidate.entities.clone(),
        detections: candidate.detections.clone(),
        events: candidate.events.clone(),
        owner: None,
        notes: vec![Note {
            message: NOTE_CREATED.to_string(),
            author: None,
            created_at: now,
        }],
        created_at: now,
        updated_at: now,
    }
}

/// Fold a candidate into an existing incident. Returns whether anything
/// changed; a no-op pass appends no note and leaves updated_at alone.
fn attach_candidate(incident: &mut Incident, candidate: &IncidentCandidate, now: u64) -> bool {
    let mut changed = false;

    for detection_id in &candidate.detections {
        if !incident.detections.contains(detection_id) {
            incident.detections.push(detection_id.clone());
            changed = true;
        }
    }
    for event_id in &candidate.events {
        if !incident.events.contains(event_id) {
            incident.events.push(event_id.clone());
            changed = true;
        }
    }

    if candidate.severity > incident.severity {
        incident.severity = candidate.severity;
        let banded = Priority::from_severity(incident.severity);
        if banded > incident.priority {
            incident.priority = banded;
        }
        changed = true;
    }

    if changed {
        incident.notes.push(Note {
            message: NOTE_UPDATED.to_string(),
            author: None,
            created_at: now,
        });
        incident.updated_at = now;
    }
    changed
}

/// Data-quality check: an incident's severity should dominate its linked
/// detections. Violations are logged, never fatal.
pub fn severity_invariant_ok(incident: &Incident, detections: &[Detection]) -> bool {
    let max_linked = detections
        .iter()
        .filter(|d| incident.detections.contains(&d.id))
        .map(|d| d.severity)
        .max()
        .unwrap_or(0);

    if incident.severity < max_linked {
        orchestrator_log!(
            warn,
            "incident {} severity {} below max linked detection severity {}",
            incident.id,
            incident.severity,
            max_linked
        );
        return false;
    }
    true
}
