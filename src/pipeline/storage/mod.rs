// herringbone/src/pipeline/storage/mod.rs
//!
//! Persistent storage layer for pipeline data using sled
//!
//! Provides:
//! - Event storage and retrieval (append-only)
//! - Parse result and event state persistence
//! - Detection and incident storage
//! - Rule storage
//!
//! Plus `with_retry`, the bounded-backoff wrapper stages use for transient
//! store failures.

use crate::error::{HerringboneError, Result};
use crate::pipeline::models::{
    Detection, DetectionId, Event, EventId, EventState, Incident, IncidentId, ParseResult,
    RetryConfig, Rule,
};
use serde::{Deserialize, Serialize};
use sled::{Config, Db, Tree};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[inline]
fn json_to_string<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

#[inline]
fn string_to_json<T: for<'de> Deserialize<'de>>(json: &str) -> Option<T> {
    serde_json::from_str(json).ok()
}

/// Trait for pipeline storage implementations
#[async_trait::async_trait]
pub trait PipelineStorage: Send + Sync {
    async fn store_event(&self, event: &Event) -> Result<()>;
    async fn get_event(&self, event_id: &EventId) -> Option<Event>;
    async fn list_events(&self) -> Vec<Event>;
    async fn store_parse_result(&self, result: &ParseResult) -> Result<()>;
    async fn get_parse_results(&self, event_id: &EventId) -> Vec<ParseResult>;
    async fn store_event_state(&self, state: &EventState) -> Result<()>;
    async fn get_event_state(&self, event_id: &EventId) -> Option<EventState>;
    async fn store_detection(&self, detection: &Detection) -> Result<()>;
    async fn get_detection(&self, detection_id: &DetectionId) -> Option<Detection>;
    async fn list_detections(&self) -> Vec<Detection>;
    async fn store_incident(&self, incident: &Incident) -> Result<()>;
    async fn get_incident(&self, incident_id: &IncidentId) -> Option<Incident>;
    async fn list_incidents(&self) -> Vec<Incident>;
    async fn store_rule(&self, rule: &Rule) -> Result<()>;
    async fn get_all_rules(&self) -> Vec<Rule>;
}

/// Storage location and lifetime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub storage_path: PathBuf,
    /// When true the database lives only as long as the process
    pub temporary: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("data/herringbone.db"),
            temporary: false,
        }
    }
}

/// Sled-based persistent storage for the pipeline
#[derive(Debug, Clone)]
pub struct SledPipelineStorage {
    db: Arc<Mutex<Db>>,
}

impl SledPipelineStorage {
    /// Open or create storage
    pub fn new(config: StorageConfig) -> Result<Self> {
        if let Some(parent) = config.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Config::new()
            .path(&config.storage_path)
            .temporary(config.temporary)
            .flush_every_ms(Some(5000))
            .open()?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Process-lifetime storage for tests and dry runs
    pub fn temporary() -> Result<Self> {
        let db = Config::new().temporary(true).open()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn put<T: Serialize>(&self, tree_name: &[u8], key: &str, value: &T) -> Result<()> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tree: Tree = db.open_tree(tree_name)?;
        let json = json_to_string(value)?;
        tree.insert(key.as_bytes(), json.as_bytes())?;
        Ok(())
    }

    fn fetch<T: for<'de> Deserialize<'de>>(&self, tree_name: &[u8], key: &str) -> Option<T> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tree: Tree = db.open_tree(tree_name).ok()?;
        let value = tree.get(key.as_bytes()).ok()??;
        let json = String::from_utf8(value.to_vec()).ok()?;
        string_to_json(&json)
    }

    fn scan<T: for<'de> Deserialize<'de>>(&self, tree_name: &[u8], prefix: &str) -> Vec<T> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tree: Tree = if let Ok(t) = db.open_tree(tree_name) {
            t
        } else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (_, value) in tree.scan_prefix(prefix.as_bytes()).flatten() {
            if let Ok(json) = String::from_utf8(value.to_vec()) {
                if let Some(item) = string_to_json(&json) {
                    out.push(item);
                }
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl PipelineStorage for SledPipelineStorage {
    async fn store_event(&self, event: &Event) -> Result<()> {
        self.put(b"events", &format!("event:{}", event.id), event)
    }

    async fn get_event(&self, event_id: &EventId) -> Option<Event> {
        self.fetch(b"events", &format!("event:{}", event_id))
    }

    async fn list_events(&self) -> Vec<Event> {
        self.scan(b"events", "event:")
    }

    async fn store_parse_result(&self, result: &ParseResult) -> Result<()> {
        let card = result.card.as_deref().unwrap_or("-");
        self.put(
            b"parse_results",
            &format!("parse:{}:{}", result.event_id, card),
            result,
        )
    }

    async fn get_parse_results(&self, event_id: &EventId) -> Vec<ParseResult> {
        self.scan(b"parse_results", &format!("parse:{}:", event_id))
    }

    async fn store_event_state(&self, state: &EventState) -> Result<()> {
        self.put(b"event_states", &format!("state:{}", state.event_id), state)
    }

    async fn get_event_state(&self, event_id: &EventId) -> Option<EventState> {
        self.fetch(b"event_states", &format!("state:{}", event_id))
    }

    async fn store_detection(&self, detection: &Detection) -> Result<()> {
        self.put(
            b"detections",
            &format!("detection:{}", detection.id),
            detection,
        )
    }

    async fn get_detection(&self, detection_id: &DetectionId) -> Option<Detection> {
        self.fetch(b"detections", &format!("detection:{}", detection_id))
    }

    async fn list_detections(&self) -> Vec<Detection> {
        self.scan(b"detections", "detection:")
    }

    async fn store_incident(&self, incident: &Incident) -> Result<()> {
        self.put(b"incidents", &format!("incident:{}", incident.id), incident)
    }

    async fn get_incident(&self, incident_id: &IncidentId) -> Option<Incident> {
        self.fetch(b"incidents", &format!("incident:{}", incident_id))
    }

    async fn list_incidents(&self) -> Vec<Incident> {
        self.scan(b"incidents", "incident:")
    }

    async fn store_rule(&self, rule: &Rule) -> Result<()> {
        self.put(b"rules", &format!("rule:{}", rule.id), rule)
    }

    async fn get_all_rules(&self) -> Vec<Rule> {
        self.scan(b"rules", "rule:")
    }
}

/// In-memory storage for testing
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    events: Arc<Mutex<HashMap<EventId, Event>>>,
    parse_results: Arc<Mutex<HashMap<(EventId, String), ParseResult>>>,
    event_states: Arc<Mutex<HashMap<EventId, EventState>>>,
    detections: Arc<Mutex<HashMap<DetectionId, Detection>>>,
    incidents: Arc<Mutex<HashMap<IncidentId, Incident>>>,
    rules: Arc<Mutex<HashMap<String, Rule>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PipelineStorage for MemoryStorage {
    async fn store_event(&self, event: &Event) -> Result<()> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: &EventId) -> Option<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_id)
            .cloned()
    }

    async fn list_events(&self) -> Vec<Event> {
        let mut all: Vec<Event> = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| (a.ingested_at, &a.id).cmp(&(b.ingested_at, &b.id)));
        all
    }

    async fn store_parse_result(&self, result: &ParseResult) -> Result<()> {
        let card = result.card.clone().unwrap_or_else(|| "-".to_string());
        let mut results = self.parse_results.lock().unwrap_or_else(|e| e.into_inner());
        results.insert((result.event_id.clone(), card), result.clone());
        Ok(())
    }

    async fn get_parse_results(&self, event_id: &EventId) -> Vec<ParseResult> {
        let results = self.parse_results.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<ParseResult> = results
            .iter()
            .filter(|((eid, _), _)| eid == event_id)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by(|a, b| a.card.cmp(&b.card));
        out
    }

    async fn store_event_state(&self, state: &EventState) -> Result<()> {
        let mut states = self.event_states.lock().unwrap_or_else(|e| e.into_inner());
        states.insert(state.event_id.clone(), state.clone());
        Ok(())
    }

    async fn get_event_state(&self, event_id: &EventId) -> Option<EventState> {
        self.event_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_id)
            .cloned()
    }

    async fn store_detection(&self, detection: &Detection) -> Result<()> {
        let mut detections = self.detections.lock().unwrap_or_else(|e| e.into_inner());
        detections.insert(detection.id.clone(), detection.clone());
        Ok(())
    }

    async fn get_detection(&self, detection_id: &DetectionId) -> Option<Detection> {
        self.detections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(detection_id)
            .cloned()
    }

    async fn list_detections(&self) -> Vec<Detection> {
        let mut all: Vec<Detection> = self
            .detections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        all
    }

    async fn store_incident(&self, incident: &Incident) -> Result<()> {
        let mut incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        incidents.insert(incident.id.clone(), incident.clone());
        Ok(())
    }

    async fn get_incident(&self, incident_id: &IncidentId) -> Option<Incident> {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(incident_id)
            .cloned()
    }

    async fn list_incidents(&self) -> Vec<Incident> {
        let mut all: Vec<Incident> = self
            .incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        all
    }

    async fn store_rule(&self, rule: &Rule) -> Result<()> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn get_all_rules(&self) -> Vec<Rule> {
        let mut all: Vec<Rule> = self
            .rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Run a storage operation with bounded exponential backoff.
///
/// Retryable errors (transient store failures, concurrency conflicts) are
/// retried up to the configured attempt budget; each retry doubles the delay
/// up to the cap. A non-retryable error is returned as-is, and an exhausted
/// budget escalates to a fatal stage error.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay_ms = config.base_delay_ms;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    op_name,
                    attempt,
                    config.max_attempts,
                    delay_ms,
                    e
                );
                last_error = Some(e);
                if attempt < config.max_attempts {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(config.max_delay_ms);
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(HerringboneError::FatalStageError(format!(
        "{} failed after {} attempts: {}",
        op_name,
        config.max_attempts,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no error recorded".to_string())
    )))
}
