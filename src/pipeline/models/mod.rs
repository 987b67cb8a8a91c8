// herringbone/src/pipeline/models/mod.rs
//!
//! Core data models for the event pipeline
//!
//! Records are explicit tagged structs with validated field sets; the
//! loosely-typed document shapes of earlier schema generations are only
//! accepted as migration input (see `state::from_legacy_status`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Unique event identifier
pub type EventId = String;
/// Unique detection identifier
pub type DetectionId = String;
/// Unique rule identifier
pub type RuleId = String;
/// Unique incident identifier
pub type IncidentId = String;

/// Helper function to get current timestamp (unix seconds)
pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Where an event came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: String,
    pub address: String,
}

/// Raw ingested event. Immutable once created; the event store is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub raw: String,
    pub source: SourceDescriptor,
    pub ingested_at: u64,
    pub event_time: Option<u64>,
}

impl Event {
    pub fn new(raw: String, source: SourceDescriptor, ingested_at: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            raw,
            source,
            ingested_at,
            event_time: None,
        }
    }
}

/// Selector gating which events a parse card applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Selector {
    /// Exact match on `source.address`
    #[serde(rename = "source_address")]
    SourceAddress(String),
    /// Substring of the raw event text
    #[serde(rename = "raw")]
    Raw(String),
}

impl Selector {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Selector::SourceAddress(addr) => event.source.address == *addr,
            Selector::Raw(needle) => event.raw.contains(needle.as_str()),
        }
    }
}

/// Extraction mode of a parse card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardMode {
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "jsonp")]
    JsonPath,
}

/// One extraction rule inside a parse card: target field name plus a pattern
/// (a regex or a dotted json path, depending on the card mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    pub pattern: String,
}

/// Declarative parse card: selector + ordered extraction rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseCard {
    pub name: String,
    pub selector: Selector,
    pub mode: CardMode,
    pub rules: Vec<FieldRule>,
}

/// Structured fields extracted from one event by one card. Multi-valued
/// fields keep extraction order. Re-parsing is allowed; the latest result
/// wins for detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub event_id: EventId,
    pub card: Option<String>,
    pub fields: BTreeMap<String, Vec<String>>,
    pub error: Option<String>,
    pub parsed_at: u64,
}

impl ParseResult {
    pub fn new(event_id: EventId, card: Option<String>, parsed_at: u64) -> Self {
        Self {
            event_id,
            card,
            fields: BTreeMap::new(),
            error: None,
            parsed_at,
        }
    }

    /// Record a failed extraction attempt for this event
    pub fn failed(event_id: EventId, card: Option<String>, error: String, parsed_at: u64) -> Self {
        Self {
            event_id,
            card,
            fields: BTreeMap::new(),
            error: Some(error),
            parsed_at,
        }
    }
}

/// What a detection rule matches against: a parse-result field (or the raw
/// event text when `key` is `"raw"`) searched with a regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    pub key: String,
    pub regex: String,
}

/// Field key that selects the raw event text instead of a parsed field
pub const RAW_KEY: &str = "raw";

/// Immutable operator-created detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub severity: u32,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub rule: MatchSpec,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(name: &str, severity: u32, description: &str, key: &str, regex: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            severity,
            description: description.to_string(),
            category: None,
            enabled: true,
            rule: MatchSpec {
                key: key.to_string(),
                regex: regex.to_string(),
            },
        }
    }
}

/// Key attributes extracted from a matched event, used for correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub user: Option<String>,
    pub ip: Option<String>,
    pub host: Option<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.ip.is_none() && self.host.is_none()
    }

    /// Entity pairs in canonical order, for signatures and overlap checks
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(h) = &self.host {
            out.push(("host", h.as_str()));
        }
        if let Some(ip) = &self.ip {
            out.push(("ip", ip.as_str()));
        }
        if let Some(u) = &self.user {
            out.push(("user", u.as_str()));
        }
        out
    }

    /// OR semantics: any one shared key/value pair is sufficient
    pub fn overlaps(&self, other: &Entities) -> bool {
        fn same(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(x), Some(y)) if x == y)
        }
        same(&self.user, &other.user) || same(&self.ip, &other.ip) || same(&self.host, &other.host)
    }

    /// Merge entity keys, keeping existing values
    pub fn merge(&mut self, other: &Entities) {
        if self.user.is_none() {
            self.user = other.user.clone();
        }
        if self.ip.is_none() {
            self.ip = other.ip.clone();
        }
        if self.host.is_none() {
            self.host = other.host.clone();
        }
    }

    /// Canonical `key=value` signature string
    pub fn signature(&self) -> String {
        self.pairs()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One matched-rule entry inside an analysis payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionDetail {
    pub rule_name: String,
    pub severity: u32,
    pub description: String,
    pub matched: bool,
}

/// Analysis payload: the boolean detection flag plus matched-rule details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub detection: bool,
    pub details: Vec<DetectionDetail>,
}

impl Analysis {
    /// Max severity across matched details, if any matched
    pub fn max_severity(&self) -> Option<u32> {
        self.details
            .iter()
            .filter(|d| d.matched)
            .map(|d| d.severity)
            .max()
    }
}

/// Immutable record that a specific rule matched a specific event.
/// Created exactly once per (event, matching rule) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    pub event_id: EventId,
    pub rule_id: RuleId,
    pub rule_name: String,
    pub severity: u32,
    pub entities: Entities,
    pub analysis: Analysis,
    pub created_at: u64,
}

/// Name of the last pipeline stage that touched an event state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "receiver")]
    Receiver,
    #[serde(rename = "parser")]
    Parser,
    #[serde(rename = "enrichment")]
    Enrichment,
    #[serde(rename = "detector")]
    Detector,
}

/// Authoritative current-status view of one event's progress through the
/// pipeline. One row per event, mutated in place by whichever stage last
/// touched it; distinct from the immutable Detection history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventState {
    pub event_id: EventId,
    /// Cumulative stage flags; each stage sets its own independently
    pub parsed: bool,
    pub enriched: bool,
    /// The detection stage has run for this event
    pub detected: bool,
    /// At least one rule matched
    pub detection: bool,
    pub severity: Option<u32>,
    pub last_stage: Stage,
    pub last_updated: u64,
    pub analysis: Option<Analysis>,
    pub error: Option<String>,
}

impl EventState {
    pub fn new(event_id: EventId, now: u64) -> Self {
        Self {
            event_id,
            parsed: false,
            enriched: false,
            detected: false,
            detection: false,
            severity: None,
            last_stage: Stage::Receiver,
            last_updated: now,
            analysis: None,
            error: None,
        }
    }
}

/// Incident lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "investigating")]
    Investigating,
    #[serde(rename = "resolved")]
    Resolved,
}

/// Analyst-facing priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "critical")]
    Critical,
}

impl Priority {
    /// Severity banding: >= 90 critical, >= 70 high, >= 40 medium, else low
    pub fn from_severity(severity: u32) -> Self {
        if severity >= 90 {
            Priority::Critical
        } else if severity >= 70 {
            Priority::High
        } else if severity >= 40 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// Timestamped analyst or system note. Append-only, never edited or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub message: String,
    #[serde(default)]
    pub author: Option<String>,
    pub created_at: u64,
}

/// Mutable aggregate grouping related detections for analyst workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub title: String,
    pub description: String,
    pub status: IncidentStatus,
    pub priority: Priority,
    pub severity: u32,
    pub entities: Entities,
    pub detections: Vec<DetectionId>,
    pub events: Vec<EventId>,
    pub owner: Option<String>,
    pub notes: Vec<Note>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Incident {
    /// Canonical entity signature for dedup on reconcile
    pub fn signature(&self) -> String {
        self.entities.signature()
    }

    pub fn is_resolved(&self) -> bool {
        self.status == IncidentStatus::Resolved
    }
}

/// Correlator output: a group of related detections that should become (or
/// extend) an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentCandidate {
    pub entities: Entities,
    pub severity: u32,
    pub priority: Priority,
    pub detections: Vec<DetectionId>,
    pub events: Vec<EventId>,
    pub rule_names: Vec<String>,
    pub first_seen: u64,
    pub last_seen: u64,
}

/// Enrichment tiers; the stage is optional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnrichmentTier {
    #[serde(rename = "off")]
    Off,
    #[serde(rename = "basic")]
    #[default]
    Basic,
    #[serde(rename = "full")]
    Full,
}

/// Host inventory entry used by the enrichment stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub hostname: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub criticality: Option<String>,
}

/// Configuration for the enrichment stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub tier: EnrichmentTier,
    /// source address -> asset record
    #[serde(default)]
    pub inventory: BTreeMap<String, AssetRecord>,
    /// ip prefix -> geo region (longest prefix wins)
    #[serde(default)]
    pub geo_prefixes: BTreeMap<String, String>,
}

/// Configuration for the correlator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Sliding window; boundary is inclusive
    pub window_seconds: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            window_seconds: 30 * 60,
        }
    }
}

/// Retry policy for transient store failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub enrichment: EnrichmentConfig,
    pub correlator: CorrelatorConfig,
    pub retry: RetryConfig,
}
