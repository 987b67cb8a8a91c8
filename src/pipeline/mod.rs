// herringbone/src/pipeline/mod.rs
//!
//! # Security Event Pipeline
//!
//! An event pipeline that provides:
//! - Append-only event ingestion
//! - Declarative field extraction via parse cards (regex and json-path)
//! - Optional tiered enrichment from static lookup tables
//! - Regex rule matching with immutable detection records
//! - Per-event state tracking across stages
//! - Windowed entity-overlap correlation
//! - Incident creation, dedup and analyst lifecycle
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Pipeline Runner                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌────────────┐  │
//! │  │  Event   │──►│  Card    │──►│ Enrichment │──►│ Detection  │  │
//! │  │  Store   │   │  Parser  │   │  (tiered)  │   │  Engine    │  │
//! │  └──────────┘   └──────────┘   └────────────┘   └─────┬──────┘  │
//! │                       │              │                │         │
//! │                       └──────────────┴────────────────┤         │
//! │                                                       ▼         │
//! │                 ┌──────────────┐              ┌──────────────┐  │
//! │                 │ Event State  │◄─────────────│  Detections  │  │
//! │                 │   Tracker    │              └──────┬───────┘  │
//! │                 └──────────────┘                     │          │
//! │                                                      ▼          │
//! │                 ┌──────────────┐              ┌──────────────┐  │
//! │                 │   Incident   │◄─────────────│  Correlator  │  │
//! │                 │ Orchestrator │              │  (windowed)  │  │
//! │                 └──────────────┘              └──────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod correlator;
pub mod detector;
pub mod enrichment;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod state;
pub mod storage;

pub use correlator::*;
pub use detector::*;
pub use enrichment::*;
pub use models::*;
pub use orchestrator::*;
pub use parser::*;
pub use state::*;
pub use storage::*;

use crate::error::Result;
use crate::{correlator_log, detector_log, parser_log};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Current version of the pipeline
pub const PIPELINE_VERSION: &str = "1.0.0";

/// Default pipeline configuration
#[derive(Debug, Clone)]
pub struct DefaultPipelineConfig;

impl DefaultPipelineConfig {
    pub const CORRELATION_WINDOW_SECONDS: u64 = 30 * 60;
    pub const REATTACH_WINDOW_SECONDS: u64 = 30 * 60;
    pub const RETRY_MAX_ATTEMPTS: u32 = 4;
    pub const RETRY_BASE_DELAY_MS: u64 = 50;
    pub const RETRY_MAX_DELAY_MS: u64 = 2_000;
}

/// Permission scopes understood by the service surface
pub mod scopes {
    pub const EVENTS_WRITE: &str = "events:write";
    pub const DETECTIONS_RUN: &str = "detections:run";
    pub const DETECTIONS_READ: &str = "detections:read";
    pub const INCIDENTS_WRITE: &str = "incidents:write";
    pub const INCIDENTS_READ: &str = "incidents:read";
    pub const INCIDENTS_CORRELATE: &str = "incidents:correlate";
}

/// Outcome of pushing one event through parse, enrich and detect.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub event_id: EventId,
    pub fields: BTreeMap<String, Vec<String>>,
    pub analysis: Analysis,
    pub detections: Vec<Detection>,
    pub state: EventState,
}

/// Drives events through the stages and detections into incidents.
///
/// Per-event failures are isolated: a card that fails to extract or a rule
/// that fails to compile never stops the batch, it is logged and recorded on
/// the event's state.
#[derive(Clone)]
pub struct PipelineRunner {
    cards: Vec<ParseCard>,
    rules: Vec<Rule>,
    parser: CardParser,
    enricher: EventEnricher,
    engine: Arc<DetectionEngine>,
    tracker: EventStateTracker,
    correlator: Correlator,
    orchestrator: IncidentOrchestrator,
    storage: Arc<dyn PipelineStorage>,
    retry: RetryConfig,
}

impl PipelineRunner {
    pub fn new(
        config: PipelineConfig,
        cards: Vec<ParseCard>,
        rules: Vec<Rule>,
        storage: Arc<dyn PipelineStorage>,
    ) -> Self {
        Self {
            cards,
            rules,
            parser: CardParser::default(),
            enricher: EventEnricher::new(config.enrichment),
            engine: Arc::new(DetectionEngine),
            tracker: EventStateTracker::new(),
            correlator: Correlator::new(config.correlator),
            orchestrator: IncidentOrchestrator::new(OrchestratorConfig {
                reattach_window_seconds: DefaultPipelineConfig::REATTACH_WINDOW_SECONDS,
            }),
            storage,
            retry: config.retry,
        }
    }

    pub fn tracker(&self) -> &EventStateTracker {
        &self.tracker
    }

    pub fn orchestrator(&self) -> &IncidentOrchestrator {
        &self.orchestrator
    }

    /// Ingest a raw event into the append-only store and seed its state
    pub async fn ingest(&self, event: Event, now: u64) -> Result<Event> {
        with_retry(&self.retry, "store_event", || {
            let storage = Arc::clone(&self.storage);
            let event = event.clone();
            async move { storage.store_event(&event).await }
        })
        .await?;
        self.tracker.ensure(&event.id, now);
        self.persist_state(&event.id).await?;
        Ok(event)
    }

    /// Run one event through parse, enrich and detect, updating state after
    /// each stage and persisting every produced record.
    pub async fn process_event(&self, event: &Event, now: u64) -> Result<EventOutcome> {
        // parse
        let results = self.parser.apply_cards(event, &self.cards, now);
        for result in &results {
            with_retry(&self.retry, "store_parse_result", || {
                let storage = Arc::clone(&self.storage);
                let result = result.clone();
                async move { storage.store_parse_result(&result).await }
            })
            .await?;
        }
        let mut fields = merge_results(&results);
        self.tracker.mark_parsed(&event.id, now);
        parser_log!(
            debug,
            "event {} parsed into {} field(s)",
            event.id,
            fields.len()
        );

        // enrich
        if self.enricher.tier() != EnrichmentTier::Off {
            let extra = self.enricher.enrich(event, &fields);
            for (key, values) in extra {
                fields.entry(key).or_default().extend(values);
            }
            self.tracker.mark_enriched(&event.id, now);
        }

        // detect
        let evaluation = self.engine.evaluate(event, &fields, &self.rules, now);
        for detection in &evaluation.detections {
            with_retry(&self.retry, "store_detection", || {
                let storage = Arc::clone(&self.storage);
                let detection = detection.clone();
                async move { storage.store_detection(&detection).await }
            })
            .await?;
        }
        let state = self
            .tracker
            .apply_detection(&event.id, evaluation.analysis.clone(), now);
        self.persist_state(&event.id).await?;

        if evaluation.analysis.detection {
            detector_log!(
                info,
                "event {} matched {} rule(s)",
                event.id,
                evaluation.detections.len()
            );
        }

        Ok(EventOutcome {
            event_id: event.id.clone(),
            fields,
            analysis: evaluation.analysis,
            detections: evaluation.detections,
            state,
        })
    }

    /// Snapshot the detection set, correlate it and reconcile each candidate
    /// into an incident. Returns the touched incidents in candidate order.
    pub async fn run_correlation_pass(&self, now: u64) -> Result<Vec<Incident>> {
        let snapshot = self.storage.list_detections().await;
        let candidates = self.correlator.correlate(&snapshot, now);
        correlator_log!(
            info,
            "correlation pass: {} detection(s), {} candidate(s)",
            snapshot.len(),
            candidates.len()
        );

        let mut incidents = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let (incident, _) = self.orchestrator.reconcile(candidate, now);
            severity_invariant_ok(&incident, &snapshot);
            with_retry(&self.retry, "store_incident", || {
                let storage = Arc::clone(&self.storage);
                let incident = incident.clone();
                async move { storage.store_incident(&incident).await }
            })
            .await?;
            incidents.push(incident);
        }
        Ok(incidents)
    }

    /// Record a stage failure on the event's state and persist it, so a
    /// failed event is visible downstream instead of silently stuck.
    pub async fn fail_event(&self, event_id: &str, reason: &str, now: u64) -> Result<EventState> {
        let state = self.tracker.mark_failed(event_id, reason, now);
        self.persist_state(event_id).await?;
        Ok(state)
    }

    async fn persist_state(&self, event_id: &str) -> Result<()> {
        if let Some(state) = self.tracker.get(event_id) {
            with_retry(&self.retry, "store_event_state", || {
                let storage = Arc::clone(&self.storage);
                let state = state.clone();
                async move { storage.store_event_state(&state).await }
            })
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
