// herringbone/src/pipeline/tests/mod.rs
//!
//! Cross-stage tests for the event pipeline

#[cfg(test)]
mod integration_tests {
    use crate::pipeline::models::*;
    use crate::pipeline::storage::*;
    use crate::pipeline::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    // ==================== Fixtures ====================

    fn failed_login_rule() -> Rule {
        Rule::new(
            "Suspicious Login Attempt",
            75,
            "Detected a failed login from an IP address",
            "raw",
            r"Failed login from ([0-9]{1,3}\.){3}[0-9]{1,3}",
        )
    }

    fn firewall_card() -> ParseCard {
        ParseCard {
            name: "firewall-auth".to_string(),
            selector: Selector::Raw("login".to_string()),
            mode: CardMode::Regex,
            rules: vec![
                FieldRule {
                    field: "source_ip".to_string(),
                    pattern: r"from (([0-9]{1,3}\.){3}[0-9]{1,3})".to_string(),
                },
                FieldRule {
                    field: "username".to_string(),
                    pattern: r"by (\w+)".to_string(),
                },
            ],
        }
    }

    fn firewall_event(raw: &str, at: u64) -> Event {
        let mut event = Event::new(
            raw.to_string(),
            SourceDescriptor {
                kind: "firewall".into(),
                address: "192.168.1.1".into(),
            },
            at,
        );
        event.event_time = Some(at);
        event
    }

    fn runner(storage: Arc<dyn PipelineStorage>) -> PipelineRunner {
        PipelineRunner::new(
            PipelineConfig::default(),
            vec![firewall_card()],
            vec![failed_login_rule()],
            storage,
        )
    }

    // ==================== End-to-End Flow ====================

    #[tokio::test]
    async fn test_failed_login_flows_to_incident() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = runner(Arc::clone(&storage));
        let now = 1_700_000_000;

        let event = runner
            .ingest(
                firewall_event("Failed login from 192.168.1.55 by root", now),
                now,
            )
            .await
            .unwrap();
        let outcome = runner.process_event(&event, now).await.unwrap();

        // parsing extracted structured fields
        assert_eq!(
            outcome.fields["source_ip"],
            vec!["192.168.1.55".to_string()]
        );
        assert_eq!(outcome.fields["username"], vec!["root".to_string()]);

        // detection fired with the rule's severity and entities
        assert!(outcome.analysis.detection);
        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(outcome.detections[0].severity, 75);
        assert_eq!(
            outcome.detections[0].entities.ip.as_deref(),
            Some("192.168.1.55")
        );

        // state reflects every stage
        assert!(outcome.state.parsed && outcome.state.enriched && outcome.state.detected);
        assert!(outcome.state.detection);
        assert_eq!(outcome.state.severity, Some(75));
        assert_eq!(outcome.state.last_stage, Stage::Detector);

        // correlation pass opens one high-priority incident
        let incidents = runner.run_correlation_pass(now + 60).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].status, IncidentStatus::Open);
        assert_eq!(incidents[0].priority, Priority::High);
        assert_eq!(incidents[0].notes[0].message, "Incident created from detection");

        // persisted view matches
        assert_eq!(storage.list_incidents().await.len(), 1);
        let state = storage.get_event_state(&event.id).await.unwrap();
        assert!(state.detection);
    }

    #[tokio::test]
    async fn test_burst_of_related_detections_yields_one_incident() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = runner(Arc::clone(&storage));
        let now = 1_700_000_000;

        // 20 failed logins from the same source inside 15 minutes
        for i in 0..20u64 {
            let at = now + i * 45;
            let event = runner
                .ingest(
                    firewall_event("Failed login from 192.168.1.55 by root", at),
                    at,
                )
                .await
                .unwrap();
            runner.process_event(&event, at).await.unwrap();
        }

        let incidents = runner.run_correlation_pass(now + 15 * 60).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].detections.len(), 20);
        assert_eq!(incidents[0].events.len(), 20);
        assert_eq!(incidents[0].severity, 75);
    }

    #[tokio::test]
    async fn test_repeated_correlation_pass_reuses_open_incident() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = runner(Arc::clone(&storage));
        let now = 1_700_000_000;

        let event = runner
            .ingest(
                firewall_event("Failed login from 192.168.1.55 by root", now),
                now,
            )
            .await
            .unwrap();
        runner.process_event(&event, now).await.unwrap();

        let first = runner.run_correlation_pass(now + 10).await.unwrap();

        let later = runner
            .ingest(
                firewall_event("Failed login from 192.168.1.55 by admin", now + 60),
                now + 60,
            )
            .await
            .unwrap();
        runner.process_event(&later, now + 60).await.unwrap();

        let second = runner.run_correlation_pass(now + 120).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert!(second[0].detections.len() >= 2);
        assert_eq!(
            second[0].notes.last().unwrap().message,
            "Incident updated from detection"
        );
        assert_eq!(runner.orchestrator().list().len(), 1);
    }

    #[tokio::test]
    async fn test_entityless_detection_keeps_single_incident_across_passes() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let rule = Rule::new(
            "Kernel Error",
            50,
            "kernel fault reported in raw text",
            "raw",
            r"kernel error",
        );
        let runner = PipelineRunner::new(
            PipelineConfig::default(),
            Vec::new(),
            vec![rule],
            Arc::clone(&storage),
        );
        let now = 1_700_000_000;

        let event = runner
            .ingest(firewall_event("kernel error: oops in module xyz", now), now)
            .await
            .unwrap();
        let outcome = runner.process_event(&event, now).await.unwrap();
        // no parsed fields and no IP in the matched text: no entity keys
        assert!(outcome.detections[0].entities.is_empty());

        let first = runner.run_correlation_pass(now + 60).await.unwrap();
        let second = runner.run_correlation_pass(now + 120).await.unwrap();

        // periodic passes keep landing on the same incident
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(storage.list_incidents().await.len(), 1);
        assert_eq!(second[0].detections.len(), 1);
        // and a pass that attaches nothing appends no note
        assert_eq!(second[0].notes.len(), 1);
    }

    #[tokio::test]
    async fn test_stage_failure_is_recorded_on_state() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = runner(Arc::clone(&storage));
        let now = 1_700_000_000;

        let event = runner
            .ingest(
                firewall_event("Failed login from 192.168.1.55 by root", now),
                now,
            )
            .await
            .unwrap();

        let state = runner
            .fail_event(&event.id, "matcher unavailable", now + 5)
            .await
            .unwrap();
        assert_eq!(state.error.as_deref(), Some("matcher unavailable"));

        let persisted = storage.get_event_state(&event.id).await.unwrap();
        assert_eq!(persisted.error.as_deref(), Some("matcher unavailable"));
        assert!(persisted.detected && !persisted.detection);
    }

    #[tokio::test]
    async fn test_unrelated_sources_open_separate_incidents() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = runner(Arc::clone(&storage));
        let now = 1_700_000_000;

        for (ip, user) in [("10.0.0.1", "root"), ("10.0.0.2", "alice")] {
            let raw = format!("Failed login from {} by {}", ip, user);
            let event = runner.ingest(firewall_event(&raw, now), now).await.unwrap();
            runner.process_event(&event, now).await.unwrap();
        }

        // different source ips and users share no entity key
        let incidents = runner.run_correlation_pass(now + 60).await.unwrap();
        assert_eq!(incidents.len(), 2);
    }

    #[tokio::test]
    async fn test_clean_event_reaches_detector_without_detection() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = runner(Arc::clone(&storage));
        let now = 1_700_000_000;

        let event = runner
            .ingest(
                firewall_event("Accepted login from 192.168.1.55 by root", now),
                now,
            )
            .await
            .unwrap();
        let outcome = runner.process_event(&event, now).await.unwrap();

        assert!(outcome.state.detected);
        assert!(!outcome.state.detection);
        assert!(outcome.detections.is_empty());

        let incidents = runner.run_correlation_pass(now + 60).await.unwrap();
        assert!(incidents.is_empty());
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = runner(Arc::clone(&storage));
        let now = 1_700_000_000;

        let event = runner
            .ingest(
                firewall_event("Failed login from 192.168.1.55 by root", now),
                now,
            )
            .await
            .unwrap();

        let first = runner.process_event(&event, now).await.unwrap();
        let second = runner.process_event(&event, now).await.unwrap();

        assert_eq!(runner.tracker().len(), 1);
        assert_eq!(first.state.severity, second.state.severity);
        assert_eq!(first.state.last_updated, second.state.last_updated);
    }

    #[tokio::test]
    async fn test_stale_detection_outside_window_is_ignored() {
        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = runner(Arc::clone(&storage));
        let now = 1_700_000_000;

        let event = runner
            .ingest(
                firewall_event("Failed login from 192.168.1.55 by root", now),
                now,
            )
            .await
            .unwrap();
        runner.process_event(&event, now).await.unwrap();

        // an hour later the detection has aged out of the 30-minute window
        let incidents = runner.run_correlation_pass(now + 3_600).await.unwrap();
        assert!(incidents.is_empty());
    }

    // ==================== Enrichment Integration ====================

    #[tokio::test]
    async fn test_enriched_host_feeds_correlation_signature() {
        let mut inventory = BTreeMap::new();
        inventory.insert(
            "192.168.1.1".to_string(),
            AssetRecord {
                hostname: "fw-1".into(),
                owner: Some("netops".into()),
                criticality: Some("high".into()),
            },
        );
        let config = PipelineConfig {
            enrichment: EnrichmentConfig {
                tier: EnrichmentTier::Basic,
                inventory,
                geo_prefixes: BTreeMap::new(),
            },
            ..Default::default()
        };

        let storage: Arc<dyn PipelineStorage> = Arc::new(MemoryStorage::new());
        let runner = PipelineRunner::new(
            config,
            vec![firewall_card()],
            vec![failed_login_rule()],
            Arc::clone(&storage),
        );
        let now = 1_700_000_000;

        let event = runner
            .ingest(
                firewall_event("Failed login from 192.168.1.55 by root", now),
                now,
            )
            .await
            .unwrap();
        let outcome = runner.process_event(&event, now).await.unwrap();

        assert_eq!(outcome.fields["host"], vec!["fw-1".to_string()]);
        assert_eq!(outcome.detections[0].entities.host.as_deref(), Some("fw-1"));

        let incidents = runner.run_correlation_pass(now + 60).await.unwrap();
        assert!(incidents[0].signature().contains("host=fw-1"));
    }
}
