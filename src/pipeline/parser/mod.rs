// herringbone/src/pipeline/parser/mod.rs
//!
//! Parser stage: evaluates declarative parse cards against raw events.
//!
//! A card's selector gates which events it applies to; its rules then extract
//! named fields either with regexes over the raw text or with dotted json
//! paths over the raw text parsed as JSON. Extraction failures are recorded
//! as error-carrying parse results rather than dropped.

use crate::error::{HerringboneError, Result};
use crate::parser_log;
use crate::pipeline::models::{CardMode, Event, FieldRule, ParseCard, ParseResult};
use regex::RegexBuilder;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// Evaluates parse cards against events.
#[derive(Debug, Clone, Default)]
pub struct CardParser;

impl CardParser {
    /// Apply every card whose selector matches the event. Each applicable
    /// card yields one ParseResult; a card whose extraction fails yields an
    /// error-carrying result so the failure is visible downstream.
    pub fn apply_cards(&self, event: &Event, cards: &[ParseCard], now: u64) -> Vec<ParseResult> {
        let mut results = Vec::new();

        for card in cards {
            if !card.selector.matches(event) {
                continue;
            }

            match self.extract(card, event) {
                Ok(fields) => {
                    let mut result =
                        ParseResult::new(event.id.clone(), Some(card.name.clone()), now);
                    result.fields = fields;
                    results.push(result);
                }
                Err(e) => {
                    parser_log!(
                        warn,
                        "card '{}' failed on event {}: {}",
                        card.name,
                        event.id,
                        e
                    );
                    results.push(ParseResult::failed(
                        event.id.clone(),
                        Some(card.name.clone()),
                        e.to_string(),
                        now,
                    ));
                }
            }
        }

        results
    }

    fn extract(&self, card: &ParseCard, event: &Event) -> Result<BTreeMap<String, Vec<String>>> {
        match card.mode {
            CardMode::Regex => self.extract_regex(&card.rules, &event.raw),
            CardMode::JsonPath => self.extract_jsonp(&card.rules, &event.raw),
        }
    }

    /// Regex extraction: case-insensitive search, first capture group
    /// preferred over the whole match. A rule whose pattern does not compile
    /// is a config error for the whole card.
    fn extract_regex(
        &self,
        rules: &[FieldRule],
        text: &str,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for rule in rules {
            let re = RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    HerringboneError::ConfigError(format!(
                        "card rule '{}' has invalid regex: {}",
                        rule.field, e
                    ))
                })?;

            for caps in re.captures_iter(text) {
                let value = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string());
                if let Some(v) = value {
                    fields.entry(rule.field.clone()).or_default().push(v);
                }
            }
        }

        Ok(fields)
    }

    /// Json-path extraction: the raw text must parse as JSON; the pattern is
    /// a dotted path into it. Array hits are flattened in order.
    fn extract_jsonp(
        &self,
        rules: &[FieldRule],
        text: &str,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let root: serde_json::Value = serde_json::from_str(text).map_err(|e| {
            HerringboneError::InputError(format!("event raw text is not valid JSON: {}", e))
        })?;

        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for rule in rules {
            let values = resolve_path(&root, &rule.pattern);
            if !values.is_empty() {
                fields.insert(rule.field.clone(), values);
            }
        }

        Ok(fields)
    }
}

/// Walk a dotted path into a JSON value, flattening arrays at the leaf.
fn resolve_path(root: &serde_json::Value, path: &str) -> Vec<String> {
    let mut current = root;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        match current.get(part) {
            Some(next) => current = next,
            None => return Vec::new(),
        }
    }

    match current {
        serde_json::Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(other).into_iter().collect(),
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Fold several parse results for one event into the field map detection
/// reads. Results are applied in order; later results win per field, and
/// error-carrying results contribute nothing.
pub fn merge_results(results: &[ParseResult]) -> BTreeMap<String, Vec<String>> {
    let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for result in results {
        if result.error.is_some() {
            continue;
        }
        for (field, values) in &result.fields {
            merged.insert(field.clone(), values.clone());
        }
    }
    merged
}

/// Load parse cards from yaml files in a directory. Unparsable files are
/// skipped with a warning so one bad card cannot block the parser.
pub fn load_cards_from_directory(dir: &Path) -> Result<Vec<ParseCard>> {
    if !dir.exists() {
        return Err(HerringboneError::ConfigError(format!(
            "cards directory does not exist: {:?}",
            dir
        )));
    }

    let mut cards = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let is_yaml = entry
            .path()
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }

        match std::fs::read_to_string(entry.path()) {
            Ok(content) => match serde_yaml::from_str::<ParseCard>(&content) {
                Ok(card) => cards.push(card),
                Err(e) => {
                    parser_log!(warn, "failed to parse card {}: {}", entry.path().display(), e)
                }
            },
            Err(e) => parser_log!(warn, "failed to read card {}: {}", entry.path().display(), e),
        }
    }

    parser_log!(info, "loaded {} parse cards", cards.len());
    Ok(cards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::{Selector, SourceDescriptor};

    fn firewall_event(raw: &str) -> Event {
        Event::new(
            raw.to_string(),
            SourceDescriptor {
                kind: "firewall".into(),
                address: "192.168.1.1".into(),
            },
            1_700_000_000,
        )
    }

    fn login_card() -> ParseCard {
        ParseCard {
            name: "failed-login".into(),
            selector: Selector::Raw("Failed login".into()),
            mode: CardMode::Regex,
            rules: vec![
                FieldRule {
                    field: "source_ip".into(),
                    pattern: r"from (([0-9]{1,3}\.){3}[0-9]{1,3})".into(),
                },
                FieldRule {
                    field: "username".into(),
                    pattern: r"by (\w+)".into(),
                },
            ],
        }
    }

    #[test]
    fn test_regex_card_extraction() {
        let parser = CardParser;
        let event = firewall_event("Failed login from 192.168.1.55 by root");

        let results = parser.apply_cards(&event, &[login_card()], 1_700_000_100);
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.error.is_none());
        assert_eq!(result.fields["source_ip"], vec!["192.168.1.55".to_string()]);
        assert_eq!(result.fields["username"], vec!["root".to_string()]);
    }

    #[test]
    fn test_selector_gates_card() {
        let parser = CardParser;
        let event = firewall_event("Accepted password for root");

        let results = parser.apply_cards(&event, &[login_card()], 1_700_000_100);
        assert!(results.is_empty());
    }

    #[test]
    fn test_capture_group_preferred_over_whole_match() {
        let parser = CardParser;
        let card = ParseCard {
            name: "port".into(),
            selector: Selector::Raw("port".into()),
            mode: CardMode::Regex,
            rules: vec![FieldRule {
                field: "port".into(),
                pattern: r"port (\d+)".into(),
            }],
        };
        let event = firewall_event("connection on port 4444 refused");

        let results = parser.apply_cards(&event, &[card], 0);
        assert_eq!(results[0].fields["port"], vec!["4444".to_string()]);
    }

    #[test]
    fn test_multi_valued_field() {
        let parser = CardParser;
        let card = ParseCard {
            name: "ips".into(),
            selector: Selector::Raw("scan".into()),
            mode: CardMode::Regex,
            rules: vec![FieldRule {
                field: "ip".into(),
                pattern: r"(([0-9]{1,3}\.){3}[0-9]{1,3})".into(),
            }],
        };
        let event = firewall_event("scan from 10.0.0.1 and 10.0.0.2");

        let results = parser.apply_cards(&event, &[card], 0);
        assert_eq!(
            results[0].fields["ip"],
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
    }

    #[test]
    fn test_bad_regex_yields_error_result() {
        let parser = CardParser;
        let card = ParseCard {
            name: "broken".into(),
            selector: Selector::Raw("x".into()),
            mode: CardMode::Regex,
            rules: vec![FieldRule {
                field: "f".into(),
                pattern: "[unclosed".into(),
            }],
        };
        let event = firewall_event("x marks the spot");

        let results = parser.apply_cards(&event, &[card], 0);
        assert_eq!(results.len(), 1);
        assert!(results[0].error.is_some());
        assert!(results[0].fields.is_empty());
    }

    #[test]
    fn test_jsonp_card_extraction() {
        let parser = CardParser;
        let card = ParseCard {
            name: "audit-json".into(),
            selector: Selector::SourceAddress("192.168.1.1".into()),
            mode: CardMode::JsonPath,
            rules: vec![
                FieldRule {
                    field: "username".into(),
                    pattern: "auth.user".into(),
                },
                FieldRule {
                    field: "targets".into(),
                    pattern: "scan.targets".into(),
                },
            ],
        };
        let event = firewall_event(
            r#"{"auth": {"user": "root"}, "scan": {"targets": ["10.0.0.1", "10.0.0.2"]}}"#,
        );

        let results = parser.apply_cards(&event, &[card], 0);
        assert_eq!(results[0].fields["username"], vec!["root".to_string()]);
        assert_eq!(results[0].fields["targets"].len(), 2);
    }

    #[test]
    fn test_jsonp_on_non_json_event_records_error() {
        let parser = CardParser;
        let card = ParseCard {
            name: "audit-json".into(),
            selector: Selector::Raw("login".into()),
            mode: CardMode::JsonPath,
            rules: vec![FieldRule {
                field: "username".into(),
                pattern: "auth.user".into(),
            }],
        };
        let event = firewall_event("Failed login from 192.168.1.55");

        let results = parser.apply_cards(&event, &[card], 0);
        assert!(results[0].error.is_some());
    }

    #[test]
    fn test_merge_results_latest_wins() {
        let mut first = ParseResult::new("e1".into(), Some("a".into()), 10);
        first
            .fields
            .insert("username".into(), vec!["guest".to_string()]);
        first.fields.insert("port".into(), vec!["22".to_string()]);

        let mut second = ParseResult::new("e1".into(), Some("b".into()), 20);
        second
            .fields
            .insert("username".into(), vec!["root".to_string()]);

        let failed = ParseResult::failed("e1".into(), Some("c".into()), "boom".into(), 30);

        let merged = merge_results(&[first, second, failed]);
        assert_eq!(merged["username"], vec!["root".to_string()]);
        assert_eq!(merged["port"], vec!["22".to_string()]);
    }
}
