// herringbone/src/pipeline/detector/mod.rs
//!
//! Detection engine: evaluates parsed events against the rule set.
//!
//! Each enabled rule names a target field key and a regex. The key selects a
//! parse-result field, or the raw event text when it is `"raw"`. Matching is
//! substring search; for multi-valued fields a rule matches if its regex
//! matches any value. Every matching rule fires (no short-circuit), each
//! producing one immutable Detection. A rule whose regex does not compile is
//! disabled for the batch and reported, never fatal.

use crate::detector_log;
use crate::error::{HerringboneError, Result};
use crate::pipeline::models::{
    Analysis, Detection, DetectionDetail, Entities, Event, Rule, RAW_KEY,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;
use walkdir::WalkDir;

/// Numeric dotted-quad pattern used by entity extraction
static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]{1,3}\.){3}[0-9]{1,3}").expect("ip pattern compiles"));

/// Outcome of evaluating one event against the rule set: the event-level
/// analysis snapshot (one detail per evaluated rule) plus one Detection per
/// matched rule.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub analysis: Analysis,
    pub detections: Vec<Detection>,
}

/// Rule with its compiled regex
#[derive(Debug)]
struct CompiledRule<'a> {
    rule: &'a Rule,
    regex: Regex,
}

/// Stateless rule-matching engine.
#[derive(Debug, Default)]
pub struct DetectionEngine;

impl DetectionEngine {
    /// Evaluate an event's merged parse fields against the rule set.
    ///
    /// Rules with malformed regexes are skipped and logged; disabled rules
    /// are ignored. When no rule matches, `analysis.detection` is false and
    /// `detections` is empty; the caller still records the state update.
    pub fn evaluate(
        &self,
        event: &Event,
        fields: &BTreeMap<String, Vec<String>>,
        rules: &[Rule],
        now: u64,
    ) -> Evaluation {
        let mut analysis = Analysis::default();
        let mut detections = Vec::new();

        for compiled in self.compile_rules(rules) {
            let matched_value = self.find_match(&compiled, event, fields);
            let matched = matched_value.is_some();

            analysis.details.push(DetectionDetail {
                rule_name: compiled.rule.name.clone(),
                severity: compiled.rule.severity,
                description: compiled.rule.description.clone(),
                matched,
            });

            if let Some(value) = matched_value {
                analysis.detection = true;
                let entities = extract_entities(fields, &value);
                detections.push(Detection {
                    id: Uuid::new_v4().to_string(),
                    event_id: event.id.clone(),
                    rule_id: compiled.rule.id.clone(),
                    rule_name: compiled.rule.name.clone(),
                    severity: compiled.rule.severity,
                    entities,
                    analysis: Analysis {
                        detection: true,
                        details: vec![DetectionDetail {
                            rule_name: compiled.rule.name.clone(),
                            severity: compiled.rule.severity,
                            description: compiled.rule.description.clone(),
                            matched: true,
                        }],
                    },
                    created_at: now,
                });
            }
        }

        Evaluation {
            analysis,
            detections,
        }
    }

    fn compile_rules<'a>(&self, rules: &'a [Rule]) -> Vec<CompiledRule<'a>> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules.iter().filter(|r| r.enabled) {
            match Regex::new(&rule.rule.regex) {
                Ok(regex) => compiled.push(CompiledRule { rule, regex }),
                Err(e) => {
                    detector_log!(
                        error,
                        "rule '{}' has malformed regex, skipping: {}",
                        rule.name,
                        e
                    );
                }
            }
        }
        compiled
    }

    /// Returns the first value the rule's regex matched on, if any. Substring
    /// search, not anchored. Absent fields never match.
    fn find_match(
        &self,
        compiled: &CompiledRule<'_>,
        event: &Event,
        fields: &BTreeMap<String, Vec<String>>,
    ) -> Option<String> {
        if compiled.rule.rule.key == RAW_KEY {
            return compiled
                .regex
                .find(&event.raw)
                .map(|m| m.as_str().to_string());
        }

        let values = fields.get(&compiled.rule.rule.key)?;
        for value in values {
            if compiled.regex.is_match(value) {
                return Some(value.clone());
            }
        }
        None
    }
}

/// Pull user/ip/host entity keys out of the parsed fields, falling back to an
/// IP scan of the matched text when no ip field was extracted.
pub fn extract_entities(fields: &BTreeMap<String, Vec<String>>, matched_text: &str) -> Entities {
    let first_of = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|k| fields.get(*k))
            .filter_map(|values| values.first())
            .next()
            .cloned()
    };

    let mut entities = Entities {
        user: first_of(&["username", "user"]),
        ip: first_of(&["source_ip", "ip"]),
        host: first_of(&["host", "hostname"]),
    };

    if entities.ip.is_none() {
        entities.ip = IP_RE.find(matched_text).map(|m| m.as_str().to_string());
    }

    entities
}

/// Load detection rules from yaml files in a directory, skipping files that
/// do not parse so one bad rule file cannot block the rest.
pub fn load_rules_from_directory(dir: &Path) -> Result<Vec<Rule>> {
    if !dir.exists() {
        return Err(HerringboneError::ConfigError(format!(
            "rules directory does not exist: {:?}",
            dir
        )));
    }

    let mut rules = Vec::new();

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
            Ok(content) => match serde_yaml::from_str::<Rule>(&content) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    detector_log!(warn, "failed to parse rule {}: {}", entry.path().display(), e)
                }
            },
            Err(e) => detector_log!(warn, "failed to read rule {}: {}", entry.path().display(), e),
        }
    }

    detector_log!(info, "loaded {} detection rules", rules.len());
    Ok(rules)
}
