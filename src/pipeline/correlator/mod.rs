// herringbone/src/pipeline/correlator/mod.rs
//!
//! Correlator: groups related detections into incident candidates.
//!
//! Detections are related when they share any entity key (user, ip or host —
//! OR semantics) and fall inside the sliding correlation window. Runs as a
//! batch over a consistent snapshot of the detection set; detections inserted
//! mid-pass are picked up on the next pass. Grouping is deterministic for a
//! given snapshot and window: detections are sorted by (created_at, id)
//! before grouping, so input order never changes the output.

use crate::correlator_log;
use crate::pipeline::models::{
    CorrelatorConfig, Detection, Entities, IncidentCandidate, Priority,
};
use std::collections::HashMap;

/// Batch correlator over detection snapshots.
#[derive(Debug, Clone, Default)]
pub struct Correlator {
    config: CorrelatorConfig,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self { config }
    }

    pub fn window_seconds(&self) -> u64 {
        self.config.window_seconds
    }

    /// Group the snapshot into incident candidates. The window boundary is
    /// inclusive: a detection created exactly at `now - window` is in.
    /// A detection overlapping nothing becomes a singleton candidate.
    pub fn correlate(&self, detections: &[Detection], now: u64) -> Vec<IncidentCandidate> {
        let window_start = now.saturating_sub(self.config.window_seconds);

        // canonical order makes grouping independent of input order
        let mut snapshot: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.created_at >= window_start && d.created_at <= now)
            .collect();
        snapshot.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let mut dsu = DisjointSet::new(snapshot.len());
        let mut seen: HashMap<(&'static str, &str), usize> = HashMap::new();

        for (idx, detection) in snapshot.iter().enumerate() {
            for pair in detection.entities.pairs() {
                match seen.get(&pair) {
                    Some(&first) => dsu.union(first, idx),
                    None => {
                        seen.insert(pair, idx);
                    }
                }
            }
        }

        // collect groups keyed by their root, preserving canonical order
        let mut groups: Vec<Vec<&Detection>> = Vec::new();
        let mut root_to_group: HashMap<usize, usize> = HashMap::new();
        for (idx, detection) in snapshot.iter().enumerate() {
            let root = dsu.find(idx);
            let group_idx = *root_to_group.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group_idx].push(detection);
        }

        let candidates: Vec<IncidentCandidate> =
            groups.iter().map(|members| build_candidate(members)).collect();

        correlator_log!(
            debug,
            "correlated {} detections into {} candidates (window {}s)",
            snapshot.len(),
            candidates.len(),
            self.config.window_seconds
        );

        candidates
    }
}

fn build_candidate(members: &[&Detection]) -> IncidentCandidate {
    let mut entities = Entities::default();
    let mut detections = Vec::with_capacity(members.len());
    let mut events = Vec::new();
    let mut rule_names = Vec::new();
    let mut severity = 0;
    let mut first_seen = u64::MAX;
    let mut last_seen = 0;

    for member in members {
        entities.merge(&member.entities);
        detections.push(member.id.clone());
        if !events.contains(&member.event_id) {
            events.push(member.event_id.clone());
        }
        if !rule_names.contains(&member.rule_name) {
            rule_names.push(member.rule_name.clone());
        }
        severity = severity.max(member.severity);
        first_seen = first_seen.min(member.created_at);
        last_seen = last_seen.max(member.created_at);
    }

    IncidentCandidate {
        entities,
        severity,
        priority: Priority::from_severity(severity),
        detections,
        events,
        rule_names,
        first_seen,
        last_seen,
    }
}

/// Union-find with path compression
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // lower root wins so grouping follows canonical order
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}
