// herringbone/src/pipeline/enrichment/mod.rs
//!
//! Enrichment stage: augments parse results with contextual data.
//!
//! Optional and tiered. Basic resolves the source address against a host
//! inventory (hostname, asset owner, criticality); Full additionally tags a
//! geo region for every extracted IP from a prefix table. Lookups are static
//! tables injected through configuration; the core makes no network calls.

use crate::pipeline::models::{EnrichmentConfig, EnrichmentTier, Event};
use std::collections::BTreeMap;

/// Adds contextual fields to an event's parsed field map.
#[derive(Debug, Clone, Default)]
pub struct EventEnricher {
    config: EnrichmentConfig,
}

impl EventEnricher {
    pub fn new(config: EnrichmentConfig) -> Self {
        Self { config }
    }

    pub fn tier(&self) -> EnrichmentTier {
        self.config.tier
    }

    /// Compute enrichment fields for an event. Returns an empty map when the
    /// tier is Off or nothing resolves; the caller merges the result into the
    /// parsed field map and marks the state record enriched.
    pub fn enrich(
        &self,
        event: &Event,
        parsed_fields: &BTreeMap<String, Vec<String>>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();

        if self.config.tier == EnrichmentTier::Off {
            return fields;
        }

        if let Some(asset) = self.config.inventory.get(&event.source.address) {
            fields.insert("host".into(), vec![asset.hostname.clone()]);
            if let Some(owner) = &asset.owner {
                fields.insert("asset_owner".into(), vec![owner.clone()]);
            }
            if let Some(criticality) = &asset.criticality {
                fields.insert("asset_criticality".into(), vec![criticality.clone()]);
            }
        }

        if self.config.tier == EnrichmentTier::Full {
            let mut regions = Vec::new();
            for ip in extracted_ips(parsed_fields) {
                if let Some(region) = self.lookup_geo(&ip) {
                    if !regions.contains(&region) {
                        regions.push(region);
                    }
                }
            }
            if !regions.is_empty() {
                fields.insert("geo_region".into(), regions);
            }
        }

        fields
    }

    /// Longest matching prefix wins
    fn lookup_geo(&self, ip: &str) -> Option<String> {
        self.config
            .geo_prefixes
            .iter()
            .filter(|(prefix, _)| ip.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, region)| region.clone())
    }
}

fn extracted_ips(fields: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut ips = Vec::new();
    for key in ["source_ip", "ip", "dest_ip"] {
        if let Some(values) = fields.get(key) {
            for v in values {
                if !ips.contains(v) {
                    ips.push(v.clone());
                }
            }
        }
    }
    ips
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::{AssetRecord, SourceDescriptor};

    fn config_with_inventory(tier: EnrichmentTier) -> EnrichmentConfig {
        let mut inventory = BTreeMap::new();
        inventory.insert(
            "192.168.1.1".to_string(),
            AssetRecord {
                hostname: "fw-1".into(),
                owner: Some("netops".into()),
                criticality: Some("high".into()),
            },
        );

        let mut geo = BTreeMap::new();
        geo.insert("192.168.".to_string(), "office-lan".to_string());
        geo.insert("10.".to_string(), "datacenter".to_string());

        EnrichmentConfig {
            tier,
            inventory,
            geo_prefixes: geo,
        }
    }

    fn event() -> Event {
        Event::new(
            "Failed login from 192.168.1.55 by root".to_string(),
            SourceDescriptor {
                kind: "firewall".into(),
                address: "192.168.1.1".into(),
            },
            1_700_000_000,
        )
    }

    #[test]
    fn test_off_tier_is_noop() {
        let enricher = EventEnricher::new(config_with_inventory(EnrichmentTier::Off));
        let fields = enricher.enrich(&event(), &BTreeMap::new());
        assert!(fields.is_empty());
    }

    #[test]
    fn test_basic_tier_resolves_inventory() {
        let enricher = EventEnricher::new(config_with_inventory(EnrichmentTier::Basic));
        let fields = enricher.enrich(&event(), &BTreeMap::new());

        assert_eq!(fields["host"], vec!["fw-1".to_string()]);
        assert_eq!(fields["asset_owner"], vec!["netops".to_string()]);
        // basic tier never tags geo
        assert!(!fields.contains_key("geo_region"));
    }

    #[test]
    fn test_full_tier_adds_geo_from_parsed_ips() {
        let enricher = EventEnricher::new(config_with_inventory(EnrichmentTier::Full));
        let mut parsed = BTreeMap::new();
        parsed.insert(
            "source_ip".to_string(),
            vec!["192.168.1.55".to_string(), "10.2.3.4".to_string()],
        );

        let fields = enricher.enrich(&event(), &parsed);
        assert_eq!(
            fields["geo_region"],
            vec!["office-lan".to_string(), "datacenter".to_string()]
        );
    }

    #[test]
    fn test_unknown_source_yields_no_host_fields() {
        let enricher = EventEnricher::new(config_with_inventory(EnrichmentTier::Basic));
        let mut ev = event();
        ev.source.address = "172.16.0.9".into();

        let fields = enricher.enrich(&ev, &BTreeMap::new());
        assert!(fields.is_empty());
    }
}
