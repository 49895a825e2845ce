//! Pre-configured chaos bundles
//!
//! Presets package rules into recognizable network scenarios ("mobile-3g",
//! "flaky-api", ...) so a frontend can be pointed at a failure mode by name.
//! Retrieval returns a deep copy; callers can never mutate the catalog.

use crate::rule::{ChaosConfig, ChaosKind, ChaosRule};
use std::collections::HashMap;

/// A named, described chaos configuration
#[derive(Debug, Clone)]
pub struct ChaosPreset {
    /// Catalog key
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// The bundled rules
    pub config: ChaosConfig,
}

/// Catalog of built-in chaos presets
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    presets: HashMap<String, ChaosPreset>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetCatalog {
    /// Create a catalog with every built-in preset
    pub fn new() -> Self {
        let mut catalog = Self {
            presets: HashMap::new(),
        };
        catalog.add(Self::mobile_3g());
        catalog.add(Self::mobile_2g());
        catalog.add(Self::flaky_api());
        catalog.add(Self::slow_backend());
        catalog.add(Self::unstable_network());
        catalog.add(Self::rate_limited());
        catalog.add(Self::satellite());
        catalog
    }

    /// Add or replace a preset
    pub fn add(&mut self, preset: ChaosPreset) {
        self.presets.insert(preset.name.clone(), preset);
    }

    /// Deep copy of a preset by name
    pub fn get(&self, name: &str) -> Option<ChaosPreset> {
        self.presets.get(name).cloned()
    }

    /// Sorted preset names
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.presets.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted (name, description) pairs
    pub fn list_with_description(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .presets
            .values()
            .map(|preset| (preset.name.clone(), preset.description.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// 3G mobile: substantial latency, paced delivery, occasional drops
    fn mobile_3g() -> ChaosPreset {
        let mut latency = ChaosRule::new("3g-latency", ChaosKind::Latency);
        latency.name = "3G latency".to_string();
        latency.min_latency_ms = 300;
        latency.max_latency_ms = 1200;
        latency.jitter_ms = 200;

        let mut drip = ChaosRule::new("3g-drip", ChaosKind::SlowDrip);
        drip.name = "3G bandwidth".to_string();
        drip.bytes_per_ms = 40.0;
        drip.chunk_size = 1024;

        let mut loss = ChaosRule::new("3g-loss", ChaosKind::PacketLoss);
        loss.name = "3G packet loss".to_string();
        loss.probability = 0.02;

        ChaosPreset {
            name: "mobile-3g".to_string(),
            description: "3G mobile network: 300-1200ms latency, ~320 kbps, 2% drops".to_string(),
            config: ChaosConfig::with_rules(vec![latency, drip, loss]),
        }
    }

    /// 2G mobile: long latency, trickling delivery, frequent drops
    fn mobile_2g() -> ChaosPreset {
        let mut latency = ChaosRule::new("2g-latency", ChaosKind::Latency);
        latency.name = "2G latency".to_string();
        latency.min_latency_ms = 800;
        latency.max_latency_ms = 2500;
        latency.jitter_ms = 400;

        let mut drip = ChaosRule::new("2g-drip", ChaosKind::SlowDrip);
        drip.name = "2G bandwidth".to_string();
        drip.bytes_per_ms = 4.0;
        drip.chunk_size = 512;

        let mut loss = ChaosRule::new("2g-loss", ChaosKind::PacketLoss);
        loss.name = "2G packet loss".to_string();
        loss.probability = 0.05;

        ChaosPreset {
            name: "mobile-2g".to_string(),
            description: "2G/EDGE mobile network: 800-2500ms latency, ~32 kbps, 5% drops"
                .to_string(),
            config: ChaosConfig::with_rules(vec![latency, drip, loss]),
        }
    }

    /// Flaky API: intermittent 5xx answers plus mild latency
    fn flaky_api() -> ChaosPreset {
        let mut errors = ChaosRule::new("flaky-errors", ChaosKind::HttpError);
        errors.name = "Intermittent 5xx".to_string();
        errors.probability = 0.3;
        errors.error_codes = vec![500, 502, 503];

        let mut latency = ChaosRule::new("flaky-latency", ChaosKind::Latency);
        latency.name = "API latency".to_string();
        latency.min_latency_ms = 50;
        latency.max_latency_ms = 400;
        latency.jitter_ms = 50;

        ChaosPreset {
            name: "flaky-api".to_string(),
            description: "Intermittently failing backend: 30% 5xx responses, mild latency"
                .to_string(),
            config: ChaosConfig::with_rules(vec![errors, latency]),
        }
    }

    /// Slow backend: multi-second waits, no failures
    fn slow_backend() -> ChaosPreset {
        let mut latency = ChaosRule::new("slow-latency", ChaosKind::Latency);
        latency.name = "Slow backend".to_string();
        latency.min_latency_ms = 2000;
        latency.max_latency_ms = 5000;
        latency.jitter_ms = 500;

        ChaosPreset {
            name: "slow-backend".to_string(),
            description: "Healthy but slow backend: 2-5s responses".to_string(),
            config: ChaosConfig::with_rules(vec![latency]),
        }
    }

    /// Unstable network: drops, mid-body disconnects, corruption
    fn unstable_network() -> ChaosPreset {
        let mut loss = ChaosRule::new("unstable-loss", ChaosKind::PacketLoss);
        loss.name = "Packet loss".to_string();
        loss.probability = 0.1;

        let mut disconnect = ChaosRule::new("unstable-disconnect", ChaosKind::Disconnect);
        disconnect.name = "Mid-body disconnect".to_string();
        disconnect.probability = 0.05;
        disconnect.drop_after_percent = 0.5;

        let mut flip = ChaosRule::new("unstable-bitflip", ChaosKind::BitFlip);
        flip.name = "Payload corruption".to_string();
        flip.probability = 0.02;

        ChaosPreset {
            name: "unstable-network".to_string(),
            description: "Unreliable link: 10% drops, 5% mid-body disconnects, rare corruption"
                .to_string(),
            config: ChaosConfig::with_rules(vec![loss, disconnect, flip]),
        }
    }

    /// Rate limited: half of requests answered 429
    fn rate_limited() -> ChaosPreset {
        let mut limit = ChaosRule::new("rate-limit", ChaosKind::RateLimit);
        limit.name = "Rate limiting".to_string();
        limit.probability = 0.5;
        limit.error_message = "rate limit exceeded".to_string();

        ChaosPreset {
            name: "rate-limited".to_string(),
            description: "Aggressive rate limiting: 50% of requests answered 429".to_string(),
            config: ChaosConfig::with_rules(vec![limit]),
        }
    }

    /// Satellite: high fixed latency with paced delivery
    fn satellite() -> ChaosPreset {
        let mut latency = ChaosRule::new("sat-latency", ChaosKind::Latency);
        latency.name = "Satellite latency".to_string();
        latency.min_latency_ms = 550;
        latency.max_latency_ms = 900;
        latency.jitter_ms = 100;

        let mut drip = ChaosRule::new("sat-drip", ChaosKind::SlowDrip);
        drip.name = "Satellite bandwidth".to_string();
        drip.bytes_per_ms = 100.0;
        drip.chunk_size = 2048;

        ChaosPreset {
            name: "satellite".to_string(),
            description: "Geostationary satellite: 550-900ms latency, paced delivery".to_string(),
            config: ChaosConfig::with_rules(vec![latency, drip]),
        }
    }
}
