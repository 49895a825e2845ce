//! Statistical behavior of the preset catalog under load
//!
//! These tests drive the engine's decision path directly (no sleeping, no
//! sockets): a thousand match-set evaluations are enough to pin down drop
//! rates and latency ranges without turning the suite into a soak test.

use devtap_chaos::{ChaosEngine, ChaosKind, PresetCatalog};

#[test]
fn mobile_3g_drop_rate_and_latency_envelope() {
    let preset = PresetCatalog::new().get("mobile-3g").expect("preset");
    let mut config = preset.config;
    config.seed = 1234;
    let engine = ChaosEngine::new(config).expect("engine");

    let mut dropped = 0usize;
    let mut latency_total_ms = 0u128;
    let mut survivors = 0usize;

    for _ in 0..1000 {
        let set = engine.matching_rules("GET", "http://localhost/x");
        if set.contains(ChaosKind::PacketLoss) {
            dropped += 1;
            continue;
        }
        survivors += 1;
        latency_total_ms += engine.latency_delay(&set).as_millis();
    }

    // ~2% drop rate, give or take a percentage point.
    assert!(
        (10..=30).contains(&dropped),
        "expected ~20 drops out of 1000, got {dropped}"
    );

    // Average injected latency per surviving request sits well inside the
    // 3G envelope.
    let average = latency_total_ms as f64 / survivors as f64;
    assert!(
        (200.0..=2500.0).contains(&average),
        "average latency {average}ms outside envelope"
    );

    let stats = engine.stats();
    assert_eq!(stats.total_requests, 1000);
    assert!(stats.latency_injected_ms > 0);
}

#[test]
fn flaky_api_injects_roughly_a_third_of_requests() {
    let preset = PresetCatalog::new().get("flaky-api").expect("preset");
    let mut config = preset.config;
    config.seed = 77;
    let engine = ChaosEngine::new(config).expect("engine");

    let mut errors = 0usize;
    for _ in 0..1000 {
        let set = engine.matching_rules("GET", "http://localhost/api/users");
        if set.error_rule().is_some() {
            errors += 1;
        }
    }
    assert!(
        (240..=360).contains(&errors),
        "expected ~300 error injections, got {errors}"
    );
}

#[test]
fn every_preset_compiles_into_an_engine() {
    let catalog = PresetCatalog::new();
    for name in catalog.list() {
        let preset = catalog.get(&name).expect("preset");
        ChaosEngine::new(preset.config)
            .unwrap_or_else(|err| panic!("preset {name} failed to compile: {err}"));
    }
}
