//! Chaos rule matching engine
//!
//! The engine owns the active [`ChaosConfig`], compiled once at admission so
//! the per-request path never touches a regex compiler. Matching runs exactly
//! once per inbound request and produces a [`MatchSet`]; every later decision
//! (latency, fabricated errors, reordering, body shaping) is a query against
//! that set, so probabilities are never re-evaluated.
//!
//! One `StdRng` serves every probabilistic draw, serialized under a mutex; a
//! non-zero config seed therefore makes whole runs reproducible.

use crate::reorder::ReorderQueue;
use crate::rule::{ChaosConfig, ChaosKind, ChaosRule, LoggingMode};
use crate::stats::{ChaosStats, ChaosStatsSnapshot};
use crate::writers::{DripPlan, ShapePlan};
use crate::{ChaosError, Result};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A rule with its pattern compiled and its runtime flags
struct CompiledRule {
    rule: ChaosRule,
    pattern: Option<Regex>,
    enabled: AtomicBool,
    applied: AtomicU64,
}

impl CompiledRule {
    fn compile(mut rule: ChaosRule) -> Result<Self> {
        rule.normalize();
        let pattern = if rule.url_pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(&rule.url_pattern).map_err(|source| ChaosError::InvalidPattern {
                    rule: rule.id.clone(),
                    source,
                })?,
            )
        };
        let enabled = AtomicBool::new(rule.enabled);
        Ok(Self {
            rule,
            pattern,
            enabled,
            applied: AtomicU64::new(0),
        })
    }

    fn matches(&self, method: &str, url: &str) -> bool {
        if !self.rule.matches_method(method) {
            return false;
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(url),
            None => true,
        }
    }

    /// The rule with its live enabled flag folded back in
    fn to_rule(&self) -> ChaosRule {
        let mut rule = self.rule.clone();
        rule.enabled = self.enabled.load(Ordering::Relaxed);
        rule
    }
}

/// The ordered set of rules selected for one request
///
/// Cheap to clone and pass around; queries borrow the underlying rules.
#[derive(Clone, Default)]
pub struct MatchSet {
    rules: Vec<Arc<CompiledRule>>,
}

impl MatchSet {
    /// No rules matched
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of matched rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Matched rules in declaration order
    pub fn rules(&self) -> impl Iterator<Item = &ChaosRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    /// Ids of the matched rules, for the exchange log
    pub fn rule_ids(&self) -> Vec<String> {
        self.rules().map(|rule| rule.id.clone()).collect()
    }

    /// Whether any matched rule has the given kind
    pub fn contains(&self, kind: ChaosKind) -> bool {
        self.rules().any(|rule| rule.kind == kind)
    }

    /// First matched rule of the given kind
    pub fn first_of(&self, kind: ChaosKind) -> Option<&ChaosRule> {
        self.rules().find(|rule| rule.kind == kind)
    }

    /// First matched error-injection rule (`http_error` or `rate_limit`)
    pub fn error_rule(&self) -> Option<&ChaosRule> {
        self.rules().find(|rule| rule.is_error_kind())
    }

    /// Whether a `timeout` rule matched
    pub fn wants_timeout(&self) -> bool {
        self.contains(ChaosKind::Timeout)
    }

    /// Stale-response sleep, when a `stale` rule matched
    pub fn stale_delay(&self) -> Option<Duration> {
        self.first_of(ChaosKind::Stale)
            .map(|rule| Duration::from_millis(rule.stale_delay_ms))
    }

    /// Reorder parameters, when an `out_of_order` rule matched
    pub fn reorder_params(&self) -> Option<(usize, Duration)> {
        self.first_of(ChaosKind::OutOfOrder).map(|rule| {
            (
                rule.reorder_min_requests,
                Duration::from_millis(rule.reorder_max_wait_ms),
            )
        })
    }
}

struct EngineState {
    rules: Vec<Arc<CompiledRule>>,
    global_odds: f64,
    seed: u64,
    logging_mode: LoggingMode,
}

/// Rule-matching and response-mutation decision engine
pub struct ChaosEngine {
    state: RwLock<EngineState>,
    rng: Arc<Mutex<StdRng>>,
    stats: Arc<ChaosStats>,
    enabled: AtomicBool,
    reorder: Arc<ReorderQueue>,
}

impl Default for ChaosEngine {
    fn default() -> Self {
        Self::new(ChaosConfig::default()).unwrap_or_else(|_| {
            // An empty config has nothing to compile.
            unreachable!("empty chaos config always compiles")
        })
    }
}

impl ChaosEngine {
    /// Build an engine from a config; fails only on an invalid URL regex
    pub fn new(config: ChaosConfig) -> Result<Self> {
        let rules = compile_rules(config.rules)?;
        let rng = Arc::new(Mutex::new(seeded_rng(config.seed)));
        let stats = Arc::new(ChaosStats::default());
        let reorder = Arc::new(ReorderQueue::new(Arc::clone(&rng), Arc::clone(&stats)));
        Ok(Self {
            state: RwLock::new(EngineState {
                rules,
                global_odds: config.global_odds,
                seed: config.seed,
                logging_mode: config.logging_mode,
            }),
            rng,
            stats,
            enabled: AtomicBool::new(true),
            reorder,
        })
    }

    /// Whether the engine participates in requests at all
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn the engine on or off without touching its config
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Current chaos decision logging mode
    pub fn logging_mode(&self) -> LoggingMode {
        self.state.read().logging_mode
    }

    /// The engine's reorder queue
    pub fn reorder(&self) -> Arc<ReorderQueue> {
        Arc::clone(&self.reorder)
    }

    /// Shared statistics handle
    pub fn stats_handle(&self) -> Arc<ChaosStats> {
        Arc::clone(&self.stats)
    }

    /// Replace the whole config atomically
    ///
    /// Compilation happens before the swap, so a bad regex leaves the prior
    /// config in force. A new seed reseeds the shared RNG.
    pub fn set_config(&self, config: ChaosConfig) -> Result<()> {
        let rules = compile_rules(config.rules)?;
        let mut state = self.state.write();
        state.rules = rules;
        state.global_odds = config.global_odds;
        state.logging_mode = config.logging_mode;
        if state.seed != config.seed {
            state.seed = config.seed;
            *self.rng.lock() = seeded_rng(config.seed);
        }
        Ok(())
    }

    /// Snapshot the active config, with live enabled flags
    pub fn config(&self) -> ChaosConfig {
        let state = self.state.read();
        ChaosConfig {
            rules: state.rules.iter().map(|compiled| compiled.to_rule()).collect(),
            global_odds: state.global_odds,
            seed: state.seed,
            logging_mode: state.logging_mode,
        }
    }

    /// Add one rule to the active config
    pub fn add_rule(&self, rule: ChaosRule) -> Result<()> {
        let compiled = CompiledRule::compile(rule)?;
        let mut state = self.state.write();
        if state.rules.iter().any(|existing| existing.rule.id == compiled.rule.id) {
            return Err(ChaosError::Config(format!(
                "duplicate rule id: {}",
                compiled.rule.id
            )));
        }
        state.rules.push(Arc::new(compiled));
        Ok(())
    }

    /// Remove a rule by id
    pub fn remove_rule(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        let before = state.rules.len();
        state.rules.retain(|compiled| compiled.rule.id != id);
        if state.rules.len() == before {
            return Err(ChaosError::UnknownRule(id.to_string()));
        }
        Ok(())
    }

    /// Enable a rule by id
    pub fn enable_rule(&self, id: &str) -> Result<()> {
        self.set_rule_enabled(id, true)
    }

    /// Disable a rule by id
    pub fn disable_rule(&self, id: &str) -> Result<()> {
        self.set_rule_enabled(id, false)
    }

    fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let state = self.state.read();
        let rule = state
            .rules
            .iter()
            .find(|compiled| compiled.rule.id == id)
            .ok_or_else(|| ChaosError::UnknownRule(id.to_string()))?;
        rule.enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Drop every rule, keeping the global knobs
    pub fn clear(&self) {
        self.state.write().rules.clear();
    }

    /// Statistics snapshot including per-rule applied counts
    pub fn stats(&self) -> ChaosStatsSnapshot {
        let state = self.state.read();
        let rule_applied: HashMap<String, u64> = state
            .rules
            .iter()
            .map(|compiled| {
                (
                    compiled.rule.id.clone(),
                    compiled.applied.load(Ordering::Relaxed),
                )
            })
            .collect();
        drop(state);
        self.stats.snapshot(rule_applied)
    }

    /// Zero the global counters and every per-rule applied count
    pub fn reset_stats(&self) {
        self.stats.reset();
        for compiled in self.state.read().rules.iter() {
            compiled.applied.store(0, Ordering::Relaxed);
        }
    }

    /// Evaluate the rule set against one inbound request
    ///
    /// Called exactly once per request. A disabled engine returns an empty
    /// set without advancing any counter. The global-odds gate, when set
    /// strictly between 0 and 1, precedes per-rule evaluation.
    pub fn matching_rules(&self, method: &str, url: &str) -> MatchSet {
        if !self.is_enabled() {
            return MatchSet::default();
        }
        self.stats.record_request();

        let state = self.state.read();

        if state.global_odds > 0.0 && state.global_odds < 1.0 {
            let draw: f64 = self.rng.lock().random();
            if draw > state.global_odds {
                return MatchSet::default();
            }
        }

        let mut matched = Vec::new();
        for compiled in &state.rules {
            if !compiled.enabled.load(Ordering::Relaxed) {
                continue;
            }
            if !compiled.matches(method, url) {
                continue;
            }
            if compiled.rule.probability <= 0.0 {
                continue;
            }
            if compiled.rule.probability < 1.0 {
                let draw: f64 = self.rng.lock().random();
                if draw > compiled.rule.probability {
                    continue;
                }
            }
            compiled.applied.fetch_add(1, Ordering::Relaxed);
            matched.push(Arc::clone(compiled));
        }
        drop(state);

        if !matched.is_empty() {
            self.stats.record_affected();
            debug!(method, url, rules = matched.len(), "Chaos rules matched");
        }
        MatchSet { rules: matched }
    }

    /// Total latency to inject for this match set
    ///
    /// Each latency rule draws uniformly in `[min, max)` plus jitter in
    /// `±jitter`, clamped at zero; draws sum across rules and accumulate
    /// into the injected-latency counter.
    pub fn latency_delay(&self, set: &MatchSet) -> Duration {
        let mut total_ms: u64 = 0;
        for rule in set.rules() {
            if rule.kind != ChaosKind::Latency {
                continue;
            }
            let mut rng = self.rng.lock();
            let base = rng.random_range(rule.min_latency_ms..rule.max_latency_ms) as i64;
            let jitter = if rule.jitter_ms > 0 {
                rng.random_range(-(rule.jitter_ms as i64)..=(rule.jitter_ms as i64))
            } else {
                0
            };
            total_ms += (base + jitter).max(0) as u64;
        }
        if total_ms > 0 {
            self.stats.record_latency(total_ms);
        }
        Duration::from_millis(total_ms)
    }

    /// Status and body for a fabricated error response
    ///
    /// Picks among the rule's candidate codes and falls back to the
    /// canonical reason phrase when no message is configured. Counts one
    /// injected error; call only when the fabricated response is used.
    pub fn error_response(&self, set: &MatchSet) -> Option<(u16, String)> {
        let rule = set.error_rule()?;
        let status = match rule.error_codes.len() {
            0 => 500,
            1 => rule.error_codes[0],
            n => rule.error_codes[self.rng.lock().random_range(0..n)],
        };
        let body = if rule.error_message.is_empty() {
            default_error_message(status)
        } else {
            rule.error_message.clone()
        };
        self.stats.record_error();
        Some((status, body))
    }

    /// Assemble the body-shaping plan implied by the match set
    ///
    /// Draws that need randomness (slow-close delay) happen here so the
    /// shaping driver itself stays deterministic.
    pub fn shape_plan(&self, set: &MatchSet) -> ShapePlan {
        let mut plan = ShapePlan::default();
        for rule in set.rules() {
            match rule.kind {
                ChaosKind::PacketLoss => plan.packet_loss = true,
                ChaosKind::Disconnect => {
                    if rule.drop_after_bytes > 0 {
                        plan.drop_after_bytes = Some(rule.drop_after_bytes as usize);
                    } else if rule.drop_after_percent > 0.0 {
                        plan.drop_after_percent = Some(rule.drop_after_percent);
                    } else {
                        plan.drop_after_percent = Some(0.5);
                    }
                }
                ChaosKind::Truncate => plan.truncate_percent = Some(rule.truncate_percent),
                ChaosKind::SlowDrip | ChaosKind::Bandwidth => {
                    if plan.drip.is_none() {
                        plan.drip = Some(DripPlan {
                            bytes_per_ms: rule.bytes_per_ms,
                            chunk_size: rule.chunk_size,
                        });
                    }
                }
                ChaosKind::BitFlip => plan.bit_flip = true,
                ChaosKind::CorruptJson => plan.corrupt_json = true,
                ChaosKind::ChunkedAbort => plan.chunked_abort = true,
                ChaosKind::PartialBody => plan.partial_body = true,
                ChaosKind::HeaderBomb => plan.header_bomb = true,
                ChaosKind::SlowClose => {
                    let mut rng = self.rng.lock();
                    let delay = rng.random_range(rule.min_latency_ms..rule.max_latency_ms);
                    plan.slow_close = Some(Duration::from_millis(delay));
                }
                ChaosKind::Latency
                | ChaosKind::Timeout
                | ChaosKind::Stale
                | ChaosKind::OutOfOrder
                | ChaosKind::HttpError
                | ChaosKind::RateLimit => {}
            }
        }
        plan
    }

    /// Apply in-place body corruption requested by the plan
    pub fn apply_corruption(&self, plan: &ShapePlan, body: &mut Vec<u8>) {
        if plan.bit_flip {
            let mut rng = self.rng.lock();
            crate::writers::bit_flip(body, &mut *rng);
        }
        if plan.corrupt_json {
            let mut rng = self.rng.lock();
            crate::writers::corrupt_json(body, &mut *rng);
        }
    }

    /// Generate padding headers for a `header_bomb` rule
    pub fn bomb_headers(&self) -> Vec<(String, String)> {
        let mut rng = self.rng.lock();
        crate::writers::header_bomb(&mut *rng)
    }
}

fn compile_rules(rules: Vec<ChaosRule>) -> Result<Vec<Arc<CompiledRule>>> {
    rules
        .into_iter()
        .map(|rule| CompiledRule::compile(rule).map(Arc::new))
        .collect()
}

fn seeded_rng(seed: u64) -> StdRng {
    if seed != 0 {
        StdRng::seed_from_u64(seed)
    } else {
        StdRng::from_os_rng()
    }
}

/// Default body for an injected error status
fn default_error_message(status: u16) -> String {
    match status {
        400 => "Bad Request".to_string(),
        401 => "Unauthorized".to_string(),
        403 => "Forbidden".to_string(),
        404 => "Not Found".to_string(),
        429 => "Too Many Requests".to_string(),
        500 => "Internal Server Error".to_string(),
        502 => "Bad Gateway".to_string(),
        503 => "Service Unavailable".to_string(),
        504 => "Gateway Timeout".to_string(),
        _ => format!("HTTP {} Error", status),
    }
}
