//! # devtap Chaos Engine
//!
//! Rule-matched, probabilistic failure injection for the devtap proxy.
//!
//! A [`ChaosConfig`] declares failure rules; the [`ChaosEngine`] evaluates
//! them exactly once per inbound request into a [`MatchSet`], which the proxy
//! then consults for every response-shaping decision: injected latency,
//! fabricated errors, reordering, and the body-mutation plan executed by the
//! writers in [`writers`]. Statistics are kept lock-free and a fixed seed
//! makes every probabilistic draw reproducible.

pub mod engine;
pub mod presets;
pub mod reorder;
pub mod rule;
pub mod stats;
pub mod writers;

pub use engine::{ChaosEngine, MatchSet};
pub use presets::{ChaosPreset, PresetCatalog};
pub use reorder::{ReorderQueue, ReorderTicket};
pub use rule::{ChaosConfig, ChaosKind, ChaosRule, LoggingMode};
pub use stats::{ChaosStats, ChaosStatsSnapshot};
pub use writers::{Admit, DripPlan, DropGate, ShapePlan, TruncateGate};

use thiserror::Error;

/// Chaos engine errors
#[derive(Error, Debug)]
pub enum ChaosError {
    #[error("Invalid URL pattern in rule '{rule}': {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChaosError>;
