//! `EngineConfig`: layered defaults consumed by [`crate::engine::Engine::new`].
//!
//! Layering is intentionally simple — struct defaults overridden by
//! environment variables — rather than pulling in a dedicated config crate
//! the teacher doesn't otherwise depend on.

use std::time::Duration;

/// Selects the audit tracer implementation (§4.8 "No-op mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerMode {
    Real,
    Noop,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tracer_mode: TracerMode,
    pub snapshot_max_attempts: u32,
    pub snapshot_retry_delay: Duration,
    /// How long the scheduler's flush-on-zero-delay invocations are allowed
    /// to coalesce before a caller should assume something is stuck; purely
    /// advisory, the in-memory scheduler does not enforce it.
    pub scheduler_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tracer_mode: TracerMode::Real,
            snapshot_max_attempts: crate::audit::SNAPSHOT_MAX_ATTEMPTS,
            snapshot_retry_delay: crate::audit::SNAPSHOT_RETRY_DELAY,
            scheduler_poll_interval: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    /// Applies `TASQUENCER_TRACER` (`real`|`noop`) and
    /// `TASQUENCER_SNAPSHOT_MAX_ATTEMPTS` overrides on top of [`Default`],
    /// matching the CLI's `RUST_LOG`-style environment-driven configuration.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(mode) = std::env::var("TASQUENCER_TRACER") {
            cfg.tracer_mode = match mode.as_str() {
                "noop" => TracerMode::Noop,
                _ => TracerMode::Real,
            };
        }
        if let Ok(attempts) = std::env::var("TASQUENCER_SNAPSHOT_MAX_ATTEMPTS") {
            if let Ok(parsed) = attempts.parse() {
                cfg.snapshot_max_attempts = parsed;
            }
        }
        cfg
    }
}
