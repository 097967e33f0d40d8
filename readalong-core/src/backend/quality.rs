//! Quality tier selection.
//!
//! Fidelity is lowered before the pipeline gives up. The ceiling is derived
//! from the environment and from an exponentially weighted moving average of
//! observed generation latency:
//!
//! - degraded network caps at `Standard`
//! - elevated resource pressure lowers one tier, critical caps at `Draft`
//! - smoothed latency above the threshold lowers one tier

use crate::config::QualityConfig;
use crate::environment::{Environment, NetworkClass, ResourcePressure};
use crate::model::QualityTier;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct GovernorState {
    smoothed_ms: Option<f64>,
    last_ceiling: Option<(QualityTier, NetworkClass)>,
}

/// Chooses the tier each generation attempt should request.
#[derive(Debug)]
pub struct QualityGovernor {
    config: QualityConfig,
    state: Mutex<GovernorState>,
}

impl QualityGovernor {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GovernorState::default()),
        }
    }

    /// Fold a latency sample into the moving average.
    pub fn observe_latency(&self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        let alpha = self.config.latency_smoothing.clamp(f64::EPSILON, 1.0);
        let mut state = self.state.lock();
        let next = match state.smoothed_ms {
            Some(prev) => alpha * sample + (1.0 - alpha) * prev,
            None => sample,
        };
        state.smoothed_ms = Some(next);
        debug!(sample_ms = sample, smoothed_ms = next, "generation latency");
    }

    pub fn smoothed_latency(&self) -> Option<Duration> {
        self.state
            .lock()
            .smoothed_ms
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    /// Highest tier allowed under the given conditions.
    pub fn ceiling(&self, env: Environment) -> QualityTier {
        let mut tier = self.config.default_tier;

        if env.network == NetworkClass::Degraded {
            tier = tier.min(QualityTier::Standard);
        }
        match env.pressure {
            ResourcePressure::Normal => {}
            ResourcePressure::Elevated => tier = tier.lower(),
            ResourcePressure::Critical => tier = QualityTier::Draft,
        }

        let slow = self
            .state
            .lock()
            .smoothed_ms
            .is_some_and(|ms| ms > self.config.latency_threshold_ms as f64);
        if slow {
            tier = tier.lower();
        }
        tier
    }

    /// Tier to request for an attempt that wants `requested`.
    pub fn select(&self, requested: QualityTier, env: Environment) -> QualityTier {
        requested.min(self.ceiling(env))
    }

    /// Recompute the ceiling; returns it if it or the network class changed
    /// since the last call.
    pub fn refresh(&self, env: Environment) -> Option<QualityTier> {
        let ceiling = self.ceiling(env);
        let mut state = self.state.lock();
        let current = (ceiling, env.network);
        if state.last_ceiling == Some(current) {
            return None;
        }
        state.last_ceiling = Some(current);
        Some(ceiling)
    }
}
