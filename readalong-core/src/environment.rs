//! Environment signals consumed by the generation path.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Coarse network quality reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkClass {
    #[default]
    Good,
    Degraded,
    Offline,
}

/// Device resource pressure reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePressure {
    #[default]
    Normal,
    Elevated,
    Critical,
}

/// Snapshot of all environment signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Environment {
    pub network: NetworkClass,
    pub pressure: ResourcePressure,
}

/// Shared, watchable environment state.
///
/// The host writes through `set_*`; the backend adapter reads the latest
/// value without blocking.
#[derive(Debug, Clone)]
pub struct EnvironmentSignals {
    tx: watch::Sender<Environment>,
}

impl Default for EnvironmentSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentSignals {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Environment::default());
        Self { tx }
    }

    /// Current snapshot.
    pub fn current(&self) -> Environment {
        *self.tx.borrow()
    }

    /// Update the network class; returns whether it changed.
    pub fn set_network(&self, network: NetworkClass) -> bool {
        self.tx.send_if_modified(|env| {
            let changed = env.network != network;
            env.network = network;
            changed
        })
    }

    /// Update resource pressure; returns whether it changed.
    pub fn set_pressure(&self, pressure: ResourcePressure) -> bool {
        self.tx.send_if_modified(|env| {
            let changed = env.pressure != pressure;
            env.pressure = pressure;
            changed
        })
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<Environment> {
        self.tx.subscribe()
    }
}
