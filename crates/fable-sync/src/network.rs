//! # Network Monitor
//!
//! Connectivity seam between the application shell and the engine. The
//! shell owns the actual link detection (browser events, OS reachability,
//! ping probes - whatever it has) and pushes transitions through a
//! [`NetworkSignal`]; the orchestrator subscribes through a
//! [`NetworkMonitor`] watch channel. No polling anywhere in the core.

use tokio::sync::watch;
use tracing::info;

// =============================================================================
// Network State
// =============================================================================

/// Current connectivity as reported by the application shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub const fn is_online(&self) -> bool {
        matches!(self, NetworkState::Online)
    }
}

// =============================================================================
// Signal (producer) / Monitor (consumer)
// =============================================================================

/// Producer half: the application shell reports transitions here.
#[derive(Debug, Clone)]
pub struct NetworkSignal {
    tx: watch::Sender<NetworkState>,
}

impl NetworkSignal {
    /// Creates the signal/monitor pair with the given initial state.
    pub fn new(initial: NetworkState) -> (Self, NetworkMonitor) {
        let (tx, rx) = watch::channel(initial);
        (NetworkSignal { tx }, NetworkMonitor { rx })
    }

    /// Reports a connectivity transition. Redundant reports are cheap;
    /// watch subscribers only wake on actual changes.
    pub fn set(&self, state: NetworkState) {
        if *self.tx.borrow() != state {
            info!(?state, "Network state changed");
        }
        let _ = self.tx.send(state);
    }

    pub fn set_online(&self) {
        self.set(NetworkState::Online);
    }

    pub fn set_offline(&self) {
        self.set(NetworkState::Offline);
    }
}

/// Consumer half: the orchestrator awaits transitions here.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    rx: watch::Receiver<NetworkState>,
}

impl NetworkMonitor {
    /// Current state without waiting.
    pub fn state(&self) -> NetworkState {
        *self.rx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Waits for the next state transition. Returns the new state, or
    /// `None` if the signal side was dropped.
    pub async fn changed(&mut self) -> Option<NetworkState> {
        match self.rx.changed().await {
            Ok(()) => Some(*self.rx.borrow_and_update()),
            Err(_) => None,
        }
    }
}
