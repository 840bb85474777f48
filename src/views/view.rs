//! Materialized view definitions and per-view state.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;

/// Registration-time description of a materialized view.
#[derive(Debug, Clone)]
pub struct ViewDefinition {
    pub name: String,

    /// How often the refresh scheduler rebuilds the snapshot. Also the
    /// deadline for a single refresh attempt.
    pub refresh_interval: Duration,

    /// How old a snapshot may be and still be preferred over a live
    /// computation by readers.
    pub staleness: Duration,
}

impl ViewDefinition {
    /// Define a view; readers tolerate snapshots up to twice the refresh
    /// interval old unless overridden.
    pub fn new(name: impl Into<String>, refresh_interval: Duration) -> Self {
        Self {
            name: name.into(),
            refresh_interval,
            staleness: refresh_interval * 2,
        }
    }

    /// Override the staleness threshold.
    #[must_use]
    pub fn staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }
}

/// Refresh state machine of one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    /// Registered but never successfully populated.
    Uninitialized,
    /// A refresh is running.
    Populating,
    /// The snapshot is current.
    Fresh,
    /// A populated view whose last refresh attempt failed; the last-good
    /// snapshot keeps being served.
    Stale,
}

/// Observable status snapshot of one view.
#[derive(Debug, Clone, Serialize)]
pub struct ViewStatus {
    pub name: String,
    pub state: ViewState,
    pub populated: bool,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

pub(crate) struct StatusInner {
    pub state: ViewState,
    pub populated: bool,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Monotonic twin of `last_refreshed_at`, used for freshness checks.
    pub last_refreshed_instant: Option<Instant>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

/// One registered view: its definition, mutable status, and the gate that
/// serializes refreshes of the same view.
pub(crate) struct ViewSlot {
    pub def: ViewDefinition,
    pub status: RwLock<StatusInner>,
    pub refresh_gate: Mutex<()>,
}

impl ViewSlot {
    pub fn new(def: ViewDefinition) -> Self {
        Self {
            def,
            status: RwLock::new(StatusInner {
                state: ViewState::Uninitialized,
                populated: false,
                last_refreshed_at: None,
                last_refreshed_instant: None,
                last_error: None,
                consecutive_failures: 0,
            }),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> ViewStatus {
        let status = self.status.read();
        ViewStatus {
            name: self.def.name.clone(),
            state: status.state,
            populated: status.populated,
            last_refreshed_at: status.last_refreshed_at,
            last_error: status.last_error.clone(),
            consecutive_failures: status.consecutive_failures,
        }
    }

    /// Whether readers should prefer this view over a live computation.
    pub fn is_fresh(&self) -> bool {
        let status = self.status.read();
        status.populated
            && status
                .last_refreshed_instant
                .map(|at| at.elapsed() < self.def.staleness)
                .unwrap_or(false)
    }
}
