//! Materialized view manager - background refresh scheduling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::AggregateStore;
use crate::cache::CacheManager;
use crate::error::CacheError;

use super::view::{ViewDefinition, ViewSlot, ViewState, ViewStatus};

/// Delay before the first retry after a failed refresh; doubles per
/// consecutive failure up to [`REFRESH_BACKOFF_MAX`].
const REFRESH_BACKOFF_BASE: Duration = Duration::from_secs(1);
const REFRESH_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// How long `stop` waits for refresh loops before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Keeps registered materialized views populated and their dependent cache
/// entries honest.
///
/// Each view gets its own background task; refreshes of distinct views run
/// concurrently while refreshes of the same view are serialized by a
/// per-view gate. A successful refresh advances the view's timestamp and
/// invalidates the `view:<name>` tag so dependent cached analytics are
/// recomputed from fresh data instead of expiring on TTL alone. A failed
/// refresh keeps the last-good snapshot and retries with capped exponential
/// backoff.
pub struct MaterializedViewManager {
    views: RwLock<HashMap<String, Arc<ViewSlot>>>,
    store: Arc<dyn AggregateStore>,
    cache: Arc<CacheManager>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MaterializedViewManager {
    pub fn new(cache: Arc<CacheManager>, store: Arc<dyn AggregateStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            views: RwLock::new(HashMap::new()),
            store,
            cache,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a view. Call before `start`; registration replaces any
    /// previous definition under the same name.
    pub fn register(&self, def: ViewDefinition) {
        let name = def.name.clone();
        let replaced = self
            .views
            .write()
            .insert(name.clone(), Arc::new(ViewSlot::new(def)))
            .is_some();
        if replaced {
            warn!(view = %name, "view re-registered, previous state discarded");
        } else {
            debug!(view = %name, "view registered");
        }
    }

    /// Whether a view's snapshot is fresh enough for readers to prefer it
    /// over a live computation.
    pub fn is_fresh(&self, name: &str) -> bool {
        self.views
            .read()
            .get(name)
            .map(|slot| slot.is_fresh())
            .unwrap_or(false)
    }

    /// Status snapshot of one view.
    pub fn status(&self, name: &str) -> Option<ViewStatus> {
        self.views.read().get(name).map(|slot| slot.snapshot())
    }

    /// Status snapshots of every registered view.
    pub fn statuses(&self) -> Vec<ViewStatus> {
        self.views.read().values().map(|slot| slot.snapshot()).collect()
    }

    /// Refresh one view now.
    ///
    /// If a refresh of the same view is already running this returns
    /// immediately without starting another. The attempt is bounded by the
    /// view's own refresh interval; overrunning it counts as a failure.
    pub async fn refresh(&self, name: &str) -> Result<(), CacheError> {
        let slot = self
            .views
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::Refresh(format!("unknown view: {name}")))?;
        refresh_slot(&slot, self.store.as_ref(), &self.cache).await
    }

    /// Spawn one refresh loop per registered view.
    pub fn start(&self) {
        let slots: Vec<Arc<ViewSlot>> = self.views.read().values().cloned().collect();
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        for slot in slots {
            let store = Arc::clone(&self.store);
            let cache = Arc::clone(&self.cache);
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(run_view(slot, store, cache, shutdown)));
        }
        info!(views = tasks.len(), "materialized view scheduler started");
    }

    /// Signal refresh loops and wait for them to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        info!("materialized view scheduler stopped");
    }
}

/// Refresh one view, serialized per view by its gate and bounded by the
/// view's own refresh interval.
async fn refresh_slot(
    slot: &ViewSlot,
    store: &dyn AggregateStore,
    cache: &CacheManager,
) -> Result<(), CacheError> {
    let name = slot.def.name.as_str();
    let Ok(_gate) = slot.refresh_gate.try_lock() else {
        debug!(view = name, "refresh already in progress, skipping");
        return Ok(());
    };

    slot.status.write().state = ViewState::Populating;
    let started = Instant::now();

    match tokio::time::timeout(slot.def.refresh_interval, store.refresh_view(name)).await {
        Ok(Ok(())) => {
            {
                let mut status = slot.status.write();
                status.state = ViewState::Fresh;
                status.populated = true;
                status.last_refreshed_at = Some(Utc::now());
                status.last_refreshed_instant = Some(Instant::now());
                status.last_error = None;
                status.consecutive_failures = 0;
            }
            let purged = cache.invalidate_tag(&format!("view:{name}")).await;
            info!(
                view = name,
                purged,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "materialized view refreshed"
            );
            Ok(())
        }
        Ok(Err(e)) => {
            let message = format!("{e:#}");
            record_failure(slot, &message);
            Err(CacheError::Refresh(message))
        }
        Err(_) => {
            let message = format!(
                "refresh exceeded its {:?} deadline",
                slot.def.refresh_interval
            );
            record_failure(slot, &message);
            Err(CacheError::Refresh(message))
        }
    }
}

fn record_failure(slot: &ViewSlot, message: &str) {
    let mut status = slot.status.write();
    // Never drop a populated snapshot over a failed refresh attempt.
    status.state = if status.populated {
        ViewState::Stale
    } else {
        ViewState::Uninitialized
    };
    status.last_error = Some(message.to_string());
    status.consecutive_failures += 1;
    warn!(
        view = %slot.def.name,
        failures = status.consecutive_failures,
        error = message,
        "materialized view refresh failed"
    );
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(REFRESH_BACKOFF_MAX)
}

async fn run_view(
    slot: Arc<ViewSlot>,
    store: Arc<dyn AggregateStore>,
    cache: Arc<CacheManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = slot.def.name.clone();
    let mut backoff = REFRESH_BACKOFF_BASE;
    loop {
        let delay = match refresh_slot(&slot, store.as_ref(), &cache).await {
            Ok(()) => {
                backoff = REFRESH_BACKOFF_BASE;
                slot.def.refresh_interval
            }
            Err(_) => {
                let delay = backoff;
                backoff = next_backoff(backoff);
                delay
            }
        };
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!(view = %name, "view refresh loop stopped");
}
