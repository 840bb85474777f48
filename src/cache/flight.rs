//! Single-flight guard - deduplicates concurrent recomputation of a cold key.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::error::CacheError;

/// Outcome of an in-flight computation, broadcast to every waiter.
pub(crate) type FlightOutcome = Result<Arc<Vec<u8>>, CacheError>;

type OutcomeReceiver = watch::Receiver<Option<FlightOutcome>>;

/// Tracks at most one in-flight computation per key.
///
/// The first caller for a cold key becomes the leader and receives a
/// [`FlightPermit`]; everyone arriving while the permit is live becomes a
/// follower and awaits the leader's outcome. Completion - success or
/// failure - releases all followers with the same outcome.
pub(crate) struct SingleFlightGuard {
    in_flight: DashMap<String, OutcomeReceiver>,
}

pub(crate) enum FlightRole<'a> {
    Leader(FlightPermit<'a>),
    Follower(OutcomeReceiver),
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Join the flight for `key`, becoming leader if none is active.
    pub fn begin(&self, key: &str) -> FlightRole<'_> {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(occupied) => FlightRole::Follower(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx);
                FlightRole::Leader(FlightPermit {
                    flights: &self.in_flight,
                    key: key.to_string(),
                    tx: Some(tx),
                })
            }
        }
    }

    /// Number of computations currently in flight.
    #[allow(dead_code)]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Leadership of one in-flight computation.
///
/// Dropping the permit without calling [`FlightPermit::complete`] (the
/// leader was cancelled) releases followers with a compute error instead of
/// leaving them waiting on a dead flight.
pub(crate) struct FlightPermit<'a> {
    flights: &'a DashMap<String, OutcomeReceiver>,
    key: String,
    tx: Option<watch::Sender<Option<FlightOutcome>>>,
}

impl FlightPermit<'_> {
    /// Finish the flight and release every follower with `outcome`.
    pub fn complete(mut self, outcome: FlightOutcome) {
        // Remove before sending so late arrivals start a fresh flight and
        // re-check the cache instead of attaching to a finished one.
        self.flights.remove(&self.key);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(outcome));
        }
    }
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.flights.remove(&self.key);
            let _ = tx.send(Some(Err(CacheError::Compute(
                "computation cancelled before completion".to_string(),
            ))));
        }
    }
}

/// Await a leader's outcome, bounded by `wait_timeout`.
pub(crate) async fn await_outcome(
    mut rx: OutcomeReceiver,
    wait_timeout: Duration,
) -> FlightOutcome {
    let wait = async {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(CacheError::Compute(
                    "computation abandoned by leader".to_string(),
                ));
            }
        }
    };
    match tokio::time::timeout(wait_timeout, wait).await {
        Ok(outcome) => outcome,
        Err(_) => Err(CacheError::ComputeTimeout(wait_timeout)),
    }
}
