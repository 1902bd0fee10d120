//! Single-flight coordination of analysis generation
//!
//! The registry maps a content identity to the flights currently generating
//! for it, each flight owning a disjoint perspective set. A caller joins
//! every flight that overlaps what it still needs and leads a new flight for
//! whatever is left. Registration, lookup and removal happen under one lock.
//!
//! Generation runs on a spawned task. Callers only wait on a watch channel,
//! so a caller that stops waiting (timeout, dropped future) never cancels
//! the generation it led or joined.

use futures_util::future::{join_all, BoxFuture};
use libro_core::{AnalysisResult, CacheKey, ContentIdentity, CoordinatorConfig, GenError, PerspectiveSet};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Outcome of one flight, cloned to every waiter.
pub type FlightOutcome = Result<AnalysisResult, GenError>;

type OutcomeReceiver = watch::Receiver<Option<FlightOutcome>>;
type OutcomeSender = watch::Sender<Option<FlightOutcome>>;

struct InFlight {
    id: u64,
    perspectives: PerspectiveSet,
    rx: OutcomeReceiver,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    flights: HashMap<ContentIdentity, Vec<InFlight>>,
}

impl Registry {
    fn remove(&mut self, identity: &ContentIdentity, id: u64) {
        if let Some(entries) = self.flights.get_mut(identity) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                self.flights.remove(identity);
            }
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the flight and publishes its outcome, atomically under the
/// registry lock. Publishes `Abandoned` if dropped before publishing.
struct FlightGuard {
    registry: Arc<Mutex<Registry>>,
    identity: ContentIdentity,
    id: u64,
    tx: Option<OutcomeSender>,
}

impl FlightGuard {
    fn publish(&mut self, outcome: FlightOutcome) {
        let mut registry = lock(&self.registry);
        registry.remove(&self.identity, self.id);
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(identity = %self.identity, flight = self.id, "Flight ended without an outcome");
            self.publish(Err(GenError::Abandoned));
        }
    }
}

/// Deduplicates concurrent generation for the same content identity.
#[derive(Clone)]
pub struct SingleFlightCoordinator {
    registry: Arc<Mutex<Registry>>,
    follower_wait: Duration,
}

impl SingleFlightCoordinator {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            follower_wait: config.follower_wait,
        }
    }

    pub fn follower_wait(&self) -> Duration {
        self.follower_wait
    }

    /// Number of flights currently registered.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.registry).flights.values().map(Vec::len).sum()
    }

    /// Obtain results covering `needed` for `key`'s identity.
    ///
    /// `generate` is called at most once, for the perspectives no in-flight
    /// generation already covers, and not at all when existing flights cover
    /// everything. The returned result merges every flight waited on and may
    /// cover more than `needed`. The first failing flight's error is
    /// returned as is.
    pub async fn run<F>(
        &self,
        key: &CacheKey,
        needed: PerspectiveSet,
        generate: F,
    ) -> Result<AnalysisResult, GenError>
    where
        F: FnOnce(PerspectiveSet) -> BoxFuture<'static, FlightOutcome> + Send,
    {
        let identity = key.identity();
        let mut waits: Vec<OutcomeReceiver> = Vec::new();
        let mut led = None;

        {
            let mut registry = lock(&self.registry);
            let mut remaining = needed;

            if let Some(entries) = registry.flights.get(&identity) {
                for entry in entries {
                    if remaining.is_empty() {
                        break;
                    }
                    if !entry.perspectives.is_disjoint(&remaining) {
                        remaining = remaining.difference(&entry.perspectives);
                        waits.push(entry.rx.clone());
                    }
                }
            }

            if !remaining.is_empty() {
                let id = registry.next_id;
                registry.next_id += 1;
                let (tx, rx) = watch::channel(None);
                registry.flights.entry(identity).or_default().push(InFlight {
                    id,
                    perspectives: remaining.clone(),
                    rx: rx.clone(),
                });
                waits.push(rx);
                led = Some((id, tx, remaining));
            }
        }

        debug!(
            key = %key.fingerprint(),
            joined = waits.len() - usize::from(led.is_some()),
            leading = led.is_some(),
            "Single-flight registration"
        );

        if let Some((id, tx, perspectives)) = led {
            let guard = FlightGuard {
                registry: Arc::clone(&self.registry),
                identity,
                id,
                tx: Some(tx),
            };
            let flight = generate(perspectives);
            tokio::spawn(async move {
                let mut guard = guard;
                let outcome = flight.await;
                guard.publish(outcome);
            });
        }

        let started = Instant::now();
        let outcomes = timeout(self.follower_wait, join_all(waits.into_iter().map(wait_outcome)))
            .await
            .map_err(|_| {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(key = %key.fingerprint(), waited_ms, "Stopped waiting for generation");
                GenError::WaitTimedOut { waited_ms }
            })?;

        let mut merged: Option<AnalysisResult> = None;
        for outcome in outcomes {
            let fragment = outcome?;
            merged = Some(match merged {
                Some(base) => base.merge(&fragment)?,
                None => fragment,
            });
        }
        merged.ok_or(GenError::Abandoned)
    }
}

async fn wait_outcome(mut rx: OutcomeReceiver) -> FlightOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(value) => (*value).clone().unwrap_or(Err(GenError::Abandoned)),
        Err(_) => Err(GenError::Abandoned),
    }
}

impl std::fmt::Debug for SingleFlightCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightCoordinator")
            .field("in_flight", &self.in_flight_count())
            .field("follower_wait", &self.follower_wait)
            .finish()
    }
}
