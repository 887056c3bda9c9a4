//! Fallback polling scheduler.
//!
//! While active, guarantees fresh data keeps flowing via the fallback
//! fetcher: one immediate fetch, then a repeating interval. A tick whose
//! predecessor has not resolved is skipped, so at most one fetch is ever
//! outstanding per scheduler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::error::ChannelResult;
use crate::fetch::FallbackFetcher;

type FetchFuture<T> = Pin<Box<dyn Future<Output = ChannelResult<T>> + Send>>;

/// Completed fetch, tagged with the generation the polling run belongs to.
#[derive(Debug)]
pub(crate) struct PollOutcome<T> {
    /// Generation current when this polling run started.
    pub generation: u64,
    /// Fetch result.
    pub result: ChannelResult<T>,
}

struct ActiveRun<T> {
    ticker: Interval,
    generation: u64,
    in_flight: Option<FetchFuture<T>>,
}

/// Drives the fallback fetcher while the push transport is down.
pub(crate) struct PollingScheduler<T> {
    fetcher: Arc<dyn FallbackFetcher<T>>,
    interval: Duration,
    run: Option<ActiveRun<T>>,
}

impl<T: Send + 'static> PollingScheduler<T> {
    pub(crate) fn new(fetcher: Arc<dyn FallbackFetcher<T>>, interval: Duration) -> Self {
        Self {
            fetcher,
            interval,
            run: None,
        }
    }

    /// Start polling under `generation`. No-op if already running: exactly
    /// one active polling loop per manager.
    pub(crate) fn start(&mut self, generation: u64) {
        if self.run.is_some() {
            return;
        }
        debug!(generation, interval = ?self.interval, "Starting fallback polling");

        // First fetch fires immediately; the ticker covers the rest.
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.run = Some(ActiveRun {
            ticker,
            generation,
            in_flight: Some(Self::spawn_fetch(&self.fetcher)),
        });
    }

    /// Cancel the repeating timer and any in-flight fetch. Safe to call
    /// when not running.
    pub(crate) fn stop(&mut self) {
        if self.run.take().is_some() {
            debug!("Stopped fallback polling");
        }
    }

    pub(crate) const fn is_active(&self) -> bool {
        self.run.is_some()
    }

    /// Wait for the next completed fetch. Pends forever while inactive.
    ///
    /// Cancel-safe: the in-flight fetch and ticker live on the scheduler,
    /// not on the returned future.
    pub(crate) async fn next_outcome(&mut self) -> PollOutcome<T> {
        loop {
            let Some(run) = self.run.as_mut() else {
                return std::future::pending().await;
            };

            if let Some(fetch) = run.in_flight.as_mut() {
                tokio::select! {
                    result = fetch.as_mut() => {
                        let generation = run.generation;
                        run.in_flight = None;
                        return PollOutcome { generation, result };
                    }
                    _ = run.ticker.tick() => {
                        // Previous fetch still outstanding: skip this tick.
                        debug!("Skipping poll tick, previous fetch in flight");
                    }
                }
            } else {
                run.ticker.tick().await;
                run.in_flight = Some(Self::spawn_fetch(&self.fetcher));
            }
        }
    }

    fn spawn_fetch(fetcher: &Arc<dyn FallbackFetcher<T>>) -> FetchFuture<T> {
        let fetcher = Arc::clone(fetcher);
        Box::pin(async move { fetcher.fetch().await })
    }
}
