//! Reservation expiry sweeper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{CartItemId, Clock};
use futures_util::{StreamExt, stream};
use store::{Store, UnitOfWork};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{FulfillmentError, Result};
use crate::ledger;

/// Sweeper tuning.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Most expired holds released per tick.
    pub batch_size: usize,
    /// Items released in parallel within a tick.
    pub concurrency: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            batch_size: 500,
            concurrency: 8,
        }
    }
}

/// Outcome of one sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired holds found.
    pub scanned: usize,
    /// Holds released and credited back to stock.
    pub released: usize,
    /// Items that were no longer eligible once locked.
    pub skipped: usize,
    /// Holds cleared without a credit because their product no longer exists.
    pub orphaned: usize,
    /// Items whose release failed; they stay eligible for the next tick.
    pub failed: usize,
}

enum Release {
    Credited,
    Orphaned,
    Skipped,
}

/// Releases stock held by cart items whose deadline has passed.
///
/// Expired items stay in the cart, unreserved. The sweeper never deletes
/// cart items.
#[derive(Clone)]
pub struct ReservationSweeper<S: Store> {
    store: S,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl<S: Store> ReservationSweeper<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, config: SweeperConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Runs one sweep tick.
    ///
    /// Each item is released in its own unit of work; a failure on one
    /// item is logged and does not stop the others.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let now = self.clock.now();
        let expired = self
            .store
            .find_expired_holds(now, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        let outcomes: Vec<_> = stream::iter(expired)
            .map(|id| async move { (id, self.release_one(id).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(Release::Credited) => report.released += 1,
                Ok(Release::Orphaned) => report.orphaned += 1,
                Ok(Release::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    metrics::counter!("sweep_failures_total").increment(1);
                    tracing::warn!(cart_item_id = %id, error = %err, "failed to release hold");
                }
            }
        }

        metrics::counter!("reservations_released_total").increment(report.released as u64);
        metrics::histogram!("sweep_duration_seconds").record(started.elapsed().as_secs_f64());
        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                released = report.released,
                skipped = report.skipped,
                orphaned = report.orphaned,
                failed = report.failed,
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Releases one item. Items removed, bought, or re-held between the
    /// scan and the lock are skipped.
    async fn release_one(&self, id: CartItemId) -> Result<Release> {
        let mut tx = self.store.begin().await?;

        let Some(mut item) = tx.lock_cart_item(id).await? else {
            return Ok(Release::Skipped);
        };
        if !item.is_expired(self.clock.now()) {
            return Ok(Release::Skipped);
        }

        let released = item.release();
        let outcome = match ledger::try_adjust(&mut tx, item.product_id, i64::from(released)).await
        {
            Ok(_) => Release::Credited,
            // Nothing to credit; clear the hold so it leaves the expired set.
            Err(FulfillmentError::ProductNotFound(product_id)) => {
                tracing::warn!(cart_item_id = %id, %product_id, "hold on missing product cleared");
                Release::Orphaned
            }
            Err(err) => return Err(err),
        };
        tx.save_cart_item(&item).await?;
        tx.commit().await?;

        tracing::debug!(cart_item_id = %id, released, "hold released");
        Ok(outcome)
    }

    /// Runs ticks on the configured interval until `shutdown` is notified.
    pub async fn run(self, shutdown: Arc<Notify>) {
        tracing::info!(interval = ?self.config.interval, "reservation sweeper started");

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("reservation sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::error!(error = %err, "sweep tick failed");
                    }
                }
            }
        }

        tracing::info!("reservation sweeper stopped");
    }

    /// Spawns the ticking loop as a background task.
    pub fn spawn(self) -> SweeperHandle {
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(self.run(Arc::clone(&shutdown)));
        SweeperHandle { shutdown, task }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the loop after any in-flight tick and waits for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "reservation sweeper task failed");
        }
    }
}
