use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::lifecycle::{ExpiryOutcome, OrderLifecycle};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReservationSweepReport {
    pub scanned: usize,
    pub released: usize,
    pub orders_cancelled: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnacceptedSweepReport {
    pub scanned: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Frees stock held past its expiry and cancels orders that were never paid.
pub struct ReservationSweeper {
    lifecycle: Arc<OrderLifecycle>,
    interval: Duration,
    batch_size: i64,
}

impl ReservationSweeper {
    pub fn new(lifecycle: Arc<OrderLifecycle>) -> Self {
        let config = lifecycle.config();
        Self {
            interval: config.reservation_sweep_interval,
            batch_size: config.sweep_batch_size,
            lifecycle,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match self.sweep(Utc::now()).await {
                Ok(report) if report.released > 0 || report.failed > 0 => {
                    info!(?report, "Reservation sweep finished");
                }
                Ok(_) => {}
                Err(e) => error!("Error sweeping reservations: {}", e),
            }
        }
    }

    /// One pass over reservations expired at `now`. Each reservation is
    /// settled in its own transaction; a failure is retried next tick.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<ReservationSweepReport, EngineError> {
        let expired = self.lifecycle.expired_reservations(now, self.batch_size).await?;
        let mut report = ReservationSweepReport {
            scanned: expired.len(),
            ..Default::default()
        };

        for reservation in &expired {
            match self.lifecycle.expire_reservation(reservation, now).await {
                Ok(ExpiryOutcome::Skipped) => report.skipped += 1,
                Ok(ExpiryOutcome::Released) => report.released += 1,
                Ok(ExpiryOutcome::OrderCancelled) => {
                    report.released += 1;
                    report.orders_cancelled += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(reservation_id = %reservation.id, "Failed to release expired reservation: {}", e);
                }
            }
        }

        Ok(report)
    }
}

/// Cancels orders left in PLACED past the acceptance timeout.
pub struct UnacceptedOrderSweeper {
    lifecycle: Arc<OrderLifecycle>,
    interval: Duration,
    batch_size: i64,
}

impl UnacceptedOrderSweeper {
    pub fn new(lifecycle: Arc<OrderLifecycle>) -> Self {
        let config = lifecycle.config();
        Self {
            interval: config.unaccepted_sweep_interval,
            batch_size: config.sweep_batch_size,
            lifecycle,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match self.sweep(Utc::now()).await {
                Ok(report) if report.cancelled > 0 || report.failed > 0 => {
                    info!(?report, "Unaccepted order sweep finished");
                }
                Ok(_) => {}
                Err(e) => error!("Error sweeping unaccepted orders: {}", e),
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<UnacceptedSweepReport, EngineError> {
        let cutoff = now - self.lifecycle.config().unaccepted_timeout();
        let stale = self.lifecycle.unaccepted_orders(cutoff, self.batch_size).await?;
        let mut report = UnacceptedSweepReport {
            scanned: stale.len(),
            ..Default::default()
        };

        for order_id in stale {
            match self.lifecycle.cancel_unaccepted(order_id, cutoff, now).await {
                Ok(true) => report.cancelled += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(order_id = %order_id, "Failed to auto-cancel unaccepted order: {}", e);
                }
            }
        }

        Ok(report)
    }
}

/// Runs a background task forever, restarting it if it panics.
pub fn supervise<F, Fut>(name: &'static str, mut task: F) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match tokio::spawn(task()).await {
                Ok(()) => warn!(task = name, "Background task exited; restarting"),
                Err(e) => error!(task = name, "Background task panicked: {}; restarting", e),
            }
            time::sleep(Duration::from_secs(1)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_supervise_restarts_after_panic() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let handle = supervise("flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run fails");
                }
                std::future::pending::<()>().await;
            }
        });

        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        handle.abort();
    }
}
