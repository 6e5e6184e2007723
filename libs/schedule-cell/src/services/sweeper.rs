use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

use crate::error::ReservationError;
use crate::services::engine::SlotReservationEngine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub reclaimed: usize,
    /// Slots that moved on (booked, re-held) between the scan and the reclaim.
    pub skipped: usize,
    pub failed: usize,
}

const DEFAULT_PERIOD: Duration = Duration::from_secs(300);

/// Periodically returns lapsed holds to the pool.
pub struct ExpirySweeper {
    engine: Arc<SlotReservationEngine>,
    period: Duration,
}

impl ExpirySweeper {
    /// A zero period falls back to the five-minute default.
    pub fn new(engine: Arc<SlotReservationEngine>, period: Duration) -> Self {
        let period = if period.is_zero() {
            warn!("Hold sweep period is zero, using {:?}", DEFAULT_PERIOD);
            DEFAULT_PERIOD
        } else {
            period
        };
        Self { engine, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn from_config(engine: Arc<SlotReservationEngine>, config: &AppConfig) -> Self {
        Self::new(engine, Duration::from_secs(config.hold_sweep_interval_seconds))
    }

    /// One pass over every lapsed hold. Never fails: a slot that errors is
    /// counted and left for the next pass.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let expired = match self.engine.expired_holds().await {
            Ok(expired) => expired,
            Err(e) => {
                warn!("Hold sweep could not list expired holds: {}", e);
                report.failed += 1;
                return report;
            }
        };
        report.scanned = expired.len();

        for (key, holder) in expired {
            match self.engine.reclaim_expired_hold(&key, &holder).await {
                Ok(_) => report.reclaimed += 1,
                Err(ReservationError::Conflict { .. }) | Err(ReservationError::NotFound(_)) => {
                    debug!("Slot {} changed before reclaim, skipping", key);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to reclaim hold on {}: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                "Hold sweep: scanned={} reclaimed={} skipped={} failed={}",
                report.scanned, report.reclaimed, report.skipped, report.failed
            );
        }
        report
    }

    /// Sweeps every period until `shutdown` flips to true or its sender drops.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Hold expiry sweeper started, period {:?}", self.period);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Hold expiry sweeper stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
