//! Daily capacity sweep.
//!
//! Runs [`CapacityLedger::reset_all`] once a day at midnight in the configured
//! UTC offset. The wait is recomputed from the clock before every run, so a
//! late or slow run never shifts later ones off midnight.

use crate::error::GarageError;
use crate::ledger::{CapacityLedger, SweepReport};
use crate::metrics;
use chrono::{DateTime, Days, FixedOffset, NaiveTime, Offset, Utc};
use garage_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Periodic task calling into the capacity ledger
pub struct DailySweep {
    ledger: Arc<CapacityLedger>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl DailySweep {
    /// Create a sweep anchored at midnight `utc_offset_minutes` east of UTC.
    ///
    /// Offsets outside ±24h fall back to UTC.
    #[must_use]
    pub fn new(ledger: Arc<CapacityLedger>, clock: Arc<dyn Clock>, utc_offset_minutes: i32) -> Self {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(utc_offset_minutes, "Invalid sweep offset, using UTC");
                Utc.fix()
            });
        Self {
            ledger,
            clock,
            offset,
        }
    }

    /// Time from `now` until the next local midnight
    #[must_use]
    pub fn until_next_run(&self, now: DateTime<Utc>) -> Duration {
        let local = now.with_timezone(&self.offset);
        local
            .date_naive()
            .checked_add_days(Days::new(1))
            .map(|day| day.and_time(NaiveTime::MIN))
            .and_then(|midnight| midnight.and_local_timezone(self.offset).single())
            .and_then(|next| (next.with_timezone(&Utc) - now).to_std().ok())
            .unwrap_or(DAY)
    }

    /// Reset every service now.
    ///
    /// # Errors
    ///
    /// [`GarageError::Storage`] if the catalog cannot be read or written.
    pub async fn run_once(&self) -> Result<SweepReport, GarageError> {
        let report = self.ledger.reset_all().await?;
        metrics::record_sweep_run(report);
        Ok(report)
    }

    /// Sweep at every local midnight until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(offset = %self.offset, "Daily sweep started");
        loop {
            let wait = self.until_next_run(self.clock.now());
            debug!(wait_secs = wait.as_secs(), "Next sweep scheduled");

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Daily sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Daily sweep stopped");
                    break;
                }
            }
        }
    }
}
