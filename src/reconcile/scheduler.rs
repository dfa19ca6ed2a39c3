use super::ReconcileJob;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

/// Invokes the reconciliation job once a day at a fixed UTC time.
///
/// Runs are sequential, so they never overlap. A failed run is logged and
/// not retried; the next attempt is the following day's.
pub struct DailyScheduler {
    job: Arc<ReconcileJob>,
    run_at: NaiveTime,
}

impl DailyScheduler {
    pub fn new(job: Arc<ReconcileJob>, run_at: NaiveTime) -> Self {
        Self { job, run_at }
    }

    /// Runs indefinitely until the task is cancelled.
    pub async fn run_loop(&self) {
        info!(run_at_utc = %self.run_at, "Starting daily reconciliation scheduler");

        loop {
            let now = Utc::now();
            let next = next_run_after(now, self.run_at);
            info!(next_run = %next, "Next reconciliation scheduled");

            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

            match self.job.run().await {
                Ok(report) => info!(
                    started_at = %report.started_at,
                    users = report.users.len(),
                    transfers = report.transfer_count(),
                    failed_users = report.failed_users(),
                    "Scheduled reconciliation completed"
                ),
                Err(e) => error!(error = %e, "Scheduled reconciliation failed"),
            }
        }
    }
}

/// First occurrence of `run_at` strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(run_at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
