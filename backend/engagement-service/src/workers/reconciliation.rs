//! Counter Reconciliation Background Job
//!
//! Periodically recomputes every post's like and comment counters from the
//! edge and comment rows. Toggles keep counters exact on their own; this job
//! repairs drift left by out-of-band writes or manual data fixes.

use crate::config::ReconciliationConfig;
use crate::services::CounterMaintainer;
use std::time::Duration;
use tokio::time::sleep;

/// Consecutive failed passes before the job logs at error level
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Start the counter reconciliation background job
pub async fn start_counter_reconciliation(counters: CounterMaintainer, config: ReconciliationConfig) {
    if !config.enabled {
        tracing::info!("Counter reconciliation disabled by configuration");
        return;
    }

    let interval = Duration::from_secs(config.interval_secs.max(1));
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Starting counter reconciliation background job"
    );

    // Initial delay to let services start up
    sleep(Duration::from_secs(config.initial_delay_secs)).await;

    let mut consecutive_failures = 0;

    loop {
        match counters.reconcile_all().await {
            Ok(report) => {
                if consecutive_failures > 0 {
                    tracing::info!(
                        previous_failures = consecutive_failures,
                        "Counter reconciliation recovered"
                    );
                }
                consecutive_failures = 0;
                if report.repaired > 0 {
                    tracing::warn!(
                        repaired = report.repaired,
                        checked = report.checked,
                        "Counter reconciliation repaired drifted posts"
                    );
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(
                        consecutive_failures = consecutive_failures,
                        error = %e,
                        "Counter reconciliation: CRITICAL - multiple consecutive failures"
                    );
                } else {
                    tracing::warn!(
                        consecutive_failures = consecutive_failures,
                        error = %e,
                        "Counter reconciliation: FAILED"
                    );
                }
            }
        }

        sleep(interval).await;
    }
}
