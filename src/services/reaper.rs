use tokio::time::sleep;
use tracing::{debug, info};

use crate::state::{ReapReport, SharedState};

/// Periodically enforce session TTLs, sweep heartbeats and retry failed persistence.
///
/// Runs until the runtime shuts down. Passes run at a fixed interval so expiry and liveness
/// never wait on the transition store; the outbox keeps its own backoff.
pub async fn run(state: SharedState) {
    let interval = state.config().reaper_interval();

    loop {
        sleep(interval).await;

        let report = state.reap(state.now()).await;
        log_report(&report);
    }
}

fn log_report(report: &ReapReport) {
    if report == &ReapReport::default() {
        debug!("reap pass found nothing to do");
        return;
    }
    info!(
        expired = report.expired,
        closed = report.closed,
        evicted = report.evicted,
        deactivated = report.deactivated,
        busy = report.busy,
        redelivered = report.redelivered,
        outbox_pending = report.outbox_pending,
        "reap pass finished"
    );
}
