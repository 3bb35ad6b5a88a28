//! Background polling task
//!
//! One task per connection, re-reading the configured register range and
//! appending each cycle (values or fault) to the bounded history. Shutdown
//! is a `watch` channel: the inter-cycle wait selects between the timer and
//! the stop signal, whichever arrives first.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::connection::ManagedConnection;
use crate::types::{PollEntry, PollSpec, ReadRequest};

/// Bound on how long `stop` waits for the loop to terminate before
/// detaching it.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle on one running poller: stop signal plus the task itself
pub(crate) struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub(crate) fn spawn(conn: Arc<ManagedConnection>, spec: PollSpec) -> Self {
        // Initial value false means running
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            poll_loop(conn, spec, shutdown_rx).await;
        });

        Self { shutdown_tx, task }
    }

    /// Signal shutdown and join with a bounded wait.
    ///
    /// Past the bound the task is detached with a warning; it exits on its
    /// own the next time it observes the signal.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown_tx.send(true);

        match timeout(STOP_TIMEOUT, self.task).await {
            Ok(Ok(())) => debug!("Poller stopped"),
            Ok(Err(e)) => warn!("Poller task err: {}", e),
            Err(_) => warn!("Poller stop timeout, detaching"),
        }
    }
}

async fn poll_loop(
    conn: Arc<ManagedConnection>,
    spec: PollSpec,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(
        "Poller started: {} {} {}x{} every {}ms",
        conn.endpoint(),
        spec.space,
        spec.address,
        spec.count,
        spec.interval_ms
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let started = Instant::now();
        let timestamp = Utc::now();

        let req = ReadRequest::new(spec.space, spec.address, spec.count)
            .allow_reconnect(true)
            .try_alternatives(spec.try_alternatives);

        // A bad cycle becomes an error entry, never a dead loop
        let entry = match conn.read_with(req).await {
            Ok(outcome) => PollEntry {
                timestamp,
                space: spec.space,
                address: spec.address,
                count: spec.count,
                values: Some(outcome.values),
                error: None,
                adjusted_from: outcome.adjusted_from,
                adjusted_to: outcome.adjusted_to,
            },
            Err(fault) => {
                debug!("Poll cycle fault: {}", fault);
                PollEntry {
                    timestamp,
                    space: spec.space,
                    address: spec.address,
                    count: spec.count,
                    values: None,
                    error: Some(fault.to_string()),
                    adjusted_from: None,
                    adjusted_to: None,
                }
            },
        };

        conn.record_poll_entry(entry, spec.max_history).await;

        // Wait out the rest of the interval, or leave early on shutdown
        let wait = spec.interval().saturating_sub(started.elapsed());
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            () = sleep(wait) => {}
        }
    }

    debug!("Poller exiting: {}", conn.endpoint());
}
