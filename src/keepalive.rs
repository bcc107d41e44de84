//! Keepalive scheduler.
//!
//! Sends a probe request on a fixed cadence so the device does not time
//! the link out. Probes are ordinary commands: they go through the same
//! queue as caller commands and wait their turn, with no priority.
//!
//! ```text
//! ┌────────────┐   sleep(interval)   ┌──────────────┐   result   ┌──────────┐
//! │ scheduled  │ ──────────────────► │ probe queued │ ─────────► │ observer │ ─┐
//! └────────────┘                     └──────────────┘            └──────────┘  │
//!       ▲                                                                      │
//!       └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stopping cancels a pending wait at once. A probe already submitted is
//! left to complete or fail normally; nothing is scheduled after it.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, RtuError};
use crate::link::SessionRequest;
use crate::protocol::{DeviceAddress, Request};
use crate::queue::{Command, Origin};

/// Callback receiving the outcome of each keepalive probe.
pub type KeepaliveObserver = Box<dyn FnMut(Result<u32>) + Send + 'static>;

/// A running keepalive task.
pub(crate) struct Keepalive {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Keepalive {
    /// Spawn the scheduler.
    ///
    /// `requests` is weak so a running keepalive never keeps the session
    /// alive on its own.
    pub(crate) fn spawn(
        interval: Duration,
        probe: Request,
        address: DeviceAddress,
        requests: mpsc::WeakSender<SessionRequest>,
        observer: Option<KeepaliveObserver>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        tracing::debug!(
            "Starting keepalive every {:?} on register {}",
            interval,
            probe.register()
        );

        let task = tokio::spawn(keepalive_loop(
            interval, probe, address, requests, observer, stop_rx,
        ));

        Self { stop_tx, task }
    }

    /// Stop scheduling probes.
    pub(crate) fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Check if the scheduler is still running and not asked to stop.
    pub(crate) fn is_running(&self) -> bool {
        !*self.stop_tx.borrow() && !self.task.is_finished()
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn keepalive_loop(
    interval: Duration,
    probe: Request,
    address: DeviceAddress,
    requests: mpsc::WeakSender<SessionRequest>,
    mut observer: Option<KeepaliveObserver>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if *stop_rx.borrow() {
            break;
        }

        let Some(tx) = requests.upgrade() else {
            break;
        };

        let (command, rx) = Command::new(probe, address, Origin::Keepalive);
        if tx.send(SessionRequest::Command(command)).await.is_err() {
            break;
        }
        drop(tx);

        let result = rx.await.unwrap_or(Err(RtuError::LinkClosed));
        match &result {
            Ok(value) => tracing::trace!("Keepalive response: {}", value),
            Err(e) => tracing::warn!("Keepalive error: {}", e),
        }

        if let Some(observer) = observer.as_mut() {
            observer(result);
        }
    }

    tracing::debug!("Keepalive stopped");
}
