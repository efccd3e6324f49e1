//! Lease renewal for items held longer than their timeout.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{Span, debug, warn};

use crate::error::{Error, Result};
use crate::lease::encode_timestamp;
use crate::store::Store;
use crate::telemetry::metrics;

/// Longest uninterrupted sleep between stop checks.
pub const HEARTBEAT_TICK: Duration = Duration::from_millis(200);

/// Background thread rewriting one item's lease every `timeout / 2`.
///
/// [`Heartbeat::stop`] (or drop) signals the thread and joins it, so once it
/// returns no further renewal can land in the store.
#[derive(Debug)]
pub struct Heartbeat {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Spawn the renewal thread. Its events are recorded under `span`.
    pub fn start<S>(store: Arc<S>, key: String, timeout: Duration, span: Span) -> Result<Self>
    where
        S: Store + ?Sized + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel();
        let interval = timeout / 2;

        let handle = thread::Builder::new()
            .name("worklock-heartbeat".to_string())
            .spawn(move || span.in_scope(|| renew(&*store, &key, interval, &stop_rx)))
            .map_err(|e| Error::Other(format!("failed to spawn heartbeat thread: {e}")))?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for its current cycle to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            // A send error only means the thread is already gone.
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("heartbeat thread panicked");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn renew<S: Store + ?Sized>(store: &S, key: &str, interval: Duration, stop: &Receiver<()>) {
    if interval.is_zero() {
        return;
    }
    while !wait_for_stop(interval, stop) {
        match store.set(key, &encode_timestamp(Utc::now())) {
            Ok(()) => {
                debug!(key, "lease renewed");
                metrics::lease_heartbeats().add(1, &[KeyValue::new("result", "ok")]);
            }
            // Best effort: the owner keeps working, the lease may lapse.
            Err(e) => {
                warn!(key, error = %e, "lease renewal failed");
                metrics::lease_heartbeats().add(1, &[KeyValue::new("result", "error")]);
            }
        }
    }
    debug!(key, "heartbeat stopped");
}

/// Sleep for `interval` in ticks of at most [`HEARTBEAT_TICK`].
/// Returns `true` as soon as a stop is requested.
///
/// An interval past the clock's range never elapses; only a stop ends it.
fn wait_for_stop(interval: Duration, stop: &Receiver<()>) -> bool {
    let Some(deadline) = Instant::now().checked_add(interval) else {
        // Ok or Disconnected alike mean stop.
        let _ = stop.recv();
        return true;
    };
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match stop.recv_timeout(remaining.min(HEARTBEAT_TICK)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}
