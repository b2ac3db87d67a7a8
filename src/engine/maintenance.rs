//! Background maintenance worker
//!
//! Wakes every `maintenance.interval_ms` to meet the batched fsync deadline,
//! run eviction, compact when garbage warrants it and take automatic
//! checkpoints. Holds only a weak reference to the engine, so dropping the
//! last `Database` handle is never delayed by the worker.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::errors::{DbError, DbResult};

use super::Inner;

pub(crate) struct MaintenanceWorker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceWorker {
    pub(crate) fn spawn(inner: Weak<Inner>, interval: Duration) -> DbResult<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("tierdb-maintenance".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        inner.run_maintenance();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| DbError::io("failed to spawn maintenance thread", e))?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the worker and wait for it to exit
    pub(crate) fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("maintenance thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
