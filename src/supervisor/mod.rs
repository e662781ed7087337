//! Worker supervision
//!
//! Each supervisor runs on its own thread. Supervisors and the gateway only
//! talk through a [`ShutdownFlag`] and the one-shot [`PoolReadiness`] latch.

pub mod mixer;
pub mod pool;
pub mod workers;

pub use mixer::MixSupervisor;
pub use pool::WorkerPoolSupervisor;
pub use workers::Workers;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::watch;

use crate::constants::SUPERVISOR_POLL_INTERVAL;
use crate::process::ProcessState;

/// Cooperative stop request, polled by idle supervisor threads
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Block the calling thread until [`request`](Self::request) is called
    pub fn idle_until_set(&self) {
        while !self.is_set() {
            thread::sleep(SUPERVISOR_POLL_INTERVAL);
        }
    }
}

/// Single-fire latch set once the pool has been told to start
#[derive(Clone)]
pub struct PoolReadiness {
    tx: Arc<watch::Sender<bool>>,
}

impl PoolReadiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the latch. Firing again has no effect.
    pub fn fire(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!("Pool readiness signalled");
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is set
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for PoolReadiness {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one supervised process
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub label: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
}
