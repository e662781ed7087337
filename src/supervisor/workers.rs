//! Ordered startup of the supervised workers
//!
//! The gateway must not accept clients before the engine pool has been told
//! to start, and a failure anywhere during startup must not leave half of the
//! workers running. [`Workers::launch`] owns that sequence:
//!
//! ```text
//! pool.start() ──▶ readiness.wait() ──▶ mixer.start() ──▶ bind(readiness)
//!      │                                     │                  │
//!      └──────────── error: stop everything started so far ◀────┘
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::Result;
use crate::supervisor::{MixSupervisor, PoolReadiness, WorkerPoolSupervisor};
use crate::template::ConfigTemplater;

/// Supervisors started so far, stopped in reverse start order
#[derive(Default)]
pub struct Workers {
    pool: Option<WorkerPoolSupervisor>,
    mixer: Option<MixSupervisor>,
}

impl Workers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> Option<&WorkerPoolSupervisor> {
        self.pool.as_ref()
    }

    pub fn mixer(&self) -> Option<&MixSupervisor> {
        self.mixer.as_ref()
    }

    /// Start the pool, wait for its readiness latch, start the mixer and
    /// finally call `bind`.
    ///
    /// `bind` receives the already-fired latch. If any step fails, every
    /// supervisor started so far is stopped before the error is returned.
    pub async fn launch<F, Fut, T>(
        &mut self,
        config: Arc<AppConfig>,
        templater: Arc<ConfigTemplater>,
        bind: F,
    ) -> Result<T>
    where
        F: FnOnce(PoolReadiness) -> Fut,
        Fut: Future<Output = std::io::Result<T>>,
    {
        let result = self.launch_in_order(config, templater, bind).await;
        if let Err(e) = &result {
            tracing::error!("Startup failed, stopping workers: {}", e);
            self.shutdown();
        }
        result
    }

    async fn launch_in_order<F, Fut, T>(
        &mut self,
        config: Arc<AppConfig>,
        templater: Arc<ConfigTemplater>,
        bind: F,
    ) -> Result<T>
    where
        F: FnOnce(PoolReadiness) -> Fut,
        Fut: Future<Output = std::io::Result<T>>,
    {
        let pool = WorkerPoolSupervisor::new(Arc::clone(&config), Arc::clone(&templater))?;
        let pool = self.pool.insert(pool);
        pool.start()?;

        let readiness = pool.readiness();
        tracing::info!("Waiting for engine pool ...");
        readiness.wait().await;

        let mixer = self.mixer.insert(MixSupervisor::new(config, templater)?);
        mixer.start()?;

        Ok(bind(readiness).await?)
    }

    /// Re-render every config and restart the workers. Failures are logged.
    pub fn reconfigure(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            if let Err(e) = pool.reconfigure() {
                tracing::error!("Engine pool reconfigure failed: {}", e);
            }
        }
        if let Some(mixer) = self.mixer.as_mut() {
            if let Err(e) = mixer.reconfigure() {
                tracing::error!("Mixer reconfigure failed: {}", e);
            }
        }
    }

    /// Stop the mixer, then the pool. Blocks until both threads are joined.
    pub fn shutdown(&mut self) {
        if let Some(mixer) = self.mixer.as_mut() {
            mixer.stop();
        }
        if let Some(pool) = self.pool.as_mut() {
            pool.stop();
        }
    }
}
