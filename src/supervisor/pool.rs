//! Playback engine pool supervisor

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::AppConfig;
use crate::constants::ENGINE_TEMPLATE;
use crate::error::SupervisorError;
use crate::process::{provision_fifo, LogClassifier, ProcessExecutor};
use crate::supervisor::{PoolReadiness, ProcessStatus, ShutdownFlag};
use crate::template::ConfigTemplater;

/// Template context for engine instance `id`
pub fn engine_context(config: &AppConfig, id: u16) -> Value {
    let instance = config.instance(id);
    let source_type = config.gateway.source_type;

    json!({
        "instance": instance,
        "stream_id": id,
        "mpd_port": instance.mpd_port,
        "web_port": instance.control_port,
        "tcp_port": instance.stream_port,
        "source_type": source_type,
        "fifo": source_type.is_fifo(),
        "fifo_path": config.engine_fifo(id),
        "extensions": config.engine.enabled_extensions(),
    })
}

/// Render and write the config of instance `id`, returning its path
pub fn write_engine_config(
    config: &AppConfig,
    templater: &ConfigTemplater,
    id: u16,
) -> Result<PathBuf, SupervisorError> {
    tracing::info!("Generating engine config for instance {}", id);

    let rendered = templater.render(ENGINE_TEMPLATE, &engine_context(config, id))?;
    let path = config.engine_config_file(id);
    std::fs::write(&path, rendered).map_err(|source| SupervisorError::WriteConfig {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

/// Launch command of instance `id`
pub fn engine_command(config: &AppConfig, id: u16) -> Vec<String> {
    vec![
        config.engine.binary.clone(),
        "--config".to_string(),
        config.engine_config_file(id).display().to_string(),
    ]
}

/// Manages the `0..N` playback engine instances
pub struct WorkerPoolSupervisor {
    config: Arc<AppConfig>,
    templater: Arc<ConfigTemplater>,
    /// Executor `i` belongs to instance `i`
    pool: Arc<Mutex<Vec<ProcessExecutor>>>,
    shutdown: ShutdownFlag,
    readiness: PoolReadiness,
    thread: Option<JoinHandle<()>>,
}

impl WorkerPoolSupervisor {
    /// Create the supervisor.
    ///
    /// Fails if the config output directory cannot be created, since no
    /// instance could be configured without it.
    pub fn new(
        config: Arc<AppConfig>,
        templater: Arc<ConfigTemplater>,
    ) -> Result<Self, SupervisorError> {
        let dir = &config.engine.config_path;
        std::fs::create_dir_all(dir).map_err(|source| SupervisorError::WriteConfig {
            path: dir.display().to_string(),
            source,
        })?;

        Ok(Self {
            config,
            templater,
            pool: Arc::new(Mutex::new(Vec::new())),
            shutdown: ShutdownFlag::new(),
            readiness: PoolReadiness::new(),
            thread: None,
        })
    }

    /// Latch that fires once instance 0 has been told to start
    pub fn readiness(&self) -> PoolReadiness {
        self.readiness.clone()
    }

    pub fn instance_count(&self) -> u16 {
        self.config.engine.instances
    }

    /// Whether the supervisor thread is up
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Render every instance config, then launch the pool on the supervisor
    /// thread. Render and write failures are returned before anything runs.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.thread.is_some() {
            return Err(SupervisorError::AlreadyStarted);
        }

        let n = self.instance_count();
        let mut executors = Vec::with_capacity(n as usize);
        for id in 0..n {
            write_engine_config(&self.config, &self.templater, id)?;
            executors.push(ProcessExecutor::new(
                format!("engine_{id}"),
                engine_command(&self.config, id),
                LogClassifier::Engine,
            ));
        }
        *self.pool.lock() = executors;
        self.shutdown.reset();

        let config = Arc::clone(&self.config);
        let pool = Arc::clone(&self.pool);
        let shutdown = self.shutdown.clone();
        let readiness = self.readiness.clone();

        let handle = thread::Builder::new()
            .name("pool-supervisor".to_string())
            .spawn(move || run_pool(config, pool, shutdown, readiness))
            .map_err(SupervisorError::Thread)?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Stop every instance in id order and release the supervisor thread.
    ///
    /// A pool that was never started is left alone.
    pub fn stop(&mut self) {
        {
            let mut pool = self.pool.lock();
            for executor in pool.iter_mut() {
                executor.stop();
            }
            // Set while still holding the pool so no launch slips in after
            self.shutdown.request();
        }

        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            tracing::info!("Engine pool stopped");
        }
    }

    /// Restart every instance with a freshly rendered config
    pub fn reconfigure(&mut self) -> Result<(), SupervisorError> {
        let mut pool = self.pool.lock();
        for (id, executor) in (0u16..).zip(pool.iter_mut()) {
            executor.stop();
            write_engine_config(&self.config, &self.templater, id)?;
            executor.start();
        }
        Ok(())
    }

    /// Per-instance process states, in id order
    pub fn states(&self) -> Vec<ProcessStatus> {
        self.pool
            .lock()
            .iter()
            .map(|executor| ProcessStatus {
                label: executor.label(),
                state: executor.state(),
                pid: executor.pid(),
            })
            .collect()
    }
}

impl Drop for WorkerPoolSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Supervisor thread body
fn run_pool(
    config: Arc<AppConfig>,
    pool: Arc<Mutex<Vec<ProcessExecutor>>>,
    shutdown: ShutdownFlag,
    readiness: PoolReadiness,
) {
    let n = config.engine.instances;
    for id in 0..n {
        let mut pool = pool.lock();
        if shutdown.is_set() {
            break;
        }

        if config.gateway.source_type.is_fifo() {
            provision_fifo(&config.engine_fifo(id));
        }

        if let Some(executor) = pool.get_mut(id as usize) {
            executor.start();
        }
        if id == 0 {
            readiness.fire();
        }
    }

    // Nothing to launch still counts as ready
    readiness.fire();

    shutdown.idle_until_set();
    tracing::debug!("Pool supervisor thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;
    use std::time::{Duration, Instant};

    fn test_config(dir: &std::path::Path, instances: u16) -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        config.engine.binary = "/nonexistent/engine-binary".to_string();
        config.engine.instances = instances;
        config.engine.config_path = dir.join("engine");
        config.gateway.fifo_dir = dir.join("fifo");
        Arc::new(config)
    }

    fn wait_launched(supervisor: &WorkerPoolSupervisor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.states().iter().any(|s| s.state == ProcessState::Idle) {
            assert!(Instant::now() < deadline, "pool never launched");
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_engine_context_ports() {
        let mut config = AppConfig::default();
        config.engine.instances = 2;

        let context = engine_context(&config, 1);
        assert_eq!(context["web_port"], 6681);
        assert_eq!(context["mpd_port"], 6601);
        assert_eq!(context["tcp_port"], 4954);
        assert_eq!(context["fifo"], false);
    }

    #[test]
    fn test_engine_command() {
        let config = AppConfig::default();
        assert_eq!(
            engine_command(&config, 0),
            vec!["mopidy".to_string(), "--config".to_string(), "/tmp/engine_0.conf".to_string()]
        );
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let templater = Arc::new(ConfigTemplater::new(None).unwrap());
        let config = test_config(dir.path(), 3);
        let mut supervisor = WorkerPoolSupervisor::new(config, templater).unwrap();

        supervisor.stop();
        supervisor.stop();
        assert!(supervisor.states().is_empty());
    }

    #[test]
    fn test_launch_failures_do_not_stop_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let templater = Arc::new(ConfigTemplater::new(None).unwrap());
        let config = test_config(dir.path(), 3);
        let mut supervisor = WorkerPoolSupervisor::new(config, templater).unwrap();

        supervisor.start().unwrap();
        wait_launched(&supervisor);

        let states = supervisor.states();
        assert_eq!(states.len(), 3);
        assert!(states.iter().all(|s| s.state == ProcessState::Failed));
        assert!(supervisor.readiness().is_ready());

        supervisor.stop();
    }

    #[test]
    fn test_start_twice_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let templater = Arc::new(ConfigTemplater::new(None).unwrap());
        let config = test_config(dir.path(), 1);
        let mut supervisor = WorkerPoolSupervisor::new(config, templater).unwrap();

        assert!(!supervisor.is_running());
        supervisor.start().unwrap();
        assert!(supervisor.is_running());
        assert!(matches!(supervisor.start(), Err(SupervisorError::AlreadyStarted)));
        supervisor.stop();
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_empty_pool_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let templater = Arc::new(ConfigTemplater::new(None).unwrap());
        let config = test_config(dir.path(), 0);
        let mut supervisor = WorkerPoolSupervisor::new(config, templater).unwrap();

        supervisor.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !supervisor.readiness().is_ready() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(std::fs::read_dir(dir.path().join("engine")).unwrap().count(), 0);
        supervisor.stop();
    }

    #[test]
    fn test_render_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join("engine.hbs"), "{{> missing_partial}}").unwrap();

        let templater = Arc::new(ConfigTemplater::new(Some(&templates)).unwrap());
        let config = test_config(dir.path(), 2);
        let mut supervisor = WorkerPoolSupervisor::new(config, templater).unwrap();

        assert!(matches!(supervisor.start(), Err(SupervisorError::Render(_))));
        assert!(!supervisor.readiness().is_ready());
    }

    #[test]
    fn test_reconfigure_rewrites_configs() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 2);
        let templater = Arc::new(ConfigTemplater::new(None).unwrap());
        let mut supervisor = WorkerPoolSupervisor::new(Arc::clone(&config), templater).unwrap();

        supervisor.start().unwrap();
        wait_launched(&supervisor);

        std::fs::remove_file(config.engine_config_file(1)).unwrap();
        supervisor.reconfigure().unwrap();
        assert!(config.engine_config_file(1).exists());

        supervisor.stop();
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_per_instance() {
        use std::os::unix::fs::FileTypeExt;

        let dir = tempfile::tempdir().unwrap();
        let mut config = (*test_config(dir.path(), 2)).clone();
        config.gateway.source_type = crate::config::SourceType::Fifo;
        let config = Arc::new(config);

        let templater = Arc::new(ConfigTemplater::new(None).unwrap());
        let mut supervisor = WorkerPoolSupervisor::new(Arc::clone(&config), templater).unwrap();
        supervisor.start().unwrap();
        wait_launched(&supervisor);

        for id in 0..2 {
            let meta = std::fs::metadata(config.engine_fifo(id)).unwrap();
            assert!(meta.file_type().is_fifo());
        }
        let rendered = std::fs::read_to_string(config.engine_config_file(0)).unwrap();
        assert!(rendered.contains("filesink location="));

        supervisor.stop();
    }
}
