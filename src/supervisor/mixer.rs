//! Stream mixer supervisor
//!
//! Single-instance counterpart of the pool supervisor. The mixer config
//! lists one source per pool instance plus any additional static streams,
//! so it is rendered from the pool's port layout.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::AppConfig;
use crate::constants::MIXER_TEMPLATE;
use crate::error::SupervisorError;
use crate::process::{provision_fifo, LogClassifier, ProcessExecutor};
use crate::supervisor::{ProcessStatus, ShutdownFlag};
use crate::template::ConfigTemplater;

/// Template context for the mixer config
pub fn mixer_context(config: &AppConfig) -> Value {
    let source_type = config.gateway.source_type;

    let instances: Vec<Value> = config
        .instances()
        .into_iter()
        .map(|instance| {
            json!({
                "id": instance.id,
                "control_port": instance.control_port,
                "mpd_port": instance.mpd_port,
                "stream_port": instance.stream_port,
                "fifo_path": config.engine_fifo(instance.id),
            })
        })
        .collect();

    let additional_streams: Vec<Value> = config
        .mixer
        .additional_streams
        .iter()
        .enumerate()
        .filter_map(|(index, stream)| {
            if !stream.source_type.is_fifo() && stream.uri.is_none() {
                tracing::warn!("Additional stream {} has no uri, skipping", stream.name);
                return None;
            }
            Some(json!({
                "name": stream.name,
                "source_type": stream.source_type,
                "fifo": stream.source_type.is_fifo(),
                "fifo_path": config.additional_stream_fifo(index),
                "uri": stream.uri,
            }))
        })
        .collect();

    json!({
        "codec": config.mixer.codec,
        "control_port": config.mixer.control_port,
        "stream_port": config.mixer.stream_port,
        "source_type": source_type,
        "fifo": source_type.is_fifo(),
        "instances": instances,
        "additional_streams": additional_streams,
    })
}

/// Render and write the mixer config, returning its path
pub fn write_mixer_config(
    config: &AppConfig,
    templater: &ConfigTemplater,
) -> Result<PathBuf, SupervisorError> {
    tracing::info!("Generating mixer config");

    let rendered = templater.render(MIXER_TEMPLATE, &mixer_context(config))?;
    let path = config.mixer_config_file();
    std::fs::write(&path, rendered).map_err(|source| SupervisorError::WriteConfig {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

/// Launch command of the mixer
pub fn mixer_command(config: &AppConfig) -> Vec<String> {
    vec![
        config.mixer.binary.clone(),
        "-c".to_string(),
        config.mixer_config_file().display().to_string(),
    ]
}

/// Manages the single stream mixer process
pub struct MixSupervisor {
    config: Arc<AppConfig>,
    templater: Arc<ConfigTemplater>,
    executor: Arc<Mutex<Option<ProcessExecutor>>>,
    shutdown: ShutdownFlag,
    thread: Option<JoinHandle<()>>,
}

impl MixSupervisor {
    pub fn new(
        config: Arc<AppConfig>,
        templater: Arc<ConfigTemplater>,
    ) -> Result<Self, SupervisorError> {
        let dir = &config.mixer.config_path;
        std::fs::create_dir_all(dir).map_err(|source| SupervisorError::WriteConfig {
            path: dir.display().to_string(),
            source,
        })?;

        Ok(Self {
            config,
            templater,
            executor: Arc::new(Mutex::new(None)),
            shutdown: ShutdownFlag::new(),
            thread: None,
        })
    }

    /// Render the config, then provision pipes and launch the mixer on the
    /// supervisor thread
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.thread.is_some() {
            return Err(SupervisorError::AlreadyStarted);
        }

        write_mixer_config(&self.config, &self.templater)?;
        *self.executor.lock() = Some(ProcessExecutor::new(
            "mixer",
            mixer_command(&self.config),
            LogClassifier::Mixer,
        ));
        self.shutdown.reset();

        let config = Arc::clone(&self.config);
        let executor = Arc::clone(&self.executor);
        let shutdown = self.shutdown.clone();

        let handle = thread::Builder::new()
            .name("mixer-supervisor".to_string())
            .spawn(move || run_mixer(config, executor, shutdown))
            .map_err(SupervisorError::Thread)?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Stop the mixer, release the supervisor thread and remove the config
    pub fn stop(&mut self) {
        {
            let mut executor = self.executor.lock();
            if let Some(executor) = executor.as_mut() {
                executor.stop();
            }
            self.shutdown.request();
        }

        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            tracing::info!("Mixer stopped");
        }

        self.delete_config();
    }

    /// Restart the mixer with a freshly rendered config
    pub fn reconfigure(&mut self) -> Result<(), SupervisorError> {
        let mut executor = self.executor.lock();
        if let Some(executor) = executor.as_mut() {
            executor.stop();
            write_mixer_config(&self.config, &self.templater)?;
            executor.start();
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub fn state(&self) -> Option<ProcessStatus> {
        self.executor.lock().as_ref().map(|executor| ProcessStatus {
            label: executor.label(),
            state: executor.state(),
            pid: executor.pid(),
        })
    }

    fn delete_config(&self) {
        let path = self.config.mixer_config_file();
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

impl Drop for MixSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_mixer(
    config: Arc<AppConfig>,
    executor: Arc<Mutex<Option<ProcessExecutor>>>,
    shutdown: ShutdownFlag,
) {
    for (index, stream) in config.mixer.additional_streams.iter().enumerate() {
        if stream.source_type.is_fifo() {
            provision_fifo(&config.additional_stream_fifo(index));
        }
    }

    {
        let mut executor = executor.lock();
        if !shutdown.is_set() {
            if let Some(executor) = executor.as_mut() {
                executor.start();
            }
        }
    }

    shutdown.idle_until_set();
    tracing::debug!("Mixer supervisor thread exiting");
}
