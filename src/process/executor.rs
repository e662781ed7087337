//! Child process executor
//!
//! Spawns one worker process and consumes its output on a dedicated
//! reader thread. Launch failures are logged and recorded, never returned,
//! so a supervisor can carry on with its other instances.

use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::constants::{REAP_POLL_INTERVAL, STOP_GRACE_PERIOD};
use crate::process::classify::LogClassifier;
use crate::process::fifo::terminate;

/// Lifecycle of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Never started
    Idle,
    Running,
    /// Exited on its own or stopped
    Stopped,
    /// Could not be spawned
    Failed,
}

/// What we know about one child process.
///
/// `handle` is `Some` exactly while `state` is `Running`.
#[derive(Debug)]
pub struct ProcessRecord {
    pub label: String,
    pub command: Vec<String>,
    pub state: ProcessState,
    handle: Option<Child>,
    /// Bumped on every launch so a stale reader never reaps a newer child
    generation: u64,
}

impl ProcessRecord {
    fn new(label: String, command: Vec<String>) -> Self {
        Self {
            label,
            command,
            state: ProcessState::Idle,
            handle: None,
            generation: 0,
        }
    }

    /// OS process id while running
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(Child::id)
    }
}

/// Owns one child process.
///
/// The reader thread is detached; it ends by itself once the child's output
/// closes and the exit status has been collected.
pub struct ProcessExecutor {
    record: Arc<Mutex<ProcessRecord>>,
    classifier: LogClassifier,
}

impl ProcessExecutor {
    pub fn new(label: impl Into<String>, command: Vec<String>, classifier: LogClassifier) -> Self {
        Self {
            record: Arc::new(Mutex::new(ProcessRecord::new(label.into(), command))),
            classifier,
        }
    }

    pub fn label(&self) -> String {
        self.record.lock().label.clone()
    }

    pub fn command(&self) -> Vec<String> {
        self.record.lock().command.clone()
    }

    pub fn state(&self) -> ProcessState {
        self.record.lock().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.record.lock().pid()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Spawn the process.
    ///
    /// No-op while already running. Spawn errors leave the record `Failed`.
    pub fn start(&mut self) {
        if self.is_running() {
            tracing::warn!("Process {} already running", self.label());
            return;
        }

        let mut record = self.record.lock();
        let label = record.label.clone();
        tracing::debug!("Command: {:?}", record.command);

        let Some((program, args)) = record.command.split_first() else {
            tracing::error!("Process {} not started, empty command", label);
            record.state = ProcessState::Failed;
            return;
        };

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("{}", e);
                tracing::error!(
                    "Process {} not started, executable {:?} not found",
                    label,
                    record.command
                );
                record.state = ProcessState::Failed;
                return;
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        record.handle = Some(child);
        record.state = ProcessState::Running;
        record.generation += 1;
        let generation = record.generation;
        drop(record);

        let shared = Arc::clone(&self.record);
        let classifier = self.classifier;
        let thread_label = label.clone();
        let spawned = thread::Builder::new()
            .name(format!("reader-{label}"))
            .spawn(move || {
                read_output(shared, generation, thread_label, classifier, stdout, stderr)
            });

        match spawned {
            Ok(_) => tracing::info!("Process {} started", label),
            Err(e) => {
                tracing::error!("Failed to spawn reader for {}: {}", label, e);
                let mut record = self.record.lock();
                if let Some(mut child) = record.handle.take() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                record.state = ProcessState::Failed;
            }
        }
    }

    /// Ask the process to terminate and wait for it to exit.
    ///
    /// Errors are logged. Stopping a process that is not running is a no-op.
    pub fn stop(&mut self) {
        let (label, child) = {
            let mut record = self.record.lock();
            let child = record.handle.take();
            if child.is_some() {
                record.state = ProcessState::Stopped;
            }
            (record.label.clone(), child)
        };

        if let Some(mut child) = child {
            match terminate(&mut child) {
                Ok(()) => tracing::info!("Process {} killed", label),
                Err(e) => tracing::error!("Failed to terminate {}: {}", label, e),
            }
            reap(&label, &mut child);
        }
    }
}

impl Drop for ProcessExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for a terminated child, escalating to SIGKILL after the grace period
fn reap(label: &str, child: &mut Child) {
    let deadline = Instant::now() + STOP_GRACE_PERIOD;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("Process {} exited with {}", label, status);
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(REAP_POLL_INTERVAL),
            Ok(None) => {
                tracing::warn!("Process {} ignored SIGTERM, killing", label);
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            Err(e) => {
                tracing::error!("Failed to wait for {}: {}", label, e);
                return;
            }
        }
    }
}

/// Reader thread body: classify all output, then reap the child
fn read_output(
    record: Arc<Mutex<ProcessRecord>>,
    generation: u64,
    label: String,
    classifier: LogClassifier,
    stdout: Option<impl Read + Send + 'static>,
    stderr: Option<impl Read + Send + 'static>,
) {
    let stderr_pump = stderr.and_then(|stderr| {
        let pump_label = label.clone();
        thread::Builder::new()
            .name(format!("stderr-{label}"))
            .spawn(move || pump_lines(stderr, &pump_label, classifier))
            .map_err(|e| tracing::warn!("Failed to read stderr of {}: {}", label, e))
            .ok()
    });

    if let Some(stdout) = stdout {
        pump_lines(stdout, &label, classifier);
    }
    if let Some(pump) = stderr_pump {
        let _ = pump.join();
    }

    // Output closed; wait for the exit without holding the lock across sleeps
    loop {
        {
            let mut record = record.lock();
            if record.generation != generation {
                return;
            }
            let Some(child) = record.handle.as_mut() else {
                // stop() took over
                return;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    record.handle = None;
                    record.state = ProcessState::Stopped;
                    tracing::info!("Process {} exited with {}", label, status);
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Failed to wait for {}: {}", label, e);
                    record.handle = None;
                    record.state = ProcessState::Stopped;
                    return;
                }
            }
        }
        thread::sleep(REAP_POLL_INTERVAL);
    }
}

fn pump_lines(source: impl Read, label: &str, classifier: LogClassifier) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => classifier.emit(label, &String::from_utf8_lossy(&buf)),
            Err(e) => {
                tracing::debug!("Output of {} closed: {}", label, e);
                return;
            }
        }
    }
}
