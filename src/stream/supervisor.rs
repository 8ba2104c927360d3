//! Producer process supervision.
//!
//! The supervisor owns one external MJPEG producer and two reader threads:
//! one turning its stdout into decoded frames, one keeping the tail of its
//! stderr for diagnostics. Consumers only ever see the newest frame.

use super::command::{build_command, SupportedFlags};
use super::{
    ConfigError, DiagnosticLog, Frame, FrameExtractor, FrameSource, StreamConfig, StreamOptions,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long the producer's `--help` may take.
const HELP_TIMEOUT: Duration = Duration::from_secs(2);
/// Poll interval while waiting on the producer or reader threads.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Back-off after a failed stdout read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Errors surfaced synchronously by the supervisor.
///
/// Only configuration problems are reported this way. A producer that
/// launches and then dies shows up in [`StreamHealth`] instead.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("producer executable not found: {0}")]
    ProducerNotFound(String),
    #[error("failed to launch producer: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("invalid stream configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Point-in-time view of the supervisor for operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamHealth {
    pub running: bool,
    pub paused: bool,
    pub process_alive: bool,
    pub last_exit_code: Option<i32>,
    pub reader_alive: bool,
    pub effective_command: String,
    pub recent_diagnostics: Vec<String>,
    /// Frames decoded over every run of this supervisor.
    pub frames_decoded: u64,
    /// Candidates discarded over every run of this supervisor.
    pub frames_dropped: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

/// State shared with the reader threads.
#[derive(Debug)]
struct Shared {
    /// Newest frame of the current run. Replaced, never mutated.
    latest: Mutex<Option<Arc<Frame>>>,
    /// Run counter; readers of an older run may not publish.
    generation: AtomicU64,
    running: AtomicBool,
    paused: AtomicBool,
    reader_alive: AtomicBool,
    child: Mutex<Option<Child>>,
    last_exit_code: Mutex<Option<i32>>,
    command: Mutex<Vec<String>>,
    frames_decoded: AtomicU64,
    frames_dropped: AtomicU64,
    last_frame_at: Mutex<Option<DateTime<Utc>>>,
    diagnostics: DiagnosticLog,
}

impl Shared {
    fn publish(&self, generation: u64, frame: Frame) {
        let decoded_at = frame.decoded_at();
        let mut latest = self.latest.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        *latest = Some(Arc::new(frame));
        *self.last_frame_at.lock() = Some(decoded_at);
    }

    fn clear_frames(&self) {
        let mut latest = self.latest.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *latest = None;
    }

    fn record_exit(&self, status: ExitStatus) {
        *self.last_exit_code.lock() = status.code();
    }
}

/// Handles owned by one start/stop cycle.
struct Readers {
    stop: Arc<AtomicBool>,
    frames: JoinHandle<()>,
    diagnostics: JoinHandle<()>,
}

struct Lifecycle {
    config: StreamConfig,
    readers: Option<Readers>,
}

/// Supervises the external frame producer.
pub struct FrameStreamSupervisor {
    lifecycle: Mutex<Lifecycle>,
    supported: SupportedFlags,
    shared: Arc<Shared>,
}

impl FrameStreamSupervisor {
    /// Creates a stopped supervisor, probing the producer's options once.
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        let supported = SupportedFlags::query(&config.program, HELP_TIMEOUT);
        Self::with_supported_flags(config, supported)
    }

    /// Creates a stopped supervisor with a known set of producer options.
    pub fn with_supported_flags(
        config: StreamConfig,
        supported: SupportedFlags,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            reader_alive: AtomicBool::new(false),
            child: Mutex::new(None),
            last_exit_code: Mutex::new(None),
            command: Mutex::new(build_command(&config, &supported)),
            frames_decoded: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            last_frame_at: Mutex::new(None),
            diagnostics: DiagnosticLog::new(config.diagnostic_lines),
        });
        Ok(Self {
            lifecycle: Mutex::new(Lifecycle {
                config,
                readers: None,
            }),
            supported,
            shared,
        })
    }

    /// Launches the producer. Does nothing if it is already running.
    ///
    /// Only a missing executable or an invalid configuration is an error.
    /// A producer that exits right away leaves the supervisor stopped and
    /// is reported through [`health_snapshot`](Self::health_snapshot).
    pub fn start(&self) -> Result<(), StreamError> {
        let mut lifecycle = self.lifecycle.lock();
        self.start_locked(&mut lifecycle)
    }

    /// Terminates the producer and joins the readers. Idempotent.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        self.stop_locked(&mut lifecycle);
    }

    /// Stops, applies `options`, and starts again.
    ///
    /// On any failure the supervisor is left stopped.
    pub fn reconfigure(&self, options: &StreamOptions) -> Result<(), StreamError> {
        let mut lifecycle = self.lifecycle.lock();
        self.stop_locked(&mut lifecycle);

        let mut config = lifecycle.config.clone();
        options.apply_to(&mut config);
        config.validate()?;
        *self.shared.command.lock() = build_command(&config, &self.supported);
        lifecycle.config = config;
        tracing::info!("Stream reconfigured");

        self.start_locked(&mut lifecycle)
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) -> Result<(), StreamError> {
        if self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        // Leftovers of a producer that died on its own.
        self.teardown(lifecycle);

        let config = lifecycle.config.clone();
        let command = build_command(&config, &self.supported);
        *self.shared.command.lock() = command.clone();

        let mut child = Command::new(&command[0])
            .args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StreamError::ProducerNotFound(config.program.clone()),
                _ => StreamError::SpawnFailed(e),
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StreamError::SpawnFailed(std::io::Error::other(
                "producer pipes unavailable",
            )));
        };

        let generation = self.shared.generation.load(Ordering::Acquire);
        let stop = Arc::new(AtomicBool::new(false));
        *self.shared.last_exit_code.lock() = None;
        self.shared.reader_alive.store(true, Ordering::Release);
        *self.shared.child.lock() = Some(child);

        let readers = match self.spawn_readers(&config, generation, &stop, stdout, stderr) {
            Ok(readers) => readers,
            Err(e) => {
                stop.store(true, Ordering::Release);
                self.teardown(lifecycle);
                return Err(StreamError::SpawnFailed(e));
            }
        };
        lifecycle.readers = Some(readers);
        self.shared.running.store(true, Ordering::Release);

        tracing::info!(command = %command.join(" "), "Producer launched");

        thread::sleep(config.startup_grace());
        if let Some(status) = self.poll_exit() {
            self.shared
                .diagnostics
                .push("[supervisor] producer exited immediately");
            self.shared.running.store(false, Ordering::Release);
            tracing::warn!(code = ?status.code(), "Producer exited immediately");
        }
        Ok(())
    }

    fn spawn_readers(
        &self,
        config: &StreamConfig,
        generation: u64,
        stop: &Arc<AtomicBool>,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> std::io::Result<Readers> {
        let extractor = FrameExtractor::new(config.min_frame_bytes, config.max_buffer_bytes);
        let chunk = config.read_chunk_bytes;

        let shared = Arc::clone(&self.shared);
        let flag = Arc::clone(stop);
        let frames = thread::Builder::new()
            .name("frame-reader".into())
            .spawn(move || read_frames(stdout, extractor, chunk, generation, &shared, &flag))?;

        let shared = Arc::clone(&self.shared);
        let diagnostics = thread::Builder::new()
            .name("diagnostic-reader".into())
            .spawn(move || read_diagnostics(stderr, &shared))?;

        Ok(Readers {
            stop: Arc::clone(stop),
            frames,
            diagnostics,
        })
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        self.teardown(lifecycle);
        if was_running {
            tracing::info!("Producer stopped");
        }
    }

    /// Releases the process, the readers, and buffered frames.
    fn teardown(&self, lifecycle: &mut Lifecycle) {
        let readers = lifecycle.readers.take();
        if let Some(readers) = &readers {
            readers.stop.store(true, Ordering::Release);
        }

        let child = self.shared.child.lock().take();
        if let Some(mut child) = child {
            let stop_timeout = lifecycle.config.stop_timeout();
            if let Some(status) = terminate(&mut child, stop_timeout) {
                self.shared.record_exit(status);
            }
        }

        if let Some(readers) = readers {
            let timeout = lifecycle.config.join_timeout();
            join_with_timeout(readers.frames, timeout, "frame-reader");
            join_with_timeout(readers.diagnostics, timeout, "diagnostic-reader");
        }
        self.shared.reader_alive.store(false, Ordering::Release);
        self.shared.clear_frames();
    }

    /// Returns the exit status if the producer has terminated.
    fn poll_exit(&self) -> Option<ExitStatus> {
        let mut child = self.shared.child.lock();
        let status = child.as_mut()?.try_wait().ok()??;
        self.shared.record_exit(status);
        Some(status)
    }

    /// Returns the newest decoded frame, if any, without blocking on I/O.
    ///
    /// Always `None` while the preview is paused.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        if self.shared.paused.load(Ordering::Acquire) {
            return None;
        }
        self.shared.latest.lock().clone()
    }

    /// Hides frames from consumers, e.g. while a still capture borrows the sensor.
    pub fn pause_preview(&self) {
        self.shared.paused.store(true, Ordering::Release);
        tracing::debug!("Preview paused");
    }

    pub fn resume_preview(&self) {
        self.shared.paused.store(false, Ordering::Release);
        tracing::debug!("Preview resumed");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Collects the current health state. Never blocks on the producer.
    pub fn health_snapshot(&self) -> StreamHealth {
        let process_alive = self.poll_exit().is_none() && self.shared.child.lock().is_some();
        StreamHealth {
            running: self.shared.running.load(Ordering::Acquire),
            paused: self.shared.paused.load(Ordering::Acquire),
            process_alive,
            last_exit_code: *self.shared.last_exit_code.lock(),
            reader_alive: self.shared.reader_alive.load(Ordering::Acquire),
            effective_command: self.shared.command.lock().join(" "),
            recent_diagnostics: self.shared.diagnostics.tail(12),
            frames_decoded: self.shared.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            last_frame_at: *self.shared.last_frame_at.lock(),
        }
    }

    /// Returns up to `n` recent diagnostic lines joined by newlines.
    pub fn last_diagnostics(&self, n: usize) -> String {
        self.shared.diagnostics.tail(n).join("\n")
    }

    /// The command line the next (or current) launch uses.
    pub fn effective_command(&self) -> Vec<String> {
        self.shared.command.lock().clone()
    }

    pub fn config(&self) -> StreamConfig {
        self.lifecycle.lock().config.clone()
    }
}

impl FrameSource for FrameStreamSupervisor {
    fn latest_frame(&self) -> Option<Arc<Frame>> {
        FrameStreamSupervisor::latest_frame(self)
    }
}

impl Drop for FrameStreamSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_frames(
    mut stdout: ChildStdout,
    mut extractor: FrameExtractor,
    chunk: usize,
    generation: u64,
    shared: &Shared,
    stop: &AtomicBool,
) {
    let mut buf = vec![0u8; chunk];
    while !stop.load(Ordering::Acquire) {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let before = extractor.stats();
                let frames = extractor.feed(&buf[..n]);
                let after = extractor.stats();
                // Totals span every run of this supervisor.
                shared
                    .frames_decoded
                    .fetch_add(after.decoded - before.decoded, Ordering::Relaxed);
                shared
                    .frames_dropped
                    .fetch_add(after.dropped() - before.dropped(), Ordering::Relaxed);
                // Intermediate frames of one read are superseded immediately.
                if let Some(frame) = frames.into_iter().last() {
                    shared.publish(generation, frame);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                shared.diagnostics.push(format!("[stream error] {e}"));
                thread::sleep(READ_RETRY_DELAY);
            }
        }
    }
    shared.reader_alive.store(false, Ordering::Release);
    tracing::debug!("Frame reader finished");
}

fn read_diagnostics(stderr: ChildStderr, shared: &Shared) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                shared
                    .diagnostics
                    .push_producer_line(&String::from_utf8_lossy(&line));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                shared.diagnostics.push(format!("[stderr reader error] {e}"));
                break;
            }
        }
    }
}

/// Asks the producer to exit, killing it once `timeout` has passed.
fn terminate(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    if send_terminate(child) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
        tracing::warn!(pid = child.id(), "Producer ignored terminate request, killing");
    }

    let _ = child.kill();
    child.wait().ok()
}

#[cfg(unix)]
fn send_terminate(child: &Child) -> bool {
    let pid = child.id();
    match Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            tracing::debug!(pid, code = ?status.code(), "kill -TERM refused, forcing");
            false
        }
        Err(e) => {
            tracing::debug!(pid, error = %e, "Could not run kill -TERM, forcing");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_child: &Child) -> bool {
    false
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    if handle.is_finished() {
        let _ = handle.join();
    } else {
        // Detached; its generation is stale so it can no longer publish.
        tracing::warn!(thread = name, "Reader did not finish in time");
    }
}
