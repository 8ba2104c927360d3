//! End-to-end supervisor tests with `/bin/sh` scripts standing in for the camera.

#![cfg(unix)]

mod common;

use led_exposure::metrics::{MetricsRegistry, MetricsSnapshot};
use led_exposure::stream::{FrameStreamSupervisor, StreamConfig, StreamOptions, SupportedFlags};
use parking_lot::Mutex;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// Forking while another test still holds a freshly written script open
// makes exec fail with ETXTBSY, so these tests run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

/// Writes an executable producer script; `$*` holds the producer arguments.
fn producer(dir: &Path, body: &str) -> String {
    let path = dir.join("producer.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn supervisor(program: String) -> FrameStreamSupervisor {
    let config = StreamConfig {
        program,
        startup_grace_ms: 300,
        stop_timeout_ms: 1000,
        ..StreamConfig::default()
    };
    FrameStreamSupervisor::with_supported_flags(config, SupportedFlags::default()).unwrap()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn test_frames_flow_from_producer() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let frames = dir.path().join("frames.mjpeg");
    fs::write(&frames, common::mjpeg_stream(5)).unwrap();
    let sup = supervisor(producer(
        dir.path(),
        &format!("cat '{}'\nexec sleep 30", frames.display()),
    ));

    sup.start().unwrap();
    assert!(sup.is_running());
    assert!(wait_until(Duration::from_secs(5), || {
        sup.health_snapshot().frames_decoded == 5
    }));

    let frame = sup.latest_frame().unwrap();
    assert_eq!((frame.width(), frame.height()), (64, 48));
    assert_eq!(frame.sequence(), 5);

    let health = sup.health_snapshot();
    assert!(health.process_alive);
    assert!(health.reader_alive);
    assert_eq!(health.frames_dropped, 0);
    assert!(health.last_frame_at.is_some());

    sup.stop();
    let health = sup.health_snapshot();
    assert!(!health.running);
    assert!(!health.process_alive);
    assert!(!health.reader_alive);
    assert!(sup.latest_frame().is_none());
}

#[test]
fn test_immediate_exit_surfaces_in_health() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let sup = supervisor(producer(dir.path(), "echo 'no cameras available' >&2\nexit 3"));

    // Not an error: only a missing executable fails start().
    sup.start().unwrap();

    let health = sup.health_snapshot();
    assert!(!health.running);
    assert!(!health.process_alive);
    assert_eq!(health.last_exit_code, Some(3));
    assert!(sup
        .last_diagnostics(10)
        .contains("[supervisor] producer exited immediately"));
    assert!(wait_until(Duration::from_secs(2), || {
        sup.last_diagnostics(10).contains("no cameras available")
    }));
    assert!(sup.latest_frame().is_none());
}

#[test]
fn test_start_stop_idempotent() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let sup = supervisor(producer(dir.path(), "exec sleep 30"));

    sup.start().unwrap();
    let command = sup.effective_command();
    sup.start().unwrap();
    assert!(sup.is_running());
    assert_eq!(sup.effective_command(), command);

    sup.stop();
    sup.stop();
    assert!(!sup.is_running());
    assert!(!sup.health_snapshot().process_alive);

    // A stopped supervisor starts again cleanly.
    sup.start().unwrap();
    assert!(sup.health_snapshot().process_alive);
    sup.stop();
}

#[test]
fn test_latest_frame_sequence_never_goes_back() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let frames = dir.path().join("frames.mjpeg");
    fs::write(&frames, common::mjpeg_stream(8)).unwrap();
    let sup = supervisor(producer(
        dir.path(),
        &format!("for i in 1 2 3; do cat '{}'; sleep 0.05; done\nexec sleep 30", frames.display()),
    ));

    sup.start().unwrap();
    let mut last = 0;
    let done = wait_until(Duration::from_secs(5), || {
        if let Some(frame) = sup.latest_frame() {
            assert!(frame.sequence() >= last);
            last = frame.sequence();
        }
        last == 24
    });
    assert!(done);
    sup.stop();
}

#[test]
fn test_corrupt_frames_are_dropped() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let frames = dir.path().join("frames.mjpeg");
    let mut stream = common::mjpeg_stream(2);
    // Passes the size check but cannot be decoded.
    stream.extend_from_slice(&[0xFF, 0xD8]);
    stream.extend_from_slice(&[0x42; 2048]);
    stream.extend_from_slice(&[0xFF, 0xD9]);
    stream.extend_from_slice(&common::encode_jpeg(64, 48, 99));
    fs::write(&frames, stream).unwrap();
    let sup = supervisor(producer(
        dir.path(),
        &format!("cat '{}'\nexec sleep 30", frames.display()),
    ));

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        sup.health_snapshot().frames_decoded == 3
    }));
    assert_eq!(sup.health_snapshot().frames_dropped, 1);
    sup.stop();
}

#[test]
fn test_reconfigure_relaunches_and_totals_accumulate() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let frames = dir.path().join("frames.mjpeg");
    fs::write(&frames, common::mjpeg_stream(5)).unwrap();
    let sup = supervisor(producer(
        dir.path(),
        &format!("cat '{}'\nexec sleep 30", frames.display()),
    ));
    let registry = MetricsRegistry::new().unwrap();

    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        sup.health_snapshot().frames_decoded == 5
    }));
    registry.update(&MetricsSnapshot::from_components(&sup.health_snapshot(), None));

    let options = StreamOptions {
        framerate: Some(9.6),
        ..StreamOptions::default()
    };
    sup.reconfigure(&options).unwrap();
    assert!(sup.is_running());
    let command = sup.effective_command().join(" ");
    assert!(command.contains("--framerate 10 "), "{command}");
    assert_eq!(sup.config().framerate, 10);

    // The second run's frames add to the first run's.
    assert!(wait_until(Duration::from_secs(5), || {
        sup.health_snapshot().frames_decoded == 10
    }));
    registry.update(&MetricsSnapshot::from_components(&sup.health_snapshot(), None));
    let exported = registry.encode().unwrap();
    assert!(exported.contains("led_exposure_frames_decoded_total 10"), "{exported}");

    sup.stop();
    sup.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        sup.health_snapshot().frames_decoded == 15
    }));
    sup.stop();
}

#[test]
fn test_invalid_reconfigure_leaves_stopped() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let sup = supervisor(producer(dir.path(), "exec sleep 30"));
    sup.start().unwrap();

    let options = StreamOptions {
        width: Some(0),
        ..StreamOptions::default()
    };
    assert!(sup.reconfigure(&options).is_err());

    let health = sup.health_snapshot();
    assert!(!health.running);
    assert!(!health.process_alive);
    // The rejected options were not applied.
    assert_eq!(sup.config().width, 640);
}

#[test]
fn test_reconfigure_into_immediate_exit() {
    let _serial = SERIAL.lock();
    let dir = TempDir::new().unwrap();
    let sup = supervisor(producer(
        dir.path(),
        "case \"$*\" in *'--framerate 30 '*) echo 'mode not supported' >&2; exit 4;; esac\n\
         exec sleep 30",
    ));
    sup.start().unwrap();
    assert!(sup.health_snapshot().process_alive);

    let options = StreamOptions {
        framerate: Some(30.0),
        ..StreamOptions::default()
    };
    sup.reconfigure(&options).unwrap();

    let health = sup.health_snapshot();
    assert!(!health.running);
    assert!(!health.process_alive);
    assert_eq!(health.last_exit_code, Some(4));
    assert!(sup
        .last_diagnostics(10)
        .contains("[supervisor] producer exited immediately"));
}
