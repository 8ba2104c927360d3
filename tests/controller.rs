//! Closed-loop controller scenarios against a simulated scene.

use led_exposure::analysis::{ChannelSelector, ExposureTargets};
use led_exposure::control::{
    Actuator, ActuatorError, ControllerConfig, ControllerPhase, ControllerStatus, Direction,
    ExposureController, ManualScheduler, SimulatedPanel, SimulatedScene,
};
use crossbeam_channel::{Receiver, Sender};
use led_exposure::stream::{Frame, FrameSource};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHANNEL: &str = "weiß";

/// Panel whose first `failures` writes are rejected.
struct FlakyPanel {
    inner: SimulatedPanel,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyPanel {
    fn new(failures: usize) -> Self {
        Self {
            inner: SimulatedPanel::new(),
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl Actuator for FlakyPanel {
    fn set_channel(&self, name: &str, percent: f64) -> Result<(), ActuatorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(ActuatorError::Io("bus timeout".into()));
        }
        self.inner.set_channel(name, percent)
    }

    fn get_channel(&self, name: &str) -> Result<f64, ActuatorError> {
        self.inner.get_channel(name)
    }

    fn list_channels(&self) -> Vec<String> {
        self.inner.list_channels()
    }
}

/// Panel whose non-zero writes block until the test releases them.
struct GatedPanel {
    inner: SimulatedPanel,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl Actuator for GatedPanel {
    fn set_channel(&self, name: &str, percent: f64) -> Result<(), ActuatorError> {
        if percent > 0.0 {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
        self.inner.set_channel(name, percent)
    }

    fn get_channel(&self, name: &str) -> Result<f64, ActuatorError> {
        self.inner.get_channel(name)
    }

    fn list_channels(&self) -> Vec<String> {
        self.inner.list_channels()
    }
}

/// Hands out queued frames, repeating the last one.
struct ScriptedSource {
    frames: Mutex<VecDeque<Arc<Frame>>>,
}

impl ScriptedSource {
    fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: Mutex::new(frames.into_iter().map(Arc::new).collect()),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn latest_frame(&self) -> Option<Arc<Frame>> {
        let mut frames = self.frames.lock();
        if frames.len() > 1 {
            frames.pop_front()
        } else {
            frames.front().cloned()
        }
    }
}

/// `dark` share of black pixels, `bright` share of white ones, mid-gray otherwise.
fn frame_with(dark: f64, bright: f64) -> Frame {
    let n = 1000usize;
    let d = (dark * n as f64).round() as usize;
    let b = (bright * n as f64).round() as usize;
    let gray: Vec<u8> = (0..n)
        .map(|i| if i < d { 0 } else if i < d + b { 255 } else { 128 })
        .collect();
    Frame::from_gray(&gray, n as u32, 1, 1)
}

fn observe(controller: &ExposureController) -> Arc<Mutex<Vec<ControllerStatus>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.on_update(move |status| sink.lock().push(status.clone()));
    seen
}

/// The 0% reset runs on its own thread; wait for it so ticks see a settled panel.
fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(done(), "timed out");
}

fn scene_controller(
    config: ControllerConfig,
) -> (ExposureController, Arc<ManualScheduler>, Arc<SimulatedPanel>) {
    let panel = Arc::new(SimulatedPanel::new());
    let scene = Arc::new(SimulatedScene::new(panel.clone(), CHANNEL));
    let scheduler = Arc::new(ManualScheduler::new());
    let controller =
        ExposureController::new(config, scene, panel.clone(), scheduler.clone()).unwrap();
    (controller, scheduler, panel)
}

#[test]
fn test_converges_when_step_at_floor() {
    let config = ControllerConfig {
        min_step: 10.0,
        ..ControllerConfig::default()
    };
    let (controller, scheduler, panel) = scene_controller(config);
    let seen = observe(&controller);

    controller
        .start(CHANNEL, ChannelSelector::Luma, ExposureTargets::default(), 10.0)
        .unwrap();
    wait_for(|| panel.writes() >= 1);
    scheduler.run_until_idle(50);

    let seen = seen.lock();
    let values: Vec<f64> = seen.iter().filter_map(|s| s.applied_value).collect();
    assert_eq!(values, vec![10.0, 20.0, 30.0, 40.0, 50.0, 50.0]);

    let last = seen.last().unwrap();
    assert_eq!(last.direction, Direction::Hold);
    assert_eq!(last.phase, ControllerPhase::Converged);
    assert_eq!(last.cycle, 6);
    assert_eq!(controller.phase(), ControllerPhase::Converged);
    assert_eq!(panel.get_channel(CHANNEL).unwrap(), 50.0);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn test_overshoot_halves_and_holds_until_cycle_limit() {
    let config = ControllerConfig {
        max_cycles: 12,
        ..ControllerConfig::default()
    };
    let (controller, scheduler, panel) = scene_controller(config);
    let seen = observe(&controller);

    controller
        .start(CHANNEL, ChannelSelector::Luma, ExposureTargets::default(), 20.0)
        .unwrap();
    wait_for(|| panel.writes() >= 1);
    scheduler.run_until_idle(100);

    let seen = seen.lock();
    assert_eq!(seen.len(), 12);

    // 0 -> 20 -> 40 -> 60 overshoots, reversal halves to 10, back to 50.
    let directions: Vec<i8> = seen.iter().take(5).map(|s| s.direction.signum()).collect();
    assert_eq!(directions, vec![1, 1, 1, -1, 0]);
    assert_eq!(seen[3].step_size, 10.0);
    assert_eq!(seen[3].applied_value, Some(50.0));

    for pair in seen.windows(2) {
        assert!(pair[1].step_size <= pair[0].step_size);
    }
    // Holding on target with a coarse step never counts as converged.
    assert!(seen[4..].iter().all(|s| s.direction == Direction::Hold));
    assert_eq!(seen.last().unwrap().phase, ControllerPhase::Aborted);
    assert_eq!(panel.get_channel(CHANNEL).unwrap(), 50.0);
}

#[test]
fn test_reversal_from_raise_to_lower() {
    let panel = Arc::new(SimulatedPanel::new());
    let source = Arc::new(ScriptedSource::new(vec![
        frame_with(0.20, 0.01),
        frame_with(0.0, 0.30),
    ]));
    let scheduler = Arc::new(ManualScheduler::new());
    let controller = ExposureController::new(
        ControllerConfig::default(),
        source,
        panel.clone(),
        scheduler.clone(),
    )
    .unwrap();
    let seen = observe(&controller);

    controller
        .start(CHANNEL, ChannelSelector::Luma, ExposureTargets::default(), 20.0)
        .unwrap();
    wait_for(|| panel.writes() >= 1);
    scheduler.run_pending();
    scheduler.run_pending();

    let seen = seen.lock();
    assert_eq!(seen[0].direction, Direction::Raise);
    assert_eq!(seen[0].applied_value, Some(20.0));
    assert_eq!(seen[1].direction, Direction::Lower);
    assert_eq!(seen[1].step_size, 10.0);
    assert_eq!(seen[1].applied_value, Some(10.0));
}

#[test]
fn test_actuator_failure_keeps_loop_alive() {
    // The reset write and the first tick's write both fail.
    let panel = Arc::new(FlakyPanel::new(2));
    let source = Arc::new(ScriptedSource::new(vec![frame_with(0.20, 0.0)]));
    let scheduler = Arc::new(ManualScheduler::new());
    let controller = ExposureController::new(
        ControllerConfig::default(),
        source,
        panel.clone(),
        scheduler.clone(),
    )
    .unwrap();
    let seen = observe(&controller);

    controller
        .start(CHANNEL, ChannelSelector::Luma, ExposureTargets::default(), 20.0)
        .unwrap();
    wait_for(|| panel.attempts.load(Ordering::SeqCst) >= 1);

    scheduler.run_pending();
    assert!(controller.is_running());
    assert_eq!(seen.lock()[0].applied_value, Some(0.0));

    scheduler.run_pending();
    assert_eq!(seen.lock()[1].applied_value, Some(20.0));
    assert_eq!(panel.get_channel(CHANNEL).unwrap(), 20.0);
}

#[test]
fn test_missing_frames_reschedule_at_tick_interval() {
    let panel = Arc::new(SimulatedPanel::new());
    let source = Arc::new(ScriptedSource::new(Vec::new()));
    let scheduler = Arc::new(ManualScheduler::new());
    let config = ControllerConfig {
        tick_interval_ms: 120,
        ..ControllerConfig::default()
    };
    let controller =
        ExposureController::new(config, source, panel, scheduler.clone()).unwrap();
    let seen = observe(&controller);

    controller
        .start(CHANNEL, ChannelSelector::Red, ExposureTargets::default(), 20.0)
        .unwrap();
    assert_eq!(scheduler.pending_delays(), vec![Duration::from_millis(120)]);

    for _ in 0..3 {
        scheduler.run_pending();
        assert_eq!(scheduler.pending_delays(), vec![Duration::from_millis(120)]);
    }
    assert!(seen.lock().is_empty());

    let state = controller.state().unwrap();
    assert_eq!(state.cycle_count, 0);
    assert_eq!(state.step_size, 20.0);
    assert!(state.previous_error.is_none());
}

#[test]
fn test_restart_after_stop_and_convergence() {
    let config = ControllerConfig {
        min_step: 10.0,
        ..ControllerConfig::default()
    };
    let (controller, scheduler, panel) = scene_controller(config);
    let targets = ExposureTargets::default();

    controller.stop();
    controller.start(CHANNEL, ChannelSelector::Luma, targets, 10.0).unwrap();
    controller.stop();
    controller.stop();
    assert_eq!(controller.phase(), ControllerPhase::Idle);
    assert_eq!(scheduler.run_until_idle(10), 1);

    wait_for(|| panel.writes() >= 1);
    controller.start(CHANNEL, ChannelSelector::Luma, targets, 10.0).unwrap();
    wait_for(|| panel.writes() >= 2);
    scheduler.run_until_idle(50);
    assert_eq!(controller.phase(), ControllerPhase::Converged);

    // A finished run does not block the next one.
    controller.start(CHANNEL, ChannelSelector::Luma, targets, 10.0).unwrap();
    assert!(controller.is_running());
    assert_eq!(controller.state().unwrap().cycle_count, 0);
    controller.stop();
}

#[test]
fn test_stop_does_not_wait_for_blocked_actuator() {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let panel = Arc::new(GatedPanel {
        inner: SimulatedPanel::new(),
        entered: entered_tx,
        release: release_rx,
    });
    let source = Arc::new(ScriptedSource::new(vec![frame_with(0.20, 0.0)]));
    let scheduler = Arc::new(ManualScheduler::new());
    let controller = ExposureController::new(
        ControllerConfig::default(),
        source,
        panel.clone(),
        scheduler.clone(),
    )
    .unwrap();
    let seen = observe(&controller);

    controller
        .start(CHANNEL, ChannelSelector::Luma, ExposureTargets::default(), 20.0)
        .unwrap();
    wait_for(|| panel.inner.writes() >= 1);

    let ticker = {
        let scheduler = Arc::clone(&scheduler);
        std::thread::spawn(move || scheduler.run_pending())
    };
    entered_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("tick never reached the actuator");

    // The tick is parked inside set_channel; queries and stop must not queue behind it.
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let handle = controller.clone();
    std::thread::spawn(move || {
        let phase = handle.phase();
        let state = handle.state();
        handle.stop();
        let _ = done_tx.send((phase, state.map(|s| s.step_size)));
    });
    let (phase, step) = done_rx
        .recv_timeout(Duration::from_secs(1))
        .expect("controller locked while the actuator was busy");
    assert_eq!(phase, ControllerPhase::Running);
    assert_eq!(step, Some(20.0));

    release_tx.send(()).unwrap();
    assert_eq!(ticker.join().unwrap(), 1);

    // The write lands, but the cancelled tick reports nothing and stops the chain.
    assert_eq!(panel.inner.get_channel(CHANNEL).unwrap(), 20.0);
    assert!(seen.lock().is_empty());
    assert_eq!(controller.phase(), ControllerPhase::Idle);
    assert_eq!(scheduler.pending(), 0);
}
