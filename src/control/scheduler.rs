//! Deferred execution for the control loop.
//!
//! The controller never sleeps or blocks between ticks. It hands the next
//! tick to a [`Scheduler`], which runs it after the requested delay.

use crossbeam_channel::{select, Sender};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread;
use std::time::{Duration, Instant};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// "Call this again after N milliseconds."
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task);
}

struct Timed {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Timed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timed {}

impl PartialOrd for Timed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timed {
    // Reversed: BinaryHeap is a max-heap and the earliest task must come first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Runs all tasks on one background thread, in due-time order.
///
/// Dropping the scheduler discards tasks that have not run yet.
pub struct TimerScheduler {
    sender: Sender<(Instant, Task)>,
}

impl TimerScheduler {
    pub fn new() -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<(Instant, Task)>();
        thread::Builder::new()
            .name("control-timer".into())
            .spawn(move || {
                let mut queue = BinaryHeap::new();
                let mut seq = 0u64;
                loop {
                    let wake = match queue.peek() {
                        Some(Timed { due, .. }) => crossbeam_channel::at(*due),
                        None => crossbeam_channel::never(),
                    };
                    select! {
                        recv(receiver) -> incoming => match incoming {
                            Ok((due, task)) => {
                                seq += 1;
                                queue.push(Timed { due, seq, task });
                            }
                            Err(_) => break,
                        },
                        recv(wake) -> _ => {}
                    }
                    while queue.peek().is_some_and(|t| t.due <= Instant::now()) {
                        if let Some(timed) = queue.pop() {
                            (timed.task)();
                        }
                    }
                }
                tracing::debug!(discarded = queue.len(), "Control timer stopped");
            })?;
        Ok(Self { sender })
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        if self.sender.send((Instant::now() + delay, task)).is_err() {
            tracing::warn!("Control timer is gone, task dropped");
        }
    }
}

/// Queues tasks until the owner pumps them. Delays are recorded, not waited.
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<(Duration, Task)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every task queued so far and returns how many ran.
    ///
    /// Tasks scheduled while running wait for the next call.
    pub fn run_pending(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        let count = batch.len();
        for (_, task) in batch {
            task();
        }
        count
    }

    /// Pumps until nothing is queued or `max_rounds` is reached.
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut rounds = 0;
        while rounds < max_rounds && self.run_pending() > 0 {
            rounds += 1;
        }
        rounds
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Delays of the queued tasks, oldest first.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending.lock().iter().map(|(d, _)| *d).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        self.pending.lock().push((delay, task));
    }
}
