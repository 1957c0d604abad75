use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};

/// Deferred work scheduled through a [`Debouncer`].
pub type DebounceCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Coalesces bursts of triggers into a single execution of the most recent callback.
///
/// Every [`trigger`](Debouncer::trigger) replaces the pending callback and restarts the
/// settling timer. When the timer finally elapses the latest callback runs once and the
/// debouncer returns to idle. Triggers that arrive while a callback is running schedule
/// the next firing; they are never queued behind each other.
#[derive(Clone)]
pub struct Debouncer {
    shared: Arc<Shared>,
}

struct Shared {
    settle: Duration,
    state: Mutex<DebounceState>,
    fired_tx: watch::Sender<u64>,
}

#[derive(Default)]
struct DebounceState {
    callback: Option<DebounceCallback>,
    deadline: Option<Instant>,
    timer_running: bool,
    firing: bool,
    fired: u64,
}

impl Debouncer {
    /// Must be used from inside a tokio runtime; the settling timer is a spawned task.
    pub fn new(settle: Duration) -> Self {
        let (fired_tx, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                settle,
                state: Mutex::new(DebounceState::default()),
                fired_tx,
            }),
        }
    }

    /// Replaces the pending callback and restarts the settling timer.
    pub fn trigger<F>(&self, callback: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let mut state = self.shared.lock_state();
        state.callback = Some(Box::new(callback));
        state.deadline = Some(Instant::now() + self.shared.settle);
        if !state.timer_running {
            state.timer_running = true;
            tokio::spawn(run_timer(self.shared.clone()));
        }
    }

    /// Restarts the settling timer without touching the pending callback. No-op when idle.
    pub fn poke(&self) {
        let mut state = self.shared.lock_state();
        if state.callback.is_some() && state.deadline.is_some() {
            state.deadline = Some(Instant::now() + self.shared.settle);
        }
    }

    /// True while a callback is scheduled or running.
    pub fn is_pending(&self) -> bool {
        let state = self.shared.lock_state();
        state.callback.is_some() || state.firing
    }

    /// Number of completed firings since construction.
    pub fn fired_count(&self) -> u64 {
        self.shared.lock_state().fired
    }

    /// Waits for the next firing of whatever is currently scheduled or running.
    ///
    /// Returns immediately when the debouncer is idle.
    pub async fn wait_for_pending_trigger(&self) {
        let (mut fired_rx, target) = {
            let state = self.shared.lock_state();
            if state.callback.is_none() && !state.firing {
                return;
            }
            (self.shared.fired_tx.subscribe(), state.fired + 1)
        };

        while *fired_rx.borrow_and_update() < target {
            if fired_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_timer(shared: Arc<Shared>) {
    loop {
        let deadline = {
            let mut state = shared.lock_state();
            match state.deadline {
                Some(deadline) => deadline,
                None => {
                    state.timer_running = false;
                    return;
                }
            }
        };

        time::sleep_until(deadline).await;

        let callback = {
            let mut state = shared.lock_state();
            match state.deadline {
                // Poked or re-triggered while we slept.
                Some(current) if current > Instant::now() => continue,
                _ => {}
            }
            state.deadline = None;
            let callback = state.callback.take();
            state.firing = callback.is_some();
            callback
        };

        if let Some(callback) = callback {
            callback().await;
        }

        let mut state = shared.lock_state();
        state.firing = false;
        state.fired += 1;
        shared.fired_tx.send_replace(state.fired);
        if state.deadline.is_none() {
            state.timer_running = false;
            return;
        }
    }
}
