//! Timeout enforcement.
//!
//! # Responsibilities
//! - Schedule a one-shot deadline callback on the Tokio runtime
//! - Cancel it cleanly, any number of times, from any path
//!
//! # Design Decisions
//! - Uses Tokio's timer facilities; the deadline lives in its own task
//! - A state word decides between fire and cancel, so `on_fire` runs at most once
//! - Dropping the handle does not cancel; only [`TimeoutTimer::cancel`] does

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELED: u8 = 2;

/// Observable state of a [`TimeoutTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Waiting for the deadline.
    Armed,
    /// The deadline passed and `on_fire` was invoked.
    Fired,
    /// Canceled before the deadline.
    Canceled,
}

/// A cancellable one-shot deadline.
#[derive(Debug)]
pub struct TimeoutTimer {
    state: Arc<AtomicU8>,
    task: AbortHandle,
}

impl TimeoutTimer {
    /// Schedule `on_fire` to run once after `duration` unless canceled first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F>(duration: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ARMED));
        let task_state = Arc::clone(&state);

        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                on_fire();
            }
        });

        Self {
            state,
            task: task.abort_handle(),
        }
    }

    /// Cancel the deadline.
    ///
    /// Idempotent. After the timer has fired this is a no-op. Returns `true`
    /// only for the call that actually prevented `on_fire`.
    pub fn cancel(&self) -> bool {
        let canceled = self
            .state
            .compare_exchange(ARMED, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if canceled {
            // Releases the callback (and whatever it captured) right away.
            self.task.abort();
        }
        canceled
    }

    /// Current state; `Fired` once `on_fire` has started.
    pub fn state(&self) -> TimerState {
        match self.state.load(Ordering::Acquire) {
            ARMED => TimerState::Armed,
            FIRED => TimerState::Fired,
            _ => TimerState::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_timer(duration: Duration) -> (TimeoutTimer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timer = TimeoutTimer::arm(duration, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (timer, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_deadline() {
        let (timer, fired) = counting_timer(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.state(), TimerState::Armed);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_deadline_suppresses_callback() {
        let (timer, fired) = counting_timer(Duration::from_secs(1));

        assert!(timer.cancel());
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.state(), TimerState::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (timer, fired) = counting_timer(Duration::from_secs(1));

        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(!timer.cancel());
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_noop() {
        let (timer, fired) = counting_timer(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(!timer.cancel());
        assert!(!timer.cancel());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_releases_captured_state() {
        let captured = Arc::new(());
        let held = Arc::clone(&captured);
        let timer = TimeoutTimer::arm(Duration::from_secs(60), move || drop(held));
        assert_eq!(Arc::strong_count(&captured), 2);

        timer.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(Arc::strong_count(&captured), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_keeps_deadline() {
        let (timer, fired) = counting_timer(Duration::from_secs(1));
        drop(timer);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
