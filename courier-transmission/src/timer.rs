use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A one-shot timer that runs a callback after a delay.
///
/// Starting the timer while a callback is pending replaces the pending callback. Dropping the
/// timer cancels it. Callbacks run on the runtime passed to [`start`](Self::start), which makes
/// the timer usable from threads outside of that runtime.
#[derive(Debug, Default)]
pub struct BackoffTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackoffTimer {
    /// Creates an idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` once after `delay`, cancelling any pending callback.
    pub fn start<F>(&self, runtime: &Handle, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });

        if let Some(previous) = self.handle.lock().replace(task) {
            previous.abort();
        }
    }

    /// Cancels the pending callback.
    ///
    /// Returns `true` if a callback was pending.
    pub fn cancel(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Returns `true` if a callback is waiting to run.
    pub fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for BackoffTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
