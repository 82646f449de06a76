use log::warn;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time;

use crate::gpio::EdgeEvent;

const PUBLISH_RETRY_INTERVAL: Duration = Duration::from_millis(5);
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// One-shot stop signal shared between a caller and one background task.
///
/// Cancelling is idempotent and never blocks, whether or not the task is
/// still running.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for up to `timeout`, returning early with `true` once cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = flag.lock();
        if !*cancelled {
            let _ = cvar.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }
}

/// A running background task: its stop signal and its completion.
pub struct TaskHandle {
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
    name: String,
}

impl TaskHandle {
    pub(crate) fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        let name = join.thread().name().unwrap_or("edge task").to_string();
        Self {
            token,
            join: Some(join),
            name,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Block until the task has exited. Does not cancel it.
    pub fn join(mut self) {
        self.wait();
    }

    fn wait(&mut self) {
        if let Some(handle) = self.join.take()
            && handle.join().is_err()
        {
            warn!("{} panicked", self.name);
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.token.cancel();
        self.wait();
    }
}

/// Sending half of an event channel, owned by one background task.
///
/// A full channel blocks the task until the consumer frees a slot. The wait
/// wakes every [`PUBLISH_RETRY_INTERVAL`] to check the token, so a stalled
/// consumer delays cancellation by at most that much.
pub(crate) struct Publisher {
    tx: mpsc::Sender<EdgeEvent>,
    token: CancellationToken,
    // built on the first stall, then reused
    runtime: Option<Runtime>,
}

impl Publisher {
    pub(crate) fn new(tx: mpsc::Sender<EdgeEvent>, token: CancellationToken) -> Self {
        Self {
            tx,
            token,
            runtime: None,
        }
    }

    /// Hand `event` to the consumer, waiting while the channel is full.
    ///
    /// Breaks when the token is cancelled or the consumer has gone away.
    pub(crate) fn publish(&mut self, event: EdgeEvent) -> ControlFlow<()> {
        let event = match self.tx.try_send(event) {
            Ok(()) => return ControlFlow::Continue(()),
            Err(TrySendError::Closed(_)) => return ControlFlow::Break(()),
            Err(TrySendError::Full(event)) => event,
        };

        match stall_runtime(&mut self.runtime) {
            Some(runtime) => wait_for_capacity(runtime, &self.tx, event, &self.token),
            None => retry_until_sent(&self.tx, event, &self.token),
        }
    }

    /// Back off after publishing an error event.
    ///
    /// Breaks if the token was cancelled while waiting.
    pub(crate) fn back_off(&self) -> ControlFlow<()> {
        if self.token.wait_timeout(ERROR_BACKOFF) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

fn stall_runtime(slot: &mut Option<Runtime>) -> Option<&Runtime> {
    if slot.is_none() {
        match Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => *slot = Some(runtime),
            Err(e) => warn!("cannot wait for channel capacity, polling instead: {e}"),
        }
    }
    slot.as_ref()
}

fn wait_for_capacity(
    runtime: &Runtime,
    tx: &mpsc::Sender<EdgeEvent>,
    event: EdgeEvent,
    token: &CancellationToken,
) -> ControlFlow<()> {
    while !token.is_cancelled() {
        match runtime.block_on(time::timeout(PUBLISH_RETRY_INTERVAL, tx.reserve())) {
            Ok(Ok(permit)) => {
                permit.send(event);
                return ControlFlow::Continue(());
            }
            Ok(Err(_)) => return ControlFlow::Break(()),
            Err(_) => {}
        }
    }
    ControlFlow::Break(())
}

fn retry_until_sent(
    tx: &mpsc::Sender<EdgeEvent>,
    mut event: EdgeEvent,
    token: &CancellationToken,
) -> ControlFlow<()> {
    loop {
        if token.wait_timeout(PUBLISH_RETRY_INTERVAL) {
            return ControlFlow::Break(());
        }
        match tx.try_send(event) {
            Ok(()) => return ControlFlow::Continue(()),
            Err(TrySendError::Closed(_)) => return ControlFlow::Break(()),
            Err(TrySendError::Full(returned)) => event = returned,
        }
    }
}
