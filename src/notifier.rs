//! Edge notification driven by the backend's blocking wait primitive.
//!
//! Arming a pin starts one background thread which sleeps in
//! [`BlockingWaitSource::wait_for_change`] and publishes an [`EdgeEvent`] for
//! every wake-up. The wait is bounded by the poll timeout so the thread
//! re-checks its cancellation token at least that often; the timeout is the
//! worst-case latency of disarming, not of edge detection.

use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;

use crate::backend::{BlockingWaitSource, PinBackend, WaitOutcome};
use crate::config::{Direction, EdgeMode};
use crate::error::{PinError, Result};
use crate::gpio::{EdgeEvent, EdgeState, Pin, PinCore, Transition};
use crate::task::{CancellationToken, Publisher, TaskHandle};

const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(1);

struct EdgeNotifier<B: PinBackend> {
    core: Arc<PinCore<B>>,
    source: B::WaitSource,
    publisher: Publisher,
    token: CancellationToken,
    poll_timeout: Duration,
    last: u8,
}

impl<B: PinBackend> EdgeNotifier<B> {
    fn run(mut self) {
        let id = self.core.id;
        debug!("edge notifier on pin {id} started");

        while !self.token.is_cancelled() {
            let event = match self.source.wait_for_change(self.poll_timeout) {
                WaitOutcome::Timeout => continue,
                WaitOutcome::Ready => {
                    let timestamp = SystemTime::now();
                    let outcome = self.core.read().map(|current| {
                        let transition = Transition::observed(self.last, current);
                        self.last = current;
                        transition
                    });
                    EdgeEvent::new(id, timestamp, outcome)
                }
                WaitOutcome::Failed(source) => {
                    warn!("wait for edge failed on pin {id}: {source}");
                    let error = PinError::Poll { pin: id, source };
                    EdgeEvent::new(id, SystemTime::now(), Err(error))
                }
            };

            let failed = event.outcome.is_err();
            if self.publisher.publish(event).is_break() {
                break;
            }
            if failed && self.publisher.back_off().is_break() {
                break;
            }
        }

        self.core.finish_edge();
        debug!("edge notifier on pin {id} stopped");
    }
}

impl<B: PinBackend> Pin<B> {
    /// Arm edge notification, returning the receiving end of a channel
    /// holding up to `buffer_size` undelivered events.
    ///
    /// See [`Pin::arm_edge_with`].
    pub fn arm_edge(
        &self,
        mode: EdgeMode,
        buffer_size: usize,
        poll_timeout: Duration,
    ) -> Result<mpsc::Receiver<EdgeEvent>> {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        self.arm_edge_with(mode, tx, poll_timeout)?;
        Ok(rx)
    }

    /// Arm edge notification, publishing events on `tx`.
    ///
    /// The pin must be an exported input with no notifier armed. A notifier
    /// that was disarmed but has not yet exited is joined first, which can
    /// take up to its poll timeout.
    ///
    /// The notifier stops on [`Pin::disarm_edge`], on close, or once `tx`'s
    /// receiver is dropped.
    pub fn arm_edge_with(
        &self,
        mode: EdgeMode,
        tx: mpsc::Sender<EdgeEvent>,
        poll_timeout: Duration,
    ) -> Result<()> {
        let id = self.core.id;
        let mut slot = self.notifier.lock();

        if let Some(task) = slot.take() {
            if self.core.state.read().edge == EdgeState::Armed {
                *slot = Some(task);
                return Err(PinError::AlreadyArmed(id));
            }
            task.join();
        }

        let mut state = self.core.state.write();
        if state.edge != EdgeState::Idle {
            return Err(PinError::AlreadyArmed(id));
        }
        if !state.exported {
            return Err(PinError::NotExported(id));
        }
        if state.direction != Some(Direction::Input) {
            return Err(PinError::NotInput(id));
        }

        self.core
            .backend
            .set_edge(id, mode)
            .map_err(PinError::io(id, "set edge"))?;
        let mut source = self
            .core
            .backend
            .open_wait_source(id)
            .map_err(PinError::io(id, "open value source"))?;
        source
            .drain()
            .map_err(PinError::io(id, "drain value source"))?;
        let last = self.core.read_unchecked()?;

        // armed before the thread exists so a racing arm is refused
        state.edge = EdgeState::Armed;
        drop(state);

        let token = CancellationToken::new();
        let notifier = EdgeNotifier {
            core: Arc::clone(&self.core),
            source,
            publisher: Publisher::new(tx, token.clone()),
            token: token.clone(),
            poll_timeout: poll_timeout.max(MIN_POLL_TIMEOUT),
            last,
        };

        match thread::Builder::new()
            .name(format!("gpio{id}-edge"))
            .spawn(move || notifier.run())
        {
            Ok(handle) => {
                *slot = Some(TaskHandle::new(token, handle));
                info!("armed {mode} edge notifier on pin {id}");
                Ok(())
            }
            Err(source) => {
                self.core.finish_edge();
                Err(PinError::Spawn { pin: id, source })
            }
        }
    }

    /// Signal the notifier to stop and return without waiting for it.
    pub fn disarm_edge(&self) -> Result<()> {
        let id = self.core.id;
        let slot = self.notifier.lock();
        let mut state = self.core.state.write();

        if state.edge != EdgeState::Armed {
            return Err(PinError::NotArmed(id));
        }
        state.edge = EdgeState::Stopping;
        if let Some(task) = slot.as_ref() {
            task.cancel();
        }
        info!("disarmed edge notifier on pin {id}");

        Ok(())
    }

    /// Wait for a disarmed notifier to exit.
    ///
    /// Returns `AlreadyArmed` if the notifier has not been disarmed, since it
    /// would never finish.
    pub fn join_edge(&self) -> Result<()> {
        let mut slot = self.notifier.lock();
        if self.core.state.read().edge == EdgeState::Armed {
            return Err(PinError::AlreadyArmed(self.core.id));
        }
        if let Some(task) = slot.take() {
            task.join();
        }
        Ok(())
    }
}
