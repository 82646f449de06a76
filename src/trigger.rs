//! Busy-polling edge detection for sources without a blocking wait.
//!
//! The trigger thread samples its source continuously, yielding between
//! samples, and so keeps a core busy for as long as it runs. Give it a small
//! buffer: a full channel stalls sampling until the consumer catches up.

use log::debug;
use std::sync::Arc;
use std::thread::{self, yield_now};
use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::error::{PinError, Result};
use crate::gpio::{EdgeEvent, LevelSource, Transition};
use crate::task::{CancellationToken, Publisher, TaskHandle};

pub struct EdgeTrigger<S: LevelSource> {
    source: Arc<S>,
    publisher: Publisher,
    token: CancellationToken,
    last: u8,
}

/// Stop handle for a running [`EdgeTrigger`].
///
/// Dropping the control stops the trigger and waits for it to exit.
pub struct TriggerControl {
    task: TaskHandle,
}

impl TriggerControl {
    /// Ask the trigger to stop at its next sample.
    pub fn stop(&self) {
        self.task.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the trigger thread to exit. Call [`TriggerControl::stop`]
    /// first unless the event receiver has been dropped.
    pub fn join(self) {
        self.task.join();
    }
}

impl<S: LevelSource> EdgeTrigger<S> {
    /// Claim `source`, sample it once as the baseline and start watching it.
    ///
    /// Fails without starting anything if the source is already owned by
    /// another notifier or trigger (`AlreadyArmed` for a [`Pin`](crate::Pin)),
    /// or if the baseline read fails. The source is released when the
    /// trigger exits.
    pub fn start(
        source: Arc<S>,
        buffer_size: usize,
    ) -> Result<(mpsc::Receiver<EdgeEvent>, TriggerControl)> {
        let id = source.pin_id();
        source.claim()?;
        let last = match source.read_level() {
            Ok(level) => level,
            Err(e) => {
                source.release();
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let token = CancellationToken::new();
        let trigger = EdgeTrigger {
            source: Arc::clone(&source),
            publisher: Publisher::new(tx, token.clone()),
            token: token.clone(),
            last,
        };

        let handle = match thread::Builder::new()
            .name(format!("gpio{id}-trigger"))
            .spawn(move || trigger.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                source.release();
                return Err(PinError::Spawn { pin: id, source: e });
            }
        };
        debug!("edge trigger on pin {id} started at level {last}");

        Ok((
            rx,
            TriggerControl {
                task: TaskHandle::new(token, handle),
            },
        ))
    }

    fn run(mut self) {
        let id = self.source.pin_id();

        while !self.token.is_cancelled() {
            let outcome = match self.source.read_level() {
                Ok(current) if current == self.last => {
                    yield_now();
                    continue;
                }
                Ok(current) => {
                    let transition = Transition {
                        previous: self.last,
                        current,
                    };
                    self.last = current;
                    Ok(transition)
                }
                Err(e) => Err(e),
            };

            let failed = outcome.is_err();
            let event = EdgeEvent::new(id, SystemTime::now(), outcome);
            if self.publisher.publish(event).is_break() {
                break;
            }
            if failed {
                if self.publisher.back_off().is_break() {
                    break;
                }
            } else {
                yield_now();
            }
        }

        self.source.release();
        debug!("edge trigger on pin {id} stopped");
    }
}
