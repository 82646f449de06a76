#![allow(dead_code)]

use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use pinwatch::{EdgeEvent, EdgeState, MockBackend, Pin};
use tokio::sync::mpsc::{Receiver, error::TryRecvError};

pub const POLL_TIMEOUT: Duration = Duration::from_millis(20);

// generous bound for an event to cross from the notifier thread
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

pub fn mock_backend() -> Arc<MockBackend> {
    Arc::new(MockBackend::new())
}

pub fn input_pin(backend: &Arc<MockBackend>, id: u32) -> Pin<MockBackend> {
    Pin::new_input(Arc::clone(backend), id).expect("input pin")
}

pub fn output_pin(backend: &Arc<MockBackend>, id: u32) -> Pin<MockBackend> {
    Pin::new_output(Arc::clone(backend), id).expect("output pin")
}

/// Poll `rx` until an event arrives or `timeout` elapses.
pub fn recv_within(rx: &mut Receiver<EdgeEvent>, timeout: Duration) -> Option<EdgeEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.try_recv() {
            Ok(event) => return Some(event),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    return None;
                }
                sleep(Duration::from_millis(1));
            }
        }
    }
}

pub fn wait_for_edge_state(pin: &Pin<MockBackend>, state: EdgeState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pin.edge_state() == state {
            return true;
        }
        sleep(Duration::from_millis(1));
    }
    pin.edge_state() == state
}
