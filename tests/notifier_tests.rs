mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use pinwatch::backend::MockOp;
use pinwatch::{Edge, EdgeMode, EdgeState, Pin, PinError, Transition};

use common::{
    DELIVERY_TIMEOUT, POLL_TIMEOUT, input_pin, mock_backend, output_pin, recv_within,
    wait_for_edge_state,
};

fn transition(previous: u8, current: u8) -> Transition {
    Transition { previous, current }
}

#[test]
fn arm_twice_is_already_armed() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);

    let _rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();
    assert!(pin.interrupt_armed());
    assert!(matches!(
        pin.arm_edge(EdgeMode::Rising, 4, POLL_TIMEOUT),
        Err(PinError::AlreadyArmed(17))
    ));
}

#[test]
fn racing_arms_admit_exactly_one() {
    const CALLERS: usize = 8;
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let barrier = Barrier::new(CALLERS);

    let results: Vec<_> = thread::scope(|s| {
        let callers: Vec<_> = (0..CALLERS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT)
                })
            })
            .collect();
        callers.into_iter().map(|c| c.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, PinError::AlreadyArmed(17)), "{e}");
        }
    }
    assert_eq!(pin.edge_state(), EdgeState::Armed);
}

#[test]
fn disarm_without_arm_is_not_armed() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);

    assert!(matches!(pin.disarm_edge(), Err(PinError::NotArmed(17))));

    let _rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();
    pin.disarm_edge().unwrap();
    assert!(matches!(pin.disarm_edge(), Err(PinError::NotArmed(17))));
}

#[test]
fn arm_requires_exported_input() {
    let backend = mock_backend();

    let unexported = Pin::new(Arc::clone(&backend), 1);
    assert!(matches!(
        unexported.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT),
        Err(PinError::NotExported(1))
    ));

    let output = output_pin(&backend, 2);
    assert!(matches!(
        output.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT),
        Err(PinError::NotInput(2))
    ));
    assert!(!output.interrupt_armed());
}

#[test]
fn armed_pin_cannot_become_output() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);

    let _rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();
    assert!(matches!(
        pin.configure_output(),
        Err(PinError::AlreadyArmed(17))
    ));
    pin.configure_input().unwrap();
}

#[test]
fn arm_writes_edge_mode() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);

    let _rx = pin.arm_edge(EdgeMode::Falling, 4, POLL_TIMEOUT).unwrap();
    assert_eq!(backend.edge(17), Some(EdgeMode::Falling));
}

#[test]
fn both_edges_are_reported_in_order() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let mut rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();

    backend.set_value(17, 1);
    let first = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("rising event");
    assert_eq!(first.pin, 17);
    assert_eq!(first.transition(), Some(transition(0, 1)));
    assert_eq!(first.transition().and_then(|t| t.edge()), Some(Edge::Rising));

    backend.set_value(17, 0);
    let second = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("falling event");
    assert_eq!(second.transition(), Some(transition(1, 0)));
    assert!(second.timestamp >= first.timestamp);

    assert!(recv_within(&mut rx, POLL_TIMEOUT * 3).is_none());
}

#[test]
fn no_spurious_event_after_arming() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let mut rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();

    assert!(recv_within(&mut rx, POLL_TIMEOUT * 3).is_none());
    assert_eq!(pin.edge_state(), EdgeState::Armed);
}

#[test]
fn rising_mode_ignores_falling_edges() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let mut rx = pin.arm_edge(EdgeMode::Rising, 4, POLL_TIMEOUT).unwrap();

    backend.set_value(17, 1);
    let event = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("rising event");
    assert_eq!(event.transition(), Some(transition(0, 1)));

    backend.set_value(17, 0);
    assert!(recv_within(&mut rx, POLL_TIMEOUT * 3).is_none());

    backend.set_value(17, 1);
    let event = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("second rising event");
    assert_eq!(event.transition(), Some(transition(0, 1)));
}

#[test]
fn disarm_then_close_is_bounded_by_poll_timeout() {
    let poll_timeout = Duration::from_millis(100);
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let _rx = pin.arm_edge(EdgeMode::Both, 4, poll_timeout).unwrap();

    let start = Instant::now();
    pin.disarm_edge().unwrap();
    pin.close().unwrap();
    // one poll timeout plus scheduling slack
    assert!(start.elapsed() < poll_timeout * 2);
    assert!(!backend.is_exported(17));
}

#[test]
fn close_stops_an_armed_notifier() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let mut rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();

    pin.close().unwrap();
    assert!(!backend.is_exported(17));
    // the task dropped its sender on exit
    assert!(recv_within(&mut rx, POLL_TIMEOUT).is_none());
    assert!(rx.is_closed());
}

#[test]
fn disarmed_task_returns_pin_to_idle() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let _rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();

    pin.disarm_edge().unwrap();
    assert_ne!(pin.edge_state(), EdgeState::Armed);
    pin.join_edge().unwrap();
    assert_eq!(pin.edge_state(), EdgeState::Idle);
    assert!(!pin.interrupt_armed());
}

#[test]
fn join_edge_refuses_armed_notifier() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let _rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();

    assert!(matches!(pin.join_edge(), Err(PinError::AlreadyArmed(17))));
}

#[test]
fn rearm_after_disarm() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let first = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();
    pin.disarm_edge().unwrap();

    let mut rx = pin.arm_edge(EdgeMode::Rising, 4, POLL_TIMEOUT).unwrap();
    drop(first);

    backend.set_value(17, 1);
    let event = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("event after rearm");
    assert_eq!(event.transition(), Some(transition(0, 1)));
}

#[test]
fn dropped_receiver_stops_notifier() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();
    drop(rx);

    backend.set_value(17, 1);
    assert!(wait_for_edge_state(&pin, EdgeState::Idle, DELIVERY_TIMEOUT));
    assert!(matches!(pin.disarm_edge(), Err(PinError::NotArmed(17))));
}

#[test]
fn failed_reread_is_reported_in_band() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let mut rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();

    backend.inject_fault(MockOp::Read);
    backend.set_value(17, 1);
    let event = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("error event");
    assert!(matches!(
        event.error(),
        Some(PinError::Io {
            pin: 17,
            op: "read value",
            ..
        })
    ));

    backend.set_value(17, 0);
    let event = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("event after failure");
    assert_eq!(event.transition(), Some(transition(1, 0)));
}

#[test]
fn failed_wait_is_reported_in_band() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let mut rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();

    backend.inject_fault(MockOp::Wait);
    let event = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("poll error event");
    assert!(matches!(event.error(), Some(PinError::Poll { pin: 17, .. })));

    backend.set_value(17, 1);
    let event = recv_within(&mut rx, DELIVERY_TIMEOUT).expect("event after poll failure");
    assert_eq!(event.transition(), Some(transition(0, 1)));
}

#[test]
fn open_failure_aborts_arming() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);

    backend.inject_fault(MockOp::Open);
    match pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT) {
        Err(PinError::Io { op, .. }) => assert_eq!(op, "open value source"),
        other => panic!("expected open failure, got {other:?}"),
    }
    assert_eq!(pin.edge_state(), EdgeState::Idle);

    let _rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();
}

#[test]
fn edge_write_failure_aborts_arming() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);

    backend.inject_fault(MockOp::Edge);
    match pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT) {
        Err(PinError::Io { op, .. }) => assert_eq!(op, "set edge"),
        other => panic!("expected edge failure, got {other:?}"),
    }
    assert!(!pin.interrupt_armed());
    assert_eq!(backend.edge(17), None);
}

#[tokio::test]
async fn async_consumer_receives_events() {
    let backend = mock_backend();
    let pin = input_pin(&backend, 17);
    let mut rx = pin.arm_edge(EdgeMode::Both, 4, POLL_TIMEOUT).unwrap();

    backend.set_value(17, 1);
    let event = tokio::time::timeout(DELIVERY_TIMEOUT, rx.recv())
        .await
        .expect("event before timeout")
        .expect("channel open");
    assert_eq!(event.transition(), Some(transition(0, 1)));

    pin.disarm_edge().unwrap();
    pin.close().unwrap();
}
