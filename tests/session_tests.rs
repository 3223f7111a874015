//! Integration tests for the device session lifecycle

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use softcam::{BridgeError, DeviceSession, LifecycleState, PixelFormat, WaitTimeout};

#[test]
fn test_create_rejects_invalid_format() {
    let cases = [
        (0, 480, 30.0),
        (640, -1, 30.0),
        (640, 480, 0.0),
        (640, 480, -2.0),
    ];
    for (width, height, fps) in cases {
        let result = DeviceSession::create(width, height, fps);
        assert!(
            matches!(result, Err(BridgeError::InvalidFormat { .. })),
            "{}x{}@{} should be rejected",
            width,
            height,
            fps
        );
    }
}

#[test]
fn test_push_size_mismatch() {
    let session = DeviceSession::create_with_format(4, 4, 30.0, PixelFormat::Rgb24).unwrap();
    let expected = 4 * 4 * 3;

    for len in [0, expected - 1, expected + 1] {
        match session.push(&vec![0u8; len]) {
            Err(BridgeError::SizeMismatch { expected: e, actual }) => {
                assert_eq!(e, expected);
                assert_eq!(actual, len);
            }
            other => panic!("expected SizeMismatch, got {:?}", other),
        }
    }
    assert!(session.load().is_none(), "rejected pushes must not be stored");
}

#[test]
fn test_thirty_two_bit_format_size() {
    let session = DeviceSession::create_with_format(4, 4, 30.0, PixelFormat::Bgra32).unwrap();
    assert_eq!(session.frame_size(), 64);
    assert!(session.push(&[1u8; 64]).is_ok());
    assert!(session.push(&[1u8; 48]).is_err());
}

#[test]
fn test_example_scenario() {
    let session = DeviceSession::create(640, 480, 30.0).unwrap();
    let size = 640 * 480 * 3;

    session.push(&vec![0u8; size]).unwrap();
    let first = session.load().unwrap();
    assert_eq!(first.sequence(), 1);
    assert!(first.data.iter().all(|b| *b == 0));

    session.push(&vec![0xFFu8; size]).unwrap();
    for _ in 0..3 {
        let frame = session.load().unwrap();
        assert_eq!(frame.sequence(), 2);
        assert!(frame.data.iter().all(|b| *b == 0xFF));
    }
    assert_eq!(first.sequence(), 1, "earlier snapshot stays intact");
}

#[test]
fn test_last_writer_wins() {
    let session = DeviceSession::create(8, 8, 60.0).unwrap();
    for n in 1..=10u8 {
        session.push(&[n; 8 * 8 * 3]).unwrap();
    }
    let frame = session.load().unwrap();
    assert_eq!(frame.sequence(), 10);
    assert!(frame.data.iter().all(|b| *b == 10));

    let stats = session.stats();
    assert_eq!(stats.stored, 10);
    assert_eq!(stats.dropped, 9);
}

#[test]
fn test_frame_metadata_matches_format() {
    let session = DeviceSession::create_with_format(6, 2, 30.0, PixelFormat::Rgba32).unwrap();
    session.push(&[0u8; 48]).unwrap();
    let frame = session.load().unwrap();
    assert_eq!(frame.meta.width, 6);
    assert_eq!(frame.meta.height, 2);
    assert_eq!(frame.meta.stride, 24);
    assert_eq!(frame.meta.format, PixelFormat::Rgba32);
}

#[test]
fn test_poll_without_consumer_returns_immediately() {
    let session = DeviceSession::create(4, 4, 30.0).unwrap();
    let start = Instant::now();
    assert!(!session.wait_for_connection(WaitTimeout::Poll));
    assert!(!session.wait_for_connection(Duration::ZERO));
    assert!(!session.wait_for_connection(WaitTimeout::from_secs_f32(-1.0)));
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_wait_times_out_without_consumer() {
    let session = DeviceSession::create(4, 4, 30.0).unwrap();
    let start = Instant::now();
    assert!(!session.wait_for_connection(Duration::from_millis(50)));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(2));
}

#[test]
fn test_wait_returns_when_consumer_attaches() {
    let session = DeviceSession::create(4, 4, 30.0).unwrap();
    let consumer = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            session.on_consumer_attach().unwrap();
        })
    };

    let start = Instant::now();
    assert!(session.wait_for_connection(Duration::from_secs(10)));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(session.is_connected());
    consumer.join().unwrap();
}

#[test]
fn test_destroy_wakes_infinite_waiter() {
    let session = DeviceSession::create(4, 4, 30.0).unwrap();
    let waiter = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            let start = Instant::now();
            let connected = session.wait_for_connection(WaitTimeout::Infinite);
            (connected, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(session.destroy());

    let (connected, waited) = waiter.join().unwrap();
    assert!(!connected);
    assert!(waited < Duration::from_secs(5));
}

#[test]
fn test_destroyed_session_rejects_calls() {
    let session = DeviceSession::create(4, 4, 30.0).unwrap();
    session.push(&[0u8; 48]).unwrap();
    session.destroy();

    assert_eq!(session.state(), LifecycleState::Destroyed);
    assert!(matches!(session.push(&[0u8; 48]), Err(BridgeError::InvalidHandle)));
    // Wrong size after destroy still reports the handle problem
    assert!(matches!(session.push(&[0u8; 3]), Err(BridgeError::InvalidHandle)));
    assert!(!session.wait_for_connection(Duration::from_secs(10)));
}

#[test]
fn test_detach_then_wait() {
    let session = DeviceSession::create(4, 4, 30.0).unwrap();
    session.on_consumer_attach().unwrap();
    assert!(session.wait_for_connection(WaitTimeout::Poll));
    session.on_consumer_detach();
    assert!(!session.wait_for_connection(WaitTimeout::Poll));

    session.on_consumer_attach().unwrap();
    assert!(session.wait_for_connection(WaitTimeout::Poll));
    assert_eq!(session.connection_epoch(), 2);
}
