use std::time::Duration;

use libmqtt::network::application::mqtt::ack::{Acks, MAX_PATTERN_LEN};
use libmqtt::network::application::mqtt::packet;
use libmqtt::network::error::Error;
use tokio::sync::mpsc;

const TTL: Duration = Duration::from_secs(20);

fn tracker() -> (Acks, mpsc::UnboundedReceiver<Error>) {
    let (failures_tx, failures_rx) = mpsc::unbounded_channel();
    (Acks::new(failures_tx), failures_rx)
}

#[tokio::test(start_paused = true)]
async fn test_push_then_pop_returns_the_registration() {
    let (acks, mut failures) = tracker();
    let suback = packet::encode_suback(0x1234);

    acks.push(TTL, &suback).unwrap();
    assert!(acks.contains(&suback));
    assert_eq!(acks.len(), 1);

    let ack = acks.pop(&suback).unwrap();
    assert_eq!(ack.ttl, TTL);
    assert_eq!(&ack.pattern[..], &suback[..]);
    assert!(ack.is_cancelled());
    assert!(acks.is_empty());

    // the cancelled countdown never reports
    tokio::time::sleep(TTL * 2).await;
    assert!(failures.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pop_without_registration_is_none() {
    let (acks, _failures) = tracker();
    assert!(acks.pop(&packet::encode_pingresp()).is_none());

    acks.push(TTL, &packet::encode_suback(1)).unwrap();
    assert!(acks.pop(&packet::encode_suback(2)).is_none());
    assert!(acks.pop(&packet::encode_pingresp()).is_none());
    assert_eq!(acks.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pop_twice_matches_once() {
    let (acks, _failures) = tracker();
    let pingresp = packet::encode_pingresp();
    acks.push(TTL, &pingresp).unwrap();
    assert!(acks.pop(&pingresp).is_some());
    assert!(acks.pop(&pingresp).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_expiry_reports_exactly_once() {
    let (acks, mut failures) = tracker();
    let start = tokio::time::Instant::now();
    acks.push(TTL, &packet::encode_pingresp()).unwrap();

    let err = failures.recv().await.unwrap();
    assert!(start.elapsed() >= TTL);
    match err {
        Error::AckExpired { pattern } => assert_eq!(pattern, "d000"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(acks.is_empty());

    tokio::time::sleep(TTL * 3).await;
    assert!(failures.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_expiry_message_names_the_pattern() {
    let (acks, mut failures) = tracker();
    acks.push(Duration::from_secs(30), &packet::encode_suback(0x0102))
        .unwrap();
    let err = failures.recv().await.unwrap();
    assert_eq!(err.to_string(), "9003010200 ack ttl expired");
}

#[tokio::test(start_paused = true)]
async fn test_late_pop_after_expiry_finds_nothing() {
    let (acks, mut failures) = tracker();
    let pingresp = packet::encode_pingresp();
    acks.push(TTL, &pingresp).unwrap();

    assert!(failures.recv().await.is_some());
    assert!(acks.pop(&pingresp).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_push_keeps_the_first_deadline() {
    let (acks, mut failures) = tracker();
    let pingresp = packet::encode_pingresp();
    let start = tokio::time::Instant::now();

    acks.push(TTL, &pingresp).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    let err = acks.push(TTL, &pingresp).unwrap_err();
    assert!(matches!(err, Error::AckPending { .. }));

    // expires at the first registration's deadline, not the second's
    assert!(matches!(failures.recv().await, Some(Error::AckExpired { .. })));
    assert!(start.elapsed() < TTL + Duration::from_secs(10));
    tokio::time::sleep(TTL * 2).await;
    assert!(failures.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pattern_length_is_bounded() {
    let (acks, _failures) = tracker();
    let long = [0u8; MAX_PATTERN_LEN + 1];
    assert!(matches!(
        acks.push(TTL, &long),
        Err(Error::PacketTooLarge(9))
    ));
    assert!(acks.pop(&long).is_none());
    assert!(!acks.contains(&long));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_stops_every_countdown() {
    let (acks, mut failures) = tracker();
    acks.push(TTL, &packet::encode_pingresp()).unwrap();
    for id in 1..=3 {
        acks.push(TTL, &packet::encode_suback(id)).unwrap();
    }
    assert_eq!(acks.len(), 4);

    acks.cancel_all();
    assert!(acks.is_empty());
    tokio::time::sleep(TTL * 2).await;
    assert!(failures.try_recv().is_err());
}
