// Typing Tests - expiry and reset behavior

use crate::protocol::Id;
use crate::store::TypingIndicators;
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn test_typing_expires_after_timeout() {
    let mut typing = TypingIndicators::new(Duration::from_secs(2));
    let start = Instant::now();
    let partner = Id::from(9);

    typing.set(partner.clone(), true, start);

    assert!(typing.is_typing(&partner, start + Duration::from_millis(1999)));
    assert!(!typing.is_typing(&partner, start + Duration::from_secs(2)));
    assert_eq!(typing.expire(start + Duration::from_secs(2)), vec![partner.clone()]);
    assert!(typing.next_deadline().is_none());
}

#[test]
fn test_new_signal_resets_deadline() {
    let mut typing = TypingIndicators::new(Duration::from_secs(2));
    let start = Instant::now();
    let partner = Id::from(9);

    typing.set(partner.clone(), true, start);
    typing.set(partner.clone(), true, start + Duration::from_millis(1500));

    assert_eq!(
        typing.next_deadline(),
        Some(start + Duration::from_millis(3500))
    );
    assert!(typing.is_typing(&partner, start + Duration::from_millis(2500)));
    assert!(typing.expire(start + Duration::from_millis(2500)).is_empty());
}

#[test]
fn test_stop_signal_clears_immediately() {
    let mut typing = TypingIndicators::new(Duration::from_secs(2));
    let start = Instant::now();
    let partner = Id::from(9);

    typing.set(partner.clone(), true, start);
    typing.set(partner.clone(), false, start + Duration::from_millis(100));

    assert!(!typing.is_typing(&partner, start + Duration::from_millis(100)));
    assert!(!typing.any(start));
}
