use crate::connection::{
    CloseAction, CloseKind, CloseReason, ConnectDecision, ConnectionManager, ConnectionState,
    RefreshOutcome, SendOutcome,
};
use crate::protocol::{Id, Outbound};
use crate::tests::support::test_config;
use std::time::Duration;

fn manager() -> ConnectionManager {
    ConnectionManager::new(Id::from(7), &test_config())
}

fn open_manager() -> ConnectionManager {
    let mut manager = manager();
    manager.connect(Some("token")).expect("Failed to connect");
    manager.on_open();
    manager
}

fn search(keyword: &str) -> Outbound {
    Outbound::SearchUser {
        keyword: keyword.to_string(),
    }
}

#[test]
fn test_connect_builds_chat_url() {
    let mut manager = manager();

    let decision = manager.connect(Some("abc")).expect("Failed to connect");

    match decision {
        ConnectDecision::Start(url) => {
            assert_eq!(url.as_str(), "ws://chat.test/ws/chat/7/?token=abc");
        }
        other => panic!("Expected Start, got {:?}", other),
    }
    assert_eq!(manager.state(), ConnectionState::Connecting);
}

#[test]
fn test_connect_without_token_stays_idle() {
    let mut manager = manager();

    assert_eq!(
        manager.connect(None).expect("Failed to connect"),
        ConnectDecision::MissingToken
    );
    assert_eq!(
        manager.connect(Some("")).expect("Failed to connect"),
        ConnectDecision::MissingToken
    );
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[test]
fn test_connect_is_idempotent() {
    let mut manager = manager();
    manager.connect(Some("token")).expect("Failed to connect");

    assert_eq!(
        manager.connect(Some("token")).expect("Failed to connect"),
        ConnectDecision::AlreadyActive
    );

    manager.send(search("a"));
    assert_eq!(manager.on_open().len(), 1);

    assert_eq!(
        manager.connect(Some("token")).expect("Failed to connect"),
        ConnectDecision::AlreadyActive
    );
    // A second open report must not flush again
    assert!(manager.on_open().is_empty());
    assert!(manager.is_open());
}

#[test]
fn test_send_queues_until_open_in_fifo_order() {
    let mut manager = manager();

    assert_eq!(manager.send(search("first")), SendOutcome::Queued);
    manager.connect(Some("token")).expect("Failed to connect");
    assert_eq!(manager.send(search("second")), SendOutcome::Queued);
    assert_eq!(manager.send(search("third")), SendOutcome::Queued);
    assert_eq!(manager.queue_len(), 3);

    let flushed = manager.on_open();

    assert_eq!(flushed, vec![search("first"), search("second"), search("third")]);
    assert_eq!(manager.queue_len(), 0);
    assert_eq!(
        manager.send(search("live")),
        SendOutcome::Transmit(search("live"))
    );
}

#[test]
fn test_requeue_front_keeps_submission_order() {
    let mut manager = open_manager();
    manager.on_close(CloseReason::Abnormal(Some(1006)));
    manager.send(search("later"));

    manager.requeue_front(vec![search("a"), search("b")]);

    let queued: Vec<Outbound> = manager.queued().cloned().collect();
    assert_eq!(queued, vec![search("a"), search("b"), search("later")]);
}

#[test]
fn test_backoff_doubles_to_ceiling() {
    let mut manager = open_manager();
    let mut delays = Vec::new();

    for _ in 0..7 {
        match manager.on_close(CloseReason::Abnormal(Some(1006))) {
            CloseAction::Reconnect(delay) => delays.push(delay.as_secs()),
            other => panic!("Expected Reconnect, got {:?}", other),
        }
        manager.connect(Some("token")).expect("Failed to connect");
    }

    assert_eq!(delays, vec![1, 2, 4, 8, 16, 16, 16]);
}

#[test]
fn test_open_resets_backoff() {
    let mut manager = open_manager();
    manager.on_close(CloseReason::Abnormal(None));
    manager.connect(Some("token")).expect("Failed to connect");
    manager.on_close(CloseReason::Abnormal(None));
    assert_eq!(manager.current_delay(), Duration::from_secs(4));

    manager.connect(Some("token")).expect("Failed to connect");
    manager.on_open();

    assert_eq!(manager.current_delay(), Duration::from_secs(1));
}

#[test]
fn test_normal_close_stops_reconnecting() {
    let mut manager = open_manager();

    assert_eq!(manager.on_close(CloseReason::Normal), CloseAction::Stop);
    assert_eq!(
        manager.state(),
        ConnectionState::Closed(CloseKind::Intentional)
    );
    assert_eq!(
        manager.connect(Some("token")).expect("Failed to connect"),
        ConnectDecision::Terminated
    );
}

#[test]
fn test_auth_rejection_refreshes_once() {
    let mut manager = open_manager();

    assert_eq!(
        manager.on_close(CloseReason::AuthRejected),
        CloseAction::RefreshToken
    );
    assert!(manager.token_refresh_attempted());

    // No connect while the refresh is outstanding
    assert_eq!(
        manager.connect(Some("token")).expect("Failed to connect"),
        ConnectDecision::RefreshPending
    );

    assert_eq!(manager.on_refresh_result(true), RefreshOutcome::Reconnect);
    assert!(matches!(
        manager.connect(Some("fresh")).expect("Failed to connect"),
        ConnectDecision::Start(_)
    ));

    // Rejected again before a successful open: give up
    assert_eq!(
        manager.on_close(CloseReason::AuthRejected),
        CloseAction::SessionExpired
    );
}

#[test]
fn test_auth_refresh_does_not_consume_backoff() {
    let mut manager = open_manager();
    manager.on_close(CloseReason::AuthRejected);
    manager.on_refresh_result(true);

    assert_eq!(manager.current_delay(), Duration::from_secs(1));
}

#[test]
fn test_failed_refresh_expires_session() {
    let mut manager = open_manager();
    manager.on_close(CloseReason::AuthRejected);

    assert_eq!(
        manager.on_refresh_result(false),
        RefreshOutcome::SessionExpired
    );
    assert_eq!(
        manager.state(),
        ConnectionState::Closed(CloseKind::Unintentional)
    );
}

#[test]
fn test_refresh_flag_clears_on_open() {
    let mut manager = open_manager();
    manager.on_close(CloseReason::AuthRejected);
    manager.on_refresh_result(true);
    manager.connect(Some("fresh")).expect("Failed to connect");
    manager.on_open();

    assert!(!manager.token_refresh_attempted());
    assert_eq!(
        manager.on_close(CloseReason::AuthRejected),
        CloseAction::RefreshToken
    );
}

#[test]
fn test_intentional_close_is_terminal() {
    let mut manager = manager();
    manager.send(search("queued"));
    manager.connect(Some("token")).expect("Failed to connect");
    manager.on_open();

    assert!(manager.close());
    assert_eq!(manager.queue_len(), 0);
    assert_eq!(manager.send(search("late")), SendOutcome::Dropped);
    assert_eq!(
        manager.on_close(CloseReason::Abnormal(Some(1006))),
        CloseAction::Stop
    );
    assert_eq!(
        manager.connect(Some("token")).expect("Failed to connect"),
        ConnectDecision::Terminated
    );
}

#[test]
fn test_close_discards_queue() {
    let mut manager = manager();
    manager.send(search("a"));
    manager.send(search("b"));

    assert!(!manager.close());
    assert_eq!(manager.queue_len(), 0);
}
