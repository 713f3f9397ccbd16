// Message Tests - delivery status and tentative echoes

use crate::protocol::{ChatMessage, Id, UserSummary};
use crate::store::{DeliveryStatus, Message};
use crate::tests::support::{chat_message, viewer};
use uuid::Uuid;

#[test]
fn test_delivery_status_ordering() {
    assert!(DeliveryStatus::Sent < DeliveryStatus::Delivered);
    assert!(DeliveryStatus::Delivered < DeliveryStatus::Seen);
    assert_eq!(DeliveryStatus::default(), DeliveryStatus::Sent);
}

#[test]
fn test_status_never_regresses() {
    let mut message = Message::from_wire(
        chat_message(1, 3, viewer(), "hello"),
        DeliveryStatus::Sent,
    );

    assert!(message.advance_status(DeliveryStatus::Seen));
    assert!(message.is_read);
    assert!(!message.advance_status(DeliveryStatus::Delivered));
    assert!(!message.advance_status(DeliveryStatus::Sent));
    assert_eq!(message.status, DeliveryStatus::Seen);
}

#[test]
fn test_from_wire_respects_floor() {
    let mut wire = chat_message(1, 3, UserSummary::new(9, "tutor"), "hi");
    wire.status = Some(DeliveryStatus::Sent);

    let message = Message::from_wire(wire.clone(), DeliveryStatus::Delivered);
    assert_eq!(message.status, DeliveryStatus::Delivered);

    wire.status = Some(DeliveryStatus::Seen);
    let message = Message::from_wire(wire, DeliveryStatus::Delivered);
    assert_eq!(message.status, DeliveryStatus::Seen);
    assert!(message.is_read);
}

#[test]
fn test_confirm_fills_in_server_fields() {
    let client_id = Uuid::new_v4();
    let mut message = Message::tentative(client_id, Id::from(3), viewer(), "Hi".to_string());
    assert!(message.is_tentative());
    assert_eq!(message.status_indicator(), "✓");

    let echo: ChatMessage = chat_message(101, 3, viewer(), "Hi");
    message.confirm(echo);

    assert!(!message.is_tentative());
    assert!(message.matches_id(&Id::from("101")));
    assert_eq!(message.client_id, Some(client_id));
    assert_eq!(message.status, DeliveryStatus::Sent);
}

#[test]
fn test_status_indicator_double_check() {
    let mut message = Message::from_wire(chat_message(1, 3, viewer(), "x"), DeliveryStatus::Sent);
    message.advance_status(DeliveryStatus::Delivered);
    assert_eq!(message.status_indicator(), "✓✓");
}
