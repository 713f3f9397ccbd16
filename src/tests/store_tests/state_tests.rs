// ConversationStore Tests - reconciliation of protocol events

use crate::protocol::{ChatMessage, ConversationSummary, Id, UserSummary};
use crate::store::{ConversationStore, DeliveryStatus};
use crate::tests::support::{chat_message, conversation_with, viewer};
use std::time::Duration;
use tokio::time::Instant;

fn tutor() -> UserSummary {
    UserSummary::new(9, "tutor")
}

fn store() -> ConversationStore {
    ConversationStore::new(viewer(), Duration::from_secs(2))
}

fn store_with_open_conversation() -> ConversationStore {
    let mut store = store();
    store.replace_conversations(vec![conversation_with(3, tutor())]);
    assert!(store.select(&Id::from(3)));
    store
}

#[test]
fn test_replace_conversations_clears_loading() {
    let mut store = store();
    store.set_loading(true);

    store.replace_conversations(vec![
        conversation_with(3, tutor()),
        conversation_with(4, UserSummary::new(10, "other")),
    ]);

    assert!(!store.is_loading());
    assert_eq!(store.conversations().len(), 2);
    assert_eq!(
        store.conversation(&Id::from(3)).and_then(|c| c.partner(&Id::from(7))),
        Some(&tutor())
    );
}

#[test]
fn test_remote_message_in_closed_conversation_marks_unread() {
    let mut store = store();
    store.replace_conversations(vec![conversation_with(3, tutor())]);

    let outcome = store.apply_incoming(chat_message(50, 3, tutor(), "Are you free?"));

    assert!(!outcome.appended);
    assert!(!outcome.acknowledge);
    let conversation = store.conversation(&Id::from(3)).expect("Conversation missing");
    assert!(conversation.has_unread);
    assert_eq!(
        conversation.last_message.as_ref().map(|m| m.content.as_str()),
        Some("Are you free?")
    );
    assert!(store.messages().is_empty());
}

#[test]
fn test_remote_message_in_open_conversation_is_appended_and_read() {
    let mut store = store_with_open_conversation();

    let outcome = store.apply_incoming(chat_message(50, 3, tutor(), "Hello"));

    assert!(outcome.appended);
    assert!(outcome.acknowledge);
    assert!(!store.conversation(&Id::from(3)).expect("Conversation missing").has_unread);
    assert_eq!(store.messages().len(), 1);
    assert_eq!(store.messages()[0].status, DeliveryStatus::Delivered);
}

#[test]
fn test_duplicate_remote_message_is_not_appended_twice() {
    let mut store = store_with_open_conversation();

    store.apply_incoming(chat_message(50, 3, tutor(), "Hello"));
    let outcome = store.apply_incoming(chat_message(50, 3, tutor(), "Hello"));

    assert!(!outcome.appended);
    assert!(!outcome.acknowledge);
    assert_eq!(store.messages().len(), 1);
}

#[test]
fn test_message_for_unknown_conversation_is_synthesized() {
    let mut store = store();
    store.replace_conversations(vec![conversation_with(3, tutor())]);

    let stranger = UserSummary::new(12, "new_student");
    let outcome = store.apply_incoming(chat_message(60, 8, stranger.clone(), "Hi there"));

    assert!(outcome.new_conversation);
    let first = &store.conversations()[0];
    assert_eq!(first.id, Id::from(8));
    assert!(first.has_unread);
    assert_eq!(first.partner(&Id::from(7)), Some(&stranger));
    assert_eq!(first.participants.len(), 2);
}

#[test]
fn test_own_message_elsewhere_does_not_mark_unread() {
    let mut store = store();

    store.apply_incoming(chat_message(61, 8, viewer(), "Sent from my phone"));

    assert!(!store.conversations()[0].has_unread);
}

#[test]
fn test_offline_hi_scenario() {
    let mut store = store_with_open_conversation();

    let (conversation_id, client_id) = store
        .push_tentative("Hi".to_string())
        .expect("No open conversation");
    assert_eq!(conversation_id, Id::from(3));
    assert_eq!(store.messages()[0].status, DeliveryStatus::Sent);

    // Echo without a status
    let mut echo: ChatMessage = chat_message(101, 3, viewer(), "Hi");
    echo.client_id = Some(client_id);
    let outcome = store.apply_incoming(echo);

    assert!(!outcome.appended);
    assert!(!outcome.acknowledge);
    assert_eq!(store.messages().len(), 1);
    let message = store.message(&Id::from(101)).expect("Echo not reconciled");
    assert_eq!(message.status, DeliveryStatus::Sent);

    assert!(store.apply_status(&Id::from("101"), DeliveryStatus::Seen));
    assert!(!store.apply_status(&Id::from(101), DeliveryStatus::Delivered));

    let message = store.message(&Id::from(101)).expect("Message missing");
    assert_eq!(message.status, DeliveryStatus::Seen);
    assert!(message.is_read);
}

#[test]
fn test_echo_without_client_id_matches_by_content() {
    let mut store = store_with_open_conversation();
    store.push_tentative("one".to_string());
    store.push_tentative("two".to_string());

    store.apply_incoming(chat_message(201, 3, viewer(), "two"));

    assert_eq!(store.messages().len(), 2);
    assert!(store.messages()[0].is_tentative());
    assert!(store.messages()[1].matches_id(&Id::from(201)));
}

#[test]
fn test_own_echo_without_tentative_is_appended_as_sent() {
    let mut store = store_with_open_conversation();

    let outcome = store.apply_incoming(chat_message(300, 3, viewer(), "from another tab"));

    assert!(outcome.appended);
    assert_eq!(store.messages()[0].status, DeliveryStatus::Sent);
}

#[test]
fn test_status_for_unknown_message_is_ignored() {
    let mut store = store_with_open_conversation();

    assert!(!store.apply_status(&Id::from(999), DeliveryStatus::Seen));
    assert!(store.messages().is_empty());
}

#[test]
fn test_history_replaces_messages_and_keeps_tentative() {
    let mut store = store_with_open_conversation();
    store.push_tentative("pending".to_string());

    let applied = store.replace_messages(
        Some(&Id::from(3)),
        vec![
            chat_message(1, 3, tutor(), "first"),
            chat_message(2, 3, viewer(), "second"),
        ],
    );

    assert!(applied);
    let contents: Vec<&str> = store.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "pending"]);
    assert_eq!(store.messages()[0].status, DeliveryStatus::Delivered);
    assert_eq!(store.messages()[1].status, DeliveryStatus::Sent);
}

#[test]
fn test_history_never_lowers_known_status() {
    let mut store = store_with_open_conversation();
    let mut sent = chat_message(101, 3, viewer(), "Hi");
    sent.status = Some(DeliveryStatus::Sent);
    store.replace_messages(Some(&Id::from(3)), vec![sent]);
    assert!(store.apply_status(&Id::from(101), DeliveryStatus::Seen));

    // A reply that was already in flight still says delivered
    let mut stale = chat_message(101, 3, viewer(), "Hi");
    stale.status = Some(DeliveryStatus::Delivered);
    store.replace_messages(Some(&Id::from(3)), vec![stale]);

    let message = store.message(&Id::from(101)).expect("Message missing");
    assert_eq!(message.status, DeliveryStatus::Seen);
    assert!(message.is_read);
}

#[test]
fn test_stale_history_is_ignored() {
    let mut store = store_with_open_conversation();

    let applied = store.replace_messages(
        Some(&Id::from(4)),
        vec![chat_message(1, 4, tutor(), "wrong conversation")],
    );

    assert!(!applied);
    assert!(store.messages().is_empty());
}

#[test]
fn test_read_event_clears_unread() {
    let mut store = store();
    let mut summary = conversation_with(3, tutor());
    summary.has_unread = true;
    store.replace_conversations(vec![summary]);

    store.mark_read(&Id::from(3));

    assert!(!store.conversation(&Id::from(3)).expect("Conversation missing").has_unread);
}

#[test]
fn test_conversation_started_opens_and_inserts() {
    let mut store = store();
    store.replace_conversations(vec![conversation_with(3, tutor())]);
    store.set_search_results(vec![UserSummary::new(12, "new_tutor")]);

    let summary: ConversationSummary = conversation_with(8, UserSummary::new(12, "new_tutor"));
    let id = store.conversation_started(summary);

    assert_eq!(id, Id::from(8));
    assert_eq!(store.active_id(), Some(&Id::from(8)));
    assert_eq!(store.conversations()[0].id, Id::from(8));
    assert_eq!(store.conversations().len(), 2);
    assert!(store.search_results().is_empty());

    // Starting it again does not duplicate it
    store.conversation_started(conversation_with(8, UserSummary::new(12, "new_tutor")));
    assert_eq!(store.conversations().len(), 2);
}

#[test]
fn test_partner_typing_follows_open_conversation() {
    let mut store = store_with_open_conversation();
    let now = Instant::now();

    store.set_typing(Id::from(9), true, now);

    assert!(store.partner_typing(now + Duration::from_secs(1)));
    assert!(!store.partner_typing(now + Duration::from_secs(2)));

    store.clear_active();
    assert!(!store.partner_typing(now));
}

#[test]
fn test_push_tentative_requires_open_conversation() {
    let mut store = store();
    assert!(store.push_tentative("nobody".to_string()).is_none());
}
