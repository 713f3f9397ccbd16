// Store Tests - messages, typing indicators and the conversation store

mod message_tests;
mod state_tests;
mod typing_tests;
