//! The chat layer on top of Comment PDUs.

pub mod chat_config;
pub mod chat_extractor;
pub mod chat_listener;
pub mod chat_message;
pub mod chat_session;
pub mod user_roster;
