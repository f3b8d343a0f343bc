#![deny(unsafe_code)]

//! CodeSphere chat client: direct conversations with the assistant and
//! shared collaboration rooms, both fed by the streaming response assembler.

/// Direct chat: visible conversation state and the submit flow.
pub mod chat;
/// Collaboration rooms with live inserts and `@ai` replies.
pub mod collaboration;
pub mod error;
pub mod notify;
/// Settings persistence.
pub mod settings;

pub use error::{ChatError, ChatResult};
