pub mod conversation;
pub mod session;

pub use conversation::{ConversationView, MessageStatus, VisibleMessage};
pub use session::{ChatSession, ConversationCommitter};
