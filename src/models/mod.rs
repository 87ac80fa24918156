pub mod conversation;
pub mod message;

pub use conversation::{conversation_id, ConversationSummary};
pub use message::{Message, MessageStatus, MessageType};
