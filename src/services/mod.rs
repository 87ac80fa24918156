pub mod conversation_service;
pub mod delivery;
pub mod message_service;

pub use conversation_service::ConversationService;
pub use delivery::DeliveryCoordinator;
pub use message_service::{ForwardOutcome, MessageService, NewMessage, SearchResults, SearchScope};
