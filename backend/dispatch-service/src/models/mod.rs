pub mod campaign;
pub mod contact;
pub mod conversation;
pub mod message;

pub use campaign::{Campaign, CampaignStatus};
pub use contact::Contact;
pub use conversation::Conversation;
pub use message::{Message, MessageDirection, MessageStatus, MessageType, NewMessage};
