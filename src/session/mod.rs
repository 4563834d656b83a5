pub mod autosave;
pub mod manager;
pub mod types;

pub use autosave::Autosaver;
pub use manager::{ChatContext, SessionManager};
pub use types::{
    ImageAttachment, Message, MessageRole, Session, SessionContent, SessionSettings,
};
