//! Local persistence of chat sessions for the terminal client.

mod storage;
mod store;

pub use storage::LocalStorage;
pub use store::{
    Chat, DEFAULT_CHAT_NAME, MAX_CHAT_NAME_LENGTH, MessageType, STORAGE_CHAT_KEY, SessionMessage,
    SessionStore,
};
