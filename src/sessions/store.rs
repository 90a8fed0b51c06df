use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::storage::LocalStorage;

pub const STORAGE_CHAT_KEY: &str = "chats-key";
pub const MAX_CHAT_NAME_LENGTH: usize = 30;
pub const DEFAULT_CHAT_NAME: &str = "Untitled chat";

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Ai,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    pub timestamp: String,
}

impl SessionMessage {
    pub fn user(content: &str) -> Self {
        Self {
            kind: MessageType::User,
            content: content.to_string(),
            timestamp: now_iso(),
        }
    }

    /// Assistant message. An empty one is the placeholder that a
    /// streaming response is written into.
    pub fn ai(content: &str) -> Self {
        Self {
            kind: MessageType::Ai,
            content: content.to_string(),
            timestamp: now_iso(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub messages: Vec<SessionMessage>,
    pub created_at: String,
    pub name: String,
    pub system_role: String,
}

impl Chat {
    fn created_at_millis(&self) -> i64 {
        DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(i64::MIN)
    }
}

/// Chat sessions persisted under a single storage key, with one of them
/// selected as the current session.
///
/// There is always a current session: opening an empty store or removing
/// the last session creates a fresh one.
#[derive(Debug)]
pub struct SessionStore {
    storage: LocalStorage,
    chats: BTreeMap<String, Chat>,
    current_id: String,
    default_system_role: String,
    // Highest id handed out so far. New ids are strictly greater, so an id
    // is never reused after its session is removed.
    last_issued: i64,
}

impl SessionStore {
    /// Load sessions from `storage` and select the most recently created
    /// one. Entries that do not look like a chat are dropped.
    pub fn open(storage: LocalStorage, default_system_role: &str) -> Result<Self> {
        let raw = storage.get::<BTreeMap<String, Value>>(STORAGE_CHAT_KEY, BTreeMap::new());

        let mut chats = BTreeMap::new();
        for (id, value) in raw {
            match serde_json::from_value::<Chat>(value) {
                Ok(chat) => {
                    chats.insert(id, chat);
                }
                Err(e) => tracing::warn!("Skipping invalid chat {}: {}", id, e),
            }
        }

        let last_issued = chats
            .keys()
            .filter_map(|id| id.parse::<i64>().ok())
            .max()
            .unwrap_or(0);

        let mut store = Self {
            storage,
            chats,
            current_id: String::new(),
            default_system_role: default_system_role.to_string(),
            last_issued,
        };

        match store.most_recent_id() {
            Some(id) => store.current_id = id,
            None => {
                store.create_new_chat(None)?;
            }
        }
        Ok(store)
    }

    fn most_recent_id(&self) -> Option<String> {
        self.chats
            .iter()
            .max_by_key(|(_, chat)| chat.created_at_millis())
            .map(|(id, _)| id.clone())
    }

    /// Write every session to storage.
    pub fn save(&self) -> Result<()> {
        self.storage.set(STORAGE_CHAT_KEY, &self.chats)
    }

    fn current_mut(&mut self) -> Option<&mut Chat> {
        self.chats.get_mut(&self.current_id)
    }

    /// Start an empty session and make it current. Returns its id.
    pub fn create_new_chat(&mut self, system_role: Option<&str>) -> Result<String> {
        let mut millis = Utc::now().timestamp_millis().max(self.last_issued + 1);
        while self.chats.contains_key(&millis.to_string()) {
            millis += 1;
        }
        self.last_issued = millis;
        let id = millis.to_string();

        let chat = Chat {
            messages: Vec::new(),
            created_at: now_iso(),
            name: DEFAULT_CHAT_NAME.to_string(),
            system_role: system_role
                .filter(|role| !role.trim().is_empty())
                .unwrap_or(self.default_system_role.as_str())
                .to_string(),
        };
        self.chats.insert(id.clone(), chat);
        self.current_id = id.clone();
        self.save()?;
        Ok(id)
    }

    /// Delete a session. Removing the current one selects the most recent
    /// remaining session, or creates a new one if none is left.
    pub fn remove_chat(&mut self, id: &str) -> Result<bool> {
        if self.chats.remove(id).is_none() {
            return Ok(false);
        }

        if id == self.current_id {
            match self.most_recent_id() {
                Some(next) => self.current_id = next,
                None => {
                    self.create_new_chat(None)?;
                    return Ok(true);
                }
            }
        }
        self.save()?;
        Ok(true)
    }

    /// Append to the current session. The first message also names it.
    pub fn add_message(&mut self, message: SessionMessage) -> Result<()> {
        let Some(chat) = self.current_mut() else {
            return Ok(());
        };
        if chat.messages.is_empty() {
            chat.name = message.content.chars().take(MAX_CHAT_NAME_LENGTH).collect();
        }
        chat.messages.push(message);
        self.save()
    }

    /// Replace the content of the current session's last message in
    /// memory only. Returns false when the session has no messages.
    pub fn set_last_message(&mut self, content: &str) -> bool {
        let Some(last) = self.current_mut().and_then(|chat| chat.messages.last_mut()) else {
            return false;
        };
        last.content = content.to_string();
        true
    }

    /// Replace the content of the current session's last message and save.
    /// Does nothing when the session has no messages.
    pub fn update_last_message(&mut self, content: &str) -> Result<()> {
        if self.set_last_message(content) {
            self.save()?;
        }
        Ok(())
    }

    /// Keep messages up to and including `index`.
    pub fn truncate_messages_to(&mut self, index: usize) -> Result<()> {
        let Some(chat) = self.current_mut() else {
            return Ok(());
        };
        chat.messages.truncate(index + 1);
        self.save()
    }

    pub fn set_current(&mut self, id: &str) -> Result<()> {
        if !self.chats.contains_key(id) {
            bail!("No chat with id {}", id);
        }
        self.current_id = id.to_string();
        Ok(())
    }

    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    pub fn current(&self) -> Option<&Chat> {
        self.chats.get(&self.current_id)
    }

    /// All sessions, most recently created first.
    pub fn list(&self) -> Vec<(&str, &Chat)> {
        let mut chats: Vec<_> = self.chats.iter().map(|(id, c)| (id.as_str(), c)).collect();
        chats.sort_by_key(|(_, chat)| std::cmp::Reverse(chat.created_at_millis()));
        chats
    }
}
