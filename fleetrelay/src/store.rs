// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// Chat persistence
//
// Chats and their messages, always looked up through the owning user so one
// user can never read or write another user's chat.

use crate::identity::UserId;
use crate::message::Role;
use crate::stream::ui_tag::UiSignal;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

/// Chat titles are the first prompt, cut to this many characters.
pub const TITLE_MAX_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    /// Wrapped UI signals recovered from assistant content.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ui_signals: Vec<UiSignal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<StoredMessage>,
}

/// A chat without its messages, as listed for its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl From<&Chat> for ChatSummary {
    fn from(chat: &Chat) -> Self {
        Self {
            id: chat.id.clone(),
            title: chat.title.clone(),
            user_id: chat.user_id.clone(),
            created_at: chat.created_at,
        }
    }
}

/// A message about to be stored. A missing id is generated.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Option<String>,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub ui_signals: Vec<UiSignal>,
}

impl NewMessage {
    pub fn new(chat_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            ui_signals: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("chat not found")]
    ChatNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("message {0} already exists")]
    DuplicateMessage(String),
}

// ---------------------------------------------------------------------------
// ChatStore trait
// ---------------------------------------------------------------------------

/// Chat persistence, scoped by owner.
///
/// Implementations must be thread-safe; handlers share one `Arc<dyn ChatStore>`.
/// A chat owned by someone else is reported exactly like a missing one.
pub trait ChatStore: Send + Sync {
    /// Create a chat titled after `prompt` with `prompt` as its first user message.
    fn create_chat(&self, user_id: &UserId, prompt: &str) -> Chat;

    fn find_chat(&self, chat_id: &str, user_id: &UserId) -> Option<Chat>;

    /// Every chat owned by `user_id`, newest first.
    fn list_chats(&self, user_id: &UserId) -> Vec<ChatSummary>;

    fn delete_chat(&self, chat_id: &str, user_id: &UserId) -> Option<Chat>;

    fn insert_message(&self, user_id: &UserId, message: NewMessage) -> Result<StoredMessage, StoreError>;

    fn find_message(&self, chat_id: &str, message_id: &str, user_id: &UserId) -> Result<StoredMessage, StoreError>;

    fn update_message(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &UserId,
        content: String,
    ) -> Result<StoredMessage, StoreError>;
}

// ---------------------------------------------------------------------------
// InMemoryChatStore
// ---------------------------------------------------------------------------

/// In-memory chat store backed by `DashMap`.
///
/// Suitable for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryChatStore {
    chats: DashMap<String, Chat>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChatStore for InMemoryChatStore {
    fn create_chat(&self, user_id: &UserId, prompt: &str) -> Chat {
        let now = Utc::now();
        let id = new_id();
        let chat = Chat {
            id: id.clone(),
            title: prompt.chars().take(TITLE_MAX_CHARS).collect(),
            user_id: user_id.clone(),
            created_at: now,
            messages: vec![StoredMessage {
                id: new_id(),
                chat_id: id.clone(),
                role: Role::User,
                content: prompt.to_string(),
                ui_signals: Vec::new(),
                created_at: now,
            }],
        };
        self.chats.insert(id, chat.clone());
        chat
    }

    fn find_chat(&self, chat_id: &str, user_id: &UserId) -> Option<Chat> {
        let entry = self.chats.get(chat_id)?;
        (entry.user_id == *user_id).then(|| entry.value().clone())
    }

    fn list_chats(&self, user_id: &UserId) -> Vec<ChatSummary> {
        let mut chats: Vec<ChatSummary> = self
            .chats
            .iter()
            .filter(|entry| entry.user_id == *user_id)
            .map(|entry| ChatSummary::from(entry.value()))
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        chats
    }

    fn delete_chat(&self, chat_id: &str, user_id: &UserId) -> Option<Chat> {
        self.chats
            .remove_if(chat_id, |_, chat| chat.user_id == *user_id)
            .map(|(_, chat)| chat)
    }

    fn insert_message(&self, user_id: &UserId, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let mut chat = self
            .chats
            .get_mut(&message.chat_id)
            .filter(|c| c.user_id == *user_id)
            .ok_or(StoreError::ChatNotFound)?;

        let id = message.id.unwrap_or_else(new_id);
        if chat.messages.iter().any(|m| m.id == id) {
            return Err(StoreError::DuplicateMessage(id));
        }

        let stored = StoredMessage {
            id,
            chat_id: message.chat_id,
            role: message.role,
            content: message.content,
            ui_signals: message.ui_signals,
            created_at: Utc::now(),
        };
        chat.messages.push(stored.clone());
        Ok(stored)
    }

    fn find_message(&self, chat_id: &str, message_id: &str, user_id: &UserId) -> Result<StoredMessage, StoreError> {
        let chat = self.find_chat(chat_id, user_id).ok_or(StoreError::ChatNotFound)?;
        chat.messages
            .into_iter()
            .find(|m| m.id == message_id)
            .ok_or(StoreError::MessageNotFound)
    }

    fn update_message(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &UserId,
        content: String,
    ) -> Result<StoredMessage, StoreError> {
        let mut chat = self
            .chats
            .get_mut(chat_id)
            .filter(|c| c.user_id == *user_id)
            .ok_or(StoreError::ChatNotFound)?;
        let message = chat
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(StoreError::MessageNotFound)?;
        message.content = content;
        Ok(message.clone())
    }
}
