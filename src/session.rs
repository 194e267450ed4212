//! Chat session state owned by the caller

use crate::rag::Mode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a chat history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// A conversation: identity, mode and message history.
///
/// The engine reads the mode; the caller records turns once a response
/// stream has been consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    id: Uuid,
    mode: Mode,
    messages: Vec<ChatTurn>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

impl ChatSession {
    pub fn new(mode: Mode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn messages(&self) -> &[ChatTurn] {
        &self.messages
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatTurn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatTurn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    /// Clear the history; id and mode are kept
    pub fn reset(&mut self) {
        self.messages.clear();
    }
}
