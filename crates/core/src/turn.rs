//! Conversation turns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of the rolling dialog history. Optional metadata carries the
/// sources and metrics of assistant turns for the debug surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            at: Utc::now(),
            metadata: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            at: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Render the last `turns` user/assistant exchanges as plain text, newest
/// last. Used as the non-factual conversation lane of the grounded prompt.
pub fn conversation_snippet(history: &[Turn], turns: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut users = 0usize;
    let mut assistants = 0usize;
    for turn in history.iter().rev() {
        match turn.role {
            TurnRole::User if users < turns => {
                lines.push(format!("User: {}", turn.text));
                users += 1;
            }
            TurnRole::Assistant if assistants < turns => {
                lines.push(format!("Assistant: {}", turn.text));
                assistants += 1;
            }
            _ => {}
        }
        if users >= turns && assistants >= turns {
            break;
        }
    }
    lines.reverse();
    lines.join("\n")
}
