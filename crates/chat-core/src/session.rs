//! Session State
//!
//! Identity and bookkeeping for one chat session. Sessions live in memory
//! only and are dropped when the orchestrator that owns them goes away.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Conversation, Role};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat session: its conversation log plus metadata
#[derive(Clone, Debug, Serialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    /// Conversation history
    pub(crate) conversation: Conversation,

    /// Session title (user-set)
    pub title: Option<String>,

    /// Turns completed successfully
    pub turns: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            conversation: Conversation::new(),
            title: None,
            turns: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Read-only view of the log
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Get or generate title
    pub fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            // Generate from first user message
            self.conversation
                .messages()
                .iter()
                .find(|m| m.role() == Role::User)
                .map(|m| {
                    let text = m.text();
                    let preview: String = text.chars().take(50).collect();
                    if text.chars().count() > 50 {
                        format!("{}...", preview)
                    } else {
                        preview
                    }
                })
                .unwrap_or_else(|| format!("Session {}", &self.id.0[..8.min(self.id.0.len())]))
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = Session::new();
        assert!(session.conversation().is_empty());
        assert!(session.title().starts_with("Session "));
    }

    #[test]
    fn test_title_from_first_user_message() {
        let mut session = Session::new();
        session
            .conversation
            .append_user("What's in report.pdf? I need a summary for the meeting tomorrow.")
            .unwrap();
        assert_eq!(
            session.title(),
            "What's in report.pdf? I need a summary for the mee..."
        );

        session.title = Some("Report".into());
        assert_eq!(session.title(), "Report");
    }
}
