//! Database models for conversation sessions and their messages.
//!
//! Both tables are written by the chatbot; this service only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{MessageId, SessionId};

/// A single chat turn.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub content: String,
    /// True when sent by the human user, false when sent by the bot
    pub remote: bool,
    pub created_at: DateTime<Utc>,
}

/// Session row as selected by the eligibility query.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
}

/// A session together with all of its messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}
