//! Common type definitions.
//!
//! Entity IDs are `BIGSERIAL` keys owned by the chatbot's schema, wrapped in type aliases so
//! signatures say which table they point at:
//!
//! - [`SessionId`]: Conversation session identifier
//! - [`MessageId`]: Message identifier
//! - [`AnalysisId`]: Analysis record identifier

pub type SessionId = i64;
pub type MessageId = i64;
pub type AnalysisId = i64;
