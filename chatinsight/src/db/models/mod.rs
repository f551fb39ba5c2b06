//! Database record models matching table schemas.
//!
//! - [`sessions`]: conversation sessions and their messages (owned by the chatbot)
//! - [`analyses`]: analysis records written by this service, with token-cost helpers

pub mod analyses;
pub mod sessions;
