//! Repository implementations for database access.
//!
//! - [`Sessions`]: selection of sessions waiting for analysis, with their messages
//! - [`Analyses`]: bulk insertion and lookup of analysis records
//!
//! Repositories borrow a `PgConnection` (or a transaction, which derefs to one) for their
//! lifetime, so a caller decides the transaction boundary.

pub mod analyses;
pub mod sessions;

pub use analyses::Analyses;
pub use sessions::Sessions;
