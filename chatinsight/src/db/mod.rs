//! Database layer for data persistence and access.
//!
//! Uses SQLx with PostgreSQL behind small repository structs that borrow a connection:
//!
//! ```text
//! ┌──────────────┐
//! │   PgStore    │  (crate::store - capabilities used by the analysis pipeline)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │ Repositories │  (db::handlers - queries)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │    Models    │  (db::models - database records)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │  PostgreSQL  │
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use chatinsight::db::handlers::Sessions;
//!
//! let mut conn = pool.acquire().await?;
//! let pending = Sessions::new(&mut conn).find_eligible(Some(100)).await?;
//! ```
//!
//! # Migrations
//!
//! Migrations live in `migrations/` and are embedded via [`crate::migrator`]:
//!
//! ```ignore
//! chatinsight::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
