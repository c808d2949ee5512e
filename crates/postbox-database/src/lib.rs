//! SQLite storage for the outbox table.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Schema migrations for the outbox table and its secondary indexes
//! - Row models for the relational projection of an outbox record
//! - Parameterised query functions over any `&Connection`
//!
//! # Example
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let row = db.call(move |conn| queries::get_outbox_row(conn, &id)).await?;
//! ```
//!
//! Only SQL runs inside `db.call()`. Serialization and body encoding happen
//! outside, in the caller.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{is_unique_violation, DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
