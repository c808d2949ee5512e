//! Transactional outbox engine.
//!
//! This crate provides:
//! - Outbox: facade for add, delete, mark-dispatched and paged queries
//! - QueryEngine: shard fan-out and resumable pagination
//! - OutboxStore: backend seam, with in-memory and SQLite adapters
//! - TransactionEnlistment: enlist outbox writes in a caller's transaction
//!
//! Delivery is at-least-once. Consumers must tolerate duplicates.

mod cursor;
mod error;
mod memory;
mod model;
mod outbox;
mod query;
mod shard;
mod sqlite;
mod store;
mod sweeper;
mod token;

#[cfg(test)]
mod tests;

pub use cursor::{AllTopicsQueryContext, TopicQueryContext, TopicRegistry};
pub use error::{OutboxError, OutboxResult};
pub use memory::MemoryStore;
pub use model::{
    BodyEncoding, HeaderValue, Headers, Message, MessageBody, MessageType, OutboxMessage, Page,
};
pub use outbox::Outbox;
pub use query::QueryEngine;
pub use shard::ShardAssigner;
pub use sqlite::{SqliteEnlistment, SqliteOutboxStore};
pub use store::{
    DispatchedQuery, InsertOutcome, OutboxStore, ShardQuery, StorePage, TransactionEnlistment,
    WriteBatch, WriteOperation,
};
pub use sweeper::spawn_expiry_sweeper;
pub use token::{PageToken, ResumeKey};
