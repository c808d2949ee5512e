//! Resumable pagination state.
//!
//! Contexts live only in this process and only while a multi-page query is
//! mid-flight. Each context sits behind its own async mutex, which a paged
//! call holds from page validation until the context is written back, so
//! two callers racing for "the next page" of the same query are serialised
//! instead of overwriting each other's cursor.

use crate::{OutboxError, OutboxResult, PageToken};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Resume state of a single-topic paged query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicQueryContext {
    pub next_page: u32,
    pub token: Option<PageToken>,
}

/// Resume state of a cross-topic paged query.
///
/// Topics ahead of `remaining_topics[0]` are fully drained; `token` resumes
/// inside `remaining_topics[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllTopicsQueryContext {
    pub next_page: u32,
    pub token: Option<PageToken>,
    pub remaining_topics: VecDeque<String>,
}

/// Topics this instance has written to. Append-only.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<BTreeSet<String>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the topic was not known before.
    pub fn register(&self, topic: &str) -> bool {
        if self.topics.read().contains(topic) {
            return false;
        }
        self.topics.write().insert(topic.to_string())
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.read().contains(topic)
    }

    /// Known topics in name order.
    pub fn snapshot(&self) -> Vec<String> {
        self.topics.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.topics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.read().is_empty()
    }
}

pub(crate) type ContextSlot<T> = Arc<AsyncMutex<Option<T>>>;

/// Every cursor an engine instance owns.
#[derive(Default)]
pub(crate) struct CursorState {
    dispatched_topics: Mutex<HashMap<String, ContextSlot<TopicQueryContext>>>,
    outstanding_all: AsyncMutex<Option<AllTopicsQueryContext>>,
    dispatched_all: AsyncMutex<Option<AllTopicsQueryContext>>,
}

impl CursorState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The dispatched-query context slot for `topic`, created on first use.
    pub(crate) fn dispatched_topic(&self, topic: &str) -> ContextSlot<TopicQueryContext> {
        self.dispatched_topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    /// Drop `topic`'s slot once it holds no context and no other caller
    /// shares it. Consumes the caller's handle.
    pub(crate) fn release_dispatched_topic(
        &self,
        topic: &str,
        slot: ContextSlot<TopicQueryContext>,
    ) {
        let mut slots = self.dispatched_topics.lock();
        let Some(stored) = slots.get(topic) else {
            return;
        };
        // One reference in the map, one held here.
        if !Arc::ptr_eq(stored, &slot) || Arc::strong_count(&slot) > 2 {
            return;
        }
        let idle = slot.try_lock().map(|context| context.is_none()).unwrap_or(false);
        if idle {
            slots.remove(topic);
        }
    }

    /// Topics with a live dispatched-query slot.
    pub(crate) fn dispatched_topic_count(&self) -> usize {
        self.dispatched_topics.lock().len()
    }

    pub(crate) fn outstanding_all(&self) -> &AsyncMutex<Option<AllTopicsQueryContext>> {
        &self.outstanding_all
    }

    pub(crate) fn dispatched_all(&self) -> &AsyncMutex<Option<AllTopicsQueryContext>> {
        &self.dispatched_all
    }
}

/// Check a requested page against the page the in-flight query expects.
///
/// Page 1 always starts over. Any other page must equal `in_flight`.
pub(crate) fn validate_page(requested: u32, in_flight: Option<u32>) -> OutboxResult<()> {
    if requested == 1 || (requested > 1 && Some(requested) == in_flight) {
        return Ok(());
    }
    Err(OutboxError::PageOutOfRange {
        requested,
        next_valid: in_flight.unwrap_or(1),
    })
}
