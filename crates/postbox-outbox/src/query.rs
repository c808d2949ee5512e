//! Shard-aware paged queries over an [`OutboxStore`].
//!
//! Outstanding reads fan out one task per shard and merge by
//! `(created_at, id)`. Dispatched reads follow store-issued tokens, keeping
//! per-topic and cross-topic contexts so that a later call can resume
//! where the previous page ended.

use crate::cursor::{
    validate_page, AllTopicsQueryContext, ContextSlot, CursorState, TopicQueryContext,
};
use crate::model::cutoff;
use crate::store::{bounded, DispatchedQuery, OutboxStore, ShardQuery, StorePage};
use crate::{
    OutboxError, OutboxMessage, OutboxResult, Page, PageToken, ResumeKey, ShardAssigner,
    TopicRegistry,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Which index a cross-topic scan walks.
#[derive(Debug, Clone, Copy)]
enum Scan {
    Outstanding { created_before: DateTime<Utc> },
    Dispatched { delivered_since: DateTime<Utc> },
}

/// Runs outstanding and dispatched queries and owns their cursor state.
pub struct QueryEngine {
    store: Arc<dyn OutboxStore>,
    shards: ShardAssigner,
    timeout: Option<Duration>,
    cursors: CursorState,
    registry: TopicRegistry,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn OutboxStore>, shards: ShardAssigner, timeout: Option<Duration>) -> Self {
        Self {
            store,
            shards,
            timeout,
            cursors: CursorState::new(),
            registry: TopicRegistry::new(),
        }
    }

    /// Topics seen by this instance; seeds cross-topic scans.
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Topics currently holding a dispatched-query cursor slot.
    pub(crate) fn open_topic_cursors(&self) -> usize {
        self.cursors.dispatched_topic_count()
    }

    /// Undelivered messages created at least `older_than` ago.
    ///
    /// With a topic the call is stateless and any page number is accepted.
    /// Without one, pages must be requested in order.
    pub async fn outstanding(
        &self,
        older_than: Duration,
        page_size: usize,
        page_number: u32,
        topic: Option<&str>,
    ) -> OutboxResult<Page<OutboxMessage>> {
        check_page_size(page_size)?;
        let created_before = cutoff(Utc::now(), older_than);

        match topic {
            Some(topic) => {
                self.outstanding_for_topic(topic, created_before, page_size, page_number)
                    .await
            }
            None => {
                self.all_topics(
                    Scan::Outstanding { created_before },
                    self.cursors.outstanding_all(),
                    page_size,
                    page_number,
                )
                .await
            }
        }
    }

    /// Messages delivered within the last `dispatched_since`.
    ///
    /// Pages must be requested in order; page 1 always starts over.
    pub async fn dispatched(
        &self,
        dispatched_since: Duration,
        page_size: usize,
        page_number: u32,
        topic: Option<&str>,
    ) -> OutboxResult<Page<OutboxMessage>> {
        check_page_size(page_size)?;
        let delivered_since = cutoff(Utc::now(), dispatched_since);

        match topic {
            Some(topic) => {
                self.dispatched_for_topic(topic, delivered_since, page_size, page_number)
                    .await
            }
            None => {
                self.all_topics(
                    Scan::Dispatched { delivered_since },
                    self.cursors.dispatched_all(),
                    page_size,
                    page_number,
                )
                .await
            }
        }
    }

    async fn outstanding_for_topic(
        &self,
        topic: &str,
        created_before: DateTime<Utc>,
        page_size: usize,
        page_number: u32,
    ) -> OutboxResult<Page<OutboxMessage>> {
        if page_number == 0 {
            return Err(OutboxError::PageOutOfRange {
                requested: 0,
                next_valid: 1,
            });
        }

        // Every shard reads the whole window; the page is sliced from the merge.
        let window = page_size.saturating_mul(page_number as usize);
        let (merged, shard_more) = self.fan_out(topic, created_before, window, None).await?;
        let more = shard_more || merged.len() > window;

        let items: Vec<OutboxMessage> = merged
            .into_iter()
            .skip(window - page_size)
            .take(page_size)
            .collect();

        debug!(
            topic = %topic,
            page = page_number,
            count = items.len(),
            more,
            "Outstanding page"
        );
        Ok(Page {
            items,
            page_number,
            next_page: more.then_some(page_number + 1),
        })
    }

    async fn dispatched_for_topic(
        &self,
        topic: &str,
        delivered_since: DateTime<Utc>,
        page_size: usize,
        page_number: u32,
    ) -> OutboxResult<Page<OutboxMessage>> {
        let slot = self.cursors.dispatched_topic(topic);
        let page = self
            .dispatched_topic_page(&slot, topic, delivered_since, page_size, page_number)
            .await;
        self.cursors.release_dispatched_topic(topic, slot);
        page
    }

    async fn dispatched_topic_page(
        &self,
        slot: &ContextSlot<TopicQueryContext>,
        topic: &str,
        delivered_since: DateTime<Utc>,
        page_size: usize,
        page_number: u32,
    ) -> OutboxResult<Page<OutboxMessage>> {
        let mut context = slot.lock().await;

        validate_page(page_number, context.as_ref().map(|c| c.next_page))?;
        let token = match page_number {
            1 => {
                *context = None;
                None
            }
            _ => context.as_ref().and_then(|c| c.token.clone()),
        };

        let (items, next_token) = self
            .drain_dispatched(topic, delivered_since, page_size, token)
            .await?;

        let next_page = match next_token {
            Some(token) => {
                *context = Some(TopicQueryContext {
                    next_page: page_number + 1,
                    token: Some(token),
                });
                Some(page_number + 1)
            }
            None => {
                *context = None;
                None
            }
        };

        debug!(
            topic = %topic,
            page = page_number,
            count = items.len(),
            next_page = ?next_page,
            "Dispatched page"
        );
        Ok(Page {
            items,
            page_number,
            next_page,
        })
    }

    /// Cross-topic paging: drain `remaining_topics[0]`, move on when it runs
    /// dry, stop when the page is full.
    async fn all_topics(
        &self,
        scan: Scan,
        slot: &AsyncMutex<Option<AllTopicsQueryContext>>,
        page_size: usize,
        page_number: u32,
    ) -> OutboxResult<Page<OutboxMessage>> {
        let mut context = slot.lock().await;
        validate_page(page_number, context.as_ref().map(|c| c.next_page))?;

        let resumed = if page_number == 1 { None } else { (*context).clone() };
        let (mut remaining, mut token) = match resumed {
            Some(ctx) => (ctx.remaining_topics, ctx.token),
            None => (VecDeque::from(self.registry.snapshot()), None),
        };

        let mut items = Vec::new();
        while items.len() < page_size {
            let Some(topic) = remaining.front().cloned() else {
                break;
            };
            let need = page_size - items.len();
            let (batch, next) = self.read_topic(scan, &topic, need, token.take()).await?;
            items.extend(batch);

            match next {
                Some(next) => token = Some(next),
                None => {
                    debug!(topic = %topic, "Topic drained");
                    remaining.pop_front();
                }
            }
        }

        let next_page = if remaining.is_empty() {
            *context = None;
            None
        } else {
            *context = Some(AllTopicsQueryContext {
                next_page: page_number + 1,
                token,
                remaining_topics: remaining,
            });
            Some(page_number + 1)
        };

        debug!(
            scan = ?scan,
            page = page_number,
            count = items.len(),
            next_page = ?next_page,
            "Cross-topic page"
        );
        Ok(Page {
            items,
            page_number,
            next_page,
        })
    }

    async fn read_topic(
        &self,
        scan: Scan,
        topic: &str,
        need: usize,
        token: Option<PageToken>,
    ) -> OutboxResult<(Vec<OutboxMessage>, Option<PageToken>)> {
        match scan {
            Scan::Outstanding { created_before } => {
                self.outstanding_after(topic, created_before, need, token)
                    .await
            }
            Scan::Dispatched { delivered_since } => {
                self.drain_dispatched(topic, delivered_since, need, token)
                    .await
            }
        }
    }

    /// The next `need` outstanding messages of a topic after `token`, plus a
    /// token when more remain.
    async fn outstanding_after(
        &self,
        topic: &str,
        created_before: DateTime<Utc>,
        need: usize,
        token: Option<PageToken>,
    ) -> OutboxResult<(Vec<OutboxMessage>, Option<PageToken>)> {
        let (mut merged, shard_more) = self.fan_out(topic, created_before, need, token).await?;
        let more = shard_more || merged.len() > need;
        merged.truncate(need);

        let next = match merged.last() {
            Some(last) if more => Some(PageToken::from_key(&ResumeKey::new(
                last.created_at,
                last.id(),
            ))?),
            _ => None,
        };
        Ok((merged, next))
    }

    /// Read up to `limit` dispatched messages, following tokens across
    /// short reads until the limit is met or the store runs out.
    async fn drain_dispatched(
        &self,
        topic: &str,
        delivered_since: DateTime<Utc>,
        limit: usize,
        token: Option<PageToken>,
    ) -> OutboxResult<(Vec<OutboxMessage>, Option<PageToken>)> {
        let mut query = DispatchedQuery {
            topic: topic.to_string(),
            delivered_since,
            limit,
            token,
        };
        let mut items = Vec::new();

        loop {
            query.limit = limit - items.len();
            let page = bounded(
                self.timeout,
                "query_dispatched",
                self.store.query_dispatched(&query),
            )
            .await?;

            let got = page.items.len();
            items.extend(page.items);

            match page.next_token {
                Some(next) if got > 0 && items.len() < limit => query.token = Some(next),
                Some(next) if got > 0 => return Ok((items, Some(next))),
                _ => return Ok((items, None)),
            }
        }
    }

    /// One concurrent read per shard, merged by `(created_at, id)`.
    ///
    /// The first failing shard aborts the rest. Dropping the returned future
    /// drops the join set, which aborts every shard task.
    async fn fan_out(
        &self,
        topic: &str,
        created_before: DateTime<Utc>,
        limit: usize,
        token: Option<PageToken>,
    ) -> OutboxResult<(Vec<OutboxMessage>, bool)> {
        let mut tasks = JoinSet::new();
        for shard in self.shards.shards() {
            let store = Arc::clone(&self.store);
            let query = ShardQuery {
                topic: topic.to_string(),
                shard,
                created_before,
                limit,
                token: token.clone(),
            };
            tasks.spawn(read_shard(store, query, self.timeout));
        }

        let mut merged = Vec::new();
        let mut more = false;
        while let Some(joined) = tasks.join_next().await {
            let page = match joined {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => {
                    tasks.abort_all();
                    warn!(topic = %topic, error = %e, "Shard read failed");
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(OutboxError::Store(format!("shard read task failed: {}", e)));
                }
            };
            more |= page.next_token.is_some();
            merged.extend(page.items);
        }

        merged.sort_by(|a, b| a.created_key().cmp(&b.created_key()));
        Ok((merged, more))
    }
}

/// Read one shard until `query.limit` items are collected or it runs out.
async fn read_shard(
    store: Arc<dyn OutboxStore>,
    mut query: ShardQuery,
    timeout: Option<Duration>,
) -> OutboxResult<StorePage> {
    let wanted = query.limit;
    let mut items = Vec::new();

    loop {
        query.limit = wanted - items.len();
        let page = bounded(timeout, "query_outstanding", store.query_outstanding(&query)).await?;

        let got = page.items.len();
        items.extend(page.items);

        match page.next_token {
            Some(next) if got > 0 && items.len() < wanted => query.token = Some(next),
            Some(next) if got > 0 => {
                return Ok(StorePage {
                    items,
                    next_token: Some(next),
                })
            }
            _ => {
                return Ok(StorePage {
                    items,
                    next_token: None,
                })
            }
        }
    }
}

fn check_page_size(page_size: usize) -> OutboxResult<()> {
    if page_size == 0 {
        return Err(OutboxError::InvalidArgument(
            "page_size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
