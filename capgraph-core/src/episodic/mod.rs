//! Episodic Memory Store — a buffered, lossy-but-durable event log.

pub mod circuit_breaker;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{EpisodicConfig, EpisodicEvent, EventId, EventType, RetrievalContext};
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

/// Options for [`EpisodicMemoryStore::retrieve_relevant`].
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub limit: usize,
    pub event_types: Option<Vec<EventType>>,
    pub after_ts: Option<chrono::DateTime<Utc>>,
}

/// The durable side of the episodic store: wherever events end up once
/// flushed. The core ships [`InMemoryEventSink`] as the default; the
/// `capgraph-storage-redb` crate provides a persistent implementation.
#[async_trait]
pub trait EpisodicEventSink: Send + Sync {
    /// Persist a batch of events transactionally.
    async fn persist(&self, events: &[EpisodicEvent]) -> Result<()>;

    /// Events whose `context_hash` matches exactly, newest first.
    async fn query_by_context(
        &self,
        context_hash: u64,
        options: &RetrieveOptions,
    ) -> Result<Vec<EpisodicEvent>>;

    /// Every event for a workflow, oldest first.
    async fn query_workflow(&self, workflow_id: crate::types::WorkflowId)
        -> Result<Vec<EpisodicEvent>>;

    /// The most recent `limit` events of a given type.
    async fn query_type(&self, event_type: EventType, limit: usize) -> Result<Vec<EpisodicEvent>>;

    /// Remove events older than `retention` or beyond `max_events` (oldest
    /// first), returning the number removed.
    async fn prune(&self, retention: ChronoDuration, max_events: usize) -> Result<usize>;
}

/// A pure function of the context inputs: identical contexts always
/// produce identical hashes.
#[must_use]
pub fn context_hash(context: &RetrievalContext) -> u64 {
    let mut hasher = DefaultHasher::new();
    context.workflow_type.hash(&mut hasher);
    context.domain.hash(&mut hasher);
    context.complexity.hash(&mut hasher);
    hasher.finish()
}

/// The buffered event log.
pub struct EpisodicMemoryStore<S: EpisodicEventSink> {
    buffer: Mutex<Vec<EpisodicEvent>>,
    sink: Arc<S>,
    config: EpisodicConfig,
    circuit: CircuitBreaker,
    shutting_down: AtomicBool,
}

impl<S: EpisodicEventSink + 'static> EpisodicMemoryStore<S> {
    #[must_use]
    pub fn new(sink: Arc<S>, config: EpisodicConfig) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(Vec::with_capacity(config.buffer_flush_size)),
            sink,
            config,
            circuit: CircuitBreaker::new(CircuitBreakerConfig::default()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Append an event to the in-memory buffer. Never blocks on I/O;
    /// flushes asynchronously once the buffer crosses the configured size.
    pub fn capture(self: &Arc<Self>, event: EpisodicEvent) -> EventId {
        let id = event.event_id;
        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push(event);
            buffer.len() >= self.config.buffer_flush_size
        };
        if should_flush && !self.shutting_down.load(Ordering::Relaxed) {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = this.flush().await {
                    warn!(error = %err, "size-triggered episodic flush failed");
                }
            });
        }
        id
    }

    /// Spawn the periodic flush timer. The caller owns the returned
    /// handle and should abort it on shutdown (or rely on
    /// [`Self::shutdown`], which does so via the `shutting_down` flag and
    /// a final flush).
    pub fn spawn_periodic_flush(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = std::time::Duration::from_secs(self.config.flush_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if this.shutting_down.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(err) = this.flush().await {
                    warn!(error = %err, "periodic episodic flush failed");
                }
            }
        })
    }

    /// Transactionally write buffered events. On failure, the buffer is
    /// restored (events are re-prepended) so nothing is silently dropped.
    pub async fn flush(&self) -> Result<usize> {
        let drained = {
            let mut buffer = self.buffer.lock();
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            return Ok(0);
        }

        let sink = Arc::clone(&self.sink);
        let to_persist = drained.clone();
        let result = self
            .circuit
            .call(|| async move { sink.persist(&to_persist).await })
            .await;

        match result {
            Ok(()) => {
                debug!(count = drained.len(), "flushed episodic events");
                Ok(drained.len())
            }
            Err(err) => {
                let mut buffer = self.buffer.lock();
                let mut restored = drained;
                restored.append(&mut buffer);
                *buffer = restored;
                Err(err)
            }
        }
    }

    /// Exact-match over the stable context hash, newest first.
    pub async fn retrieve_relevant(
        &self,
        context: &RetrievalContext,
        options: RetrieveOptions,
    ) -> Result<Vec<EpisodicEvent>> {
        self.sink
            .query_by_context(context_hash(context), &options)
            .await
    }

    /// Every event captured under `workflow_id`, oldest first.
    pub async fn get_workflow_events(
        &self,
        workflow_id: crate::types::WorkflowId,
    ) -> Result<Vec<EpisodicEvent>> {
        self.sink.query_workflow(workflow_id).await
    }

    /// The most recent `limit` events of a given type.
    pub async fn get_events_by_type(
        &self,
        event_type: EventType,
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        self.sink.query_type(event_type, limit).await
    }

    /// Remove events older than the retention window, then trim to the
    /// count cap if still over.
    pub async fn prune(&self) -> Result<usize> {
        let retention = ChronoDuration::days(self.config.retention_days);
        self.sink.prune(retention, self.config.max_events).await
    }

    /// Stop background timers and perform a final flush.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        if let Err(err) = self.flush().await {
            warn!(error = %err, "final episodic flush on shutdown failed");
        }
    }
}

/// Default, process-local sink used when no external collaborator is
/// wired in. Persistence is "durable" only for the lifetime of the
/// process — suitable for tests and cold-start scenarios.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<EpisodicEvent>>,
}

#[async_trait]
impl EpisodicEventSink for InMemoryEventSink {
    async fn persist(&self, events: &[EpisodicEvent]) -> Result<()> {
        self.events.lock().extend_from_slice(events);
        Ok(())
    }

    async fn query_by_context(
        &self,
        context_hash: u64,
        options: &RetrieveOptions,
    ) -> Result<Vec<EpisodicEvent>> {
        let events = self.events.lock();
        let mut matched: Vec<EpisodicEvent> = events
            .iter()
            .filter(|e| e.context_hash == context_hash)
            .filter(|e| {
                options
                    .event_types
                    .as_ref()
                    .is_none_or(|types| types.contains(&e.event_type))
            })
            .filter(|e| options.after_ts.is_none_or(|after| e.timestamp >= after))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if options.limit > 0 {
            matched.truncate(options.limit);
        }
        Ok(matched)
    }

    async fn query_workflow(
        &self,
        workflow_id: crate::types::WorkflowId,
    ) -> Result<Vec<EpisodicEvent>> {
        let events = self.events.lock();
        let mut matched: Vec<EpisodicEvent> = events
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(matched)
    }

    async fn query_type(&self, event_type: EventType, limit: usize) -> Result<Vec<EpisodicEvent>> {
        let events = self.events.lock();
        let mut matched: Vec<EpisodicEvent> = events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if limit > 0 {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn prune(&self, retention: ChronoDuration, max_events: usize) -> Result<usize> {
        let mut events = self.events.lock();
        let cutoff = Utc::now() - retention;
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        if events.len() > max_events {
            events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            let excess = events.len() - max_events;
            events.drain(0..excess);
        }
        Ok(before - events.len())
    }
}
