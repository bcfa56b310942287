//! Distributed event bus (C11), grounded on
//! `original_source/src/infra_mind/orchestration/events.py::EventManager`. Publishes over
//! `cache::CacheBackend`'s pub/sub so every connected instance subscribes to
//! every event type and dispatches locally, with a bounded cross-instance
//! history.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use crate::cache::{keys, CacheBackend};
use crate::domain::{Event, EventType};
use crate::error::CoreResult;

const EVENT_HISTORY_CAP: usize = 1000;

type Callback = Arc<dyn Fn(Event) + Send + Sync>;

struct Subscription {
    id: u64,
    callback: Callback,
}

#[derive(Default, Clone)]
pub struct EventBusStats {
    pub published: u64,
    pub dispatched: u64,
    pub dispatch_errors: u64,
}

/// The pub/sub contract from §4.4: `subscribe`/`unsubscribe`/`publish`/
/// `emit`/`getHistory`/`clearHistory`, plus `wait_for_event` as a test/demo
/// convenience built on the same broadcast plumbing.
pub struct EventManager {
    cache: Arc<dyn CacheBackend>,
    producer: String,
    subscriptions: Mutex<HashMap<EventType, Vec<Subscription>>>,
    listening: Mutex<HashSet<EventType>>,
    next_subscription_id: AtomicU64,
    stats: Mutex<EventBusStats>,
}

impl EventManager {
    pub fn new(cache: Arc<dyn CacheBackend>, producer: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            producer: producer.into(),
            subscriptions: Mutex::new(HashMap::new()),
            listening: Mutex::new(HashSet::new()),
            next_subscription_id: AtomicU64::new(1),
            stats: Mutex::new(EventBusStats::default()),
        })
    }

    /// Registers a local callback and starts (if not already running) the
    /// background listener that relays bus messages for `event_type` into
    /// every local subscriber, isolating one callback's panic from the rest.
    pub async fn subscribe<F>(self: &Arc<Self>, event_type: EventType, callback: F) -> CoreResult<u64>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .entry(event_type)
            .or_default()
            .push(Subscription { id, callback: Arc::new(callback) });
        self.ensure_listener(event_type).await?;
        Ok(id)
    }

    pub fn unsubscribe(&self, event_type: EventType, subscription_id: u64) {
        if let Some(subs) = self.subscriptions.lock().get_mut(&event_type) {
            subs.retain(|s| s.id != subscription_id);
        }
    }

    /// Spawns (at most once per event type) the listener that relays bus
    /// messages into `dispatch_local`, so every instance subscribed to the
    /// bus receives every locally-registered callback's events (§4.4
    /// "every instance subscribes to every type").
    async fn ensure_listener(self: &Arc<Self>, event_type: EventType) -> CoreResult<()> {
        if !self.listening.lock().insert(event_type) {
            return Ok(());
        }

        let tag = event_type_tag(event_type);
        let channel = keys::event_channel(tag);
        let mut rx = self.cache.subscribe(&channel).await?;
        let this = Arc::clone(self);

        tokio::spawn(async move {
            while let Ok(payload) = rx.recv().await {
                match serde_json::from_str::<Event>(&payload) {
                    Ok(event) => this.dispatch_local(event),
                    Err(err) => warn!(error = %err, "malformed event payload on bus"),
                }
            }
        });

        Ok(())
    }

    /// Publishes an already-constructed event: serializes it onto the bus
    /// channel for its type, appends to the bounded history, and dispatches
    /// to this instance's own local subscribers immediately (fire-and-forget,
    /// §4.4 "at-least-once delivery").
    pub async fn publish(&self, event: Event) -> CoreResult<()> {
        let tag = event_type_tag(event.event_type);
        let channel = keys::event_channel(tag);
        let payload = serde_json::to_string(&event).map_err(|e| crate::error::CoreError::Other(e.into()))?;

        self.cache.publish(&channel, payload.clone()).await?;
        self.cache
            .list_push_capped(keys::EVENT_HISTORY, payload, EVENT_HISTORY_CAP)
            .await?;

        self.stats.lock().published += 1;
        self.dispatch_local(event);
        Ok(())
    }

    pub async fn emit(&self, event_type: EventType, data: HashMap<String, serde_json::Value>) -> CoreResult<()> {
        let mut event = Event::new(event_type, self.producer.clone());
        event.data = data;
        self.publish(event).await
    }

    /// Runs every matching local subscriber in isolation: one callback
    /// panicking must not stop the others (§4.4 "Guarantees").
    fn dispatch_local(&self, event: Event) {
        let callbacks: Vec<Callback> = self
            .subscriptions
            .lock()
            .get(&event.event_type)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.callback)).collect())
            .unwrap_or_default();

        let mut dispatched = 0u64;
        let mut errors = 0u64;
        for callback in callbacks {
            let event = event.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event)));
            match result {
                Ok(()) => dispatched += 1,
                Err(_) => {
                    errors += 1;
                    warn!("event subscriber panicked, continuing dispatch to remaining subscribers");
                }
            }
        }
        let mut stats = self.stats.lock();
        stats.dispatched += dispatched;
        stats.dispatch_errors += errors;
    }

    pub async fn history(&self, limit: usize) -> CoreResult<Vec<Event>> {
        let raw = self.cache.list_range(keys::EVENT_HISTORY, limit as isize).await?;
        Ok(raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect())
    }

    pub async fn clear_history(&self) -> CoreResult<()> {
        self.cache.delete(keys::EVENT_HISTORY).await
    }

    pub fn stats(&self) -> EventBusStats {
        self.stats.lock().clone()
    }

    /// Blocks until an event of `event_type` is observed locally or the
    /// `timeout` elapses; a convenience for tests and synchronous callers.
    pub async fn wait_for_event(
        self: &Arc<Self>,
        event_type: EventType,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let (tx, mut rx) = broadcast::channel(1);
        let _ = self
            .subscribe(event_type, move |event| {
                let _ = tx.send(event);
            })
            .await;
        tokio::time::timeout(timeout, rx.recv()).await.ok()?.ok()
    }
}

fn event_type_tag(event_type: EventType) -> &'static str {
    match event_type {
        EventType::AgentStarted => "agent_started",
        EventType::AgentCompleted => "agent_completed",
        EventType::AgentFailed => "agent_failed",
        EventType::WorkflowStarted => "workflow_started",
        EventType::WorkflowCompleted => "workflow_completed",
        EventType::WorkflowFailed => "workflow_failed",
        EventType::DataUpdated => "data_updated",
        EventType::UserInputReceived => "user_input_received",
        EventType::RecommendationGenerated => "recommendation_generated",
        EventType::ReportGenerated => "report_generated",
        EventType::Notification => "notification",
        EventType::Alert => "alert",
        EventType::UserJoined => "user_joined",
        EventType::UserLeft => "user_left",
        EventType::CursorUpdate => "cursor_update",
        EventType::FormUpdate => "form_update",
        EventType::Heartbeat => "heartbeat",
        EventType::Error => "error",
        EventType::MetricsUpdate => "metrics_update",
        EventType::WorkflowProgress => "workflow_progress",
        EventType::AgentStatus => "agent_status",
        EventType::StepCompleted => "step_completed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_dispatches_to_local_subscriber() {
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let manager = EventManager::new(cache, "test_producer");
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = Arc::clone(&observed);
        manager
            .subscribe(EventType::WorkflowStarted, move |_event| {
                observed_clone.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();

        manager.emit(EventType::WorkflowStarted, HashMap::new()).await.unwrap();
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn history_is_bounded_and_queryable() {
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let manager = EventManager::new(cache, "test_producer");
        for _ in 0..5 {
            manager.emit(EventType::Heartbeat, HashMap::new()).await.unwrap();
        }
        let history = manager.history(10).await.unwrap();
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn wait_for_event_resolves_once_emitted() {
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let manager = EventManager::new(cache, "test_producer");
        let waiter = Arc::clone(&manager);
        let handle = tokio::spawn(async move { waiter.wait_for_event(EventType::Alert, Duration::from_secs(1)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.emit(EventType::Alert, HashMap::new()).await.unwrap();
        let event = handle.await.unwrap();
        assert!(event.is_some());
    }
}
