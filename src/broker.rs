//! In-process publish/subscribe bus for domain events.
//!
//! Subscriptions are keyed by channel; the `*` channel receives every
//! publish. Each subscription owns an ordered queue drained by its own
//! task, so one subscriber sees events in publish order while a slow or
//! failing subscriber never blocks the publisher or its peers.
//!
//! Delivery tasks are detached. Before the runtime goes away, [`Broker::close`]
//! each subscription whose events must not be lost.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::telemetry::metrics;

/// Channel that receives every published event.
pub const WILDCARD: &str = "*";

pub type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Async event handler. Errors are logged by the bus, never returned to
/// the publisher.
pub type Callback = Arc<dyn Fn(Event) -> BoxFuture + Send + Sync>;

/// Wrap an async closure as a [`Callback`].
pub fn callback<F, Fut>(f: F) -> Callback
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Opaque handle returned by [`Broker::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

struct Subscription {
    kinds: HashSet<EventKind>,
    queue: mpsc::UnboundedSender<Event>,
    /// Queued or in-flight events.
    pending: Arc<AtomicUsize>,
    task: Mutex<Option<JoinHandle<()>>>,
}

type Registry = HashMap<String, HashMap<Uuid, Arc<Subscription>>>;

/// Event bus. Cheap to clone; clones share one registry.
#[derive(Clone, Default)]
pub struct Broker {
    registry: Arc<Mutex<Registry>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry updates are single inserts/removes, so a poisoned lock
        // still holds a consistent map.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for events of `kinds` published on `channel`.
    ///
    /// Must be called from within a tokio runtime: the subscription's
    /// delivery task is spawned here.
    pub fn subscribe(
        &self,
        channel: impl Into<String>,
        kinds: impl IntoIterator<Item = EventKind>,
        callback: Callback,
    ) -> SubscriptionHandle {
        let channel = channel.into();
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let span = tracing::debug_span!("broker.subscription", channel = %channel, subscription = %id);
        let task = tokio::spawn(deliver(rx, callback, Arc::clone(&pending)).instrument(span));

        let subscription = Arc::new(Subscription {
            kinds: kinds.into_iter().collect(),
            queue: tx,
            pending,
            task: Mutex::new(Some(task)),
        });
        self.registry()
            .entry(channel.clone())
            .or_default()
            .insert(id, subscription);

        debug!(channel = %channel, subscription = %id, "subscribed");
        SubscriptionHandle(id)
    }

    /// Remove a subscription from whichever channel holds it.
    ///
    /// Events already queued for it are still delivered. Returns `false`
    /// if the handle was unknown.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.remove(handle).is_some()
    }

    /// Remove a subscription and wait until every event already queued for
    /// it has been handled.
    ///
    /// Returns how many events were still pending when called. Unknown
    /// handles return 0 immediately.
    pub async fn close(&self, handle: SubscriptionHandle) -> usize {
        let Some(subscription) = self.remove(handle) else {
            return 0;
        };
        let pending = subscription.pending.load(Ordering::SeqCst);
        let task = subscription
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // The delivery task ends once the last sender is gone and its queue
        // is empty.
        drop(subscription);

        if pending > 0 {
            debug!(subscription = %handle.0, pending, "draining subscription");
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(subscription = %handle.0, error = %e, "delivery task failed");
            }
        }
        pending
    }

    fn remove(&self, handle: SubscriptionHandle) -> Option<Arc<Subscription>> {
        let mut registry = self.registry();
        let channel = registry
            .iter()
            .find(|(_, subs)| subs.contains_key(&handle.0))
            .map(|(channel, _)| channel.clone())?;

        let subs = registry.get_mut(&channel)?;
        let removed = subs.remove(&handle.0);
        if subs.is_empty() {
            registry.remove(&channel);
        }
        debug!(channel = %channel, subscription = %handle.0, "unsubscribed");
        removed
    }

    /// Queue `event` for every matching subscription on `channel` and on
    /// the wildcard channel. Returns without waiting for any handler.
    ///
    /// Returns the number of subscriptions the event was queued for.
    pub fn publish(&self, channel: &str, event: Event) -> usize {
        let targets: Vec<Arc<Subscription>> = {
            let registry = self.registry();
            let exact = registry.get(channel).into_iter();
            let wildcard = if channel == WILDCARD {
                None
            } else {
                registry.get(WILDCARD)
            };
            exact
                .chain(wildcard)
                .flat_map(|subs| subs.values().cloned())
                .collect()
        };

        let kind = event.kind();
        let mut delivered = 0;
        for subscription in targets.iter().filter(|s| s.kinds.contains(&kind)) {
            subscription.pending.fetch_add(1, Ordering::SeqCst);
            if subscription.queue.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                // The delivery task is gone.
                subscription.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
        delivered
    }

    /// Channels that currently hold at least one subscription.
    pub fn channels(&self) -> Vec<String> {
        self.registry().keys().cloned().collect()
    }
}

/// Drain one subscription's queue in order. Each handler invocation runs
/// in its own task so a panic is contained and reported.
async fn deliver(
    mut rx: mpsc::UnboundedReceiver<Event>,
    callback: Callback,
    pending: Arc<AtomicUsize>,
) {
    while let Some(event) = rx.recv().await {
        let kind = event.kind();
        let game_id = event.game_id();
        let result = tokio::spawn(callback(event)).await;
        pending.fetch_sub(1, Ordering::SeqCst);
        let failure = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => {
                warn!(game_id = %game_id, ?kind, error = %e, "event handler failed");
                "error"
            }
            Err(join) => {
                error!(game_id = %game_id, ?kind, error = %join, "event handler panicked");
                "panic"
            }
        };
        metrics::event_dispatch_failures().add(1, &[KeyValue::new("result", failure)]);
    }
}
