//! Connection status publishing.
//!
//! Single fan-out point for `{state, attempt, latest payload, last error}`.
//! Listeners are invoked synchronously from the manager turn that produced
//! the change; a `watch` channel carries the same snapshot for read-only
//! access and async observation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ChannelError;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no transport requested yet.
    Idle,
    /// A manually initiated connect attempt is in flight.
    Connecting,
    /// Push transport is live.
    Connected,
    /// Transport dropped; automatic retries (and polling) are running.
    Reconnecting,
    /// Automatic retries exhausted; polling is the sole data source until a
    /// manual reconnect.
    Disconnected,
    /// Terminal. No timer, transport, or polling activity exists.
    Closed,
}

impl ConnectionState {
    /// Whether this is the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the push transport is currently down with the channel still
    /// running.
    #[must_use]
    pub const fn is_down(self) -> bool {
        matches!(self, Self::Reconnecting | Self::Disconnected)
    }
}

/// Which source produced the latest payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// Delivered over the push transport.
    Push,
    /// Retrieved by a fallback fetch.
    Poll,
}

/// The most recent payload; overwritten, never queued.
#[derive(Debug, Clone)]
pub struct LatestPayload<T> {
    /// Decoded payload value.
    pub value: T,
    /// When the value was applied.
    pub received_at: Instant,
    /// Where the value came from.
    pub source: PayloadSource,
}

/// Snapshot delivered to subscribers on every state or payload change.
#[derive(Debug, Clone)]
pub struct StatusSnapshot<T> {
    /// Current connection state.
    pub state: ConnectionState,
    /// Consecutive failed reconnect attempts since the last success.
    pub attempt: u32,
    /// Latest payload, if any has arrived.
    pub latest_payload: Option<LatestPayload<T>>,
    /// Most recent non-fatal failure, cleared on successful connect.
    pub last_error: Option<ChannelError>,
}

impl<T> Default for StatusSnapshot<T> {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            latest_payload: None,
            last_error: None,
        }
    }
}

type Listener<T> = Arc<dyn Fn(&StatusSnapshot<T>) + Send + Sync>;

struct Registry<T> {
    listeners: Mutex<HashMap<u64, Listener<T>>>,
    next_id: AtomicU64,
}

/// Fan-out publisher. The connection manager is its only writer.
pub struct StatusPublisher<T> {
    registry: Arc<Registry<T>>,
    tx: watch::Sender<StatusSnapshot<T>>,
}

impl<T: Clone> StatusPublisher<T> {
    /// Create a publisher holding an `Idle` snapshot.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self {
            registry: Arc::new(Registry {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
            tx,
        }
    }

    /// Register a listener. It is invoked synchronously for every published
    /// snapshot until the returned guard is dropped or unsubscribed.
    ///
    /// Dropping every subscription does not affect the channel lifecycle.
    pub fn subscribe(
        &self,
        listener: impl Fn(&StatusSnapshot<T>) + Send + Sync + 'static,
    ) -> Subscription<T> {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.registry.listeners.lock() {
            listeners.insert(id, Arc::new(listener));
        }
        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot<T> {
        self.tx.borrow().clone()
    }

    /// Watch receiver observing every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot<T>> {
        self.tx.subscribe()
    }

    /// Publish a snapshot to the watch channel and every listener, in
    /// subscription-id order.
    pub fn publish(&self, snapshot: StatusSnapshot<T>) {
        debug!(state = ?snapshot.state, attempt = snapshot.attempt, "Publishing status");
        self.tx.send_replace(snapshot.clone());

        // Listeners run with the registry unlocked so a callback may
        // subscribe or drop a subscription of this same publisher.
        let mut ordered: Vec<(u64, Listener<T>)> = {
            let Ok(listeners) = self.registry.listeners.lock() else {
                return;
            };
            listeners
                .iter()
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect()
        };
        ordered.sort_by_key(|(id, _)| *id);
        for (_, listener) in ordered {
            listener(&snapshot);
        }
    }
}

impl<T: Clone> Default for StatusPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription guard; unsubscribes on drop.
pub struct Subscription<T> {
    registry: Weak<Registry<T>>,
    id: u64,
}

impl<T> Subscription<T> {
    /// Remove the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut listeners) = registry.listeners.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn snapshot(state: ConnectionState, attempt: u32) -> StatusSnapshot<u32> {
        StatusSnapshot {
            state,
            attempt,
            latest_payload: None,
            last_error: None,
        }
    }

    #[test]
    fn default_snapshot_is_idle() {
        let publisher = StatusPublisher::<u32>::new();
        let current = publisher.snapshot();
        assert_eq!(current.state, ConnectionState::Idle);
        assert_eq!(current.attempt, 0);
        assert!(current.latest_payload.is_none());
        assert!(current.last_error.is_none());
    }

    #[test]
    fn listener_receives_every_publish() {
        let publisher = StatusPublisher::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = publisher.subscribe(move |s| {
            if let Ok(mut v) = sink.lock() {
                v.push(s.state);
            }
        });

        publisher.publish(snapshot(ConnectionState::Connecting, 0));
        publisher.publish(snapshot(ConnectionState::Connected, 0));

        let states = seen.lock().expect("lock");
        assert_eq!(
            *states,
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[test]
    fn delivery_is_synchronous() {
        let publisher = StatusPublisher::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let _sub = publisher.subscribe(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        publisher.publish(snapshot(ConnectionState::Connecting, 0));
        // Visible before any await point.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let publisher = StatusPublisher::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let sub = publisher.subscribe(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        publisher.publish(snapshot(ConnectionState::Connecting, 0));
        drop(sub);
        publisher.publish(snapshot(ConnectionState::Connected, 0));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_unsubscribe() {
        let publisher = StatusPublisher::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let sub = publisher.subscribe(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        publisher.publish(snapshot(ConnectionState::Connecting, 0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn watch_observes_latest() {
        let publisher = StatusPublisher::<u32>::new();
        let rx = publisher.watch();

        publisher.publish(snapshot(ConnectionState::Reconnecting, 3));
        assert_eq!(rx.borrow().state, ConnectionState::Reconnecting);
        assert_eq!(rx.borrow().attempt, 3);
    }

    #[test]
    fn multiple_listeners_fan_out() {
        let publisher = StatusPublisher::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&count);
        let b = Arc::clone(&count);
        let _sub_a = publisher.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let _sub_b = publisher.subscribe(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        publisher.publish(snapshot(ConnectionState::Connected, 0));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_may_drop_a_sibling_subscription_mid_publish() {
        let publisher = StatusPublisher::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let sibling = publisher.subscribe(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let slot = Arc::new(Mutex::new(Some(sibling)));
        let dropper = Arc::clone(&slot);
        let _sub = publisher.subscribe(move |_| {
            if let Ok(mut held) = dropper.lock() {
                held.take();
            }
        });

        publisher.publish(snapshot(ConnectionState::Connecting, 0));
        publisher.publish(snapshot(ConnectionState::Connected, 0));

        // The sibling saw the publish that removed it and nothing after.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_subscribe_mid_publish() {
        let publisher = Arc::new(StatusPublisher::<u32>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let held: Arc<Mutex<Vec<Subscription<u32>>>> = Arc::new(Mutex::new(Vec::new()));

        let source = Arc::clone(&publisher);
        let sink = Arc::clone(&count);
        let guards = Arc::clone(&held);
        let _sub = publisher.subscribe(move |_| {
            let nested_sink = Arc::clone(&sink);
            let nested = source.subscribe(move |_| {
                nested_sink.fetch_add(1, Ordering::SeqCst);
            });
            if let Ok(mut v) = guards.lock() {
                v.push(nested);
            }
        });

        publisher.publish(snapshot(ConnectionState::Connecting, 0));
        // The nested listener missed the publish that registered it.
        assert_eq!(count.load(Ordering::SeqCst), 0);

        publisher.publish(snapshot(ConnectionState::Connected, 0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_predicates() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Reconnecting.is_down());
        assert!(ConnectionState::Disconnected.is_down());
        assert!(!ConnectionState::Connected.is_down());
        assert!(!ConnectionState::Connecting.is_down());
    }
}
