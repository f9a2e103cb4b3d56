//! Per-sensor broadcast streams.
//!
//! A [`SensorStream`] is a pure conduit: it owns the set of live
//! subscriber queues for one sensor and copies every published reading
//! into each of them. It keeps no history, so a new subscriber only sees
//! readings published after it subscribed.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────────────┐
//!  SourceReader ──────▶ │ SensorStream ("touch")       │
//!    publish()          │  RwLock<HashMap<Id, Sender>> │
//!                       └──┬───────────┬───────────┬───┘
//!                 try_send │           │           │
//!                          ▼           ▼           ▼
//!                    ┌──────────┐ ┌──────────┐ ┌──────────┐
//!                    │ queue #1 │ │ queue #2 │ │ queue #3 │  bounded mpsc
//!                    └────┬─────┘ └────┬─────┘ └────┬─────┘
//!                         ▼            ▼            ▼
//!                   Subscription  Subscription  Subscription (HTTP responses)
//! ```
//!
//! # Overflow policy
//!
//! Each subscriber has a bounded queue. `publish` never waits: when a
//! subscriber's queue is full the new reading is dropped for that
//! subscriber only and counted in [`StreamStats::dropped`]. Other
//! subscribers are unaffected.
//!
//! A disconnect marker is never dropped silently. A subscriber with no
//! room for it is evicted instead: its queue drains and then ends, so the
//! consumer still learns the source went away.
//!
//! # Ordering
//!
//! The subscriber set is read-locked for the whole of a publish and
//! write-locked by subscribe/unsubscribe, so a publish reaches exactly the
//! subscribers registered when it started. Every queue is FIFO, so each
//! subscriber sees the stream's publish order.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use sensorcast_core::{Reading, SensorName};

/// Default number of readings buffered per subscriber.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Source of process-unique subscription ids.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one subscription.
///
/// Ids are unique across all streams, so an id can never unsubscribe a
/// stranger on another stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that received the reading
    pub delivered: usize,

    /// Subscribers whose queue was full
    pub dropped: usize,

    /// Subscribers found gone and removed
    pub pruned: usize,

    /// Subscribers removed for having no room for a disconnect marker
    pub evicted: usize,
}

/// Counters for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Currently registered subscribers
    pub subscribers: usize,

    /// Readings published since startup
    pub published: u64,

    /// Per-subscriber deliveries dropped on overflow since startup
    pub dropped: u64,

    /// Subscribers evicted on a missed disconnect marker since startup
    pub evicted: u64,
}

struct StreamInner {
    name: SensorName,
    buffer: usize,
    subscribers: RwLock<HashMap<SubscriptionId, mpsc::Sender<Reading>>>,
    published: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl StreamInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(sensor = %self.name, subscription = %id, "Removed subscriber");
        }
        removed
    }
}

/// Broadcast stream for one sensor.
///
/// Cheap to clone; clones share the same subscriber set.
#[derive(Clone)]
pub struct SensorStream {
    inner: Arc<StreamInner>,
}

impl SensorStream {
    /// Creates a stream with the default per-subscriber buffer.
    pub fn new(name: SensorName) -> Self {
        Self::with_buffer(name, DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Creates a stream buffering up to `buffer` readings per subscriber.
    ///
    /// A zero buffer is raised to one.
    pub fn with_buffer(name: SensorName, buffer: usize) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                name,
                buffer: buffer.max(1),
                subscribers: RwLock::new(HashMap::new()),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the sensor this stream carries.
    pub fn name(&self) -> &SensorName {
        &self.inner.name
    }

    /// Returns the per-subscriber buffer size.
    pub fn buffer(&self) -> usize {
        self.inner.buffer
    }

    /// Registers a new subscriber.
    ///
    /// The subscription receives every reading published after this call
    /// returns, in publish order.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = SubscriptionId::next();

        self.inner.subscribers.write().insert(id, tx);
        debug!(sensor = %self.inner.name, subscription = %id, "Added subscriber");

        Subscription {
            id,
            receiver: rx,
            stream: Arc::clone(&self.inner),
        }
    }

    /// Deregisters a subscriber.
    ///
    /// Idempotent: unknown or already removed ids are ignored. Returns
    /// whether a subscriber was actually removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id)
    }

    /// Delivers `reading` to every registered subscriber without waiting.
    ///
    /// A full queue drops a value for that subscriber, but evicts it when
    /// the reading is a disconnect marker.
    pub fn publish(&self, reading: Reading) -> PublishReport {
        let mut report = PublishReport::default();
        let mut closed = Vec::new();
        let mut lagging = Vec::new();

        {
            let subs = self.inner.subscribers.read();
            for (id, tx) in subs.iter() {
                match tx.try_send(reading) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(r)) if r.is_disconnect() => lagging.push(*id),
                    Err(TrySendError::Full(_)) => report.dropped += 1,
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        self.inner.published.fetch_add(1, Ordering::Relaxed);

        if report.dropped > 0 {
            self.inner
                .dropped
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
            debug!(
                sensor = %self.inner.name,
                dropped = report.dropped,
                "Subscriber queue full, reading dropped"
            );
        }

        // Receivers dropped without unsubscribing; the read lock is released.
        for id in closed {
            if self.inner.remove(id) {
                report.pruned += 1;
            }
        }

        // Dropping the sender ends the subscription once its queue drains.
        for id in lagging {
            if self.inner.remove(id) {
                report.evicted += 1;
                warn!(
                    sensor = %self.inner.name,
                    subscription = %id,
                    "Subscriber too slow for disconnect marker, evicted"
                );
            }
        }
        if report.evicted > 0 {
            self.inner
                .evicted
                .fetch_add(report.evicted as u64, Ordering::Relaxed);
        }

        report
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Returns a snapshot of this stream's counters.
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            subscribers: self.subscriber_count(),
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            evicted: self.inner.evicted.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for SensorStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorStream")
            .field("name", &self.inner.name)
            .field("buffer", &self.inner.buffer)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A live registration on one [`SensorStream`].
///
/// Owned by exactly one consumer. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Reading>,
    stream: Arc<StreamInner>,
}

impl Subscription {
    /// Returns this subscription's id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the sensor subscribed to.
    pub fn sensor(&self) -> &SensorName {
        &self.stream.name
    }

    /// Waits for the next reading.
    ///
    /// Returns `None` once the subscription has been removed from its
    /// stream and every buffered reading has been received.
    pub async fn recv(&mut self) -> Option<Reading> {
        self.receiver.recv().await
    }

    /// Returns the next buffered reading without waiting.
    pub fn try_recv(&mut self) -> Option<Reading> {
        self.receiver.try_recv().ok()
    }

    /// Deregisters from the stream.
    ///
    /// Readings already queued can still be received. Calling this more
    /// than once has no further effect.
    pub fn unsubscribe(&mut self) {
        self.stream.remove(self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stream.remove(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("sensor", &self.stream.name)
            .finish()
    }
}
