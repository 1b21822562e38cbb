use crate::{Error, Result};
use agentum_types::{AgentEvent, EventPayload, SessionId};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

/// A live subscription to a session's event stream.
///
/// The receiver yields replayed events first, then live events, in strictly
/// increasing sequence order. When the hub drops the subscriber for lagging,
/// `lagged` is set and the channel ends; the transport layer surfaces that
/// as a final error to the client.
pub struct Subscription {
    pub receiver: mpsc::Receiver<AgentEvent>,
    pub lagged: Arc<AtomicBool>,
}

impl Subscription {
    pub fn was_dropped_for_lag(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }
}

struct HubSubscriber {
    tx: mpsc::Sender<AgentEvent>,
    lagged: Arc<AtomicBool>,
}

struct HubInner {
    next_sequence: u64,
    closed: bool,
    /// Canonical (persistable) events fanned out so far. Replay for
    /// late subscribers reads this under the same lock that assigns
    /// sequence numbers, so the replay/live splice can neither skip nor
    /// duplicate an event.
    history: Vec<AgentEvent>,
    subscribers: Vec<HubSubscriber>,
    persist_tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

/// Per-session fan-out bus.
///
/// Single source of sequence numbers for its session. Every event (partial
/// or not) gets a dense, monotonically increasing sequence; only the
/// persistable subset is forwarded to the persistence writer and kept in
/// the replay history. A terminal event closes every subscriber stream and
/// the persist channel.
pub struct EventHub {
    session_id: SessionId,
    subscriber_buffer: usize,
    /// Last sequence persisted by earlier runs of this session; the
    /// hub assigns from `start_sequence + 1` so numbering stays
    /// monotonic across resume boundaries.
    start_sequence: u64,
    inner: Mutex<HubInner>,
}

impl EventHub {
    /// Create the hub plus the receiving end of its persistence channel.
    pub fn new(
        session_id: SessionId,
        subscriber_buffer: usize,
        start_sequence: u64,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<AgentEvent>) {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            session_id,
            subscriber_buffer: subscriber_buffer.max(1),
            start_sequence,
            inner: Mutex::new(HubInner {
                next_sequence: start_sequence + 1,
                closed: false,
                history: Vec::new(),
                subscribers: Vec::new(),
                persist_tx: Some(persist_tx),
            }),
        });
        (hub, persist_rx)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Events at or below this sequence belong to earlier runs and are
    /// replayed from the store, not from this hub.
    pub fn start_sequence(&self) -> u64 {
        self.start_sequence
    }

    /// Assign the next sequence number to `payload` and fan it out.
    ///
    /// Returns the stamped event. After a terminal event has been
    /// published every further publish fails with `StreamClosed`.
    pub async fn publish(&self, payload: EventPayload) -> Result<AgentEvent> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::StreamClosed);
        }

        let event = AgentEvent {
            payload,
            timestamp: Utc::now(),
            sequence: inner.next_sequence,
        };
        inner.next_sequence += 1;

        if event.is_persistable() {
            inner.history.push(event.clone());
            if let Some(tx) = &inner.persist_tx {
                // The writer outlives the hub unless it already aborted
                // the run; a closed channel here is that abort in flight.
                let _ = tx.send(event.clone());
            }
        }

        inner.subscribers.retain(|sub| {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: drop it, leave everyone else alone.
                    sub.lagged.store(true, Ordering::Release);
                    tracing::warn!(
                        session_id = %self.session_id,
                        "Dropping lagged subscriber"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if event.is_terminal() {
            inner.closed = true;
            inner.subscribers.clear();
            inner.persist_tx = None;
        }

        Ok(event)
    }

    /// Join the stream, replaying persistable events with
    /// `sequence > after_sequence` before going live.
    ///
    /// Replay and attachment happen under the hub lock, so an event
    /// assigned concurrently lands in the live buffer, never in a gap.
    /// On a closed hub the subscriber receives the replay and then
    /// end-of-stream.
    pub async fn subscribe(&self, after_sequence: u64) -> Subscription {
        let mut inner = self.inner.lock().await;

        let replay: Vec<AgentEvent> = inner
            .history
            .iter()
            .filter(|e| e.sequence > after_sequence)
            .cloned()
            .collect();

        let capacity = replay.len() + self.subscriber_buffer;
        let (tx, receiver) = mpsc::channel(capacity);
        for event in replay {
            // Capacity reserves room for the whole replay.
            let _ = tx.try_send(event);
        }

        let lagged = Arc::new(AtomicBool::new(false));
        if !inner.closed {
            inner.subscribers.push(HubSubscriber {
                tx,
                lagged: lagged.clone(),
            });
        }
        // On a closed hub `tx` drops here and the receiver terminates
        // after the replay.

        Subscription { receiver, lagged }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    pub async fn last_sequence(&self) -> u64 {
        self.inner.lock().await.next_sequence - 1
    }
}
