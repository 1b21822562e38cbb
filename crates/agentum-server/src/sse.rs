use agentum_runtime::{EventHub, Subscription};
use agentum_types::{AgentEvent, EventPayload, SessionDisconnectPayload};
use axum::response::sse::Event;
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;

/// One wire event: `id: <sequence>` plus the JSON record on one line.
pub fn wire_event(event: &AgentEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().id(event.sequence.to_string()).data(data)
}

/// Synthetic final event for a subscriber dropped on buffer overflow.
fn lagged_event() -> Event {
    Event::default().event("error").data(
        serde_json::json!({
            "type": "error",
            "data": {
                "message": "Subscriber lagged and was dropped; reconnect with ?after=",
                "error_type": "subscriber_lagged"
            }
        })
        .to_string(),
    )
}

/// Publishes a `session_disconnect` event when the SSE stream is dropped,
/// unless the run already ended (no events after a terminal event).
struct DisconnectGuard {
    hub: Arc<EventHub>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        tokio::spawn(async move {
            let subscribers = hub.subscriber_count().await;
            let _ = hub
                .publish(EventPayload::SessionDisconnect(SessionDisconnectPayload {
                    subscribers,
                }))
                .await;
        });
    }
}

/// Turn a replay prefix plus a live subscription into the SSE stream.
///
/// The replay part comes from the store (events of earlier runs); the
/// subscription carries this run's replay and live tail. When the
/// subscriber was dropped for lagging, one final error event is emitted
/// before the stream closes.
pub fn subscription_stream(
    store_replay: Vec<AgentEvent>,
    subscription: Subscription,
    hub: Arc<EventHub>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = DisconnectGuard { hub };

    let replay = futures::stream::iter(
        store_replay
            .iter()
            .map(|e| Ok(wire_event(e)))
            .collect::<Vec<_>>(),
    );

    let live = futures::stream::unfold(
        Some((subscription, guard)),
        |state| async move {
            let (mut subscription, guard) = state?;
            match subscription.receiver.recv().await {
                Some(event) => {
                    let item = Ok(wire_event(&event));
                    Some((item, Some((subscription, guard))))
                }
                None if subscription.was_dropped_for_lag() => {
                    // Final item; dropping the state ends the stream next poll
                    Some((Ok(lagged_event()), None))
                }
                None => None,
            }
        },
    );

    futures::StreamExt::chain(replay, live)
}

/// Stream for a finished session: persisted replay, then close.
pub fn replay_only_stream(
    events: Vec<AgentEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::iter(
        events
            .iter()
            .map(|e| Ok(wire_event(e)))
            .collect::<Vec<_>>(),
    )
}
