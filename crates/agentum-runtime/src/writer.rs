use crate::hub::EventHub;
use crate::supervisor::CancelHandle;
use crate::{SharedStore, with_store};
use agentum_types::{AgentEvent, ErrorPayload, EventPayload, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Single consumer of a hub's persistence channel.
///
/// Commits the canonical event subset in order; partial messages never
/// reach this channel. The store already retries transient failures with
/// backoff, so a failure here is final: emit one terminal `error` event,
/// signal the supervisor's cancel handle so the child is reaped, and stop.
pub async fn run_writer(
    session_id: SessionId,
    mut persist_rx: mpsc::UnboundedReceiver<AgentEvent>,
    store: SharedStore,
    hub: Arc<EventHub>,
    cancel: CancelHandle,
) {
    while let Some(event) = persist_rx.recv().await {
        let id = session_id.clone();
        let result = with_store(&store, move |db| db.record_event(&id, &event)).await;

        if let Err(err) = result {
            tracing::error!(
                session_id = %session_id,
                error = %err,
                "Event persistence failed, aborting run"
            );
            let _ = hub
                .publish(EventPayload::Error(ErrorPayload {
                    message: format!("Event persistence failed: {}", err),
                    error_type: "persistence".to_string(),
                }))
                .await;
            cancel.request();
            return;
        }
    }

    tracing::debug!(session_id = %session_id, "Persistence channel drained");
}
