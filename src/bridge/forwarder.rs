//! Relays hub state changes of whitelisted entities.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::BridgeContext;
use crate::error::{BridgeError, Result};
use crate::model::StateChangedEvent;
use crate::remote::Action;

/// Forward one event if it qualifies. Returns whether a call was attempted.
///
/// Skipped: removals (no new state), domains outside the filter, and
/// entities missing from the whitelist.
pub async fn handle_state_change(ctx: &BridgeContext, event: &StateChangedEvent) -> bool {
    let Some(new_state) = &event.new_state else {
        return false;
    };
    if !ctx.options.domains.allows(new_state.domain()) {
        return false;
    }
    if !ctx.state.is_whitelisted(&event.entity_id) {
        return false;
    }

    let mut fields = Map::new();
    fields.insert("entity_id".into(), Value::String(event.entity_id.clone()));
    fields.insert("state".into(), Value::String(new_state.state.clone()));
    if ctx.options.forward_attributes {
        fields.insert("attributes".into(), Value::Object(new_state.attributes.clone()));
    }

    debug!(instance = %ctx.instance_id, entity_id = %event.entity_id, state = %new_state.state, "forwarding state");
    // Response is not used.
    let _ = ctx.send_to_server(Action::UpdateState, fields).await;
    true
}

/// Job body: consume the hub's state-change stream until it closes.
///
/// Each event is forwarded on its own task, so a slow server never stalls
/// the receive loop. In-flight forwards are aborted when this job is.
///
/// # Errors
/// Always returns an error once it stops: either the subscription failed
/// or the stream ended.
pub async fn run_forwarder(ctx: Arc<BridgeContext>) -> Result<()> {
    let mut events = match ctx.host.subscribe_state_changes().await {
        Ok(rx) => rx,
        Err(e) => {
            error!(instance = %ctx.instance_id, error = %e, "cannot subscribe to state changes");
            return Err(e);
        }
    };
    let mut in_flight = JoinSet::new();
    while let Some(event) = events.recv().await {
        let ctx = Arc::clone(&ctx);
        in_flight.spawn(async move {
            handle_state_change(&ctx, &event).await;
        });
        // Reap finished forwards so the set stays small.
        while in_flight.try_join_next().is_some() {}
    }
    warn!(instance = %ctx.instance_id, "state change stream ended, forwarding stopped");
    Err(BridgeError::JobStopped {
        job: "forwarder",
        detail: "state change stream ended".into(),
    })
}
