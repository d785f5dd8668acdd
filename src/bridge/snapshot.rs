//! Startup entity snapshot and whitelist refresh.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info};

use super::BridgeContext;
use crate::error::Result;
use crate::model::{EntityRecord, EntityState};
use crate::remote::Action;

/// How the whitelist was (or was not) updated by one sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Server sent `allowed_entities`; the whitelist now holds that many ids.
    ServerList(usize),
    /// Server answered without a filter; every snapshotted entity is allowed.
    AllSnapshotted(usize),
    /// Call failed; whitelist untouched.
    NoResponse,
}

/// Ids from an `allowed_entities` array. Non-string elements are dropped.
///
/// `None` when the key is missing, null or not an array.
pub fn allowed_entities(response: &Value) -> Option<Vec<String>> {
    response
        .get("allowed_entities")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
}

/// Records for every host entity whose domain passes the configured filter.
pub fn build_records(ctx: &BridgeContext, states: &[EntityState]) -> Vec<EntityRecord> {
    states
        .iter()
        .filter(|s| ctx.options.domains.allows(s.domain()))
        .map(EntityRecord::from)
        .collect()
}

/// Snapshot the hub, send `sync_entities` and update the whitelist.
///
/// # Errors
/// Only when the hub cannot list its states; remote failures yield
/// `Ok(SyncOutcome::NoResponse)`.
pub async fn sync_all_entities(ctx: &BridgeContext) -> Result<SyncOutcome> {
    let states = ctx.host.all_states().await?;
    let records = build_records(ctx, &states);
    info!(instance = %ctx.instance_id, count = records.len(), "syncing entities");

    let ids: Vec<String> = records.iter().map(|r| r.entity_id.clone()).collect();
    let entities = serde_json::to_value(&records).unwrap_or(Value::Array(Vec::new()));
    let mut fields = Map::new();
    fields.insert("entities".into(), entities);

    let Some(response) = ctx.send_to_server(Action::SyncEntities, fields).await else {
        return Ok(SyncOutcome::NoResponse);
    };

    let outcome = match allowed_entities(&response) {
        Some(list) => SyncOutcome::ServerList(ctx.state.replace_whitelist(list)),
        None => SyncOutcome::AllSnapshotted(ctx.state.replace_whitelist(ids)),
    };
    ctx.state.mark_synced();

    match outcome {
        SyncOutcome::ServerList(n) => {
            info!(instance = %ctx.instance_id, active = n, "whitelist received")
        }
        SyncOutcome::AllSnapshotted(n) => {
            info!(instance = %ctx.instance_id, active = n, "no whitelist in response, allowing all synced entities")
        }
        SyncOutcome::NoResponse => {}
    }
    Ok(outcome)
}

/// Job body: one sync, logged. Not retried.
///
/// A hub-side failure is returned so the owner of the instance can reload it.
pub async fn run_snapshot(ctx: Arc<BridgeContext>) -> Result<()> {
    sync_all_entities(&ctx).await.map(|_| ()).map_err(|e| {
        error!(instance = %ctx.instance_id, error = %e, "entity snapshot failed");
        e
    })
}
