//! Remote command polling.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::BridgeContext;
use crate::error::BridgeError;
use crate::model::RemoteCommand;
use crate::remote::Action;

/// One command that could not be executed.
#[derive(Debug)]
pub struct CommandFailure {
    /// Position in the server's `commands` array.
    pub index: usize,
    /// The raw `service` string when one could be read.
    pub service: Option<String>,
    pub error: BridgeError,
}

/// Result of a poll cycle whose response had `status == "success"`.
#[derive(Debug, Default)]
pub struct PollReport {
    pub executed: usize,
    pub failures: Vec<CommandFailure>,
}

impl PollReport {
    pub fn total(&self) -> usize {
        self.executed + self.failures.len()
    }
}

/// Run one poll cycle.
///
/// Returns `None` when the server could not be reached or did not answer
/// with `status == "success"`; nothing is dispatched in that case. Commands
/// run in order and a failing command never stops the rest of the batch.
pub async fn poll_once(ctx: &BridgeContext) -> Option<PollReport> {
    let response = ctx.send_to_server(Action::PollCommands, Map::new()).await?;

    if response.get("status").and_then(Value::as_str) != Some("success") {
        debug!(instance = %ctx.instance_id, "poll returned no success status");
        return None;
    }

    let commands = response
        .get("commands")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut report = PollReport::default();
    for (index, raw) in commands.iter().enumerate() {
        let service = raw
            .get("service")
            .and_then(Value::as_str)
            .map(str::to_string);
        match execute(ctx, raw).await {
            Ok(()) => report.executed += 1,
            Err(error) => {
                error!(
                    instance = %ctx.instance_id,
                    index,
                    service = service.as_deref().unwrap_or("<missing>"),
                    error = %error,
                    "remote command failed"
                );
                report.failures.push(CommandFailure { index, service, error });
            }
        }
    }
    Some(report)
}

async fn execute(ctx: &BridgeContext, raw: &Value) -> crate::error::Result<()> {
    let command = RemoteCommand::from_value(raw)?;
    let call = command.to_service_call()?;
    info!(
        instance = %ctx.instance_id,
        service = %command.service,
        entity_id = %command.entity_id,
        "executing remote command"
    );
    ctx.host.call_service(&call).await
}

/// Job body: poll every `poll_interval` until the task is aborted.
///
/// The first poll happens one full interval after start. Missed ticks are
/// skipped, so cycles never overlap. Never returns on its own.
pub async fn run_poller(ctx: Arc<BridgeContext>) -> crate::error::Result<()> {
    let period = ctx.options.poll_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Some(report) = poll_once(&ctx).await {
            if report.total() > 0 {
                info!(
                    instance = %ctx.instance_id,
                    executed = report.executed,
                    failed = report.failures.len(),
                    "poll cycle finished"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_total_counts_failures() {
        let report = PollReport {
            executed: 2,
            failures: vec![CommandFailure {
                index: 1,
                service: Some("invalid_no_dot".into()),
                error: BridgeError::MalformedService("invalid_no_dot".into()),
            }],
        };
        assert_eq!(report.total(), 3);
        assert_eq!(PollReport::default().total(), 0);
    }
}
