//! # SyncBridge
//!
//! Runs the three jobs of one configured instance against a [`Host`]:
//!
//! 1. **Snapshot** ([`snapshot`]): once at setup, sends every supported entity
//!    with `sync_entities` and stores the returned whitelist.
//! 2. **Poller** ([`poller`]): every 10 s, fetches `poll_commands` and
//!    dispatches each command to the hub.
//! 3. **Forwarder** ([`forwarder`]): relays state changes of whitelisted
//!    entities with `update_state`.
//!
//! The jobs share nothing but a [`BridgeContext`]: the remote channel, the
//! instance's [`InstanceState`] and the host.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let bridge = SyncBridge::new();
//! let mut handle = bridge.setup("entry-1", &config.integration, config.options, host);
//! tokio::select! {
//!     _ = tokio::signal::ctrl_c() => {}
//!     err = handle.failure() => eprintln!("instance needs a reload: {err}"),
//! }
//! handle.unload().await;
//! ```

pub mod forwarder;
pub mod poller;
pub mod snapshot;

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{BridgeOptions, IntegrationConfig};
use crate::error::{BridgeError, Result};
use crate::host::Host;
use crate::remote::{Action, RemoteChannel};
use crate::session::{ChannelStatus, InstanceState, SessionStore, StatusSnapshot};

pub use forwarder::{handle_state_change, run_forwarder};
pub use poller::{poll_once, run_poller, CommandFailure, PollReport};
pub use snapshot::{sync_all_entities, SyncOutcome};

/// Everything a job needs, owned by one instance.
pub struct BridgeContext {
    pub instance_id: String,
    pub channel: RemoteChannel,
    pub state: Arc<InstanceState>,
    pub host: Arc<dyn Host>,
    pub options: BridgeOptions,
}

impl BridgeContext {
    /// Send one action and return the response body, or `None` on any failure.
    ///
    /// Failures are logged here and recorded in the instance status; callers
    /// treat `None` as "nothing to do this cycle".
    pub async fn send_to_server(&self, action: Action, fields: Map<String, Value>) -> Option<Value> {
        match self.channel.request(action, fields).await {
            Ok(body) => {
                let previous = self.state.record_channel(ChannelStatus::Ok);
                if !matches!(previous, ChannelStatus::Ok | ChannelStatus::Idle) {
                    info!(instance = %self.instance_id, %action, "server reachable again");
                }
                Some(body)
            }
            Err(e) => {
                let next = match &e {
                    BridgeError::Http { status, .. } => ChannelStatus::Http(*status),
                    other => ChannelStatus::Error(other.to_string()),
                };
                self.state.record_channel(next);
                warn!(instance = %self.instance_id, %action, error = %e, "server call failed");
                None
            }
        }
    }
}

/// Owns the session store and starts instances.
#[derive(Debug, Clone, Default)]
pub struct SyncBridge {
    sessions: SessionStore,
}

impl SyncBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Register `instance_id` and spawn its three jobs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn setup(
        &self,
        instance_id: &str,
        config: &IntegrationConfig,
        options: BridgeOptions,
        host: Arc<dyn Host>,
    ) -> BridgeHandle {
        let state = self.sessions.create(instance_id);
        let channel = RemoteChannel::builder(config)
            .request_timeout(options.request_timeout)
            .build();
        let ctx = Arc::new(BridgeContext {
            instance_id: instance_id.to_string(),
            channel,
            state,
            host,
            options,
        });

        info!(instance = %instance_id, home = %config.name, url = %ctx.channel.url(), "setting up bridge");

        let mut tasks = JoinSet::new();
        tasks.spawn(snapshot::run_snapshot(Arc::clone(&ctx)));
        tasks.spawn(poller::run_poller(Arc::clone(&ctx)));
        tasks.spawn(forwarder::run_forwarder(Arc::clone(&ctx)));

        BridgeHandle {
            ctx,
            tasks,
            sessions: self.sessions.clone(),
        }
    }
}

/// A running instance. Dropping it leaves the jobs running; call
/// [`unload`](Self::unload) to stop them.
pub struct BridgeHandle {
    ctx: Arc<BridgeContext>,
    tasks: JoinSet<Result<()>>,
    sessions: SessionStore,
}

impl BridgeHandle {
    pub fn instance_id(&self) -> &str {
        &self.ctx.instance_id
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub fn status(&self) -> StatusSnapshot {
        self.ctx.state.status()
    }

    /// Wait until a job fails or stops unexpectedly.
    ///
    /// A snapshot that completes normally is not a failure. When no job can
    /// fail any more this future stays pending. Cancel safe.
    pub async fn failure(&mut self) -> BridgeError {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => return e,
                Err(e) => {
                    return BridgeError::JobStopped {
                        job: "task",
                        detail: e.to_string(),
                    }
                }
            }
        }
        std::future::pending().await
    }

    /// Stop the jobs and drop the instance record. Returns whether a record
    /// was present.
    pub async fn unload(mut self) -> bool {
        self.tasks.abort_all();
        // Aborted tasks resolve to a cancellation error.
        while self.tasks.join_next().await.is_some() {}
        let removed = self.sessions.release(&self.ctx.instance_id, &self.ctx.state);
        info!(instance = %self.ctx.instance_id, "bridge unloaded");
        removed
    }
}
