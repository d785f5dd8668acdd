//! Per-instance state: the whitelist and the channel status.
//!
//! ## Design
//! - `InstanceState` is shared as `Arc` between the three jobs of one instance
//! - `SessionStore`: Arc<Mutex<HashMap<String, Arc<InstanceState>>>>, keyed by instance id
//! - A record is inserted at setup and removed at unload; nothing is shared
//!   across instances

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Last observed outcome of a call to the SmartCasa server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No call has completed yet.
    Idle,
    Ok,
    /// Server replied with a non-200 status.
    Http(u16),
    /// Transport failure, timeout or unreadable body.
    Error(String),
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Idle => write!(f, "idle"),
            ChannelStatus::Ok => write!(f, "ok"),
            ChannelStatus::Http(code) => write!(f, "http {code}"),
            ChannelStatus::Error(detail) => write!(f, "error: {detail}"),
        }
    }
}

/// Point-in-time copy of an instance's status fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub channel: ChannelStatus,
    /// Milliseconds since the Unix epoch of the last successful `sync_entities`.
    pub last_sync_ms: Option<u64>,
    pub whitelist_len: usize,
}

#[derive(Debug)]
struct Status {
    channel: ChannelStatus,
    last_sync_ms: Option<u64>,
}

/// State owned by one configured integration instance.
#[derive(Debug)]
pub struct InstanceState {
    whitelist: RwLock<HashSet<String>>,
    status: Mutex<Status>,
}

impl Default for InstanceState {
    fn default() -> Self {
        Self {
            whitelist: RwLock::new(HashSet::new()),
            status: Mutex::new(Status {
                channel: ChannelStatus::Idle,
                last_sync_ms: None,
            }),
        }
    }
}

impl InstanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new whitelist wholesale. Returns the new size.
    pub fn replace_whitelist<I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let next: HashSet<String> = ids.into_iter().collect();
        let len = next.len();
        *self.whitelist.write().unwrap_or_else(|e| e.into_inner()) = next;
        len
    }

    pub fn is_whitelisted(&self, entity_id: &str) -> bool {
        self.whitelist
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(entity_id)
    }

    pub fn whitelist(&self) -> HashSet<String> {
        self.whitelist
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Record the outcome of a remote call. Returns the previous status.
    pub fn record_channel(&self, next: ChannelStatus) -> ChannelStatus {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut status.channel, next)
    }

    pub fn mark_synced(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_sync_ms = Some(now);
    }

    pub fn status(&self) -> StatusSnapshot {
        let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        StatusSnapshot {
            channel: status.channel.clone(),
            last_sync_ms: status.last_sync_ms,
            whitelist_len: self.whitelist_len(),
        }
    }
}

/// Registry of live instances.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Arc<InstanceState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh record for `instance_id`, replacing any previous one.
    pub fn create(&self, instance_id: &str) -> Arc<InstanceState> {
        let state = Arc::new(InstanceState::new());
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(instance_id.to_string(), Arc::clone(&state));
        state
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<InstanceState>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(instance_id)
            .cloned()
    }

    pub fn remove(&self, instance_id: &str) -> Option<Arc<InstanceState>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(instance_id)
    }

    /// Remove `instance_id` only if it still maps to `state`, so an older
    /// handle cannot drop a newer record set up under the same id.
    pub fn release(&self, instance_id: &str, state: &Arc<InstanceState>) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(instance_id) {
            Some(current) if Arc::ptr_eq(current, state) => {
                map.remove(instance_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
