//! In-process hub used by tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::{Host, EVENT_CHANNEL_CAPACITY};
use crate::error::{BridgeError, Result};
use crate::model::{EntityState, ServiceCall, StateChangedEvent};

/// A hub whose registry is a map and whose dispatcher just records calls.
#[derive(Default)]
pub struct MemoryHost {
    states: Mutex<BTreeMap<String, EntityState>>,
    calls: Mutex<Vec<ServiceCall>>,
    failing_domains: Mutex<HashSet<String>>,
    states_unavailable: AtomicBool,
    subscribers: Mutex<Vec<mpsc::Sender<StateChangedEvent>>>,
    subscribed: Notify,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_states<I: IntoIterator<Item = EntityState>>(states: I) -> Self {
        let host = Self::new();
        for s in states {
            host.insert_state(s);
        }
        host
    }

    pub fn insert_state(&self, state: EntityState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(state.entity_id.clone(), state);
    }

    /// Make every call into `domain` fail with [`BridgeError::Host`].
    pub fn fail_domain(&self, domain: &str) {
        self.failing_domains
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(domain.to_string());
    }

    /// Make [`Host::all_states`] fail while `unavailable` is set.
    pub fn set_states_unavailable(&self, unavailable: bool) {
        self.states_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop every subscription sender, ending all open event streams.
    pub fn close_subscribers(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Service calls dispatched so far, in order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Resolve once at least `n` subscribers are registered.
    pub async fn wait_for_subscribers(&self, n: usize) {
        loop {
            let notified = self.subscribed.notified();
            if self.subscriber_count() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Apply `new_state` to the registry and publish the change.
    ///
    /// Returns how many subscribers received it.
    pub async fn set_state(&self, new_state: EntityState) -> usize {
        let old_state = self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(new_state.entity_id.clone(), new_state.clone());
        self.emit(StateChangedEvent {
            entity_id: new_state.entity_id.clone(),
            old_state,
            new_state: Some(new_state),
        })
        .await
    }

    /// Publish a raw event without touching the registry.
    ///
    /// Subscribers whose receiver is gone are dropped.
    pub async fn emit(&self, event: StateChangedEvent) -> usize {
        let senders: Vec<_> = {
            let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subs.retain(|tx| !tx.is_closed());
            subs.clone()
        };
        let mut delivered = 0;
        for tx in senders {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| !tx.is_closed());
        delivered
    }
}

#[async_trait]
impl Host for MemoryHost {
    async fn all_states(&self) -> Result<Vec<EntityState>> {
        if self.states_unavailable.load(Ordering::SeqCst) {
            return Err(BridgeError::Host("state registry unavailable".into()));
        }
        Ok(self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }

    async fn call_service(&self, call: &ServiceCall) -> Result<()> {
        let failing = self
            .failing_domains
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&call.domain);
        if failing {
            return Err(BridgeError::Host(format!(
                "service {}.{} failed",
                call.domain, call.service
            )));
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.clone());
        Ok(())
    }

    async fn subscribe_state_changes(&self) -> Result<mpsc::Receiver<StateChangedEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        self.subscribed.notify_waiters();
        Ok(rx)
    }
}
