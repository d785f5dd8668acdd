//! The home-automation hub the bridge runs against.
//!
//! The hub owns the entity registry, the event bus and the service
//! dispatcher. The bridge only reads states, listens for changes and
//! requests service calls through [`Host`].

pub mod hass;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::{EntityState, ServiceCall, StateChangedEvent};

pub use hass::HassHost;
pub use memory::MemoryHost;

/// Capacity of the state-change channel handed out by [`Host::subscribe_state_changes`].
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Every entity currently known to the hub.
    async fn all_states(&self) -> Result<Vec<EntityState>>;

    /// Invoke `domain.service` with `data`.
    async fn call_service(&self, call: &ServiceCall) -> Result<()>;

    /// Stream of state changes. The channel closes when the hub connection ends.
    async fn subscribe_state_changes(&self) -> Result<mpsc::Receiver<StateChangedEvent>>;
}
