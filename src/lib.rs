//! Bridge between a Home Assistant hub and a SmartCasa server.
//!
//! Three jobs run per configured instance: a startup entity snapshot that
//! fetches the server's whitelist, a 10-second command poller, and a
//! forwarder for state changes of whitelisted entities. See [`bridge`].

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod model;
pub mod remote;
pub mod session;

pub use bridge::{BridgeContext, BridgeHandle, SyncBridge};
pub use config::{AppConfig, BridgeOptions, HubConfig, IntegrationConfig};
pub use error::{BridgeError, Result};
pub use host::{HassHost, Host, MemoryHost};
pub use model::{DomainFilter, EntityRecord, EntityState, RemoteCommand, ServiceCall, StateChangedEvent};
pub use remote::{Action, RemoteChannel};
pub use session::{ChannelStatus, InstanceState, SessionStore, StatusSnapshot};
