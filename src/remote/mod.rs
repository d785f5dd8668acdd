//! # Remote channel
//!
//! Every exchange with the SmartCasa server is a single JSON POST to
//! `{server_url}/api_bridge.php`. The body always carries `action`, `token`
//! and `api_key`; the remaining fields depend on the action:
//!
//! | action          | extra fields                           | response used            |
//! |-----------------|----------------------------------------|--------------------------|
//! | `sync_entities` | `entities`                             | `allowed_entities`       |
//! | `poll_commands` | none                                   | `status`, `commands`     |
//! | `update_state`  | `entity_id`, `state`, `attributes`     | none                     |
//!
//! Only HTTP 200 counts as success. There is no retry: the next scheduled
//! cycle is the only recovery.

pub mod client;

pub use client::{Action, RemoteChannel, RemoteChannelBuilder};
