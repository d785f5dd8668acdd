//! Home Assistant over its REST and WebSocket APIs.
//!
//! - states: `GET /api/states`
//! - service calls: `POST /api/services/{domain}/{service}`
//! - state changes: `/api/websocket`, authenticate, then
//!   `subscribe_events` for `state_changed`

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::{Host, EVENT_CHANNEL_CAPACITY};
use crate::config::HubConfig;
use crate::error::{BridgeError, Result};
use crate::model::{EntityState, ServiceCall, StateChangedEvent};

const SUBSCRIBE_ID: u64 = 1;

/// Messages the hub sends on the WebSocket API that the bridge cares about.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Incoming {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    Event {
        id: u64,
        event: EventEnvelope,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    event_type: String,
    data: Value,
}

/// Map `http(s)://host` to `ws(s)://host/api/websocket`.
pub fn websocket_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/api/websocket")
}

/// Decode one text frame into a state change, if it is one.
fn decode_state_changed(text: &str) -> Option<StateChangedEvent> {
    match serde_json::from_str::<Incoming>(text) {
        Ok(Incoming::Event { id, event }) if id == SUBSCRIBE_ID && event.event_type == "state_changed" => {
            match serde_json::from_value(event.data) {
                Ok(ev) => Some(ev),
                Err(e) => {
                    warn!(error = %e, "undecodable state_changed payload");
                    None
                }
            }
        }
        _ => None,
    }
}

/// Home Assistant client authenticated with a long-lived access token.
pub struct HassHost {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl HassHost {
    pub fn new(config: &HubConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            client,
        }
    }

    fn check(&self, resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(BridgeError::Http {
                status: resp.status().as_u16(),
                url: url.to_string(),
            })
        }
    }
}

#[async_trait]
impl Host for HassHost {
    async fn all_states(&self) -> Result<Vec<EntityState>> {
        let url = format!("{}/api/states", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| BridgeError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        let resp = self.check(resp, &url)?;
        resp.json::<Vec<EntityState>>()
            .await
            .map_err(|e| BridgeError::Json {
                field: "states".into(),
                detail: e.to_string(),
            })
    }

    async fn call_service(&self, call: &ServiceCall) -> Result<()> {
        let url = format!(
            "{}/api/services/{}/{}",
            self.base_url, call.domain, call.service
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&call.data)
            .send()
            .await
            .map_err(|e| BridgeError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        self.check(resp, &url).map(|_| ())
    }

    async fn subscribe_state_changes(&self) -> Result<mpsc::Receiver<StateChangedEvent>> {
        let url = websocket_url(&self.base_url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| BridgeError::WebSocket(format!("connect {url}: {e}")))?;
        let (mut sink, mut stream) = ws_stream.split();

        // Handshake: auth_required -> auth -> auth_ok -> subscribe -> result.
        loop {
            let text = match stream.next().await {
                Some(Ok(WsMessage::Text(t))) => t,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(BridgeError::WebSocket(e.to_string())),
                None => return Err(BridgeError::WebSocket("closed during handshake".into())),
            };
            let msg: Incoming = serde_json::from_str(&text).map_err(|e| BridgeError::Json {
                field: "type".into(),
                detail: e.to_string(),
            })?;
            match msg {
                Incoming::AuthRequired { ha_version } => {
                    debug!(ha_version = ?ha_version, "hub requested auth");
                    let auth = json!({"type": "auth", "access_token": self.access_token});
                    sink.send(WsMessage::Text(auth.to_string()))
                        .await
                        .map_err(|e| BridgeError::WebSocket(e.to_string()))?;
                }
                Incoming::AuthOk { ha_version } => {
                    info!(ha_version = ?ha_version, "hub websocket authenticated");
                    let sub = json!({
                        "id": SUBSCRIBE_ID,
                        "type": "subscribe_events",
                        "event_type": "state_changed"
                    });
                    sink.send(WsMessage::Text(sub.to_string()))
                        .await
                        .map_err(|e| BridgeError::WebSocket(e.to_string()))?;
                }
                Incoming::AuthInvalid { message } => {
                    return Err(BridgeError::WebSocket(format!(
                        "auth rejected: {}",
                        message.unwrap_or_default()
                    )));
                }
                Incoming::Result { id, success, error } if id == SUBSCRIBE_ID => {
                    if success {
                        break;
                    }
                    return Err(BridgeError::WebSocket(format!(
                        "subscribe_events failed: {}",
                        error.unwrap_or(Value::Null)
                    )));
                }
                _ => {}
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = tx.closed() => {
                        debug!("event receiver dropped, closing hub websocket");
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                    frame = stream.next() => frame,
                };
                let Some(frame) = frame else { break };
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        if let Some(ev) = decode_state_changed(&text) {
                            if tx.send(ev).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "hub websocket read failed");
                        break;
                    }
                }
            }
            info!("hub websocket closed");
        });
        Ok(rx)
    }
}
