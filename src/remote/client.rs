//! HTTP client for the SmartCasa `api_bridge.php` endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{IntegrationConfig, REQUEST_TIMEOUT};
use crate::error::{BridgeError, Result};

/// The three actions understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    SyncEntities,
    PollCommands,
    UpdateState,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SyncEntities => "sync_entities",
            Action::PollCommands => "poll_commands",
            Action::UpdateState => "update_state",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated channel to one SmartCasa server.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct RemoteChannel {
    url: String,
    token: String,
    api_key: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl RemoteChannel {
    /// Start building a channel from an instance's credentials.
    pub fn builder(config: &IntegrationConfig) -> RemoteChannelBuilder {
        RemoteChannelBuilder::new(config)
    }

    /// Full endpoint URL this channel posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Assemble the JSON body: `fields` plus `action`, `token` and `api_key`.
    ///
    /// Credentials and action always overwrite same-named keys in `fields`.
    pub fn build_body(&self, action: Action, mut fields: Map<String, Value>) -> Value {
        fields.insert("action".into(), Value::String(action.as_str().into()));
        fields.insert("token".into(), Value::String(self.token.clone()));
        fields.insert("api_key".into(), Value::String(self.api_key.clone()));
        Value::Object(fields)
    }

    /// POST one action and return the parsed response body.
    ///
    /// # Returns
    /// - `Ok(Value)`: on HTTP 200 with a JSON body.
    /// - `Err(BridgeError::Connect)`: on TCP failure or timeout.
    /// - `Err(BridgeError::Http)`: on any status other than 200.
    /// - `Err(BridgeError::Json)`: when the body is not JSON.
    pub async fn request(&self, action: Action, fields: Map<String, Value>) -> Result<Value> {
        let body = self.build_body(action, fields);
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::Connect {
                url: self.url.clone(),
                detail: if e.is_timeout() {
                    format!("timed out after {:?}", self.request_timeout)
                } else {
                    e.to_string()
                },
            })?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(BridgeError::Http {
                status: resp.status().as_u16(),
                url: self.url.clone(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| BridgeError::Connect {
            url: self.url.clone(),
            detail: e.to_string(),
        })?;

        serde_json::from_slice::<Value>(&bytes).map_err(|e| BridgeError::Json {
            field: "body".into(),
            detail: e.to_string(),
        })
    }
}

/// Builder for [`RemoteChannel`].
pub struct RemoteChannelBuilder {
    url: String,
    token: String,
    api_key: String,
    request_timeout: Duration,
}

impl RemoteChannelBuilder {
    pub fn new(config: &IntegrationConfig) -> Self {
        Self {
            url: config.endpoint_url(),
            token: config.token.clone(),
            api_key: config.api_key.clone(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request timeout (default 10 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Consume the builder and construct a [`RemoteChannel`].
    pub fn build(self) -> RemoteChannel {
        // Client::builder() only fails when the TLS backend cannot initialise;
        // fall back to a default client instead of panicking.
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .unwrap_or_default();

        RemoteChannel {
            url: self.url,
            token: self.token,
            api_key: self.api_key,
            request_timeout: self.request_timeout,
            client,
        }
    }
}
