//! Wire and host-side data types shared by the three bridge jobs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};

/// Domains handled when the configuration does not name its own set.
pub const SUPPORTED_DOMAINS: &[&str] = &[
    "light",
    "cover",
    "switch",
    "climate",
    "sensor",
    "binary_sensor",
];

// ---------------------------------------------------------------------------
// Host-side state
// ---------------------------------------------------------------------------

/// Current state of one hub entity, in Home Assistant's `/api/states` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter, handy for fixtures.
    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// The part of `entity_id` before the first `.`.
    pub fn domain(&self) -> &str {
        entity_domain(&self.entity_id)
    }
}

/// Domain portion of an entity id; the whole id when it has no `.`.
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id.split_once('.').map_or(entity_id, |(domain, _)| domain)
}

/// `data` of a hub `state_changed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangedEvent {
    pub entity_id: String,
    #[serde(default)]
    pub old_state: Option<EntityState>,
    /// `None` when the entity was removed.
    #[serde(default)]
    pub new_state: Option<EntityState>,
}

// ---------------------------------------------------------------------------
// Remote wire types
// ---------------------------------------------------------------------------

/// Flat record sent to the server in a `sync_entities` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub friendly_name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl From<&EntityState> for EntityRecord {
    fn from(state: &EntityState) -> Self {
        let friendly_name = state
            .attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(&state.entity_id)
            .to_string();
        let unit = state
            .attributes
            .get("unit_of_measurement")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            entity_id: state.entity_id.clone(),
            friendly_name,
            state: state.state.clone(),
            unit,
            attributes: state.attributes.clone(),
        }
    }
}

/// A command received from `poll_commands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCommand {
    /// `"domain.service"`, e.g. `light.turn_on`.
    pub service: String,
    pub entity_id: String,
    /// Extra service data. Empty non-object values (`null`, `[]`, `""`,
    /// `false`, `0`) mean "no payload"; any other non-object is rejected.
    #[serde(default, deserialize_with = "deserialize_payload")]
    pub payload: Option<Map<String, Value>>,
}

fn deserialize_payload<'de, D>(deserializer: D) -> std::result::Result<Option<Map<String, Value>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        Value::Bool(false) => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::Array(a) if a.is_empty() => Ok(None),
        Value::Number(n) if n.as_f64() == Some(0.0) => Ok(None),
        other => Err(D::Error::custom(format!(
            "payload must be an object, got {other}"
        ))),
    }
}

impl RemoteCommand {
    /// Parse one element of the server's `commands` array.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(BridgeError::MalformedCommand(format!(
                "expected an object, got {value}"
            )));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| BridgeError::MalformedCommand(e.to_string()))
    }

    /// Resolve into a hub service call: split the service and merge the target
    /// entity into the payload. The command's `entity_id` overrides any
    /// `entity_id` key already in the payload.
    pub fn to_service_call(&self) -> Result<ServiceCall> {
        let (domain, service) = parse_service(&self.service)?;
        let mut data = self.payload.clone().unwrap_or_default();
        data.insert("entity_id".to_string(), Value::String(self.entity_id.clone()));
        Ok(ServiceCall {
            domain: domain.to_string(),
            service: service.to_string(),
            data,
        })
    }
}

/// Split `"domain.service"` on the first `.`.
///
/// Both halves must be non-empty.
pub fn parse_service(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('.') {
        Some((domain, service)) if !domain.is_empty() && !service.is_empty() => {
            Ok((domain, service))
        }
        _ => Err(BridgeError::MalformedService(raw.to_string())),
    }
}

/// A resolved call into the hub's service dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Domain filter
// ---------------------------------------------------------------------------

/// Which entity domains the bridge snapshots and forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainFilter {
    All,
    Only(HashSet<String>),
}

impl DomainFilter {
    pub fn only<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DomainFilter::Only(domains.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, domain: &str) -> bool {
        match self {
            DomainFilter::All => true,
            DomainFilter::Only(set) => set.contains(domain),
        }
    }
}

impl Default for DomainFilter {
    fn default() -> Self {
        DomainFilter::only(SUPPORTED_DOMAINS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_uses_friendly_name_and_unit() {
        let state = EntityState::new("sensor.temp", "21.5")
            .with_attribute("friendly_name", "Soggiorno")
            .with_attribute("unit_of_measurement", "°C");
        let record = EntityRecord::from(&state);
        assert_eq!(record.friendly_name, "Soggiorno");
        assert_eq!(record.unit.as_deref(), Some("°C"));
        assert_eq!(record.state, "21.5");
        assert_eq!(record.attributes.len(), 2);
    }

    #[test]
    fn record_falls_back_to_entity_id() {
        let record = EntityRecord::from(&EntityState::new("light.kitchen", "on"));
        assert_eq!(record.friendly_name, "light.kitchen");
        assert!(record.unit.is_none());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("unit").is_none(), "absent unit is omitted: {json}");
    }

    #[test]
    fn parse_service_splits_on_first_dot() {
        assert_eq!(parse_service("light.turn_on").unwrap(), ("light", "turn_on"));
        assert_eq!(parse_service("a.b.c").unwrap(), ("a", "b.c"));
    }

    #[test]
    fn parse_service_rejects_missing_parts() {
        for raw in ["invalid_no_dot", ".turn_on", "light.", ""] {
            assert!(
                matches!(parse_service(raw), Err(BridgeError::MalformedService(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn command_merges_payload_with_entity_id() {
        let cmd = RemoteCommand::from_value(&json!({
            "service": "light.turn_on",
            "entity_id": "light.kitchen",
            "payload": {"brightness": 80}
        }))
        .unwrap();
        let call = cmd.to_service_call().unwrap();
        assert_eq!(call.domain, "light");
        assert_eq!(call.service, "turn_on");
        assert_eq!(
            Value::Object(call.data),
            json!({"brightness": 80, "entity_id": "light.kitchen"})
        );
    }

    #[test]
    fn command_null_payload_is_empty() {
        let cmd = RemoteCommand::from_value(&json!({
            "service": "switch.toggle",
            "entity_id": "switch.pump",
            "payload": null
        }))
        .unwrap();
        let call = cmd.to_service_call().unwrap();
        assert_eq!(Value::Object(call.data), json!({"entity_id": "switch.pump"}));
    }

    #[test]
    fn command_empty_non_object_payload_is_empty() {
        for payload in [json!([]), json!(""), json!(false), json!(0)] {
            let cmd = RemoteCommand::from_value(&json!({
                "service": "switch.toggle",
                "entity_id": "switch.pump",
                "payload": payload.clone()
            }))
            .unwrap_or_else(|e| panic!("payload {payload} rejected: {e}"));
            assert!(cmd.payload.is_none(), "payload {payload}");
            let call = cmd.to_service_call().unwrap();
            assert_eq!(Value::Object(call.data), json!({"entity_id": "switch.pump"}));
        }
    }

    #[test]
    fn command_non_empty_non_object_payload_is_malformed() {
        for payload in [json!([1]), json!("on"), json!(true), json!(5)] {
            let err = RemoteCommand::from_value(&json!({
                "service": "switch.toggle",
                "entity_id": "switch.pump",
                "payload": payload.clone()
            }))
            .unwrap_err();
            assert!(
                matches!(err, BridgeError::MalformedCommand(_)),
                "payload {payload}: {err}"
            );
        }
    }

    #[test]
    fn command_entity_id_overrides_payload() {
        let cmd = RemoteCommand::from_value(&json!({
            "service": "light.turn_off",
            "entity_id": "light.a",
            "payload": {"entity_id": "light.b"}
        }))
        .unwrap();
        let call = cmd.to_service_call().unwrap();
        assert_eq!(call.data["entity_id"], "light.a");
    }

    #[test]
    fn command_without_service_is_malformed() {
        let err = RemoteCommand::from_value(&json!({"entity_id": "light.a"})).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedCommand(_)));
        let err = RemoteCommand::from_value(&json!("light.turn_on")).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedCommand(_)));
    }

    #[test]
    fn default_filter_is_supported_set() {
        let filter = DomainFilter::default();
        assert!(filter.allows("binary_sensor"));
        assert!(!filter.allows("media_player"));
        assert!(DomainFilter::All.allows("media_player"));
    }

    #[test]
    fn entity_domain_splits() {
        assert_eq!(entity_domain("cover.garage"), "cover");
        assert_eq!(entity_domain("weird"), "weird");
    }

    #[test]
    fn state_changed_event_parses_removal() {
        let ev: StateChangedEvent = serde_json::from_value(json!({
            "entity_id": "light.a",
            "old_state": {"entity_id": "light.a", "state": "on", "attributes": {}},
            "new_state": null
        }))
        .unwrap();
        assert!(ev.new_state.is_none());
        assert_eq!(ev.old_state.unwrap().state, "on");
    }

    mod prop {
        use super::super::parse_service;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_service_roundtrips(domain in "[a-z_]{1,12}", service in "[a-z_.]{1,12}") {
                let raw = format!("{domain}.{service}");
                let (d, s) = parse_service(&raw).unwrap();
                prop_assert_eq!(d, domain.as_str());
                prop_assert_eq!(s, service.as_str());
            }

            #[test]
            fn parse_service_without_dot_always_fails(raw in "[a-z_]{0,20}") {
                prop_assert!(parse_service(&raw).is_err());
            }
        }
    }
}
