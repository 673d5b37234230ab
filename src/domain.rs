//! C5: domain value objects (Service, Check, Status, Node) and their JSON
//! dump/load. Field casing on the wire matters — Consul's HTTP API is
//! PascalCase throughout except for the one quirk called out on
//! `Service::dump` below, which this crate preserves rather than "fixes".

use crate::error::Error;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

/// A TTL-based health check attached to a `Service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Duration string, e.g. `"10s"`, `"1m"`, `"500"` (bare ms).
    pub ttl: String,
    /// Duration string; the agent auto-deregisters the owning service if
    /// its check stays critical longer than this.
    pub deregister_critical_service_after: String,
}

impl Default for Check {
    fn default() -> Self {
        Check {
            ttl: "10s".to_string(),
            deregister_critical_service_after: "10m".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[allow(non_snake_case)]
struct CheckWire {
    TTL: String,
    DeregisterCriticalServiceAfter: String,
}

impl Check {
    pub fn dump(&self) -> serde_json::Value {
        let wire = CheckWire {
            TTL: self.ttl.clone(),
            DeregisterCriticalServiceAfter: self.deregister_critical_service_after.clone(),
        };
        serde_json::to_value(wire).expect("Check always serializes")
    }

    pub fn load(raw: serde_json::Value) -> Result<Self, Error> {
        let wire: CheckWire = serde_json::from_value(raw)?;
        Ok(Check {
            ttl: wire.TTL,
            deregister_critical_service_after: wire.DeregisterCriticalServiceAfter,
        })
    }
}

/// A service definition. The *announce key* is `(id, name)`; the *check
/// id* the agent exposes is `"service:" + (id ?? name)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    pub id: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub tags: Vec<String>,
    pub check: Option<Check>,
}

#[derive(Debug, Default, Serialize)]
#[allow(non_snake_case)]
struct ServiceWireOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    ID: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    Name: Option<String>,
    Tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    Port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    Address: Option<String>,
    // NOTE: lowercase on purpose. The agent accepts this key as-is and
    // flipping it to "Check" changes the wire contract; see DESIGN.md.
    #[serde(skip_serializing_if = "Option::is_none", rename = "check")]
    check: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[allow(non_snake_case)]
struct ServiceWireIn {
    ID: Option<String>,
    Name: Option<String>,
    Port: Option<u16>,
    Tags: Option<Vec<String>>,
    Address: Option<String>,
}

impl Service {
    /// `"service:" + (id ?? name)`, or `None` if neither is set.
    pub fn check_id(&self) -> Option<String> {
        self.id
            .clone()
            .or_else(|| self.name.clone())
            .map(|key| format!("service:{}", key))
    }

    /// Serializes to the exact JSON shape the agent's register endpoint
    /// expects. Fields left `None` are omitted entirely (not emitted as
    /// `null`); `tags` is always present, even when empty.
    pub fn dump(&self) -> serde_json::Value {
        let wire = ServiceWireOut {
            ID: self.id.clone(),
            Name: self.name.clone(),
            Tags: self.tags.clone(),
            Port: self.port,
            Address: self.address.clone(),
            check: self.check.as_ref().map(Check::dump),
        };
        serde_json::to_value(wire).expect("Service always serializes")
    }

    /// Parses a service as returned by the agent. `name` is the name the
    /// caller searched for; it's used as a fallback when the reply omits
    /// `Name` (as happens for some discovery responses). `tags` defaults to
    /// empty when absent.
    pub fn load(name: Option<&str>, raw: serde_json::Value) -> Result<Self, Error> {
        let wire: ServiceWireIn = serde_json::from_value(raw)?;
        Ok(Service {
            id: wire.ID,
            name: wire.Name.or_else(|| name.map(str::to_string)),
            address: wire.Address,
            port: wire.Port,
            tags: wire.Tags.unwrap_or_default(),
            check: None,
        })
    }
}

/// Tagged health status with an optional free-form output string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusValue {
    Passing,
    Warning,
    Critical,
}

impl StatusValue {
    fn wire_str(self) -> &'static str {
        match self {
            StatusValue::Passing => "passing",
            StatusValue::Warning => "warning",
            StatusValue::Critical => "critical",
        }
    }

    fn parse(raw: &str) -> Result<Self, Error> {
        match raw {
            "passing" => Ok(StatusValue::Passing),
            "warning" => Ok(StatusValue::Warning),
            "critical" => Ok(StatusValue::Critical),
            other => Err(Error::Driver(format!("unknown check status {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub value: StatusValue,
    pub output: Option<String>,
}

impl Status {
    pub fn passing() -> Self {
        Status {
            value: StatusValue::Passing,
            output: None,
        }
    }

    pub fn dump(&self) -> serde_json::Value {
        serde_json::json!({
            "Status": self.value.wire_str(),
            "Output": self.output,
        })
    }

    pub fn load(raw: &serde_json::Value) -> Result<Self, Error> {
        let status = raw
            .get("Status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Driver("status payload missing Status".to_string()))?;
        let value = StatusValue::parse(status)?;
        let output = raw
            .get("Output")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(Status { value, output })
    }
}

/// An agent-reported peer, as embedded in discovery and catalog replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct Node {
    pub ID: Option<String>,
    pub Node: Option<String>,
    pub Address: Option<String>,
    #[serde(default)]
    pub TaggedAddresses: HashMap<String, String>,
}

impl Node {
    pub fn dump(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Node always serializes")
    }

    pub fn load(raw: serde_json::Value) -> Result<Self, Error> {
        Ok(serde_json::from_value(raw)?)
    }
}

/// One element of a `services` discovery reply: the peer, the service as
/// registered on that peer (address-substituted per §4.2), and the status
/// of the check matching that service's check id, if any.
pub type DiscoveryTuple = (Node, Service, Option<Status>);

/// Applies the §4.2 "services response shaping" rules to a raw discovery
/// array: parse each `Node`/`Service`, substitute the node's address when
/// the service's own address is empty or absent, and pick out the one
/// `Checks` entry (if any) whose `CheckID` matches the service's check id.
pub fn parse_discovery_tuples(
    name: &str,
    raw: &serde_json::Value,
) -> Result<Vec<DiscoveryTuple>, Error> {
    let entries = raw
        .as_array()
        .ok_or_else(|| Error::Driver("expected a json array of discovery entries".to_string()))?;

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let node = Node::load(entry.get("Node").cloned().unwrap_or(serde_json::Value::Null))?;
        let mut service = Service::load(
            Some(name),
            entry.get("Service").cloned().unwrap_or(serde_json::Value::Null),
        )?;

        if service.address.as_deref().unwrap_or("").is_empty() {
            service.address = node.Address.clone();
        }

        let check_id = service.check_id();
        let status = entry
            .get("Checks")
            .and_then(|v| v.as_array())
            .and_then(|checks| {
                checks.iter().find(|check| {
                    check
                        .get("CheckID")
                        .and_then(|v| v.as_str())
                        .map(|id| Some(id.to_string()) == check_id)
                        .unwrap_or(false)
                })
            })
            .map(Status::load)
            .transpose()?;

        out.push((node, service, status));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_round_trips_through_dump_and_load() {
        let mut service = Service {
            id: Some("foo".into()),
            name: Some("bar".into()),
            address: Some("10.0.0.1".into()),
            port: Some(8080),
            tags: vec!["a".into(), "b".into()],
            check: None,
        };
        let dumped = service.dump();
        let loaded = Service::load(None, dumped).unwrap();
        // `check` never round-trips through dump/load since the agent's
        // register response carries no check body back.
        service.check = None;
        assert_eq!(loaded, service);
    }

    #[test]
    fn dump_emits_lowercase_check_key() {
        let service = Service {
            id: Some("x".into()),
            check: Some(Check::default()),
            ..Default::default()
        };
        let value = service.dump();
        assert!(value.get("check").is_some());
        assert!(value.get("Check").is_none());
    }

    #[test]
    fn dump_omits_absent_optional_fields() {
        let service = Service::default();
        let value = service.dump();
        assert!(value.get("ID").is_none());
        assert!(value.get("Name").is_none());
        assert!(value.get("Address").is_none());
        assert!(value.get("Port").is_none());
        assert_eq!(value.get("Tags").unwrap(), &serde_json::json!([]));
    }

    #[test]
    fn load_defaults_tags_to_empty() {
        let service = Service::load(None, serde_json::json!({})).unwrap();
        assert_eq!(service.tags, Vec::<String>::new());

        let service = Service::load(None, serde_json::json!({ "Tags": ["x"] })).unwrap();
        assert_eq!(service.tags, vec!["x".to_string()]);
    }

    #[test]
    fn load_falls_back_to_search_name() {
        let service = Service::load(Some("my-service"), serde_json::json!({})).unwrap();
        assert_eq!(service.name, Some("my-service".to_string()));
    }

    #[test]
    fn check_id_requires_id_or_name() {
        let none = Service::default();
        assert_eq!(none.check_id(), None);

        let with_id = Service {
            id: Some("abc".into()),
            ..Default::default()
        };
        assert_eq!(with_id.check_id(), Some("service:abc".to_string()));

        let with_name_only = Service {
            name: Some("xyz".into()),
            ..Default::default()
        };
        assert_eq!(with_name_only.check_id(), Some("service:xyz".to_string()));
    }

    #[test]
    fn status_round_trips() {
        let status = Status {
            value: StatusValue::Warning,
            output: Some("degraded".into()),
        };
        let dumped = status.dump();
        let loaded = Status::load(&dumped).unwrap();
        assert_eq!(loaded, status);
    }

    #[test]
    fn discovery_tuple_substitutes_node_address() {
        let raw = serde_json::json!([{
            "Node": {"ID": "c", "Address": "h"},
            "Service": {"ID": "s", "Name": "n", "Address": ""},
            "Checks": [{"CheckID": "service:s", "Status": "passing"}],
        }]);
        let tuples = parse_discovery_tuples("n", &raw).unwrap();
        assert_eq!(tuples.len(), 1);
        let (node, service, status) = &tuples[0];
        assert_eq!(node.Address, Some("h".to_string()));
        assert_eq!(service.address, Some("h".to_string()));
        assert_eq!(status.as_ref().unwrap().value, StatusValue::Passing);
    }

    #[test]
    fn discovery_tuple_ignores_unrelated_checks() {
        let raw = serde_json::json!([{
            "Node": {"ID": "c", "Address": "h"},
            "Service": {"ID": "s", "Name": "n", "Address": "explicit"},
            "Checks": [{"CheckID": "service:other", "Status": "critical"}],
        }]);
        let tuples = parse_discovery_tuples("n", &raw).unwrap();
        let (_, service, status) = &tuples[0];
        assert_eq!(service.address, Some("explicit".to_string()));
        assert!(status.is_none());
    }
}
