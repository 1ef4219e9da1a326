//! Live watch wire protocol
//!
//! Inbound control messages and outbound change notifications, both JSON
//! objects discriminated by a `type` field.

use crate::accessor::normalize_namespace;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Identity of one watched object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceDescriptor {
    /// `group/version`, or `v1` for the core group
    pub api_version: String,
    pub kind: String,
    pub name: String,
    /// Absent for cluster-scoped objects
    pub namespace: Option<String>,
    /// Skips plural discovery when set
    pub plural: Option<String>,
}

impl ResourceDescriptor {
    /// Namespace with the `""`/`"undefined"`/`"null"` sentinels removed
    pub fn namespace(&self) -> Option<&str> {
        normalize_namespace(self.namespace.as_deref())
    }

    /// Deduplication key: `apiVersion:kind:namespace:name`
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.api_version,
            self.kind,
            self.namespace().unwrap_or_default(),
            self.name
        )
    }

    /// Identity stub sent when the object is gone
    pub fn deleted_stub(&self) -> Value {
        json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "metadata": {
                "name": self.name,
                "namespace": self.namespace().unwrap_or_default(),
            }
        })
    }
}

/// Client to server control message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Watch one resource, or replace the watched set with `resources`
    Subscribe {
        #[serde(default)]
        resource: Option<ResourceDescriptor>,
        #[serde(default)]
        resources: Option<Vec<ResourceDescriptor>>,
    },
    /// Stop watching one resource
    Unsubscribe {
        #[serde(default)]
        resource: Option<ResourceDescriptor>,
    },
    /// Target context for watches started after this message
    SetContext {
        #[serde(default)]
        context: String,
    },
}

/// Server to client message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WatchMessage {
    /// Full document of an added or changed object
    Updated { resource: Value },
    /// Identity stub of a removed object
    Deleted { resource: Value },
    /// In-band failure; the session stays open
    Error { error: String },
}

impl WatchMessage {
    /// Shorthand for [`WatchMessage::Error`]
    pub fn error(message: impl Into<String>) -> Self {
        WatchMessage::Error {
            error: message.into(),
        }
    }
}

/// A change to one watched object
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceChangeEvent {
    /// First state seen by a new watch
    Added(Value),
    Updated(Value),
    /// Carries only the identity stub
    Deleted(Value),
}

impl From<ResourceChangeEvent> for WatchMessage {
    fn from(event: ResourceChangeEvent) -> Self {
        match event {
            ResourceChangeEvent::Added(resource) | ResourceChangeEvent::Updated(resource) => {
                WatchMessage::Updated { resource }
            }
            ResourceChangeEvent::Deleted(resource) => WatchMessage::Deleted { resource },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_messages() {
        let single: ControlMessage = serde_json::from_str(
            r#"{"type":"subscribe","resource":{"apiVersion":"v1","kind":"Pod","name":"web-0","namespace":"default"}}"#,
        )
        .unwrap();
        let ControlMessage::Subscribe {
            resource: Some(descriptor),
            resources: None,
        } = single.clone()
        else {
            panic!("unexpected {single:?}");
        };
        assert_eq!(descriptor.key(), "v1:Pod:default:web-0");
        assert_eq!(descriptor.plural, None);

        let bulk: ControlMessage = serde_json::from_str(
            r#"{"type":"subscribe","resources":[{"apiVersion":"v1","kind":"Node","name":"a"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            bulk,
            ControlMessage::Subscribe { resource: None, resources: Some(ref list) } if list.len() == 1
        ));

        let set: ControlMessage =
            serde_json::from_str(r#"{"type":"setContext","context":"prod"}"#).unwrap();
        assert_eq!(
            set,
            ControlMessage::SetContext {
                context: "prod".to_string()
            }
        );

        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"explode"}"#).is_err());
        assert!(serde_json::from_str::<ControlMessage>("not json").is_err());
    }

    #[test]
    fn test_key_ignores_namespace_sentinels() {
        let mut descriptor = ResourceDescriptor {
            api_version: "v1".to_string(),
            kind: "Node".to_string(),
            name: "worker-1".to_string(),
            ..Default::default()
        };
        let key = descriptor.key();
        for ns in ["", "undefined", "null"] {
            descriptor.namespace = Some(ns.to_string());
            assert_eq!(descriptor.key(), key);
        }
    }

    #[test]
    fn test_outbound_shapes() {
        let descriptor = ResourceDescriptor {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: "api".to_string(),
            namespace: Some("prod".to_string()),
            plural: None,
        };
        let deleted = WatchMessage::from(ResourceChangeEvent::Deleted(descriptor.deleted_stub()));
        assert_eq!(
            serde_json::to_value(&deleted).unwrap(),
            json!({
                "type": "deleted",
                "resource": {
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": {"name": "api", "namespace": "prod"}
                }
            })
        );

        let added = WatchMessage::from(ResourceChangeEvent::Added(json!({"kind": "Deployment"})));
        assert_eq!(
            serde_json::to_value(&added).unwrap(),
            json!({"type": "updated", "resource": {"kind": "Deployment"}})
        );

        assert_eq!(
            serde_json::to_value(WatchMessage::error("boom")).unwrap(),
            json!({"type": "error", "error": "boom"})
        );
    }
}
