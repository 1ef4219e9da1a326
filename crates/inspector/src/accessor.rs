//! Generic resource reads
//!
//! List and get any resource type by apiVersion/kind, resolving the plural
//! name when the caller does not supply one. Listing a type the cluster does
//! not serve yields an empty page; getting a missing object is an error.

use crate::error::{InspectorError, Result};
use crate::registry::{ActiveHandle, ContextRegistry};
use crate::resolver::PluralResolver;
use cluster_client::{
    BuiltinKind, ClusterError, GroupVersion, ListQuery, ObjectPage, ResourceType,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Parameters of a list call
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListResourcesRequest {
    /// Strict `group/version`; core `v1` is only accepted for built-in kinds
    pub api_version: String,
    pub kind: String,
    /// All namespaces when absent or a sentinel
    pub namespace: Option<String>,
    /// Context to activate first; the active one when absent
    pub context: Option<String>,
    /// Overrides plural discovery
    pub plural: Option<String>,
    /// Page size
    pub limit: Option<u32>,
    /// Token from the previous page
    pub continue_token: Option<String>,
}

/// Parameters of a get call
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetResourceRequest {
    /// Strict `group/version`, or `v1` for built-in kinds
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    /// Context to activate first; the active one when absent
    pub context: Option<String>,
    /// Overrides plural discovery
    pub plural: Option<String>,
}

/// Treat `""`, `"undefined"` and `"null"` as "no namespace"
pub fn normalize_namespace(namespace: Option<&str>) -> Option<&str> {
    namespace.filter(|ns| !matches!(*ns, "" | "undefined" | "null"))
}

fn validation(err: ClusterError) -> InspectorError {
    match err {
        ClusterError::InvalidRequest(message) => InspectorError::Validation(message),
        other => InspectorError::Cluster(other),
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(InspectorError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn not_found(kind: &str, name: &str, namespace: Option<&str>) -> InspectorError {
    match namespace {
        Some(ns) => InspectorError::NotFound(format!(
            "{} '{}' not found in namespace '{}'",
            kind, name, ns
        )),
        None => InspectorError::NotFound(format!("{} '{}' not found", kind, name)),
    }
}

/// Generic get/list over any resource type
#[derive(Debug)]
pub struct ResourceAccessor {
    registry: Arc<ContextRegistry>,
    resolver: Arc<PluralResolver>,
}

impl ResourceAccessor {
    /// Create an accessor over the shared registry and resolver
    pub fn new(registry: Arc<ContextRegistry>, resolver: Arc<PluralResolver>) -> Self {
        Self { registry, resolver }
    }

    /// List objects, activating `request.context` first when given
    pub async fn list(&self, request: &ListResourcesRequest) -> Result<ObjectPage> {
        require(&request.api_version, "apiVersion")?;
        let gv = GroupVersion::parse(&request.api_version).map_err(validation)?;
        require(&request.kind, "kind")?;

        let handle = self.registry.resolve(request.context.as_deref()).await?;
        let query = ListQuery {
            limit: request.limit,
            continue_token: request.continue_token.clone().filter(|t| !t.is_empty()),
            field_selector: None,
        };
        self.list_on(
            &handle,
            &gv,
            &request.kind,
            normalize_namespace(request.namespace.as_deref()),
            request.plural.as_deref(),
            &query,
        )
        .await
    }

    /// List objects on an already resolved connection
    pub async fn list_on(
        &self,
        handle: &ActiveHandle,
        gv: &GroupVersion,
        kind: &str,
        namespace: Option<&str>,
        plural: Option<&str>,
        query: &ListQuery,
    ) -> Result<ObjectPage> {
        let plural = match plural.filter(|p| !p.is_empty()) {
            Some(plural) => plural.to_string(),
            None => self.resolver.resolve(handle.client.as_ref(), gv, kind).await,
        };
        let resource = ResourceType::new(gv, kind, plural);

        match handle.client.list(&resource, namespace, query).await {
            Ok(page) => Ok(page),
            Err(e) if e.is_not_found() => {
                debug!("{} is not served by {}, returning no items", resource, handle.context);
                Ok(ObjectPage::empty())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one named object, activating `request.context` first when given
    pub async fn get(&self, request: &GetResourceRequest) -> Result<Value> {
        require(&request.api_version, "apiVersion")?;
        require(&request.kind, "kind")?;
        require(&request.name, "name")?;

        let namespace = normalize_namespace(request.namespace.as_deref());
        let handle = self.registry.resolve(request.context.as_deref()).await?;
        let client = handle.client.as_ref();

        let result = match BuiltinKind::lookup(&request.api_version, &request.kind, namespace.is_some()) {
            Some(builtin) => client.get_builtin(builtin, namespace, &request.name).await,
            None => {
                let gv = GroupVersion::parse(&request.api_version).map_err(validation)?;
                let plural = match request.plural.as_deref().filter(|p| !p.is_empty()) {
                    Some(plural) => plural.to_string(),
                    None => self.resolver.resolve(client, &gv, &request.kind).await,
                };
                let resource = ResourceType::new(&gv, request.kind.as_str(), plural);
                client.get(&resource, namespace, &request.name).await
            }
        };

        result.map_err(|e| {
            if e.is_not_found() {
                not_found(&request.kind, &request.name, namespace)
            } else {
                e.into()
            }
        })
    }

    /// Events about one object.
    ///
    /// Without a namespace there is nothing to look in and the result is
    /// empty. A field selector narrows the list server-side; when the API
    /// server rejects it, a selector without the namespace term is tried, and
    /// when that fails too the result is empty.
    pub async fn events(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        context: Option<&str>,
    ) -> Result<Vec<Value>> {
        let Some(namespace) = normalize_namespace(namespace) else {
            return Ok(Vec::new());
        };
        let handle = self.registry.resolve(context).await?;
        let events = ResourceType::core("Event", "events");

        let selector = format!(
            "involvedObject.kind={},involvedObject.name={},involvedObject.namespace={}",
            kind, name, namespace
        );
        let page = match handle
            .client
            .list(&events, Some(namespace), &ListQuery::with_field_selector(selector))
            .await
        {
            Ok(page) => page,
            Err(e) => {
                debug!("Event field selector rejected, retrying without namespace: {}", e);
                let fallback = format!("involvedObject.kind={},involvedObject.name={}", kind, name);
                match handle
                    .client
                    .list(&events, Some(namespace), &ListQuery::with_field_selector(fallback))
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Failed to list events for {}/{}: {}", kind, name, e);
                        return Ok(Vec::new());
                    }
                }
            }
        };

        Ok(page
            .items
            .into_iter()
            .filter(|event| {
                let involved = |field: &str| {
                    event
                        .get("involvedObject")
                        .and_then(|o| o.get(field))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                };
                involved("kind") == kind
                    && involved("name") == name
                    && involved("namespace") == namespace
            })
            .collect())
    }
}
