//! Plural name resolution
//!
//! Maps `(apiVersion, kind)` to the plural resource name needed to address a
//! type through the dynamic API. Authoritative answers come from
//! CustomResourceDefinitions (and, for the composition framework's groups,
//! CompositeResourceDefinitions) and are cached for the life of the process.
//! When no definition matches, the lower-cased kind plus `s` is used. That
//! guess is not cached, so a definition installed later is still picked up.

use crate::framework;
use cluster_client::{ClusterClientTrait, GroupVersion, ListQuery, ResourceType};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cache of resolved plural names keyed by `apiVersion/kind`
#[derive(Debug, Default)]
pub struct PluralResolver {
    cache: RwLock<HashMap<String, String>>,
}

/// Lower-cased kind plus `s`
pub fn naive_plural(kind: &str) -> String {
    format!("{}s", kind.to_lowercase())
}

fn cache_key(gv: &GroupVersion, kind: &str) -> String {
    format!("{}/{}", gv.api_version(), kind)
}

/// Find `spec.names.plural` of the first definition declaring `group` and `kind`
fn find_plural<'a>(definitions: &'a [Value], group: &str, kind: &str) -> Option<&'a str> {
    definitions.iter().find_map(|def| {
        let spec = def.get("spec")?;
        if spec.get("group")?.as_str()? != group {
            return None;
        }
        let names = spec.get("names")?;
        if names.get("kind")?.as_str()? != kind {
            return None;
        }
        names
            .get("plural")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    })
}

impl PluralResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached plural, if `(apiVersion, kind)` was resolved before
    pub async fn cached(&self, gv: &GroupVersion, kind: &str) -> Option<String> {
        self.cache.read().await.get(&cache_key(gv, kind)).cloned()
    }

    /// Resolve the plural for `kind` in `gv` using `client` for discovery.
    ///
    /// Never fails: discovery errors are logged and the naive plural returned.
    pub async fn resolve(&self, client: &dyn ClusterClientTrait, gv: &GroupVersion, kind: &str) -> String {
        if let Some(plural) = self.cached(gv, kind).await {
            debug!("Plural cache hit for {}/{}: {}", gv, kind, plural);
            return plural;
        }

        match self.discover(client, gv, kind).await {
            Some(plural) => {
                debug!("Resolved {}/{} to plural {}", gv, kind, plural);
                self.cache
                    .write()
                    .await
                    .insert(cache_key(gv, kind), plural.clone());
                plural
            }
            None => {
                let plural = naive_plural(kind);
                debug!(
                    "No definition found for {}/{}, falling back to {}",
                    gv, kind, plural
                );
                plural
            }
        }
    }

    async fn discover(&self, client: &dyn ClusterClientTrait, gv: &GroupVersion, kind: &str) -> Option<String> {
        // Core kinds are never declared by a definition
        if gv.is_core() {
            return None;
        }

        match client
            .list(&ResourceType::custom_resource_definitions(), None, &ListQuery::default())
            .await
        {
            Ok(page) => {
                if let Some(plural) = find_plural(&page.items, &gv.group, kind) {
                    return Some(plural.to_string());
                }
            }
            Err(e) => warn!("Failed to list CustomResourceDefinitions: {}", e),
        }

        if !framework::is_framework_group(&gv.group) {
            return None;
        }
        for version in framework::XRD_VERSIONS {
            match client
                .list(&framework::composite_definitions(version), None, &ListQuery::default())
                .await
            {
                Ok(page) => {
                    if let Some(plural) = find_plural(&page.items, &gv.group, kind) {
                        return Some(plural.to_string());
                    }
                }
                Err(e) => debug!("Failed to list {} CompositeResourceDefinitions: {}", version, e),
            }
        }
        None
    }
}
