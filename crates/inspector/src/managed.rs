//! Managed resource aggregation
//!
//! Finds every resource type installed by a framework provider (directly, or
//! through one of its revisions), lists all instances of those types
//! concurrently and caches the merged result per context.
//!
//! Aggregation is best-effort: a type whose list fails is left out. Only
//! failing to list the CRDs themselves, or a non-404 failure listing
//! providers, fails the call.

use crate::accessor::ResourceAccessor;
use crate::error::Result;
use crate::framework;
use crate::registry::{ActiveHandle, ContextRegistry};
use chrono::{DateTime, Utc};
use cluster_client::{GroupVersion, ListQuery, ResourceType, object_name};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Aggregated managed resources for one context
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResources {
    /// Documents tagged with their `apiVersion` and `kind`
    pub items: Vec<Value>,
    /// Served from a cache entry younger than the TTL
    pub from_cache: bool,
    /// When the items were collected
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    items: Vec<Value>,
    fetched: Instant,
    fetched_at: DateTime<Utc>,
}

/// A provider-owned resource type to aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
struct ManagedType {
    gv: GroupVersion,
    kind: String,
    plural: String,
}

fn owner_refs(obj: &Value) -> impl Iterator<Item = (&str, &str, &str)> {
    obj.pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|owner| {
            Some((
                owner.get("apiVersion")?.as_str()?,
                owner.get("kind")?.as_str()?,
                owner.get("name")?.as_str()?,
            ))
        })
}

/// Map each provider revision to the known provider that owns it
fn revision_owners(revisions: &[Value], providers: &HashSet<&str>) -> HashMap<String, String> {
    let mut owners = HashMap::new();
    for revision in revisions {
        let Some(revision_name) = object_name(revision) else {
            continue;
        };
        let owner = owner_refs(revision).find(|(api_version, kind, name)| {
            *api_version == framework::PKG_API_VERSION && *kind == "Provider" && providers.contains(name)
        });
        if let Some((_, _, provider)) = owner {
            owners.insert(revision_name.to_string(), provider.to_string());
        }
    }
    owners
}

/// The provider owning `crd`, directly or through a revision
fn owning_provider<'a>(
    crd: &'a Value,
    providers: &HashSet<&str>,
    revisions: &'a HashMap<String, String>,
) -> Option<&'a str> {
    owner_refs(crd).find_map(|(api_version, kind, name)| {
        if api_version != framework::PKG_API_VERSION {
            return None;
        }
        match kind {
            "Provider" if providers.contains(name) => Some(name),
            "ProviderRevision" => revisions.get(name).map(String::as_str),
            _ => None,
        }
    })
}

/// Derive the addressable type of a CRD, skipping provider configuration kinds
fn managed_type(crd: &Value) -> Option<ManagedType> {
    let spec = crd.get("spec")?;
    let group = spec.get("group")?.as_str().filter(|g| !g.is_empty())?;
    let names = spec.get("names")?;
    let kind = names.get("kind")?.as_str().filter(|k| !k.is_empty())?;
    let plural = names.get("plural")?.as_str().filter(|p| !p.is_empty())?;
    if framework::CONFIG_KINDS.contains(&kind) {
        return None;
    }

    let version = spec
        .pointer("/versions/0/name")
        .and_then(Value::as_str)
        .or_else(|| spec.get("version").and_then(Value::as_str))
        .filter(|v| !v.is_empty())
        .unwrap_or("v1");

    Some(ManagedType {
        gv: GroupVersion {
            group: group.to_string(),
            version: version.to_string(),
        },
        kind: kind.to_string(),
        plural: plural.to_string(),
    })
}

fn sort_key(item: &Value) -> (String, String, String, String) {
    let field = |pointer: &str| {
        item.pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    (
        field("/apiVersion"),
        field("/kind"),
        field("/metadata/namespace"),
        field("/metadata/name"),
    )
}

/// Concurrent, cached aggregation of provider-owned resources
#[derive(Debug)]
pub struct ManagedResourceAggregator {
    registry: Arc<ContextRegistry>,
    accessor: Arc<ResourceAccessor>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_concurrent: usize,
}

impl ManagedResourceAggregator {
    /// Create an aggregator with an empty cache
    pub fn new(
        registry: Arc<ContextRegistry>,
        accessor: Arc<ResourceAccessor>,
        ttl: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            accessor,
            cache: RwLock::new(HashMap::new()),
            ttl,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// All managed resources on `context` (or the active context).
    ///
    /// A cached result younger than the TTL is returned unless `force_refresh`.
    pub async fn get_managed(
        &self,
        context: Option<&str>,
        force_refresh: bool,
    ) -> Result<ManagedResources> {
        let handle = self.registry.resolve(context).await?;

        if !force_refresh {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&handle.context)
                && entry.fetched.elapsed() < self.ttl
            {
                info!("Returning cached managed resources for context: {}", handle.context);
                return Ok(ManagedResources {
                    items: entry.items.clone(),
                    from_cache: true,
                    fetched_at: entry.fetched_at,
                });
            }
        }

        info!(
            "Fetching fresh managed resources for context: {} (force_refresh: {})",
            handle.context, force_refresh
        );
        let items = self.collect(&handle).await?;
        let entry = CacheEntry {
            items: items.clone(),
            fetched: Instant::now(),
            fetched_at: Utc::now(),
        };
        let fetched_at = entry.fetched_at;
        self.cache
            .write()
            .await
            .insert(handle.context.clone(), entry);

        info!(
            "Cached managed resources for context: {} ({} items)",
            handle.context,
            items.len()
        );
        Ok(ManagedResources {
            items,
            from_cache: false,
            fetched_at,
        })
    }

    /// Drop the cached result for `context`, or every cached result
    pub async fn clear_cache(&self, context: Option<&str>) {
        let mut cache = self.cache.write().await;
        match context.filter(|c| !c.is_empty()) {
            Some(context) => {
                if cache.remove(context).is_some() {
                    debug!("Cleared managed resources cache for context: {}", context);
                }
            }
            None => {
                cache.clear();
                debug!("Cleared managed resources cache for all contexts");
            }
        }
    }

    async fn collect(&self, handle: &ActiveHandle) -> Result<Vec<Value>> {
        let pkg = GroupVersion::parse(framework::PKG_API_VERSION)?;
        let none = &ListQuery::default();
        let provider_type = framework::providers();
        let revision_type = framework::provider_revisions();

        let providers = self
            .accessor
            .list_on(handle, &pkg, &provider_type.kind, None, Some(&provider_type.plural), none)
            .await?
            .items;
        let revisions = self
            .accessor
            .list_on(handle, &pkg, &revision_type.kind, None, Some(&revision_type.plural), none)
            .await?
            .items;

        let provider_names: HashSet<&str> = providers.iter().filter_map(object_name).collect();
        let revisions = revision_owners(&revisions, &provider_names);

        let crds = handle
            .client
            .list(&ResourceType::custom_resource_definitions(), None, none)
            .await?
            .items;
        let types: Vec<ManagedType> = crds
            .iter()
            .filter(|crd| owning_provider(crd, &provider_names, &revisions).is_some())
            .filter_map(managed_type)
            .collect();

        debug!(
            "Aggregating {} managed types from {} providers on {}",
            types.len(),
            provider_names.len(),
            handle.context
        );

        let batches: Vec<Vec<Value>> = stream::iter(types.iter())
            .map(|managed| async move {
                let page = self
                    .accessor
                    .list_on(handle, &managed.gv, &managed.kind, None, Some(&managed.plural), none)
                    .await;
                match page {
                    Ok(page) => {
                        let api_version = managed.gv.api_version();
                        page.items
                            .into_iter()
                            .map(|mut item| {
                                if let Some(obj) = item.as_object_mut() {
                                    obj.insert("apiVersion".to_string(), Value::from(api_version.as_str()));
                                    obj.insert("kind".to_string(), Value::from(managed.kind.as_str()));
                                }
                                item
                            })
                            .collect()
                    }
                    Err(e) => {
                        debug!("Skipping {}/{}: {}", managed.gv, managed.kind, e);
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut items: Vec<Value> = batches.into_iter().flatten().collect();
        items.sort_by_cached_key(sort_key);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InspectorError;
    use crate::resolver::PluralResolver;
    use crate::test_utils::*;
    use cluster_client::{MockClusterClient, MockConnector};
    use serde_json::json;

    struct Fixture {
        _env: TestEnv,
        client: Arc<MockClusterClient>,
        aggregator: ManagedResourceAggregator,
    }

    fn fixture(ttl: Duration) -> Fixture {
        let env = three_contexts();
        let connector = MockConnector::new();
        let client = connector.client("dev");
        let registry = env.registry(&connector);
        let accessor = Arc::new(ResourceAccessor::new(
            Arc::clone(&registry),
            Arc::new(PluralResolver::new()),
        ));
        let aggregator = ManagedResourceAggregator::new(registry, accessor, ttl, 4);
        Fixture {
            _env: env,
            client,
            aggregator,
        }
    }

    /// provider-aws owns buckets directly and instances through its revision;
    /// its ProviderConfig and an unowned CRD are ignored.
    fn seed(client: &MockClusterClient) {
        let (providers, revisions) = provider_types();
        let crds = ResourceType::custom_resource_definitions();

        client.insert(&providers, provider("provider-aws"));
        client.insert(&revisions, provider_revision("provider-aws-1a2b", "provider-aws"));
        client.insert(&revisions, provider_revision("orphan-rev", "provider-gone"));

        client.insert(&crds, crd("s3.aws.upbound.io", "Bucket", "buckets", Some(("Provider", "provider-aws"))));
        client.insert(
            &crds,
            crd("ec2.aws.upbound.io", "Instance", "instances", Some(("ProviderRevision", "provider-aws-1a2b"))),
        );
        client.insert(
            &crds,
            crd("aws.upbound.io", "ProviderConfig", "providerconfigs", Some(("Provider", "provider-aws"))),
        );
        client.insert(
            &crds,
            crd("rds.aws.upbound.io", "Cluster", "clusters", Some(("ProviderRevision", "orphan-rev"))),
        );
        client.insert(&crds, crd("example.io", "Widget", "widgets", None));

        let buckets = resource_type("s3.aws.upbound.io/v1beta1", "Bucket", "buckets");
        client.insert(&buckets, json!({"metadata": {"name": "logs"}}));
        client.insert(&buckets, json!({"metadata": {"name": "assets"}}));
        let instances = resource_type("ec2.aws.upbound.io/v1beta1", "Instance", "instances");
        client.insert(&instances, json!({"metadata": {"name": "bastion"}}));
        let configs = resource_type("aws.upbound.io/v1beta1", "ProviderConfig", "providerconfigs");
        client.insert(&configs, json!({"metadata": {"name": "default"}}));
        let widgets = resource_type("example.io/v1beta1", "Widget", "widgets");
        client.insert(&widgets, json!({"metadata": {"name": "w"}}));
    }

    fn names(result: &ManagedResources) -> Vec<(String, String)> {
        result
            .items
            .iter()
            .map(|i| {
                (
                    i["kind"].as_str().unwrap_or_default().to_string(),
                    i["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_aggregates_provider_owned_types() {
        let f = fixture(Duration::from_secs(300));
        seed(&f.client);

        let result = f.aggregator.get_managed(Some("dev"), false).await.unwrap();
        assert!(!result.from_cache);
        assert_eq!(
            names(&result),
            vec![
                ("Instance".to_string(), "bastion".to_string()),
                ("Bucket".to_string(), "assets".to_string()),
                ("Bucket".to_string(), "logs".to_string()),
            ]
        );
        let bucket = result.items.iter().find(|i| i["kind"] == "Bucket").unwrap();
        assert_eq!(bucket["apiVersion"], "s3.aws.upbound.io/v1beta1");
        assert_eq!(f.client.list_count("providerconfigs"), 0);
        assert_eq!(f.client.list_count("widgets"), 0);
        assert_eq!(f.client.list_count("clusters"), 0);
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_is_cached() {
        let f = fixture(Duration::from_secs(300));
        seed(&f.client);

        let first = f.aggregator.get_managed(Some("dev"), false).await.unwrap();
        let second = f.aggregator.get_managed(Some("dev"), false).await.unwrap();

        assert!(second.from_cache);
        assert_eq!(second.items, first.items);
        assert_eq!(second.fetched_at, first.fetched_at);
        assert_eq!(f.client.list_count("customresourcedefinitions"), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_always_refetches() {
        let f = fixture(Duration::from_secs(300));
        seed(&f.client);

        f.aggregator.get_managed(Some("dev"), false).await.unwrap();
        let refreshed = f.aggregator.get_managed(Some("dev"), true).await.unwrap();
        assert!(!refreshed.from_cache);
        assert_eq!(f.client.list_count("customresourcedefinitions"), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let f = fixture(Duration::ZERO);
        seed(&f.client);

        f.aggregator.get_managed(Some("dev"), false).await.unwrap();
        let again = f.aggregator.get_managed(Some("dev"), false).await.unwrap();
        assert!(!again.from_cache);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let f = fixture(Duration::from_secs(300));
        seed(&f.client);

        f.aggregator.get_managed(Some("dev"), false).await.unwrap();
        f.aggregator.clear_cache(Some("prod")).await;
        assert!(f.aggregator.get_managed(Some("dev"), false).await.unwrap().from_cache);

        f.aggregator.clear_cache(Some("dev")).await;
        assert!(!f.aggregator.get_managed(Some("dev"), false).await.unwrap().from_cache);

        f.aggregator.clear_cache(None).await;
        assert!(!f.aggregator.get_managed(Some("dev"), false).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_failing_type_is_dropped() {
        let f = fixture(Duration::from_secs(300));
        seed(&f.client);
        f.client.fail_list("instances", "forbidden");

        let result = f.aggregator.get_managed(Some("dev"), false).await.unwrap();
        assert_eq!(result.items.len(), 2);
        assert!(result.items.iter().all(|i| i["kind"] == "Bucket"));
    }

    #[tokio::test]
    async fn test_crd_listing_failure_is_fatal() {
        let f = fixture(Duration::from_secs(300));
        seed(&f.client);
        f.client.fail_list("customresourcedefinitions", "forbidden");

        let err = f.aggregator.get_managed(Some("dev"), false).await.unwrap_err();
        assert!(matches!(err, InspectorError::Cluster(_)));
    }

    #[tokio::test]
    async fn test_no_framework_installed_is_empty() {
        let f = fixture(Duration::from_secs(300));
        f.client.register_type(&ResourceType::custom_resource_definitions());

        let result = f.aggregator.get_managed(Some("dev"), false).await.unwrap();
        assert!(result.items.is_empty());
    }

    #[test]
    fn test_managed_type_version_fallbacks() {
        let mut doc = crd("example.io", "Thing", "things", None);
        assert_eq!(managed_type(&doc).unwrap().gv.version, "v1beta1");

        doc["spec"]["versions"] = json!([]);
        doc["spec"]["version"] = json!("v2alpha1");
        assert_eq!(managed_type(&doc).unwrap().gv.version, "v2alpha1");

        doc["spec"].as_object_mut().unwrap().remove("version");
        assert_eq!(managed_type(&doc).unwrap().gv.version, "v1");

        doc["spec"]["names"]["plural"] = json!("");
        assert!(managed_type(&doc).is_none());
    }
}
