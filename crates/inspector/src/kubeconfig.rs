//! Kubeconfig document store
//!
//! The store is read-modify-written by context add/remove. Only the parts the
//! inspector needs (entry names, context references, `current-context`) are
//! typed; every other key is carried through untouched so a round trip does
//! not lose user settings.

use crate::error::{InspectorError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A named entry in one of the `clusters`, `contexts` or `users` lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedEntry {
    pub name: String,
    /// Everything besides `name`, kept verbatim
    #[serde(flatten)]
    pub body: Mapping,
}

impl NamedEntry {
    /// Read `<section>.<field>` as a string, e.g. `context.cluster`
    fn nested_str(&self, section: &str, field: &str) -> Option<&str> {
        self.body
            .get(section)
            .and_then(|s| s.get(field))
            .and_then(YamlValue::as_str)
            .filter(|s| !s.is_empty())
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A kubeconfig document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KubeconfigDocument {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<NamedEntry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<NamedEntry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<NamedEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
    /// Keys the inspector does not interpret (`apiVersion`, `kind`, `preferences`, ...)
    #[serde(flatten)]
    pub extra: Mapping,
}

impl KubeconfigDocument {
    /// An empty `kind: Config` document
    pub fn new() -> Self {
        let mut extra = Mapping::new();
        extra.insert("apiVersion".into(), "v1".into());
        extra.insert("kind".into(), "Config".into());
        Self {
            extra,
            ..Default::default()
        }
    }

    /// Parse a kubeconfig YAML document. Blank input is an empty document.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        let mut doc: Self = serde_yaml::from_str(raw)
            .map_err(|e| InspectorError::Kubeconfig(format!("failed to parse kubeconfig: {}", e)))?;
        doc.current_context = doc.current_context.filter(|c| !c.is_empty());
        Ok(doc)
    }

    /// Context names in document order
    pub fn context_names(&self) -> Vec<String> {
        self.contexts.iter().map(|c| c.name.clone()).collect()
    }

    /// Whether a context named `name` exists
    pub fn has_context(&self, name: &str) -> bool {
        self.contexts.iter().any(|c| c.name == name)
    }

    /// The cluster entry name a context points at
    pub fn context_cluster(&self, name: &str) -> Option<&str> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.nested_str("context", "cluster"))
    }

    /// The user entry name a context points at
    pub fn context_user(&self, name: &str) -> Option<&str> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.nested_str("context", "user"))
    }

    /// Merge entries from `incoming` whose names are not present yet.
    ///
    /// Returns the names of the contexts that were added.
    pub fn merge(&mut self, incoming: KubeconfigDocument) -> Vec<String> {
        let mut added = Vec::new();
        for context in incoming.contexts {
            if !self.has_context(&context.name) {
                added.push(context.name.clone());
                self.contexts.push(context);
            }
        }
        for cluster in incoming.clusters {
            if !self.clusters.iter().any(|c| c.name == cluster.name) {
                self.clusters.push(cluster);
            }
        }
        for user in incoming.users {
            if !self.users.iter().any(|u| u.name == user.name) {
                self.users.push(user);
            }
        }
        added
    }

    /// Remove a context, promote a new `current-context` if needed and drop
    /// cluster/user entries no surviving context references.
    ///
    /// Returns `false` when no such context exists.
    pub fn remove_context(&mut self, name: &str) -> bool {
        let Some(pos) = self.contexts.iter().position(|c| c.name == name) else {
            return false;
        };
        let removed = self.contexts.remove(pos);
        let cluster = removed.nested_str("context", "cluster").map(str::to_string);
        let user = removed.nested_str("context", "user").map(str::to_string);

        if self.current_context.as_deref() == Some(name) {
            self.current_context = self.contexts.first().map(|c| c.name.clone());
        }

        if let Some(cluster) = cluster {
            let still_used = self
                .contexts
                .iter()
                .any(|c| c.nested_str("context", "cluster") == Some(cluster.as_str()));
            if !still_used {
                debug!("Dropping unreferenced cluster entry {}", cluster);
                self.clusters.retain(|c| c.name != cluster);
            }
        }
        if let Some(user) = user {
            let still_used = self
                .contexts
                .iter()
                .any(|c| c.nested_str("context", "user") == Some(user.as_str()));
            if !still_used {
                debug!("Dropping unreferenced user entry {}", user);
                self.users.retain(|u| u.name != user);
            }
        }
        true
    }

    /// Convert into the model the cluster connector consumes
    pub fn to_kube(&self) -> Result<kube::config::Kubeconfig> {
        let yaml = serde_yaml::to_string(self)?;
        kube::config::Kubeconfig::from_yaml(&yaml)
            .map_err(|e| InspectorError::Kubeconfig(format!("invalid kubeconfig: {}", e)))
    }
}

/// File-backed kubeconfig store
#[derive(Debug, Clone)]
pub struct KubeconfigStore {
    path: PathBuf,
}

impl KubeconfigStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the backing file; a missing file is an error
    pub fn load(&self) -> Result<KubeconfigDocument> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => KubeconfigDocument::parse(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(InspectorError::Kubeconfig(
                format!("kubeconfig file not found at {}", self.path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`KubeconfigStore::load`], but a missing file is an empty document
    pub fn load_or_new(&self) -> Result<KubeconfigDocument> {
        if self.path.exists() {
            self.load()
        } else {
            Ok(KubeconfigDocument::new())
        }
    }

    /// Persist `doc`: write a sibling temp file, then rename it over the target.
    pub fn save(&self, doc: &KubeconfigDocument) -> Result<()> {
        let yaml = serde_yaml::to_string(doc)?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!("Wrote kubeconfig to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::kubeconfig_yaml;

    #[test]
    fn test_parse_keeps_unknown_fields() {
        let raw = format!(
            "{}preferences:\n  colors: true\n",
            kubeconfig_yaml(&[("dev", "dev-cluster", "dev-user")], Some("dev"))
        );
        let doc = KubeconfigDocument::parse(&raw).unwrap();
        assert_eq!(doc.context_names(), vec!["dev"]);
        assert_eq!(doc.current_context.as_deref(), Some("dev"));
        assert_eq!(doc.context_cluster("dev"), Some("dev-cluster"));
        assert_eq!(doc.context_user("dev"), Some("dev-user"));

        let out = serde_yaml::to_string(&doc).unwrap();
        let reparsed = KubeconfigDocument::parse(&out).unwrap();
        assert_eq!(reparsed, doc);
        assert!(out.contains("preferences"));
        assert!(out.contains("server: https://dev-cluster.example:6443"));
    }

    #[test]
    fn test_parse_null_lists_and_blank() {
        let doc = KubeconfigDocument::parse("apiVersion: v1\nkind: Config\ncontexts: null\n").unwrap();
        assert!(doc.contexts.is_empty());
        assert!(KubeconfigDocument::parse("  \n").unwrap().contexts.is_empty());
        assert!(matches!(
            KubeconfigDocument::parse("contexts: [: bad"),
            Err(InspectorError::Kubeconfig(_))
        ));
    }

    #[test]
    fn test_merge_only_adds_new_entries() {
        let mut doc =
            KubeconfigDocument::parse(&kubeconfig_yaml(&[("dev", "dev-cluster", "dev-user")], None))
                .unwrap();
        let incoming = KubeconfigDocument::parse(&kubeconfig_yaml(
            &[("dev", "other-cluster", "other-user"), ("prod", "prod-cluster", "prod-user")],
            None,
        ))
        .unwrap();

        let added = doc.merge(incoming);
        assert_eq!(added, vec!["prod"]);
        assert_eq!(doc.context_names(), vec!["dev", "prod"]);
        // existing dev context keeps its original references
        assert_eq!(doc.context_cluster("dev"), Some("dev-cluster"));
        assert_eq!(doc.clusters.len(), 3);
    }

    #[test]
    fn test_remove_context_collects_unreferenced_entries() {
        let mut doc = KubeconfigDocument::parse(&kubeconfig_yaml(
            &[
                ("dev", "shared-cluster", "dev-user"),
                ("staging", "shared-cluster", "staging-user"),
                ("prod", "prod-cluster", "prod-user"),
            ],
            Some("prod"),
        ))
        .unwrap();

        assert!(doc.remove_context("prod"));
        assert!(!doc.remove_context("prod"));
        assert_eq!(doc.current_context.as_deref(), Some("dev"));
        assert!(!doc.clusters.iter().any(|c| c.name == "prod-cluster"));
        assert!(!doc.users.iter().any(|u| u.name == "prod-user"));

        assert!(doc.remove_context("dev"));
        // still referenced by staging
        assert!(doc.clusters.iter().any(|c| c.name == "shared-cluster"));
        assert!(!doc.users.iter().any(|u| u.name == "dev-user"));
    }

    #[test]
    fn test_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = KubeconfigStore::new(dir.path().join("nested").join("config"));
        assert!(matches!(store.load(), Err(InspectorError::Kubeconfig(_))));
        assert!(store.load_or_new().unwrap().contexts.is_empty());

        let doc =
            KubeconfigDocument::parse(&kubeconfig_yaml(&[("dev", "dev-cluster", "dev-user")], Some("dev")))
                .unwrap();
        store.save(&doc).unwrap();
        assert_eq!(store.load().unwrap(), doc);

        // no temp files left behind
        let entries = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_to_kube_conversion() {
        let doc =
            KubeconfigDocument::parse(&kubeconfig_yaml(&[("dev", "dev-cluster", "dev-user")], Some("dev")))
                .unwrap();
        let kube = doc.to_kube().unwrap();
        assert_eq!(kube.contexts.len(), 1);
        assert_eq!(kube.clusters.len(), 1);
        assert_eq!(kube.current_context.as_deref(), Some("dev"));
    }
}
