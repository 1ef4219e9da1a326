//! Composition framework (Crossplane) identifiers

use cluster_client::ResourceType;

/// Group of provider packages and their revisions
pub const PKG_GROUP: &str = "pkg.crossplane.io";

/// apiVersion carried by Provider and ProviderRevision objects and their owner references
pub const PKG_API_VERSION: &str = "pkg.crossplane.io/v1";

/// Group of CompositeResourceDefinitions
pub const XRD_GROUP: &str = "apiextensions.crossplane.io";

/// CompositeResourceDefinition versions, newest first
pub const XRD_VERSIONS: [&str; 2] = ["v2", "v1"];

/// Provider-owned kinds that describe provider configuration, not managed resources
pub const CONFIG_KINDS: [&str; 2] = ["ProviderConfig", "ProviderConfigUsage"];

/// Whether `group` belongs to the framework
pub fn is_framework_group(group: &str) -> bool {
    group == XRD_GROUP || group.ends_with(".crossplane.io")
}

/// CompositeResourceDefinitions at `version`
pub fn composite_definitions(version: &str) -> ResourceType {
    ResourceType {
        group: XRD_GROUP.to_string(),
        version: version.to_string(),
        kind: "CompositeResourceDefinition".to_string(),
        plural: "compositeresourcedefinitions".to_string(),
    }
}

/// Provider packages
pub fn providers() -> ResourceType {
    pkg_type("Provider", "providers")
}

/// Provider package revisions
pub fn provider_revisions() -> ResourceType {
    pkg_type("ProviderRevision", "providerrevisions")
}

fn pkg_type(kind: &str, plural: &str) -> ResourceType {
    ResourceType {
        group: PKG_GROUP.to_string(),
        version: "v1".to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}
