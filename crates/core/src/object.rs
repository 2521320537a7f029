//! Minimal object metadata: enough to derive a reconciliation key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Anything addressable by namespace and name.
pub trait Resource {
    /// Object name within its namespace.
    fn name(&self) -> &str;

    /// Namespace, or `None` for cluster-scoped objects.
    fn namespace(&self) -> Option<&str>;
}

/// Object metadata as it appears on the wire (`metadata` of a manifest).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl Resource for ObjectMeta {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

impl<R: Resource + ?Sized> Resource for &R {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn namespace(&self) -> Option<&str> {
        (**self).namespace()
    }
}
