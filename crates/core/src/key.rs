//! Qualified resource names used as reconciliation keys.
//!
//! The canonical string form (`namespace/name`, or just `name` for
//! cluster-scoped objects) is what the backoff tracker and the delayed
//! deliverer are keyed by. Neither part may contain `/`, which keeps the
//! mapping from key to string injective for the life of the process.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KeyError, KeyResult};
use crate::object::Resource;

const SEPARATOR: char = '/';

/// Identifier of one unit of reconcilable work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    namespace: Option<String>,
    name: String,
}

impl QualifiedName {
    /// Build a namespaced key. An empty namespace means cluster scoped.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> KeyResult<Self> {
        let namespace = namespace.into();
        let name = name.into();

        if name.is_empty() {
            return Err(KeyError::EmptyName);
        }
        if name.contains(SEPARATOR) {
            return Err(KeyError::separator("name", name));
        }
        if namespace.contains(SEPARATOR) {
            return Err(KeyError::separator("namespace", namespace));
        }

        Ok(Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
            name,
        })
    }

    /// Build a key for a cluster-scoped object.
    pub fn cluster_scoped(name: impl Into<String>) -> KeyResult<Self> {
        Self::new(String::new(), name)
    }

    /// Derive the key of an object.
    pub fn from_object<R: Resource + ?Sized>(obj: &R) -> KeyResult<Self> {
        Self::new(obj.namespace().unwrap_or_default(), obj.name())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}{SEPARATOR}{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for QualifiedName {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => Self::cluster_scoped(name),
            (Some(ns), Some(name), None) if !ns.is_empty() => Self::new(ns, name),
            _ => Err(KeyError::malformed(s)),
        }
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QualifiedName> for String {
    fn from(value: QualifiedName) -> Self {
        value.to_string()
    }
}
