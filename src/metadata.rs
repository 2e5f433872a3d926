//! The `Metadata` envelope shared by every persisted resource kind, and the
//! label selector used by list operations (§4.8).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "default";

/// Resolves the empty-string namespace to `default`, per §3.
pub fn resolve_namespace(namespace: &str) -> &str {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let now = Utc::now();
        let namespace = namespace.into();
        Self {
            name: name.into(),
            namespace: resolve_namespace(&namespace).to_string(),
            generation: 1,
            created_at: now,
            updated_at: now,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Bumped on every spec mutation; reconcilers never call this.
    pub fn bump_generation(&mut self) {
        self.generation += 1;
        self.updated_at = Utc::now();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey { namespace: self.namespace.clone(), name: self.name.clone() }
    }
}

/// Implemented by every persisted resource kind so the store can stamp
/// `updated_at` on every write without each reconciler remembering to.
pub trait WithMetadata {
    fn metadata_mut(&mut self) -> &mut Metadata;
}

/// `(namespace, name)` — the primary key shared by every resource kind's
/// store table, and the unit of work enqueued on a [`crate::workqueue::WorkQueue`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self { namespace: resolve_namespace(&namespace).to_string(), name: name.into() }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Serialized as `namespace/name` so a `BTreeMap<ResourceKey, _>` round-trips
/// through `serde_json`, whose map keys must serialize to strings.
impl Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let (namespace, name) = raw
            .split_once('/')
            .ok_or_else(|| serde::de::Error::custom(format!("invalid resource key {raw:?}, expected namespace/name")))?;
        Ok(ResourceKey { namespace: namespace.to_string(), name: name.to_string() })
    }
}

/// A parsed `k1=v1,k2=v2` label selector. Empty selector matches everything;
/// otherwise every pair must match exactly (AND semantics per §4.8).
#[derive(Debug, Clone, Default)]
pub struct LabelSelector {
    requirements: Vec<(String, String)>,
}

impl LabelSelector {
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut requirements = Vec::new();
        for pair in raw.split(',') {
            let (k, v) = pair.split_once('=').ok_or_else(|| {
                crate::error::Error::validation(format!(
                    "invalid label selector term {pair:?}, expected k=v"
                ))
            })?;
            requirements.push((k.trim().to_string(), v.trim().to_string()));
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k).map(|value| value == v).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_everything() {
        let sel = LabelSelector::parse("").unwrap();
        assert!(sel.matches(&BTreeMap::new()));
    }

    #[test]
    fn selector_is_conjunctive_and_exact() {
        let sel = LabelSelector::parse("env=dev,team=core").unwrap();
        let mut labels = BTreeMap::new();
        labels.insert("env".to_string(), "dev".to_string());
        assert!(!sel.matches(&labels));
        labels.insert("team".to_string(), "core".to_string());
        assert!(sel.matches(&labels));
        labels.insert("team".to_string(), "infra".to_string());
        assert!(!sel.matches(&labels));
    }

    #[test]
    fn malformed_term_is_rejected() {
        assert!(LabelSelector::parse("env").is_err());
    }

    #[test]
    fn namespace_resolution() {
        assert_eq!(resolve_namespace(""), DEFAULT_NAMESPACE);
        assert_eq!(resolve_namespace("staging"), "staging");
    }
}
