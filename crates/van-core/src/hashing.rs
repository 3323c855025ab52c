//! Content identity for site configuration objects
//!
//! An object's hash is the lower-case hex SHA-256 of its canonical JSON
//! encoding (object keys sorted, no insignificant whitespace). Two parties
//! holding equal data always compute equal hashes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::Result;

/// Object name to content hash
pub type ObjectHashes = BTreeMap<String, String>;

/// A named configuration object with its content hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigObject {
    pub name: String,
    pub hash: String,
    pub data: Value,
}

impl ConfigObject {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        let data = canonicalize(data);
        let hash = hash_value(&data);
        Self {
            name: name.into(),
            hash,
            data,
        }
    }

    /// Build an object from any serializable value
    pub fn from_serialize<T: Serialize>(name: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::new(name, serde_json::to_value(value)?))
    }

    /// Whether `data` still matches `hash`
    pub fn verify(&self) -> bool {
        hash_value(&self.data) == self.hash
    }
}

/// Rebuild `value` with every object's keys in sorted order
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Lower-case hex SHA-256 of the canonical encoding of `value`
pub fn hash_value(value: &Value) -> String {
    let canonical = canonicalize(value.clone());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash-set for a collection of objects
pub fn hash_set<'a>(objects: impl IntoIterator<Item = &'a ConfigObject>) -> ObjectHashes {
    objects
        .into_iter()
        .map(|o| (o.name.clone(), o.hash.clone()))
        .collect()
}

/// Names whose local copy is missing or differs from the authoritative one
pub fn stale_objects(local: &ObjectHashes, authoritative: &ObjectHashes) -> Vec<String> {
    authoritative
        .iter()
        .filter(|(name, hash)| local.get(*name) != Some(*hash))
        .map(|(name, _)| name.clone())
        .collect()
}

/// Names held locally that the authoritative side no longer has
pub fn retired_objects(local: &ObjectHashes, authoritative: &ObjectHashes) -> Vec<String> {
    local
        .keys()
        .filter(|name| !authoritative.contains_key(*name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": null, "y": [1, 2]}, "b": 1}"#).unwrap();
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn test_array_order_changes_hash() {
        assert_ne!(hash_value(&json!([1, 2])), hash_value(&json!([2, 1])));
    }

    #[test]
    fn test_hash_is_lower_hex_sha256() {
        let hash = hash_value(&json!({}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // sha256("{}")
        assert_eq!(hash, "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a");
    }

    #[test]
    fn test_config_object_verifies() {
        let mut obj = ConfigObject::new("links", json!([{"host": "a", "port": 1}]));
        assert!(obj.verify());
        obj.data = json!([]);
        assert!(!obj.verify());
    }

    #[test]
    fn test_stale_and_retired() {
        let authoritative: ObjectHashes = [("links", "1"), ("services", "2"), ("certificate", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let local: ObjectHashes = [("links", "1"), ("services", "old"), ("legacy", "9")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        assert_eq!(stale_objects(&local, &authoritative), vec!["certificate", "services"]);
        assert_eq!(retired_objects(&local, &authoritative), vec!["legacy"]);
        assert!(stale_objects(&authoritative, &authoritative).is_empty());
    }
}
