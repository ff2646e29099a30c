//! Context entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_core::{StepId, Timestamp};

/// A single value published into the context store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    /// Key the value is stored under
    pub key: String,
    /// Opaque value
    pub value: Value,
    /// Serialized size in bytes
    pub size_bytes: usize,
    /// When the entry was written
    pub created_at: Timestamp,
    /// When the entry stops being readable
    pub expires_at: Option<Timestamp>,
    /// Step that wrote the entry
    pub producer: StepId,
}

impl ContextEntry {
    /// Create a new entry stamped with the current time
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value, size_bytes: usize, producer: StepId) -> Self {
        Self {
            key: key.into(),
            value,
            size_bytes,
            created_at: Timestamp::now(),
            expires_at: None,
            producer,
        }
    }

    /// Expire the entry `ttl_ms` after its creation time
    #[must_use]
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.expires_at = Some(self.created_at.add_millis(ttl_ms));
        self
    }

    /// Whether the entry has expired as of `now`
    #[must_use]
    pub fn is_expired(&self, now: &Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= *now)
    }
}

/// Serialized size of a value, the unit all store bounds are expressed in
#[must_use]
pub fn encoded_size(value: &Value) -> usize {
    // Serializing a `Value` cannot fail: every key is already a string.
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = ContextEntry::new("k", json!(1), 1, StepId::new("a"));
        let far = Timestamp::now().add_millis(10_000_000);
        assert!(!entry.is_expired(&far));
    }

    #[test]
    fn test_entry_ttl() {
        let entry = ContextEntry::new("k", json!("v"), 3, StepId::new("a")).with_ttl_ms(50);
        let expires = entry.expires_at.unwrap();

        assert_eq!(expires.millis_since(&entry.created_at), 50);
        assert!(!entry.is_expired(&entry.created_at));
        assert!(entry.is_expired(&expires));
    }

    #[test]
    fn test_encoded_size() {
        assert_eq!(encoded_size(&json!("ab")), 4);
        assert_eq!(encoded_size(&json!({"a": 1})), 7);
        assert_eq!(encoded_size(&Value::Null), 4);
    }
}
