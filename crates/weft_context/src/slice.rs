//! Read-only view of the context keys a step declared.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Immutable, ordered subset of the context store handed to one tool call.
///
/// Only keys that were present when the step was dispatched appear here;
/// tools must tolerate partial context.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContextSlice {
    values: IndexMap<String, Value>,
}

impl ContextSlice {
    /// Create an empty slice
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Decode a value into a concrete type
    ///
    /// Returns `None` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns error if the stored value does not match `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<Result<T, serde_json::Error>> {
        self.values
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
    }

    /// Whether the key is present
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys from `required` that are not present, in the given order
    #[must_use]
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|key| !self.values.contains_key(key.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Iterate over present entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of present keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no key is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume into the underlying map
    #[must_use]
    pub fn into_inner(self) -> IndexMap<String, Value> {
        self.values
    }
}

impl From<IndexMap<String, Value>> for ContextSlice {
    fn from(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<(String, Value)> for ContextSlice {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_slice() -> ContextSlice {
        [
            ("script".to_string(), json!("hello")),
            ("scenes".to_string(), json!(3)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_slice_get() {
        let slice = make_slice();
        assert_eq!(slice.get("script"), Some(&json!("hello")));
        assert!(slice.get("missing").is_none());
        assert_eq!(slice.len(), 2);
    }

    #[test]
    fn test_slice_get_as() {
        let slice = make_slice();
        let scenes: u32 = slice.get_as("scenes").unwrap().unwrap();
        assert_eq!(scenes, 3);

        assert!(slice.get_as::<u32>("script").unwrap().is_err());
        assert!(slice.get_as::<u32>("nope").is_none());
    }

    #[test]
    fn test_slice_missing_preserves_order() {
        let slice = make_slice();
        let required = vec![
            "voice".to_string(),
            "script".to_string(),
            "music".to_string(),
        ];
        assert_eq!(slice.missing(&required), vec!["voice", "music"]);
    }

    #[test]
    fn test_slice_iter_order() {
        let slice = make_slice();
        let keys: Vec<_> = slice.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["script", "scenes"]);
    }

    #[test]
    fn test_slice_serializes_as_map() {
        let slice = make_slice();
        let json = serde_json::to_value(&slice).unwrap();
        assert_eq!(json, json!({"script": "hello", "scenes": 3}));
    }
}
