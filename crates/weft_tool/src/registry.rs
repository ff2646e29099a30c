//! Tool registry.
//!
//! A plain name-to-implementation map built once at startup. The engine
//! holds it behind an `Arc` and never mutates it while a run is active.

use crate::error::ToolError;
use crate::tool::Tool;
use indexmap::IndexMap;
use std::sync::Arc;

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A tool with the same name is already registered
    #[error("tool already registered: {name}")]
    AlreadyRegistered {
        /// Conflicting name
        name: String,
    },
}

/// Registry of tools keyed by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    /// Registered tools, in registration order
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name
    ///
    /// # Errors
    ///
    /// Returns error if a tool with the same name is already registered
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    ///
    /// # Errors
    ///
    /// Returns error if a tool with the same name is already registered
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Result<Self, RegistryError> {
        self.register(Arc::new(tool))?;
        Ok(self)
    }

    /// Look up a tool
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if no tool has that name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| ToolError::NotFound {
                tool: name.to_string(),
            })
    }

    /// Check if a tool is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Iterate over registered tools in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Collects tools by name; a later tool replaces an earlier one of the
/// same name
impl FromIterator<Arc<dyn Tool>> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Tool>>>(iter: I) -> Self {
        Self {
            tools: iter
                .into_iter()
                .map(|tool| (tool.name().to_string(), tool))
                .collect(),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolCall, ToolOutput};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _call: ToolCall) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::new(serde_json::Value::String(self.0.to_string())))
        }
    }

    #[test]
    fn test_registry_new() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = ToolRegistry::new()
            .with_tool(Named("a"))
            .unwrap()
            .with_tool(Named("b"))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert_eq!(registry.get("b").unwrap().name(), "b");
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_registry_duplicate() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("a"))).unwrap();

        let err = registry.register(Arc::new(Named("a"))).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyRegistered {
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn test_registry_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.get("ghost").err().unwrap();
        assert_eq!(
            err,
            ToolError::NotFound {
                tool: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_registry_from_iter() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(Named("x")), Arc::new(Named("y"))];
        let registry: ToolRegistry = tools.into_iter().collect();
        assert_eq!(registry.names(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = ToolRegistry::new().with_tool(Named("a")).unwrap();
        let tool = registry.get("a").unwrap();
        let output = tool
            .execute(ToolCall::new("p", "s", serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(output.value, serde_json::json!("a"));
    }
}
