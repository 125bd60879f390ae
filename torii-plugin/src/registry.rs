use crate::plugin::{Plugin, PluginInstance};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide plugin registry: name → factory.
///
/// Built once at startup via factory registration and treated as
/// immutable afterwards; no dynamic unloading.
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

/// Introspection record exposed by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct PluginSchema {
    pub name: String,
    pub priority: i32,
    pub phases: Vec<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Register a plugin factory. Last registration wins for a name.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        tracing::info!(plugin = %name, "Registered plugin");
        self.plugins.insert(name, plugin);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(name)
    }

    /// Build a configured instance, or `None` for an unknown name.
    pub fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Option<anyhow::Result<Box<dyn PluginInstance>>> {
        self.plugins.get(name).map(|factory| factory.configure(config))
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn schema(&self, name: &str) -> Option<PluginSchema> {
        self.plugins.get(name).map(|p| PluginSchema {
            name: p.name().to_string(),
            priority: p.priority(),
            phases: p.phases().iter().map(|ph| ph.to_string()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Phase, PluginContext};

    struct MockPlugin {
        name: &'static str,
    }

    struct MockInstance {
        name: &'static str,
    }

    impl Plugin for MockPlugin {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i32 {
            100
        }
        fn phases(&self) -> &'static [Phase] {
            &[Phase::Access]
        }
        fn configure(&self, _config: &serde_json::Value) -> anyhow::Result<Box<dyn PluginInstance>> {
            Ok(Box::new(MockInstance { name: self.name }))
        }
    }

    #[async_trait::async_trait]
    impl PluginInstance for MockInstance {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i32 {
            100
        }
        fn phases(&self) -> &'static [Phase] {
            &[Phase::Access]
        }
    }

    #[test]
    fn test_empty_registry() {
        let reg = PluginRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.get("nonexistent").is_none());
        assert!(reg.create("nonexistent", &serde_json::json!({})).is_none());
    }

    #[test]
    fn test_register_and_create() {
        let mut reg = PluginRegistry::new();
        reg.register(Arc::new(MockPlugin { name: "key-auth" }));
        assert_eq!(reg.len(), 1);
        let inst = reg.create("key-auth", &serde_json::json!({})).unwrap().unwrap();
        assert_eq!(inst.name(), "key-auth");
    }

    #[test]
    fn test_register_overwrite_keeps_one() {
        let mut reg = PluginRegistry::new();
        reg.register(Arc::new(MockPlugin { name: "plugin-a" }));
        reg.register(Arc::new(MockPlugin { name: "plugin-a" }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_list_is_sorted() {
        let mut reg = PluginRegistry::new();
        for name in ["rate-limiting", "cors", "key-auth"] {
            reg.register(Arc::new(MockPlugin { name }));
        }
        assert_eq!(reg.list(), vec!["cors", "key-auth", "rate-limiting"]);
    }

    #[test]
    fn test_schema() {
        let mut reg = PluginRegistry::new();
        reg.register(Arc::new(MockPlugin { name: "key-auth" }));
        let schema = reg.schema("key-auth").unwrap();
        assert_eq!(schema.name, "key-auth");
        assert_eq!(schema.priority, 100);
        assert_eq!(schema.phases, vec!["access"]);
        assert!(reg.schema("missing").is_none());
    }

    #[tokio::test]
    async fn test_default_handlers_are_noops() {
        let inst = MockInstance { name: "noop" };
        let req = torii_core::http::GatewayRequest::new("GET", "/");
        let mut ctx = PluginContext::new(req);
        assert!(inst.access(&mut ctx).await.unwrap().is_none());
        assert!(inst.rewrite(&mut ctx).await.is_ok());
        let chunk = inst
            .body_filter(&mut ctx, bytes::Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(&chunk[..], b"x");
    }
}
