//! Plugin Sandbox Context
//!
//! The restricted API surface handed to one plugin instance. A context owns
//! a private key-value store and a private configuration map validated
//! against the plugin's declared schema; its only path into the rest of the
//! runtime is a non-owning handle to the shared hook system, and every
//! registration made through it is tagged with the owning plugin's id so
//! the lifecycle manager can retract them all on unload.
//!
//! A context lives from just before the plugin's entry point runs until the
//! plugin is unloaded. Two contexts never share storage.

use crate::config::ConfigSchema;
use crate::error::PluginResult;
use crate::hooks::{HookContext, HookSystem};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-plugin façade over the runtime.
pub struct SandboxContext {
    plugin_id: String,
    hooks: Arc<HookSystem>,
    schema: Option<ConfigSchema>,
    config: HashMap<String, Value>,
    data: HashMap<String, Value>,
}

impl SandboxContext {
    pub(crate) fn new(
        plugin_id: impl Into<String>,
        hooks: Arc<HookSystem>,
        schema: Option<ConfigSchema>,
    ) -> Self {
        let plugin_id = plugin_id.into();
        debug!("created sandbox context for plugin {}", plugin_id);
        Self {
            plugin_id,
            hooks,
            schema,
            config: HashMap::new(),
            data: HashMap::new(),
        }
    }

    /// Id of the plugin this context belongs to.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Register a hook callback, tagged with this plugin's id.
    pub fn register_hook<F>(&self, name: &str, priority: i32, callback: F)
    where
        F: Fn(&str, &HookContext) -> PluginResult<Value> + Send + Sync + 'static,
    {
        self.hooks
            .register_hook(name, &self.plugin_id, priority, callback);
    }

    /// Register a filter callback, tagged with this plugin's id.
    pub fn register_filter<F>(&self, name: &str, priority: i32, callback: F)
    where
        F: Fn(Value, &HookContext) -> PluginResult<Value> + Send + Sync + 'static,
    {
        self.hooks
            .register_filter(name, &self.plugin_id, priority, callback);
    }

    /// Configuration value for `key`.
    ///
    /// Falls back to the schema-declared default when the key is unset.
    /// Keys the schema does not declare read as `None`.
    pub fn get_config(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.config.get(key) {
            return Some(value.clone());
        }
        self.schema.as_ref().and_then(|s| s.default_for(key))
    }

    /// Set a configuration value, validated against the declared schema.
    ///
    /// Plugins without a declared schema accept any key.
    pub fn set_config(&mut self, key: &str, value: Value) -> PluginResult<()> {
        if let Some(ref schema) = self.schema {
            schema.validate(key, &value)?;
        }
        self.config.insert(key.to_string(), value);
        Ok(())
    }

    /// Read from this plugin's private store.
    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Write to this plugin's private store.
    pub fn set_data(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    /// Remove a key from the private store, returning the old value.
    pub fn remove_data(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }
}

impl std::fmt::Debug for SandboxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxContext")
            .field("plugin_id", &self.plugin_id)
            .field("config_keys", &self.config.len())
            .field("data_keys", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::from_json(&json!({
            "properties": {
                "mode": {"type": "string", "default": "fast", "enum": ["fast", "safe"]}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_config_defaults_from_schema() {
        let ctx = SandboxContext::new("p1", Arc::new(HookSystem::new()), Some(schema()));
        assert_eq!(ctx.get_config("mode"), Some(json!("fast")));
        assert_eq!(ctx.get_config("undeclared"), None);
    }

    #[test]
    fn test_set_config_is_validated() {
        let mut ctx = SandboxContext::new("p1", Arc::new(HookSystem::new()), Some(schema()));
        ctx.set_config("mode", json!("safe")).unwrap();
        assert_eq!(ctx.get_config("mode"), Some(json!("safe")));

        assert!(matches!(
            ctx.set_config("mode", json!(42)),
            Err(PluginError::ConfigValidation { .. })
        ));
        assert!(matches!(
            ctx.set_config("other", json!("x")),
            Err(PluginError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_schema_less_plugin_accepts_any_config() {
        let mut ctx = SandboxContext::new("p1", Arc::new(HookSystem::new()), None);
        ctx.set_config("anything", json!([1, 2, 3])).unwrap();
        assert_eq!(ctx.get_config("anything"), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_data_store_is_private_per_context() {
        let hooks = Arc::new(HookSystem::new());
        let mut a = SandboxContext::new("a", Arc::clone(&hooks), None);
        let mut b = SandboxContext::new("b", Arc::clone(&hooks), None);

        a.set_data("shared-key", json!("from a"));
        b.set_data("shared-key", json!("from b"));

        assert_eq!(a.get_data("shared-key"), Some(&json!("from a")));
        assert_eq!(b.get_data("shared-key"), Some(&json!("from b")));

        a.remove_data("shared-key");
        assert!(a.get_data("shared-key").is_none());
        assert_eq!(b.get_data("shared-key"), Some(&json!("from b")));
    }

    #[test]
    fn test_registrations_are_tagged_with_owner() {
        let hooks = Arc::new(HookSystem::new());
        let ctx = SandboxContext::new("owner", Arc::clone(&hooks), None);
        ctx.register_hook("evt", 0, |_, _| Ok(json!(1)));
        ctx.register_filter("fmt", 0, |v, _| Ok(v));

        assert_eq!(hooks.registrations_for("owner"), 2);
        hooks.unregister_plugin("owner");
        assert_eq!(hooks.registrations_for("owner"), 0);
    }
}
