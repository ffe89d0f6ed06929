//! Plugin Lifecycle Management
//!
//! Drives every plugin through its state machine:
//!
//! ```text
//! Discovered -> Resolved -> Loading -> Loaded -> Enabled <-> Disabled -> Unloaded
//!                                         \________________________/
//!                                                     |
//!                                                  Failed (terminal)
//! ```
//!
//! The manager owns one state record per plugin id and an arena of loaded
//! instances (entry point plus sandbox context); contexts hold a non-owning
//! handle to the shared hook system, never to the manager. Entry points run
//! outside the component lock so plugin code can re-enter the hook system.

use crate::error::{PluginError, PluginResult};
use crate::hooks::HookSystem;
use crate::manifest::PluginManifest;
use crate::sandbox::SandboxContext;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Executable surface of a plugin. `on_load` is required; `on_unload` is
/// optional and best-effort.
pub trait PluginEntry: Send {
    /// Called once, inside a fresh sandbox context, when the plugin loads.
    /// Returning an error fails the load.
    fn on_load(&mut self, ctx: &mut SandboxContext) -> PluginResult<()>;

    /// Called on unload. Failures are logged, never fatal.
    fn on_unload(&mut self, _ctx: &mut SandboxContext) -> PluginResult<()> {
        Ok(())
    }
}

/// Lifecycle state of one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Discovered,
    Resolved,
    Loading,
    Loaded,
    Enabled,
    Disabled,
    Unloaded,
    Failed(String),
}

impl PluginState {
    /// Stable name used in logs and statistics.
    pub fn name(&self) -> &'static str {
        match self {
            PluginState::Discovered => "discovered",
            PluginState::Resolved => "resolved",
            PluginState::Loading => "loading",
            PluginState::Loaded => "loaded",
            PluginState::Enabled => "enabled",
            PluginState::Disabled => "disabled",
            PluginState::Unloaded => "unloaded",
            PluginState::Failed(_) => "failed",
        }
    }

    /// Whether the plugin currently holds a live sandbox context.
    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            PluginState::Loaded | PluginState::Enabled | PluginState::Disabled
        )
    }
}

struct LoadedPlugin {
    entry: Box<dyn PluginEntry>,
    context: SandboxContext,
}

#[derive(Default)]
struct LifecycleInner {
    states: HashMap<String, PluginState>,
    instances: HashMap<String, LoadedPlugin>,
}

/// Owns per-plugin state records and the arena of loaded instances.
pub struct LifecycleManager {
    hooks: Arc<HookSystem>,
    inner: Mutex<LifecycleInner>,
}

impl LifecycleManager {
    pub fn new(hooks: Arc<HookSystem>) -> Self {
        Self {
            hooks,
            inner: Mutex::new(LifecycleInner::default()),
        }
    }

    /// Record a newly discovered plugin. Existing records are untouched.
    pub fn register_discovered(&self, plugin_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .states
            .entry(plugin_id.to_string())
            .or_insert(PluginState::Discovered);
    }

    /// Mark a plugin as having passed dependency/version validation.
    pub fn mark_resolved(&self, plugin_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.states.get_mut(plugin_id) {
            if matches!(state, PluginState::Discovered) {
                *state = PluginState::Resolved;
            }
        }
    }

    /// Current state of a plugin, if it was ever registered.
    pub fn state(&self, plugin_id: &str) -> Option<PluginState> {
        self.inner.lock().unwrap().states.get(plugin_id).cloned()
    }

    /// Ids currently holding a live sandbox context.
    pub fn loaded_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .states
            .iter()
            .filter(|(_, state)| state.is_loaded())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Plugin counts keyed by state name.
    pub fn counts_by_state(&self) -> HashMap<&'static str, usize> {
        let inner = self.inner.lock().unwrap();
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for state in inner.states.values() {
            *counts.entry(state.name()).or_insert(0) += 1;
        }
        counts
    }

    /// Load one plugin: run its entry point inside a fresh sandbox context.
    ///
    /// Preconditions: the plugin is not already loaded, and every
    /// dependency is itself loaded (or enabled, when
    /// `require_enabled_dependencies` is set). On failure the plugin moves
    /// to `Failed`, any registrations its entry point managed to make are
    /// purged, and the error is returned; the caller decides whether to
    /// continue with other plugins.
    pub fn load(
        &self,
        manifest: &PluginManifest,
        entry: Box<dyn PluginEntry>,
        require_enabled_dependencies: bool,
    ) -> PluginResult<()> {
        let plugin_id = manifest.plugin_id.clone();

        // Phase 1: validate preconditions and claim the Loading state.
        {
            let mut inner = self.inner.lock().unwrap();
            let current = inner
                .states
                .get(&plugin_id)
                .cloned()
                .unwrap_or(PluginState::Discovered);
            match current {
                PluginState::Discovered | PluginState::Resolved | PluginState::Unloaded => {}
                other => {
                    return Err(PluginError::InvalidState {
                        plugin: plugin_id,
                        from: other.name().to_string(),
                        to: "loading".to_string(),
                    });
                }
            }

            for dep in &manifest.dependencies {
                let dep_state = inner.states.get(&dep.plugin_id);
                let satisfied = match dep_state {
                    Some(PluginState::Enabled) => true,
                    Some(PluginState::Loaded) | Some(PluginState::Disabled) => {
                        !require_enabled_dependencies
                    }
                    _ => false,
                };
                if !satisfied {
                    let err = PluginError::DependencyFailed {
                        plugin: plugin_id.clone(),
                        dependency: dep.plugin_id.clone(),
                    };
                    inner
                        .states
                        .insert(plugin_id.clone(), PluginState::Failed(err.to_string()));
                    return Err(err);
                }
            }

            inner.states.insert(plugin_id.clone(), PluginState::Loading);
        }

        // Phase 2: run the entry point outside the lock.
        let mut entry = entry;
        let mut context = SandboxContext::new(
            plugin_id.clone(),
            Arc::clone(&self.hooks),
            manifest.config_schema.clone(),
        );
        let load_result = catch_unwind(AssertUnwindSafe(|| entry.on_load(&mut context)));

        // Phase 3: record the outcome.
        match load_result {
            Ok(Ok(())) => {
                let mut inner = self.inner.lock().unwrap();
                inner
                    .instances
                    .insert(plugin_id.clone(), LoadedPlugin { entry, context });
                inner.states.insert(plugin_id.clone(), PluginState::Loaded);
                drop(inner);
                self.hooks.set_active(&plugin_id, true);
                info!("plugin {} loaded", plugin_id);
                Ok(())
            }
            Ok(Err(e)) => {
                let err = PluginError::PluginLoad {
                    plugin: plugin_id.clone(),
                    reason: e.to_string(),
                };
                self.record_load_failure(&plugin_id, &err);
                Err(err)
            }
            Err(payload) => {
                let reason = if let Some(s) = payload.downcast_ref::<&str>() {
                    format!("entry point panicked: {}", s)
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    format!("entry point panicked: {}", s)
                } else {
                    "entry point panicked".to_string()
                };
                let err = PluginError::PluginLoad {
                    plugin: plugin_id.clone(),
                    reason,
                };
                self.record_load_failure(&plugin_id, &err);
                Err(err)
            }
        }
    }

    fn record_load_failure(&self, plugin_id: &str, err: &PluginError) {
        warn!("{}", err);
        // Anything the entry point registered before failing must go.
        self.hooks.unregister_plugin(plugin_id);
        let mut inner = self.inner.lock().unwrap();
        inner
            .states
            .insert(plugin_id.to_string(), PluginState::Failed(err.to_string()));
    }

    /// Make a loaded plugin eligible for hook dispatch.
    pub fn enable(&self, plugin_id: &str) -> PluginResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let state = inner
                .states
                .get_mut(plugin_id)
                .ok_or_else(|| PluginError::UnknownPlugin(plugin_id.to_string()))?;
            match state {
                PluginState::Loaded | PluginState::Disabled => *state = PluginState::Enabled,
                PluginState::Enabled => return Ok(()),
                other => {
                    return Err(PluginError::InvalidState {
                        plugin: plugin_id.to_string(),
                        from: other.name().to_string(),
                        to: "enabled".to_string(),
                    });
                }
            }
        }
        self.hooks.set_active(plugin_id, true);
        debug!("plugin {} enabled", plugin_id);
        Ok(())
    }

    /// Exclude a loaded plugin from hook dispatch. Registrations are kept
    /// so re-enabling does not re-run the entry point.
    pub fn disable(&self, plugin_id: &str) -> PluginResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            let state = inner
                .states
                .get_mut(plugin_id)
                .ok_or_else(|| PluginError::UnknownPlugin(plugin_id.to_string()))?;
            match state {
                PluginState::Loaded | PluginState::Enabled => *state = PluginState::Disabled,
                PluginState::Disabled => return Ok(()),
                other => {
                    return Err(PluginError::InvalidState {
                        plugin: plugin_id.to_string(),
                        from: other.name().to_string(),
                        to: "disabled".to_string(),
                    });
                }
            }
        }
        self.hooks.set_active(plugin_id, false);
        debug!("plugin {} disabled", plugin_id);
        Ok(())
    }

    /// Unload one plugin: best-effort `on_unload`, then purge every hook
    /// and filter registration for the id and release its sandbox context.
    ///
    /// Dependents are not considered here; the facade cascades before
    /// calling this.
    pub fn unload(&self, plugin_id: &str) -> PluginResult<()> {
        let instance = {
            let mut inner = self.inner.lock().unwrap();
            let state = inner
                .states
                .get(plugin_id)
                .ok_or_else(|| PluginError::UnknownPlugin(plugin_id.to_string()))?;
            if !state.is_loaded() {
                return Err(PluginError::InvalidState {
                    plugin: plugin_id.to_string(),
                    from: state.name().to_string(),
                    to: "unloaded".to_string(),
                });
            }
            inner
                .states
                .insert(plugin_id.to_string(), PluginState::Unloaded);
            inner.instances.remove(plugin_id)
        };

        if let Some(mut instance) = instance {
            let unload_result =
                catch_unwind(AssertUnwindSafe(|| {
                    instance.entry.on_unload(&mut instance.context)
                }));
            match unload_result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("plugin {} on_unload failed: {}", plugin_id, e),
                Err(_) => warn!("plugin {} on_unload panicked", plugin_id),
            }
        }

        self.hooks.unregister_plugin(plugin_id);
        info!("plugin {} unloaded", plugin_id);
        Ok(())
    }

    /// Move a plugin to the terminal `Failed` state, purging any live
    /// registrations. Used for dependency-failure propagation.
    pub fn fail(&self, plugin_id: &str, reason: String) {
        {
            let mut inner = self.inner.lock().unwrap();
            if matches!(inner.states.get(plugin_id), Some(PluginState::Failed(_))) {
                return;
            }
            inner.instances.remove(plugin_id);
            inner
                .states
                .insert(plugin_id.to_string(), PluginState::Failed(reason.clone()));
        }
        self.hooks.unregister_plugin(plugin_id);
        warn!("plugin {} failed: {}", plugin_id, reason);
    }

    /// Drop the state record entirely (after unregistration).
    pub fn forget(&self, plugin_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.states.remove(plugin_id);
        inner.instances.remove(plugin_id);
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("LifecycleManager")
            .field("states", &inner.states)
            .field("instances", &inner.instances.keys().collect::<Vec<_>>())
            .finish()
    }
}
