//! Hook and Filter Dispatch
//!
//! Named extension points connecting the host to plugin callbacks. Hooks
//! fan an event out to every registered callback; filters thread a value
//! through the callbacks in sequence. Both orderings are priority-descending
//! with stable registration-order ties.
//!
//! Two properties are load-bearing here:
//! - Fault isolation: a callback that fails (or panics) is recorded and
//!   never stops later hook callbacks; a failing filter callback
//!   short-circuits the chain and the last good value is returned.
//! - Dispatch never holds the registration lock. The pipeline is
//!   snapshotted under the lock, then callbacks run against the snapshot,
//!   so a callback may re-enter the system to register or unregister.

use crate::error::{PluginError, PluginResult};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Reserved hook and filter names the host emits by convention.
pub mod names {
    pub const PLUGIN_LOADED: &str = "plugin:loaded";
    pub const PLUGIN_ENABLED: &str = "plugin:enabled";
    pub const PLUGIN_DISABLED: &str = "plugin:disabled";
    pub const PLUGIN_ERROR: &str = "plugin:error";
    pub const TEMPLATE_CREATED: &str = "template:created";
    pub const TEMPLATE_MODIFIED: &str = "template:modified";
    pub const TEMPLATE_DELETED: &str = "template:deleted";
    pub const SYNC_STARTED: &str = "sync:started";
    pub const SYNC_COMPLETED: &str = "sync:completed";

    pub const FILTER_TEMPLATE_DATA: &str = "plugin:template_data";
    pub const FILTER_EXPORT_FORMAT: &str = "plugin:export_format";
    pub const FILTER_IMPORT_DATA: &str = "plugin:import_data";
    pub const FILTER_UI_COMPONENTS: &str = "plugin:ui_components";
    pub const FILTER_MENU_ITEMS: &str = "plugin:menu_items";

    /// All reserved hook names.
    pub const HOOKS: [&str; 9] = [
        PLUGIN_LOADED,
        PLUGIN_ENABLED,
        PLUGIN_DISABLED,
        PLUGIN_ERROR,
        TEMPLATE_CREATED,
        TEMPLATE_MODIFIED,
        TEMPLATE_DELETED,
        SYNC_STARTED,
        SYNC_COMPLETED,
    ];

    /// All reserved filter names.
    pub const FILTERS: [&str; 5] = [
        FILTER_TEMPLATE_DATA,
        FILTER_EXPORT_FORMAT,
        FILTER_IMPORT_DATA,
        FILTER_UI_COMPONENTS,
        FILTER_MENU_ITEMS,
    ];
}

/// Key/value payload handed to hook and filter callbacks.
pub type HookContext = serde_json::Map<String, Value>;

/// Hook callback: side effects only, result recorded per callback.
pub type HookCallback = dyn Fn(&str, &HookContext) -> PluginResult<Value> + Send + Sync;

/// Filter callback: transforms and returns the value.
pub type FilterCallback = dyn Fn(Value, &HookContext) -> PluginResult<Value> + Send + Sync;

/// Result of one callback during a hook trigger.
#[derive(Debug)]
pub struct HookOutcome {
    /// Plugin that owned the callback.
    pub plugin_id: String,
    /// The callback's value, or its recorded failure.
    pub result: PluginResult<Value>,
}

/// Result of threading a value through a filter chain.
#[derive(Debug)]
pub struct FilterOutcome {
    /// The transformed value; on failure, the last good value.
    pub value: Value,
    /// The recorded error if the chain short-circuited.
    pub error: Option<PluginError>,
    /// How many callbacks ran (including a failing one).
    pub applied: usize,
}

struct HookRegistration {
    plugin_id: String,
    priority: i32,
    seq: u64,
    callback: Arc<HookCallback>,
}

struct FilterRegistration {
    plugin_id: String,
    priority: i32,
    seq: u64,
    callback: Arc<FilterCallback>,
}

#[derive(Default)]
struct HookState {
    hooks: IndexMap<String, Vec<HookRegistration>>,
    filters: IndexMap<String, Vec<FilterRegistration>>,
    /// Plugins currently eligible for dispatch. Disabled plugins keep their
    /// registrations but are skipped here.
    active: HashSet<String>,
    next_seq: u64,
}

/// Registration and dispatch hub for all hooks and filters.
#[derive(Default)]
pub struct HookSystem {
    state: Mutex<HookState>,
}

impl HookSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook callback owned by `plugin_id`.
    ///
    /// Higher priority runs first; equal priorities run in registration
    /// order.
    pub fn register_hook<F>(&self, name: &str, plugin_id: &str, priority: i32, callback: F)
    where
        F: Fn(&str, &HookContext) -> PluginResult<Value> + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        let registrations = state.hooks.entry(name.to_string()).or_default();
        registrations.push(HookRegistration {
            plugin_id: plugin_id.to_string(),
            priority,
            seq,
            callback: Arc::new(callback),
        });
        registrations.sort_by_key(|r| (std::cmp::Reverse(r.priority), r.seq));
        debug!("plugin {} registered hook '{}' (priority {})", plugin_id, name, priority);
    }

    /// Register a filter callback owned by `plugin_id`.
    pub fn register_filter<F>(&self, name: &str, plugin_id: &str, priority: i32, callback: F)
    where
        F: Fn(Value, &HookContext) -> PluginResult<Value> + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        let registrations = state.filters.entry(name.to_string()).or_default();
        registrations.push(FilterRegistration {
            plugin_id: plugin_id.to_string(),
            priority,
            seq,
            callback: Arc::new(callback),
        });
        registrations.sort_by_key(|r| (std::cmp::Reverse(r.priority), r.seq));
        debug!(
            "plugin {} registered filter '{}' (priority {})",
            plugin_id, name, priority
        );
    }

    /// Remove every hook and filter registration owned by `plugin_id`, and
    /// drop it from the active set. Atomic under the component lock: no
    /// callback tagged with this id can fire afterwards.
    pub fn unregister_plugin(&self, plugin_id: &str) {
        let mut state = self.state.lock().unwrap();
        for registrations in state.hooks.values_mut() {
            registrations.retain(|r| r.plugin_id != plugin_id);
        }
        for registrations in state.filters.values_mut() {
            registrations.retain(|r| r.plugin_id != plugin_id);
        }
        state.active.remove(plugin_id);
        debug!("purged all registrations for plugin {}", plugin_id);
    }

    /// Mark a plugin eligible (or not) for dispatch. Registrations are
    /// untouched, so re-enabling is instant.
    pub fn set_active(&self, plugin_id: &str, active: bool) {
        let mut state = self.state.lock().unwrap();
        if active {
            state.active.insert(plugin_id.to_string());
        } else {
            state.active.remove(plugin_id);
        }
    }

    /// Invoke every active callback registered for `name`, in priority
    /// order, collecting one outcome per callback. A failing callback never
    /// prevents the rest from running, and no error escapes this method.
    pub fn trigger(&self, name: &str, ctx: &HookContext) -> Vec<HookOutcome> {
        let snapshot: Vec<(String, Arc<HookCallback>)> = {
            let state = self.state.lock().unwrap();
            match state.hooks.get(name) {
                Some(registrations) => registrations
                    .iter()
                    .filter(|r| state.active.contains(&r.plugin_id))
                    .map(|r| (r.plugin_id.clone(), Arc::clone(&r.callback)))
                    .collect(),
                None => Vec::new(),
            }
        };

        snapshot
            .into_iter()
            .map(|(plugin_id, callback)| {
                let result = match run_guarded(|| (*callback)(name, ctx)) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => {
                        warn!("hook '{}' callback from {} failed: {}", name, plugin_id, e);
                        Err(PluginError::HookExecution {
                            hook: name.to_string(),
                            plugin: plugin_id.clone(),
                            reason: e.to_string(),
                        })
                    }
                    Err(reason) => {
                        warn!("hook '{}' callback from {} panicked: {}", name, plugin_id, reason);
                        Err(PluginError::HookExecution {
                            hook: name.to_string(),
                            plugin: plugin_id.clone(),
                            reason,
                        })
                    }
                };
                HookOutcome { plugin_id, result }
            })
            .collect()
    }

    /// Thread `value` through every active filter callback for `name`.
    ///
    /// Each callback receives the previous callback's output. A failing
    /// callback short-circuits the chain: the outcome carries the last good
    /// value and the recorded error, and later callbacks do not run.
    pub fn apply_filter(&self, name: &str, value: Value, ctx: &HookContext) -> FilterOutcome {
        let snapshot: Vec<(String, Arc<FilterCallback>)> = {
            let state = self.state.lock().unwrap();
            match state.filters.get(name) {
                Some(registrations) => registrations
                    .iter()
                    .filter(|r| state.active.contains(&r.plugin_id))
                    .map(|r| (r.plugin_id.clone(), Arc::clone(&r.callback)))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut current = value;
        let mut applied = 0;
        for (plugin_id, callback) in snapshot {
            applied += 1;
            let input = current.clone();
            match run_guarded(|| (*callback)(input, ctx)) {
                Ok(Ok(next)) => current = next,
                Ok(Err(e)) => {
                    warn!("filter '{}' from {} failed: {}", name, plugin_id, e);
                    return FilterOutcome {
                        value: current,
                        error: Some(PluginError::FilterExecution {
                            filter: name.to_string(),
                            plugin: plugin_id,
                            reason: e.to_string(),
                        }),
                        applied,
                    };
                }
                Err(reason) => {
                    warn!("filter '{}' from {} panicked: {}", name, plugin_id, reason);
                    return FilterOutcome {
                        value: current,
                        error: Some(PluginError::FilterExecution {
                            filter: name.to_string(),
                            plugin: plugin_id,
                            reason,
                        }),
                        applied,
                    };
                }
            }
        }

        FilterOutcome {
            value: current,
            error: None,
            applied,
        }
    }

    /// Number of live hook registrations across all names.
    pub fn hook_registration_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.hooks.values().map(Vec::len).sum()
    }

    /// Number of live filter registrations across all names.
    pub fn filter_registration_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.filters.values().map(Vec::len).sum()
    }

    /// Live registrations owned by one plugin (hooks + filters).
    pub fn registrations_for(&self, plugin_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        let hooks: usize = state
            .hooks
            .values()
            .map(|v| v.iter().filter(|r| r.plugin_id == plugin_id).count())
            .sum();
        let filters: usize = state
            .filters
            .values()
            .map(|v| v.iter().filter(|r| r.plugin_id == plugin_id).count())
            .sum();
        hooks + filters
    }
}

impl std::fmt::Debug for HookSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("HookSystem")
            .field("hooks", &state.hooks.keys().collect::<Vec<_>>())
            .field("filters", &state.filters.keys().collect::<Vec<_>>())
            .field("active", &state.active)
            .finish()
    }
}

/// Run a callback, converting an outward panic into an error string so a
/// misbehaving plugin cannot unwind into the host.
fn run_guarded<T>(f: impl FnOnce() -> PluginResult<T>) -> Result<PluginResult<T>, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Ok(result),
        Err(payload) => Err(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("callback panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("callback panicked: {}", s)
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn active_system(ids: &[&str]) -> HookSystem {
        let system = HookSystem::new();
        for id in ids {
            system.set_active(id, true);
        }
        system
    }

    #[test]
    fn test_trigger_runs_in_priority_order() {
        let system = active_system(&["p1", "p2", "p3"]);
        system.register_hook("evt", "p1", 0, |_, _| Ok(json!("low")));
        system.register_hook("evt", "p2", 10, |_, _| Ok(json!("high")));
        system.register_hook("evt", "p3", 0, |_, _| Ok(json!("low-later")));

        let outcomes = system.trigger("evt", &HookContext::new());
        let order: Vec<&str> = outcomes.iter().map(|o| o.plugin_id.as_str()).collect();
        // Priority first, then stable registration order among ties.
        assert_eq!(order, vec!["p2", "p1", "p3"]);
    }

    #[test]
    fn test_failing_callback_does_not_stop_the_rest() {
        let system = active_system(&["p1", "p2", "p3"]);
        let ran = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&ran);
        system.register_hook("evt", "p1", 3, move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(json!(1))
        });
        system.register_hook("evt", "p2", 2, |_, _| {
            Err(PluginError::PluginLoad {
                plugin: "p2".to_string(),
                reason: "boom".to_string(),
            })
        });
        let r = Arc::clone(&ran);
        system.register_hook("evt", "p3", 1, move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(json!(3))
        });

        let outcomes = system.trigger("evt", &HookContext::new());
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(
            outcomes[1].result,
            Err(PluginError::HookExecution { .. })
        ));
        assert!(outcomes[2].result.is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let system = active_system(&["p1", "p2"]);
        system.register_hook("evt", "p1", 1, |_, _| panic!("plugin bug"));
        system.register_hook("evt", "p2", 0, |_, _| Ok(json!("fine")));

        let outcomes = system.trigger("evt", &HookContext::new());
        assert_eq!(outcomes.len(), 2);
        match &outcomes[0].result {
            Err(PluginError::HookExecution { reason, .. }) => {
                assert!(reason.contains("panicked"));
                assert!(reason.contains("plugin bug"));
            }
            other => panic!("expected contained panic, got {:?}", other),
        }
        assert!(outcomes[1].result.is_ok());
    }

    #[test]
    fn test_filter_threads_value_through_chain() {
        let system = active_system(&["p1", "p2"]);
        system.register_filter("fmt", "p1", 10, |value, _| {
            Ok(json!(format!("{}+first", value.as_str().unwrap())))
        });
        system.register_filter("fmt", "p2", 0, |value, _| {
            Ok(json!(format!("{}+second", value.as_str().unwrap())))
        });

        let outcome = system.apply_filter("fmt", json!("start"), &HookContext::new());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.value, json!("start+first+second"));
        assert_eq!(outcome.applied, 2);
    }

    #[test]
    fn test_filter_short_circuits_on_failure() {
        let system = active_system(&["p1", "p2", "p3"]);
        let third_ran = Arc::new(AtomicUsize::new(0));

        system.register_filter("fmt", "p1", 3, |value, _| {
            Ok(json!(format!("{}+one", value.as_str().unwrap())))
        });
        system.register_filter("fmt", "p2", 2, |_, _| {
            Err(PluginError::PluginLoad {
                plugin: "p2".to_string(),
                reason: "refused".to_string(),
            })
        });
        let r = Arc::clone(&third_ran);
        system.register_filter("fmt", "p3", 1, move |value, _| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        });

        let outcome = system.apply_filter("fmt", json!("start"), &HookContext::new());
        // Last good value is the first callback's output.
        assert_eq!(outcome.value, json!("start+one"));
        assert!(matches!(
            outcome.error,
            Some(PluginError::FilterExecution { .. })
        ));
        assert_eq!(outcome.applied, 2);
        assert_eq!(third_ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregister_plugin_purges_everything() {
        let system = active_system(&["p1", "p2"]);
        system.register_hook("evt", "p1", 0, |_, _| Ok(json!(1)));
        system.register_hook("evt", "p2", 0, |_, _| Ok(json!(2)));
        system.register_filter("fmt", "p1", 0, |v, _| Ok(v));
        assert_eq!(system.registrations_for("p1"), 2);

        system.unregister_plugin("p1");
        assert_eq!(system.registrations_for("p1"), 0);
        let outcomes = system.trigger("evt", &HookContext::new());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].plugin_id, "p2");
    }

    #[test]
    fn test_inactive_plugin_is_skipped_but_keeps_registrations() {
        let system = active_system(&["p1"]);
        system.register_hook("evt", "p1", 0, |_, _| Ok(json!(1)));

        system.set_active("p1", false);
        assert!(system.trigger("evt", &HookContext::new()).is_empty());
        assert_eq!(system.registrations_for("p1"), 1);

        system.set_active("p1", true);
        assert_eq!(system.trigger("evt", &HookContext::new()).len(), 1);
    }

    #[test]
    fn test_reentrant_registration_during_dispatch() {
        let system = Arc::new(active_system(&["p1"]));
        let handle = Arc::clone(&system);
        system.register_hook("evt", "p1", 0, move |_, _| {
            handle.register_hook("evt", "p1", 0, |_, _| Ok(json!("late")));
            Ok(json!("first"))
        });

        // Does not deadlock; the new registration takes effect next trigger.
        let first = system.trigger("evt", &HookContext::new());
        assert_eq!(first.len(), 1);
        let second = system.trigger("evt", &HookContext::new());
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_unknown_hook_name_is_a_no_op() {
        let system = HookSystem::new();
        assert!(system.trigger("never-registered", &HookContext::new()).is_empty());
        let outcome = system.apply_filter("never-registered", json!(5), &HookContext::new());
        assert_eq!(outcome.value, json!(5));
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn test_reserved_names_are_stable() {
        assert_eq!(names::HOOKS.len(), 9);
        assert_eq!(names::FILTERS.len(), 5);
        assert!(names::HOOKS.contains(&"plugin:loaded"));
        assert!(names::FILTERS.contains(&"plugin:template_data"));
    }
}
