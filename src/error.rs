//! Error Handling Module
//!
//! Unified error type covering every failure mode of the runtime: manifest
//! validation, dependency resolution, plugin loading, and hook/filter
//! dispatch. Dispatch-phase errors are always caught at the callback
//! boundary and handed back as values, never propagated into the host.

use crate::version::VersionRange;
use semver::Version;
use thiserror::Error;

/// Main error type for all plugin runtime operations
#[derive(Debug, Error)]
pub enum PluginError {
    // Manifest and registry errors
    #[error("invalid manifest: {reason}")]
    ManifestValidation { reason: String },

    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    // Version errors
    #[error("invalid version '{input}': bad token '{token}'")]
    VersionParse { input: String, token: String },

    #[error("invalid version range '{input}': {reason}")]
    RangeParse { input: String, reason: String },

    #[error("plugin '{plugin}' requires host {required}, host is {host}")]
    IncompatibleHost {
        plugin: String,
        required: VersionRange,
        host: Version,
    },

    // Resolution errors
    #[error("circular dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("plugin '{dependent}' requires missing dependency '{dependency}'")]
    MissingDependency {
        dependent: String,
        dependency: String,
    },

    #[error("plugin '{dependent}' requires '{dependency}' {required}, found {found}")]
    VersionMismatch {
        dependent: String,
        dependency: String,
        required: VersionRange,
        found: Version,
    },

    // Load-phase errors
    #[error("dependency '{dependency}' of plugin '{plugin}' failed to load")]
    DependencyFailed { plugin: String, dependency: String },

    #[error("plugin '{plugin}' failed to load: {reason}")]
    PluginLoad { plugin: String, reason: String },

    #[error("plugin '{plugin}' cannot go from '{from}' to '{to}'")]
    InvalidState {
        plugin: String,
        from: String,
        to: String,
    },

    #[error("plugin '{plugin}' has loaded dependents: {dependents:?}")]
    HasDependents {
        plugin: String,
        dependents: Vec<String>,
    },

    // Dispatch-phase errors (recorded, never propagated through dispatch)
    #[error("hook '{hook}' callback from plugin '{plugin}' failed: {reason}")]
    HookExecution {
        hook: String,
        plugin: String,
        reason: String,
    },

    #[error("filter '{filter}' callback from plugin '{plugin}' failed: {reason}")]
    FilterExecution {
        filter: String,
        plugin: String,
        reason: String,
    },

    // Configuration errors
    #[error("invalid config value for '{key}': {reason}")]
    ConfigValidation { key: String, reason: String },
}

/// Result type alias for plugin runtime operations
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Short machine-readable kind, used in logs and statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginError::ManifestValidation { .. } => "manifest_validation",
            PluginError::DuplicatePlugin(_) => "duplicate_plugin",
            PluginError::UnknownPlugin(_) => "unknown_plugin",
            PluginError::VersionParse { .. } => "version_parse",
            PluginError::RangeParse { .. } => "range_parse",
            PluginError::IncompatibleHost { .. } => "incompatible_host",
            PluginError::CircularDependency { .. } => "circular_dependency",
            PluginError::MissingDependency { .. } => "missing_dependency",
            PluginError::VersionMismatch { .. } => "version_mismatch",
            PluginError::DependencyFailed { .. } => "dependency_failed",
            PluginError::PluginLoad { .. } => "plugin_load",
            PluginError::InvalidState { .. } => "invalid_state",
            PluginError::HasDependents { .. } => "has_dependents",
            PluginError::HookExecution { .. } => "hook_execution",
            PluginError::FilterExecution { .. } => "filter_execution",
            PluginError::ConfigValidation { .. } => "config_validation",
        }
    }
}
