//! Plugin Manifest Parsing
//!
//! The manifest is the boundary contract between the host and the runtime:
//! a JSON object describing a plugin's identity, version, entry point,
//! dependency constraints, host compatibility, and configuration schema.
//! How manifest JSON reaches the process (disk, network, embedded) is the
//! host's concern; this module only validates and models already-read data.
//! A validated manifest is immutable.

use crate::config::ConfigSchema;
use crate::error::{PluginError, PluginResult};
use crate::version::{parse_version, VersionRange};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single dependency constraint, parsed from an `"id op version"` string
/// such as `"com.example.base >=1.0.0"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Id of the required plugin.
    pub plugin_id: String,
    /// Version range the installed dependency must satisfy.
    pub range: VersionRange,
}

impl DependencySpec {
    /// Parse a dependency string: the first whitespace-separated token is
    /// the plugin id, the remainder is the range expression.
    pub fn parse(spec: &str) -> PluginResult<Self> {
        let mut tokens = spec.split_whitespace();
        let plugin_id = tokens
            .next()
            .ok_or_else(|| PluginError::ManifestValidation {
                reason: "empty dependency entry".to_string(),
            })?
            .to_string();

        let range_expr: String = tokens.collect::<Vec<_>>().join("");
        if range_expr.is_empty() {
            return Err(PluginError::ManifestValidation {
                reason: format!("dependency '{}' is missing a version range", plugin_id),
            });
        }

        Ok(DependencySpec {
            plugin_id,
            range: range_expr.parse()?,
        })
    }
}

/// Immutable description of one plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginManifest {
    /// Unique reverse-domain id, e.g. `com.example.exporter`.
    pub plugin_id: String,
    /// Display name.
    pub name: String,
    /// Installed version.
    pub version: Version,
    /// Author string.
    pub author: String,
    /// Short description.
    pub description: String,
    /// Symbolic entry point name the host maps to a factory.
    pub entry_point: String,
    /// Ordered dependency constraints.
    pub dependencies: Vec<DependencySpec>,
    /// Host version range this plugin supports, if declared.
    pub compatibility: Option<VersionRange>,
    /// Declared configuration schema, if any.
    pub config_schema: Option<ConfigSchema>,
}

/// Raw manifest shape as it appears in source JSON.
#[derive(Debug, Deserialize)]
struct RawManifest {
    plugin_id: String,
    name: String,
    version: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
    entry_point: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    compatibility: Option<String>,
    #[serde(default)]
    config_schema: Option<Value>,
}

impl PluginManifest {
    /// Parse and validate a manifest from its JSON source object.
    pub fn from_json(source: &Value) -> PluginResult<Self> {
        let raw: RawManifest =
            serde_json::from_value(source.clone()).map_err(|e| PluginError::ManifestValidation {
                reason: e.to_string(),
            })?;

        validate_id(&raw.plugin_id)?;
        if raw.name.trim().is_empty() {
            return Err(PluginError::ManifestValidation {
                reason: format!("plugin '{}': name cannot be empty", raw.plugin_id),
            });
        }
        if raw.entry_point.trim().is_empty() {
            return Err(PluginError::ManifestValidation {
                reason: format!("plugin '{}': entry_point cannot be empty", raw.plugin_id),
            });
        }

        let version = parse_version(&raw.version)?;

        let mut dependencies = Vec::with_capacity(raw.dependencies.len());
        for spec in &raw.dependencies {
            let dep = DependencySpec::parse(spec)?;
            if dep.plugin_id == raw.plugin_id {
                return Err(PluginError::ManifestValidation {
                    reason: format!("plugin '{}' depends on itself", raw.plugin_id),
                });
            }
            if dependencies
                .iter()
                .any(|d: &DependencySpec| d.plugin_id == dep.plugin_id)
            {
                return Err(PluginError::ManifestValidation {
                    reason: format!(
                        "plugin '{}' declares dependency '{}' twice",
                        raw.plugin_id, dep.plugin_id
                    ),
                });
            }
            dependencies.push(dep);
        }

        let compatibility = match raw.compatibility {
            Some(expr) => Some(expr.parse()?),
            None => None,
        };

        let config_schema = match raw.config_schema {
            Some(ref value) => Some(ConfigSchema::from_json(value)?),
            None => None,
        };

        Ok(PluginManifest {
            plugin_id: raw.plugin_id,
            name: raw.name,
            version,
            author: raw.author,
            description: raw.description,
            entry_point: raw.entry_point,
            dependencies,
            compatibility,
            config_schema,
        })
    }

    /// The dependency constraint on `plugin_id`, if declared.
    pub fn dependency_on(&self, plugin_id: &str) -> Option<&DependencySpec> {
        self.dependencies.iter().find(|d| d.plugin_id == plugin_id)
    }
}

fn validate_id(id: &str) -> PluginResult<()> {
    if id.trim().is_empty() {
        return Err(PluginError::ManifestValidation {
            reason: "plugin_id cannot be empty".to_string(),
        });
    }
    let valid = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !valid {
        return Err(PluginError::ManifestValidation {
            reason: format!("plugin_id '{}' contains invalid characters", id),
        });
    }
    Ok(())
}
