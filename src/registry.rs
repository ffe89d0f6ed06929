//! Plugin Registry
//!
//! In-memory index of validated manifests, keyed by plugin id. Handles
//! discovery validation (rejecting malformed and duplicate manifests),
//! search, and the per-plugin availability flag. The registry knows nothing
//! about lifecycle state; the resolver and marketplace read consistent
//! snapshots of it.

use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginManifest;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// One registered plugin: its manifest plus registry-local state.
#[derive(Debug, Clone)]
pub struct RegistryRecord {
    /// Validated manifest.
    pub manifest: PluginManifest,
    /// Availability flag, independent of lifecycle state. Unavailable
    /// plugins are skipped by `load_all` but stay registered.
    pub available: bool,
    /// When the manifest was registered.
    pub registered_at: DateTime<Utc>,
}

/// Outcome of a discovery pass: what registered, what was rejected.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Ids registered by this pass, in source order.
    pub registered: Vec<String>,
    /// Validation errors for rejected sources.
    pub errors: Vec<PluginError>,
}

impl DiscoveryReport {
    /// True when every source validated and registered.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Listing filter over registry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginFilter {
    Available,
    Unavailable,
}

/// Thread-safe manifest index.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    records: RwLock<IndexMap<String, RegistryRecord>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a batch of manifest sources.
    ///
    /// Each source is validated independently; malformed manifests and
    /// duplicate ids (within the batch or against existing registrations)
    /// are reported in the result without aborting the rest of the batch.
    pub fn discover(&self, sources: &[Value]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for source in sources {
            match PluginManifest::from_json(source) {
                Ok(manifest) => {
                    let id = manifest.plugin_id.clone();
                    match self.register(manifest) {
                        Ok(()) => report.registered.push(id),
                        Err(e) => {
                            warn!("discovery rejected '{}': {}", id, e);
                            report.errors.push(e);
                        }
                    }
                }
                Err(e) => {
                    warn!("discovery rejected a manifest source: {}", e);
                    report.errors.push(e);
                }
            }
        }
        info!(
            "discovery pass complete: {} registered, {} rejected",
            report.registered.len(),
            report.errors.len()
        );
        report
    }

    /// Register a validated manifest. Ids are unique within the registry.
    pub fn register(&self, manifest: PluginManifest) -> PluginResult<()> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&manifest.plugin_id) {
            return Err(PluginError::DuplicatePlugin(manifest.plugin_id));
        }
        debug!(
            "registering plugin {} v{}",
            manifest.plugin_id, manifest.version
        );
        records.insert(
            manifest.plugin_id.clone(),
            RegistryRecord {
                manifest,
                available: true,
                registered_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Remove a plugin from the index, returning its manifest.
    pub fn unregister(&self, plugin_id: &str) -> PluginResult<PluginManifest> {
        let mut records = self.records.write().unwrap();
        let record = records
            .shift_remove(plugin_id)
            .ok_or_else(|| PluginError::UnknownPlugin(plugin_id.to_string()))?;
        info!("unregistered plugin {}", plugin_id);
        Ok(record.manifest)
    }

    /// Manifest for one plugin.
    pub fn get(&self, plugin_id: &str) -> Option<PluginManifest> {
        let records = self.records.read().unwrap();
        records.get(plugin_id).map(|r| r.manifest.clone())
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.records.read().unwrap().contains_key(plugin_id)
    }

    /// Registered records in registration order, optionally filtered.
    pub fn list(&self, filter: Option<PluginFilter>) -> Vec<RegistryRecord> {
        let records = self.records.read().unwrap();
        records
            .values()
            .filter(|record| match filter {
                None => true,
                Some(PluginFilter::Available) => record.available,
                Some(PluginFilter::Unavailable) => !record.available,
            })
            .cloned()
            .collect()
    }

    /// Case-insensitive match over id, name, and description.
    pub fn search(&self, query: &str) -> Vec<PluginManifest> {
        let needle = query.to_lowercase();
        let records = self.records.read().unwrap();
        records
            .values()
            .filter(|record| {
                let m = &record.manifest;
                m.plugin_id.to_lowercase().contains(&needle)
                    || m.name.to_lowercase().contains(&needle)
                    || m.description.to_lowercase().contains(&needle)
            })
            .map(|record| record.manifest.clone())
            .collect()
    }

    /// Toggle the availability flag.
    pub fn set_available(&self, plugin_id: &str, available: bool) -> PluginResult<()> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::UnknownPlugin(plugin_id.to_string()))?;
        record.available = available;
        debug!("plugin {} availability -> {}", plugin_id, available);
        Ok(())
    }

    pub fn is_available(&self, plugin_id: &str) -> bool {
        let records = self.records.read().unwrap();
        records.get(plugin_id).map(|r| r.available).unwrap_or(false)
    }

    /// Ids of currently available plugins, in registration order.
    pub fn available_ids(&self) -> Vec<String> {
        let records = self.records.read().unwrap();
        records
            .values()
            .filter(|r| r.available)
            .map(|r| r.manifest.plugin_id.clone())
            .collect()
    }

    /// Consistent manifest snapshot for one resolution pass.
    pub fn snapshot(&self) -> IndexMap<String, PluginManifest> {
        let records = self.records.read().unwrap();
        records
            .iter()
            .map(|(id, record)| (id.clone(), record.manifest.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
