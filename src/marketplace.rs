//! Plugin Marketplace
//!
//! Metadata catalog layered on top of the registry: publication state,
//! rating aggregates, and download counts. Entries are independent of
//! runtime lifecycle state; a plugin can be published without ever being
//! loaded locally. Updates to a single entry's aggregates are atomic under
//! the component lock; there are no wider transactional guarantees.

use crate::error::{PluginError, PluginResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use semver::Version;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, info};

/// Catalog entry for one published plugin.
#[derive(Debug, Clone, Serialize)]
pub struct MarketplaceEntry {
    /// Plugin id this entry describes.
    pub plugin_id: String,
    /// Version being offered.
    pub version: Version,
    /// Short description shown in listings.
    pub description: String,
    /// Whether the entry is currently published (searchable/featured).
    pub published: bool,
    /// Total recorded downloads.
    pub downloads: u64,
    /// Number of ratings received.
    pub rating_count: u32,
    /// Sum of all rating scores.
    pub rating_sum: u32,
    /// First publication time.
    pub published_at: DateTime<Utc>,
}

impl MarketplaceEntry {
    pub fn new(plugin_id: impl Into<String>, version: Version, description: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version,
            description: description.into(),
            published: true,
            downloads: 0,
            rating_count: 0,
            rating_sum: 0,
            published_at: Utc::now(),
        }
    }

    /// Running average rating, if anyone has rated.
    pub fn average_rating(&self) -> Option<f64> {
        if self.rating_count == 0 {
            None
        } else {
            Some(f64::from(self.rating_sum) / f64::from(self.rating_count))
        }
    }
}

/// Aggregate counts for statistics reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketplaceSummary {
    pub total_entries: usize,
    pub published_entries: usize,
    pub total_downloads: u64,
}

/// Thread-safe marketplace catalog.
#[derive(Debug, Default)]
pub struct Marketplace {
    entries: Mutex<IndexMap<String, MarketplaceEntry>>,
}

impl Marketplace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an entry. Re-publishing an existing id replaces its version
    /// and description but keeps accumulated ratings and downloads.
    pub fn publish(&self, entry: MarketplaceEntry) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&entry.plugin_id) {
            Some(existing) => {
                existing.version = entry.version;
                existing.description = entry.description;
                existing.published = true;
                debug!("republished marketplace entry {}", existing.plugin_id);
            }
            None => {
                info!("published marketplace entry {}", entry.plugin_id);
                entries.insert(entry.plugin_id.clone(), entry);
            }
        }
    }

    /// Withdraw an entry from listings. Its aggregates are retained.
    pub fn unpublish(&self, plugin_id: &str) -> PluginResult<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::UnknownPlugin(plugin_id.to_string()))?;
        entry.published = false;
        info!("unpublished marketplace entry {}", plugin_id);
        Ok(())
    }

    /// Record a rating (clamped to 1..=5) and return the new average.
    pub fn rate(&self, plugin_id: &str, score: u8) -> PluginResult<f64> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::UnknownPlugin(plugin_id.to_string()))?;
        let score = score.clamp(1, 5);
        entry.rating_sum += u32::from(score);
        entry.rating_count += 1;
        Ok(entry.average_rating().unwrap_or(0.0))
    }

    /// Increment the download counter.
    pub fn record_download(&self, plugin_id: &str) -> PluginResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::UnknownPlugin(plugin_id.to_string()))?;
        entry.downloads += 1;
        Ok(entry.downloads)
    }

    /// Entry for one plugin, published or not.
    pub fn get(&self, plugin_id: &str) -> Option<MarketplaceEntry> {
        self.entries.lock().unwrap().get(plugin_id).cloned()
    }

    /// Case-insensitive search over published entries (id and description).
    pub fn search(&self, query: &str) -> Vec<MarketplaceEntry> {
        let needle = query.to_lowercase();
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .filter(|e| e.published)
            .filter(|e| {
                e.plugin_id.to_lowercase().contains(&needle)
                    || e.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Highest-rated published entries, downloads breaking ties.
    pub fn featured(&self, limit: usize) -> Vec<MarketplaceEntry> {
        let entries = self.entries.lock().unwrap();
        let mut published: Vec<MarketplaceEntry> =
            entries.values().filter(|e| e.published).cloned().collect();
        published.sort_by(|a, b| {
            let rating_a = a.average_rating().unwrap_or(0.0);
            let rating_b = b.average_rating().unwrap_or(0.0);
            rating_b
                .partial_cmp(&rating_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.downloads.cmp(&a.downloads))
                .then(a.plugin_id.cmp(&b.plugin_id))
        });
        published.truncate(limit);
        published
    }

    /// Aggregate counts for statistics reporting.
    pub fn summary(&self) -> MarketplaceSummary {
        let entries = self.entries.lock().unwrap();
        MarketplaceSummary {
            total_entries: entries.len(),
            published_entries: entries.values().filter(|e| e.published).count(),
            total_downloads: entries.values().map(|e| e.downloads).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::parse_version;
    use pretty_assertions::assert_eq;

    fn entry(id: &str, version: &str) -> MarketplaceEntry {
        MarketplaceEntry::new(id, parse_version(version).unwrap(), format!("{} plugin", id))
    }

    #[test]
    fn test_rating_running_average() {
        let market = Marketplace::new();
        market.publish(entry("com.test.a", "1.0.0"));

        assert_eq!(market.rate("com.test.a", 4).unwrap(), 4.0);
        let avg = market.rate("com.test.a", 2).unwrap();
        assert_eq!(avg, 3.0);
        let stored = market.get("com.test.a").unwrap();
        assert_eq!(stored.rating_count, 2);
    }

    #[test]
    fn test_rating_clamped_to_scale() {
        let market = Marketplace::new();
        market.publish(entry("com.test.a", "1.0.0"));
        market.rate("com.test.a", 0).unwrap();
        market.rate("com.test.a", 200).unwrap();
        let stored = market.get("com.test.a").unwrap();
        assert_eq!(stored.rating_sum, 6); // 1 + 5 after clamping
    }

    #[test]
    fn test_download_counter() {
        let market = Marketplace::new();
        market.publish(entry("com.test.a", "1.0.0"));
        market.record_download("com.test.a").unwrap();
        assert_eq!(market.record_download("com.test.a").unwrap(), 2);
    }

    #[test]
    fn test_unpublish_hides_but_keeps_aggregates() {
        let market = Marketplace::new();
        market.publish(entry("com.test.a", "1.0.0"));
        market.rate("com.test.a", 5).unwrap();
        market.unpublish("com.test.a").unwrap();

        assert!(market.search("com.test.a").is_empty());
        assert!(market.featured(10).is_empty());
        let stored = market.get("com.test.a").unwrap();
        assert_eq!(stored.rating_count, 1);
        assert!(!stored.published);
    }

    #[test]
    fn test_republish_keeps_stats() {
        let market = Marketplace::new();
        market.publish(entry("com.test.a", "1.0.0"));
        market.rate("com.test.a", 4).unwrap();
        market.record_download("com.test.a").unwrap();

        market.publish(entry("com.test.a", "2.0.0"));
        let stored = market.get("com.test.a").unwrap();
        assert_eq!(stored.version, parse_version("2.0.0").unwrap());
        assert_eq!(stored.rating_count, 1);
        assert_eq!(stored.downloads, 1);
        assert!(stored.published);
    }

    #[test]
    fn test_featured_orders_by_rating_then_downloads() {
        let market = Marketplace::new();
        market.publish(entry("low", "1.0.0"));
        market.publish(entry("high", "1.0.0"));
        market.publish(entry("popular", "1.0.0"));

        market.rate("high", 5).unwrap();
        market.rate("low", 2).unwrap();
        market.rate("popular", 2).unwrap();
        market.record_download("popular").unwrap();

        let featured = market.featured(2);
        assert_eq!(featured.len(), 2);
        assert_eq!(featured[0].plugin_id, "high");
        assert_eq!(featured[1].plugin_id, "popular");
    }

    #[test]
    fn test_unknown_entry_errors() {
        let market = Marketplace::new();
        assert!(matches!(
            market.rate("ghost", 5),
            Err(PluginError::UnknownPlugin(_))
        ));
        assert!(matches!(
            market.unpublish("ghost"),
            Err(PluginError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn test_summary_counts() {
        let market = Marketplace::new();
        market.publish(entry("a", "1.0.0"));
        market.publish(entry("b", "1.0.0"));
        market.unpublish("b").unwrap();
        market.record_download("a").unwrap();

        let summary = market.summary();
        assert_eq!(summary.total_entries, 2);
        assert_eq!(summary.published_entries, 1);
        assert_eq!(summary.total_downloads, 1);
    }
}
