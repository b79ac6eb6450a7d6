use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::models::{Category, Product};

/// Consider cache stale after 1 hour.
const CACHE_STALE_MINUTES: i64 = 60;

pub(crate) const PRODUCTS: &str = "products";
pub(crate) const FEATURED: &str = "featured";
pub(crate) const CATEGORIES: &str = "categories";
const PRODUCT_PREFIX: &str = "product_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

/// On-disk JSON cache of catalog data, one file per entry.
#[derive(Debug, Clone)]
pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    /// Slugs come from the server; keep them from escaping the cache dir.
    fn product_key(slug: &str) -> String {
        let safe: String = slug
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}{}", PRODUCT_PREFIX, safe)
    }

    pub(crate) fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", name))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    pub(crate) fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(self.cache_path(name), contents)
            .with_context(|| format!("Failed to write cache file: {}", name))?;
        debug!(cache = name, "Cache saved");
        Ok(())
    }

    // ===== Products =====

    pub fn load_products(&self) -> Result<Option<CachedData<Vec<Product>>>> {
        self.load(PRODUCTS)
    }

    pub fn save_products(&self, products: &[Product]) -> Result<()> {
        self.save(PRODUCTS, &products)
    }

    // ===== Featured =====

    pub fn load_featured(&self) -> Result<Option<CachedData<Vec<Product>>>> {
        self.load(FEATURED)
    }

    pub fn save_featured(&self, products: &[Product]) -> Result<()> {
        self.save(FEATURED, &products)
    }

    // ===== Categories =====

    pub fn load_categories(&self) -> Result<Option<CachedData<Vec<Category>>>> {
        self.load(CATEGORIES)
    }

    pub fn save_categories(&self, categories: &[Category]) -> Result<()> {
        self.save(CATEGORIES, &categories)
    }

    // ===== Product Detail =====

    pub fn load_product(&self, slug: &str) -> Result<Option<CachedData<Product>>> {
        self.load(&Self::product_key(slug))
    }

    pub fn save_product(&self, product: &Product) -> Result<()> {
        let slug = product.slug.as_deref().unwrap_or(&product.name);
        self.save(&Self::product_key(slug), product)
    }

    pub(crate) fn product_cache_name(slug: &str) -> String {
        Self::product_key(slug)
    }

    /// Remove every cached entry.
    pub fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    // ===== Cache Age Information =====

    /// Helper to load cache and log errors without failing
    fn load_age<T>(&self, name: &str, loader: impl FnOnce() -> Result<Option<CachedData<T>>>) -> Option<String> {
        match loader() {
            Ok(Some(cached)) => Some(cached.age_display()),
            Ok(None) => None,
            Err(e) => {
                debug!(cache = name, error = %e, "Failed to load cache for age display");
                None
            }
        }
    }

    pub fn get_cache_ages(&self) -> CacheAges {
        CacheAges {
            products: self.load_age(PRODUCTS, || self.load_products()),
            featured: self.load_age(FEATURED, || self.load_featured()),
            categories: self.load_age(CATEGORIES, || self.load_categories()),
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheAges {
    pub products: Option<String>,
    pub featured: Option<String>,
    pub categories: Option<String>,
}

impl CacheAges {
    /// Age of the first populated list, or "never"
    pub fn last_updated(&self) -> String {
        [&self.products, &self.featured, &self.categories]
            .into_iter()
            .flatten()
            .next()
            .cloned()
            .unwrap_or_else(|| "never".to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn product(slug: &str) -> Product {
        serde_json::from_value(serde_json::json!({ "name": slug, "slug": slug })).unwrap()
    }

    #[test]
    fn test_cached_data_age_display() {
        let mut cached = CachedData::new(vec![1, 2, 3]);
        assert_eq!(cached.age_display(), "just now");

        cached.cached_at = Utc::now() - Duration::minutes(5);
        assert_eq!(cached.age_display(), "5m ago");

        cached.cached_at = Utc::now() - Duration::minutes(95);
        assert_eq!(cached.age_display(), "2h ago");

        cached.cached_at = Utc::now() - Duration::hours(50);
        assert_eq!(cached.age_display(), "2d ago");

        // Clock skew
        cached.cached_at = Utc::now() + Duration::minutes(10);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_cached_data_is_stale() {
        let fresh = CachedData::new(vec![1]);
        assert!(!fresh.is_stale());

        let mut old = CachedData::new(vec![1]);
        old.cached_at = Utc::now() - Duration::minutes(61);
        assert!(old.is_stale());
    }

    #[test]
    fn test_save_and_load_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().join("cache")).unwrap();

        assert!(cache.load_products().unwrap().is_none());
        assert_eq!(cache.get_cache_ages().last_updated(), "never");

        cache.save_products(&[product("tee"), product("cap")]).unwrap();
        cache.save_product(&product("tee")).unwrap();

        let loaded = cache.load_products().unwrap().unwrap();
        assert_eq!(loaded.data.len(), 2);
        assert_eq!(
            cache.load_product("tee").unwrap().unwrap().data.slug.as_deref(),
            Some("tee")
        );
        assert_eq!(cache.get_cache_ages().last_updated(), "just now");

        cache.clear().unwrap();
        assert!(cache.load_products().unwrap().is_none());
        assert!(cache.load_product("tee").unwrap().is_none());
    }

    #[test]
    fn test_product_key_is_sanitized() {
        assert_eq!(CacheManager::product_key("linen-shirt"), "product_linen-shirt");
        assert_eq!(CacheManager::product_key("../etc/passwd"), "product____etc_passwd");
    }
}
