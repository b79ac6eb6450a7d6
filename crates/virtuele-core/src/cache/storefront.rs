//! Fetch-and-cache access to the catalog.
//!
//! Each accessor serves fresh cached data when it has it, otherwise fetches
//! from the API and updates the cache. When the API is unreachable, stale
//! cache is better than nothing and is served with a warning.

use std::future::Future;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::manager::{CATEGORIES, FEATURED, PRODUCTS};
use super::CacheManager;
use crate::api::{ApiError, CatalogClient};
use crate::models::{Category, Product};

/// Counts returned by [`Storefront::refresh_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub products: usize,
    pub featured: usize,
    pub categories: usize,
}

#[derive(Debug, Clone)]
pub struct Storefront {
    catalog: CatalogClient,
    cache: CacheManager,
}

impl Storefront {
    pub fn new(catalog: CatalogClient, cache: CacheManager) -> Self {
        Self { catalog, cache }
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    async fn cached_or_fetch<T, F>(&self, name: &str, force: bool, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = std::result::Result<T, ApiError>>,
    {
        let cached = match self.cache.load::<T>(name) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(cache = name, error = %e, "Ignoring unreadable cache entry");
                None
            }
        };

        let cached = match cached {
            Some(c) if !force && !c.is_stale() => {
                debug!(cache = name, age = %c.age_display(), "Serving from cache");
                return Ok(c.data);
            }
            other => other,
        };

        match fetch.await {
            Ok(data) => {
                if let Err(e) = self.cache.save(name, &data) {
                    warn!(cache = name, error = %e, "Failed to update cache");
                }
                Ok(data)
            }
            Err(e) => match cached {
                Some(stale) => {
                    warn!(cache = name, error = %e, age = %stale.age_display(), "Fetch failed, serving stale cache");
                    Ok(stale.data)
                }
                None => Err(e).with_context(|| format!("Failed to fetch {}", name)),
            },
        }
    }

    /// Featured products, each guaranteed a "with model" image when it has any image at all.
    pub async fn featured_products(&self, force: bool) -> Result<Vec<Product>> {
        self.cached_or_fetch(FEATURED, force, async {
            let mut products = self.catalog.featured_products().await?;
            products.iter_mut().for_each(Product::fill_model_from_gallery);
            Ok::<_, ApiError>(products)
        })
        .await
    }

    pub async fn all_products(&self, force: bool) -> Result<Vec<Product>> {
        self.cached_or_fetch(PRODUCTS, force, self.catalog.products())
            .await
    }

    pub async fn product_detail(&self, slug: &str, force: bool) -> Result<Product> {
        let name = CacheManager::product_cache_name(slug);
        self.cached_or_fetch(&name, force, self.catalog.product(slug))
            .await
    }

    pub async fn category_list(&self, force: bool) -> Result<Vec<Category>> {
        self.cached_or_fetch(CATEGORIES, force, self.catalog.categories())
            .await
    }

    /// Refetch the product, featured and category lists concurrently.
    pub async fn refresh_all(&self) -> Result<RefreshSummary> {
        let (products, featured, categories) = futures::try_join!(
            self.all_products(true),
            self.featured_products(true),
            self.category_list(true),
        )?;
        Ok(RefreshSummary {
            products: products.len(),
            featured: featured.len(),
            categories: categories.len(),
        })
    }
}
