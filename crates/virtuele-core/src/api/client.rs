//! Plain client for the public product catalog.
//!
//! Catalog reads and account sign-up need no credentials, so they go through
//! their own HTTP client instead of the session client.

use std::time::Duration;

use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::ApiError;
use crate::models::{Category, NewUser, Product, Review, User};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Read a JSON list body, treating `204 No Content` as an empty list.
pub(crate) async fn json_list<T: DeserializeOwned>(
    response: Response,
    what: &str,
) -> Result<Vec<T>, ApiError> {
    if response.status() == StatusCode::NO_CONTENT {
        debug!(what, "No content");
        return Ok(Vec::new());
    }
    response
        .json()
        .await
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
}

/// Unauthenticated catalog client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone, Debug)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    initial_backoff: Duration,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first rate-limit backoff delay (doubles on each retry).
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET with rate-limit backoff. Returns the successful response.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.client.get(&url).query(query).send().await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return ApiError::check(response).await;
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(url = %url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
            tokio::time::sleep(backoff).await;
            backoff *= 2; // Exponential backoff
        }
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Vec<T>, ApiError> {
        let response = self.get(path, query).await?;
        json_list(response, what).await
    }

    // ===== Data Fetching Methods =====

    /// Fetch every product in the catalog
    pub async fn products(&self) -> Result<Vec<Product>, ApiError> {
        self.get_list("/products/", &[], "product list").await
    }

    /// Fetch products flagged as featured
    pub async fn featured_products(&self) -> Result<Vec<Product>, ApiError> {
        self.get_list("/products/", &[("featured", "true".to_string())], "featured products")
            .await
    }

    /// Fetch products carrying the given category ID
    pub async fn products_in_category(&self, category_id: i64) -> Result<Vec<Product>, ApiError> {
        self.get_list(
            "/products/",
            &[("category", category_id.to_string())],
            "category products",
        )
        .await
    }

    /// Fetch a single product by slug
    pub async fn product(&self, slug: &str) -> Result<Product, ApiError> {
        let response = self.get(&format!("/products/{}/", slug), &[]).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse product {}: {}", slug, e)))
    }

    /// Fetch all categories
    pub async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        self.get_list("/categories/", &[], "category list").await
    }

    /// Fetch products of one category through the category route
    pub async fn category_products(&self, category_id: i64) -> Result<Vec<Product>, ApiError> {
        self.get_list(
            &format!("/categories/{}/products/", category_id),
            &[],
            "category products",
        )
        .await
    }

    // ===== Accounts =====

    /// Create an account. Field errors come back as `ApiError::BadRequest`
    /// carrying the server's JSON body.
    pub async fn register(&self, form: &NewUser) -> Result<User, ApiError> {
        let response = self.client.post(self.url("/users/")).json(form).send().await?;
        let response = ApiError::check(response).await?;

        let user: User = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse new user: {}", e)))?;
        info!(username = %user.username, "Account registered");
        Ok(user)
    }

    /// Fetch reviews for a product
    pub async fn reviews(&self, slug: &str) -> Result<Vec<Review>, ApiError> {
        self.get_list(&format!("/products/{}/reviews/", slug), &[], "reviews")
            .await
    }
}
