//! Signed-in calls: current account, carts, checkout and reviews.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::info;

use super::client::json_list;
use super::SessionError;
use crate::auth::{RequestSpec, SessionClient};
use crate::models::{Cart, Review, Size, User};

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ShopError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ShopError::Session(e) if e.is_session_expired())
    }
}

/// Authenticated storefront calls, all routed through the session client so
/// they share its refresh-and-retry handling.
#[derive(Clone, Debug)]
pub struct ShopClient {
    session: Arc<SessionClient>,
}

impl ShopClient {
    pub fn new(session: Arc<SessionClient>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.session
    }

    /// Fetch the account the stored tokens belong to.
    pub async fn me(&self) -> Result<User, ShopError> {
        Ok(self.session.request_json(RequestSpec::get("/users/me/")).await?)
    }

    /// List the user's carts. `Some(true)` keeps checked-out carts only,
    /// `Some(false)` the active cart only.
    pub async fn carts(&self, checked: Option<bool>) -> Result<Vec<Cart>, ShopError> {
        let mut spec = RequestSpec::get("/cart/");
        if let Some(checked) = checked {
            spec = spec.query("checked", checked.to_string());
        }
        let response = self.session.request(spec).await?;
        Ok(json_list(response, "carts").await.map_err(SessionError::Transport)?)
    }

    /// Add one unit of a product to the active cart.
    pub async fn add_to_cart(&self, slug: &str, size: Size) -> Result<Cart, ShopError> {
        let cart = self
            .session
            .request_json(RequestSpec::post(format!("/cart/item/{}/{}/", slug, size)))
            .await?;
        info!(slug, %size, "Added to cart");
        Ok(cart)
    }

    /// Remove one unit of a product from the active cart.
    pub async fn remove_from_cart(&self, slug: &str, size: Size) -> Result<Cart, ShopError> {
        let cart = self
            .session
            .request_json(RequestSpec::delete(format!("/cart/item/{}/{}/", slug, size)))
            .await?;
        info!(slug, %size, "Removed from cart");
        Ok(cart)
    }

    /// Check out the active cart.
    pub async fn checkout(&self) -> Result<Cart, ShopError> {
        let cart: Cart = self
            .session
            .request_json(RequestSpec::post("/cart/checkout/"))
            .await?;
        info!(cart_id = ?cart.id, "Checked out");
        Ok(cart)
    }

    /// Review a product. Each user may review a product once.
    pub async fn post_review(
        &self,
        slug: &str,
        rating: u8,
        text: Option<&str>,
    ) -> Result<Review, ShopError> {
        if !(1..=5).contains(&rating) {
            return Err(ShopError::InvalidRating(rating));
        }
        let body = json!({ "rating": rating, "review": text });
        let review = self
            .session
            .request_json(RequestSpec::post(format!("/products/{}/reviews/", slug)).json(body))
            .await?;
        Ok(review)
    }

    /// Delete the user's review of a product.
    pub async fn delete_review(&self, slug: &str) -> Result<(), ShopError> {
        self.session
            .request(RequestSpec::delete(format!("/products/{}/reviews/", slug)))
            .await?;
        Ok(())
    }
}
