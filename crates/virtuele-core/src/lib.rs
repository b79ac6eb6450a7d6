//! Core library for the Virtuele storefront client.
//!
//! - [`auth`]: token storage and the refresh-aware [`SessionClient`]
//! - [`api`]: the public [`CatalogClient`] and the signed-in [`ShopClient`]
//! - [`cache`]: on-disk catalog cache and the fetch-and-cache [`Storefront`]
//! - [`config`]: persisted settings and client construction

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;

pub use api::{ApiError, CatalogClient, SessionError, ShopClient, ShopError};
pub use auth::{
    AuthScheme, Credentials, FileTokenStore, KeyringTokenStore, MemoryTokenStore, RequestSpec,
    SessionClient, SessionState, StoreError, TokenStore,
};
pub use cache::{CacheManager, Storefront};
pub use config::Config;
