//! REST API clients for the Virtuele catalog service.
//!
//! - `CatalogClient`: public catalog reads, no credentials
//! - `ShopClient`: cart, checkout and review calls made through the
//!   authenticated `SessionClient`
//!
//! The API authenticates with JWT access tokens obtained from the
//! `/jwt/create/` endpoint.

pub mod client;
pub mod error;
pub mod shop;

pub use client::CatalogClient;
pub use error::{ApiError, SessionError};
pub use shop::{ShopClient, ShopError};
