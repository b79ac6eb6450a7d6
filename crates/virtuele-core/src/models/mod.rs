//! Data models for the storefront catalog.
//!
//! - `Product`, `Category`, `GalleryImage`: catalog entries
//! - `Review`: product reviews
//! - `Cart`, `ProductCart`, `Size`: the signed-in user's carts
//! - `User`, `NewUser`: accounts and sign-up
//!
//! Fields the client does not need are ignored when parsing.

pub mod cart;
pub mod product;
pub mod user;

pub use cart::{Cart, ProductCart, Size};
pub use product::{Category, GalleryImage, Product, Review, ReviewAuthor, ReviewedProduct};
pub use user::{NewUser, User};
