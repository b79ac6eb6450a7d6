//! Authentication module for managing tokens and authenticated sessions.
//!
//! This module provides:
//! - `TokenStore`: the access/refresh token holder, with memory, file and
//!   OS keychain backends
//! - `SessionClient`: credential-injecting HTTP client that refreshes the
//!   access token once on a 401 and logs out when the refresh fails

pub mod credentials;
pub mod session;
pub mod store;

pub use credentials::KeyringTokenStore;
pub use session::{AuthScheme, RequestSpec, SessionClient, SessionState};
pub use store::{Credentials, FileTokenStore, MemoryTokenStore, StoreError, TokenStore};
