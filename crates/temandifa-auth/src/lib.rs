//! # temandifa-auth
//!
//! Session credential lifecycle for the Temandifa gateway.
//!
//! ## Modules
//!
//! - [`service`] - issue, rotate, validate and revoke tokens
//! - [`jwt`] - access token signing (HS256, RS256)
//! - [`storage`] - refresh token records on the shared store
//! - [`blacklist`] - logged-out access tokens
//! - [`types`] - refresh token records, token pairs, sessions
//! - [`config`] - lifetimes, signing keys and revocation policy

pub mod blacklist;
pub mod config;
pub mod error;
pub mod jwt;
pub mod service;
pub mod storage;
pub mod types;

pub use blacklist::TokenBlacklist;
pub use config::{RevocationCheckPolicy, TokenConfig};
pub use error::{AuthError, AuthResult, ErrorCategory};
pub use jwt::{AccessTokenClaims, JwtError, JwtService, SigningAlgorithm, SigningKeyPair};
pub use service::TokenService;
pub use storage::{RefreshTokenStorage, StoreRefreshTokenStorage};
pub use types::{DeviceMeta, RefreshToken, SessionInfo, TokenPair};
