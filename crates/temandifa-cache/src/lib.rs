//! # temandifa-cache
//!
//! Cache-aside layer for expensive downstream results.
//!
//! - [`fingerprint`] - deterministic content-derived keys
//! - [`aside`] - lookup, asynchronous population, prefix eviction, drain
//! - [`config`] - per-operation TTLs and write bounds

pub mod aside;
pub mod config;
pub mod error;
pub mod fingerprint;

pub use aside::{CacheAside, CacheStats};
pub use config::{CacheConfig, CacheTtlTable};
pub use error::{CacheError, CacheResult};
pub use fingerprint::{FINGERPRINT_BYTES, fingerprint};
