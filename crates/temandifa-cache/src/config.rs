//! Cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use temandifa_core::OperationKind;

/// Result TTL per operation kind.
///
/// # Example (TOML)
///
/// ```toml
/// [cache.ttl]
/// detect = "1h"
/// vqa = "24h"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlTable {
    #[serde(with = "humantime_serde")]
    pub detect: Duration,
    #[serde(with = "humantime_serde")]
    pub ocr: Duration,
    #[serde(with = "humantime_serde")]
    pub transcribe: Duration,
    #[serde(with = "humantime_serde")]
    pub vqa: Duration,
}

impl Default for CacheTtlTable {
    fn default() -> Self {
        Self {
            detect: Duration::from_secs(60 * 60),
            ocr: Duration::from_secs(2 * 60 * 60),
            transcribe: Duration::from_secs(30 * 60),
            vqa: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CacheTtlTable {
    #[must_use]
    pub fn ttl_for(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Detect => self.detect,
            OperationKind::Ocr => self.ocr,
            OperationKind::Transcribe => self.transcribe,
            OperationKind::Vqa => self.vqa,
        }
    }
}

/// Cache-aside layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Per-operation result TTLs.
    pub ttl: CacheTtlTable,

    /// Upper bound on a single background write.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Keys requested per SCAN page during prefix clears.
    pub scan_page_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: CacheTtlTable::default(),
            write_timeout: Duration::from_secs(5),
            scan_page_size: 100,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        for kind in OperationKind::ALL {
            if self.ttl.ttl_for(kind) < Duration::from_millis(1) {
                return Err(format!("cache.ttl.{kind} must be at least 1ms"));
            }
        }
        if self.write_timeout.is_zero() {
            return Err("cache.write_timeout must be > 0".into());
        }
        if self.scan_page_size == 0 {
            return Err("cache.scan_page_size must be > 0".into());
        }
        Ok(())
    }
}
