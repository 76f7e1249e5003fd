//! Cache configuration.
//!
//! Controls freshness windows and capacity of the query store via the
//! `[cache]` section of `pictura.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::listing::DEFAULT_PAGE_SIZE;

const DEFAULT_LIST_STALE_SECS: u64 = 5 * 60;
const DEFAULT_DETAIL_STALE_SECS: u64 = 30 * 60;
const DEFAULT_ENTRY_LIMIT: usize = 256;

/// Cache configuration from `pictura.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which a listing entry is refetched on read.
    pub list_stale_seconds: u64,
    /// Age after which a detail entry is refetched on read.
    pub detail_stale_seconds: u64,
    /// Maximum number of entries kept in the store.
    pub entry_limit: usize,
    /// Page size for listings that do not name one.
    pub page_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            list_stale_seconds: DEFAULT_LIST_STALE_SECS,
            detail_stale_seconds: DEFAULT_DETAIL_STALE_SECS,
            entry_limit: DEFAULT_ENTRY_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            list_stale_seconds: settings.list_stale.as_secs(),
            detail_stale_seconds: settings.detail_stale.as_secs(),
            entry_limit: settings.entry_limit.get(),
            page_size: settings.page_size.get(),
        }
    }
}

impl CacheConfig {
    pub fn list_stale_time(&self) -> Duration {
        Duration::from_secs(self.list_stale_seconds)
    }

    pub fn detail_stale_time(&self) -> Duration {
        Duration::from_secs(self.detail_stale_seconds)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.entry_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
