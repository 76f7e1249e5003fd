//! Pictura query cache
//!
//! A single key-addressed store holds listing pages, infinite-scroll page
//! sequences, detail records, the recent-uploads overlay and the tag list.
//! Controllers in `application` own every write.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! list_stale_seconds = 300
//! detail_stale_seconds = 1800
//! entry_limit = 256
//! page_size = 24
//! ```

mod config;
mod keys;
mod lock;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheKey, KeyScope, ListingFilter};
pub use store::{CacheSnapshot, CachedValue, FetchTicket, InfinitePages, QueryStore};
