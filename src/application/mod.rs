//! Controllers over the query store and the compression pipeline.

pub mod compression;
pub mod error;
pub mod listing;
pub mod lookup;
pub mod mutations;
pub mod overlay;
pub mod pagination;
pub mod repos;
