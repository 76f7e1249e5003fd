//! Domain layer types and invariants.

pub mod error;
pub mod listing;

pub use pictura_api_types::{ImageRecord, ImageUrls, ListingPage, Orientation};
