//! pictura: client-side consistency layer and compression service for a
//! paginated image gallery.
//!
//! The listing cache reconciles server pages with a local overlay of recent
//! uploads, the mutation controller applies optimistic deletes with exact
//! rollback, and the compression pipeline produces WebP/AVIF renditions.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
