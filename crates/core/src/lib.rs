//! Core types and shared functionality for offcache.
//!
//! This crate provides:
//! - Generation-scoped response cache with SQLite backend
//! - Request identity and stored response types
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod request;

pub use cache::{CacheStore, Generation, GenerationId, GenerationSummary, StoredResponse};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use request::RequestIdentity;
