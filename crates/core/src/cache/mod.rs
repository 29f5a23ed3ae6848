//! SQLite-backed cache generations for intercepted responses.
//!
//! This module provides a persistent, generation-scoped response cache using
//! SQLite with async access via tokio-rusqlite. It supports:
//!
//! - Named generations, one per deployment
//! - Request-keyed entries addressed by SHA-256 of method and URL
//! - Atomic bulk population for install
//! - Automatic schema migrations and WAL mode

pub mod connection;
pub mod generations;
pub mod hash;
pub mod migrations;
pub mod response;

pub use crate::Error;

pub use connection::CacheStore;
pub use generations::{Generation, GenerationId, GenerationSummary};
pub use response::StoredResponse;
