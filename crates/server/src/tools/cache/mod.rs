//! Cache inspection MCP tools.
//!
//! These read the generation store directly and never touch the network.

pub mod get;
pub mod status;

pub use get::{CacheGetParams, get_impl};
pub use status::status_impl;
