//! Shared pieces of the HTTP API.
//!
//! Holds the response envelope and the mapping from service errors to HTTP
//! responses used by every handler.

pub mod common;
