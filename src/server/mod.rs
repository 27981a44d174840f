//! HTTP server exposing the streaming generate endpoint.
//!
//! - [`api`]: Request/response types and route handlers
//! - [`streaming`]: Deadline-bounded body streaming of relayed fragments

pub mod api;
pub mod streaming;
