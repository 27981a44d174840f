//! tgi-relay: streaming generate endpoint in front of a local inference server.
//!
//! Launches a text-generation inference server (native subprocess or detached
//! container) against a model resolved from the local store, waits for it to
//! report ready, and relays its OpenAI-compatible chat-completion stream back
//! to callers fragment by fragment.

pub mod backend;
pub mod config;
pub mod metrics;
pub mod model;
pub mod relay;
pub mod server;
