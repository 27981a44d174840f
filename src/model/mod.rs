//! Packaged model artifacts.
//!
//! - [`store`]: model-id to artifact-directory resolution

pub mod store;
