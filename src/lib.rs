//! Test Object ingestion and lifecycle
//!
//! Turns uploads, downloadable URLs and service endpoints into managed,
//! content-hashed Test Objects, detects their type, and governs how long
//! they live.

pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod models;
pub mod storage;
pub mod store;
pub mod utils;

pub use config::IngestConfig;
pub use engine::{Export, TestObjectService};
pub use error::{IngestError, IngestResult};
pub use models::TestObject;
