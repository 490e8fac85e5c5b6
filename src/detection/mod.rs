pub mod builtins;
pub mod core;
pub mod registry;

pub use self::core::{DetectedType, DetectionResource, TypeDetector};
pub use registry::DetectorRegistry;
