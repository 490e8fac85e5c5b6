mod service;
mod xml;

pub use service::{OwsServiceDetector, PROP_SERVICE_TYPE};
pub use xml::{AtomFeedDetector, GmlFeatureCollectionDetector, XmlDocumentDetector};
