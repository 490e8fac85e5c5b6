use super::core::{DetectedType, DetectionResource, TypeDetector};
use crate::error::{IngestError, IngestResult};
use crate::models::TestObjectType;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Registry of Test Object Type detectors.
///
/// Detectors are registered at initialization and can be looked up by type id.
pub struct DetectorRegistry {
    detectors: HashMap<String, Arc<dyn TypeDetector>>,
}

impl DetectorRegistry {
    /// Create a new registry with all built-in detectors registered.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry
    }

    /// Registry without any detector.
    pub fn empty() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    /// Register a detector; an existing one with the same type id is replaced.
    pub fn register(&mut self, detector: Arc<dyn TypeDetector>) {
        self.detectors
            .insert(detector.type_id().to_string(), detector);
    }

    pub fn get(&self, type_id: &str) -> Option<Arc<dyn TypeDetector>> {
        self.detectors.get(type_id).cloned()
    }

    fn register_builtins(&mut self) {
        use super::builtins::*;

        self.register(Arc::new(XmlDocumentDetector));
        self.register(Arc::new(GmlFeatureCollectionDetector));
        self.register(Arc::new(AtomFeedDetector));
        self.register(Arc::new(OwsServiceDetector));
    }

    /// Type description including its ancestor chain, nearest first.
    pub fn type_of(&self, type_id: &str) -> Option<TestObjectType> {
        let detector = self.detectors.get(type_id)?;
        let mut ancestors = Vec::new();
        let mut next = detector.parent().map(str::to_string);
        while let Some(parent) = next {
            if parent == type_id || ancestors.contains(&parent) {
                log::warn!("Cyclic parent chain for type {}", type_id);
                break;
            }
            next = self
                .detectors
                .get(&parent)
                .and_then(|d| d.parent())
                .map(str::to_string);
            ancestors.push(parent);
        }

        Some(TestObjectType {
            id: type_id.to_string(),
            label: detector.label().to_string(),
            ancestors,
        })
    }

    /// Detect the type of `resource`.
    ///
    /// Matching detectors are tried by descending priority. When
    /// `acceptable` is non-empty, the first match compatible with it wins;
    /// a match that fits none of them is reported as incompatible.
    pub fn detect(
        &self,
        resource: &DetectionResource,
        acceptable: Option<&BTreeSet<String>>,
    ) -> IngestResult<DetectedType> {
        let mut matches: Vec<&Arc<dyn TypeDetector>> = self
            .detectors
            .values()
            .filter(|d| d.matches(resource))
            .collect();
        matches.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.type_id().cmp(b.type_id()))
        });

        let best = matches.first().ok_or_else(|| IngestError::TypeNotDetected {
            resource: resource.uri.to_string(),
        })?;

        let acceptable = acceptable.filter(|set| !set.is_empty());
        for detector in &matches {
            let Some(test_object_type) = self.type_of(detector.type_id()) else {
                continue;
            };
            let compatible = acceptable
                .map(|set| test_object_type.is_compatible_with(set.iter()))
                .unwrap_or(true);
            if compatible {
                log::debug!("Detected type {} for {}", test_object_type.id, resource.name);
                return Ok(DetectedType::new(test_object_type, Arc::clone(detector)));
            }
        }

        Err(IngestError::IncompatibleType {
            detected: best.type_id().to_string(),
            expected: acceptable
                .map(|set| set.iter().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default(),
        })
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
