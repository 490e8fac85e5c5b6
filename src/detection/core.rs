use reqwest::Url;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

use crate::models::{ResourceUri, TestObject, TestObjectType};
use crate::storage::ContentFilter;

/// Bytes read from the first qualifying file for content checks
const HEAD_SIZE: u64 = 8 * 1024;

/// What a detector gets to look at.
#[derive(Debug, Clone)]
pub struct DetectionResource {
    pub name: String,
    pub uri: ResourceUri,
    /// Leading bytes of the first qualifying local file, if any
    head: Option<String>,
}

impl DetectionResource {
    pub fn new(name: impl Into<String>, uri: ResourceUri) -> Self {
        Self {
            name: name.into(),
            uri,
            head: None,
        }
    }

    pub fn with_head(mut self, head: impl Into<String>) -> Self {
        self.head = Some(head.into());
        self
    }

    /// Build the detection input for the primary resource of `object`.
    ///
    /// Content is sampled from the primary resource when it is local,
    /// otherwise from the first local resource (e.g. a download of it).
    pub fn primary_of(object: &TestObject, max_depth: usize) -> Option<Self> {
        let primary = object.primary_resource()?;
        let mut resource = Self::new(primary.name.clone(), primary.uri.clone());

        let local = std::iter::once(&primary.uri)
            .chain(object.resources.iter().map(|r| &r.uri))
            .find_map(ResourceUri::as_path);
        if let Some(head) = local.and_then(|path| sample_head(path, max_depth)) {
            resource.head = Some(head);
        }
        Some(resource)
    }

    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }

    pub fn url(&self) -> Option<&Url> {
        self.uri.as_url()
    }
}

/// Read the start of the first qualifying file below `path`.
fn sample_head(path: &Path, max_depth: usize) -> Option<String> {
    let filter = ContentFilter::xml();
    let first = WalkDir::new(path)
        .max_depth(max_depth)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| {
            e.file_type().is_file() && filter.accepts_file(&e.file_name().to_string_lossy())
        })?;

    let mut buffer = Vec::new();
    File::open(first.path())
        .ok()?
        .take(HEAD_SIZE)
        .read_to_end(&mut buffer)
        .ok()?;
    Some(String::from_utf8_lossy(&buffer).into_owned())
}

/// Recognizes one Test Object Type.
///
/// Use the `#[detector]` macro to avoid boilerplate code.
pub trait TypeDetector: Send + Sync {
    /// Unique type id (e.g. "gml-feature-collection")
    fn type_id(&self) -> &str;

    fn label(&self) -> &str;

    /// More general type this one specializes
    fn parent(&self) -> Option<&str>;

    /// Higher values are tried first
    fn priority(&self) -> u32;

    fn matches(&self, resource: &DetectionResource) -> bool;

    /// Adjust object metadata after a successful detection.
    fn normalize(&self, _object: &mut TestObject) {}
}

/// Outcome of a successful detection
#[derive(Clone)]
pub struct DetectedType {
    pub test_object_type: TestObjectType,
    detector: Arc<dyn TypeDetector>,
}

impl DetectedType {
    pub(crate) fn new(test_object_type: TestObjectType, detector: Arc<dyn TypeDetector>) -> Self {
        Self {
            test_object_type,
            detector,
        }
    }

    pub fn type_id(&self) -> &str {
        &self.test_object_type.id
    }

    /// Record the type on the object and let the detector normalize it.
    pub fn enrich_and_normalize(&self, object: &mut TestObject) {
        object
            .test_object_types
            .insert(self.test_object_type.id.clone());
        self.detector.normalize(object);
    }
}

impl std::fmt::Debug for DetectedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectedType")
            .field("test_object_type", &self.test_object_type)
            .finish()
    }
}
