use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::IngestError;

pub const PROP_TEMPORARY: &str = "temporary";
pub const PROP_REGEX: &str = "regex";
pub const PROP_INDEXED: &str = "indexed";
pub const PROP_FILES: &str = "files";
pub const PROP_SIZE: &str = "size";
pub const PROP_SIZE_HR: &str = "sizeHR";
pub const PROP_SKIPPED_FILES: &str = "skippedFiles";
pub const PROP_EMPTY_FILES: &str = "emptyFiles";
pub const PROP_DOWNLOADABLE: &str = "data.downloadable";
pub const PROP_USERNAME: &str = "username";
pub const PROP_PASSWORD: &str = "password";

/// Prefix of generated object ids
pub const ID_PREFIX: &str = "EID";

/// Whether `name` has the shape of a generated object id.
pub fn is_object_id(name: &str) -> bool {
    name.len() > ID_PREFIX.len() && name.starts_with(ID_PREFIX)
}

/// Well-known resource names
pub const RESOURCE_SERVICE_ENDPOINT: &str = "serviceEndpoint";
pub const RESOURCE_DATA: &str = "data";

/// Location of a resource: a local path or a remote http(s) URL.
///
/// Serialized as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceUri {
    File(PathBuf),
    Remote(Url),
}

impl ResourceUri {
    /// Parse a caller-supplied URI.
    ///
    /// `http(s)` URLs are remote, `file:` URIs and bare paths are local.
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        let invalid = |reason: String| IngestError::InvalidUrl {
            url: trimmed.to_string(),
            reason,
        };

        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
            return Ok(ResourceUri::Remote(url));
        }
        if lower.starts_with("file:") {
            let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
            let path = url
                .to_file_path()
                .map_err(|_| invalid("not a file path".to_string()))?;
            return Ok(ResourceUri::File(path));
        }
        if trimmed.contains("://") {
            return Err(invalid("unsupported scheme".to_string()));
        }
        if trimmed.is_empty() {
            return Err(invalid("empty".to_string()));
        }
        Ok(ResourceUri::File(PathBuf::from(trimmed)))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ResourceUri::File(_))
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ResourceUri::File(p) => Some(p),
            ResourceUri::Remote(_) => None,
        }
    }

    pub fn as_url(&self) -> Option<&Url> {
        match self {
            ResourceUri::Remote(u) => Some(u),
            ResourceUri::File(_) => None,
        }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceUri::File(p) => write!(f, "{}", p.to_string_lossy()),
            ResourceUri::Remote(u) => write!(f, "{}", u),
        }
    }
}

impl TryFrom<String> for ResourceUri {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResourceUri::parse(&value)
    }
}

impl From<ResourceUri> for String {
    fn from(value: ResourceUri) -> Self {
        value.to_string()
    }
}

/// Named resource of a Test Object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub uri: ResourceUri,
}

/// Test input data or a service endpoint under validation.
///
/// The id is assigned exactly once, either by the caller (template reuse)
/// or when assembly starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestObject {
    id: Option<String>,
    pub label: String,
    pub description: String,
    pub author: Option<String>,
    pub last_editor: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub last_update_date: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub item_hash: Option<String>,
    pub local_path: Option<String>,
    /// Insertion ordered; the first entry is the primary resource
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub test_object_types: BTreeSet<String>,
    pub remote_resource: Option<ResourceUri>,
}

impl TestObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object that already carries an id (template reuse path).
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Assign a fresh id unless one is already present.
    pub(crate) fn assign_fresh_id(&mut self) -> &str {
        self.id
            .get_or_insert_with(|| format!("{}{}", ID_PREFIX, uuid::Uuid::new_v4()))
            .as_str()
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceUri> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.uri)
    }

    /// Add a resource; an existing resource with the same name is replaced in place.
    pub fn add_resource(&mut self, name: impl Into<String>, uri: ResourceUri) {
        let name = name.into();
        match self.resources.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.uri = uri,
            None => self.resources.push(Resource { name, uri }),
        }
    }

    pub fn primary_resource(&self) -> Option<&Resource> {
        self.resources.first()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<String>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn is_temporary(&self) -> bool {
        self.property(PROP_TEMPORARY) == Some("true")
    }

    pub fn is_downloadable(&self) -> bool {
        self.property(PROP_DOWNLOADABLE) == Some("true")
    }

    /// Regex filter supplied with the object, if any.
    pub fn regex(&self) -> Option<&str> {
        self.property(PROP_REGEX).filter(|r| !r.is_empty())
    }
}
