//! Error types for Test Object ingestion
//!
//! Every client-facing variant carries a stable localization key (`code`) and an
//! HTTP-style status class (`status`). Nothing here is retried internally.

use thiserror::Error;

/// Errors that can occur while ingesting, resolving or exporting Test Objects
#[derive(Debug, Error)]
pub enum IngestError {
    /// Caller-influenced path tried to leave the managed root
    #[error("Path escapes the managed root: {path}")]
    PathTraversal { path: String },

    /// Upload or download exceeded the configured size limit
    #[error("Maximum size of {limit} bytes exceeded")]
    QuotaExceeded { limit: u64 },

    /// No file qualified for hashing
    #[error("{}", no_matching_message(.regex))]
    NoMatchingData { regex: Option<String> },

    /// Qualifying files exist but their total size is zero
    #[error("{}", empty_data_message(.files))]
    EmptyData { files: u64 },

    /// Service endpoint resolves into a private network range
    #[error("Access to private network addresses is not allowed: {host}")]
    RemoteAccessDenied { host: String },

    /// Remote resource answered 401/403
    #[error("The remote resource on '{host}' requires authentication")]
    RemoteAuthRequired { host: String },

    #[error("The remote resource returned a client error (HTTP {status})")]
    RemoteClientError { status: u16 },

    #[error("The remote resource returned a server error (HTTP {status})")]
    RemoteServerError { status: u16 },

    #[error("Unknown host: {host}")]
    UnknownHost { host: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Neither a data/service resource nor uploaded files were provided
    #[error("A test object requires a 'data' or 'serviceEndpoint' resource, or uploaded files")]
    ResourceRequired,

    #[error("Invalid regular expression '{regex}': {reason}")]
    InvalidRegex { regex: String, reason: String },

    #[error("Test data directory is missing or not readable: {path}")]
    DataNotReadable { path: String },

    #[error("The type of the test object could not be detected ({resource})")]
    TypeNotDetected { resource: String },

    #[error("Detected type '{detected}' is not compatible with the expected types [{expected}]")]
    IncompatibleType { detected: String, expected: String },

    #[error("Object with id '{id}' not found")]
    NotFound { id: String },

    /// Transient objects are only reachable when starting a test run
    #[error("Temporary test object '{id}' cannot be accessed")]
    TemporaryObjectAccessDenied { id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn no_matching_message(regex: &Option<String>) -> String {
    match regex {
        Some(r) => format!("The regular expression '{}' did not select any files", r),
        None => "No XML or GML files found in the test data".to_string(),
    }
}

fn empty_data_message(files: &u64) -> String {
    if *files == 1 {
        "The test data consist of one file with a size of zero bytes".to_string()
    } else {
        format!(
            "The test data consist of {} files, all with a size of zero bytes",
            files
        )
    }
}

impl IngestError {
    /// Stable localization key.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::PathTraversal { .. } => "l.path.traversal",
            IngestError::QuotaExceeded { .. } => "l.max.upload.size.exceeded",
            IngestError::NoMatchingData { regex: Some(_) } => "l.testObject.regex.null.selection",
            IngestError::NoMatchingData { regex: None } => "l.testObject.testdir.no.xml.gml.found",
            IngestError::EmptyData { files: 1 } => "l.testObject.one.file.with.zero.size",
            IngestError::EmptyData { .. } => "l.testObject.multiple.files.with.zero.size",
            IngestError::RemoteAccessDenied { .. } => "l.rejected.private.subnet.access",
            IngestError::RemoteAuthRequired { .. } => "l.url.secured",
            IngestError::RemoteClientError { .. } => "l.url.client.error",
            IngestError::RemoteServerError { .. } => "l.url.server.error",
            IngestError::UnknownHost { .. } => "l.unknown.host",
            IngestError::InvalidUrl { .. } => "l.invalid.url",
            IngestError::ResourceRequired => "l.testobject.required",
            IngestError::InvalidRegex { .. } => "l.invalid.regex",
            IngestError::DataNotReadable { .. } => "l.testobject.data.not.readable",
            IngestError::TypeNotDetected { .. } => "l.testobject.type.not.detected",
            IngestError::IncompatibleType { .. } => "l.testobject.type.incompatible",
            IngestError::NotFound { .. } => "l.object.not.found",
            IngestError::TemporaryObjectAccessDenied { .. } => "l.temporary.testobject.access",
            IngestError::Storage(_) | IngestError::Io(_) => "l.internal.error",
        }
    }

    /// HTTP-style status class.
    pub fn status(&self) -> u16 {
        match self {
            IngestError::QuotaExceeded { .. } => 413,
            IngestError::RemoteAccessDenied { .. } => 403,
            IngestError::RemoteServerError { .. } => 502,
            IngestError::NotFound { .. } | IngestError::TemporaryObjectAccessDenied { .. } => 404,
            IngestError::Storage(_) | IngestError::Io(_) => 500,
            _ => 400,
        }
    }

    /// Arguments substituted into the localized message.
    pub fn args(&self) -> Vec<String> {
        match self {
            IngestError::PathTraversal { path } => vec![path.clone()],
            IngestError::QuotaExceeded { limit } => vec![limit.to_string()],
            IngestError::NoMatchingData { regex } => regex.iter().cloned().collect(),
            IngestError::EmptyData { files } => vec![files.to_string()],
            IngestError::RemoteAccessDenied { host }
            | IngestError::RemoteAuthRequired { host }
            | IngestError::UnknownHost { host } => vec![host.clone()],
            IngestError::RemoteClientError { status } | IngestError::RemoteServerError { status } => {
                vec![status.to_string()]
            }
            IngestError::InvalidUrl { url, .. } => vec![url.clone()],
            IngestError::InvalidRegex { regex, .. } => vec![regex.clone()],
            IngestError::DataNotReadable { path } => vec![path.clone()],
            IngestError::TypeNotDetected { resource } => vec![resource.clone()],
            IngestError::IncompatibleType { detected, expected } => {
                vec![detected.clone(), expected.clone()]
            }
            IngestError::NotFound { id } | IngestError::TemporaryObjectAccessDenied { id } => {
                vec![id.clone()]
            }
            IngestError::ResourceRequired | IngestError::Storage(_) | IngestError::Io(_) => {
                Vec::new()
            }
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        IngestError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::Storage(e.to_string())
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => IngestError::Io(io),
            other => IngestError::Storage(format!("Zip error: {}", other)),
        }
    }
}

/// Result type used across the crate
pub type IngestResult<T> = Result<T, IngestError>;
