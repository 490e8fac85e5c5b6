use regex::Regex;
use std::path::Path;

use crate::error::{IngestError, IngestResult};

/// Content types recognized as XML based test data
pub const XML_CONTENT_TYPES: &[&str] = &[
    "application/xml",
    "text/xml",
    "application/gml+xml",
    "application/atom+xml",
];

/// File extensions recognized as XML based test data
pub const XML_EXTENSIONS: &[&str] = &["xml", "gml"];

/// Decides which files of a tree qualify as test data.
///
/// A file qualifies if its extension is allowed and, when a regex is set,
/// its file name matches the regex in full.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    content_types: Vec<String>,
    extensions: Vec<String>,
    regex: Option<(String, Regex)>,
}

impl ContentFilter {
    pub fn new<S: AsRef<str>>(content_types: &[S], extensions: &[S]) -> Self {
        Self {
            content_types: content_types
                .iter()
                .map(|c| c.as_ref().to_ascii_lowercase())
                .collect(),
            extensions: extensions
                .iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            regex: None,
        }
    }

    /// Filter for XML, GML and Atom documents.
    pub fn xml() -> Self {
        Self::new(XML_CONTENT_TYPES, XML_EXTENSIONS)
    }

    /// Combine with a caller supplied regex; empty patterns are ignored.
    pub fn with_regex(mut self, pattern: Option<&str>) -> IngestResult<Self> {
        self.regex = match pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => {
                let compiled =
                    Regex::new(&format!("^(?:{})$", p)).map_err(|e| IngestError::InvalidRegex {
                        regex: p.to_string(),
                        reason: e.to_string(),
                    })?;
                Some((p.to_string(), compiled))
            }
            None => None,
        };
        Ok(self)
    }

    pub fn regex(&self) -> Option<&str> {
        self.regex.as_ref().map(|(p, _)| p.as_str())
    }

    pub fn accepts_extension(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }

    /// Parameters such as `; charset=UTF-8` are ignored.
    pub fn accepts_content_type(&self, content_type: Option<&str>) -> bool {
        content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| {
                let ct = ct.trim().to_ascii_lowercase();
                self.content_types.iter().any(|allowed| *allowed == ct)
            })
            .unwrap_or(false)
    }

    fn matches_regex(&self, file_name: &str) -> bool {
        match &self.regex {
            Some((_, regex)) => regex.is_match(file_name),
            None => true,
        }
    }

    /// Whether a file found on disk qualifies.
    pub fn accepts_file(&self, file_name: &str) -> bool {
        self.accepts_extension(file_name) && self.matches_regex(file_name)
    }

    /// Whether an uploaded or downloaded file should be stored.
    ///
    /// The declared content type may stand in for a missing extension.
    pub fn accepts_transfer(&self, file_name: &str, content_type: Option<&str>) -> bool {
        (self.accepts_extension(file_name) || self.accepts_content_type(content_type))
            && self.matches_regex(file_name)
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::xml()
    }
}
