use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::test_object::{ResourceUri, TestObject, PROP_PASSWORD, PROP_USERNAME};
use crate::error::IngestResult;
use crate::utils::sanitize_file_name;

/// Base path under which persisted Test Objects are referenced
pub const TESTOBJECTS_URL: &str = "/v2/TestObjects";

/// One file of a client upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// File name as sent by the client (may contain path segments)
    pub name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content_type: Option<&str>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.map(str::to_string),
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Per-file upload summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub name: String,
    pub size: String,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
}

/// Reference to a created object: temporary objects expose their id,
/// persisted ones a path to the public endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedTestObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl SimplifiedTestObject {
    fn from_object(object: &TestObject) -> Self {
        let id = object.id().unwrap_or_default().to_string();
        if object.is_temporary() {
            Self {
                id: Some(id),
                reference: None,
            }
        } else {
            Self {
                id: None,
                reference: Some(format!("{}/{}", TESTOBJECTS_URL, id)),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestObjectCreationResponse {
    pub test_object: SimplifiedTestObject,
    pub files: Vec<UploadMetadata>,
}

impl TestObjectCreationResponse {
    pub fn new(object: &TestObject, uploads: &[UploadFile]) -> Self {
        Self {
            test_object: SimplifiedTestObject::from_object(object),
            files: uploads
                .iter()
                .map(|f| UploadMetadata {
                    name: sanitize_file_name(&f.name),
                    size: f.size().to_string(),
                    file_type: f.content_type.clone(),
                })
                .collect(),
        }
    }

    /// Human readable label derived from the uploaded file names.
    pub fn name_for_upload(&self) -> String {
        match self.files.len() {
            0 => "Empty Upload".to_string(),
            1 => self.files[0].name.clone(),
            2 => format!("{} and {}", self.files[0].name, self.files[1].name),
            n => format!("{} and {} other files", self.files[0].name, n - 1),
        }
    }
}

/// Request for a reusable (persisted) Test Object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateReusableTestObjectRequest {
    pub label: String,
    pub description: String,
    /// Resource name -> URI, e.g. "serviceEndpoint" or "data"
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CreateReusableTestObjectRequest {
    pub fn to_test_object(&self) -> IngestResult<TestObject> {
        let mut object = TestObject::new();
        object.label = self.label.clone();
        object.description = self.description.clone();

        for (name, uri) in &self.resources {
            object.add_resource(name.clone(), ResourceUri::parse(uri)?);
        }

        if !self.resources.is_empty() {
            if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
                object.set_property(PROP_USERNAME, username);
                object.set_property(PROP_PASSWORD, self.password.clone().unwrap_or_default());
            }
        }

        Ok(object)
    }
}
