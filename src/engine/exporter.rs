use std::io::Write;

use crate::error::{IngestError, IngestResult};
use crate::models::{ResourceUri, TestObject};
use crate::storage::archive::{zip_named, zip_path};
use crate::storage::{ContentFilter, Credentials, RemoteClient};
use crate::utils::SecurePathResolver;

pub const DOWNLOAD_FORBIDDEN_STATUS: u16 = 403;
pub const DOWNLOAD_FORBIDDEN_MESSAGE: &str =
    "Data download forbidden through \"data.downloadable\" property";

const ZIP_CONTENT_TYPE: &str = "application/zip";

/// What was written by [`ResourceExporter::export`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export {
    /// Bytes of the single remote resource were proxied
    Streamed { bytes: u64 },
    /// A zip archive was written
    Archive {
        file_name: String,
        content_type: &'static str,
    },
    /// Nothing was written
    Denied { status: u16, message: &'static str },
}

impl Export {
    pub fn is_denied(&self) -> bool {
        matches!(self, Export::Denied { .. })
    }
}

/// Writes the stored resources of an object back out.
///
/// Remote resources of multi-resource objects are copied below the staging
/// root while the archive is built.
pub struct ResourceExporter {
    testdata: SecurePathResolver,
    staging: SecurePathResolver,
    remote: RemoteClient,
}

impl ResourceExporter {
    pub fn new(
        testdata: SecurePathResolver,
        staging: SecurePathResolver,
        remote: RemoteClient,
    ) -> Self {
        Self {
            testdata,
            staging,
            remote,
        }
    }

    pub async fn export<W: Write + Send>(
        &self,
        object: &TestObject,
        out: &mut W,
    ) -> IngestResult<Export> {
        if !object.is_downloadable() {
            return Ok(Export::Denied {
                status: DOWNLOAD_FORBIDDEN_STATUS,
                message: DOWNLOAD_FORBIDDEN_MESSAGE,
            });
        }

        let id = object.id().unwrap_or_default();
        let credentials = Credentials::from_properties(object);
        let file_name = format!("TestObject.{}.zip", id);

        match object.resources.as_slice() {
            [] => Err(IngestError::ResourceRequired),
            [single] => match &single.uri {
                ResourceUri::Remote(url) => {
                    let bytes = self.remote.stream_to(url, credentials.as_ref(), out).await?;
                    Ok(Export::Streamed { bytes })
                }
                ResourceUri::File(path) => {
                    let path = self.testdata.confine(path)?;
                    zip_path(&path, out)?;
                    log::debug!("Exported {} as {}", id, file_name);
                    Ok(Export::Archive {
                        file_name,
                        content_type: ZIP_CONTENT_TYPE,
                    })
                }
            },
            resources => {
                // Dropping the directory removes the remote copies, whatever happens below
                let copies = tempfile::Builder::new()
                    .prefix("export.")
                    .tempdir_in(self.staging.root())?;
                let filter = ContentFilter::xml();

                let mut entries = Vec::with_capacity(resources.len());
                for resource in resources {
                    let path = match &resource.uri {
                        ResourceUri::File(path) => self.testdata.confine(path)?,
                        ResourceUri::Remote(url) => {
                            let dir = copies.path().join(&resource.name);
                            self.remote
                                .download(url, credentials.as_ref(), &dir, &filter)
                                .await?
                                .path
                        }
                    };
                    entries.push((resource.name.clone(), path));
                }

                zip_named(&entries, out)?;
                log::debug!(
                    "Exported {} resources of {} as {}",
                    entries.len(),
                    id,
                    file_name
                );
                Ok(Export::Archive {
                    file_name,
                    content_type: ZIP_CONTENT_TYPE,
                })
            }
        }
    }
}
