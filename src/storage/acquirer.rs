use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::archive::{extract_zip, is_zip};
use super::content_filter::ContentFilter;
use super::remote::{Credentials, RemoteClient};
use super::tree_hasher::{TreeHasher, TreeStats};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::models::{
    ResourceUri, TestObject, UploadFile, RESOURCE_DATA, RESOURCE_SERVICE_ENDPOINT,
};
use crate::utils::{sanitize_file_name, SecurePathResolver};

/// How the data of an object was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Remote service, hashed from its content
    ServiceEndpoint,
    /// Remote "data" URL downloaded into the managed root
    Download { resource: String, dir: PathBuf },
    /// Existing directory below the managed root
    LocalData { dir: PathBuf },
    /// Client upload stored in the managed root
    Upload { resource: String, dir: PathBuf },
}

/// Obtains the data of a Test Object and stamps its item hash.
///
/// Staged files live in `<upload_dir>/<id>/<resource>/` until they are
/// complete, then move to `<testdata_dir>/<id>/<resource>/`.
pub struct ResourceAcquirer {
    testdata: SecurePathResolver,
    staging: SecurePathResolver,
    remote: RemoteClient,
    base_filter: ContentFilter,
    max_upload_size: u64,
    max_object_size: u64,
    walk_max_depth: usize,
}

impl ResourceAcquirer {
    pub fn new(
        config: &IngestConfig,
        testdata: SecurePathResolver,
        staging: SecurePathResolver,
    ) -> IngestResult<Self> {
        Ok(Self {
            testdata,
            staging,
            remote: RemoteClient::new(config)?,
            base_filter: ContentFilter::xml(),
            max_upload_size: config.max_upload_size,
            max_object_size: config.max_object_size,
            walk_max_depth: config.walk_max_depth,
        })
    }

    pub fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    pub fn testdata(&self) -> &SecurePathResolver {
        &self.testdata
    }

    /// Apply the single matching acquisition strategy to `object`.
    ///
    /// The object must already carry its id.
    pub async fn acquire(
        &self,
        object: &mut TestObject,
        uploads: &[UploadFile],
    ) -> IngestResult<Acquisition> {
        if let Some(endpoint) = object.resource(RESOURCE_SERVICE_ENDPOINT).cloned() {
            self.acquire_service(object, &endpoint).await?;
            return Ok(Acquisition::ServiceEndpoint);
        }

        if !uploads.is_empty() {
            let total: u64 = uploads.iter().map(UploadFile::size).sum();
            if total > self.max_upload_size {
                return Err(IngestError::QuotaExceeded {
                    limit: self.max_upload_size,
                });
            }
        }

        // Validate the regex before anything touches the disk
        let filter = self.base_filter.clone().with_regex(object.regex())?;
        let id = object
            .id()
            .ok_or_else(|| IngestError::Storage("Test object has no id".to_string()))?
            .to_string();

        let (acquisition, stats) = match object.resource(RESOURCE_DATA).cloned() {
            Some(ResourceUri::Remote(url)) => {
                let resource = format!("download.{}", object.resources.len());
                let credentials = Credentials::from_properties(object);
                let stage = self.stage_dir(&id, &resource)?;
                let staged = self
                    .download_to_stage(&url, credentials.as_ref(), &stage, &filter)
                    .await;
                let (dir, stats) = self.settle(staged, &stage, &id, &resource, &filter)?;
                object.add_resource(resource.clone(), ResourceUri::File(dir.clone()));
                (Acquisition::Download { resource, dir }, stats)
            }
            Some(ResourceUri::File(path)) => {
                let dir = self.resolve_local(&path)?;
                let stats = self.validate(&dir, &filter)?;
                object.add_resource(RESOURCE_DATA, ResourceUri::File(dir.clone()));
                (Acquisition::LocalData { dir }, stats)
            }
            None if !uploads.is_empty() => {
                let resource = format!("upload.{}", object.resources.len());
                let stage = self.stage_dir(&id, &resource)?;
                let staged = self.store_uploads(uploads, &stage, &filter);
                let (dir, stats) = self.settle(staged, &stage, &id, &resource, &filter)?;
                object.add_resource(resource.clone(), ResourceUri::File(dir.clone()));
                (Acquisition::Upload { resource, dir }, stats)
            }
            None => return Err(IngestError::ResourceRequired),
        };

        stats.apply_to(object);
        log::debug!("Acquired {:?} for {}", acquisition, id);
        Ok(acquisition)
    }

    /// Remove everything stored below `<testdata_dir>/<id>`.
    ///
    /// Used when an object fails after its data was committed.
    pub fn discard(&self, id: &str) {
        let dir = match self.testdata.resolve(id) {
            Ok(dir) if dir != self.testdata.root() => dir,
            _ => return,
        };
        if !dir.exists() {
            return;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => log::debug!("Discarded test data of {}", id),
            Err(e) => log::warn!("Failed to discard test data of {}: {}", id, e),
        }
    }

    async fn acquire_service(
        &self,
        object: &mut TestObject,
        endpoint: &ResourceUri,
    ) -> IngestResult<()> {
        let url = endpoint.as_url().ok_or_else(|| IngestError::InvalidUrl {
            url: endpoint.to_string(),
            reason: "service endpoint must be an http(s) URL".to_string(),
        })?;
        let credentials = Credentials::from_properties(object);
        let hash = self
            .remote
            .hash_from_content(url, credentials.as_ref())
            .await?;
        object.item_hash = Some(hash);
        Ok(())
    }

    /// Locate caller referenced data below the test data root.
    fn resolve_local(&self, path: &Path) -> IngestResult<PathBuf> {
        let resolved = if path.is_absolute() {
            self.testdata.confine(path)?
        } else {
            self.testdata.resolve(path)?
        };

        let readable = if resolved.is_dir() {
            fs::read_dir(&resolved).is_ok()
        } else {
            File::open(&resolved).is_ok()
        };
        if !readable {
            return Err(IngestError::DataNotReadable {
                path: path.to_string_lossy().to_string(),
            });
        }
        Ok(resolved)
    }

    async fn download_to_stage(
        &self,
        url: &reqwest::Url,
        credentials: Option<&Credentials>,
        stage: &Path,
        filter: &ContentFilter,
    ) -> IngestResult<()> {
        let download = self.remote.download(url, credentials, stage, filter).await?;
        if is_zip(&download.path.to_string_lossy(), download.content_type.as_deref()) {
            self.expand_archive(&download.path, stage, filter)?;
        }
        Ok(())
    }

    fn validate(&self, dir: &Path, filter: &ContentFilter) -> IngestResult<TreeStats> {
        let stats = TreeHasher::new(filter, self.walk_max_depth).hash(dir)?;
        stats.ensure_usable(filter.regex())?;
        Ok(stats)
    }

    /// Validate a filled stage and commit it. Nothing of a failed stage
    /// reaches the test data root.
    fn settle(
        &self,
        staged: IngestResult<()>,
        stage: &Path,
        id: &str,
        resource: &str,
        filter: &ContentFilter,
    ) -> IngestResult<(PathBuf, TreeStats)> {
        let settled = staged.and_then(|()| {
            let stats = self.validate(stage, filter)?;
            let dir = self.commit(stage, id, resource)?;
            Ok((dir, stats))
        });
        if settled.is_err() {
            self.discard_stage(id);
        }
        settled
    }

    fn discard_stage(&self, id: &str) {
        let Ok(dir) = self.staging.resolve(id) else {
            return;
        };
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove staged data of {}: {}", id, e);
            }
        }
    }

    fn stage_dir(&self, id: &str, resource: &str) -> IngestResult<PathBuf> {
        let dir = self.staging.resolve(Path::new(id).join(resource))?;
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn store_uploads(
        &self,
        uploads: &[UploadFile],
        stage: &Path,
        filter: &ContentFilter,
    ) -> IngestResult<()> {
        for upload in uploads {
            let name = sanitize_file_name(&upload.name);
            let content_type = upload.content_type.as_deref();

            if is_zip(&name, content_type) {
                let archive = self.staging.confine(&stage.join(&name))?;
                fs::write(&archive, &upload.data)?;
                self.expand_archive(&archive, stage, filter)?;
                continue;
            }
            if !filter.accepts_transfer(&name, content_type) {
                log::debug!("Skipping upload {:?} ({:?})", name, content_type);
                continue;
            }

            let name = if filter.accepts_extension(&name) {
                name
            } else {
                format!("{}.xml", name)
            };
            let name = unique_name(stage, &name);
            let target = self.staging.confine(&stage.join(&name))?;
            let mut file = File::create(&target)?;
            file.write_all(&upload.data)?;
        }
        Ok(())
    }

    fn expand_archive(&self, archive: &Path, stage: &Path, filter: &ContentFilter) -> IngestResult<()> {
        let count = extract_zip(archive, stage, &self.staging, filter, self.max_object_size)?;
        fs::remove_file(archive)?;
        log::debug!("Expanded {} entries from {:?}", count, archive);
        Ok(())
    }

    /// Move a completed stage directory into the test data root.
    fn commit(&self, stage: &Path, id: &str, resource: &str) -> IngestResult<PathBuf> {
        let stage = self.staging.confine(stage)?;
        let dest = self.testdata.resolve(Path::new(id).join(resource))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }

        if fs::rename(&stage, &dest).is_err() {
            // Staging and test data may live on different filesystems
            if let Err(e) = copy_dir(&stage, &dest) {
                let _ = fs::remove_dir_all(&dest);
                return Err(e);
            }
            fs::remove_dir_all(&stage)?;
        }
        if let Some(parent) = stage.parent().filter(|p| *p != self.staging.root()) {
            // Only succeeds once the last resource of the object is committed
            let _ = fs::remove_dir(parent);
        }
        Ok(dest)
    }
}

/// `name`, or `<stem>_<n>.<ext>` when `dir` already holds a file of that name.
fn unique_name(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        })
        .find(|candidate| !dir.join(candidate).exists())
        .unwrap_or_else(|| name.to_string())
}

fn copy_dir(from: &Path, to: &Path) -> IngestResult<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| IngestError::Storage(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| IngestError::Storage(e.to_string()))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
