use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use walkdir::WalkDir;

use super::content_filter::ContentFilter;
use crate::error::{IngestError, IngestResult};
use crate::models::{
    TestObject, PROP_EMPTY_FILES, PROP_FILES, PROP_INDEXED, PROP_SIZE, PROP_SIZE_HR,
    PROP_SKIPPED_FILES,
};
use crate::utils::human_readable_size;

/// Result of hashing a file tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStats {
    /// Hex encoded blake3 digest over all qualifying files
    pub hash: String,
    /// Qualifying files, including empty ones
    pub files: u64,
    /// Total size of qualifying files in bytes
    pub size: u64,
    /// Files rejected by the filter
    pub skipped_files: u64,
    /// Qualifying files with a size of zero
    pub empty_files: u64,
}

impl TreeStats {
    /// Reject trees without usable data.
    pub fn ensure_usable(&self, regex: Option<&str>) -> IngestResult<()> {
        if self.files == 0 {
            return Err(IngestError::NoMatchingData {
                regex: regex.map(str::to_string),
            });
        }
        if self.size == 0 {
            return Err(IngestError::EmptyData { files: self.files });
        }
        Ok(())
    }

    /// Stamp hash and statistics into the object.
    pub fn apply_to(&self, object: &mut TestObject) {
        object.item_hash = Some(self.hash.clone());
        object.set_property(PROP_INDEXED, "false");
        object.set_property(PROP_FILES, self.files.to_string());
        object.set_property(PROP_SIZE, self.size.to_string());
        object.set_property(PROP_SIZE_HR, human_readable_size(self.size));
        if self.skipped_files > 0 {
            object.set_property(PROP_SKIPPED_FILES, self.skipped_files.to_string());
        }
        if self.empty_files > 0 {
            object.set_property(PROP_EMPTY_FILES, self.empty_files.to_string());
        }
    }
}

/// Walks a directory and folds qualifying files into one fingerprint.
///
/// Entries are visited in file name order and each file's relative path is
/// mixed into the digest, so the same tree always yields the same hash.
pub struct TreeHasher<'a> {
    filter: &'a ContentFilter,
    max_depth: usize,
}

impl<'a> TreeHasher<'a> {
    pub fn new(filter: &'a ContentFilter, max_depth: usize) -> Self {
        Self { filter, max_depth }
    }

    pub fn hash(&self, root: &Path) -> IngestResult<TreeStats> {
        let mut hasher = blake3::Hasher::new();
        let mut stats = TreeStats {
            hash: String::new(),
            files: 0,
            size: 0,
            skipped_files: 0,
            empty_files: 0,
        };

        let walker = WalkDir::new(root)
            .max_depth(self.max_depth)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Symlink loops and vanished entries do not abort the walk
                    log::warn!("Skipping unreadable entry below {:?}: {}", root, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if !self.filter.accepts_file(&file_name) {
                log::debug!("Skipping non qualifying file: {:?}", entry.path());
                stats.skipped_files += 1;
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .ok()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new(entry.file_name()));
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update(&[0]);

            let len = fold_file(&mut hasher, entry.path())?;
            stats.files += 1;
            stats.size += len;
            if len == 0 {
                stats.empty_files += 1;
            }
        }

        stats.hash = hasher.finalize().to_hex().to_string();
        log::debug!(
            "Hashed {:?}: {} files, {} bytes, {} skipped",
            root,
            stats.files,
            stats.size,
            stats.skipped_files
        );
        Ok(stats)
    }
}

fn fold_file(hasher: &mut blake3::Hasher, path: &Path) -> io::Result<u64> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }
    Ok(total)
}
