use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::{ZipArchive, ZipWriter};

use super::content_filter::ContentFilter;
use crate::error::{IngestError, IngestResult};
use crate::utils::SecurePathResolver;

/// Whether a transferred file is a zip archive.
pub fn is_zip(file_name: &str, content_type: Option<&str>) -> bool {
    let by_name = Path::new(file_name)
        .extension()
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);
    let by_type = content_type
        .map(|ct| {
            let ct = ct.split(';').next().unwrap_or("").trim();
            ct.eq_ignore_ascii_case("application/zip")
                || ct.eq_ignore_ascii_case("application/x-zip-compressed")
        })
        .unwrap_or(false);
    by_name || by_type
}

/// Zip one file or directory into `out`.
///
/// A file becomes a single entry named after it, a directory contributes its
/// files relative to itself.
pub fn zip_path<W: Write>(path: &Path, out: &mut W) -> IngestResult<()> {
    zip_entries(&[(None, path.to_path_buf())], out)
}

/// Zip several files or directories into `out`, each under its own prefix.
pub fn zip_named<W: Write>(entries: &[(String, PathBuf)], out: &mut W) -> IngestResult<()> {
    let prefixed: Vec<(Option<String>, PathBuf)> = entries
        .iter()
        .map(|(name, path)| (Some(name.clone()), path.clone()))
        .collect();
    zip_entries(&prefixed, out)
}

fn zip_entries<W: Write>(entries: &[(Option<String>, PathBuf)], out: &mut W) -> IngestResult<()> {
    // ZipWriter needs Seek, the output (e.g. a response body) usually has none
    let spool = tempfile::tempfile()?;
    let mut zip = ZipWriter::new(spool);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (prefix, root) in entries {
        if root.is_file() {
            let file_name = root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "resource".to_string());
            let entry_name = match prefix {
                Some(p) => format!("{}/{}", p, file_name),
                None => file_name,
            };
            zip.start_file(entry_name, options)?;
            let mut file = File::open(root)?;
            io::copy(&mut file, &mut zip)?;
            continue;
        }

        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| IngestError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| IngestError::Storage(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            let entry_name = match prefix {
                Some(p) => format!("{}/{}", p, relative),
                None => relative,
            };
            zip.start_file(entry_name, options)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut zip)?;
        }
    }

    let mut spool = zip.finish()?;
    spool.seek(SeekFrom::Start(0))?;
    io::copy(&mut spool, out)?;
    out.flush()?;
    Ok(())
}

/// Extract the qualifying entries of `archive` below `dest`.
///
/// Entry names are confined by `resolver`; entries that would escape are
/// rejected. The total uncompressed size is bounded by `max_size`.
/// Returns the number of extracted files.
pub fn extract_zip(
    archive: &Path,
    dest: &Path,
    resolver: &SecurePathResolver,
    filter: &ContentFilter,
    max_size: u64,
) -> IngestResult<u64> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;
    let mut extracted = 0u64;
    let mut total = 0u64;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = match entry.enclosed_name() {
            Some(name) => name.to_path_buf(),
            None => {
                return Err(IngestError::PathTraversal {
                    path: entry.name().to_string(),
                })
            }
        };
        let file_name = name
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !filter.accepts_transfer(&file_name, None) {
            log::debug!("Skipping archive entry {:?}", name);
            continue;
        }

        let target = resolver.confine(&dest.join(&name))?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        let remaining = max_size.saturating_sub(total);
        let written = io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)?;
        total += written;
        if total > max_size {
            drop(out);
            let _ = fs::remove_file(&target);
            return Err(IngestError::QuotaExceeded { limit: max_size });
        }
        extracted += 1;
    }

    Ok(extracted)
}
