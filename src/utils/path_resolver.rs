use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{IngestError, IngestResult};

/// Confines caller-influenced paths to a managed root directory.
///
/// Every lookup re-validates the path, including symlinks found along the way,
/// so a resolver can be shared and reused for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct SecurePathResolver {
    root: PathBuf,
}

impl SecurePathResolver {
    /// Create a resolver for `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> IngestResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path below the root.
    ///
    /// Fails with `PathTraversal` for `..` components, absolute paths,
    /// drive prefixes, and symlinks leading outside the root.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> IngestResult<PathBuf> {
        let relative = relative.as_ref();
        let mut joined = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(name) => joined.push(name),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(traversal(relative));
                }
            }
        }

        self.check_within(&joined, relative)?;
        Ok(joined)
    }

    /// Re-validate an absolute path that is expected to live below the root.
    pub fn confine(&self, path: &Path) -> IngestResult<PathBuf> {
        if path.is_relative() {
            return self.resolve(path);
        }
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(traversal(path));
        }
        match path.strip_prefix(&self.root) {
            Ok(rest) => self.resolve(rest),
            Err(_) => {
                // Root may be reachable through an alias (e.g. a symlinked tmp dir)
                self.check_within(path, path)?;
                Ok(path.to_path_buf())
            }
        }
    }

    /// Whether `path` names a location below the root, without failing.
    pub fn contains(&self, path: &Path) -> bool {
        self.confine(path).is_ok()
    }

    /// Canonicalize the deepest existing ancestor of `path` and make sure it
    /// stays below the root.
    fn check_within(&self, path: &Path, original: &Path) -> IngestResult<()> {
        let mut existing = Some(path);
        while let Some(candidate) = existing {
            if fs::symlink_metadata(candidate).is_ok() {
                let canonical = match candidate.canonicalize() {
                    Ok(c) => c,
                    // Dangling symlink: its target cannot be checked
                    Err(_) => return Err(traversal(original)),
                };
                if canonical.starts_with(&self.root) {
                    return Ok(());
                }
                return Err(traversal(original));
            }
            existing = candidate.parent();
        }
        Err(traversal(original))
    }
}

fn traversal(path: &Path) -> IngestError {
    IngestError::PathTraversal {
        path: path.to_string_lossy().to_string(),
    }
}

/// Reduce a client supplied file name to a safe single segment.
///
/// Keeps the last path segment and replaces characters that are illegal on
/// common filesystems with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("");

    let illegal = ['<', '>', ':', '"', '|', '?', '*'];
    let cleaned: String = last
        .chars()
        .map(|c| {
            if illegal.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "unnamed".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = SecurePathResolver::new(temp_dir.path()).unwrap();

        let path = resolver.resolve("set1/roads.gml").unwrap();
        assert!(path.starts_with(resolver.root()));
        assert!(path.ends_with("set1/roads.gml"));

        let same = resolver.resolve("./set1/./roads.gml").unwrap();
        assert_eq!(path, same);
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = SecurePathResolver::new(temp_dir.path()).unwrap();

        for bad in ["../outside", "set1/../../outside", "/etc/passwd"] {
            let err = resolver.resolve(bad).unwrap_err();
            assert_eq!(err.code(), "l.path.traversal", "{}", bad);
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let resolver = SecurePathResolver::new(temp_dir.path()).unwrap();

        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("escape")).unwrap();

        assert!(resolver.resolve("escape").is_err());
        assert!(resolver.resolve("escape/file.xml").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_allows_symlink_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = SecurePathResolver::new(temp_dir.path()).unwrap();
        fs::create_dir(temp_dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("alias"))
            .unwrap();

        assert!(resolver.resolve("alias/data.xml").is_ok());
    }

    #[test]
    fn test_confine_absolute_paths() {
        let temp_dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let resolver = SecurePathResolver::new(temp_dir.path()).unwrap();

        let inside = resolver.root().join("a/b");
        assert_eq!(resolver.confine(&inside).unwrap(), inside);
        assert!(resolver.confine(other.path()).is_err());
        assert!(resolver.confine(&resolver.root().join("a/../../x")).is_err());
        assert!(resolver.contains(&inside));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("roads.gml"), "roads.gml");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\data\\a.xml"), "a.xml");
        assert_eq!(sanitize_file_name("what?.xml"), "what_.xml");
        assert_eq!(sanitize_file_name(".."), "unnamed");
        assert_eq!(sanitize_file_name(""), "unnamed");
    }
}
