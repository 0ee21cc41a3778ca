//! Repository discovery.
//!
//! Walks a directory tree and classifies each candidate path as a standard
//! repository, a packed archive, or a plain directory to recurse into.
//! A source path whose basename contains the `**` marker means "search the
//! parent directory's subtree".

use crate::errors::{EngineError, Result};
use crate::shard::RepositoryKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursive wildcard marker in a source path.
pub const WILDCARD: &str = "**";

/// File extension of packed archives.
pub const ARCHIVE_EXTENSION: &str = "siva";

/// A discovered repository and how to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    pub path: PathBuf,
    pub kind: RepositoryKind,
}

impl RepositoryHandle {
    fn standard(path: PathBuf) -> Self {
        Self {
            path,
            kind: RepositoryKind::Standard,
        }
    }

    fn packed(path: PathBuf) -> Self {
        Self {
            path,
            kind: RepositoryKind::Packed,
        }
    }

    /// The repository ID used as the first column of every row.
    pub fn id(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

// =============================================================================
// Pure Predicates
// =============================================================================

/// A directory holding an object database: a work tree with `.git`, or a bare repository.
pub fn is_repository(path: &Path) -> bool {
    path.join(".git").is_dir() || is_bare_repository(path)
}

fn is_bare_repository(path: &Path) -> bool {
    path.join("objects").is_dir() && path.join("refs").is_dir() && path.join("HEAD").is_file()
}

/// A non-empty regular file with the packed archive extension.
pub fn is_packed_archive(path: &Path) -> bool {
    let has_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
        .unwrap_or(false);
    has_extension
        && std::fs::metadata(path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
}

/// Dot-named directories are never sources unless they are repositories themselves.
fn is_skipped_directory(path: &Path) -> bool {
    let dotted = path
        .file_name()
        .map(|name| name.to_string_lossy().contains('.'))
        .unwrap_or(false);
    dotted && !is_bare_repository(path)
}

fn has_wildcard(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().contains(WILDCARD))
        .unwrap_or(false)
}

// =============================================================================
// Locator
// =============================================================================

/// Finds repositories under a source path.
#[derive(Debug, Clone)]
pub struct Locator {
    path: PathBuf,
    wildcard: bool,
}

impl Locator {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = std::path::absolute(path).map_err(|e| EngineError::io(path, e))?;
        Ok(Self {
            wildcard: has_wildcard(&path),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a fresh, lazy scan.
    ///
    /// Fails up front with `InvalidSource` when a non-wildcard source is
    /// neither a directory nor a packed archive.
    pub fn locate(&self) -> Result<Locate> {
        if self.wildcard {
            let folder = self
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            return Ok(Locate::walk(folder));
        }

        if is_packed_archive(&self.path) {
            return Ok(Locate::single(RepositoryHandle::packed(self.path.clone())));
        }
        if !self.path.is_dir() {
            return Err(EngineError::InvalidSource {
                path: self.path.clone(),
            });
        }
        if is_repository(&self.path) {
            return Ok(Locate::single(RepositoryHandle::standard(self.path.clone())));
        }
        Ok(Locate::walk(self.path.clone()))
    }
}

/// Lazy sequence of discovered repositories.
///
/// A listing error is yielded once and ends the scan.
pub struct Locate {
    state: LocateState,
}

enum LocateState {
    Single(Option<RepositoryHandle>),
    Walk(walkdir::IntoIter),
    Done,
}

impl Locate {
    fn single(handle: RepositoryHandle) -> Self {
        Self {
            state: LocateState::Single(Some(handle)),
        }
    }

    fn walk(root: PathBuf) -> Self {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Self {
            state: LocateState::Walk(walker),
        }
    }
}

impl Iterator for Locate {
    type Item = Result<RepositoryHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        let walker = match &mut self.state {
            LocateState::Single(handle) => return handle.take().map(Ok),
            LocateState::Walk(walker) => walker,
            LocateState::Done => return None,
        };

        loop {
            let entry = match walker.next()? {
                Ok(entry) => entry,
                Err(source) => {
                    let path = source
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                    self.state = LocateState::Done;
                    return Some(Err(EngineError::Listing { path, source }));
                }
            };
            let path = entry.path();

            if !entry.file_type().is_dir() {
                if is_packed_archive(path) {
                    return Some(Ok(RepositoryHandle::packed(path.to_path_buf())));
                }
                continue;
            }

            if is_skipped_directory(path) {
                walker.skip_current_dir();
                continue;
            }

            if is_repository(path) {
                walker.skip_current_dir();
                tracing::debug!(repository = %path.display(), "found repository");
                return Some(Ok(RepositoryHandle::standard(path.to_path_buf())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_work_tree(root: &Path, rel: &str) -> PathBuf {
        let repo = root.join(rel);
        fs::create_dir_all(repo.join(".git")).unwrap();
        repo
    }

    fn make_bare(root: &Path, rel: &str) -> PathBuf {
        let repo = root.join(rel);
        fs::create_dir_all(repo.join("objects")).unwrap();
        fs::create_dir_all(repo.join("refs")).unwrap();
        fs::write(repo.join("HEAD"), "ref: refs/heads/master\n").unwrap();
        repo
    }

    fn found(locator: &Locator) -> Vec<RepositoryHandle> {
        locator
            .locate()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_single_repository_source() {
        let tmp = TempDir::new().unwrap();
        let repo = make_work_tree(tmp.path(), "alpha");

        let handles = found(&Locator::new(&repo).unwrap());
        assert_eq!(handles, vec![RepositoryHandle::standard(repo)]);
    }

    #[test]
    fn test_nested_directories_are_searched() {
        let tmp = TempDir::new().unwrap();
        let a = make_work_tree(tmp.path(), "org1/alpha");
        let b = make_bare(tmp.path(), "org2/team/beta.git");
        fs::create_dir_all(tmp.path().join("empty/deeper")).unwrap();

        let handles = found(&Locator::new(tmp.path()).unwrap());
        assert_eq!(
            handles,
            vec![RepositoryHandle::standard(a), RepositoryHandle::standard(b)]
        );
    }

    #[test]
    fn test_repository_contents_are_not_searched() {
        let tmp = TempDir::new().unwrap();
        let outer = make_work_tree(tmp.path(), "outer");
        make_work_tree(&outer, "vendor/inner");

        let handles = found(&Locator::new(tmp.path()).unwrap());
        assert_eq!(handles, vec![RepositoryHandle::standard(outer)]);
    }

    #[test]
    fn test_dot_directories_are_skipped() {
        let tmp = TempDir::new().unwrap();
        make_work_tree(tmp.path(), ".cache/hidden");
        make_work_tree(tmp.path(), "v1.2/versioned");
        let visible = make_work_tree(tmp.path(), "plain/visible");

        let handles = found(&Locator::new(tmp.path()).unwrap());
        assert_eq!(handles, vec![RepositoryHandle::standard(visible)]);
    }

    #[test]
    fn test_wildcard_searches_parent() {
        let tmp = TempDir::new().unwrap();
        let a = make_work_tree(tmp.path(), "a");
        let archive = tmp.path().join("b.siva");
        fs::write(&archive, b"payload").unwrap();
        fs::write(tmp.path().join("empty.siva"), b"").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let handles = found(&Locator::new(tmp.path().join("**")).unwrap());
        assert_eq!(
            handles,
            vec![RepositoryHandle::standard(a), RepositoryHandle::packed(archive)]
        );
    }

    #[test]
    fn test_packed_archive_source() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("repo.siva");
        fs::write(&archive, b"payload").unwrap();

        let handles = found(&Locator::new(&archive).unwrap());
        assert_eq!(handles, vec![RepositoryHandle::packed(archive)]);
    }

    #[test]
    fn test_plain_file_source_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("README");
        fs::write(&file, b"hello").unwrap();

        let err = Locator::new(&file).unwrap().locate().err().unwrap();
        assert!(matches!(err, EngineError::InvalidSource { .. }));

        let missing = Locator::new(tmp.path().join("missing")).unwrap().locate().err().unwrap();
        assert!(matches!(missing, EngineError::InvalidSource { .. }));
    }

    #[test]
    fn test_scan_is_restartable() {
        let tmp = TempDir::new().unwrap();
        make_work_tree(tmp.path(), "a");
        make_work_tree(tmp.path(), "b");
        let locator = Locator::new(tmp.path()).unwrap();

        assert_eq!(found(&locator), found(&locator));
        assert_eq!(found(&locator).len(), 2);
    }

    #[test]
    fn test_listing_error_ends_the_scan() {
        let tmp = TempDir::new().unwrap();
        let locator = Locator::new(tmp.path().join("missing").join("**")).unwrap();

        let mut scan = locator.locate().unwrap();
        match scan.next() {
            Some(Err(EngineError::Listing { path, .. })) => assert!(path.ends_with("missing")),
            other => panic!("expected a listing error, got {other:?}"),
        }
        assert!(scan.next().is_none());
        assert!(scan.next().is_none());
    }
}
