//! Packed archive support.
//!
//! A packed archive holds a complete bare repository in one file. Mounting
//! extracts it into a scratch directory that lives exactly as long as the
//! returned [`MountedArchive`]; the repository is then opened from there like
//! any other bare repository.

mod index;

pub use index::{IndexEntry, FLAG_DELETED};

use crate::errors::{EngineError, Result};
use flate2::CrcReader;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

const REPOSITORY_SKELETON: [&str; 3] = ["objects", "refs/heads", "refs/tags"];

/// An extracted archive. The scratch directory is removed on drop.
#[derive(Debug)]
pub struct MountedArchive {
    archive: PathBuf,
    dir: TempDir,
}

impl MountedArchive {
    /// Archive the mount was created from.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Root of the extracted repository.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// List the live entries of an archive.
pub fn entries(archive: &Path) -> Result<Vec<IndexEntry>> {
    let file = File::open(archive).map_err(|e| EngineError::io(archive, e))?;
    index::read_entries(&mut BufReader::new(file), archive)
}

/// Extract `archive` into a fresh temporary directory under `scratch_dir`
/// (or the system temp directory).
pub fn mount(archive: &Path, scratch_dir: Option<&Path>) -> Result<MountedArchive> {
    let dir = match scratch_dir {
        Some(parent) => TempDir::with_prefix_in("gitengine-", parent),
        None => TempDir::with_prefix("gitengine-"),
    }
    .map_err(|e| EngineError::io(scratch_dir.unwrap_or(Path::new("<tmp>")), e))?;

    let live = entries(archive)?;
    let mut file = File::open(archive).map_err(|e| EngineError::io(archive, e))?;

    for entry in &live {
        let target = dir.path().join(safe_relative(&entry.name).ok_or_else(|| {
            EngineError::ArchiveCorrupt {
                path: archive.to_path_buf(),
                reason: format!("unsafe entry name {:?}", entry.name),
            }
        })?);
        extract_entry(&mut file, archive, entry, &target)?;
    }

    // Archives only carry files; git refuses a repository without these directories.
    for skeleton in REPOSITORY_SKELETON {
        let path = dir.path().join(skeleton);
        std::fs::create_dir_all(&path).map_err(|e| EngineError::io(&path, e))?;
    }

    tracing::debug!(
        archive = %archive.display(),
        mount = %dir.path().display(),
        files = live.len(),
        "mounted packed archive"
    );

    Ok(MountedArchive {
        archive: archive.to_path_buf(),
        dir,
    })
}

/// Entry names must stay inside the mount point.
fn safe_relative(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn extract_entry(file: &mut File, archive: &Path, entry: &IndexEntry, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    file.seek(SeekFrom::Start(entry.start))
        .map_err(|e| EngineError::io(archive, e))?;

    let mut reader = CrcReader::new(Read::by_ref(file).take(entry.size));
    let out = File::create(target).map_err(|e| EngineError::io(target, e))?;
    let mut out = BufWriter::new(out);
    let copied = io::copy(&mut reader, &mut out).map_err(|e| EngineError::io(archive, e))?;
    out.flush().map_err(|e| EngineError::io(target, e))?;

    if copied != entry.size {
        return Err(EngineError::ArchiveCorrupt {
            path: archive.to_path_buf(),
            reason: format!("entry {} is truncated", entry.name),
        });
    }
    if reader.crc().sum() != entry.crc32 {
        return Err(EngineError::ArchiveCorrupt {
            path: archive.to_path_buf(),
            reason: format!("entry {} fails its checksum", entry.name),
        });
    }
    Ok(())
}

/// Write a single-block archive of a repository.
///
/// For a work tree the `.git` directory is packed, so the archive always
/// mounts as a bare repository. Returns the number of files written.
pub fn pack(repository: &Path, archive: &Path) -> Result<usize> {
    let git_dir = repository.join(".git");
    let root = if git_dir.is_dir() { git_dir } else { repository.to_path_buf() };

    let out = File::create(archive).map_err(|e| EngineError::io(archive, e))?;
    let mut out = BufWriter::new(out);
    let mut entries = Vec::new();
    let mut offset = 0u64;

    for item in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
        let item = item.map_err(|source| EngineError::Listing {
            path: root.clone(),
            source,
        })?;
        if !item.file_type().is_file() {
            continue;
        }
        let name = item
            .path()
            .strip_prefix(&root)
            .unwrap_or(item.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let metadata = item.metadata().map_err(|source| EngineError::Listing {
            path: item.path().to_path_buf(),
            source,
        })?;
        let mod_time = metadata
            .modified()
            .ok()
            .and_then(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_nanos_opt())
            .unwrap_or(0);

        let input = File::open(item.path()).map_err(|e| EngineError::io(item.path(), e))?;
        let mut reader = CrcReader::new(BufReader::new(input));
        let size = io::copy(&mut reader, &mut out).map_err(|e| EngineError::io(archive, e))?;

        entries.push(IndexEntry {
            name,
            mode: permission_bits(&metadata),
            mod_time,
            start: offset,
            size,
            crc32: reader.crc().sum(),
            flags: 0,
        });
        offset += size;
    }

    out.write_all(&index::encode_index(&entries, offset))
        .and_then(|_| out.flush())
        .map_err(|e| EngineError::io(archive, e))?;

    tracing::info!(
        repository = %repository.display(),
        archive = %archive.display(),
        files = entries.len(),
        "packed repository"
    );
    Ok(entries.len())
}

#[cfg(unix)]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
