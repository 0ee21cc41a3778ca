//! Shard execution: open, build the reader chain, stream rows out.
//!
//! Every resource a shard acquires (the repository handle, cursors, an
//! archive mount) is owned by stack values of [`execute`], so all of them
//! are released on every exit path, including errors.

use crate::archive::{self, MountedArchive};
use crate::errors::{EngineError, Result};
use crate::observability;
use crate::readers;
use crate::row::Row;
use crate::shard::{self, DataType, RepositoryKind, ShardDescriptor};
use git2::Repository;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Settings the executor takes from the environment rather than the shard.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Parent directory for archive mounts; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

/// Outcome of a completed shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSummary {
    pub repository: String,
    pub data_type: DataType,
    /// Data rows written, not counting the header.
    pub rows: u64,
}

/// A repository handle plus the mount backing it, if any.
///
/// Fields drop in declaration order: the handle closes before its mount
/// directory is removed.
pub struct OpenedRepository {
    repo: Repository,
    _mount: Option<MountedArchive>,
}

impl OpenedRepository {
    pub fn repo(&self) -> &Repository {
        &self.repo
    }
}

/// Open the repository a shard designates, mounting it first when packed.
pub fn open(shard: &ShardDescriptor, config: &ExecutorConfig) -> Result<OpenedRepository> {
    match shard.repo_kind {
        RepositoryKind::Standard => Ok(OpenedRepository {
            repo: open_path(shard.path())?,
            _mount: None,
        }),
        RepositoryKind::Packed => {
            let mount = archive::mount(shard.path(), config.scratch_dir.as_deref())?;
            let repo = open_path(mount.path()).map_err(|e| match e {
                EngineError::OpenRepository { source, .. } => EngineError::OpenRepository {
                    path: mount.archive().to_path_buf(),
                    source,
                },
                other => other,
            })?;
            Ok(OpenedRepository {
                repo,
                _mount: Some(mount),
            })
        }
    }
}

fn open_path(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|source| EngineError::OpenRepository {
        path: path.to_path_buf(),
        source,
    })
}

/// Execute one shard, writing framed rows to `sink`.
///
/// Each row is flushed as soon as it is read, so a slow sink throttles the
/// reader chain directly. Any error aborts the shard and comes back wrapped
/// with the data type and repository.
pub fn execute<W: Write>(shard: &ShardDescriptor, sink: &mut W, config: &ExecutorConfig) -> Result<ShardSummary> {
    let span = tracing::info_span!(
        "shard",
        data_type = %shard.data_type,
        repository = %shard.repo_path
    );
    let _enter = span.enter();
    let _context = observability::enter_shard(shard.data_type, shard.repo_path.clone());

    let rows = run(shard, sink, config).map_err(|e| e.in_shard(shard.data_type, shard.repo_path.clone()))?;

    tracing::info!(rows, "shard complete");
    Ok(ShardSummary {
        repository: shard.repo_path.clone(),
        data_type: shard.data_type,
        rows,
    })
}

/// Decode a wire-format descriptor and execute it.
pub fn execute_encoded<W: Write>(bytes: &[u8], sink: &mut W, config: &ExecutorConfig) -> Result<ShardSummary> {
    let shard = shard::decode(bytes)?;
    execute(&shard, sink, config)
}

fn run<W: Write>(shard: &ShardDescriptor, sink: &mut W, config: &ExecutorConfig) -> Result<u64> {
    let opened = open(shard, config)?;
    let mut reader = readers::build(opened.repo(), &shard.repo_path, shard)?;

    if shard.has_header {
        emit(&Row::header(&reader.read_header()), sink)?;
    }

    let mut rows = 0u64;
    loop {
        match reader.read() {
            Ok(Some(record)) => {
                emit(&record.into_row(), sink)?;
                observability::record_row();
                rows += 1;
            }
            Ok(None) => break,
            // Readers absorb these themselves; tolerate one escaping a stage.
            Err(e) if e.is_skippable() => {
                tracing::debug!(error = %e, "skipping element");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(rows)
}

fn emit<W: Write>(row: &Row, sink: &mut W) -> Result<()> {
    row.write_to(sink)?;
    sink.flush().map_err(|source| EngineError::RowWrite { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{RowStream, Value};
    use crate::shard::StageOptions;
    use crate::testkit::FixtureRepo;
    use pretty_assertions::assert_eq;

    fn collect(bytes: &[u8]) -> Vec<Row> {
        RowStream::new(bytes).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_header_then_rows() {
        let fixture = FixtureRepo::new();
        fixture.commit("HEAD", "first", &[("a", b"a")]);
        let shard = ShardDescriptor::new(
            fixture.path().to_string_lossy(),
            RepositoryKind::Standard,
            DataType::References,
        )
        .with_header(true);

        let mut out = Vec::new();
        let summary = execute(&shard, &mut out, &ExecutorConfig::default()).unwrap();
        assert_eq!(summary.rows, 2);

        let rows = collect(&out);
        assert_eq!(rows.len(), 3);
        let header: Vec<Value> = rows[0].columns().cloned().collect();
        assert_eq!(
            header,
            vec![
                Value::from("repositoryID"),
                Value::from("refHash"),
                Value::from("refName"),
                Value::from("isRemote"),
            ]
        );
    }

    #[test]
    fn test_missing_repository_is_shard_fatal() {
        let shard = ShardDescriptor::new("/nonexistent/repo", RepositoryKind::Standard, DataType::Commits);

        let mut out = Vec::new();
        let err = execute(&shard, &mut out, &ExecutorConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::Shard { .. }));
        assert_eq!(err.code(), crate::errors::ErrorCode::REPO_OPEN);
        assert_eq!(err.exit_code(), 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_blob_aborts_with_context() {
        let fixture = FixtureRepo::new();
        let c1 = fixture.commit("HEAD", "first", &[("a", b"present"), ("b", b"vanishes")]);
        let tree = fixture.repo().find_commit(c1).unwrap().tree().unwrap();
        let gone = tree.get_name("b").unwrap().id();
        fixture.delete_object(gone);

        let shard = ShardDescriptor::new(
            fixture.path().to_string_lossy(),
            RepositoryKind::Standard,
            DataType::Blobs,
        )
        .with_nested(DataType::References, StageOptions::default())
        .with_filter_refs(["HEAD"]);

        let mut out = Vec::new();
        let err = execute(&shard, &mut out, &ExecutorConfig::default()).unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::OBJECT_READ);
        let chain = format!("{err} / {}", err.root());
        assert!(chain.contains("blobs"));
        assert!(chain.contains(&gone.to_string()));

        // rows emitted before the failure stay in the sink
        assert_eq!(collect(&out).len(), 1);
    }

    #[test]
    fn test_undecodable_descriptor_is_process_fatal() {
        let mut out = Vec::new();
        let err = execute_encoded(b"not a shard", &mut out, &ExecutorConfig::default()).unwrap_err();
        assert!(err.is_process_fatal());
    }

    #[test]
    fn test_packed_non_repository_names_the_archive() {
        let scratch = tempfile::TempDir::new().unwrap();
        let contents = scratch.path().join("not-a-repo");
        std::fs::create_dir_all(&contents).unwrap();
        std::fs::write(contents.join("README"), "hello").unwrap();
        let archive_path = scratch.path().join("plain.siva");
        archive::pack(&contents, &archive_path).unwrap();

        let shard = ShardDescriptor::new(
            archive_path.to_string_lossy(),
            RepositoryKind::Packed,
            DataType::Repositories,
        );
        let err = execute(&shard, &mut Vec::new(), &ExecutorConfig::default()).unwrap_err();
        match err.root() {
            EngineError::OpenRepository { path, .. } => assert_eq!(path, &archive_path),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_packed_repository_executes_like_standard() {
        let fixture = FixtureRepo::new();
        fixture.commit("HEAD", "first", &[("a", b"a")]);
        let scratch = tempfile::TempDir::new().unwrap();
        let archive_path = scratch.path().join("repo.siva");
        archive::pack(fixture.path(), &archive_path).unwrap();

        let standard = ShardDescriptor::new(
            fixture.path().to_string_lossy(),
            RepositoryKind::Standard,
            DataType::Commits,
        );
        let packed = ShardDescriptor::new(
            archive_path.to_string_lossy(),
            RepositoryKind::Packed,
            DataType::Commits,
        );
        let config = ExecutorConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
        };

        let (mut a, mut b) = (Vec::new(), Vec::new());
        execute(&standard, &mut a, &config).unwrap();
        execute(&packed, &mut b, &config).unwrap();

        let hashes = |bytes: &[u8]| -> Vec<String> {
            let mut hashes: Vec<String> = collect(bytes).iter().map(|r| r.get(1).unwrap().to_string()).collect();
            hashes.sort();
            hashes
        };
        assert_eq!(hashes(&a).len(), 1);
        assert_eq!(hashes(&a), hashes(&b));

        // the mount is gone once the shard finishes
        let leftovers: Vec<_> = std::fs::read_dir(scratch.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("gitengine-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
