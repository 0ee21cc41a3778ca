//! Query builder and shard generation.
//!
//! A [`GitSource`] names a source path and a chain of stages in dependency
//! order. The last stage is the data type each shard extracts; the earlier
//! ones become its nested, visible upstream stages.
//!
//! ```rust,ignore
//! use gitengine::source::GitSource;
//! use gitengine::shard::StageOptions;
//!
//! let shards = GitSource::repositories("/data/repos/**", 4)
//!     .references(StageOptions::default())
//!     .commits(StageOptions::default())
//!     .filter_refs(["HEAD"])
//!     .partition()?;
//! ```

use crate::errors::{EngineError, Result};
use crate::locator::{Locate, Locator};
use crate::partition::partition;
use crate::shard::{self, DataType, ShardDescriptor, StageOptions, TagPolicy};
use std::path::{Path, PathBuf};

/// An encoded descriptor, ready to hand to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedShard {
    pub repository: PathBuf,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GitSource {
    path: PathBuf,
    partitions: usize,
    stages: Vec<(DataType, StageOptions)>,
    has_header: bool,
    filter_refs: Vec<String>,
    all_commits: bool,
    tag_policy: TagPolicy,
}

impl GitSource {
    /// A source with no stages yet; the first stage call picks the root.
    pub fn new(path: impl Into<PathBuf>, partitions: usize) -> Self {
        Self {
            path: path.into(),
            partitions,
            stages: Vec::new(),
            has_header: true,
            filter_refs: Vec::new(),
            all_commits: false,
            tag_policy: TagPolicy::default(),
        }
    }

    /// A source rooted at the repositories stage.
    pub fn repositories(path: impl Into<PathBuf>, partitions: usize) -> Self {
        Self::new(path, partitions).stage(DataType::Repositories, StageOptions::default())
    }

    pub fn references(self, options: StageOptions) -> Self {
        self.stage(DataType::References, options)
    }

    pub fn commits(self, options: StageOptions) -> Self {
        self.stage(DataType::Commits, options)
    }

    pub fn trees(self, options: StageOptions) -> Self {
        self.stage(DataType::Trees, options)
    }

    pub fn blobs(self) -> Self {
        self.stage(DataType::Blobs, StageOptions::default())
    }

    pub fn stage(mut self, data_type: DataType, options: StageOptions) -> Self {
        self.stages.push((data_type, options));
        self
    }

    pub fn filter_refs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_refs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn all_commits(mut self) -> Self {
        self.all_commits = true;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn tag_policy(mut self, tag_policy: TagPolicy) -> Self {
        self.tag_policy = tag_policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Terminal data type; fails when the stages are out of dependency order.
    pub fn data_type(&self) -> Result<DataType> {
        let Some((last, _)) = self.stages.last() else {
            return Err(EngineError::Config {
                message: "source declares no stages".into(),
            });
        };
        for pair in self.stages.windows(2) {
            let (upstream, downstream) = (pair[0].0, pair[1].0);
            if upstream >= downstream || upstream.is_file_level() {
                return Err(EngineError::Config {
                    message: format!("stage {downstream} cannot follow {upstream}"),
                });
            }
        }
        Ok(*last)
    }

    /// The descriptor this source produces for one repository.
    pub fn descriptor(&self, handle: &crate::locator::RepositoryHandle) -> Result<ShardDescriptor> {
        let data_type = self.data_type()?;
        let upstream = &self.stages[..self.stages.len() - 1];
        Ok(upstream.iter().fold(
            ShardDescriptor::new(handle.id(), handle.kind, data_type)
                .with_header(self.has_header)
                .with_filter_refs(self.filter_refs.iter().cloned())
                .with_all_commits(self.all_commits)
                .with_tag_policy(self.tag_policy),
            |shard, (stage, options)| shard.with_nested(*stage, options.clone()),
        ))
    }

    /// Locate repositories and lazily yield one encoded shard per repository.
    ///
    /// A repository whose descriptor fails to encode is logged and skipped.
    /// A listing failure is yielded and ends generation.
    pub fn generate(&self) -> Result<Generate<'_>> {
        self.data_type()?;
        let locate = Locator::new(&self.path)?.locate()?;
        Ok(Generate { source: self, locate })
    }

    /// Generate every shard and assign them round-robin to partitions.
    pub fn partition(&self) -> Result<Vec<Vec<EncodedShard>>> {
        let shards = self.generate()?.collect::<Result<Vec<_>>>()?;
        tracing::info!(
            shards = shards.len(),
            partitions = self.partitions,
            "generated shards"
        );
        partition(shards, self.partitions)
    }
}

/// Lazy shard generation over a locator scan.
pub struct Generate<'s> {
    source: &'s GitSource,
    locate: Locate,
}

impl Iterator for Generate<'_> {
    type Item = Result<EncodedShard>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let handle = match self.locate.next()? {
                Ok(handle) => handle,
                Err(e) => return Some(Err(e)),
            };
            let encoded = self
                .source
                .descriptor(&handle)
                .and_then(|shard| shard::encode(&shard));
            match encoded {
                Ok(bytes) => {
                    tracing::info!(repository = %handle.path.display(), "found repository");
                    return Some(Ok(EncodedShard {
                        repository: handle.path,
                        bytes,
                    }));
                }
                Err(e) => {
                    tracing::error!(repository = %handle.path.display(), error = %e, "could not encode shard");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::RepositoryHandle;
    use crate::shard::{RepositoryKind, REF_NAME_COLUMN};
    use crate::testkit::FixtureRepo;

    fn handle(path: &str) -> RepositoryHandle {
        RepositoryHandle {
            path: PathBuf::from(path),
            kind: RepositoryKind::Standard,
        }
    }

    #[test]
    fn test_chain_becomes_nested_stages() {
        let opts = StageOptions::default().with_filter(REF_NAME_COLUMN, vec!["HEAD".into()]);
        let source = GitSource::repositories("/repos", 2)
            .references(opts.clone())
            .commits(StageOptions::default())
            .all_commits()
            .with_header(false);

        let shard = source.descriptor(&handle("/repos/a")).unwrap();
        assert_eq!(shard.data_type, DataType::Commits);
        assert_eq!(shard.repo_path, "/repos/a");
        assert!(shard.all_commits);
        assert!(!shard.has_header);
        assert_eq!(shard.nested.len(), 2);
        assert_eq!(shard.nested[&DataType::References], opts);
        assert!(shard.declares(DataType::Repositories));
    }

    #[test]
    fn test_stage_order_is_validated() {
        let backwards = GitSource::new("/repos", 1)
            .commits(StageOptions::default())
            .references(StageOptions::default());
        assert!(backwards.data_type().is_err());

        let files_then_files = GitSource::new("/repos", 1)
            .trees(StageOptions::default())
            .blobs();
        assert!(files_then_files.data_type().is_err());

        assert!(GitSource::new("/repos", 1).data_type().is_err());
        assert_eq!(GitSource::new("/repos", 1).blobs().data_type().unwrap(), DataType::Blobs);
    }

    #[test]
    fn test_generate_and_partition() {
        let root = tempfile::TempDir::new().unwrap();
        let fixtures: Vec<FixtureRepo> = (0..3).map(|_| FixtureRepo::new()).collect();
        for (i, fixture) in fixtures.iter().enumerate() {
            fixture.commit("HEAD", "first", &[("a", b"a")]);
            crate::archive::pack(fixture.path(), &root.path().join(format!("r{i}.siva"))).unwrap();
        }

        let source = GitSource::new(root.path().join("**"), 2).references(StageOptions::default());
        let parts = source.partition().unwrap();
        assert_eq!(parts.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1]);

        let decoded = shard::decode(&parts[0][0].bytes).unwrap();
        assert_eq!(decoded.repo_kind, RepositoryKind::Packed);
        assert_eq!(decoded.data_type, DataType::References);
        assert!(decoded.repo_path.ends_with("r0.siva"));
    }

    #[test]
    fn test_invalid_source_fails_up_front() {
        let source = GitSource::new("/definitely/not/here", 1).commits(StageOptions::default());
        assert!(source.generate().is_err());
    }

    #[test]
    fn test_listing_error_fails_partitioning() {
        let root = tempfile::TempDir::new().unwrap();
        let source = GitSource::new(root.path().join("gone").join("**"), 2).references(StageOptions::default());

        let err = source.partition().unwrap_err();
        assert!(matches!(err, EngineError::Listing { .. }));
        assert_eq!(err.code(), crate::errors::ErrorCode::SOURCE_LISTING);
    }
}
