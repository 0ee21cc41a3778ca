use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Column index of `refName` in the references header, used by filter options.
pub const REF_NAME_COLUMN: u32 = 2;

/// The kind of extraction a shard performs.
///
/// Variants are declared in dependency order, so `Ord` matches the order
/// in which stages drive each other: repositories < references < commits <
/// trees/blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    Repositories,
    References,
    Commits,
    Trees,
    Blobs,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Repositories,
        DataType::References,
        DataType::Commits,
        DataType::Trees,
        DataType::Blobs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Repositories => "repositories",
            DataType::References => "references",
            DataType::Commits => "commits",
            DataType::Trees => "trees",
            DataType::Blobs => "blobs",
        }
    }

    /// Trees and blobs walk file entries and need a commits driver.
    pub fn is_file_level(&self) -> bool {
        matches!(self, DataType::Trees | DataType::Blobs)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineError::UnknownDataType(s.to_string()))
    }
}

/// How a repository is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepositoryKind {
    /// A plain repository directory (work tree with `.git`, or bare).
    Standard,
    /// A single-file packed archive, mounted before opening.
    Packed,
}

/// How references pointing at annotated tag objects are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagPolicy {
    /// Peel the tag to the commit it annotates.
    #[default]
    Dereference,
    /// Treat references to tag objects as unresolvable.
    Skip,
}

impl FromStr for TagPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dereference" => Ok(TagPolicy::Dereference),
            "skip" => Ok(TagPolicy::Skip),
            other => Err(EngineError::Config {
                message: format!("unknown tag policy {other:?}"),
            }),
        }
    }
}

/// Per-stage options carried for nested stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOptions {
    /// Column index to accepted values. Only `REF_NAME_COLUMN` on the
    /// references stage is honoured.
    pub filter: BTreeMap<u32, Vec<String>>,
    /// Reserved.
    pub reverse: bool,
}

impl StageOptions {
    pub fn with_filter(mut self, column: u32, values: Vec<String>) -> Self {
        self.filter.insert(column, values);
        self
    }
}

/// A serializable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub repo_path: String,
    pub repo_kind: RepositoryKind,
    pub data_type: DataType,
    pub has_header: bool,
    /// Exact reference names, in caller order. Empty means all references.
    pub filter_refs: Vec<String>,
    pub all_commits: bool,
    pub nested: BTreeMap<DataType, StageOptions>,
    pub tag_policy: TagPolicy,
}

impl ShardDescriptor {
    pub fn new(repo_path: impl Into<String>, repo_kind: RepositoryKind, data_type: DataType) -> Self {
        Self {
            repo_path: repo_path.into(),
            repo_kind,
            data_type,
            has_header: false,
            filter_refs: Vec::new(),
            all_commits: false,
            nested: BTreeMap::new(),
            tag_policy: TagPolicy::default(),
        }
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_filter_refs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_refs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_all_commits(mut self, all_commits: bool) -> Self {
        self.all_commits = all_commits;
        self
    }

    pub fn with_nested(mut self, data_type: DataType, options: StageOptions) -> Self {
        self.nested.insert(data_type, options);
        self
    }

    pub fn with_tag_policy(mut self, tag_policy: TagPolicy) -> Self {
        self.tag_policy = tag_policy;
        self
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.repo_path)
    }

    /// Reference names to restrict to; `filter_refs` wins over stage options.
    pub fn effective_ref_filter(&self) -> &[String] {
        if !self.filter_refs.is_empty() {
            return &self.filter_refs;
        }
        self.nested
            .get(&DataType::References)
            .and_then(|opts| opts.filter.get(&REF_NAME_COLUMN))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `data_type` is declared as a nested (upstream) stage.
    pub fn declares(&self, data_type: DataType) -> bool {
        data_type < self.data_type && self.nested.contains_key(&data_type)
    }
}
