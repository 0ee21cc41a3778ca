//! Reader chain: lazy row producers over a repository's object graph.
//!
//! Every data type has a reader exposing the same two operations,
//! [`Reader::read_header`] and [`Reader::read`]. Readers compose: a
//! references reader can drive a commits reader, which can drive a trees
//! or blobs reader. A driven stage emits its own columns followed by the
//! columns of every visible upstream stage, in dependency order
//! (repositories, references, commits).

mod blobs;
mod commits;
mod cursor;
mod files;
mod references;
mod repositories;
mod resolve;
mod trees;

pub use blobs::BLOBS_HEADER;
pub use commits::COMMITS_HEADER;
pub use references::REFERENCES_HEADER;
pub use repositories::REPOSITORIES_HEADER;
pub use resolve::effective_commit;
pub use trees::TREES_HEADER;

use crate::errors::Result;
use crate::row::{Row, Value};
use crate::shard::{DataType, ShardDescriptor, TagPolicy};
use cursor::DriverSource;
use git2::{Oid, Repository};

/// One record produced by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The stage's own columns, in header order.
    pub own: Vec<Value>,
    /// Columns of visible upstream stages, in dependency order.
    pub lineage: Vec<Value>,
    /// Object this record designates for downstream stages.
    pub anchor: Option<Oid>,
}

impl Record {
    pub fn columns(&self) -> impl Iterator<Item = &Value> {
        self.own.iter().chain(self.lineage.iter())
    }

    pub fn into_row(self) -> Row {
        let mut columns = self.own;
        columns.extend(self.lineage);
        Row::new(columns)
    }
}

/// What a driven stage receives for each upstream record.
#[derive(Debug, Clone)]
pub(crate) struct Driver {
    pub lineage: Vec<Value>,
    pub anchor: Option<Oid>,
}

/// Repository being read and the ID stamped on every row.
#[derive(Clone, Copy)]
pub(crate) struct Source<'r> {
    pub repo: &'r Repository,
    pub id: &'r str,
    pub tag_policy: TagPolicy,
}

/// An upstream stage and whether its columns appear downstream.
pub struct Upstream<'r> {
    reader: Box<Reader<'r>>,
    visible: bool,
}

impl<'r> Upstream<'r> {
    pub fn data_type(&self) -> DataType {
        self.reader.data_type()
    }

    /// Column names this upstream contributes to downstream rows.
    fn header(&self) -> Vec<String> {
        let mut names = self.reader.lineage_header();
        if self.visible {
            names.extend(self.reader.own_header().iter().map(|s| s.to_string()));
        }
        names
    }
}

impl DriverSource for Upstream<'_> {
    fn next_driver(&mut self) -> Result<Option<Driver>> {
        Ok(self.reader.read()?.map(|record| {
            let mut lineage = record.lineage;
            if self.visible {
                lineage.extend(record.own);
            }
            Driver {
                lineage,
                anchor: record.anchor,
            }
        }))
    }
}

/// A stage reader: one variant per data type.
pub enum Reader<'r> {
    Repositories(repositories::RepositoriesReader<'r>),
    References(references::ReferencesReader<'r>),
    Commits(commits::CommitsReader<'r>),
    Trees(trees::TreesReader<'r>),
    Blobs(blobs::BlobsReader<'r>),
}

impl<'r> Reader<'r> {
    pub fn data_type(&self) -> DataType {
        match self {
            Reader::Repositories(_) => DataType::Repositories,
            Reader::References(_) => DataType::References,
            Reader::Commits(_) => DataType::Commits,
            Reader::Trees(_) => DataType::Trees,
            Reader::Blobs(_) => DataType::Blobs,
        }
    }

    fn own_header(&self) -> &'static [&'static str] {
        match self {
            Reader::Repositories(_) => REPOSITORIES_HEADER,
            Reader::References(_) => REFERENCES_HEADER,
            Reader::Commits(_) => COMMITS_HEADER,
            Reader::Trees(_) => TREES_HEADER,
            Reader::Blobs(_) => BLOBS_HEADER,
        }
    }

    fn upstream(&self) -> Option<&Upstream<'r>> {
        match self {
            Reader::Repositories(_) => None,
            Reader::References(r) => r.upstream(),
            Reader::Commits(r) => r.upstream(),
            Reader::Trees(r) => r.upstream(),
            Reader::Blobs(r) => r.upstream(),
        }
    }

    fn lineage_header(&self) -> Vec<String> {
        self.upstream().map(Upstream::header).unwrap_or_default()
    }

    /// Column names of the records `read` produces.
    pub fn read_header(&self) -> Vec<String> {
        let mut names: Vec<String> = self.own_header().iter().map(|s| s.to_string()).collect();
        names.extend(self.lineage_header());
        names
    }

    /// Next record, or `Ok(None)` once the stage is exhausted.
    pub fn read(&mut self) -> Result<Option<Record>> {
        match self {
            Reader::Repositories(r) => r.read(),
            Reader::References(r) => r.read(),
            Reader::Commits(r) => r.read(),
            Reader::Trees(r) => r.read(),
            Reader::Blobs(r) => r.read(),
        }
    }
}

/// Stages to build for a shard, in dependency order, with their visibility.
///
/// Declared nested stages upstream of the requested type are visible. Trees
/// and blobs always need a commits driver; one is added, hidden, when the
/// shard does not declare it.
pub fn plan(shard: &ShardDescriptor) -> Vec<(DataType, bool)> {
    let mut links: Vec<(DataType, bool)> = [
        DataType::Repositories,
        DataType::References,
        DataType::Commits,
    ]
    .into_iter()
    .filter(|t| shard.declares(*t))
    .map(|t| (t, true))
    .collect();

    if shard.data_type.is_file_level() && !shard.declares(DataType::Commits) {
        links.push((DataType::Commits, false));
    }
    links.push((shard.data_type, true));
    links
}

/// Build the reader chain for `shard` over an opened repository.
pub fn build<'r>(repo: &'r Repository, id: &'r str, shard: &ShardDescriptor) -> Result<Reader<'r>> {
    let source = Source {
        repo,
        id,
        tag_policy: shard.tag_policy,
    };

    let mut upstream: Option<Upstream<'r>> = None;
    let mut terminal = None;
    for (data_type, visible) in plan(shard) {
        let reader = build_stage(source, data_type, upstream.take(), shard)?;
        if data_type == shard.data_type {
            terminal = Some(reader);
        } else {
            upstream = Some(Upstream {
                reader: Box::new(reader),
                visible,
            });
        }
    }

    terminal.ok_or_else(|| crate::errors::EngineError::UnknownDataType(shard.data_type.to_string()))
}

fn build_stage<'r>(
    source: Source<'r>,
    data_type: DataType,
    upstream: Option<Upstream<'r>>,
    shard: &ShardDescriptor,
) -> Result<Reader<'r>> {
    let reader = match data_type {
        DataType::Repositories => Reader::Repositories(repositories::RepositoriesReader::new(source)),
        DataType::References => Reader::References(references::ReferencesReader::new(
            source,
            shard.effective_ref_filter().to_vec(),
            upstream,
        )?),
        DataType::Commits => Reader::Commits(commits::CommitsReader::new(source, shard.all_commits, upstream)?),
        DataType::Trees => Reader::Trees(trees::TreesReader::new(source, required(upstream, data_type)?)),
        DataType::Blobs => Reader::Blobs(blobs::BlobsReader::new(source, required(upstream, data_type)?)),
    };
    Ok(reader)
}

fn required(upstream: Option<Upstream<'_>>, data_type: DataType) -> Result<Upstream<'_>> {
    upstream.ok_or_else(|| crate::errors::EngineError::Config {
        message: format!("{data_type} requires a commits stage upstream"),
    })
}
