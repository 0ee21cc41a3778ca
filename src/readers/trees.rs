use super::cursor::Nested;
use super::files::{FileEntry, FileWalk};
use super::{Record, Source, Upstream};
use crate::errors::Result;
use crate::row::Value;
use crate::shard::DataType;

pub const TREES_HEADER: &[&str] = &["repositoryID", "commitHash", "blobHash", "fileName"];

/// Emits one row per file entry of every driving commit.
pub struct TreesReader<'r> {
    source: Source<'r>,
    nested: Nested<Upstream<'r>, FileWalk<'r>>,
}

impl<'r> TreesReader<'r> {
    pub(crate) fn new(source: Source<'r>, upstream: Upstream<'r>) -> Self {
        Self {
            source,
            nested: Nested::chained(upstream),
        }
    }

    pub fn upstream(&self) -> Option<&Upstream<'r>> {
        self.nested.upstream()
    }

    pub fn read(&mut self) -> Result<Option<Record>> {
        let source = self.source;
        let next = self
            .nested
            .next(
                |driver| FileWalk::open(source, driver),
                |walk| Ok(walk.next_entry()?.map(|entry| (walk.commit(), entry))),
            )
            .map_err(|e| e.in_stage(DataType::Trees, source.id))?;

        Ok(next.map(|((commit, FileEntry { path, blob }), lineage)| Record {
            own: vec![
                Value::from(source.id),
                Value::from(commit.to_string()),
                Value::from(blob.to_string()),
                Value::from(path),
            ],
            lineage,
            anchor: Some(blob),
        }))
    }
}
