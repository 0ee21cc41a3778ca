use super::cursor::Nested;
use super::files::{FileEntry, FileWalk};
use super::{Record, Source, Upstream};
use crate::errors::{EngineError, Result};
use crate::row::Value;
use crate::shard::DataType;

pub const BLOBS_HEADER: &[&str] = &[
    "repositoryID",
    "blobHash",
    "commitHash",
    "content",
    "fileName",
    "isBinary",
    "blobSize",
];

/// Emits one row per file entry of every driving commit, with the blob content.
///
/// A blob that cannot be read means a corrupt repository and aborts the shard.
pub struct BlobsReader<'r> {
    source: Source<'r>,
    nested: Nested<Upstream<'r>, FileWalk<'r>>,
}

impl<'r> BlobsReader<'r> {
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
        self.next_record(source)
            .map_err(|e| e.in_stage(DataType::Blobs, source.id))
    }

    fn next_record(&mut self, source: Source<'r>) -> Result<Option<Record>> {
        let next = self.nested.next(
            |driver| FileWalk::open(source, driver),
            |walk| Ok(walk.next_entry()?.map(|entry| (walk.commit(), entry))),
        )?;
        let Some(((commit, FileEntry { path, blob }), lineage)) = next else {
            return Ok(None);
        };

        let object = source
            .repo
            .find_blob(blob)
            .map_err(|e| EngineError::object_read(source.id, "blob", blob, e))?;
        let content = object.content();

        Ok(Some(Record {
            own: vec![
                Value::from(source.id),
                Value::from(blob.to_string()),
                Value::from(commit.to_string()),
                Value::from(content.to_vec()),
                Value::from(path),
                Value::from(object.is_binary()),
                Value::from(content.len()),
            ],
            lineage,
            anchor: Some(blob),
        }))
    }
}
