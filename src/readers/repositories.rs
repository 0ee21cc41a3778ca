use super::resolve::resolve_name;
use super::{Record, Source};
use crate::errors::Result;
use crate::row::Value;

pub const REPOSITORIES_HEADER: &[&str] = &["repositoryID", "headHash"];

/// Emits one row for the repository; HEAD that cannot be resolved yields an empty hash.
pub struct RepositoriesReader<'r> {
    source: Source<'r>,
    done: bool,
}

impl<'r> RepositoriesReader<'r> {
    pub(crate) fn new(source: Source<'r>) -> Self {
        Self { source, done: false }
    }

    pub fn read(&mut self) -> Result<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let head = match resolve_name(self.source.repo, "HEAD", self.source.tag_policy) {
            Ok(oid) => oid.to_string(),
            Err(e) if e.is_skippable() => {
                tracing::debug!(repository = self.source.id, "HEAD is unresolvable");
                String::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Some(Record {
            own: vec![Value::from(self.source.id), Value::from(head)],
            lineage: Vec::new(),
            anchor: None,
        }))
    }
}
