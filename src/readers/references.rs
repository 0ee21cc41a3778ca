use super::cursor::Nested;
use super::resolve::effective_commit;
use super::{Record, Source, Upstream};
use crate::errors::{EngineError, Result};
use crate::row::Value;
use crate::shard::DataType;
use git2::{Oid, Reference};

pub const REFERENCES_HEADER: &[&str] = &["repositoryID", "refHash", "refName", "isRemote"];

/// References of one repository, either all of them or a named subset.
pub(crate) enum RefSource<'r> {
    /// HEAD first, then the `refs/` namespace.
    All {
        head_pending: bool,
        refs: git2::References<'r>,
    },
    /// Exact names in caller order; names that do not exist are omitted.
    Named(std::vec::IntoIter<String>),
}

impl<'r> RefSource<'r> {
    fn open(source: Source<'r>, filter: &[String]) -> Result<Self> {
        if !filter.is_empty() {
            return Ok(RefSource::Named(filter.to_vec().into_iter()));
        }
        let refs = source.repo.references().map_err(|e| EngineError::Iteration {
            repository: source.id.to_string(),
            what: "references",
            source: e,
        })?;
        Ok(RefSource::All {
            head_pending: true,
            refs,
        })
    }

    fn next_reference(&mut self, source: Source<'r>) -> Result<Option<Reference<'r>>> {
        match self {
            RefSource::All { head_pending, refs } => {
                if std::mem::take(head_pending) {
                    if let Ok(head) = source.repo.find_reference("HEAD") {
                        return Ok(Some(head));
                    }
                }
                refs.next()
                    .transpose()
                    .map_err(|e| EngineError::Iteration {
                        repository: source.id.to_string(),
                        what: "references",
                        source: e,
                    })
            }
            RefSource::Named(names) => {
                for name in names.by_ref() {
                    match source.repo.find_reference(&name) {
                        Ok(reference) => return Ok(Some(reference)),
                        Err(_) => tracing::debug!(repository = source.id, reference = %name, "reference not found"),
                    }
                }
                Ok(None)
            }
        }
    }

    /// Next reference that resolves to a commit; unresolvable ones are skipped.
    fn next_resolved(&mut self, source: Source<'r>) -> Result<Option<(Reference<'r>, Oid)>> {
        while let Some(reference) = self.next_reference(source)? {
            match effective_commit(source.repo, &reference, source.tag_policy) {
                Ok(commit) => return Ok(Some((reference, commit))),
                Err(e) if e.is_skippable() => {
                    tracing::debug!(repository = source.id, error = %e, "skipping reference");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

/// Emits one row per resolvable reference.
pub struct ReferencesReader<'r> {
    source: Source<'r>,
    filter: Vec<String>,
    nested: Nested<Upstream<'r>, RefSource<'r>>,
}

impl<'r> ReferencesReader<'r> {
    pub(crate) fn new(source: Source<'r>, filter: Vec<String>, upstream: Option<Upstream<'r>>) -> Result<Self> {
        let nested = match upstream {
            Some(upstream) => Nested::chained(upstream),
            None => Nested::root(RefSource::open(source, &filter)?),
        };
        Ok(Self { source, filter, nested })
    }

    pub fn upstream(&self) -> Option<&Upstream<'r>> {
        self.nested.upstream()
    }

    pub fn read(&mut self) -> Result<Option<Record>> {
        let source = self.source;
        let filter = &self.filter;
        let next = self.nested.next(
            |_| RefSource::open(source, filter),
            |refs| refs.next_resolved(source),
        );

        match next.map_err(|e| e.in_stage(DataType::References, source.id))? {
            Some(((reference, commit), lineage)) => Ok(Some(Record {
                own: vec![
                    Value::from(source.id),
                    Value::from(commit.to_string()),
                    Value::from(String::from_utf8_lossy(reference.name_bytes()).into_owned()),
                    Value::from(reference.is_remote()),
                ],
                lineage,
                anchor: Some(commit),
            })),
            None => Ok(None),
        }
    }
}
