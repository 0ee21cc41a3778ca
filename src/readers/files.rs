//! File entries of one commit's tree.

use super::{Driver, Source};
use crate::errors::{EngineError, Result};
use git2::{ObjectType, Oid, Repository, Tree};
use std::collections::HashSet;

/// A blob reached from a commit's root tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileEntry {
    pub path: String,
    pub blob: Oid,
}

struct Frame<'r> {
    tree: Tree<'r>,
    prefix: String,
    next: usize,
}

/// Depth-first walk over a commit's tree with an explicit stack.
///
/// A subtree hash is entered at most once per walk, so identical
/// subtrees at different paths are emitted once. Gitlinks are ignored.
pub(crate) struct FileWalk<'r> {
    repo: &'r Repository,
    id: &'r str,
    commit: Oid,
    stack: Vec<Frame<'r>>,
    seen: HashSet<Oid>,
}

impl<'r> FileWalk<'r> {
    /// Walk the root tree of the commit a driver designates.
    pub fn open(source: Source<'r>, driver: &Driver) -> Result<Self> {
        let Some(commit_id) = driver.anchor else {
            return Ok(Self::empty(source, Oid::zero()));
        };
        let tree = source
            .repo
            .find_commit(commit_id)
            .and_then(|commit| commit.tree())
            .map_err(|e| EngineError::object_read(source.id, "commit", commit_id, e))?;

        let mut walk = Self::empty(source, commit_id);
        walk.seen.insert(tree.id());
        walk.stack.push(Frame {
            tree,
            prefix: String::new(),
            next: 0,
        });
        Ok(walk)
    }

    fn empty(source: Source<'r>, commit: Oid) -> Self {
        Self {
            repo: source.repo,
            id: source.id,
            commit,
            stack: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn commit(&self) -> Oid {
        self.commit
    }

    pub fn next_entry(&mut self) -> Result<Option<FileEntry>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some((kind, oid, name)) = frame.tree.get(frame.next).map(|entry| {
                (
                    entry.kind(),
                    entry.id(),
                    String::from_utf8_lossy(entry.name_bytes()).into_owned(),
                )
            }) else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;
            let path = join(&frame.prefix, &name);

            match kind {
                Some(ObjectType::Blob) => return Ok(Some(FileEntry { path, blob: oid })),
                Some(ObjectType::Tree) if self.seen.insert(oid) => {
                    let tree = self
                        .repo
                        .find_tree(oid)
                        .map_err(|e| EngineError::object_read(self.id, "tree", oid, e))?;
                    self.stack.push(Frame {
                        tree,
                        prefix: path,
                        next: 0,
                    });
                }
                _ => {}
            }
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
