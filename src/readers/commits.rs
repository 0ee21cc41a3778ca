use super::cursor::Nested;
use super::{Driver, Record, Source, Upstream};
use crate::errors::{EngineError, Result};
use crate::row::Value;
use crate::shard::DataType;
use git2::{Commit, ObjectType, Odb, Oid, Revwalk, Sort};
use std::collections::HashSet;

pub const COMMITS_HEADER: &[&str] = &[
    "repositoryID",
    "commitHash",
    "treeHash",
    "parentHashes",
    "parentCount",
    "message",
    "authorEmail",
    "authorName",
    "authorDateUnix",
    "committerEmail",
    "committerName",
    "committerDateUnix",
];

/// Commits produced for one upstream record.
pub(crate) enum CommitCursor<'r> {
    /// The commit a reference resolves to.
    Single(Option<Oid>),
    /// Everything reachable from a reference.
    History(Revwalk<'r>),
    /// Every commit in the object database, in storage order.
    Database(DatabaseScan<'r>),
}

pub(crate) struct DatabaseScan<'r> {
    odb: Odb<'r>,
    oids: std::vec::IntoIter<Oid>,
}

impl<'r> DatabaseScan<'r> {
    fn open(source: Source<'r>) -> Result<Self> {
        let iteration = |e| EngineError::Iteration {
            repository: source.id.to_string(),
            what: "object database",
            source: e,
        };
        let odb = source.repo.odb().map_err(iteration)?;

        // An object stored both loose and packed is listed once per copy.
        let mut seen = HashSet::new();
        let mut oids = Vec::new();
        odb.foreach(|oid| {
            if seen.insert(*oid) {
                oids.push(*oid);
            }
            true
        })
        .map_err(iteration)?;

        Ok(Self {
            odb,
            oids: oids.into_iter(),
        })
    }

    fn next_commit(&mut self, id: &str) -> Result<Option<Oid>> {
        for oid in self.oids.by_ref() {
            let (_, kind) = self
                .odb
                .read_header(oid)
                .map_err(|e| EngineError::object_read(id, "object", oid, e))?;
            if kind == ObjectType::Commit {
                return Ok(Some(oid));
            }
        }
        Ok(None)
    }
}

impl CommitCursor<'_> {
    fn next_oid(&mut self, id: &str) -> Result<Option<Oid>> {
        match self {
            CommitCursor::Single(oid) => Ok(oid.take()),
            CommitCursor::History(walk) => walk.next().transpose().map_err(|e| EngineError::Iteration {
                repository: id.to_string(),
                what: "commit history",
                source: e,
            }),
            CommitCursor::Database(scan) => scan.next_commit(id),
        }
    }
}

/// Emits one row per commit, unchained or driven by references.
pub struct CommitsReader<'r> {
    source: Source<'r>,
    all_commits: bool,
    nested: Nested<Upstream<'r>, CommitCursor<'r>>,
}

impl<'r> CommitsReader<'r> {
    pub(crate) fn new(source: Source<'r>, all_commits: bool, upstream: Option<Upstream<'r>>) -> Result<Self> {
        let nested = match upstream {
            Some(upstream) => Nested::chained(upstream),
            None => Nested::root(CommitCursor::Database(DatabaseScan::open(source)?)),
        };
        Ok(Self {
            source,
            all_commits,
            nested,
        })
    }

    pub fn upstream(&self) -> Option<&Upstream<'r>> {
        self.nested.upstream()
    }

    fn open(source: Source<'r>, all_commits: bool, driver: &Driver) -> Result<CommitCursor<'r>> {
        let Some(tip) = driver.anchor else {
            // Driven by a stage that designates no object: the whole database.
            return Ok(CommitCursor::Database(DatabaseScan::open(source)?));
        };
        if !all_commits {
            return Ok(CommitCursor::Single(Some(tip)));
        }

        let iteration = |e| EngineError::Iteration {
            repository: source.id.to_string(),
            what: "commit history",
            source: e,
        };
        let mut walk = source.repo.revwalk().map_err(iteration)?;
        walk.set_sorting(Sort::TOPOLOGICAL).map_err(iteration)?;
        walk.push(tip).map_err(iteration)?;
        Ok(CommitCursor::History(walk))
    }

    pub fn read(&mut self) -> Result<Option<Record>> {
        let source = self.source;
        let all_commits = self.all_commits;
        self.next_record(source, all_commits)
            .map_err(|e| e.in_stage(DataType::Commits, source.id))
    }

    fn next_record(&mut self, source: Source<'r>, all_commits: bool) -> Result<Option<Record>> {
        let next = self.nested.next(
            |driver| Self::open(source, all_commits, driver),
            |cursor| cursor.next_oid(source.id),
        )?;
        let Some((oid, lineage)) = next else {
            return Ok(None);
        };

        let commit = source
            .repo
            .find_commit(oid)
            .map_err(|e| EngineError::object_read(source.id, "commit", oid, e))?;
        Ok(Some(Record {
            own: commit_columns(source.id, &commit),
            lineage,
            anchor: Some(oid),
        }))
    }
}

fn lossy(bytes: &[u8]) -> Value {
    Value::from(String::from_utf8_lossy(bytes).into_owned())
}

fn commit_columns(id: &str, commit: &Commit<'_>) -> Vec<Value> {
    let author = commit.author();
    let committer = commit.committer();
    let parents: Vec<String> = commit.parent_ids().map(|p| p.to_string()).collect();
    vec![
        Value::from(id),
        Value::from(commit.id().to_string()),
        Value::from(commit.tree_id().to_string()),
        Value::from(parents),
        Value::from(commit.parent_count()),
        lossy(commit.message_bytes()),
        lossy(author.email_bytes()),
        lossy(author.name_bytes()),
        Value::Int(author.when().seconds()),
        lossy(committer.email_bytes()),
        lossy(committer.name_bytes()),
        Value::Int(committer.when().seconds()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::TagPolicy;
    use crate::testkit::{FixtureRepo, EPOCH};
    use pretty_assertions::assert_eq;

    fn source(fixture: &FixtureRepo) -> Source<'_> {
        Source {
            repo: fixture.repo(),
            id: "r",
            tag_policy: TagPolicy::Dereference,
        }
    }

    fn hashes(reader: &mut CommitsReader<'_>) -> Vec<Oid> {
        let mut out = Vec::new();
        while let Some(record) = reader.read().unwrap() {
            out.push(record.anchor.unwrap());
        }
        out
    }

    #[test]
    fn test_unchained_lists_every_commit_once() {
        let fixture = FixtureRepo::new();
        let c1 = fixture.commit("HEAD", "first", &[("a", b"a")]);
        fixture.commit("HEAD", "second", &[("a", b"b")]);
        // unreachable from any reference
        let tree = fixture.tree(&[("x", b"x")]);
        fixture.commit_tree(None, "orphan", tree, &[c1]);

        let mut reader = CommitsReader::new(source(&fixture), false, None).unwrap();
        let mut found = hashes(&mut reader);
        found.sort();
        assert_eq!(found, fixture.all_commits());
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_commit_columns() {
        let fixture = FixtureRepo::new();
        let c1 = fixture.commit("HEAD", "first\n", &[("a", b"a")]);
        let c2 = fixture.commit("HEAD", "second\n", &[("a", b"b")]);

        let commit = fixture.repo().find_commit(c2).unwrap();
        let columns = commit_columns("r", &commit);
        assert_eq!(columns.len(), COMMITS_HEADER.len());
        assert_eq!(columns[1], Value::from(c2.to_string()));
        assert_eq!(columns[2], Value::from(commit.tree_id().to_string()));
        assert_eq!(columns[3], Value::from(vec![c1.to_string()]));
        assert_eq!(columns[4], Value::UInt(1));
        assert_eq!(columns[5], Value::from("second\n"));
        assert_eq!(columns[6], Value::from("author@example.com"));
        assert_eq!(columns[7], Value::from("Fixture Author"));
        assert_eq!(columns[8], Value::Int(EPOCH + 60));
    }

    #[test]
    fn test_root_commit_has_no_parents() {
        let fixture = FixtureRepo::new();
        let c1 = fixture.commit("HEAD", "first", &[("a", b"a")]);

        let commit = fixture.repo().find_commit(c1).unwrap();
        let columns = commit_columns("r", &commit);
        assert_eq!(columns[3], Value::List(Vec::new()));
        assert_eq!(columns[4], Value::UInt(0));
    }
}
