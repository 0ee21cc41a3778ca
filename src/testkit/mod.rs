//! Fixture repositories for tests.
//!
//! Builds real repositories in temporary directories with `git2`, so tests
//! never depend on a `git` binary or on the developer's configuration.
//!
//! | Helper | Purpose |
//! |--------|---------|
//! | [`FixtureRepo::new`] / [`FixtureRepo::bare`] | Empty repository, `HEAD -> refs/heads/master` |
//! | [`FixtureRepo::commit`] | Commit a file set on top of a reference |
//! | [`FixtureRepo::annotated_tag`] | Tag object plus `refs/tags/<name>` |
//! | [`FixtureRepo::symbolic`] | Symbolic reference, target need not exist |
//! | [`FixtureRepo::write_raw_ref`] | Loose ref file with arbitrary content |
//!
//! ```rust,ignore
//! use gitengine::testkit::FixtureRepo;
//!
//! let fixture = FixtureRepo::new();
//! let c1 = fixture.commit("HEAD", "first", &[("src/lib.rs", b"fn main() {}")]);
//! fixture.annotated_tag("v1", c1);
//! ```
//!
//! # Panics
//!
//! Every helper panics with the failing operation when `git2` reports an
//! error; fixtures are test-only.

use git2::{ObjectType, Oid, Repository, RepositoryInitOptions, Signature, Time};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

/// Seconds since the epoch of the first fixture commit.
pub const EPOCH: i64 = 1_600_000_000;

/// Mode of a gitlink (submodule) tree entry.
pub const GITLINK_MODE: i32 = 0o160000;

/// A repository living in its own temporary directory.
pub struct FixtureRepo {
    repo: Repository,
    dir: TempDir,
    clock: Cell<i64>,
}

enum Node {
    File(Oid),
    Dir(BTreeMap<String, Node>),
}

impl FixtureRepo {
    /// A work-tree repository.
    pub fn new() -> Self {
        Self::init(false)
    }

    /// A bare repository.
    pub fn bare() -> Self {
        Self::init(true)
    }

    fn init(bare: bool) -> Self {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("create fixture dir: {e}"));
        let mut opts = RepositoryInitOptions::new();
        opts.bare(bare).initial_head("master");
        let repo = Repository::init_opts(dir.path(), &opts)
            .unwrap_or_else(|e| panic!("init fixture repository: {e}"));
        Self {
            repo,
            dir,
            clock: Cell::new(EPOCH),
        }
    }

    /// Directory the repository was created in (work tree or bare root).
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The `.git` directory, or the root of a bare repository.
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Deterministic signature; every call advances the clock by one minute.
    pub fn signature(&self) -> Signature<'static> {
        let seconds = self.clock.get();
        self.clock.set(seconds + 60);
        Signature::new("Fixture Author", "author@example.com", &Time::new(seconds, 0))
            .unwrap_or_else(|e| panic!("signature: {e}"))
    }

    /// Write a tree holding `files`; `/` in a path creates subtrees.
    pub fn tree(&self, files: &[(&str, &[u8])]) -> Oid {
        let mut root = BTreeMap::new();
        for (path, content) in files {
            let blob = self.repo.blob(content).unwrap_or_else(|e| panic!("write blob {path}: {e}"));
            let mut parts: Vec<&str> = path.split('/').collect();
            let Some(file_name) = parts.pop() else { continue };
            let mut dir = &mut root;
            for part in parts {
                let node = dir
                    .entry(part.to_string())
                    .or_insert_with(|| Node::Dir(BTreeMap::new()));
                dir = match node {
                    Node::Dir(children) => children,
                    Node::File(_) => panic!("{path} crosses a file"),
                };
            }
            dir.insert(file_name.to_string(), Node::File(blob));
        }
        self.write_dir(&root)
    }

    fn write_dir(&self, dir: &BTreeMap<String, Node>) -> Oid {
        let mut builder = self
            .repo
            .treebuilder(None)
            .unwrap_or_else(|e| panic!("treebuilder: {e}"));
        for (name, node) in dir {
            let (oid, mode) = match node {
                Node::File(oid) => (*oid, 0o100644),
                Node::Dir(children) => (self.write_dir(children), 0o040000),
            };
            builder
                .insert(name, oid, mode)
                .unwrap_or_else(|e| panic!("insert {name}: {e}"));
        }
        builder.write().unwrap_or_else(|e| panic!("write tree: {e}"))
    }

    /// Add a gitlink entry to an existing tree and return the new tree.
    pub fn with_gitlink(&self, tree: Oid, name: &str, target: Oid) -> Oid {
        let base = self.repo.find_tree(tree).unwrap_or_else(|e| panic!("find tree: {e}"));
        let mut builder = self
            .repo
            .treebuilder(Some(&base))
            .unwrap_or_else(|e| panic!("treebuilder: {e}"));
        builder
            .insert(name, target, GITLINK_MODE)
            .unwrap_or_else(|e| panic!("insert gitlink {name}: {e}"));
        builder.write().unwrap_or_else(|e| panic!("write tree: {e}"))
    }

    /// Commit `files` on top of whatever `refname` currently resolves to,
    /// and move `refname` to the new commit.
    pub fn commit(&self, refname: &str, message: &str, files: &[(&str, &[u8])]) -> Oid {
        let parents: Vec<Oid> = self.repo.refname_to_id(refname).ok().into_iter().collect();
        self.commit_tree(Some(refname), message, self.tree(files), &parents)
    }

    /// Commit an existing tree with explicit parents.
    pub fn commit_tree(&self, refname: Option<&str>, message: &str, tree: Oid, parents: &[Oid]) -> Oid {
        let tree = self.repo.find_tree(tree).unwrap_or_else(|e| panic!("find tree: {e}"));
        let parents: Vec<git2::Commit<'_>> = parents
            .iter()
            .map(|oid| {
                self.repo
                    .find_commit(*oid)
                    .unwrap_or_else(|e| panic!("find parent {oid}: {e}"))
            })
            .collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        let author = self.signature();
        self.repo
            .commit(refname, &author, &author, message, &tree, &parent_refs)
            .unwrap_or_else(|e| panic!("commit {message:?}: {e}"))
    }

    /// Point `name` directly at `target`, creating or moving it.
    pub fn reference(&self, name: &str, target: Oid) {
        self.repo
            .reference(name, target, true, "fixture")
            .unwrap_or_else(|e| panic!("reference {name}: {e}"));
    }

    pub fn branch(&self, name: &str, target: Oid) {
        self.reference(&format!("refs/heads/{name}"), target);
    }

    pub fn remote_branch(&self, remote: &str, name: &str, target: Oid) {
        self.reference(&format!("refs/remotes/{remote}/{name}"), target);
    }

    pub fn lightweight_tag(&self, name: &str, target: Oid) {
        self.reference(&format!("refs/tags/{name}"), target);
    }

    /// Create a tag object for `target` and `refs/tags/<name>` pointing at it.
    pub fn annotated_tag(&self, name: &str, target: Oid) -> Oid {
        let object = self
            .repo
            .find_object(target, None)
            .unwrap_or_else(|e| panic!("find tag target {target}: {e}"));
        let tagger = self.signature();
        let tag = self
            .repo
            .tag_annotation_create(name, &object, &tagger, &format!("release {name}"))
            .unwrap_or_else(|e| panic!("tag {name}: {e}"));
        self.reference(&format!("refs/tags/{name}"), tag);
        tag
    }

    /// Symbolic reference `name -> target`; the target may be missing.
    pub fn symbolic(&self, name: &str, target: &str) {
        self.repo
            .reference_symbolic(name, target, true, "fixture")
            .unwrap_or_else(|e| panic!("symbolic {name} -> {target}: {e}"));
    }

    /// Write a loose reference file verbatim, bypassing object checks.
    pub fn write_raw_ref(&self, name: &str, hash: &str) {
        let path = self.repo.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap_or_else(|e| panic!("create {}: {e}", parent.display()));
        }
        std::fs::write(&path, format!("{hash}\n")).unwrap_or_else(|e| panic!("write {}: {e}", path.display()));
    }

    /// Remove a loose object from the object database.
    pub fn delete_object(&self, oid: Oid) {
        let hex = oid.to_string();
        let path = self.repo.path().join("objects").join(&hex[..2]).join(&hex[2..]);
        std::fs::remove_file(&path).unwrap_or_else(|e| panic!("remove {}: {e}", path.display()));
    }

    /// Every commit in the object database, sorted by hash.
    pub fn all_commits(&self) -> Vec<Oid> {
        let odb = self.repo.odb().unwrap_or_else(|e| panic!("odb: {e}"));
        let mut commits = Vec::new();
        odb.foreach(|oid| {
            if matches!(odb.read_header(*oid), Ok((_, ObjectType::Commit))) {
                commits.push(*oid);
            }
            true
        })
        .unwrap_or_else(|e| panic!("odb foreach: {e}"));
        commits.sort();
        commits.dedup();
        commits
    }
}

impl Default for FixtureRepo {
    fn default() -> Self {
        Self::new()
    }
}
