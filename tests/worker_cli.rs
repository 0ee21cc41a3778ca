//! The binary's worker, generate and pack commands.

use assert_cmd::Command;
use gitengine::row::{Row, RowStream};
use gitengine::shard::{decode, encode, DataType, RepositoryKind, ShardDescriptor};
use gitengine::testkit::FixtureRepo;
use gitengine::Result;
use std::fs;
use tempfile::TempDir;

fn gitengine(cwd: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gitengine").unwrap();
    // keep a developer's .gitengine.toml out of the picture
    cmd.current_dir(cwd.path()).env_remove("GITENGINE_LOG");
    cmd
}

fn decode_rows(stdout: &[u8]) -> Vec<Row> {
    RowStream::new(stdout).collect::<Result<Vec<_>>>().unwrap()
}

#[test]
fn test_worker_streams_rows_from_stdin() {
    let cwd = TempDir::new().unwrap();
    let fixture = FixtureRepo::new();
    fixture.commit("HEAD", "first", &[("a", b"a")]);
    let shard = ShardDescriptor::new(
        fixture.path().to_string_lossy(),
        RepositoryKind::Standard,
        DataType::References,
    )
    .with_header(true);

    let output = gitengine(&cwd)
        .arg("worker")
        .write_stdin(encode(&shard).unwrap())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(decode_rows(&output.stdout).len(), 3);
}

#[test]
fn test_worker_reads_shard_file() {
    let cwd = TempDir::new().unwrap();
    let fixture = FixtureRepo::new();
    fixture.commit("HEAD", "first", &[("a", b"a")]);
    let shard = ShardDescriptor::new(
        fixture.path().to_string_lossy(),
        RepositoryKind::Standard,
        DataType::Repositories,
    );
    let path = cwd.path().join("shard.bin");
    fs::write(&path, encode(&shard).unwrap()).unwrap();

    let output = gitengine(&cwd).args(["worker", "--shard"]).arg(&path).output().unwrap();

    assert!(output.status.success());
    assert_eq!(decode_rows(&output.stdout).len(), 1);
}

#[test]
fn test_worker_exit_codes() {
    let cwd = TempDir::new().unwrap();

    // undecodable descriptor: process-fatal
    gitengine(&cwd)
        .arg("worker")
        .write_stdin("definitely not a shard")
        .assert()
        .code(2);

    // repository cannot be opened: shard-fatal
    let shard = ShardDescriptor::new("/nonexistent/repo", RepositoryKind::Standard, DataType::Commits);
    gitengine(&cwd)
        .arg("worker")
        .write_stdin(encode(&shard).unwrap())
        .assert()
        .code(1);
}

#[test]
fn test_pack_then_generate_partitions() {
    let cwd = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let fixtures: Vec<FixtureRepo> = (0..3).map(|_| FixtureRepo::new()).collect();
    for (i, fixture) in fixtures.iter().enumerate() {
        fixture.commit("HEAD", "first", &[("a", b"a")]);
        gitengine(&cwd)
            .arg("pack")
            .arg(fixture.path())
            .arg(repos.path().join(format!("repo{i}.siva")))
            .assert()
            .success();
    }

    let out = cwd.path().join("shards");
    gitengine(&cwd)
        .arg("generate")
        .arg(repos.path().join("**"))
        .args(["--stages", "references,commits", "--partitions", "2", "--out"])
        .arg(&out)
        .assert()
        .success();

    let first: Vec<_> = fs::read_dir(out.join("partition-0")).unwrap().collect();
    let second: Vec<_> = fs::read_dir(out.join("partition-1")).unwrap().collect();
    assert_eq!((first.len(), second.len()), (2, 1));

    let bytes = fs::read(out.join("partition-1").join("shard-00000.bin")).unwrap();
    let shard = decode(&bytes).unwrap();
    assert_eq!(shard.repo_kind, RepositoryKind::Packed);
    assert_eq!(shard.data_type, DataType::Commits);
    assert!(shard.declares(DataType::References));

    // the generated shard executes against the packed archive
    let output = gitengine(&cwd).arg("worker").write_stdin(bytes).output().unwrap();
    assert!(output.status.success());
    // header plus HEAD and refs/heads/master
    assert_eq!(decode_rows(&output.stdout).len(), 3);
}

#[test]
fn test_run_writes_tsv_and_reports_failures() {
    let cwd = TempDir::new().unwrap();
    let fixture = FixtureRepo::new();
    fixture.commit("HEAD", "first", &[("a", b"a")]);

    let output = gitengine(&cwd)
        .arg("run")
        .arg(fixture.path())
        .args(["--stages", "repositories", "--format", "tsv", "--header", "false"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let line = text.lines().next().unwrap();
    assert!(line.starts_with(&*fixture.path().to_string_lossy()));
}
