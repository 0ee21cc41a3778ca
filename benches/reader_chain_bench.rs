use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gitengine::executor::{execute, ExecutorConfig};
use gitengine::shard::{DataType, RepositoryKind, ShardDescriptor, StageOptions};
use gitengine::testkit::FixtureRepo;
use std::hint::black_box;

fn create_history(commits: usize, files: usize) -> FixtureRepo {
    let fixture = FixtureRepo::new();
    for i in 0..commits {
        let contents: Vec<(String, Vec<u8>)> = (0..files)
            .map(|f| {
                (
                    format!("src/module_{}/file_{}.rs", f % 4, f),
                    format!("pub fn f_{}() -> usize {{ {} }}\n", f, i).into_bytes(),
                )
            })
            .collect();
        let entries: Vec<(&str, &[u8])> = contents
            .iter()
            .map(|(path, body)| (path.as_str(), body.as_slice()))
            .collect();
        fixture.commit("HEAD", &format!("commit {i}"), &entries);
    }
    fixture
}

fn shard_for(fixture: &FixtureRepo, data_type: DataType) -> ShardDescriptor {
    ShardDescriptor::new(fixture.path().to_string_lossy(), RepositoryKind::Standard, data_type)
        .with_nested(DataType::References, StageOptions::default())
        .with_all_commits(true)
}

fn bench_commit_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_history");
    let config = ExecutorConfig::default();

    for commits in [10, 50, 200] {
        let fixture = create_history(commits, 4);
        let shard = shard_for(&fixture, DataType::Commits);
        group.bench_with_input(BenchmarkId::from_parameter(commits), &shard, |b, shard| {
            b.iter(|| {
                let mut sink = Vec::new();
                let summary = execute(black_box(shard), &mut sink, &config).unwrap();
                black_box(summary.rows)
            })
        });
    }

    group.finish();
}

fn bench_file_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_walk");
    let config = ExecutorConfig::default();

    for files in [16, 64, 256] {
        let fixture = create_history(5, files);
        for data_type in [DataType::Trees, DataType::Blobs] {
            let shard = shard_for(&fixture, data_type);
            group.bench_with_input(BenchmarkId::new(data_type.as_str(), files), &shard, |b, shard| {
                b.iter(|| {
                    let mut sink = Vec::new();
                    let summary = execute(black_box(shard), &mut sink, &config).unwrap();
                    black_box(summary.rows)
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_commit_history, bench_file_walk);
criterion_main!(benches);
