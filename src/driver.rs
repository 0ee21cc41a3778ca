//! Local stand-in for a distributed engine.
//!
//! One worker thread per partition runs its shards sequentially. Every row
//! travels to the writing thread through a channel of capacity one, so a
//! slow consumer throttles every reader chain after a single row.

use crate::errors::{EngineError, Result};
use crate::executor::{self, ExecutorConfig, ShardSummary};
use crate::observability;
use crate::row::Row;
use crate::source::EncodedShard;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::io::{self, Write};
use std::path::PathBuf;

/// How rows are written to the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Length-prefixed binary frames, as a worker writes them.
    #[default]
    Binary,
    /// One tab-separated line per row.
    Tsv,
}

/// A shard that did not complete.
#[derive(Debug)]
pub struct ShardFailure {
    pub repository: PathBuf,
    pub error: EngineError,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<ShardSummary>,
    pub failed: Vec<ShardFailure>,
}

impl RunReport {
    pub fn rows(&self) -> u64 {
        self.completed.iter().map(|s| s.rows).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Message {
    Frame(Vec<u8>),
    Finished {
        repository: PathBuf,
        outcome: Result<ShardSummary>,
    },
}

/// Byte sink that forwards each flushed row frame to the channel.
struct ChannelSink<'a> {
    tx: &'a Sender<Message>,
    pending: Vec<u8>,
}

impl Write for ChannelSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let frame = std::mem::take(&mut self.pending);
        self.tx
            .send(Message::Frame(frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "row consumer is gone"))
    }
}

/// Execute every partition and write all rows to `out`.
///
/// A failed shard is recorded in the report and does not stop the others.
/// Only a failure to write `out` aborts the run.
pub fn run_local<W: Write>(
    partitions: Vec<Vec<EncodedShard>>,
    config: &ExecutorConfig,
    format: OutputFormat,
    out: &mut W,
) -> Result<RunReport> {
    let total = partitions.iter().map(Vec::len).sum();
    observability::set_progress(0, total);

    std::thread::scope(|scope| {
        let (tx, rx) = bounded(1);
        for (index, shards) in partitions.into_iter().enumerate() {
            let tx = tx.clone();
            std::thread::Builder::new()
                .name(format!("partition-{index}"))
                .spawn_scoped(scope, move || run_partition(shards, config, &tx))
                .map_err(|e| EngineError::io(format!("<partition-{index}>"), e))?;
        }
        drop(tx);
        consume(&rx, format, out)
    })
}

fn run_partition(shards: Vec<EncodedShard>, config: &ExecutorConfig, tx: &Sender<Message>) {
    for shard in shards {
        let mut sink = ChannelSink {
            tx,
            pending: Vec::new(),
        };
        let outcome = executor::execute_encoded(&shard.bytes, &mut sink, config);
        observability::increment_completed();
        let finished = Message::Finished {
            repository: shard.repository,
            outcome,
        };
        if tx.send(finished).is_err() {
            // Consumer stopped; nothing left to report to.
            return;
        }
    }
}

fn consume<W: Write>(rx: &Receiver<Message>, format: OutputFormat, out: &mut W) -> Result<RunReport> {
    let mut report = RunReport::default();
    for message in rx {
        match message {
            Message::Frame(frame) => write_frame(&frame, format, out)?,
            Message::Finished { repository, outcome } => match outcome {
                Ok(summary) => {
                    tracing::info!(
                        repository = %summary.repository,
                        data_type = %summary.data_type,
                        rows = summary.rows,
                        "shard finished"
                    );
                    report.completed.push(summary);
                }
                Err(error) => {
                    tracing::error!(repository = %repository.display(), error = %error, "shard failed");
                    report.failed.push(ShardFailure { repository, error });
                }
            },
        }
    }
    Ok(report)
}

fn write_frame<W: Write>(frame: &[u8], format: OutputFormat, out: &mut W) -> Result<()> {
    let written = match format {
        OutputFormat::Binary => out.write_all(frame),
        OutputFormat::Tsv => {
            let Some(row) = Row::read_from(&mut &frame[..])? else {
                return Ok(());
            };
            writeln!(out, "{}", row.to_tsv())
        }
    };
    written
        .and_then(|_| out.flush())
        .map_err(|source| EngineError::RowWrite { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition;
    use crate::row::RowStream;
    use crate::shard::{encode, DataType, RepositoryKind, ShardDescriptor};
    use crate::testkit::FixtureRepo;

    fn encoded(path: &str, data_type: DataType, has_header: bool) -> EncodedShard {
        let shard = ShardDescriptor::new(path, RepositoryKind::Standard, data_type).with_header(has_header);
        EncodedShard {
            repository: PathBuf::from(path),
            bytes: encode(&shard).unwrap(),
        }
    }

    #[test]
    fn test_rows_from_every_partition_reach_the_output() {
        let fixtures: Vec<FixtureRepo> = (0..3).map(|_| FixtureRepo::new()).collect();
        let shards: Vec<EncodedShard> = fixtures
            .iter()
            .map(|f| {
                f.commit("HEAD", "first", &[("a", b"a")]);
                encoded(&f.path().to_string_lossy(), DataType::References, false)
            })
            .collect();

        let mut out = Vec::new();
        let report = run_local(
            partition(shards, 2).unwrap(),
            &ExecutorConfig::default(),
            OutputFormat::Binary,
            &mut out,
        )
        .unwrap();

        assert!(report.is_success());
        assert_eq!(report.completed.len(), 3);
        // HEAD and refs/heads/master per repository
        assert_eq!(report.rows(), 6);
        let rows = RowStream::new(out.as_slice()).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn test_failed_shard_does_not_stop_the_others() {
        let fixture = FixtureRepo::new();
        fixture.commit("HEAD", "first", &[("a", b"a")]);
        let shards = vec![
            encoded("/nonexistent/repo", DataType::Commits, false),
            encoded(&fixture.path().to_string_lossy(), DataType::Commits, false),
        ];

        let mut out = Vec::new();
        let report = run_local(vec![shards], &ExecutorConfig::default(), OutputFormat::Tsv, &mut out).unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].repository, PathBuf::from("/nonexistent/repo"));
        assert_eq!(report.completed.len(), 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("first"));
    }

    #[test]
    fn test_tsv_header_line() {
        let fixture = FixtureRepo::new();
        fixture.commit("HEAD", "first", &[("a", b"a")]);
        let shards = vec![encoded(&fixture.path().to_string_lossy(), DataType::Repositories, true)];

        let mut out = Vec::new();
        run_local(vec![shards], &ExecutorConfig::default(), OutputFormat::Tsv, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().next(), Some("repositoryID\theadHash"));
        assert_eq!(text.lines().count(), 2);
    }
}
