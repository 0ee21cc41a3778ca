use crate::driver::OutputFormat;
use crate::shard::{DataType, StageOptions, TagPolicy};
use crate::source::GitSource;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gitengine")]
#[command(about = "Extract repositories, references, commits, trees and blobs as a sharded row stream", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); GITENGINE_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one encoded shard and write its rows to stdout
    Worker {
        /// Encoded shard file; reads stdin when omitted or "-"
        #[arg(long)]
        shard: Option<PathBuf>,

        /// Parent directory for packed archive mounts
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },

    /// Generate, partition and execute shards locally
    Run {
        #[command(flatten)]
        query: QueryArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "binary")]
        format: OutputFormat,

        /// Parent directory for packed archive mounts
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },

    /// Write encoded shards into partition-<i>/ directories
    Generate {
        #[command(flatten)]
        query: QueryArgs,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Pack a repository directory into a single-file archive
    Pack {
        /// Repository (work tree or bare)
        repository: PathBuf,

        /// Archive to write
        archive: PathBuf,
    },
}

/// What to extract and from where.
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Source path; a trailing "**" searches the parent directory's subtree
    pub source: PathBuf,

    /// Stages in dependency order; the last one is extracted
    #[arg(short, long, value_delimiter = ',', default_value = "repositories")]
    pub stages: Vec<DataType>,

    /// Exact reference names to restrict to
    #[arg(long = "filter-refs", value_delimiter = ',')]
    pub filter_refs: Vec<String>,

    /// Walk the full history of each reference instead of its tip
    #[arg(long)]
    pub all_commits: bool,

    /// Number of partitions (overrides the config file)
    #[arg(short, long)]
    pub partitions: Option<usize>,

    /// Emit a header row per shard (overrides the config file)
    #[arg(long)]
    pub header: Option<bool>,

    /// Annotated tag handling: dereference or skip (overrides the config file)
    #[arg(long)]
    pub tag_policy: Option<TagPolicy>,
}

impl QueryArgs {
    /// Build the source, filling unset flags from file values and defaults.
    pub fn to_source(&self, config: &crate::config::EngineConfig) -> GitSource {
        let source = self.stages.iter().fold(
            GitSource::new(&self.source, self.partitions.unwrap_or_else(|| config.partitions())),
            |source, data_type| source.stage(*data_type, StageOptions::default()),
        );
        let source = source
            .filter_refs(self.filter_refs.iter().cloned())
            .with_header(self.header.unwrap_or_else(|| config.has_header()))
            .tag_policy(self.tag_policy.unwrap_or_else(|| config.tag_policy()));
        if self.all_commits {
            source.all_commits()
        } else {
            source
        }
    }
}
