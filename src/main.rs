use anyhow::{Context, Result};
use clap::Parser;
use gitengine::cli::{Cli, Commands, QueryArgs};
use gitengine::config::{load_config, EngineConfig};
use gitengine::driver::{run_local, OutputFormat};
use gitengine::errors::EngineError;
use gitengine::executor::{execute_encoded, ExecutorConfig};
use gitengine::observability::{init_logging, install_panic_hook};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> ExitCode {
    install_panic_hook();
    let cli = Cli::parse();
    let config = load_config();
    init_logging(cli.verbose, config.log_level());

    match dispatch(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            let code = e.downcast_ref::<EngineError>().map(EngineError::exit_code).unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn dispatch(command: Commands, config: &EngineConfig) -> Result<ExitCode> {
    match command {
        Commands::Worker { shard, scratch_dir } => {
            let executor = executor_config(scratch_dir, config);
            worker(shard.as_deref(), &executor)
        }
        Commands::Run {
            query,
            format,
            scratch_dir,
        } => {
            let executor = executor_config(scratch_dir, config);
            run(&query, config, &executor, format)
        }
        Commands::Generate { query, out } => generate(&query, config, &out),
        Commands::Pack { repository, archive } => {
            let files = gitengine::archive::pack(&repository, &archive)
                .with_context(|| format!("could not pack {}", repository.display()))?;
            eprintln!("packed {files} files into {}", archive.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn executor_config(scratch_dir: Option<PathBuf>, config: &EngineConfig) -> ExecutorConfig {
    ExecutorConfig {
        scratch_dir: scratch_dir.or_else(|| config.scratch_dir()),
    }
}

fn worker(shard: Option<&Path>, executor: &ExecutorConfig) -> Result<ExitCode> {
    let bytes = match shard {
        Some(path) if path != Path::new("-") => {
            std::fs::read(path).with_context(|| format!("could not read shard {}", path.display()))?
        }
        _ => {
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .context("could not read shard from stdin")?;
            bytes
        }
    };

    let stdout = std::io::stdout();
    let mut sink = stdout.lock();
    let summary = execute_encoded(&bytes, &mut sink, executor)?;
    tracing::debug!(rows = summary.rows, "worker finished");
    Ok(ExitCode::SUCCESS)
}

fn run(query: &QueryArgs, config: &EngineConfig, executor: &ExecutorConfig, format: OutputFormat) -> Result<ExitCode> {
    let partitions = query.to_source(config).partition()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let report = run_local(partitions, executor, format, &mut out)?;
    out.flush().context("could not flush output")?;

    for failure in &report.failed {
        eprintln!(
            "shard {} failed: {}",
            failure.repository.display(),
            failure_chain(&failure.error)
        );
    }
    tracing::info!(
        completed = report.completed.len(),
        failed = report.failed.len(),
        rows = report.rows(),
        "run finished"
    );
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Render an error with its source chain, one cause per segment.
fn failure_chain(error: &EngineError) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn generate(query: &QueryArgs, config: &EngineConfig, out: &Path) -> Result<ExitCode> {
    let partitions = query.to_source(config).partition()?;

    let mut written = 0usize;
    for (index, shards) in partitions.iter().enumerate() {
        let dir = out.join(format!("partition-{index}"));
        std::fs::create_dir_all(&dir).with_context(|| format!("could not create {}", dir.display()))?;
        for (position, shard) in shards.iter().enumerate() {
            let path = dir.join(format!("shard-{position:05}.bin"));
            std::fs::write(&path, &shard.bytes).with_context(|| format!("could not write {}", path.display()))?;
            written += 1;
        }
    }
    eprintln!("wrote {written} shards into {} partitions under {}", partitions.len(), out.display());
    Ok(ExitCode::SUCCESS)
}
