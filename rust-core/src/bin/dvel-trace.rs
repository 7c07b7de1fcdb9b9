// Thin command-line adapter over the dvel_trace library. Inputs are explicit
// paths; stdout carries only the contract lines, logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dvel_trace::{MergedTrace, NodeTrace, RunConfig, check_trace, commit_trace, merge, replay_trace};
use dvel_trace::pipeline::verify;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dvel-trace", about = "Merge, check and commit DVEL simulator traces")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge per-node trace files into one merged trace.
    Merge(MergeArgs),
    /// Check protocol invariants of a merged trace.
    Check { trace: PathBuf },
    /// Print the trace commitment of a merged trace.
    Commit { trace: PathBuf },
    /// Replay each node's ledger and compare recorded snapshots.
    Replay { trace: PathBuf },
    /// Check and commit concurrently.
    Verify { trace: PathBuf },
}

#[derive(Args)]
struct MergeArgs {
    /// Per-node trace files (JSON arrays of rows).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(long, default_value = "merged_trace.json")]
    out: PathBuf,
    /// JSON run configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    protocol_version: Option<u32>,
    #[arg(long)]
    skew: Option<u64>,
    #[arg(long)]
    max_pending: Option<u64>,
    #[arg(long)]
    max_drain: Option<u64>,
    #[arg(long)]
    warmup: Option<u64>,
    #[arg(long)]
    quarantine: Option<u64>,
    #[arg(long)]
    fixed_point_scale: Option<u64>,
    #[arg(long)]
    max_link_walk: Option<u64>,
}

impl MergeArgs {
    fn run_config(&self) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("loading run config {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(v) = self.protocol_version {
            cfg.protocol_version = v;
        }
        if let Some(v) = self.skew {
            cfg.max_backward_skew = v;
        }
        if let Some(v) = self.max_pending {
            cfg.max_pending_total = v;
        }
        if let Some(v) = self.max_drain {
            cfg.max_drain_steps = v;
        }
        let sybil = &mut cfg.sybil_config;
        if let Some(v) = self.warmup {
            sybil.warmup_ticks = v;
        }
        if let Some(v) = self.quarantine {
            sybil.quarantine_ticks = v;
        }
        if let Some(v) = self.fixed_point_scale {
            sybil.fixed_point_scale = v;
        }
        if let Some(v) = self.max_link_walk {
            sybil.max_link_walk = v;
        }
        Ok(cfg)
    }
}

fn load(path: &Path) -> Result<MergedTrace> {
    MergedTrace::load(path).with_context(|| format!("reading {}", path.display()))
}

fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Command::Merge(args) => {
            let run = args.run_config()?;
            let inputs = args
                .inputs
                .iter()
                .map(|p| NodeTrace::load(p).with_context(|| format!("reading {}", p.display())))
                .collect::<Result<Vec<_>>>()?;
            let merged = merge(inputs, &run)?;
            merged
                .store(&args.out)
                .with_context(|| format!("writing {}", args.out.display()))?;
            println!(
                "Wrote merged trace with {} rows to {}",
                merged.len(),
                args.out.display()
            );
            Ok(true)
        }
        Command::Check { trace } => {
            let report = check_trace(&load(&trace)?)?;
            for v in &report.violations {
                println!("{v}");
            }
            if report.is_ok() {
                println!("{}", report.summary());
            } else {
                eprintln!("{}", report.summary());
            }
            Ok(report.is_ok())
        }
        Command::Commit { trace } => {
            let commitment = commit_trace(&load(&trace)?)?;
            println!("{}", commitment.line());
            Ok(true)
        }
        Command::Replay { trace } => {
            let report = replay_trace(&load(&trace)?)?;
            for f in &report.findings {
                println!("{f}");
            }
            if report.is_ok() {
                println!("OK: replayed {} rows across {} nodes", report.rows, report.nodes);
            } else {
                eprintln!("Found {} replay findings", report.findings.len());
            }
            Ok(report.is_ok())
        }
        Command::Verify { trace } => {
            let trace = load(&trace)?;
            let verdict = verify(&trace);
            let report = verdict.report?;
            for v in &report.violations {
                println!("{v}");
            }
            println!("{}", report.summary());
            let commitment = verdict.commitment?;
            println!("{}", commitment.line());
            Ok(report.is_ok())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
