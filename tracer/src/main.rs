use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use classify::{Pipeline, RunReport};
use rpki_validate::{CachedValidator, RipeStat};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracer_core::{log_info, log_warn, Logger, PipelineError, RouteValidator, TracingLogger, WorkerPool};

mod config;
mod logging;
mod output;

use config::{Overrides, Settings};
use output::Manifest;

/// Options shared by every command that runs the pipeline.
#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Trace utility to launch (default: tracert)
    #[arg(long)]
    program: Option<String>,
    /// Maximum hop count passed to the trace utility (default: 30)
    #[arg(long)]
    max_hops: Option<u8>,
    /// Wall-clock limit per trace in milliseconds
    #[arg(long)]
    trace_timeout_ms: Option<u64>,
    /// Bulk whois server as host:port (default: whois.cymru.com:43)
    #[arg(long, value_name = "HOST:PORT")]
    whois: Option<String>,
    /// QPS cap for validation requests; 0 disables pacing
    #[arg(long)]
    qps: Option<u32>,
    /// Query the validator for every hop, even repeated (AS, prefix) pairs
    #[arg(long, default_value_t = false)]
    no_cache: bool,
    /// Max concurrent traces (default: available parallelism)
    #[arg(long, conflicts_with = "no_parallel")]
    concurrency: Option<usize>,
    /// Trace one target at a time
    #[arg(long, default_value_t = false)]
    no_parallel: bool,
}

impl RunArgs {
    fn overrides(&self, out: Option<PathBuf>) -> Overrides {
        Overrides {
            program: self.program.clone(),
            max_hops: self.max_hops,
            trace_timeout_ms: self.trace_timeout_ms,
            whois: self.whois.clone(),
            qps: self.qps,
            no_cache: self.no_cache,
            concurrency: self.concurrency,
            no_parallel: self.no_parallel,
            out,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "rpki-tracer", version, about = "Trace paths and check RPKI origin validity of every hop")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./rpki-tracer.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug-level logging unless RUST_LOG is set
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    /// Directory for rpki-tracer.log
    #[arg(long, global = true, default_value = ".")]
    log_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Trace targets, resolve hops and validate their origins
    Run {
        /// Target hosts or IPs
        #[arg(conflicts_with = "targets")]
        target: Vec<String>,
        /// File with newline-delimited targets (comments with # and blanks ignored)
        #[arg(long, value_name = "FILE")]
        targets: Option<PathBuf>,
        /// Output directory (default: ./output)
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        #[command(flatten)]
        opts: RunArgs,
    },
    /// Run this worker's share of a regional batch
    #[cfg(feature = "distributed")]
    Distribute {
        /// JSON array of [region, [address, ...]] pairs
        #[arg(long, value_name = "FILE")]
        regions: PathBuf,
        /// Number of cooperating workers
        #[arg(long)]
        workers: usize,
        /// This worker's index, from 0
        #[arg(long)]
        index: usize,
        /// Each region writes to <root>/<region>
        #[arg(long, value_name = "DIR", default_value = "Outputs")]
        root: PathBuf,
        /// Re-run regions whose output directory already exists
        #[arg(long, default_value_t = false)]
        force: bool,
        #[command(flatten)]
        opts: RunArgs,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Commands::Version = cli.command {
        println!("rpki-tracer {} (core {})", env!("CARGO_PKG_VERSION"), tracer_core::version());
        return ExitCode::SUCCESS;
    }
    let _guard = match logging::init_logging(&cli.log_dir, cli.verbose) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("cannot open log file in {}: {}", cli.log_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.downcast_ref::<PipelineError>().is_some_and(PipelineError::is_cancelled) {
                tracing::warn!("Run interrupted; no results written");
            } else {
                tracing::error!("{:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let loaded_cfg = config::load_config(cli.config.as_deref())?;
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
    match cli.command {
        Commands::Version => Ok(()),
        Commands::Run { target, targets, out, opts } => {
            let targets_list = match targets {
                Some(path) => parse_target_list(&std::fs::read_to_string(&path)?),
                None => target,
            };
            if targets_list.is_empty() {
                return Err(anyhow!("provide a target or --targets <file>"));
            }
            let settings = Settings::resolve(&opts.overrides(out), loaded_cfg.as_ref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let cancel = cancel_on_ctrl_c();
                run_batch(&settings, &targets_list, &settings.out, &cancel, logger.clone()).await.map(|_| ())
            })
        }
        #[cfg(feature = "distributed")]
        Commands::Distribute { regions, workers, index, root, force, opts } => {
            let all = partition::parse_regions(&std::fs::read_to_string(&regions)?)?;
            let group = partition::select_group(all.len(), workers, index)?;
            log_info!(
                logger,
                "Worker {} of {}: {} region(s) {:?}",
                index,
                workers,
                group.len(),
                group.indices().collect::<Vec<_>>()
            );
            let todo = partition::pending(&all, &group, &root, force, &*logger);
            let settings = Settings::resolve(&opts.overrides(None), loaded_cfg.as_ref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let cancel = cancel_on_ctrl_c();
                for job in todo {
                    log_info!(logger, "Region {}: {} address(es)", job.region.label, job.region.addresses.len());
                    run_batch(&settings, &job.region.addresses, &job.out_dir, &cancel, logger.clone()).await?;
                }
                Ok::<(), anyhow::Error>(())
            })
        }
    }
}

/// Blank lines and `#` comments are skipped.
fn parse_target_list(s: &str) -> Vec<String> {
    s.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty() && !l.starts_with('#')).collect()
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling outstanding traces");
            trigger.cancel();
        }
    });
    token
}

fn build_pipeline(settings: &Settings) -> Result<Pipeline> {
    let ripe = RipeStat::new(settings.validate.clone())?;
    let validator: Arc<dyn RouteValidator> =
        if settings.cache { Arc::new(CachedValidator::new(ripe)) } else { Arc::new(ripe) };
    let mut pool = WorkerPool::new().with_poll_interval(settings.poll_interval);
    if let Some(n) = settings.concurrency {
        pool = pool.with_concurrency(n);
    }
    Ok(Pipeline {
        tracer: Arc::new(settings.trace.clone()),
        lookup: Arc::new(settings.lookup.clone()),
        validator,
        pool,
    })
}

async fn run_batch(
    settings: &Settings,
    targets: &[String],
    out: &Path,
    cancel: &CancellationToken,
    logger: Arc<dyn Logger>,
) -> Result<RunReport> {
    let started_at = output::now_rfc3339();
    let started = Instant::now();
    let pipeline = build_pipeline(settings)?;
    log_info!(logger, "Tracing {} target(s) with `{}`", targets.len(), settings.trace.command_line("<target>"));
    let report = pipeline.run(targets, cancel, logger.clone()).await?;

    let manifest = Manifest {
        version: tracer_core::version(),
        started_at,
        ended_at: output::now_rfc3339(),
        duration_ms: started.elapsed().as_millis() as u64,
        targets: targets.len(),
        trace_command: settings.trace.command_line("<target>"),
        whois_server: settings.lookup.server.clone(),
        validator: settings.validate.base_url.clone(),
    };
    output::write_report(out, &report, &manifest)?;
    let incomplete = report.records.iter().filter(|r| !r.completed).count();
    if incomplete > 0 {
        log_warn!(logger, "{} of {} trace(s) did not reach their destination", incomplete, report.records.len());
    }
    log_info!(logger, "Results written to {}", out.display());
    Ok(report)
}
