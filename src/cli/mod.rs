use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::bench::{BenchKind, BenchmarkRunner};
use crate::capability::{CapabilityDetector, SystemProbes, known_capabilities};
use crate::collectors::{self, CollectContext, Collector};
use crate::engine::{Engine, EngineOptions};
use crate::exec::{CancelToken, SystemRunner};
use crate::files::SystemFiles;
use crate::render::RenderOptions;

#[derive(Debug, Parser)]
#[command(
    name = "hwdoctor",
    version,
    about = "Hardware and system health checks that degrade gracefully when vendor tools are missing"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Per-command timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
    /// Collector worker threads (1 = sequential).
    #[arg(long, global = true)]
    pub jobs: Option<usize>,
    #[arg(long, global = true)]
    pub evidence: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// RAID controllers, md arrays and ZFS pools
    Raid,
    /// Mounted filesystems, SMART health and disk usage
    Storage,
    /// GPUs and display outputs
    Graphics,
    /// Link state, routes and interface errors
    Network,
    /// Load, memory, temperatures and failed services
    System,
    /// Kernel and journal error scan
    Logs,
    /// Every collector in one report
    All,
    /// Duration-bounded load test with metric sampling
    Benchmark(BenchmarkArgs),
    /// Show which external tools hwdoctor can use on this host
    Capabilities,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct BenchmarkArgs {
    /// storage | graphics | system
    pub kind: String,
    #[arg(long, default_value_t = 10)]
    pub duration: u64,
    #[arg(long, default_value_t = 1)]
    pub interval: u64,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let home_dir = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"));

    let env_config_path = std::env::var_os("HWDOCTOR_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    match &cli.command {
        Commands::Completion(args) => return completion(args),
        Commands::Config(args) => return show_config(args, &cfg, &cli),
        _ => {}
    }

    let timeout_secs = cli.timeout.unwrap_or(cfg.run.timeout_secs);
    if timeout_secs == 0 {
        return Err(crate::exit::invalid_args(
            "timeout must be at least 1 second",
        ));
    }
    let timeout = Duration::from_secs(timeout_secs);
    let jobs = cli.jobs.unwrap_or(cfg.run.jobs).max(1);
    let color = io::stdout().is_terminal() && cfg.report.color && !cli.no_color;

    let runner = SystemRunner;
    let detector = CapabilityDetector::new(Box::new(SystemProbes::from_env()));
    let files = SystemFiles;
    // An unreadable mount table only silences the per-mount checks.
    let mounts = crate::mounts::load_mounts(&files, std::path::Path::new("/proc/mounts"))
        .unwrap_or_default();
    // TODO: wire SIGINT to this token so ctrl-c interrupts a running benchmark cleanly.
    let cancel = CancelToken::new();

    let ctx = CollectContext {
        runner: &runner,
        detector: &detector,
        files: &files,
        mounts: &mounts,
        display_server: cfg.graphics.display_server,
        timeout,
        deadline: None,
        cancel: &cancel,
    };

    if let Commands::Capabilities = &cli.command {
        return capabilities(&ctx, cli.json);
    }

    let selected = select_collectors(&cli.command)?;
    let engine = Engine::new(EngineOptions {
        jobs,
        show_progress: io::stderr().is_terminal() && !cli.quiet && !cli.json,
    });
    let report = engine.collect(&selected, &ctx);

    if cli.json {
        println!("{}", crate::render::render_json(&report)?);
    } else if !cli.quiet {
        let opts = RenderOptions {
            color,
            include_evidence: cli.evidence || cfg.report.include_evidence || cli.verbose,
        };
        print!("{}", crate::render::render_text(&report, &opts));
    }

    // Critical findings are data, not failures: completion is exit 0.
    Ok(())
}

fn select_collectors(command: &Commands) -> Result<Vec<Box<dyn Collector + Send + Sync>>> {
    let selected: Vec<Box<dyn Collector + Send + Sync>> = match command {
        Commands::Raid => vec![Box::new(collectors::RaidCollector)],
        Commands::Storage => vec![Box::new(collectors::StorageCollector)],
        Commands::Graphics => vec![Box::new(collectors::GraphicsCollector)],
        Commands::Network => vec![Box::new(collectors::NetworkCollector)],
        Commands::System => vec![Box::new(collectors::SystemCollector)],
        Commands::Logs => vec![Box::new(collectors::LogsCollector)],
        Commands::All => collectors::all_collectors(),
        Commands::Benchmark(args) => {
            let kind = args
                .kind
                .parse::<BenchKind>()
                .map_err(crate::exit::invalid_args)?;
            if args.duration == 0 {
                return Err(crate::exit::invalid_args(
                    "benchmark: --duration must be greater than zero",
                ));
            }
            if args.interval == 0 {
                return Err(crate::exit::invalid_args(
                    "benchmark: --interval must be greater than zero",
                ));
            }
            let bench = BenchmarkRunner::new(
                kind,
                Duration::from_secs(args.duration),
                Duration::from_secs(args.interval),
            )
            .map_err(crate::exit::invalid_args_err)?;
            vec![Box::new(bench)]
        }
        Commands::Capabilities | Commands::Completion(_) | Commands::Config(_) => {
            unreachable!("handled before collector selection")
        }
    };
    Ok(selected)
}

fn capabilities(ctx: &CollectContext, json: bool) -> Result<()> {
    let caps = known_capabilities();
    if json {
        let entries: Vec<serde_json::Value> = caps
            .iter()
            .map(|cap| {
                serde_json::json!({
                    "name": cap.name,
                    "present": ctx.detector.has(cap),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for cap in caps {
        let present = if ctx.detector.has(&cap) {
            "present"
        } else {
            "absent"
        };
        println!("{:<16} {present}", cap.name);
    }
    Ok(())
}

fn completion(args: &CompletionArgs) -> Result<()> {
    let shell = args
        .shell
        .parse::<clap_complete::Shell>()
        .map_err(crate::exit::invalid_args)?;
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "hwdoctor", &mut io::stdout());
    Ok(())
}

fn show_config(args: &ConfigArgs, cfg: &crate::config::EffectiveConfig, cli: &Cli) -> Result<()> {
    if !args.show {
        return Err(crate::exit::invalid_args(
            "config: nothing to do (did you mean --show?)",
        ));
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(cfg)?);
    } else {
        print!("{}", toml::to_string_pretty(cfg).map_err(anyhow::Error::from)?);
    }
    Ok(())
}
