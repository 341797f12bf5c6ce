use crate::bench::{self, RunConfig, DEFAULT_CLIENTS, DEFAULT_TOTAL_OPS};
use crate::client::RedisStore;
use crate::{OpKind, StressError};
use clap::ValueHint::FilePath;
use clap::{Args, Parser, Subcommand};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use log::{debug, error};
use serde::Deserialize;
use std::fs::read_to_string;

/// The configuration of a run, deserialized from a TOML string merged with `KVSTRESS_`-prefixed
/// environment variables. All fields are optional here; the target `url` must be present in one
/// of the sources (or given on the command line) and everything else falls back to defaults.
#[derive(Deserialize, Clone, Debug)]
pub struct StressOpt {
    /// Target store URL, e.g. `redis://127.0.0.1:6379`.
    pub url: Option<String>,

    /// Number of pooled connections. Default: 100.
    pub clients: Option<usize>,

    /// Total operation budget, split evenly across the operation kinds. Default: 100000.
    pub total_ops: Option<u64>,

    /// Max operations concurrently in flight within a phase. Default: `clients * 10`.
    pub batch: Option<u64>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(short = 'c')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the stress TOML config file")]
    config: Option<String>,

    #[arg(short = 'u')]
    #[arg(help = "Target store URL (overrides the config file and environment)")]
    url: Option<String>,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the stress workload")]
    Run(RunArgs),
    #[command(about = "List the operation kinds in phase order")]
    Kinds,
}

/// Parse a [`StressOpt`] from a TOML string, with environment variables taking precedence.
pub fn init(text: &str) -> Result<StressOpt, StressError> {
    Figment::new()
        .merge(Toml::string(text))
        .merge(Env::prefixed("KVSTRESS_"))
        .extract()
        .map_err(|e| StressError::Config(e.to_string()))
}

/// Resolve the target URL and a validated [`RunConfig`] from parsed options and an optional
/// command-line override. Fails before anything connects when the URL is missing.
fn build(url_flag: Option<String>, opt: StressOpt) -> Result<(String, RunConfig), StressError> {
    let url = url_flag.or(opt.url).ok_or_else(|| {
        StressError::Config(
            "target url is required (set `url` in the config file, KVSTRESS_URL, or pass -u)"
                .to_string(),
        )
    })?;
    let clients = opt.clients.unwrap_or(DEFAULT_CLIENTS);
    let total_ops = opt.total_ops.unwrap_or(DEFAULT_TOTAL_OPS);
    let batch = opt.batch.unwrap_or(clients as u64 * 10);
    let config = RunConfig::new(clients, total_ops, batch)?;
    Ok((url, config))
}

fn run_cli(args: &RunArgs) -> Result<(), StressError> {
    let text = match &args.config {
        Some(path) => read_to_string(path)
            .map_err(|e| StressError::Config(format!("cannot read {}: {}", path, e)))?,
        None => String::new(),
    };
    let opt = init(&text)?;
    debug!("resolved stress options: {:?}", opt);
    let (url, config) = build(args.url.clone(), opt)?;
    let store = RedisStore::new(&url).map_err(StressError::Connect)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(bench::run(&store, &config))
}

fn kinds_cli() {
    for kind in OpKind::ALL {
        println!("{}", kind);
    }
}

/// The default command line interface.
///
/// ## Usage
///
/// ```bash
/// kvstress run [-c CONFIG] [-u URL]
/// ```
///
/// Where `CONFIG` is an optional TOML file with the options of [`StressOpt`]; every option can
/// also be given through the environment as `KVSTRESS_URL`, `KVSTRESS_CLIENTS`,
/// `KVSTRESS_TOTAL_OPS` and `KVSTRESS_BATCH`. The target URL is the only required value.
///
/// ```bash
/// kvstress kinds
/// ```
///
/// Lists the five operation kinds in the order their phases run.
///
/// The process exits 0 on normal completion and non-zero on a fatal startup error (missing
/// configuration, pool connect failure) or an unhandled fault, after logging the error.
pub fn cmdline() {
    env_logger::init();
    let cli = Cli::parse();
    debug!("starting kvstress with args: {:?}", cli);
    let result = match cli.command {
        Commands::Run(args) => run_cli(&args),
        Commands::Kinds => {
            kinds_cli();
            Ok(())
        }
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
