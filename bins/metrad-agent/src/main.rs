mod agent;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use metrad_control::ControlConfig;
use metrad_scheduler::SchedulerConfig;
use metrad_tribe::TribeConfig;

use agent::Agent;

/// metrad telemetry agent
#[derive(Parser, Debug)]
#[command(name = "metrad-agent", version, about = "A distributed telemetry agent")]
struct Args {
    /// Disable the agent management API
    #[arg(short = 'd', long)]
    disable_api: bool,

    /// Management API port
    #[arg(short = 'p', long, default_value_t = 8181)]
    api_port: u16,

    /// Max worker threads for the runtime (0 = number of cores)
    #[arg(short = 'c', long, default_value_t = 1)]
    max_procs: usize,

    /// Maximum number of running instances per loaded plugin
    #[arg(short = 'm', long, default_value_t = 3, env = "METRAD_MAX_PLUGINS")]
    max_running_plugins: usize,

    /// 1-5 (Debug, Info, Warning, Error, Fatal)
    #[arg(short = 'l', long, default_value_t = 2, env = "METRAD_LOG_LEVEL")]
    log_level: u8,

    /// Directory for logs; empty logs to stdout
    #[arg(short = 'o', long, env = "METRAD_LOG_PATH")]
    log_path: Option<PathBuf>,

    /// Auto-discover plugin paths separated by colons
    #[arg(short = 'a', long, env = "METRAD_AUTOLOAD_PATH")]
    auto_discover: Option<String>,

    /// Join a tribe cluster
    #[arg(long)]
    tribe: bool,

    /// Name of this node within the tribe
    #[arg(long, default_value = "")]
    tribe_name: String,

    /// Seed node to join the tribe through
    #[arg(long)]
    tribe_seed: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if logging::level_directive(args.log_level).is_none() {
        eprintln!("log level was invalid (needs: 1-5)");
        return ExitCode::FAILURE;
    }

    let workers = if args.max_procs == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        args.max_procs
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    let _log_guard = logging::init(args.log_level, args.log_path.clone());
    info!(version = env!("CARGO_PKG_VERSION"), "starting metrad-agent");

    if args.disable_api {
        info!("management API disabled");
    } else {
        info!(port = args.api_port, "management API delegated to the transport collaborator");
    }

    let control = ControlConfig {
        max_running_plugins: args.max_running_plugins,
        plugin_log_dir: args.log_path.clone(),
        ..Default::default()
    };

    let discover_paths: Vec<PathBuf> = args
        .auto_discover
        .as_deref()
        .unwrap_or("")
        .split(':')
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect();

    let mut agent = match Agent::new(control, SchedulerConfig::default(), discover_paths) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "agent construction failed");
            return ExitCode::FAILURE;
        }
    };

    let tribe_config = if args.tribe {
        let name = if args.tribe_name.is_empty() {
            hostname()
        } else {
            args.tribe_name.clone()
        };
        let mut config = TribeConfig::named(name);
        config.seed = args.tribe_seed.clone();
        Some(config)
    } else {
        None
    };

    if let Err(e) = agent.start(tribe_config).await {
        error!(error = %e, "agent start failed");
        return ExitCode::FAILURE;
    }

    wait_for_shutdown_signal().await;
    agent.stop().await;
    ExitCode::SUCCESS
}

/// Wait for a shutdown signal (CTRL+C or SIGTERM).
async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = ctrl_c => { info!("received CTRL+C"); }
        _ = sigterm.recv() => { info!("received SIGTERM"); }
    }
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "metrad-node".to_string())
}
