#![forbid(unsafe_code)]

//! `arbor-sim`: deterministic simulation campaigns for the chain tree.
//!
//! `arbor-sim run` executes a campaign across many seeds.
//! `arbor-sim replay` replays one seed with detailed output.

use std::env;
use std::process;

use anyhow::Result;
use arbor_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "arbor-sim", version, about = "Deterministic chain-tree simulation")]
struct Cli {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputMode::Text, global = true)]
    format: OutputMode,

    #[command(subcommand)]
    command: SimCommand,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum SimCommand {
    #[command(
        about = "Run a simulation campaign across multiple seeds",
        after_help = "EXAMPLES:\n    # Run 100 seeds with defaults\n    arbor-sim run --seeds 100\n\n\
                      # Heavier forking and longer runs\n    arbor-sim run --seeds 200 --rounds 128 --fork-rate 25\n\n\
                      # Machine-readable output\n    arbor-sim run --seeds 100 --format json"
    )]
    Run(RunArgs),

    #[command(
        about = "Replay a single seed with detailed output",
        after_help = "EXAMPLES:\n    # Replay seed 42\n    arbor-sim replay --seed 42\n\n\
                      # Replay with the parameters of a failed campaign\n    arbor-sim replay --seed 42 --rounds 128 --fork-rate 25"
    )]
    Replay(ReplayArgs),
}

/// Parameters shared by `run` and `replay`.
#[derive(Args, Debug)]
struct SimParams {
    /// Simulation rounds per seed.
    #[arg(long, default_value = "64")]
    rounds: u64,

    /// Rounds that receive new content.
    #[arg(long, default_value = "32")]
    content_rounds: u64,

    /// Number of simulated proposers.
    #[arg(long, default_value = "3")]
    proposers: usize,

    /// Content items submitted per round.
    #[arg(long, default_value = "4")]
    items: usize,

    /// Percent of proposals built on a stale tip.
    #[arg(long, default_value = "10")]
    fork_rate: u8,

    /// Percent of sends delivered twice.
    #[arg(long, default_value = "5")]
    duplicate_rate: u8,

    /// Percent of rounds whose deliveries are shuffled.
    #[arg(long, default_value = "20")]
    reorder_rate: u8,

    /// Maximum delivery delay in rounds.
    #[arg(long, default_value = "2")]
    max_delay: u8,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of seeds to run.
    #[arg(long, default_value = "100")]
    seeds: u64,

    /// Starting seed value.
    #[arg(long, default_value = "0")]
    seed_start: u64,

    #[command(flatten)]
    params: SimParams,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Seed to replay.
    #[arg(long)]
    seed: u64,

    #[command(flatten)]
    params: SimParams,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    seed: u64,
    trace_events: usize,
    proposed: u64,
    forked: u64,
    spawned_chains: u64,
    merges: u64,
    linearized: usize,
    final_bar: u64,
    oracle_passed: bool,
    violations: Vec<String>,
    interesting_state_reached: bool,
}

fn campaign_config(seed_start: u64, seeds: u64, params: &SimParams) -> CampaignConfig {
    CampaignConfig {
        seed_range: seed_start..seed_start.saturating_add(seeds),
        rounds: params.rounds,
        proposers: params.proposers,
        items_per_round: params.items,
        content_rounds: params.content_rounds,
        fork_rate_percent: params.fork_rate,
        fault_max_delay: params.max_delay,
        fault_duplicate_percent: params.duplicate_rate,
        fault_reorder_percent: params.reorder_rate,
        ..CampaignConfig::default()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ARBOR_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "arbor=debug,info"
        } else {
            "arbor=info,warn"
        })
    });
    let format = env::var("ARBOR_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);
    match format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}

fn cmd_run(args: &RunArgs, output: OutputMode) -> Result<bool> {
    let config = campaign_config(args.seed_start, args.seeds, &args.params);
    let report = run_campaign(&config)?;

    match output {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputMode::Text => {
            println!(
                "campaign seeds_run={} rounds={} proposers={} fork_rate={}%",
                report.seeds_run, args.params.rounds, args.params.proposers, args.params.fork_rate
            );
            println!(
                "results passed={} failed={} interesting_states={} linearized={}",
                report.seeds_passed,
                report.failures.len(),
                report.interesting_states_reached,
                report.blocks_linearized
            );
            for failure in report.failures.iter().take(5) {
                println!("failure seed={} violations={}", failure.seed, failure.violations.len());
                for violation in &failure.violations {
                    println!("  - {violation}");
                }
            }
            if report.failures.len() > 5 {
                println!("failures_truncated count={}", report.failures.len() - 5);
            }
            if let Some(seed) = report.first_failure {
                println!("hint arbor-sim replay --seed {seed} --rounds {}", args.params.rounds);
            }
        }
    }

    Ok(report.all_passed())
}

fn cmd_replay(args: &ReplayArgs, output: OutputMode) -> Result<bool> {
    let config = campaign_config(args.seed, 1, &args.params);
    let trace = replay_seed(args.seed, &config)?;
    let result = &trace.result;

    let out = ReplayOutput {
        seed: args.seed,
        trace_events: result.trace.len(),
        proposed: result.stats.proposed,
        forked: result.stats.forked,
        spawned_chains: result.stats.spawned_chains,
        merges: result.stats.merges,
        linearized: result.linearized.len(),
        final_bar: result.final_bar,
        oracle_passed: trace.oracle.passed,
        violations: trace.oracle.violations.iter().map(ToString::to_string).collect(),
        interesting_state_reached: result.interesting_state_reached,
    };

    match output {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&out)?),
        OutputMode::Text => {
            println!(
                "replay seed={} trace_events={} proposed={} forked={}",
                out.seed, out.trace_events, out.proposed, out.forked
            );
            println!(
                "tree spawned={} merges={} linearized={} final_bar={}",
                out.spawned_chains, out.merges, out.linearized, out.final_bar
            );
            println!("oracle passed={}", out.oracle_passed);
            for violation in &out.violations {
                println!("  - {violation}");
            }
        }
    }

    Ok(out.oracle_passed)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let passed = match &cli.command {
        SimCommand::Run(args) => cmd_run(args, cli.format)?,
        SimCommand::Replay(args) => cmd_replay(args, cli.format)?,
    };

    // Non-zero exit on any invariant failure for CI.
    if !passed {
        process::exit(1);
    }
    Ok(())
}
