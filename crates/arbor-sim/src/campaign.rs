//! Campaign runner for deterministic simulation campaigns.
//!
//! Runs many seeds with one parameter set, checks each final state with the
//! [`LedgerOracle`] and remembers the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use arbor_core::BlockId;
use serde::{Deserialize, Serialize};

use crate::delivery::FaultConfig;
use crate::oracle::{InvariantViolation, LedgerOracle, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Campaign-level configuration: which seeds to run and the simulation
/// parameters shared by all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    pub rounds: u64,
    pub proposers: usize,
    pub items_per_round: usize,
    /// Rounds that receive content before the drain phase.
    pub content_rounds: u64,
    pub fork_rate_percent: u8,
    pub explore_rate_percent: u8,
    pub invalidate_rate_percent: u8,
    /// Maximum delivery delay in rounds.
    pub fault_max_delay: u8,
    pub fault_duplicate_percent: u8,
    pub fault_reorder_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            rounds: sim.rounds,
            proposers: sim.proposers,
            items_per_round: sim.items_per_round,
            content_rounds: sim.content_rounds,
            fork_rate_percent: sim.fork_rate_percent,
            explore_rate_percent: sim.explore_rate_percent,
            invalidate_rate_percent: sim.invalidate_rate_percent,
            fault_max_delay: sim.fault.max_delay_rounds,
            fault_duplicate_percent: sim.fault.duplicate_rate_percent,
            fault_reorder_percent: sim.fault.reorder_rate_percent,
        }
    }
}

impl CampaignConfig {
    /// Build a [`SimulationConfig`] for a specific seed.
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            rounds: self.rounds,
            proposers: self.proposers,
            items_per_round: self.items_per_round,
            content_rounds: self.content_rounds,
            fork_rate_percent: self.fork_rate_percent,
            explore_rate_percent: self.explore_rate_percent,
            invalidate_rate_percent: self.invalidate_rate_percent,
            fault: FaultConfig {
                max_delay_rounds: self.fault_max_delay,
                duplicate_rate_percent: self.fault_duplicate_percent,
                reorder_rate_percent: self.fault_reorder_percent,
            },
            ..SimulationConfig::default()
        }
    }

    /// Validate configuration before running.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.proposers == 0 {
            bail!("proposers must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.content_rounds > self.rounds {
            bail!(
                "content_rounds ({}) must not exceed rounds ({})",
                self.content_rounds,
                self.rounds
            );
        }
        Ok(())
    }
}

/// Failure details for a single seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that both split and merged a chain.
    pub interesting_states_reached: usize,
    /// Blocks in the global order, summed over all seeds.
    pub blocks_linearized: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Everything produced by replaying one seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
    /// Ids of the global order, for diffing two replays.
    pub linearized_ids: Vec<BlockId>,
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
        blocks_linearized: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let (result, oracle) = simulate(seed, config)?;

        if result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }
        report.blocks_linearized += result.linearized.len();

        if oracle.passed {
            report.seeds_passed += 1;
        } else {
            tracing::warn!(seed, violations = oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: oracle.violations.iter().map(format_violation).collect(),
            });
        }
    }

    Ok(report)
}

/// Run a single seed and return `Ok(())` on pass, `Err(violations)` on
/// failure.
///
/// # Errors
///
/// Returns an `anyhow::Error` if the simulation itself fails. The inner
/// `Result` distinguishes pass from invariant violations.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let (_, oracle) = simulate(seed, config)?;
    if oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(oracle.violations))
    }
}

/// Replay a single seed with full trace details for debugging.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let (result, oracle) = simulate(seed, config)?;
    let linearized_ids = result.linearized.iter().map(|block| block.id()).collect();
    Ok(DetailedTrace {
        result,
        oracle,
        linearized_ids,
    })
}

fn simulate(seed: u64, config: &CampaignConfig) -> Result<(SimulationResult, OracleResult)> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = LedgerOracle::check_all(&result);
    Ok((result, oracle))
}

fn format_violation(violation: &InvariantViolation) -> String {
    violation.to_string()
}
