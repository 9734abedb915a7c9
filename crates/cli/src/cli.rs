use std::path::PathBuf;

use clap::Parser;

/// Run the hashgrid arbiter against a simulated worker pool.
///
/// Drives the round loop, feeds it a synthetic workload, and prints
/// per-round telemetry, results and drop records as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "hashgrid", about = "Work arbiter for a fixed pool of hash-search workers")]
pub struct CliArgs {
    /// Path to config file (default: ./hashgrid.toml if present)
    #[arg(long, env = "HASHGRID_CONFIG")]
    pub config: Option<PathBuf>,

    /// Worker pool size override
    #[arg(long)]
    pub workers: Option<usize>,

    /// Round interval override, in milliseconds
    #[arg(long)]
    pub round_interval_ms: Option<u64>,

    /// Power budget override, in watts
    #[arg(long)]
    pub power_budget: Option<f64>,

    /// Stop after this many rounds (runs until Ctrl-C if unset)
    #[arg(long)]
    pub rounds: Option<u64>,

    /// Work items submitted per round interval
    #[arg(long, default_value = "8")]
    pub submit_rate: usize,

    /// Leading zero bits a hash needs to count as Found
    #[arg(long, default_value = "16")]
    pub difficulty: u32,

    /// Nonces a simulated worker scans per assignment
    #[arg(long, default_value = "50000")]
    pub scan_budget: u64,

    /// Threads backing the simulated pool (default: rayon's choice)
    #[arg(long)]
    pub sim_threads: Option<usize>,

    /// Start in power-save mode (round-robin assignment)
    #[arg(long)]
    pub power_save: bool,

    /// Print only results and drops, not per-round telemetry
    #[arg(long)]
    pub quiet: bool,

    /// Print the resolved config as TOML and exit
    #[arg(long)]
    pub print_config: bool,
}
