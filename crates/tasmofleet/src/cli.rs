//! Clap derive structures for the `tasmofleet` daemon.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tasmofleet -- discover, adopt and provision Tasmota relays
#[derive(Debug, Parser)]
#[command(
    name = "tasmofleet",
    version,
    about = "Discover, adopt and provision a fleet of Tasmota relays",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "TASMOFLEET_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the orchestrator until interrupted
    Run(RunArgs),

    /// Scan the managed subnet once and print what answered
    Scan(ScanArgs),

    /// Validate a YAML seed file
    CheckSeed(CheckSeedArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Drive N emulated devices instead of the real network
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(1..=150))]
    pub emulate: Option<u8>,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Scan N emulated devices instead of the real network
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(1..=150))]
    pub emulate: Option<u8>,
}

#[derive(Debug, Args)]
pub struct CheckSeedArgs {
    /// Seed file to validate
    pub file: PathBuf,
}
