//! CLI command definitions for the `hlpx` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod checkpoint;
pub mod plan;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use hlp_types::rollback::RollbackGranularity;
use uuid::Uuid;

/// Run, resume and roll back HLP execution plans.
#[derive(Parser)]
#[command(name = "hlpx", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding config.toml and the checkpoint database.
    #[arg(long, global = true, env = "HLP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a plan file and wait for it to finish. Ctrl+C cancels it.
    Run {
        /// Path to the plan (YAML, or JSON with a .json extension).
        file: PathBuf,

        /// Open this resource's circuit before the plan starts, to rehearse
        /// an outage. Repeatable.
        #[arg(long = "trip", value_name = "RESOURCE")]
        trip: Vec<String>,
    },

    /// Resume an interrupted plan from its checkpoints.
    Resume {
        plan_id: Uuid,
    },

    /// Show the current state of a plan.
    Status {
        plan_id: Uuid,
    },

    /// Compensate a phase, a unit or a single artifact of a stopped plan.
    Rollback {
        plan_id: Uuid,

        /// What `target` names.
        #[arg(value_enum)]
        scope: RollbackScopeArg,

        /// Phase, unit or artifact ID.
        target: String,
    },

    /// Validate a plan file and print its execution waves.
    Validate {
        file: PathBuf,
    },

    /// List stored plans.
    #[command(alias = "ls")]
    Plans,

    /// Show the checkpoint log of a plan.
    Checkpoints {
        plan_id: Uuid,

        /// Only show checkpoints of this unit.
        #[arg(long)]
        unit: Option<String>,
    },

    /// Delete checkpoints outside the configured retention policy.
    Prune,

    /// Checkpoint storage statistics.
    Stats,
}

/// Rollback granularity as a command-line value.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RollbackScopeArg {
    Phase,
    Unit,
    Artifact,
}

impl From<RollbackScopeArg> for RollbackGranularity {
    fn from(arg: RollbackScopeArg) -> Self {
        match arg {
            RollbackScopeArg::Phase => RollbackGranularity::Phase,
            RollbackScopeArg::Unit => RollbackGranularity::Unit,
            RollbackScopeArg::Artifact => RollbackGranularity::Artifact,
        }
    }
}
