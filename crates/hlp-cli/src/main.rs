//! HLP executor CLI entry point.
//!
//! Binary name: `hlpx`
//!
//! Parses CLI arguments, initializes tracing, the checkpoint database and the
//! executor, then dispatches to the command handler.

mod cli;
mod simulate;
mod state;

use clap::Parser;
use hlp_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,hlp_core=debug,hlp_infra=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        otel: cli.otel,
        json: cli.json,
        default_filter: filter.to_string(),
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Validation needs neither the database nor the executor
    if let Commands::Validate { file } = &cli.command {
        return cli::plan::validate(file, cli.json);
    }

    let state = AppState::init(cli.data_dir.clone()).await?;

    match cli.command {
        Commands::Run { file, trip } => {
            cli::plan::run_plan(&state, &file, &trip, cli.json, cli.quiet).await
        }
        Commands::Resume { plan_id } => {
            cli::plan::resume_plan(&state, plan_id, cli.json, cli.quiet).await
        }
        Commands::Status { plan_id } => cli::plan::show_status(&state, plan_id, cli.json).await,
        Commands::Rollback {
            plan_id,
            scope,
            target,
        } => cli::plan::rollback(&state, plan_id, scope.into(), &target, cli.json).await,
        Commands::Plans => cli::plan::list_plans(&state, cli.json).await,
        Commands::Checkpoints { plan_id, unit } => {
            cli::checkpoint::show_history(&state, plan_id, unit.as_deref(), cli.json).await
        }
        Commands::Prune => cli::checkpoint::prune(&state, cli.json).await,
        Commands::Stats => cli::checkpoint::show_stats(&state, cli.json).await,
        Commands::Validate { .. } => unreachable!("handled above"),
    }
}
