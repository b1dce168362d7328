//! Standalone entry point for the process-based local runtime: spawns one
//! agent slot, runs a single command against it, and prints the result.
//! Exercised directly by operators validating that this host can serve as
//! the daemon's local-runtime collaborator before wiring it in for real.

use clap::Parser;
use orchestrator_core::agent::SpawnRequest;
use orchestrator_core::local_runtime::LocalRuntime;
use orchestrator_runtime::ProcessRuntime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "orchestrator-runtime", about = "run one command through the process-based local runtime")]
struct Args {
    /// Shell command to execute
    #[arg(long)]
    command: String,

    /// Model label to tag the spawned agent with
    #[arg(long, default_value = "local")]
    model: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let runtime = ProcessRuntime::new(1);

    let agent = runtime
        .spawn(SpawnRequest { model: args.model, ..SpawnRequest::default() })
        .await?;
    info!(agent_id = %agent.id, "spawned local agent slot");

    let (output, exit_code) = runtime.exec(&agent.id, &args.command).await?;
    print!("{output}");
    runtime.kill(&agent.id).await?;

    std::process::exit(exit_code);
}
