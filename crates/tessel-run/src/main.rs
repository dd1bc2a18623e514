//! Tessel Run - compiles and executes a recorded program bundle
//!
//! This binary loads a serialized program, lowers it to a task graph, and
//! hands the driver to the runtime. Exit code 0 on success, 1 on any
//! compile or runtime error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tessel_dsl::compile::deserialize_program;
use tessel_runtime::Machine;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tessel-run")]
#[command(about = "Compile and execute a recorded Tessel program bundle")]
struct Cli {
    /// Path to a serialized program bundle
    program: PathBuf,

    /// Print the emitted task specifications instead of executing
    #[arg(long)]
    emit_tasks: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessel_run=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("loading program from: {}", cli.program.display());

    let bytes = match std::fs::read(&cli.program) {
        Ok(b) => b,
        Err(e) => {
            error!("failed to read {}: {}", cli.program.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let program = match deserialize_program(&bytes) {
        Ok(p) => p,
        Err(e) => {
            error!("malformed program bundle: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let graph = match tessel_dsl::compile(&program) {
        Ok(g) => g,
        Err(e) => {
            error!("compilation failed:\n{}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.emit_tasks {
        for (id, task) in &graph.tasks {
            println!("task {} ({})", id, task.name);
            for region in &task.regions {
                println!("  region {}:", region.relation);
                for p in &region.privileges {
                    match p {
                        tessel_ir::Privilege::Reads(f) => println!("    reads({})", f),
                        tessel_ir::Privilege::Writes(f) => println!("    writes({})", f),
                        tessel_ir::Privilege::Reduces { field, op } => {
                            println!("    reduces {}({})", op, field)
                        }
                    }
                }
            }
            if let Some(red) = &task.reduced_global {
                println!("  returns {} for global {}", red.op, red.global);
            }
        }
        println!("driver: {} ops", graph.driver.ops.len());
        return ExitCode::SUCCESS;
    }

    info!(tasks = graph.tasks.len(), "executing");
    let mut machine = Machine::new(graph);
    if let Err(e) = machine.run() {
        error!("execution failed: {}", e);
        return ExitCode::FAILURE;
    }

    info!("done");
    ExitCode::SUCCESS
}
