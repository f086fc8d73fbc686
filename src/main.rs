use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use gobang_zero::{orchestrator, setup_logging, Config};

#[derive(Parser, Debug)]
#[command(name = "gobang-zero")]
#[command(about = "Self-play training master for Gobang")]
struct Cli {
    /// JSON configuration file; defaults apply for missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Instruction,
}

#[derive(Subcommand, Debug)]
enum Instruction {
    /// Spawn the background self-play workers and trainer
    Start,
    /// Terminate a previously started background training process
    Kill,
    /// Foreground training supervisor; spawned by `start`
    #[command(hide = true)]
    Run,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("cannot load config {path:?}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    match cli.command {
        Instruction::Run => setup_logging(Some(&config.ckpt_dir.join("logs"))),
        _ => setup_logging(None),
    }

    let result = match cli.command {
        Instruction::Start => orchestrator::start(&config, cli.config.as_deref()),
        Instruction::Kill => orchestrator::kill(&config),
        Instruction::Run => orchestrator::run(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
