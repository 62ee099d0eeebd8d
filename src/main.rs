use sup_liveness::{
    cli::commands,
    common::DevMode,
    core::Task,
};

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "supliveness")]
#[command(about = "Challenge-response face liveness checks")]
struct Cli {
    /// Enable development mode (repo config, local models, annotated debug frames)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a sample signed challenge token as JSON (format demo only)
    ///
    /// The signing table lives only in this process, so the printed token can
    /// never be verified later. Use `verify` to issue and check a challenge in
    /// one run.
    Challenge {
        /// Number of random tasks (default from config)
        #[arg(short = 'n', long)]
        tasks: Option<usize>,
        /// Fixed task, repeatable: blink, turn_left, turn_right
        #[arg(short, long = "task", conflicts_with = "tasks")]
        task: Vec<Task>,
    },
    /// Report blinks and orientations in a directory of frames
    Detect {
        #[arg(short, long)]
        frames: PathBuf,
        /// Blink count to resume from
        #[arg(long, default_value = "0")]
        initial_blinks: u32,
    },
    /// Issue a challenge and verify a directory of frames against it
    Verify {
        #[arg(short, long)]
        frames: PathBuf,
        #[arg(short = 'n', long)]
        tasks: Option<usize>,
        #[arg(short, long = "task", conflicts_with = "tasks")]
        task: Vec<Task>,
    },
    /// Print per-frame EAR and orientation
    Signals {
        #[arg(short, long)]
        frames: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = commands::load_config(cli.config.as_deref(), &dev_mode)?;

    match cli.command {
        Commands::Challenge { tasks, task } => {
            commands::challenge(&config, tasks, &task)?;
        }
        Commands::Detect { frames, initial_blinks } => {
            commands::detect(&config, &dev_mode, &frames, initial_blinks)?;
        }
        Commands::Verify { frames, tasks, task } => {
            let passed = commands::verify(&config, &dev_mode, &frames, tasks, &task)?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Signals { frames } => {
            commands::signals(&config, &dev_mode, &frames)?;
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
