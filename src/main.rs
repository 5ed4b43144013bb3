use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use thiserror::Error;

use blunderscope::{analyze, config, perft};

#[derive(Error, Debug)]
enum BlunderscopeError {
    #[error("Error while loading the configuration: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Error during the analysis: {0}")]
    AnalyzeError(#[from] analyze::AnalyzeError),

    #[error("Error during the perft command: {0}")]
    PerftError(#[from] perft::PerftError),
}

/// Command-line interface arguments for the blunderscope analysis tool.
#[derive(Parser)]
#[command(
    name = "blunderscope",
    version = "0.1.0",
    about = "Chess game analysis: drives a UCI engine over PGN games and finds the critical positions"
)]
struct BlunderscopeArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Scan the games of a PGN file for positions where the engine evaluation swings
    Criticals {
        /// The PGN file to analyze
        #[arg(short, long)]
        pgn: PathBuf,

        /// Path of the UCI engine binary. Defaults to the configured engine
        #[arg(short, long)]
        engine: Option<PathBuf>,

        /// Per-move analysis budget in milliseconds. Defaults to the configured budget
        #[arg(short, long)]
        movetime: Option<u64>,

        /// Analyze only the game at this zero-based index
        #[arg(short, long)]
        game: Option<usize>,
    },

    /// Calculate the perft of a position
    Perft {
        /// The depth to calculate the perft
        #[arg(short, long)]
        depth: u32,

        /// FEN string representing the position to calculate the perft
        #[arg(short, long, default_value = blunderscope::INITIAL_POSITION_FEN)]
        fen: String,
    },
}

fn run() -> Result<(), BlunderscopeError> {
    config::initialize()?;
    let settings = config::get_config();

    let args = BlunderscopeArgs::parse();
    match args.command {
        Commands::Criticals { pgn, engine, movetime, game } => {
            let engine = engine.unwrap_or_else(|| PathBuf::from(&settings.engine_path));
            let movetime = Duration::from_millis(movetime.unwrap_or(settings.movetime_ms));
            analyze::analyze_file(&pgn, &engine, movetime, game)?;
        }
        Commands::Perft { depth, fen } => {
            perft::perft(&fen, depth)?;
        }
    }
    Ok(())
}

/// Main entry point for the blunderscope analysis tool.
fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
