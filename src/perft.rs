use std::time::Instant;

use human_repr::{HumanCount, HumanDuration};
use thiserror::Error;

use crate::{
    config::get_config,
    position::{FenError, Position},
};

/// Represents errors that can occur during the perft command.
#[derive(Error, Debug)]
pub enum PerftError {
    #[error(transparent)]
    InvalidFen(#[from] FenError),
}

/// Counts the leaf nodes of the legal move tree to the given depth.
///
/// Perft is the standard validation tool for a move generator: the node counts of well-known positions are published
/// and any generation or make/unmake defect shows up as a count mismatch.
pub fn perft_count(position: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }

    let mut nodes = 0;
    for mv in position.generate_legal_moves().iter() {
        if depth == 1 {
            nodes += 1;
            continue;
        }
        position.make(mv);
        nodes += perft_count(position, depth - 1);
        position.unmake();
    }
    nodes
}

/// Runs perft on a position and prints the node count per root move followed by the total and the search speed.
pub fn perft(fen: &str, depth: u32) -> Result<u64, PerftError> {
    let mut position = Position::new_from_fen(fen)?;

    let start = Instant::now();
    let mut total = 0u64;
    for mv in position.generate_legal_moves().iter() {
        position.make(mv);
        let nodes = if depth > 1 { perft_count(&mut position, depth - 1) } else { 1 };
        position.unmake();
        total += nodes;
        println!("{}: {}", mv, nodes);
    }
    let elapsed = start.elapsed();

    let nodes_per_second = total as f64 / elapsed.as_secs_f64();
    let summary = if get_config().precise {
        format!("perft({}) = {} in {}s ({} nodes/s)", depth, total, elapsed.as_secs_f64(), nodes_per_second as u64)
    } else {
        format!(
            "perft({}) = {} in {} ({})",
            depth,
            total,
            elapsed.human_duration(),
            (nodes_per_second as u64).human_count("nodes/s"),
        )
    };
    println!("\n{}", summary);

    Ok(total)
}
