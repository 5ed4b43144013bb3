use std::{path::Path, thread, time::Duration, time::Instant};

use colored::Colorize;
use human_repr::HumanDuration;
use terminal_size::{terminal_size, Height, Width};
use thiserror::Error;

use crate::{
    config::get_config,
    game::Game,
    notation::to_san,
    pgn::{self, PgnError},
    piece::Color,
    position::Position,
    uci::{SearchLimit, UciDriver, UciError},
};

/// The fixed evaluation-swing threshold, in centipawns, above which a position counts as critical.
pub const SWING_THRESHOLD: i32 = 300;

/// Represents errors that can occur while analyzing games with an engine.
#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error(transparent)]
    Engine(#[from] UciError),

    #[error(transparent)]
    Pgn(#[from] PgnError),

    #[error("No game at index {0}")]
    GameNotFound(usize),
}

/// A position where the engine evaluation swung by more than the threshold.
#[derive(Debug, Clone)]
pub struct CriticalPosition {
    /// The fullmove number of the move that caused the swing.
    pub fullmove: u16,

    /// The side whose prospects swung: the opponent of the side that just moved.
    pub side: Color,

    /// The move that caused the swing, in SAN.
    pub san: String,

    /// The position after the move, as FEN.
    pub fen: String,

    /// The engine's preferred move in the position, in coordinate notation.
    pub best_move: Option<String>,

    /// The evaluation before the move, in centipawns.
    pub previous_evaluation: i32,

    /// The evaluation after the move, in centipawns.
    pub evaluation: i32,
}

/// Replays a game through the engine one move at a time and collects the positions where the evaluation swings by
/// more than the threshold.
///
/// After every move the position is handed to the engine as the starting FEN plus the move sequence so far, analysed
/// without bound for `think_time`, and stopped. The swing is the symmetric delta `abs(abs(prev) - abs(cur))`; the
/// threshold and the formula are fixed policy.
///
/// The driver must be prepared (`prepare` or start/options/new-game) before the call.
pub fn find_critical_positions(
    driver: &mut UciDriver,
    game: &Game,
    think_time: Duration,
) -> Result<Vec<CriticalPosition>, AnalyzeError> {
    let mut criticals = Vec::new();
    let mut moves_so_far: Vec<String> = Vec::with_capacity(game.moves().len());
    let mut replay = Position::new_from_fen(game.start_fen())
        .expect("The game start FEN was produced by Position and always parses");
    let mut score_prev = 0i32;

    for extended_move in game.moves() {
        let fullmove = replay.fullmove_number();
        let san = to_san(&replay, extended_move.mv);
        moves_so_far.push(extended_move.mv.to_uci_string());
        replay.make(extended_move.mv);

        driver.set_position(game.start_fen(), &moves_so_far)?;
        driver.start_analysis(SearchLimit::Infinite, None)?;
        thread::sleep(think_time);
        driver.stop_thinking()?;

        let score_cur = driver
            .analysis_info(0)
            .and_then(|info| info.evaluation)
            .map_or(0, |score| score.as_centipawns());

        if (score_prev.abs() - score_cur.abs()).abs() > SWING_THRESHOLD {
            criticals.push(CriticalPosition {
                fullmove,
                side: replay.side_to_move(),
                san,
                fen: replay.to_fen(),
                best_move: driver.best_move().map(|best| best.mv.to_uci_string()),
                previous_evaluation: score_prev,
                evaluation: score_cur,
            });
        }

        score_prev = score_cur;
    }

    Ok(criticals)
}

/// Runs critical-position detection over a PGN file and prints the findings.
///
/// Analyses every game of the file, or only the game at `game_index` when one is given. A fresh engine session is
/// prepared per game so engine state cannot leak between games.
pub fn analyze_file(
    pgn_path: &Path,
    engine_path: &Path,
    think_time: Duration,
    game_index: Option<usize>,
) -> Result<(), AnalyzeError> {
    let games = pgn::read_games_from_file(pgn_path)?;
    if let Some(index) = game_index {
        if index >= games.len() {
            return Err(AnalyzeError::GameNotFound(index));
        }
    }

    for (index, game) in games.iter().enumerate() {
        if game_index.is_some_and(|selected| selected != index) {
            continue;
        }

        println!(
            "\nGame {}: {} - {} ({}, {} moves)",
            index,
            game.tags().white,
            game.tags().black,
            game.result(),
            game.moves().len(),
        );

        let mut driver = UciDriver::new(engine_path);
        driver.prepare(&[])?;

        let start = Instant::now();
        let criticals = find_critical_positions(&mut driver, game, think_time)?;
        let elapsed = start.elapsed();
        driver.dispose();

        print_criticals(&criticals);
        let elapsed_text =
            if get_config().precise { format!("{}s", elapsed.as_secs_f64()) } else { elapsed.human_duration().to_string() };
        println!(
            "{} critical positions in {}",
            if criticals.is_empty() { "no".green() } else { criticals.len().to_string().red() },
            elapsed_text,
        );
    }

    Ok(())
}

//======================================================================================================================
// functions responsible for printing the findings
//======================================================================================================================

const MOVE_COLUMN_WIDTH: usize = 9;
const EVAL_COLUMN_WIDTH: usize = 7;
const SWING_COLUMN_WIDTH: usize = 7;
const BEST_COLUMN_WIDTH: usize = 6;

const EXTRA_SEPARATOR_CHAR_COUNT: usize = 16;

/// Returns the current terminal width, defaulting to 100 columns when it cannot be determined.
fn get_terminal_width() -> usize {
    if let Some((Width(width), Height(_))) = terminal_size() {
        width as usize
    } else {
        100
    }
}

/// Width left over for the FEN column once the fixed columns and separators are accounted for.
fn get_fen_column_width(terminal_width: usize) -> usize {
    terminal_width
        .saturating_sub(MOVE_COLUMN_WIDTH + EVAL_COLUMN_WIDTH + SWING_COLUMN_WIDTH + BEST_COLUMN_WIDTH)
        .saturating_sub(EXTRA_SEPARATOR_CHAR_COUNT)
        .max(20)
}

/// Prints the findings as a box-drawn table: the move, the evaluations around it, the engine's preferred move and the
/// FEN of the position.
fn print_criticals(criticals: &[CriticalPosition]) {
    if criticals.is_empty() {
        return;
    }

    let fen_column_width = get_fen_column_width(get_terminal_width());

    println!(
        "┌─{:─<MOVE_COLUMN_WIDTH$}─┬─{:─<EVAL_COLUMN_WIDTH$}─┬─{:─<SWING_COLUMN_WIDTH$}─┬─{:─<BEST_COLUMN_WIDTH$}─┬─{:─<fen_column_width$}─┐",
        "", "", "", "", ""
    );
    println!(
        "│ {:^MOVE_COLUMN_WIDTH$} │ {:^EVAL_COLUMN_WIDTH$} │ {:^SWING_COLUMN_WIDTH$} │ {:^BEST_COLUMN_WIDTH$} │ {:<fen_column_width$} │",
        "Move", "Eval", "Swing", "Best", "Position"
    );
    println!(
        "├─{:─<MOVE_COLUMN_WIDTH$}─┼─{:─<EVAL_COLUMN_WIDTH$}─┼─{:─<SWING_COLUMN_WIDTH$}─┼─{:─<BEST_COLUMN_WIDTH$}─┼─{:─<fen_column_width$}─┤",
        "", "", "", "", ""
    );

    for critical in criticals {
        let move_label = match critical.side {
            // The side stored is the opponent of the mover, so a white-to-move entry was caused by a black move.
            Color::White => format!("{}... {}", critical.fullmove, critical.san),
            Color::Black => format!("{}. {}", critical.fullmove, critical.san),
        };
        let swing = (critical.previous_evaluation.abs() - critical.evaluation.abs()).abs();

        println!(
            "│ {:<MOVE_COLUMN_WIDTH$} │ {:>EVAL_COLUMN_WIDTH$} │ {:>SWING_COLUMN_WIDTH$} │ {:<BEST_COLUMN_WIDTH$} │ {:<fen_column_width$} │",
            move_label,
            format!("{:+.2}", critical.evaluation as f64 / 100.0),
            swing,
            critical.best_move.as_deref().unwrap_or("-"),
            truncate_to_width(&critical.fen, fen_column_width),
        );
    }

    println!(
        "└─{:─<MOVE_COLUMN_WIDTH$}─┴─{:─<EVAL_COLUMN_WIDTH$}─┴─{:─<SWING_COLUMN_WIDTH$}─┴─{:─<BEST_COLUMN_WIDTH$}─┴─{:─<fen_column_width$}─┘",
        "", "", "", "", ""
    );
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        text.chars().take(width.saturating_sub(1)).chain(std::iter::once('…')).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swing_formula() {
        // The symmetric delta compares magnitudes, so a sign flip between moderate evaluations does not register.
        let swing = |prev: i32, cur: i32| (prev.abs() - cur.abs()).abs() > SWING_THRESHOLD;
        assert!(swing(0, 350));
        assert!(swing(-350, 0));
        assert!(!swing(40, -40));
        assert!(!swing(0, 300));
        assert!(swing(120, 550));
    }

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width("short", 10), "short");
        assert_eq!(truncate_to_width("abcdefghij", 5), "abcd…");
    }
}
