use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
    sync::LazyLock,
};

use regex::Regex;
use thiserror::Error;

use crate::{
    game::{ExtendedMove, Game, MoveAnnotations, UciResult},
    notation::{is_san_token, parse_san},
    position::Position,
    score::Score,
    time::parse_clock,
};

/// Error type for the PGN parser.
#[derive(Error, Debug)]
pub enum PgnError {
    /// The text is not a parsable PGN game.
    #[error("Malformed PGN: {0}")]
    MalformedPgn(String),

    /// The PGN file could not be read.
    #[error("Unable to read the PGN file: {0}")]
    Io(#[from] std::io::Error),
}

/// A full-line PGN tag pair, e.g. `[Event "Rated blitz game"]`.
static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*\[\s*(\w+)\s+"((?:[^"\\]|\\.)*)"\s*\]\s*$"#).expect("The tag regex should be valid")
});

/// Numeric annotation glyphs, tolerated and discarded.
static NAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\d+").expect("The NAG regex should be valid"));

/// Black-to-move ellipses like `5...`, removed before tokenising.
static ELLIPSIS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\.\.").expect("The ellipsis regex should be valid"));

/// A move number glued to its SAN token, e.g. `1.e4`.
static GLUED_NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.)([^\s.])").expect("The glued-number regex should be valid"));

/// A bare move number token, e.g. `12.`.
static MOVE_NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.$").expect("The move-number regex should be valid"));

/// A comment placeholder inserted by the preprocessor.
static COMMENT_PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@(\d+)@$").expect("The placeholder regex should be valid"));

/// A variation placeholder inserted by the preprocessor.
static VARIATION_PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@V(\d+)@$").expect("The placeholder regex should be valid"));

/// Lichess-style clock annotation, `[%clk 0:05:00]`.
static CLK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[%clk\s+([\d:.]+)\]").expect("The clk regex should be valid"));

/// Lichess-style evaluation annotation, `[%eval 0.35,24]` or `[%eval #-3]`.
static EVAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[%eval\s+(#?-?[\d.]+)(?:,(\d+))?\]").expect("The eval regex should be valid")
});

/// Lichess-style elapsed-move-time annotation, `[%emt 2.193]`.
static EMT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[%emt\s+([\d:.]+)\]").expect("The emt regex should be valid"));

/// Cutechess-style comment, `+0.25/18 2.5s` or `-M5/12 0.80s`.
static CUTECHESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?(?:M)?\d+(?:\.\d+)?)/(\d+)\s+(\d+(?:\.\d+)?)s?$").expect("The cutechess regex should be valid")
});

//======================================================================================================================
// Public entry points
//======================================================================================================================

/// Parses every game found in a text buffer.
///
/// Games that fail to parse are skipped with a warning, as a multi-game export frequently contains a few malformed
/// entries.
pub fn parse_games(text: &str) -> Result<Vec<Game>, PgnError> {
    let mut games = Vec::new();
    for (index, raw) in split_games(text).into_iter().enumerate() {
        match parse_game(&raw) {
            Ok(game) => games.push(game),
            Err(error) => log::warn!("skipping unparsable game {}: {}", index, error),
        }
    }
    Ok(games)
}

/// Reads and parses every game of a PGN file through a buffered reader.
pub fn read_games_from_file(path: &Path) -> Result<Vec<Game>, PgnError> {
    let file = File::open(path)?;
    let mut text = String::new();
    BufReader::new(file).read_to_string(&mut text)?;
    parse_games(&text)
}

/// Parses a single game from its raw PGN text.
pub fn parse_game(raw: &str) -> Result<Game, PgnError> {
    let mut game = Game::new();
    let mut movetext = String::new();
    let mut in_tag_section = true;

    for line in raw.lines() {
        if in_tag_section {
            if let Some(captures) = TAG_REGEX.captures(line) {
                let name = captures.get(1).expect("The regex guarantees the group").as_str();
                let value = captures.get(2).expect("The regex guarantees the group").as_str();
                if !game.set_tag(name, value) {
                    return Err(PgnError::MalformedPgn(format!("invalid {} tag: {}", name, value)));
                }
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            in_tag_section = false;
        }
        movetext.push_str(line);
        movetext.push('\n');
    }

    // Preprocessing, in a fixed order: comments become placeholders, annotation glyphs disappear, then the main-line
    // token stream is normalised. Variations are extracted per nesting level inside the token loop.
    let mut comments: Vec<String> = Vec::new();
    let movetext = extract_delimited(&movetext, '{', '}', "@", &mut comments);
    let movetext = NAG_REGEX.replace_all(&movetext, "");

    parse_main_line(&mut game, &movetext, &comments)?;

    Ok(game)
}

//======================================================================================================================
// Game splitting
//======================================================================================================================

/// Splits a buffer into raw per-game chunks.
///
/// A new game starts at a tag line that follows movetext. The brace depth is tracked so a `[` at the start of a line
/// inside a comment does not split the game.
fn split_games(text: &str) -> Vec<String> {
    let mut games = Vec::new();
    let mut current = String::new();
    let mut seen_movetext = false;
    let mut brace_depth = 0u32;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let is_tag_line = brace_depth == 0 && TAG_REGEX.is_match(line);

        if is_tag_line && seen_movetext {
            games.push(std::mem::take(&mut current));
            seen_movetext = false;
        }
        if brace_depth == 0 && !trimmed.is_empty() && !is_tag_line {
            seen_movetext = true;
        }

        for c in trimmed.chars() {
            match c {
                '{' => brace_depth += 1,
                '}' => brace_depth = brace_depth.saturating_sub(1),
                _ => {}
            }
        }

        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        games.push(current);
    }

    games
}

//======================================================================================================================
// Preprocessing
//======================================================================================================================

/// Replaces nesting-aware delimited regions with placeholders and stores their contents in a buffer.
///
/// The placeholder for buffer index N is `@<marker without @>N@`; passing "@" yields `@N@` and passing "@V" yields
/// `@VN@`. Nested delimiters inside a region stay part of its stored text.
fn extract_delimited(text: &str, open: char, close: char, marker: &str, buffer: &mut Vec<String>) -> String {
    let mut result = String::new();
    let mut current = String::new();
    let mut depth = 0u32;

    for c in text.chars() {
        if c == open {
            if depth == 0 {
                current.clear();
            } else {
                current.push(c);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                result.push(' ');
                result.push_str(marker);
                result.push_str(&buffer.len().to_string());
                result.push('@');
                result.push(' ');
                buffer.push(current.trim().to_string());
            } else {
                current.push(c);
            }
        } else if depth > 0 {
            current.push(c);
        } else {
            result.push(c);
        }
    }

    result
}

/// Normalises a movetext fragment: black-to-move ellipses disappear, glued move numbers get a space, and digit-zero
/// castling becomes letter-O castling.
fn normalize_movetext(text: &str) -> String {
    let text = ELLIPSIS_REGEX.replace_all(text, " ");
    let text = GLUED_NUMBER_REGEX.replace_all(&text, "$1 $2");
    text.replace("0-0-0", "O-O-O").replace("0-0", "O-O")
}

//======================================================================================================================
// Token parsing
//======================================================================================================================

/// Parses the main-line tokens into the game: moves are validated and added, comments are post-parsed onto the move
/// they follow, variations are parsed recursively against the position before their anchor move, move numbers are
/// checked against the position and a result token sets the game result.
fn parse_main_line(game: &mut Game, movetext: &str, comments: &[String]) -> Result<(), PgnError> {
    let mut variations: Vec<String> = Vec::new();
    let movetext = extract_delimited(movetext, '(', ')', "@V", &mut variations);
    let movetext = normalize_movetext(&movetext);

    for token in movetext.split_whitespace() {
        if let Some(captures) = COMMENT_PLACEHOLDER_REGEX.captures(token) {
            let index: usize = captures[1].parse().expect("The regex guarantees digits");
            let text = comments.get(index).map(String::as_str).unwrap_or_default();
            match game.last_move_mut() {
                Some(last) => apply_comment(&mut last.annotations, text),
                None => game.set_introduction(text),
            }
            continue;
        }

        if let Some(captures) = VARIATION_PLACEHOLDER_REGEX.captures(token) {
            let index: usize = captures[1].parse().expect("The regex guarantees digits");
            let Some(last) = game.moves().last() else {
                return Err(PgnError::MalformedPgn("variation before the first move".to_string()));
            };
            let side = last.side;
            let fullmove = last_fullmove(game);
            let before = game
                .get_position(fullmove, side)
                .ok_or_else(|| PgnError::MalformedPgn("variation anchor not found".to_string()))?;
            let variation = parse_variation(&variations[index], &before, comments)?;
            game.add_variation(variation, fullmove, side);
            continue;
        }

        if let Some(result) = UciResult::parse(token) {
            game.set_result(&result.to_string());
            continue;
        }

        if let Some(captures) = MOVE_NUMBER_REGEX.captures(token) {
            let number: u16 = captures[1]
                .parse()
                .map_err(|_| PgnError::MalformedPgn(format!("move number out of range: {}", token)))?;
            if number != game.position().fullmove_number() {
                return Err(PgnError::MalformedPgn(format!(
                    "move number {} does not match fullmove {}",
                    number,
                    game.position().fullmove_number()
                )));
            }
            continue;
        }

        if is_san_token(token) {
            let mv = parse_san(game.position(), token)
                .map_err(|error| PgnError::MalformedPgn(error.to_string()))?;
            if !game.add(ExtendedMove::new(mv)) {
                return Err(PgnError::MalformedPgn(format!("illegal move: {}", token)));
            }
            continue;
        }

        log::debug!("ignoring unrecognized PGN token: {}", token);
    }

    Ok(())
}

/// Returns the fullmove number of the position the last added move was played in.
fn last_fullmove(game: &Game) -> u16 {
    let position = game.position();
    match game.moves().last() {
        // After a white move the counter has not advanced; after a black move it has.
        Some(last) if last.side == crate::piece::Color::Black => position.fullmove_number() - 1,
        _ => position.fullmove_number(),
    }
}

/// Parses a variation buffer into a move sequence, starting from the position before the anchor move. Nested
/// variations recurse through the same function.
fn parse_variation(text: &str, start: &Position, comments: &[String]) -> Result<Vec<ExtendedMove>, PgnError> {
    let mut variations: Vec<String> = Vec::new();
    let text = extract_delimited(text, '(', ')', "@V", &mut variations);
    let text = normalize_movetext(&text);

    let mut moves: Vec<ExtendedMove> = Vec::new();
    let mut position = start.clone();
    let mut before_last: Option<Position> = None;

    for token in text.split_whitespace() {
        if let Some(captures) = COMMENT_PLACEHOLDER_REGEX.captures(token) {
            let index: usize = captures[1].parse().expect("The regex guarantees digits");
            let comment = comments.get(index).map(String::as_str).unwrap_or_default();
            if let Some(last) = moves.last_mut() {
                apply_comment(&mut last.annotations, comment);
            }
            continue;
        }

        if let Some(captures) = VARIATION_PLACEHOLDER_REGEX.captures(token) {
            let index: usize = captures[1].parse().expect("The regex guarantees digits");
            let (Some(last), Some(before)) = (moves.last_mut(), before_last.as_ref()) else {
                return Err(PgnError::MalformedPgn("variation before the first move".to_string()));
            };
            last.variations.push(parse_variation(&variations[index], before, comments)?);
            continue;
        }

        if UciResult::parse(token).is_some() {
            continue;
        }

        if let Some(captures) = MOVE_NUMBER_REGEX.captures(token) {
            let number: u16 = captures[1]
                .parse()
                .map_err(|_| PgnError::MalformedPgn(format!("move number out of range: {}", token)))?;
            if number != position.fullmove_number() {
                return Err(PgnError::MalformedPgn(format!(
                    "variation move number {} does not match fullmove {}",
                    number,
                    position.fullmove_number()
                )));
            }
            continue;
        }

        if is_san_token(token) {
            let mv = parse_san(&position, token).map_err(|error| PgnError::MalformedPgn(error.to_string()))?;
            let mut extended_move = ExtendedMove::new(mv);
            extended_move.side = position.side_to_move();
            before_last = Some(position.clone());
            position.make(mv);
            moves.push(extended_move);
            continue;
        }

        log::debug!("ignoring unrecognized variation token: {}", token);
    }

    Ok(moves)
}

//======================================================================================================================
// Comment post-parsing
//======================================================================================================================

/// Extracts the structured annotation flavours out of a comment and stores the remaining free-form text.
///
/// Three flavours are recognized: Lichess-style `[%clk]`/`[%eval]`/`[%emt]` fields, TCEC-style comma-separated `k=v`
/// lists with the keys `d`, `mt` and `tl`, and Cutechess-style `score/depth time` one-liners. The Cutechess comment
/// "book" marks a book move.
fn apply_comment(annotations: &mut MoveAnnotations, text: &str) {
    let mut remainder = text.to_string();

    if let Some(captures) = CLK_REGEX.captures(&remainder) {
        if let Ok(clock) = parse_clock(&captures[1]) {
            annotations.clock = Some(clock);
        }
        remainder = CLK_REGEX.replace_all(&remainder, "").to_string();
    }
    if let Some(captures) = EMT_REGEX.captures(&remainder) {
        if let Ok(used_time) = parse_clock(&captures[1]) {
            annotations.used_time = Some(used_time);
        }
        remainder = EMT_REGEX.replace_all(&remainder, "").to_string();
    }
    if let Some(captures) = EVAL_REGEX.captures(&remainder) {
        annotations.evaluation = parse_eval_value(&captures[1]);
        if let Some(depth) = captures.get(2) {
            annotations.depth = depth.as_str().parse().ok();
        }
        remainder = EVAL_REGEX.replace_all(&remainder, "").to_string();
    }

    let remainder_trimmed = remainder.split_whitespace().collect::<Vec<_>>().join(" ");

    if remainder_trimmed == "book" {
        annotations.is_book_move = true;
        annotations.comment.clear();
        return;
    }

    if let Some(captures) = CUTECHESS_REGEX.captures(&remainder_trimmed) {
        annotations.evaluation = parse_cutechess_score(&captures[1]);
        annotations.depth = captures[2].parse().ok();
        if let Ok(seconds) = captures[3].parse::<f64>() {
            annotations.used_time = Some(std::time::Duration::from_secs_f64(seconds));
        }
        annotations.comment.clear();
        return;
    }

    if is_tcec_comment(&remainder_trimmed) {
        let mut leftover_pairs: Vec<String> = Vec::new();
        for pair in remainder_trimmed.split(',') {
            let pair = pair.trim();
            let Some((key, value)) = pair.split_once('=') else { continue };
            match key {
                "d" => annotations.depth = value.parse().ok(),
                "mt" => {
                    annotations.used_time =
                        value.parse::<u64>().ok().map(std::time::Duration::from_millis)
                }
                "tl" => {
                    annotations.clock = value.parse::<u64>().ok().map(std::time::Duration::from_millis)
                }
                _ => leftover_pairs.push(pair.to_string()),
            }
        }
        annotations.comment = leftover_pairs.join(", ");
        return;
    }

    annotations.comment = remainder_trimmed;
}

/// Returns true when every comma-separated segment of the text is a `k=v` pair.
fn is_tcec_comment(text: &str) -> bool {
    !text.is_empty()
        && text.split(',').all(|segment| {
            let segment = segment.trim();
            segment
                .split_once('=')
                .is_some_and(|(key, value)| !key.is_empty() && !value.is_empty() && key.chars().all(char::is_alphanumeric))
        })
}

/// Parses a `[%eval]` value: a signed pawn amount ("0.35", "-1.2") or a mate distance ("#4", "#-3").
fn parse_eval_value(value: &str) -> Option<Score> {
    if let Some(mate) = value.strip_prefix('#') {
        return mate.parse::<i32>().ok().map(Score::Mate);
    }
    value.parse::<f64>().ok().map(|pawns| Score::Centipawns((pawns * 100.0).round() as i32))
}

/// Parses a Cutechess score: a signed pawn amount ("+0.25") or a mate distance ("-M5").
fn parse_cutechess_score(value: &str) -> Option<Score> {
    if let Some(stripped) = value.strip_prefix("+M").or_else(|| value.strip_prefix('M')) {
        return stripped.parse::<i32>().ok().map(Score::Mate);
    }
    if let Some(stripped) = value.strip_prefix("-M") {
        return stripped.parse::<i32>().ok().map(|moves| Score::Mate(-moves));
    }
    value.parse::<f64>().ok().map(|pawns| Score::Centipawns((pawns * 100.0).round() as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_simple_game() {
        let pgn = "[Event \"Test\"]\n[White \"Alice\"]\n[Black \"Bob\"]\n\n1. e4 e5 2. Nf3 Nc6 1-0\n";
        let game = parse_game(pgn).unwrap();
        assert_eq!(game.tags().white, "Alice");
        assert_eq!(game.moves().len(), 4);
        assert_eq!(game.result(), UciResult::WhiteWins);
    }

    #[test]
    fn test_parse_lichess_annotations() {
        let pgn = "[Event \"x\"]\n\n1. e4 { [%eval 0.35,24] [%clk 0:05:00] } e5 1/2-1/2\n";
        let game = parse_game(pgn).unwrap();
        assert_eq!(game.moves().len(), 2);

        let annotations = &game.moves()[0].annotations;
        assert_eq!(annotations.evaluation, Some(Score::Centipawns(35)));
        assert_eq!(annotations.depth, Some(24));
        assert_eq!(annotations.clock, Some(Duration::from_secs(300)));
        assert!(annotations.comment.is_empty());
        assert_eq!(game.result(), UciResult::Draw);
    }

    #[test]
    fn test_parse_mate_eval_and_emt() {
        let pgn = "[Event \"x\"]\n\n1. e4 { [%eval #-3] [%emt 2.193] } e5 *\n";
        let game = parse_game(pgn).unwrap();
        let annotations = &game.moves()[0].annotations;
        assert_eq!(annotations.evaluation, Some(Score::Mate(-3)));
        assert_eq!(annotations.used_time, Some(Duration::from_secs_f64(2.193)));
    }

    #[test]
    fn test_parse_tcec_comment() {
        let pgn = "[Event \"x\"]\n\n1. e4 { d=24, mt=12345, tl=180000, nps=12000000 } e5 *\n";
        let game = parse_game(pgn).unwrap();
        let annotations = &game.moves()[0].annotations;
        assert_eq!(annotations.depth, Some(24));
        assert_eq!(annotations.used_time, Some(Duration::from_millis(12345)));
        assert_eq!(annotations.clock, Some(Duration::from_millis(180000)));
        assert_eq!(annotations.comment, "nps=12000000");
    }

    #[test]
    fn test_parse_cutechess_comment_and_book() {
        let pgn = "[Event \"x\"]\n\n1. e4 { book } e5 { -0.25/18 2.5s } *\n";
        let game = parse_game(pgn).unwrap();
        assert!(game.moves()[0].annotations.is_book_move);

        let annotations = &game.moves()[1].annotations;
        assert_eq!(annotations.evaluation, Some(Score::Centipawns(-25)));
        assert_eq!(annotations.depth, Some(18));
        assert_eq!(annotations.used_time, Some(Duration::from_secs_f64(2.5)));
    }

    #[test]
    fn test_parse_nested_comments_and_free_text() {
        let pgn = "[Event \"x\"]\n\n1. e4 { outer { inner } text } e5 *\n";
        let game = parse_game(pgn).unwrap();
        assert_eq!(game.moves()[0].annotations.comment, "outer { inner } text");
    }

    #[test]
    fn test_parse_variations() {
        let pgn = "[Event \"x\"]\n\n1. e4 e5 (1... c5 2. Nf3 (2. Nc3 Nc6) d6) 2. Nf3 *\n";
        let game = parse_game(pgn).unwrap();
        assert_eq!(game.moves().len(), 3);

        let variations = &game.moves()[1].variations;
        assert_eq!(variations.len(), 1);
        let sicilian = &variations[0];
        assert_eq!(sicilian.len(), 3);
        assert_eq!(sicilian[0].mv.to_uci_string(), "c7c5");

        // The nested variation hangs off the move it replaces.
        assert_eq!(sicilian[1].variations.len(), 1);
        assert_eq!(sicilian[1].variations[0][0].mv.to_uci_string(), "b1c3");
    }

    #[test]
    fn test_parse_glued_numbers_nags_and_zero_castling() {
        let pgn = "[Event \"x\"]\n\n1.e4 $1 e5 2.Nf3 $2 Nc6 3.Bc4 Bc5 4.0-0 Nf6 *\n";
        let game = parse_game(pgn).unwrap();
        assert_eq!(game.moves().len(), 8);
        assert_eq!(game.moves()[6].mv.to_uci_string(), "e1g1");
    }

    #[test]
    fn test_parse_introduction_comment() {
        let pgn = "[Event \"x\"]\n\n{ A famous miniature. } 1. e4 e5 *\n";
        let game = parse_game(pgn).unwrap();
        assert_eq!(game.introduction(), "A famous miniature.");
    }

    #[test]
    fn test_parse_multiple_games_skips_invalid() {
        let pgn = "\
[Event \"First\"]

1. e4 e5 1-0

[Event \"Broken\"]

1. e4 Ke4 1-0

[Event \"Second\"]

1. d4 d5 1/2-1/2
";
        let games = parse_games(pgn).unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].tags().event, "First");
        assert_eq!(games[1].tags().event, "Second");
    }

    #[test]
    fn test_parse_game_with_fen_tag() {
        let pgn = "[Event \"x\"]\n[SetUp \"1\"]\n[FEN \"r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1\"]\n\n1. O-O Kd7 *\n";
        let game = parse_game(pgn).unwrap();
        assert_eq!(game.start_fen(), "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
        assert_eq!(game.moves().len(), 2);
    }

    #[test]
    fn test_move_number_mismatch_is_rejected() {
        let pgn = "[Event \"x\"]\n\n1. e4 e5 7. Nf3 *\n";
        assert!(parse_game(pgn).is_err());
    }

    #[test]
    fn test_result_token_parses_to_result() {
        for (token, expected) in [
            ("1-0", UciResult::WhiteWins),
            ("0-1", UciResult::BlackWins),
            ("1/2-1/2", UciResult::Draw),
            ("*", UciResult::Unterminated),
        ] {
            let pgn = format!("[Event \"x\"]\n\n1. e4 e5 {}\n", token);
            let game = parse_game(&pgn).unwrap();
            assert_eq!(game.result(), expected);
        }
    }
}
