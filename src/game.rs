use std::fmt::{self, Display};
use std::time::Duration;

use crate::{
    eco::{self, EcoEntry},
    notation::to_san,
    piece::Color,
    position::{FenError, Position},
    r#move::Move,
    score::Score,
    time::{format_clock, TimeControl},
    zobrist::Zobrist,
    INITIAL_POSITION_FEN,
};

/// Maximum width of a movetext line in emitted PGN.
const PGN_LINE_WIDTH: usize = 80;

//======================================================================================================================
// Results
//======================================================================================================================

/// The result of a chess game, as encoded by a PGN result token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UciResult {
    /// The game is unterminated or the result is unknown ("*").
    #[default]
    Unterminated,

    /// White won ("1-0").
    WhiteWins,

    /// Black won ("0-1").
    BlackWins,

    /// The game was drawn ("1/2-1/2").
    Draw,
}

impl UciResult {
    /// Parses a PGN result token. Returns None for anything that is not one of the four tokens.
    pub fn parse(token: &str) -> Option<UciResult> {
        match token {
            "*" => Some(UciResult::Unterminated),
            "1-0" => Some(UciResult::WhiteWins),
            "0-1" => Some(UciResult::BlackWins),
            "1/2-1/2" => Some(UciResult::Draw),
            _ => None,
        }
    }

    /// Returns the result for a win by the given color.
    pub fn win_for(color: Color) -> UciResult {
        match color {
            Color::White => UciResult::WhiteWins,
            Color::Black => UciResult::BlackWins,
        }
    }
}

impl Display for UciResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UciResult::Unterminated => write!(f, "*"),
            UciResult::WhiteWins => write!(f, "1-0"),
            UciResult::BlackWins => write!(f, "0-1"),
            UciResult::Draw => write!(f, "1/2-1/2"),
        }
    }
}

/// Details how a result came about, for results the game model detected itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameTermination {
    /// No terminal condition was detected; the result, if any, came from an external source such as a PGN tag.
    #[default]
    Unspecified,
    Checkmate,
    Stalemate,
    FiftyMoveRule,
    ThreefoldRepetition,
    InsufficientMaterial,
}

//======================================================================================================================
// Extended moves
//======================================================================================================================

/// A move enriched with the annotations a game record carries: think time, clock state, engine evaluation, search
/// depth, book and tablebase markers, a free-form comment and alternative lines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MoveAnnotations {
    /// Time spent thinking on the move.
    pub used_time: Option<Duration>,

    /// Clock reading after the move.
    pub clock: Option<Duration>,

    /// Engine evaluation after the move, from white's point of view.
    pub evaluation: Option<Score>,

    /// Search depth the evaluation came from.
    pub depth: Option<u16>,

    /// The move was played from an opening book.
    pub is_book_move: bool,

    /// The move was played from an endgame tablebase.
    pub is_tablebase_move: bool,

    /// Free-form comment text left after the structured annotations were extracted.
    pub comment: String,
}

/// A move together with its annotations, the side that played it and its variations.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedMove {
    /// The underlying move.
    pub mv: Move,

    /// The side that played the move.
    pub side: Color,

    /// The annotations attached to the move.
    pub annotations: MoveAnnotations,

    /// Alternative lines branching from the position before this move. Each variation is itself a sequence of extended
    /// moves and owns its nested variations.
    pub variations: Vec<Vec<ExtendedMove>>,
}

impl ExtendedMove {
    /// Wraps a bare move. The side is stamped when the move is added to a game.
    pub fn new(mv: Move) -> Self {
        Self { mv, side: mv.piece().color(), annotations: MoveAnnotations::default(), variations: Vec::new() }
    }

    /// Renders the annotations as PGN comment content: structured `[%…]` fields first, then the free-form comment.
    fn annotation_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(evaluation) = self.annotations.evaluation {
            match self.annotations.depth {
                Some(depth) => parts.push(format!("[%eval {},{}]", evaluation, depth)),
                None => parts.push(format!("[%eval {}]", evaluation)),
            }
        }
        if let Some(clock) = self.annotations.clock {
            parts.push(format!("[%clk {}]", format_clock(clock)));
        }
        if let Some(used_time) = self.annotations.used_time {
            parts.push(format!("[%emt {}]", format_clock(used_time)));
        }
        if !self.annotations.comment.is_empty() {
            parts.push(self.annotations.comment.clone());
        }
        parts.join(" ")
    }
}

impl From<Move> for ExtendedMove {
    fn from(mv: Move) -> Self {
        ExtendedMove::new(mv)
    }
}

//======================================================================================================================
// Tags
//======================================================================================================================

/// The seven-tag roster of a PGN game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameTags {
    pub event: String,
    pub site: String,
    pub date: String,
    pub round: String,
    pub white: String,
    pub black: String,
}

impl Default for GameTags {
    fn default() -> Self {
        Self {
            event: "?".to_string(),
            site: "?".to_string(),
            date: "????.??.??".to_string(),
            round: "?".to_string(),
            white: "?".to_string(),
            black: "?".to_string(),
        }
    }
}

//======================================================================================================================
// Game
//======================================================================================================================

/// A chess game: a starting position, a sequence of extended moves, tags and a result.
///
/// The game keeps the position after all added moves, plus the hash after every ply for repetition detection. Moves
/// are validated against the move generator when added; terminal conditions are evaluated after every accepted move.
#[derive(Debug, Clone, PartialEq)]
pub struct Game {
    tags: GameTags,
    extra_tags: Vec<(String, String)>,
    start_fen: String,
    time_control: Vec<TimeControl>,
    result: UciResult,
    termination: GameTermination,
    introduction: String,
    moves: Vec<ExtendedMove>,
    hashes: Vec<Zobrist>,
    position: Position,
}

impl Game {
    /// Creates a game starting from the standard initial position.
    pub fn new() -> Self {
        Self::new_from_fen(INITIAL_POSITION_FEN).expect("The initial position FEN is constant and always parses")
    }

    /// Creates a game starting from an arbitrary position.
    pub fn new_from_fen(fen: &str) -> Result<Self, FenError> {
        let position = Position::new_from_fen(fen)?;
        Ok(Self {
            tags: GameTags::default(),
            extra_tags: Vec::new(),
            start_fen: position.to_fen(),
            time_control: Vec::new(),
            result: UciResult::Unterminated,
            termination: GameTermination::Unspecified,
            introduction: String::new(),
            moves: Vec::new(),
            hashes: vec![position.zobrist()],
            position,
        })
    }

    //==================================================================================================================
    // Accessors
    //==================================================================================================================

    /// Returns the seven-tag roster.
    pub fn tags(&self) -> &GameTags {
        &self.tags
    }

    /// Returns the tags outside the seven-tag roster, in insertion order.
    pub fn extra_tags(&self) -> &[(String, String)] {
        &self.extra_tags
    }

    /// Returns the FEN of the starting position.
    pub fn start_fen(&self) -> &str {
        &self.start_fen
    }

    /// Returns the position after all added moves.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Returns the side to move in the current position.
    pub fn side_to_move(&self) -> Color {
        self.position.side_to_move()
    }

    /// Returns the moves of the game.
    pub fn moves(&self) -> &[ExtendedMove] {
        &self.moves
    }

    /// Returns a mutable reference to the last move, so a parser can attach annotations after the fact.
    pub fn last_move_mut(&mut self) -> Option<&mut ExtendedMove> {
        self.moves.last_mut()
    }

    /// Returns the result of the game.
    pub fn result(&self) -> UciResult {
        self.result
    }

    /// Returns the detail of how the result came about, when the game detected it itself.
    pub fn termination(&self) -> GameTermination {
        self.termination
    }

    /// Returns the parsed time control descriptors, empty when no TimeControl tag was seen.
    pub fn time_control(&self) -> &[TimeControl] {
        &self.time_control
    }

    /// Returns the comment that precedes the first move.
    pub fn introduction(&self) -> &str {
        &self.introduction
    }

    /// Sets the comment that precedes the first move.
    pub fn set_introduction(&mut self, text: &str) {
        self.introduction = text.to_string();
    }

    /// Returns the opening classification of the game. Only games played from the standard initial position are
    /// classified.
    pub fn eco(&self) -> Option<&'static EcoEntry> {
        if self.start_fen != INITIAL_POSITION_FEN {
            return None;
        }
        eco::lookup(&self.san_moves())
    }

    /// Returns the SAN of every move of the game, without numbers or annotations.
    pub fn san_moves(&self) -> Vec<String> {
        let mut position = self.start_position();
        let mut sans = Vec::with_capacity(self.moves.len());
        for ext in &self.moves {
            sans.push(to_san(&position, ext.mv));
            position.make(ext.mv);
        }
        sans
    }

    /// Returns the UCI coordinate text of the first `count` moves of the game.
    pub fn uci_moves(&self, count: usize) -> Vec<String> {
        self.moves.iter().take(count).map(|ext| ext.mv.to_uci_string()).collect()
    }

    fn start_position(&self) -> Position {
        Position::new_from_fen(&self.start_fen).expect("The start FEN was produced by Position and always parses")
    }

    //==================================================================================================================
    // Ply addressing
    //==================================================================================================================

    /// Returns the index into the move list of the move played by `side` on fullmove `fullmove`, or None when the game
    /// has no such ply.
    pub fn ply_index(&self, fullmove: u16, side: Color) -> Option<usize> {
        let start = self.start_position();
        let mut current_fullmove = start.fullmove_number();
        let mut current_side = start.side_to_move();

        for index in 0..self.moves.len() {
            if current_fullmove == fullmove && current_side == side {
                return Some(index);
            }
            if current_side == Color::Black {
                current_fullmove += 1;
            }
            current_side = !current_side;
        }
        None
    }

    /// Returns the position immediately before the move played by `side` on fullmove `fullmove`.
    pub fn get_position(&self, fullmove: u16, side: Color) -> Option<Position> {
        let index = self.ply_index(fullmove, side)?;
        let mut position = self.start_position();
        for ext in &self.moves[..index] {
            position.make(ext.mv);
        }
        Some(position)
    }

    /// Returns the move played by `side` on fullmove `fullmove`.
    pub fn get_move(&self, fullmove: u16, side: Color) -> Option<&ExtendedMove> {
        self.ply_index(fullmove, side).map(|index| &self.moves[index])
    }

    //==================================================================================================================
    // Mutation
    //==================================================================================================================

    /// Adds a move to the game.
    ///
    /// The move is validated against the legal moves of the current position; illegal moves are rejected and the game
    /// is left unchanged. After an accepted move the terminal conditions are evaluated in the fixed order checkmate,
    /// stalemate, fifty-move rule, threefold repetition, insufficient material, and the result is set accordingly.
    ///
    /// # Returns
    /// `true` when the move was legal and added, `false` otherwise.
    pub fn add(&mut self, mut extended_move: ExtendedMove) -> bool {
        let legal = self.position.generate_legal_moves().iter().any(|mv| mv == extended_move.mv);
        if !legal {
            log::debug!("rejected illegal move {} in position {}", extended_move.mv, self.position.to_fen());
            return false;
        }

        extended_move.side = self.position.side_to_move();
        self.position.make(extended_move.mv);
        self.moves.push(extended_move);
        self.hashes.push(self.position.zobrist());

        self.evaluate_terminal_conditions();
        true
    }

    /// Removes the last move, restoring the prior position and hash and clearing the result.
    ///
    /// # Returns
    /// The removed move, or None when the game has no moves.
    pub fn undo_last_move(&mut self) -> Option<ExtendedMove> {
        let extended_move = self.moves.pop()?;
        self.position.unmake();
        self.hashes.pop();
        self.result = UciResult::Unterminated;
        self.termination = GameTermination::Unspecified;
        Some(extended_move)
    }

    /// Attaches a variation to the move played by `side` on fullmove `fullmove`.
    ///
    /// # Returns
    /// `true` when the anchor ply exists, `false` otherwise.
    pub fn add_variation(&mut self, variation: Vec<ExtendedMove>, fullmove: u16, side: Color) -> bool {
        match self.ply_index(fullmove, side) {
            Some(index) => {
                self.moves[index].variations.push(variation);
                true
            }
            None => false,
        }
    }

    /// Sets the result from a PGN result token. Returns false for unknown tokens.
    pub fn set_result(&mut self, token: &str) -> bool {
        match UciResult::parse(token) {
            Some(result) => {
                self.result = result;
                true
            }
            None => false,
        }
    }

    /// Sets a tag value. The seven-tag roster and a few canonical tags route to typed fields: `Result` goes through
    /// `set_result`, `FEN` reinitialises the starting position as long as no move was added, and `TimeControl` is
    /// parsed into its descriptors. Everything else lands in the extra tag list.
    pub fn set_tag(&mut self, name: &str, value: &str) -> bool {
        match name {
            "Event" => self.tags.event = value.to_string(),
            "Site" => self.tags.site = value.to_string(),
            "Date" => self.tags.date = value.to_string(),
            "Round" => self.tags.round = value.to_string(),
            "White" => self.tags.white = value.to_string(),
            "Black" => self.tags.black = value.to_string(),
            "Result" => return self.set_result(value),
            "SetUp" => {}
            "FEN" => {
                if !self.moves.is_empty() {
                    return false;
                }
                match Position::new_from_fen(value) {
                    Ok(position) => {
                        self.start_fen = position.to_fen();
                        self.hashes = vec![position.zobrist()];
                        self.position = position;
                    }
                    Err(_) => return false,
                }
            }
            "TimeControl" => {
                self.time_control = value
                    .split(':')
                    .filter_map(|descriptor| TimeControl::parse(descriptor).ok())
                    .collect();
                self.extra_tags.push((name.to_string(), value.to_string()));
            }
            _ => self.extra_tags.push((name.to_string(), value.to_string())),
        }
        true
    }

    /// Evaluates the terminal conditions on the current position and sets result and termination when one holds.
    fn evaluate_terminal_conditions(&mut self) {
        let mover = !self.position.side_to_move();

        if self.position.is_mate() {
            self.result = UciResult::win_for(mover);
            self.termination = GameTermination::Checkmate;
        } else if self.position.is_stalemate() {
            self.result = UciResult::Draw;
            self.termination = GameTermination::Stalemate;
        } else if self.position.halfmove_clock() >= 100 {
            self.result = UciResult::Draw;
            self.termination = GameTermination::FiftyMoveRule;
        } else if self.is_threefold_repetition() {
            self.result = UciResult::Draw;
            self.termination = GameTermination::ThreefoldRepetition;
        } else if self.position.is_drawn_by_insufficient_material() {
            self.result = UciResult::Draw;
            self.termination = GameTermination::InsufficientMaterial;
        }
    }

    /// Returns true when the current position occurred three times within the halfmove-clock window. Positions older
    /// than the last pawn move or capture cannot repeat and are not examined.
    fn is_threefold_repetition(&self) -> bool {
        let window = self.position.halfmove_clock() as usize + 1;
        let current = self.position.zobrist();
        let occurrences = self
            .hashes
            .iter()
            .rev()
            .take(window)
            .filter(|&&hash| hash == current)
            .count();
        occurrences >= 3
    }

    //==================================================================================================================
    // Emission
    //==================================================================================================================

    /// Returns the movetext of the game in SAN, with optional comments and variations, without tags or line wrapping.
    pub fn san_notation(&self, with_comments: bool, with_variations: bool) -> String {
        let mut tokens = Vec::new();
        if with_comments && !self.introduction.is_empty() {
            tokens.push(format!("{{ {} }}", self.introduction));
        }
        movetext_tokens(&self.start_position(), &self.moves, with_comments, with_variations, &mut tokens);
        tokens.join(" ")
    }

    /// Renders the complete PGN of the game: tag section, a blank line and the movetext wrapped to 80 columns with the
    /// result token at the end.
    pub fn to_pgn(&self, with_variations: bool) -> String {
        let mut result = String::new();

        result.push_str(&format!("[Event \"{}\"]\n", self.tags.event));
        result.push_str(&format!("[Site \"{}\"]\n", self.tags.site));
        result.push_str(&format!("[Date \"{}\"]\n", self.tags.date));
        result.push_str(&format!("[Round \"{}\"]\n", self.tags.round));
        result.push_str(&format!("[White \"{}\"]\n", self.tags.white));
        result.push_str(&format!("[Black \"{}\"]\n", self.tags.black));
        result.push_str(&format!("[Result \"{}\"]\n", self.result));

        if let Some(entry) = self.eco() {
            result.push_str(&format!("[ECO \"{}\"]\n", entry.eco));
            result.push_str(&format!("[Opening \"{}\"]\n", entry.name));
        }
        if self.start_fen != INITIAL_POSITION_FEN {
            result.push_str("[SetUp \"1\"]\n");
            result.push_str(&format!("[FEN \"{}\"]\n", self.start_fen));
        }
        for (name, value) in &self.extra_tags {
            // ECO and Opening are computed above; a stored copy would come out twice.
            if name == "ECO" || name == "Opening" {
                continue;
            }
            result.push_str(&format!("[{} \"{}\"]\n", name, value));
        }
        result.push('\n');

        let mut movetext = self.san_notation(true, with_variations);
        if movetext.is_empty() {
            movetext = self.result.to_string();
        } else {
            movetext.push(' ');
            movetext.push_str(&self.result.to_string());
        }
        for line in wrap_text(&movetext, PGN_LINE_WIDTH) {
            result.push_str(&line);
            result.push('\n');
        }

        result
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_pgn(true))
    }
}

/// Appends the movetext tokens of a move sequence, recursing into variations. Numbering restarts with an ellipsis
/// after every interruption (a comment or a variation) so the emitted text stays unambiguous.
fn movetext_tokens(
    start: &Position,
    moves: &[ExtendedMove],
    with_comments: bool,
    with_variations: bool,
    tokens: &mut Vec<String>,
) {
    let mut position = start.clone();
    let mut need_number = true;

    for extended_move in moves {
        match position.side_to_move() {
            Color::White => tokens.push(format!("{}.", position.fullmove_number())),
            Color::Black if need_number => tokens.push(format!("{}...", position.fullmove_number())),
            Color::Black => {}
        }
        need_number = false;

        tokens.push(to_san(&position, extended_move.mv));

        if with_comments {
            let annotation = extended_move.annotation_text();
            if !annotation.is_empty() {
                tokens.push(format!("{{ {} }}", annotation));
                need_number = true;
            }
        }

        if with_variations {
            for variation in &extended_move.variations {
                tokens.push("(".to_string());
                movetext_tokens(&position, variation, with_comments, with_variations, tokens);
                tokens.push(")".to_string());
                need_number = true;
            }
        }

        position.make(extended_move.mv);
    }
}

/// Splits text into lines of at most `max_width` characters, breaking at word boundaries. Words longer than the width
/// get a line of their own.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.chars().count() + 1 + word.chars().count() > max_width {
            result.push(current_line);
            current_line = word.to_string();
        } else {
            current_line.push(' ');
            current_line.push_str(word);
        }
    }

    if !current_line.is_empty() {
        result.push(current_line);
    }

    result
}
