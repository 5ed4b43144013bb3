use std::{fmt, ops::Index, sync::LazyLock};

use regex::Regex;
use thiserror::Error;

use crate::{
    coordinates::{File, Rank, Square},
    move_gen::{generate_pseudo_legal_moves, MoveList},
    piece::{Color, Piece, PieceType},
    r#move::{CastleRights, CastlingSide, Move, MoveType},
    zobrist::{zobrist_castling, zobrist_en_passant, zobrist_piece_square, zobrist_white_to_move, Zobrist},
    INITIAL_POSITION_FEN,
};

/// Error type for parsing a FEN (Forsyth-Edwards Notation) string.
#[derive(Error, Debug, PartialEq)]
pub enum FenError {
    /// The string does not describe a valid chess position.
    #[error("Malformed FEN string: {0}")]
    MalformedFen(String),
}

/// Validates the overall shape of a FEN string: eight ranks of pieces and digits, a side to move, a castling field, an
/// en-passant field and optional halfmove/fullmove counters.
static FEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([pnbrqkPNBRQK1-8]{1,8}/){7}[pnbrqkPNBRQK1-8]{1,8} [wb] (-|[KQkq]{1,4}) (-|[a-h][36])( [0-9]+( [0-9]+)?)?$")
        .expect("The FEN regex should be valid")
});

//======================================================================================================================
// Game state and history
//======================================================================================================================

/// The part of a position that cannot be recomputed from the board array alone. A snapshot is pushed on the history
/// stack before every move so that `unmake` restores the position exactly, hash included.
#[derive(Clone, Copy, Debug)]
struct GameState {
    side_to_move: Color,
    castling_rights: CastleRights,
    en_passant_square: Option<Square>,
    halfmove_clock: u16,
    fullmove_number: u16,
    last_move: Option<Move>,
    zobrist: Zobrist,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            side_to_move: Color::White,
            castling_rights: CastleRights::empty(),
            en_passant_square: None,
            halfmove_clock: 0,
            fullmove_number: 1,
            last_move: None,
            zobrist: 0,
        }
    }
}

/// A stack of previous game states, one entry per move made and not yet unmade.
#[derive(Clone, Debug, Default)]
struct History {
    states: Vec<GameState>,
}

impl History {
    fn push(&mut self, state: GameState) {
        self.states.push(state);
    }

    fn pop(&mut self) -> GameState {
        self.states.pop().expect("The history should not be empty when a move is unmade")
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

//======================================================================================================================
// Position
//======================================================================================================================

/// A chess position.
///
/// Holds a 64-entry board array, the side to move, the castling rights, the en-passant target, the halfmove clock and
/// the fullmove number. The Polyglot-layout Zobrist hash is maintained incrementally through `make` and `unmake`.
#[derive(Clone, Debug)]
pub struct Position {
    board: [Option<Piece>; Square::COUNT],
    castling_rights_mask: [CastleRights; Square::COUNT],
    state: GameState,
    history: History,
}

impl Position {
    /// Creates a new chess position with the standard initial board setup.
    pub fn new() -> Self {
        Self::new_from_fen(INITIAL_POSITION_FEN)
            .expect("The initial position FEN is constant and always parses")
    }

    /// Creates a new chess position from a FEN string.
    ///
    /// The string is validated against the FEN grammar first; the halfmove clock and fullmove number may be omitted and
    /// default to 0 and 1.
    ///
    /// # Errors
    /// `FenError::MalformedFen` when the string fails validation or describes an impossible position (a side without
    /// exactly one king, or a pawn on the first or last rank).
    pub fn new_from_fen(fen: &str) -> Result<Self, FenError> {
        let fen = fen.trim();
        if !FEN_REGEX.is_match(fen) {
            return Err(FenError::MalformedFen(fen.to_string()));
        }

        let mut position = Position::empty();
        let mut fields = fen.split_whitespace();

        position.read_piece_placement(fields.next().expect("The regex guarantees the field"))?;
        position.state.side_to_move = match fields.next().expect("The regex guarantees the field") {
            "w" => Color::White,
            _ => Color::Black,
        };
        position.read_castling(fields.next().expect("The regex guarantees the field"));
        position.state.en_passant_square = match fields.next().expect("The regex guarantees the field") {
            "-" => None,
            square => Some(Square::try_from(square).expect("The regex guarantees a valid square")),
        };
        position.state.halfmove_clock = fields
            .next()
            .unwrap_or("0")
            .parse()
            .map_err(|_| FenError::MalformedFen(fen.to_string()))?;
        position.state.fullmove_number = fields
            .next()
            .unwrap_or("1")
            .parse()
            .map_err(|_| FenError::MalformedFen(fen.to_string()))?;

        if !position.validate() {
            return Err(FenError::MalformedFen(fen.to_string()));
        }
        position.sanitize_castling_rights();
        position.state.zobrist = position.compute_zobrist();

        Ok(position)
    }

    /// Drops castling rights whose king or rook is not on its original square. A right that survives this pass can
    /// always be executed as far as piece placement is concerned.
    fn sanitize_castling_rights(&mut self) {
        for color in Color::ALL {
            let rank = Rank::R1.relative_to_color(color);
            let king_in_place = self[Square::new(File::E, rank)] == Some(Piece::new(color, PieceType::King));
            for (side, rook_file) in [(CastlingSide::Kingside, File::H), (CastlingSide::Queenside, File::A)] {
                let rook_in_place = self[Square::new(rook_file, rank)] == Some(Piece::new(color, PieceType::Rook));
                if !(king_in_place && rook_in_place) {
                    self.state.castling_rights = self.state.castling_rights & !CastleRights::new(color, side);
                }
            }
        }
    }

    /// Creates a position with an empty board and the standard castling-rights mask.
    fn empty() -> Self {
        let mut castling_rights_mask = [CastleRights::empty(); Square::COUNT];
        castling_rights_mask[usize::from(Square::E1)] = CastleRights::both(Color::White);
        castling_rights_mask[usize::from(Square::H1)] = CastleRights::WHITE_KINGSIDE;
        castling_rights_mask[usize::from(Square::A1)] = CastleRights::WHITE_QUEENSIDE;
        castling_rights_mask[usize::from(Square::E8)] = CastleRights::both(Color::Black);
        castling_rights_mask[usize::from(Square::H8)] = CastleRights::BLACK_KINGSIDE;
        castling_rights_mask[usize::from(Square::A8)] = CastleRights::BLACK_QUEENSIDE;

        Self {
            board: [None; Square::COUNT],
            castling_rights_mask,
            state: GameState::default(),
            history: History::default(),
        }
    }

    fn read_piece_placement(&mut self, placement: &str) -> Result<(), FenError> {
        let mut rank = Rank::R8;
        let mut file = 0i8;
        for c in placement.chars() {
            if c == '/' {
                rank = rank.down(1).map_err(|_| FenError::MalformedFen(placement.to_string()))?;
                file = 0;
            } else if let Some(count) = c.to_digit(10) {
                file += count as i8;
                if file > 8 {
                    return Err(FenError::MalformedFen(placement.to_string()));
                }
            } else {
                let piece = Piece::try_from(c).map_err(|_| FenError::MalformedFen(placement.to_string()))?;
                if file >= 8 {
                    return Err(FenError::MalformedFen(placement.to_string()));
                }
                self.put_piece(piece, Square::new(File::from(file as u8), rank));
                file += 1;
            }
        }
        Ok(())
    }

    fn read_castling(&mut self, castling: &str) {
        for c in castling.chars() {
            self.state.castling_rights |= match c {
                'K' => CastleRights::WHITE_KINGSIDE,
                'Q' => CastleRights::WHITE_QUEENSIDE,
                'k' => CastleRights::BLACK_KINGSIDE,
                'q' => CastleRights::BLACK_QUEENSIDE,
                _ => CastleRights::empty(),
            };
        }
    }

    /// Checks the structural invariants a parsed position must satisfy: exactly one king per side and no pawn on the
    /// first or last rank.
    fn validate(&self) -> bool {
        for color in Color::ALL {
            let kings = Square::all()
                .filter(|&sq| self[sq] == Some(Piece::new(color, PieceType::King)))
                .count();
            if kings != 1 {
                return false;
            }
        }

        !Square::all().any(|sq| {
            (sq.rank() == Rank::R1 || sq.rank() == Rank::R8)
                && self[sq].is_some_and(|piece| piece.piece_type() == PieceType::Pawn)
        })
    }

    //==================================================================================================================
    // Accessors
    //==================================================================================================================

    /// Returns the color of the side to move.
    pub fn side_to_move(&self) -> Color {
        self.state.side_to_move
    }

    /// Returns the castling availability of the position.
    pub fn castling_availability(&self) -> CastleRights {
        self.state.castling_rights
    }

    /// Returns the en-passant target square, if a pawn just advanced two squares.
    pub fn en_passant_square(&self) -> Option<Square> {
        self.state.en_passant_square
    }

    /// Returns the number of plies since the last pawn move or capture.
    pub fn halfmove_clock(&self) -> u16 {
        self.state.halfmove_clock
    }

    /// Returns the fullmove number. Starts at 1 and increments after each black move.
    pub fn fullmove_number(&self) -> u16 {
        self.state.fullmove_number
    }

    /// Returns the Zobrist hash of the position.
    pub fn zobrist(&self) -> Zobrist {
        self.state.zobrist
    }

    /// Returns the last move made on this position, if any move was made since it was created.
    pub fn last_move(&self) -> Option<Move> {
        self.state.last_move
    }

    /// Returns the square occupied by the king of the specified color.
    ///
    /// # Panics
    /// Panics if no king of the specified color is on the board, which cannot happen for a position built through
    /// `new_from_fen` and mutated only through `make`/`unmake`.
    pub fn king_square(&self, color: Color) -> Square {
        Square::all()
            .find(|&sq| self[sq] == Some(Piece::new(color, PieceType::King)))
            .expect("There should always be a king of each color on the board")
    }

    //==================================================================================================================
    // Board mutation primitives
    //==================================================================================================================

    /// Places a piece on an empty square and updates the hash.
    fn put_piece(&mut self, piece: Piece, square: Square) {
        debug_assert_eq!(self.board[usize::from(square)], None);

        self.board[usize::from(square)] = Some(piece);
        self.state.zobrist ^= zobrist_piece_square(piece, square);
    }

    /// Removes the piece from a square and updates the hash.
    fn remove_piece(&mut self, square: Square) -> Piece {
        let piece = self.board[usize::from(square)]
            .expect("It is not possible to remove a piece from an empty square");
        self.board[usize::from(square)] = None;
        self.state.zobrist ^= zobrist_piece_square(piece, square);
        piece
    }

    /// Moves a piece from one square to an empty square and updates the hash.
    fn move_piece(&mut self, from: Square, to: Square) {
        let piece = self.remove_piece(from);
        self.put_piece(piece, to);
    }

    //==================================================================================================================
    // Attack detection
    //==================================================================================================================

    /// Determines whether a square is attacked by any piece of the specified color.
    ///
    /// Works by reverse lookup from the target square: pawn and leaper origins are probed directly, slider rays are
    /// walked until the first occupied square.
    pub fn is_attacked(&self, target: Square, by: Color) -> bool {
        // Pawns attack diagonally forward, so the attacking pawn stands one rank behind the target from its own point
        // of view.
        let pawn_rank_delta: i8 = match by {
            Color::White => -1,
            Color::Black => 1,
        };
        for file_delta in [-1, 1] {
            if let Some(from) = target.offset(file_delta, pawn_rank_delta) {
                if self[from] == Some(Piece::new(by, PieceType::Pawn)) {
                    return true;
                }
            }
        }

        const KNIGHT_OFFSETS: [(i8, i8); 8] = [(1, 2), (2, 1), (2, -1), (1, -2), (-1, -2), (-2, -1), (-2, 1), (-1, 2)];
        for (file_delta, rank_delta) in KNIGHT_OFFSETS {
            if let Some(from) = target.offset(file_delta, rank_delta) {
                if self[from] == Some(Piece::new(by, PieceType::Knight)) {
                    return true;
                }
            }
        }

        const KING_OFFSETS: [(i8, i8); 8] = [(1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0), (-1, -1), (0, -1), (1, -1)];
        for (file_delta, rank_delta) in KING_OFFSETS {
            if let Some(from) = target.offset(file_delta, rank_delta) {
                if self[from] == Some(Piece::new(by, PieceType::King)) {
                    return true;
                }
            }
        }

        for (file_delta, rank_delta) in KING_OFFSETS {
            let diagonal = file_delta != 0 && rank_delta != 0;
            let mut current = target;
            while let Some(from) = current.offset(file_delta, rank_delta) {
                if let Some(piece) = self[from] {
                    if piece.color() == by {
                        let slides = match piece.piece_type() {
                            PieceType::Queen => true,
                            PieceType::Bishop => diagonal,
                            PieceType::Rook => !diagonal,
                            _ => false,
                        };
                        if slides {
                            return true;
                        }
                    }
                    break;
                }
                current = from;
            }
        }

        false
    }

    /// Determines if the current side to move is in check.
    pub fn is_check(&self) -> bool {
        self.is_attacked(self.king_square(self.side_to_move()), !self.side_to_move())
    }

    //==================================================================================================================
    // Move generation
    //==================================================================================================================

    /// Returns the complete list of legal moves in the current position.
    ///
    /// Generation is pseudo-legal-then-filter: every candidate is made on a scratch copy, rejected when the mover's
    /// king is left attacked, and unmade.
    pub fn generate_legal_moves(&self) -> MoveList {
        let mut pseudo_legal = MoveList::new();
        generate_pseudo_legal_moves(self, &mut pseudo_legal);

        let us = self.side_to_move();
        let mut scratch = self.clone_bare();
        pseudo_legal
            .iter()
            .filter(|&mv| {
                scratch.make(mv);
                let legal = !scratch.is_attacked(scratch.king_square(us), !us);
                scratch.unmake();
                legal
            })
            .collect()
    }

    /// Returns a copy of the position without its history, used as scratch space for legality testing.
    fn clone_bare(&self) -> Position {
        Position {
            board: self.board,
            castling_rights_mask: self.castling_rights_mask,
            state: self.state,
            history: History::default(),
        }
    }

    /// Returns the king's move for a castling right of the given color and side (e1g1, e1c1, e8g8 or e8c8).
    pub fn castling_move(color: Color, side: CastlingSide) -> Move {
        let rank = Rank::R1.relative_to_color(color);
        let to_file = match side {
            CastlingSide::Kingside => File::G,
            CastlingSide::Queenside => File::C,
        };
        Move::new_castling(
            Square::new(File::E, rank),
            Square::new(to_file, rank),
            Piece::new(color, PieceType::King),
            side,
        )
    }

    //==================================================================================================================
    // Making and unmaking moves
    //==================================================================================================================

    /// Makes a move on the position.
    ///
    /// Updates the board, the castling rights, the en-passant target, the clocks and the hash, and pushes the previous
    /// state on the history stack so the move can be unmade. The move must come from `generate_legal_moves`; the
    /// behavior for other moves is undefined.
    pub fn make(&mut self, mv: Move) {
        self.history.push(self.state);

        let us = self.state.side_to_move;

        // The en-passant file and side-to-move keys are state dependent, so their contributions are removed up front
        // and the new ones added at the end.
        self.state.zobrist ^= self.en_passant_contribution();
        if us == Color::White {
            self.state.zobrist ^= zobrist_white_to_move();
        }

        match mv.move_type() {
            MoveType::Basic | MoveType::TwoSquarePawnPush => {
                self.move_piece(mv.from_square(), mv.to_square());
            }
            MoveType::Capture(_) => {
                self.remove_piece(mv.to_square());
                self.move_piece(mv.from_square(), mv.to_square());
            }
            MoveType::Promotion(promotion) => {
                self.remove_piece(mv.from_square());
                self.put_piece(promotion, mv.to_square());
            }
            MoveType::CapturePromotion { promotion, .. } => {
                self.remove_piece(mv.to_square());
                self.remove_piece(mv.from_square());
                self.put_piece(promotion, mv.to_square());
            }
            MoveType::EnPassant => {
                self.remove_piece(Square::new(mv.to_square().file(), mv.from_square().rank()));
                self.move_piece(mv.from_square(), mv.to_square());
            }
            MoveType::Castling(side) => {
                let rank = Rank::R1.relative_to_color(us);
                let (rook_from_file, rook_to_file) = match side {
                    CastlingSide::Kingside => (File::H, File::F),
                    CastlingSide::Queenside => (File::A, File::D),
                };
                self.move_piece(mv.from_square(), mv.to_square());
                self.move_piece(Square::new(rook_from_file, rank), Square::new(rook_to_file, rank));
            }
        }

        // A move that touches a king or rook origin square, or captures on one, drops the corresponding rights.
        let touched = self.castling_rights_mask[usize::from(mv.from_square())]
            | self.castling_rights_mask[usize::from(mv.to_square())];
        let new_rights = self.state.castling_rights & !touched;
        if new_rights != self.state.castling_rights {
            self.state.zobrist ^= zobrist_castling(self.state.castling_rights) ^ zobrist_castling(new_rights);
            self.state.castling_rights = new_rights;
        }

        self.state.en_passant_square = match mv.move_type() {
            MoveType::TwoSquarePawnPush => Some(
                Square::new(mv.from_square().file(), Rank::R3.relative_to_color(us)),
            ),
            _ => None,
        };

        let resets_clock = mv.piece().piece_type() == PieceType::Pawn || mv.captured().is_some();
        self.state.halfmove_clock = if resets_clock { 0 } else { self.state.halfmove_clock + 1 };
        if us == Color::Black {
            self.state.fullmove_number += 1;
        }

        self.state.side_to_move = !us;
        self.state.last_move = Some(mv);

        if self.state.side_to_move == Color::White {
            self.state.zobrist ^= zobrist_white_to_move();
        }
        self.state.zobrist ^= self.en_passant_contribution();
    }

    /// Unmakes the last move made on the position, restoring board, state and hash exactly.
    ///
    /// # Panics
    /// Panics if no move was made on this position.
    pub fn unmake(&mut self) {
        let mv = self.state.last_move.expect("unmake requires a move to undo");
        let us = !self.state.side_to_move;

        match mv.move_type() {
            MoveType::Basic | MoveType::TwoSquarePawnPush => {
                self.move_piece(mv.to_square(), mv.from_square());
            }
            MoveType::Capture(capture) => {
                self.move_piece(mv.to_square(), mv.from_square());
                self.put_piece(capture, mv.to_square());
            }
            MoveType::Promotion(_) => {
                self.remove_piece(mv.to_square());
                self.put_piece(mv.piece(), mv.from_square());
            }
            MoveType::CapturePromotion { capture, .. } => {
                self.remove_piece(mv.to_square());
                self.put_piece(capture, mv.to_square());
                self.put_piece(mv.piece(), mv.from_square());
            }
            MoveType::EnPassant => {
                self.move_piece(mv.to_square(), mv.from_square());
                self.put_piece(
                    Piece::new(!us, PieceType::Pawn),
                    Square::new(mv.to_square().file(), mv.from_square().rank()),
                );
            }
            MoveType::Castling(side) => {
                let rank = Rank::R1.relative_to_color(us);
                let (rook_from_file, rook_to_file) = match side {
                    CastlingSide::Kingside => (File::H, File::F),
                    CastlingSide::Queenside => (File::A, File::D),
                };
                self.move_piece(mv.to_square(), mv.from_square());
                self.move_piece(Square::new(rook_to_file, rank), Square::new(rook_from_file, rank));
            }
        }

        // The snapshot restores everything else, the hash included, so the piece-key updates made above are discarded
        // with the rest of the transient state.
        self.state = self.history.pop();
    }

    /// Returns true if any move was made on this position since it was created.
    pub fn has_moves_made(&self) -> bool {
        !self.history.is_empty()
    }

    //==================================================================================================================
    // Hashing
    //==================================================================================================================

    /// Computes the Zobrist hash of the position from scratch. Used when a position is created; `make` maintains the
    /// hash incrementally afterwards.
    fn compute_zobrist(&self) -> Zobrist {
        let mut hash = 0;
        for square in Square::all() {
            if let Some(piece) = self[square] {
                hash ^= zobrist_piece_square(piece, square);
            }
        }
        hash ^= zobrist_castling(self.state.castling_rights);
        hash ^= self.en_passant_contribution();
        if self.state.side_to_move == Color::White {
            hash ^= zobrist_white_to_move();
        }
        hash
    }

    /// Returns the en-passant contribution to the hash: the file key of the target square, but only when a pawn of the
    /// side to move could pseudo-legally capture en passant. This is the standard Polyglot gating rule.
    fn en_passant_contribution(&self) -> Zobrist {
        let Some(target) = self.state.en_passant_square else {
            return 0;
        };

        let us = self.state.side_to_move;
        let rank_delta: i8 = match us {
            Color::White => -1,
            Color::Black => 1,
        };
        let pawn = Piece::new(us, PieceType::Pawn);
        for file_delta in [-1, 1] {
            if let Some(from) = target.offset(file_delta, rank_delta) {
                if self[from] == Some(pawn) {
                    return zobrist_en_passant(target.file());
                }
            }
        }
        0
    }

    //==================================================================================================================
    // Terminal state detection
    //==================================================================================================================

    /// Returns true if the side to move is checkmated.
    pub fn is_mate(&self) -> bool {
        self.is_check() && self.generate_legal_moves().is_empty()
    }

    /// Returns true if the side to move is stalemated.
    pub fn is_stalemate(&self) -> bool {
        !self.is_check() && self.generate_legal_moves().is_empty()
    }

    /// Returns true if neither side has enough material to deliver mate: king against king, king and one minor piece
    /// against king, or king and bishop against king and bishop with both bishops on the same square color.
    pub fn is_drawn_by_insufficient_material(&self) -> bool {
        let mut extra: Vec<(Piece, Square)> = Vec::new();
        for square in Square::all() {
            match self[square] {
                None => {}
                Some(piece) if piece.piece_type() == PieceType::King => {}
                Some(piece) => {
                    if extra.len() == 2 {
                        return false;
                    }
                    extra.push((piece, square));
                }
            }
        }

        match extra.as_slice() {
            [] => true,
            [(piece, _)] => matches!(piece.piece_type(), PieceType::Knight | PieceType::Bishop),
            [(first, first_sq), (second, second_sq)] => {
                let both_bishops = first.piece_type() == PieceType::Bishop
                    && second.piece_type() == PieceType::Bishop
                    && first.color() != second.color();
                let square_color = |sq: &Square| (sq.file() as u8 + sq.rank() as u8) % 2;
                both_bishops && square_color(first_sq) == square_color(second_sq)
            }
            _ => false,
        }
    }

    //==================================================================================================================
    // FEN rendering and helpers
    //==================================================================================================================

    /// Returns the FEN representation of the position. Never fails.
    pub fn to_fen(&self) -> String {
        let mut result = String::with_capacity(90);

        for rank in Rank::ALL.iter().rev() {
            let mut empty_count = 0;
            for file in File::ALL {
                match self[Square::new(file, *rank)] {
                    Some(piece) => {
                        if empty_count > 0 {
                            result.push_str(&empty_count.to_string());
                            empty_count = 0;
                        }
                        result.push(char::from(piece));
                    }
                    None => empty_count += 1,
                }
            }
            if empty_count > 0 {
                result.push_str(&empty_count.to_string());
            }
            if *rank != Rank::R1 {
                result.push('/');
            }
        }

        result.push(' ');
        result.push(match self.side_to_move() {
            Color::White => 'w',
            Color::Black => 'b',
        });
        result.push(' ');
        result.push_str(&self.castling_availability().to_string());
        result.push(' ');
        match self.en_passant_square() {
            Some(square) => result.push_str(&square.to_string()),
            None => result.push('-'),
        }
        result.push_str(&format!(" {} {}", self.halfmove_clock(), self.fullmove_number()));

        result
    }

    /// Returns a position with colors and ranks swapped. Castling rights and the en-passant target are mirrored along
    /// with the board. Intended as a testing aid for color-symmetry checks.
    pub fn mirror(&self) -> Position {
        let mut mirrored = Position::empty();

        for square in Square::all() {
            if let Some(piece) = self[square] {
                let flipped_square = Square::new(square.file(), Rank::from(7 - square.rank() as u8));
                mirrored.put_piece(Piece::new(!piece.color(), piece.piece_type()), flipped_square);
            }
        }

        mirrored.state.side_to_move = !self.state.side_to_move;
        for color in Color::ALL {
            for side in CastlingSide::ALL {
                if self.state.castling_rights.contains(CastleRights::new(color, side)) {
                    mirrored.state.castling_rights |= CastleRights::new(!color, side);
                }
            }
        }
        mirrored.state.en_passant_square =
            self.state.en_passant_square.map(|sq| Square::new(sq.file(), Rank::from(7 - sq.rank() as u8)));
        mirrored.state.halfmove_clock = self.state.halfmove_clock;
        mirrored.state.fullmove_number = self.state.fullmove_number;
        mirrored.state.zobrist = mirrored.compute_zobrist();

        mirrored
    }

    /// Returns a simple eight-line board diagram, rank 8 on top.
    pub fn to_compact_string(&self) -> String {
        let mut result = String::with_capacity(9 * 16);
        for rank in Rank::ALL.iter().rev() {
            result.push(char::from(u8::from(*rank) + b'1'));
            for file in File::ALL {
                result.push(' ');
                result.push(self[Square::new(file, *rank)].map_or('.', char::from));
            }
            result.push('\n');
        }
        result.push_str("  a b c d e f g h");
        result
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<Square> for Position {
    type Output = Option<Piece>;

    fn index(&self, index: Square) -> &Self::Output {
        &self.board[usize::from(index)]
    }
}

impl PartialEq for Position {
    /// Two positions are equal when board, side to move, castling rights, en-passant target, clocks and hash all
    /// match. The history is not part of the comparison.
    fn eq(&self, other: &Self) -> bool {
        self.board == other.board
            && self.state.side_to_move == other.state.side_to_move
            && self.state.castling_rights == other.state.castling_rights
            && self.state.en_passant_square == other.state.en_passant_square
            && self.state.halfmove_clock == other.state.halfmove_clock
            && self.state.fullmove_number == other.state.fullmove_number
            && self.state.zobrist == other.state.zobrist
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_fen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_position() {
        let position = Position::new();
        assert_eq!(position.side_to_move(), Color::White);
        assert_eq!(position.castling_availability(), CastleRights::all());
        assert_eq!(position.en_passant_square(), None);
        assert_eq!(position.halfmove_clock(), 0);
        assert_eq!(position.fullmove_number(), 1);
        assert_eq!(position[Square::E1], Some(Piece::WHITE_KING));
        assert_eq!(position[Square::D8], Some(Piece::BLACK_QUEEN));
    }

    #[test]
    fn test_fen_round_trip() {
        let fens = [
            INITIAL_POSITION_FEN,
            "r1bqkb1r/ppp1pppp/8/8/3nn3/2N5/PPP2PPP/R1BQKB1R w KQkq - 0 1",
            "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1",
            "8/8/8/8/8/5k2/6q1/7K w - - 12 71",
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
        ];
        for fen in fens {
            assert_eq!(Position::new_from_fen(fen).unwrap().to_fen(), fen);
        }
    }

    #[test]
    fn test_fen_defaults_for_missing_counters() {
        let position = Position::new_from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq -").unwrap();
        assert_eq!(position.halfmove_clock(), 0);
        assert_eq!(position.fullmove_number(), 1);
    }

    #[test]
    fn test_malformed_fen_is_rejected() {
        let malformed = [
            "",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP w KQkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x KQkq - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq e5 0 1",
            "8/8/8/8/8/8/8/8 w - - 0 1",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNRR w KQkq - 0 1",
            "rnbqkbnr/p8/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        ];
        for fen in malformed {
            assert!(Position::new_from_fen(fen).is_err(), "FEN should be rejected: {}", fen);
        }
    }

    #[test]
    fn test_castling_rights_without_rook_are_dropped() {
        let position = Position::new_from_fen("4k3/8/8/8/8/8/8/4K2R w KQkq - 0 1").unwrap();
        assert_eq!(position.castling_availability(), CastleRights::WHITE_KINGSIDE);
    }

    #[test]
    fn test_initial_position_has_twenty_moves() {
        assert_eq!(Position::new().generate_legal_moves().len(), 20);
    }

    #[test]
    fn test_make_e2e4_sets_en_passant_target() {
        let mut position = Position::new();
        position.make(Move::new_two_square_pawn_push(Square::E2, Square::E4, Piece::WHITE_PAWN));
        assert_eq!(position.to_fen(), "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1");
    }

    #[test]
    fn test_make_unmake_restores_position() {
        let original = Position::new_from_fen("r3k2r/p1pp1ppp/8/4p3/3P4/8/PPP1PPPP/R3K2R w KQkq - 0 5").unwrap();
        let mut position = original.clone();
        for mv in original.generate_legal_moves().iter() {
            position.make(mv);
            position.unmake();
            assert_eq!(position, original, "make/unmake should round-trip for {}", mv);
        }
    }

    #[test]
    fn test_castling_moves_and_rights() {
        let position = Position::new_from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let moves: Vec<String> = position.generate_legal_moves().iter().map(|m| m.to_uci_string()).collect();
        assert!(moves.contains(&"e1g1".to_string()));
        assert!(moves.contains(&"e1c1".to_string()));

        let mut position = position;
        position.make(Position::castling_move(Color::White, CastlingSide::Kingside));
        assert_eq!(position.castling_availability().to_string(), "kq");
        assert_eq!(position[Square::F1], Some(Piece::WHITE_ROOK));
        assert_eq!(position[Square::G1], Some(Piece::WHITE_KING));
    }

    #[test]
    fn test_castling_blocked_by_attack() {
        // The black rook on f8 covers f1, so white cannot castle kingside but can castle queenside.
        let position = Position::new_from_fen("5r1k/8/8/8/8/8/8/R3K2R w KQ - 0 1").unwrap();
        let moves: Vec<String> = position.generate_legal_moves().iter().map(|m| m.to_uci_string()).collect();
        assert!(!moves.contains(&"e1g1".to_string()));
        assert!(moves.contains(&"e1c1".to_string()));
    }

    #[test]
    fn test_transposition_hashes_are_equal() {
        let mut via_e4 = Position::new();
        via_e4.make(Move::new_two_square_pawn_push(Square::E2, Square::E4, Piece::WHITE_PAWN));
        via_e4.make(Move::new(Square::G8, Square::F6, Piece::BLACK_KNIGHT));
        via_e4.make(Move::new(Square::G1, Square::F3, Piece::WHITE_KNIGHT));
        via_e4.make(Move::new(Square::B8, Square::C6, Piece::BLACK_KNIGHT));

        let mut via_nf3 = Position::new();
        via_nf3.make(Move::new(Square::G1, Square::F3, Piece::WHITE_KNIGHT));
        via_nf3.make(Move::new(Square::B8, Square::C6, Piece::BLACK_KNIGHT));
        via_nf3.make(Move::new_two_square_pawn_push(Square::E2, Square::E4, Piece::WHITE_PAWN));
        via_nf3.make(Move::new(Square::G8, Square::F6, Piece::BLACK_KNIGHT));

        // The two move orders only differ in the halfmove clock, which the hash does not cover.
        assert_eq!(via_e4.zobrist(), via_nf3.zobrist());
    }

    #[test]
    fn test_en_passant_hash_gating() {
        // No black pawn can capture on e3, so the en-passant file does not participate in the hash.
        let with_unusable_ep =
            Position::new_from_fen("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1").unwrap();
        let without_ep =
            Position::new_from_fen("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1").unwrap();
        assert_eq!(with_unusable_ep.zobrist(), without_ep.zobrist());

        // The black pawn on d4 can capture on e3, so here the file key participates.
        let with_usable_ep =
            Position::new_from_fen("rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 3").unwrap();
        let same_without_ep =
            Position::new_from_fen("rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 3").unwrap();
        assert_ne!(with_usable_ep.zobrist(), same_without_ep.zobrist());
    }

    #[test]
    fn test_incremental_hash_matches_recomputed() {
        let mut position = Position::new();
        let moves = ["e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "g8f6", "e1g1"];
        for mv_str in moves {
            let mv = crate::notation::parse_coordinate_notation(&position, mv_str).unwrap();
            position.make(mv);
            let from_fen = Position::new_from_fen(&position.to_fen()).unwrap();
            assert_eq!(position.zobrist(), from_fen.zobrist(), "after {}", mv_str);
        }
    }

    #[test]
    fn test_mate_and_stalemate() {
        let mate = Position::new_from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3").unwrap();
        assert!(mate.is_mate());
        assert!(!mate.is_stalemate());

        let stalemate = Position::new_from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert!(stalemate.is_stalemate());
        assert!(!stalemate.is_mate());
    }

    #[test]
    fn test_insufficient_material() {
        assert!(Position::new_from_fen("8/8/8/4k3/8/8/8/4K3 w - - 0 1").unwrap().is_drawn_by_insufficient_material());
        assert!(Position::new_from_fen("8/8/8/4k3/8/8/8/2B1K3 w - - 0 1")
            .unwrap()
            .is_drawn_by_insufficient_material());
        // Both bishops on dark squares.
        assert!(Position::new_from_fen("2b5/8/8/4k3/8/8/8/2B1K3 w - - 0 1")
            .unwrap()
            .is_drawn_by_insufficient_material());
        // Opposite-colored bishops can still mate.
        assert!(!Position::new_from_fen("1b6/8/8/4k3/8/8/8/2B1K3 w - - 0 1")
            .unwrap()
            .is_drawn_by_insufficient_material());
        assert!(!Position::new().is_drawn_by_insufficient_material());
        assert!(!Position::new_from_fen("8/8/8/4k3/8/8/8/2R1K3 w - - 0 1")
            .unwrap()
            .is_drawn_by_insufficient_material());
    }

    #[test]
    fn test_en_passant_capture() {
        let mut position =
            Position::new_from_fen("rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 3").unwrap();
        let mv = position
            .generate_legal_moves()
            .iter()
            .find(|m| m.to_uci_string() == "d4e3")
            .expect("The en-passant capture should be legal");
        position.make(mv);
        assert_eq!(position[Square::E4], None);
        assert_eq!(position[Square::E3], Some(Piece::BLACK_PAWN));
    }

    #[test]
    fn test_mirror() {
        let position =
            Position::new_from_fen("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1").unwrap();
        let mirrored = position.mirror();
        assert_eq!(mirrored.to_fen(), "rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq e6 0 1");
        assert_eq!(mirrored.mirror(), position);
    }
}
