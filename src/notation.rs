use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::{
    coordinates::{File, Rank, Square},
    piece::{Piece, PieceType},
    position::Position,
    r#move::{CastlingSide, Move, MoveType},
};

/// Represents errors that can occur when parsing chess move notation.
#[derive(Error, Debug)]
pub enum NotationError {
    /// The overall notation format is incorrect.
    #[error("Invalid notation: {0}")]
    InvalidNotation(String),

    /// There is no piece of the side to move at the source square.
    #[error("There is no piece to move at {0}")]
    NoPieceAtFromSquare(Square),

    /// The notation is well formed but matches no legal move in the position.
    #[error("Illegal move: {0}")]
    IllegalMove(String),

    /// The notation matches more than one legal move.
    #[error("Ambiguous move: {0}")]
    AmbiguousMove(String),
}

/// Matches a SAN token: castling, or an optional piece letter, optional disambiguators, optional capture marker, a
/// destination square and an optional promotion. Trailing check, mate and annotation characters are tolerated.
static SAN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<castle>O-O(?:-O)?)|(?P<piece>[KQRBN])?(?P<dfile>[a-h])?(?P<drank>[1-8])?(?P<capture>x)?(?P<dest>[a-h][1-8])(?:=(?P<promo>[QRBN]))?)(?P<suffix>[+#!?]*)$",
    )
    .expect("The SAN regex should be valid")
});

/// Returns true if the token has the shape of a SAN move.
pub fn is_san_token(token: &str) -> bool {
    SAN_REGEX.is_match(token)
}

//======================================================================================================================
// Coordinate notation
//======================================================================================================================

/// Parses a chess move in UCI coordinate notation and converts it to a Move.
///
/// Coordinate notation is the source square followed by the destination square, optionally followed by a promotion
/// piece ("e2e4", "e7e8q"). Castling arrives as the king's two-square move and is recognized from it.
///
/// # Errors
/// * `InvalidNotation` when the string is not four or five characters of squares and promotion
/// * `NoPieceAtFromSquare` when the source square is empty
pub fn parse_coordinate_notation(position: &Position, notation: &str) -> Result<Move, NotationError> {
    if notation.len() < 4 || notation.len() > 5 {
        return Err(NotationError::InvalidNotation(notation.to_string()));
    }

    let from = Square::try_from(&notation[0..2]).map_err(|_| NotationError::InvalidNotation(notation.to_string()))?;
    let to = Square::try_from(&notation[2..4]).map_err(|_| NotationError::InvalidNotation(notation.to_string()))?;
    let piece = position[from].ok_or(NotationError::NoPieceAtFromSquare(from))?;

    let promotion = match notation.chars().nth(4) {
        Some(c) => {
            let piece_type =
                PieceType::try_from(c).map_err(|_| NotationError::InvalidNotation(notation.to_string()))?;
            Some(Piece::new(piece.color(), piece_type))
        }
        None => None,
    };

    let capture = match position[to] {
        Some(target) if target.color() != piece.color() => Some(target),
        Some(_) => return Err(NotationError::IllegalMove(notation.to_string())),
        None => None,
    };

    // A pawn moving diagonally to an empty square must be an en-passant capture.
    if piece.piece_type() == PieceType::Pawn && capture.is_none() && from.file() != to.file() {
        return Ok(Move::new_en_passant(from, to, piece));
    }

    // A king moving two files from the e-file must be a castling move.
    if piece.piece_type() == PieceType::King && from.file() == File::E {
        if to.file() == File::G {
            return Ok(Move::new_castling(from, to, piece, CastlingSide::Kingside));
        }
        if to.file() == File::C {
            return Ok(Move::new_castling(from, to, piece, CastlingSide::Queenside));
        }
    }

    if let Some(promotion) = promotion {
        return Ok(match capture {
            Some(capture) => Move::new_capture_promotion(from, to, piece, capture, promotion),
            None => Move::new_promotion(from, to, piece, promotion),
        });
    }

    if let Some(capture) = capture {
        return Ok(Move::new_capture(from, to, piece, capture));
    }

    if piece.piece_type() == PieceType::Pawn && (from.rank() as i8 - to.rank() as i8).abs() == 2 {
        return Ok(Move::new_two_square_pawn_push(from, to, piece));
    }

    Ok(Move::new(from, to, piece))
}

//======================================================================================================================
// Standard algebraic notation
//======================================================================================================================

/// Parses a SAN token against a position and returns the matching legal move.
///
/// Candidates are selected from the legal moves by destination, moving piece type and promotion; when more than one
/// remains, the disambiguator characters are matched as a file then a rank.
///
/// # Errors
/// * `InvalidNotation` when the token is not SAN shaped
/// * `IllegalMove` when no legal move matches
/// * `AmbiguousMove` when several legal moves match an underspecified token
pub fn parse_san(position: &Position, token: &str) -> Result<Move, NotationError> {
    let captures = SAN_REGEX.captures(token).ok_or_else(|| NotationError::InvalidNotation(token.to_string()))?;
    let legal_moves = position.generate_legal_moves();

    if let Some(castle) = captures.name("castle") {
        let side = if castle.as_str() == "O-O" { CastlingSide::Kingside } else { CastlingSide::Queenside };
        return legal_moves
            .iter()
            .find(|mv| mv.move_type() == MoveType::Castling(side))
            .ok_or_else(|| NotationError::IllegalMove(token.to_string()));
    }

    let dest = Square::try_from(captures.name("dest").expect("The regex guarantees a destination").as_str())
        .expect("The regex guarantees a valid square");
    let piece_type = captures
        .name("piece")
        .map(|m| PieceType::try_from(m.as_str().chars().next().expect("The match is one character")))
        .transpose()
        .expect("The regex only matches piece letters")
        .unwrap_or(PieceType::Pawn);
    let promotion = captures
        .name("promo")
        .map(|m| PieceType::try_from(m.as_str().chars().next().expect("The match is one character")))
        .transpose()
        .expect("The regex only matches piece letters");

    let mut candidates: Vec<Move> = legal_moves
        .iter()
        .filter(|mv| {
            mv.to_square() == dest
                && mv.piece().piece_type() == piece_type
                && mv.promotion().map(|p| p.piece_type()) == promotion
        })
        .collect();

    if candidates.len() > 1 {
        if let Some(dfile) = captures.name("dfile") {
            let file = File::try_from(dfile.as_str().chars().next().expect("The match is one character"))
                .expect("The regex only matches file letters");
            candidates.retain(|mv| mv.from_square().file() == file);
        }
    }
    if candidates.len() > 1 {
        if let Some(drank) = captures.name("drank") {
            let rank = Rank::try_from(drank.as_str().chars().next().expect("The match is one character"))
                .expect("The regex only matches rank digits");
            candidates.retain(|mv| mv.from_square().rank() == rank);
        }
    }

    match candidates.as_slice() {
        [mv] => Ok(*mv),
        [] => Err(NotationError::IllegalMove(token.to_string())),
        _ => Err(NotationError::AmbiguousMove(token.to_string())),
    }
}

/// Renders a legal move in SAN: piece letter (omitted for pawns), minimal disambiguation (file, then rank, then both),
/// capture marker, destination, promotion and the check or mate suffix. Castling renders as O-O or O-O-O.
pub fn to_san(position: &Position, mv: Move) -> String {
    let mut result = String::new();

    match mv.move_type() {
        MoveType::Castling(CastlingSide::Kingside) => result.push_str("O-O"),
        MoveType::Castling(CastlingSide::Queenside) => result.push_str("O-O-O"),
        _ => {
            let piece_type = mv.piece().piece_type();
            if piece_type == PieceType::Pawn {
                // Pawn captures always name the source file.
                if mv.captured().is_some() {
                    result.push(char::from(mv.from_square().file()));
                }
            } else {
                result.push(char::from(piece_type));
                result.push_str(&disambiguation(position, mv));
            }

            if mv.captured().is_some() {
                result.push('x');
            }
            result.push_str(&mv.to_square().to_string());

            if let Some(promotion) = mv.promotion() {
                result.push('=');
                result.push(char::from(promotion.piece_type()));
            }
        }
    }

    // The check and mate suffixes are observed on the position after the move.
    let mut scratch = position.clone();
    scratch.make(mv);
    if scratch.is_mate() {
        result.push('#');
    } else if scratch.is_check() {
        result.push('+');
    }

    result
}

/// Returns the minimal disambiguation prefix for a non-pawn move: empty when no other piece of the same type can reach
/// the destination, otherwise the source file, the source rank, or both.
fn disambiguation(position: &Position, mv: Move) -> String {
    let rivals: Vec<Move> = position
        .generate_legal_moves()
        .iter()
        .filter(|other| {
            other.to_square() == mv.to_square()
                && other.piece() == mv.piece()
                && other.from_square() != mv.from_square()
        })
        .collect();

    if rivals.is_empty() {
        return String::new();
    }

    let file_is_unique = rivals.iter().all(|other| other.from_square().file() != mv.from_square().file());
    if file_is_unique {
        return char::from(mv.from_square().file()).to_string();
    }

    let rank_is_unique = rivals.iter().all(|other| other.from_square().rank() != mv.from_square().rank());
    if rank_is_unique {
        return mv.from_square().rank().to_string();
    }

    mv.from_square().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(fen: &str) -> Position {
        Position::new_from_fen(fen).expect("The test FEN should be valid")
    }

    mod coordinate_notation_tests {
        use super::*;

        #[test]
        fn test_parse_basic_and_double_push() {
            let start = Position::new();
            let mv = parse_coordinate_notation(&start, "e2e4").unwrap();
            assert_eq!(mv.move_type(), MoveType::TwoSquarePawnPush);
            let mv = parse_coordinate_notation(&start, "g1f3").unwrap();
            assert_eq!(mv.move_type(), MoveType::Basic);
            assert_eq!(mv.piece(), Piece::WHITE_KNIGHT);
        }

        #[test]
        fn test_parse_castling_from_king_move() {
            let pos = position("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
            let mv = parse_coordinate_notation(&pos, "e1g1").unwrap();
            assert_eq!(mv.move_type(), MoveType::Castling(CastlingSide::Kingside));
            let mv = parse_coordinate_notation(&pos, "e1c1").unwrap();
            assert_eq!(mv.move_type(), MoveType::Castling(CastlingSide::Queenside));
        }

        #[test]
        fn test_parse_promotion_and_en_passant() {
            let pos = position("8/2P5/8/8/5k2/8/4p3/2K5 w - - 0 1");
            let mv = parse_coordinate_notation(&pos, "c7c8q").unwrap();
            assert_eq!(mv.promotion(), Some(Piece::WHITE_QUEEN));

            let pos = position("rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 3");
            let mv = parse_coordinate_notation(&pos, "d4e3").unwrap();
            assert_eq!(mv.move_type(), MoveType::EnPassant);
        }

        #[test]
        fn test_parse_rejects_garbage() {
            let start = Position::new();
            assert!(parse_coordinate_notation(&start, "e2").is_err());
            assert!(parse_coordinate_notation(&start, "e2e4e5").is_err());
            assert!(parse_coordinate_notation(&start, "e4e5").is_err());
        }
    }

    mod san_tests {
        use super::*;

        #[test]
        fn test_parse_simple_moves() {
            let start = Position::new();
            assert_eq!(parse_san(&start, "e4").unwrap().to_uci_string(), "e2e4");
            assert_eq!(parse_san(&start, "Nf3").unwrap().to_uci_string(), "g1f3");
        }

        #[test]
        fn test_parse_tolerates_suffixes() {
            let start = Position::new();
            assert_eq!(parse_san(&start, "e4!?").unwrap().to_uci_string(), "e2e4");
            let pos = position("rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2");
            assert_eq!(parse_san(&pos, "Qh4#").unwrap().to_uci_string(), "d8h4");
        }

        #[test]
        fn test_parse_disambiguation() {
            // Two knights can reach e5; the file character selects one.
            let pos = position("rnbqkb1r/pppppppp/8/8/8/3N1N2/PPPPPPPP/R1BQKB1R w KQkq - 0 1");
            assert!(parse_san(&pos, "Ne5").is_err());
            assert_eq!(parse_san(&pos, "Nde5").unwrap().to_uci_string(), "d3e5");
            assert_eq!(parse_san(&pos, "Nfe5").unwrap().to_uci_string(), "f3e5");
        }

        #[test]
        fn test_parse_castling_and_promotion() {
            let pos = position("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
            assert_eq!(parse_san(&pos, "O-O").unwrap().to_uci_string(), "e1g1");
            assert_eq!(parse_san(&pos, "O-O-O").unwrap().to_uci_string(), "e1c1");

            let pos = position("8/2P5/8/8/5k2/8/8/2K5 w - - 0 1");
            assert_eq!(parse_san(&pos, "c8=N").unwrap().to_uci_string(), "c7c8n");
        }

        #[test]
        fn test_san_round_trip() {
            let fens = [
                crate::INITIAL_POSITION_FEN,
                "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
                "rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 3",
                "8/2P2k2/8/8/8/8/6K1/8 w - - 0 1",
            ];
            for fen in fens {
                let pos = position(fen);
                for mv in pos.generate_legal_moves().iter() {
                    let san = to_san(&pos, mv);
                    let parsed = parse_san(&pos, &san)
                        .unwrap_or_else(|e| panic!("SAN {} of {} should parse back: {}", san, mv, e));
                    assert_eq!(parsed, mv, "SAN round trip failed for {} ({})", mv, san);
                }
            }
        }

        #[test]
        fn test_to_san_check_and_mate_suffixes() {
            let pos = position("rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2");
            let mv = parse_coordinate_notation(&pos, "d8h4").unwrap();
            assert_eq!(to_san(&pos, mv), "Qh4#");

            let pos = position("4k3/8/8/8/8/8/8/4KR2 w - - 0 1");
            let mv = parse_coordinate_notation(&pos, "f1f8").unwrap();
            assert_eq!(to_san(&pos, mv), "Rf8+");
        }
    }
}
