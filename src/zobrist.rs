use std::sync::LazyLock;

use shakmaty::zobrist::{Zobrist64, ZobristValue};

use crate::{
    coordinates::{File, Square},
    piece::{Color, Piece, PieceType},
    r#move::CastleRights,
};

/// Type alias for the Zobrist hash value.
pub type Zobrist = u64;

/// Number of piece-square keys (12 pieces times 64 squares).
const PIECE_SQUARE_KEYS: usize = Piece::COUNT * Square::COUNT;

/// Total number of keys in the Polyglot layout: piece-square keys, four castling keys, eight en-passant file keys and
/// one side-to-move key.
const KEY_COUNT: usize = PIECE_SQUARE_KEYS + 4 + File::COUNT + 1;

/// The canonical Polyglot key table, laid out exactly as the book format defines it: 768 piece-square keys in
/// black-pawn-first order, the four castling keys, the eight en-passant file keys and the white-to-move key.
///
/// The key data is the published Random64 array, taken from shakmaty so positions hash to the same values any Polyglot
/// book tooling produces. The standard starting position hashes to 0x463B96181691FC9C.
static KEYS: LazyLock<[Zobrist; KEY_COUNT]> = LazyLock::new(|| {
    let mut keys = [0u64; KEY_COUNT];

    for piece in Piece::ALL {
        for square in Square::all() {
            let index = piece_index(piece) * Square::COUNT + usize::from(square);
            keys[index] = Zobrist64::zobrist_for_piece(to_shakmaty_square(square), to_shakmaty_piece(piece)).0;
        }
    }

    let castling_rights = [
        (shakmaty::Color::White, shakmaty::CastlingSide::KingSide),
        (shakmaty::Color::White, shakmaty::CastlingSide::QueenSide),
        (shakmaty::Color::Black, shakmaty::CastlingSide::KingSide),
        (shakmaty::Color::Black, shakmaty::CastlingSide::QueenSide),
    ];
    for (offset, (color, side)) in castling_rights.into_iter().enumerate() {
        keys[PIECE_SQUARE_KEYS + offset] = Zobrist64::zobrist_for_castling_right(color, side).0;
    }

    for file in File::ALL {
        keys[PIECE_SQUARE_KEYS + 4 + file as usize] =
            Zobrist64::zobrist_for_en_passant_file(shakmaty::File::new(file as u32)).0;
    }

    keys[KEY_COUNT - 1] = Zobrist64::zobrist_for_white_turn().0;

    keys
});

fn to_shakmaty_square(square: Square) -> shakmaty::Square {
    shakmaty::Square::new(u32::from(u8::from(square)))
}

fn to_shakmaty_piece(piece: Piece) -> shakmaty::Piece {
    let color = match piece.color() {
        Color::White => shakmaty::Color::White,
        Color::Black => shakmaty::Color::Black,
    };
    let role = match piece.piece_type() {
        PieceType::Pawn => shakmaty::Role::Pawn,
        PieceType::Knight => shakmaty::Role::Knight,
        PieceType::Bishop => shakmaty::Role::Bishop,
        PieceType::Rook => shakmaty::Role::Rook,
        PieceType::Queen => shakmaty::Role::Queen,
        PieceType::King => shakmaty::Role::King,
    };
    shakmaty::Piece { color, role }
}

/// Returns the index of a piece in the Polyglot piece ordering: black pawn first, then white pawn, alternating up to
/// the white king.
fn piece_index(piece: Piece) -> usize {
    let color_offset = match piece.color() {
        Color::White => 1,
        Color::Black => 0,
    };
    2 * piece.piece_type() as usize + color_offset
}

/// Returns the Zobrist hash value for a specific piece on a specific square. This hash is XORed in when adding a piece
/// to the board and XORed out when removing it.
pub fn zobrist_piece_square(piece: Piece, square: Square) -> Zobrist {
    KEYS[piece_index(piece) * Square::COUNT + usize::from(square)]
}

/// Returns the combined Zobrist hash value for a set of castling rights. One key per right, XORed together, as the
/// Polyglot scheme does.
pub fn zobrist_castling(rights: CastleRights) -> Zobrist {
    let mut hash = 0;
    for bit in 0..4usize {
        if rights.bits() & (1u8 << bit) != 0 {
            hash ^= KEYS[PIECE_SQUARE_KEYS + bit];
        }
    }
    hash
}

/// Returns the Zobrist hash value for an en-passant opportunity on the given file.
///
/// Callers are responsible for the Polyglot gating rule: the file key participates in the position hash only when a
/// pawn of the side to move could pseudo-legally capture en passant.
pub fn zobrist_en_passant(file: File) -> Zobrist {
    KEYS[PIECE_SQUARE_KEYS + 4 + file as usize]
}

/// Returns the Zobrist hash value that marks white to move. Polyglot hashes the side to move by including this key for
/// white positions and omitting it for black positions.
pub fn zobrist_white_to_move() -> Zobrist {
    KEYS[KEY_COUNT - 1]
}
