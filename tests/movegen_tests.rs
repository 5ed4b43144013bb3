use blunderscope::{perft::perft_count, position::Position, INITIAL_POSITION_FEN};

/// Published perft node counts for well-known positions. Any generation, legality or make/unmake defect shows up as a
/// count mismatch.
fn assert_perft(fen: &str, expectations: &[(u32, u64)]) {
    let mut position = Position::new_from_fen(fen).expect("The perft FEN should be valid");
    for &(depth, expected) in expectations {
        assert_eq!(perft_count(&mut position, depth), expected, "perft({}) of {}", depth, fen);
        assert_eq!(position.to_fen(), fen, "perft should leave the position untouched");
    }
}

#[test]
fn test_perft_initial_position() {
    assert_perft(INITIAL_POSITION_FEN, &[(1, 20), (2, 400), (3, 8_902), (4, 197_281)]);
}

#[test]
fn test_perft_kiwipete() {
    // A castling and pin heavy middlegame position.
    assert_perft(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        &[(1, 48), (2, 2_039), (3, 97_862)],
    );
}

#[test]
fn test_perft_en_passant_pins() {
    // An endgame position dominated by en-passant and pin edge cases.
    assert_perft("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1", &[(1, 14), (2, 191), (3, 2_812), (4, 43_238)]);
}

#[test]
fn test_perft_promotions() {
    // A promotion-heavy position.
    assert_perft(
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        &[(1, 44), (2, 1_486), (3, 62_379)],
    );
}

#[test]
fn test_perft_mirrored_position_counts_match() {
    // Mirroring swaps colors and ranks, so the node counts must be identical.
    let fen = "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1";
    let mut position = Position::new_from_fen(fen).expect("The perft FEN should be valid");
    let mut mirrored = position.mirror();
    for depth in 1..=2 {
        assert_eq!(perft_count(&mut position, depth), perft_count(&mut mirrored, depth), "depth {}", depth);
    }
    assert_eq!(perft_count(&mut position, 1), 6);
    assert_eq!(perft_count(&mut position, 2), 264);
}

#[test]
fn test_incremental_hash_stays_consistent_through_tree() {
    // Walk two plies deep and verify the incrementally maintained hash matches a from-scratch computation at every
    // node.
    let mut position =
        Position::new_from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1").unwrap();

    let moves: Vec<_> = position.generate_legal_moves().iter().collect();
    for mv in moves {
        position.make(mv);
        let recomputed = Position::new_from_fen(&position.to_fen()).unwrap();
        assert_eq!(position.zobrist(), recomputed.zobrist(), "hash mismatch after {}", mv);

        for reply in position.generate_legal_moves().iter() {
            position.make(reply);
            let recomputed = Position::new_from_fen(&position.to_fen()).unwrap();
            assert_eq!(position.zobrist(), recomputed.zobrist(), "hash mismatch after {} {}", mv, reply);
            position.unmake();
        }

        position.unmake();
    }
}
