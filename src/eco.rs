use std::collections::HashMap;
use std::sync::LazyLock;

use serde::Deserialize;

/// One entry of the opening classification table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EcoEntry {
    /// The ECO code, e.g. "C50".
    pub eco: String,

    /// The opening name, e.g. "Italian Game".
    pub name: String,

    /// The defining move sequence in SAN, without move numbers, e.g. "e4 e5 Nf3 Nc6 Bc4".
    pub moves: String,
}

/// The raw table, compiled into the binary. Loaded and indexed once, read-only afterwards.
const ECO_JSON: &str = include_str!("../assets/eco.json");

static ECO_TABLE: LazyLock<HashMap<Vec<String>, EcoEntry>> = LazyLock::new(|| {
    let entries: Vec<EcoEntry> =
        serde_json::from_str(ECO_JSON).expect("The embedded opening table should be valid JSON");
    entries
        .into_iter()
        .map(|entry| (entry.moves.split_whitespace().map(str::to_string).collect(), entry))
        .collect()
});

/// Looks up the opening reached by a SAN move sequence played from the standard initial position.
///
/// Returns the entry with the longest defining sequence that is a prefix of the game. Games that never leave book
/// return their deepest known entry; games with no known prefix return None.
pub fn lookup(sans: &[String]) -> Option<&'static EcoEntry> {
    let mut prefix: Vec<String> = sans.to_vec();
    while !prefix.is_empty() {
        if let Some(entry) = ECO_TABLE.get(&prefix) {
            return Some(entry);
        }
        prefix.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sans(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_lookup_exact_sequence() {
        let entry = lookup(&sans("e4 e5 Nf3 Nc6 Bc4")).expect("The Italian Game should be in the table");
        assert_eq!(entry.eco, "C50");
    }

    #[test]
    fn test_lookup_longest_prefix() {
        // A continuation beyond the book line still classifies as the deepest known entry.
        let entry = lookup(&sans("e4 e5 Nf3 Nc6 Bc4 h6 a3")).expect("The prefix should match");
        assert_eq!(entry.eco, "C50");
    }

    #[test]
    fn test_lookup_unknown_opening() {
        assert_eq!(lookup(&sans("a3 h6")), None);
        assert_eq!(lookup(&[]), None);
    }
}
