//! Dedupe keys for songs

use core_library::models::{sha256_hex, Song};

const SEPARATOR: char = '\u{1f}';

/// Identity key of a logical track
///
/// SHA-256 over the normalized artist, title and album joined by the unit
/// separator, so re-importing a track with different casing or spacing
/// yields the same key.
pub fn dedupe_key(artist: &str, title: &str, album: &str) -> String {
    let joined = [artist, title, album]
        .iter()
        .map(|part| Song::normalize(part))
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string());
    sha256_hex(joined.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_spacing_insensitive() {
        assert_eq!(
            dedupe_key("The Beat", "Mirror In The Bathroom", "I Just Can't Stop It"),
            dedupe_key("the  beat", " mirror in the bathroom", "I JUST CAN'T STOP IT"),
        );
    }

    #[test]
    fn test_fields_are_not_interchangeable() {
        assert_ne!(dedupe_key("a", "b", ""), dedupe_key("", "a", "b"));
        assert_ne!(dedupe_key("ab", "c", ""), dedupe_key("a", "bc", ""));
    }

    #[test]
    fn test_key_is_hex_digest() {
        let key = dedupe_key("x", "y", "z");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
