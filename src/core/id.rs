//! Session id generation.
//!
//! Ids are 6 characters drawn from an alphabet that omits the glyphs easiest
//! to misread aloud or confuse on a scoreboard: `I`, `O`, `1`, `0` (§3/§6).

use rand::Rng;

/// The restricted alphabet session ids are drawn from.
pub const ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in a session id.
pub const ID_LEN: usize = 6;

/// Generate one candidate session id. Collisions are handled by the
/// lifecycle manager's reservation loop (§4.8), not here — this function
/// has no notion of what ids are already taken.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ID_ALPHABET.len());
            ID_ALPHABET[idx] as char
        })
        .collect()
}

/// Whether a string matches the session id shape, independent of whether it
/// names an existing session.
pub fn is_well_formed(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| ID_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_well_formed() {
        for _ in 0..256 {
            let id = generate_session_id();
            assert!(is_well_formed(&id), "{id} is not well-formed");
        }
    }

    #[test]
    fn alphabet_omits_ambiguous_glyphs() {
        for glyph in [b'I', b'O', b'1', b'0'] {
            assert!(!ID_ALPHABET.contains(&glyph));
        }
    }

    #[test]
    fn rejects_wrong_length_and_foreign_characters() {
        assert!(!is_well_formed("ABC12"));
        assert!(!is_well_formed("ABCDEI")); // contains I
        assert!(!is_well_formed("abcdef")); // lowercase
    }
}
