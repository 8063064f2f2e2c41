use rand::{rngs::OsRng, RngCore};

/// Opaque hex token for public links: 24 random bytes, 48 hex characters.
pub fn generate_public_token() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Keep only ASCII digits; used to normalize phone numbers before they
/// become part of a synthesized vendor identity.
pub fn digits(raw: &str) -> String {
    raw.chars().filter(|ch| ch.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_48_hex_chars() {
        let token = generate_public_token();
        assert_eq!(token.len(), 48);
        assert!(token.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn digits_strips_formatting() {
        assert_eq!(digits("+1 (555) 123-4567"), "15551234567");
        assert_eq!(digits("no digits"), "");
    }
}
