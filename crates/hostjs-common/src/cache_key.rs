//! Cache key derivation for the dependency cache.
//!
//! Downloaded dependencies are stored under the URL-safe base64 encoding of
//! their locator. The encoding is reversible and byte-for-byte stable, so two
//! distinct locators can never share a key and the same locator always maps to
//! the same file. URL-safe alphabet without padding keeps the key usable as a
//! single file name (no `/`, no `=`).
//!
//! Long locators produce long keys; that is accepted rather than hashed away.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Encodes a locator (URL, package name, ...) into its cache key.
pub fn encode_locator(locator: &str) -> String {
    URL_SAFE_NO_PAD.encode(locator.as_bytes())
}

/// Recovers the locator a key was derived from, if the key is one of ours.
pub fn decode_key(key: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(key).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_stable() {
        let url = "https://example.test/lib.js";
        assert_eq!(encode_locator(url), encode_locator(url));
        assert_eq!(encode_locator(url), "aHR0cHM6Ly9leGFtcGxlLnRlc3QvbGliLmpz");
    }

    #[test]
    fn test_distinct_locators_get_distinct_keys() {
        assert_ne!(
            encode_locator("https://example.test/a.js"),
            encode_locator("https://example.test/b.js")
        );
    }

    #[test]
    fn test_key_is_a_single_file_name() {
        // '?' and '>' land on the characters that differ between the standard and URL-safe alphabets
        let key = encode_locator("https://example.test/??>>lib.js?v=1");
        assert!(!key.contains('/'));
        assert!(!key.contains('='));
    }

    #[test]
    fn test_decode_reverses_encode() {
        let locator = "https://cdn.example.test/pkg@1.2.3/index.js";
        assert_eq!(decode_key(&encode_locator(locator)).as_deref(), Some(locator));
        assert_eq!(decode_key("not base64!"), None);
    }
}
