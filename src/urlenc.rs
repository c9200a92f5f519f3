//! Percent-encoding for PubNub path segments.
//!
//! The whitelist here is narrower than any of the `url` crate's built-in
//! encode sets: it passes `#` and `/` through *unencoded*, which is only
//! safe because the result is spliced directly into a path, never a
//! query string. We reuse the `url` crate's `percent_encoding` module
//! rather than hand-rolling a byte-to-hex loop, defining our own
//! `EncodeSet` for the exact whitelist.

use url::percent_encoding::{percent_encode, percent_decode, EncodeSet};

/// `[A-Za-z0-9]`, `-`, `_`, `#`, `/` pass through; everything else becomes
/// an upper-hex `%HH` triplet.
#[derive(Copy, Clone)]
struct PathSegmentEncodeSet;

impl EncodeSet for PathSegmentEncodeSet {
    fn should_encode(&self, byte: u8) -> bool {
        !(byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || byte == b'#'
            || byte == b'/')
    }
}

/// Encode `s` for use as a publish/subscribe path segment (channel
/// names, keys, time tokens, the JSON message body).
pub fn encode(s: &str) -> String {
    percent_encode(s.as_bytes(), PathSegmentEncodeSet).collect()
}

/// Inverse of `encode`, used by tests to check that every string made
/// of unreserved characters survives an encode/decode round trip.
pub fn decode(s: &str) -> String {
    percent_decode(s.as_bytes()).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod test {
    use super::{decode, encode};

    #[test]
    fn unreserved_passes_through() {
        let s = "Az09-_";
        assert_eq!(encode(s), s);
    }

    #[test]
    fn hash_and_slash_pass_through() {
        assert_eq!(encode("a/b#c"), "a/b#c");
    }

    #[test]
    fn space_and_quote_are_escaped() {
        assert_eq!(encode("\"Hello\""), "%22Hello%22");
        assert_eq!(encode("a b"), "a%20b");
    }

    #[test]
    fn escapes_are_uppercase() {
        let encoded = encode("\n");
        assert_eq!(encoded, "%0A");
    }

    #[test]
    fn round_trips_unreserved_strings() {
        for s in ["demo", "chat-room_1", "13900000000000000"] {
            assert_eq!(decode(&encode(s)), s);
        }
    }

    #[test]
    fn only_whitelisted_bytes_appear_unescaped() {
        let sample = "hello, world! {\"a\":1}/#channel";
        let encoded = encode(sample);
        for b in encoded.bytes() {
            assert!(
                b.is_ascii_alphanumeric()
                    || matches!(b, b'#' | b'/' | b'_' | b'-' | b'%'),
                "unexpected raw byte {} in {:?}",
                b as char,
                encoded
            );
        }
    }
}
