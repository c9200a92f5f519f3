//! A growable request-line/header buffer with sticky-error semantics,
//! backed by `netbuf::Buf`.
//!
//! Every builder method becomes a no-op once the buffer has failed to
//! grow, so request-building code never has to check a `Result` after
//! every `add`/`add_fmt` call -- only once, at `finish()`/enqueue time.
//! A configurable hard cap stands in for "allocation failure": this
//! crate targets constrained devices without assuming a fixed arena, so
//! the cap is the guard against an unbounded request growing forever.

use std::fmt::{self, Write as FmtWrite};
use std::io::Write as IoWrite;

use netbuf::Buf;

use urlenc;

/// Requests larger than this are refused by latching the sticky error
/// flag, mirroring a bounded `str_new(&req->data, length, step)` arena on
/// the embedded original.
const MAX_REQUEST_LEN: usize = 8192;

/// A growable byte buffer with fail-once/ignore-after builder semantics.
pub struct ReqBuffer {
    buf: Buf,
    error: bool,
}

impl Default for ReqBuffer {
    fn default() -> ReqBuffer {
        ReqBuffer::new()
    }
}

impl ReqBuffer {
    pub fn new() -> ReqBuffer {
        ReqBuffer {
            buf: Buf::new(),
            error: false,
        }
    }

    /// True once this buffer has latched a failure; every mutator below
    /// becomes a no-op from that point on.
    pub fn error(&self) -> bool {
        self.error
    }

    /// Replace the buffer's contents with `s` (clears any prior state,
    /// including a previously-latched error -- this is how a `Request` is
    /// restarted for a new cycle of `set`/`add`/.../`add("")`).
    pub fn set(&mut self, s: &str) {
        self.buf = Buf::new();
        self.error = false;
        self.add(s);
    }

    /// Append a raw string.
    pub fn add(&mut self, s: &str) {
        self.extend_checked(s.as_bytes());
    }

    /// Append the result of formatting `args` (the `str_addf` analogue).
    /// Use the `write!(buf.fmt_adapter(), "...", ...)` pattern for
    /// multi-argument formatting; this helper covers the common
    /// single-value case used throughout the pubsub layer.
    pub fn add_fmt(&mut self, args: fmt::Arguments) {
        if self.error {
            return;
        }
        let mut tmp = String::new();
        if tmp.write_fmt(args).is_err() {
            self.error = true;
            return;
        }
        self.extend_checked(tmp.as_bytes());
    }

    /// Append `s`, percent-encoded per the path-segment whitelist.
    pub fn add_url_encoded(&mut self, s: &str) {
        let encoded = urlenc::encode(s);
        self.extend_checked(encoded.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..]
    }

    fn extend_checked(&mut self, bytes: &[u8]) {
        if self.error {
            return;
        }
        if self.buf.len() + bytes.len() > MAX_REQUEST_LEN {
            self.error = true;
            return;
        }
        // `Buf` implements `io::Write`; `write_all` cannot fail for an
        // in-memory buffer except by growing past its allocator, which
        // the length check above already guards against.
        if self.buf.write_all(bytes).is_err() {
            self.error = true;
        }
    }
}

#[cfg(test)]
mod test {
    use super::ReqBuffer;

    #[test]
    fn basic_build() {
        let mut b = ReqBuffer::new();
        b.set("GET /publish HTTP/1.1");
        b.add("\r\n");
        b.add("Host: example.com\r\n");
        assert!(!b.error());
        assert_eq!(
            b.as_bytes(),
            b"GET /publish HTTP/1.1\r\nHost: example.com\r\n"
        );
    }

    #[test]
    fn url_encoding_is_applied() {
        let mut b = ReqBuffer::new();
        b.set("GET /publish/0/chat/0/");
        b.add_url_encoded("\"Hello\"");
        assert_eq!(
            b.as_bytes(),
            b"GET /publish/0/chat/0/%22Hello%22"
        );
    }

    #[test]
    fn sticky_error_suppresses_further_writes() {
        let mut b = ReqBuffer::new();
        b.set(&"x".repeat(super::MAX_REQUEST_LEN + 1));
        assert!(b.error());
        let before = b.len();
        b.add("more");
        assert_eq!(b.len(), before, "no-op once error is latched");
    }

    #[test]
    fn set_clears_a_previous_error() {
        let mut b = ReqBuffer::new();
        b.set(&"x".repeat(super::MAX_REQUEST_LEN + 1));
        assert!(b.error());
        b.set("GET / HTTP/1.1");
        assert!(!b.error());
    }
}
