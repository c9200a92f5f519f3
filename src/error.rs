//! The crate's error taxonomy.
//!
//! Every variant here is sticky once observed by a `Client`: the client
//! latches it, shuts its socket down, and refuses to feed further bytes
//! to the parser until the caller explicitly retries.

quick_error! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// Chunk-length field exceeded 8 hex digits.
        ChunkNoSpace {
            description("chunk length field overflowed 8 hex digits")
        }
        /// A header line grew past parser scratch and could not be
        /// recovered structurally (over-long *values* are silently
        /// truncated instead; this is reserved for header *names* and
        /// the status line).
        HeaderTooLong {
            description("header line exceeded the parser's scratch space")
        }
        /// `Transport::try_write` reported a hard failure.
        WriteError {
            description("transport write failed")
        }
        /// Growable buffer allocation failed (sticky error on a
        /// `ReqBuffer`), or the embedding transport/timer ran out of
        /// resources to honor the request.
        NoMem {
            description("allocation failure while building or queuing a request")
        }
        /// The parser observed a byte sequence that violates HTTP/1.1
        /// status-line or header syntax.
        Malformed {
            description("malformed HTTP response")
        }
        /// The parser was invoked with no head request left in the FIFO.
        ResponseTooLong {
            description("response bytes arrived with no request awaiting them")
        }
        /// Reserved for future protocol support; never produced today.
        NotImplemented {
            description("not implemented")
        }
        /// A read timeout, or the "should not occur" connect-phase guard,
        /// fired before the expected event arrived.
        Timeout {
            description("timed out waiting for a response")
        }
        /// The body-level (JSON) parser rejected the payload.
        DataParseError {
            description("response body failed application-level parsing")
        }
    }
}

impl Error {
    /// Every member of this enum is an error condition; there is no
    /// success variant to distinguish from the rest.
    pub fn is_error(self) -> bool {
        true
    }
}
