//! The non-blocking byte-stream transport contract.
//!
//! The transport is an external collaborator: a non-blocking byte-stream
//! channel whose socket/open/read/write/close calls are consumed, not
//! reimplemented, by the core. This module is the Rust shape of that
//! contract: a trait the embedder implements once (over a real TCP
//! socket, a `mio` stream, a test double, ...) and that the engine
//! drives without ever touching an OS socket directly.

use std::io;

/// One non-blocking byte-stream connection to a single `(host, port)`.
///
/// `try_read`/`try_write` follow `std::io::Read`/`Write` non-blocking
/// conventions: a `WouldBlock` error means "nothing to do right now".
/// Any other `Err` is a hard transport error and drives the engine's
/// `Error` state.
pub trait Transport {
    /// Read as many bytes as are immediately available into `buf`,
    /// without blocking. Returns `Ok(0)` only on clean EOF (peer closed
    /// the write side); returns `Err(WouldBlock)` when nothing is
    /// available right now.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as many bytes from `buf` as can be accepted immediately,
    /// without blocking. May return fewer than `buf.len()` -- the engine
    /// never assumes a single `Write` event drains the whole buffer.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Half-close the connection (stop writing, keep draining reads)
    /// ahead of `close`. Called once when the engine transitions to
    /// `Error`.
    fn shutdown(&mut self);

    /// Fully release the connection. Called once per opened connection,
    /// after which the `Transport` value is dropped by the embedder.
    fn close(&mut self);
}

/// Events the embedder reports back into the engine as they occur on
/// the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection finished establishing.
    Open,
    /// The transport is ready to accept more outbound bytes.
    Write,
    /// The transport has bytes available to read.
    Read,
    /// The peer closed its end of the connection.
    PeerClose,
    /// The transport failed (reset, unreachable host, etc).
    Error,
}
