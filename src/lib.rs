//! A sans-I/O, resumable HTTP/1.1 streaming client plus a JSON-driven
//! publish/subscribe layer, for long-lived pub/sub connections from
//! constrained, single-threaded embedded devices.
//!
//! Three modules, leaves-first:
//!
//! - [`parser`] -- the byte-stream HTTP/1.1 response parser: a pure,
//!   incremental state machine with no transport or allocation beyond
//!   small fixed scratch.
//! - [`engine`] -- the connection/request pipeline: owns one socket to
//!   one host, a FIFO of pending requests, and a single-shot timer;
//!   drives `parser` with bytes the embedder hands it.
//! - [`pubsub`] -- the publish/subscribe layer built on `engine`: builds
//!   the two PubNub request shapes, streams bodies through
//!   [`json_stream`], and keeps the subscribe long-poll armed.
//!
//! The crate never opens a socket or owns an event loop itself; the
//! transport and timer are external collaborators. Embedders implement
//! [`transport::Transport`] and [`timer::TimerService`] and drive
//! [`pubsub::PubSub`] from their own poll loop.
#![recursion_limit = "100"]

#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;
extern crate netbuf;
extern crate url;

pub mod engine;
pub mod json_stream;
pub mod parser;
pub mod pubsub;
pub mod transport;
pub mod timer;

mod config;
mod error;
mod reqbuffer;
mod urlenc;
mod version;

pub use config::Config;
pub use error::Error;
pub use version::Version;
