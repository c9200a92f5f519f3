//! Demo CLI: performs one publish, then subscribes forever, against a
//! real PubNub-compatible host, driving `pnstream::pubsub::PubSub` from
//! a bare poll loop over `std::net::TcpStream`.
//!
//! Modeled on the teacher's own `src/bin/curl.rs` (argparse for the CLI
//! surface, env_logger for output) -- adapted from a one-shot HTTP GET
//! into the always-reconnecting pub/sub shape this crate implements.
extern crate argparse;
extern crate env_logger;
extern crate pnstream;
#[macro_use]
extern crate log;

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use argparse::{ArgumentParser, Store, StoreOption};

use pnstream::engine::Connector;
use pnstream::pubsub::{PubSub, PubSubEvent, PubSubHandler};
use pnstream::timer::{TimerHandle, TimerService};
use pnstream::transport::{Transport, TransportEvent};
use pnstream::Config;

struct Options {
    host: String,
    port: u16,
    channel: String,
    publish_key: String,
    subscribe_key: String,
    secret_key: String,
    message: Option<String>,
}

fn parse_args() -> Options {
    let mut opt = Options {
        host: "pubsub.pubnub.com".to_string(),
        port: 80,
        channel: "demo".to_string(),
        publish_key: "demo".to_string(),
        subscribe_key: "demo".to_string(),
        secret_key: String::new(),
        message: None,
    };
    {
        let mut ap = ArgumentParser::new();
        ap.set_description("Publish (optionally) then subscribe to a PubNub channel.");
        ap.refer(&mut opt.host).add_option(&["--host"], Store, "PubNub host");
        ap.refer(&mut opt.port).add_option(&["--port"], Store, "PubNub port");
        ap.refer(&mut opt.channel).add_option(&["--channel"], Store, "Channel name");
        ap.refer(&mut opt.publish_key).add_option(&["--publish-key"], Store, "Publish key");
        ap.refer(&mut opt.subscribe_key).add_option(&["--subscribe-key"], Store, "Subscribe key");
        ap.refer(&mut opt.secret_key).add_option(&["--secret-key"], Store, "Secret key");
        ap.refer(&mut opt.message).add_option(&["--publish"], StoreOption, "Publish this JSON-encoded message before subscribing");
        ap.parse_args_or_exit();
    }
    opt
}

/// A real, non-blocking `TcpStream` wearing the `Transport` trait.
struct StdTransport(TcpStream);

impl Transport for StdTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn shutdown(&mut self) {
        let _ = self.0.shutdown(::std::net::Shutdown::Write);
    }

    fn close(&mut self) {
        let _ = self.0.shutdown(::std::net::Shutdown::Both);
    }
}

struct StdConnector;

impl Connector for StdConnector {
    type Transport = StdTransport;

    fn connect(&mut self, host: &str, port: u16) -> StdTransport {
        let stream = TcpStream::connect((host, port)).expect("tcp connect");
        stream.set_nonblocking(true).expect("set_nonblocking");
        StdTransport(stream)
    }
}

/// A `TimerService` backed by a simple deadline map, polled once per
/// iteration of the demo's own loop -- the `TimerService` contract
/// makes no assumption about *how* the deadline is observed, only that
/// `schedule`/`cancel` behave as a single-shot per handle.
#[derive(Default)]
struct PollTimer {
    deadlines: HashMap<u64, Instant>,
    next_id: u64,
}

impl PollTimer {
    fn new_handle(&mut self) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        TimerHandle(id)
    }

    fn fired(&mut self) -> Vec<TimerHandle> {
        let now = Instant::now();
        let fired: Vec<u64> = self
            .deadlines
            .iter()
            .filter(|&(_, at)| *at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &fired {
            self.deadlines.remove(id);
        }
        fired.into_iter().map(TimerHandle).collect()
    }
}

impl TimerService for PollTimer {
    fn schedule(&mut self, handle: TimerHandle, after: Duration) {
        self.deadlines.insert(handle.0, Instant::now() + after);
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.deadlines.remove(&handle.0);
    }
}

struct PrintHandler(&'static str);

impl PubSubHandler for PrintHandler {
    fn event(&mut self, ev: PubSubEvent<'_>) {
        match ev {
            PubSubEvent::Data(buf) => {
                println!("[{}] message: {}", self.0, String::from_utf8_lossy(buf));
            }
            PubSubEvent::Error(err) => {
                warn!("[{}] error: {}", self.0, err);
            }
            PubSubEvent::Done => {
                info!("[{}] request complete", self.0);
            }
        }
    }
}

fn main() {
    env_logger::init().expect("env_logger init");
    let opt = parse_args();

    let mut timers = PollTimer::default();
    let timer_handle = timers.new_handle();
    let mut pubsub: PubSub<StdConnector> = PubSub::new(
        opt.host,
        opt.port,
        opt.channel,
        opt.publish_key,
        opt.subscribe_key,
        opt.secret_key,
        StdConnector,
        timer_handle,
        Config::new().done(),
    );

    if let Some(message) = opt.message.as_ref() {
        pubsub.publish(message, PrintHandler("publish"), &mut timers);
    }
    pubsub.subscribe(PrintHandler("subscribe"), &mut timers);
    // `StdConnector::connect` blocks until the TCP handshake completes,
    // so the engine's `SocketOpening` state is already satisfied by the
    // time `publish`/`subscribe` returns; tell it so once, up front.
    pubsub.transport_event(TransportEvent::Open, &mut timers);

    // A bare poll loop: no mio/tokio dependency. The transport stays an
    // external collaborator the core never owns.
    loop {
        for _ in timers.fired() {
            pubsub.timer_fired(&mut timers);
        }
        // No-op unless a retry just re-opened the socket synchronously
        // (see the comment above `main`'s first `Open` event).
        pubsub.transport_event(TransportEvent::Open, &mut timers);
        pubsub.transport_event(TransportEvent::Write, &mut timers);
        pubsub.transport_event(TransportEvent::Read, &mut timers);
        thread::sleep(Duration::from_millis(50));
    }
}
