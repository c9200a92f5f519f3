//! The connection/request engine (spec.md §4.2): owns one socket to one
//! `(host, port)`, a FIFO of pending requests, and the single-shot timer,
//! and drives the `parser` module with bytes the embedder hands it.
//!
//! Grounded on `tk-http`'s `client::proto::PureProto` -- an explicit state
//! enum plus `mem::replace`-driven transitions standing in for the
//! teacher's futures-`Sink` -- but the driving force here is the
//! embedder's event calls (`transport_event`, `timer_fired`) rather than
//! an executor polling a `Future`, per spec.md §5 ("single-threaded
//! cooperative... the Engine yields control by setting state and
//! returning").

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use error::Error;
use parser::{Parser, Progress};
use timer::{TimerHandle, TimerService};
use transport::{Transport, TransportEvent};

use reqbuffer::ReqBuffer;

/// Opens a fresh, not-yet-connected `Transport` for a `(host, port)` pair.
///
/// Spec.md §6 describes the transport's `open` call as synchronous
/// ("`open(host, port, handler, ctx) -> channel`") with connection
/// completion signaled later through the `Open` event; `Connector` is
/// that call, generalized over whatever transport type the embedder
/// plugs in.
pub trait Connector {
    type Transport: Transport;

    fn connect(&mut self, host: &str, port: u16) -> Self::Transport;
}

/// One event delivered to a `Request`'s `Handler` (spec.md §4.2
/// "Callback contract").
#[derive(Debug)]
pub enum Event<'a> {
    /// First transmission of this request's bytes has begun.
    BeingSent,
    /// The request is being retransmitted after a `Retry` disposition.
    BeingSentAgain,
    /// A body sub-slice, in wire order. May fire many times.
    Data(&'a [u8]),
    /// The response has been fully parsed; no further events follow.
    Done,
    /// The transport reported a hard failure.
    TcpError,
    /// The peer closed the connection before the response completed.
    TcpPeerClose,
    /// The parser rejected the response body.
    ParseError(Error),
    /// The request's serialized buffer latched a sticky error (its
    /// growable buffer hit the size cap) before it could ever be
    /// enqueued (spec.md §6: "the core treats `error == true` as
    /// propagation-only, surfacing it as `NoMem` on enqueue"). The
    /// request was never placed on the FIFO; any `Disposition` returned
    /// here is ignored since there is nothing to drop or retry.
    BuildFailed(Error),
}

/// What a `Handler` asks the engine to do after observing an event.
///
/// Only meaningful in response to `TcpError`, `TcpPeerClose`, and
/// `ParseError` -- spec.md §4.2: "The callback may, during `REQ_TCP_*` or
/// `REQ_PARSE_ERROR`, call `retry(seconds)`; doing so transitions the
/// Client out of `Error` back to `RetrySocketOpen`." Any other value
/// observed for those events is treated as "do not retry", i.e. `Drop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No special action; used for the non-error events.
    Continue,
    /// Abandon the request: pop it from the FIFO without resending.
    Drop,
    /// Resend the request after `Duration`, transitioning through
    /// `RetrySocketOpen`.
    Retry(Duration),
    /// Only meaningful in response to `Data`: the handler rejected the
    /// body it just received (e.g. a body-level/JSON parser failure).
    /// The engine treats this exactly like a parser-level failure --
    /// sticky error, socket shutdown, `ParseError(err)` delivered once
    /// more to the same handler, which may then `Retry` out of it.
    Fail(Error),
}

/// Per-request callback. One `Handler` is owned by exactly one
/// `Request` (spec.md §3 "Request... a user callback").
pub trait Handler {
    fn event(&mut self, ev: Event) -> Disposition;
}

/// A single queued HTTP request: its serialized bytes, transmit cursor,
/// read timeout, and owning handler (spec.md §3 "Request").
pub struct Request {
    buf: ReqBuffer,
    tx_pos: usize,
    read_timeout: Duration,
    handler: Box<dyn Handler>,
}

impl Request {
    pub fn new(handler: Box<dyn Handler>, default_read_timeout: Duration) -> Request {
        Request {
            buf: ReqBuffer::new(),
            tx_pos: 0,
            read_timeout: default_read_timeout,
            handler,
        }
    }

    /// `req.set(line)`: start a fresh request with its request line, then
    /// the `Host` header (spec.md §4.2 "Builder operations").
    pub fn set(&mut self, host: &str, line: &str) -> &mut Self {
        self.buf.set(line);
        self.buf.add("\r\n");
        self.tx_pos = 0;
        self.host(host)
    }

    /// `req.add(header)`: append one more header line.
    pub fn add(&mut self, header: &str) -> &mut Self {
        self.buf.add(header);
        self.buf.add("\r\n");
        self
    }

    /// `req.host()`: explicitly append the `Host` header.
    pub fn host(&mut self, host: &str) -> &mut Self {
        self.buf.add("Host: ");
        self.buf.add(host);
        self.buf.add("\r\n");
        self
    }

    /// `req.keepalive(sec, margin)`: advertise a `Keep-Alive` timeout to
    /// the server and set this request's own read timeout to
    /// `sec + margin`, so a long-poll subscribe is not torn down by the
    /// should-not-occur guard before the server's own keep-alive elapses.
    pub fn keepalive(&mut self, timeout: Duration, margin: Duration) -> &mut Self {
        self.buf.add_fmt(format_args!("Keep-Alive: timeout={}\r\n", timeout.as_secs()));
        self.read_timeout = timeout + margin;
        self
    }

    fn bytes_pending(&self) -> &[u8] {
        &self.buf.as_bytes()[self.tx_pos..]
    }
}

/// The connection-level state machine (spec.md §4.2). `ParsingReply`
/// carries the in-flight `Parser` -- its scratch and cursor belong to
/// exactly this state, the way spec.md §3 describes it as embedded in
/// the Client.
enum ConnState {
    Idle,
    RetrySocketOpen,
    SocketOpening,
    SendingRequest,
    ParsingReply(Parser),
    Error(Error),
}

/// A long-lived client bound to one `(host, port)` (spec.md §3
/// "Client").
pub struct Client<C: Connector> {
    host: String,
    port: u16,
    connector: C,
    transport: Option<C::Transport>,
    state: ConnState,
    queue: VecDeque<Request>,
    timer: TimerHandle,
    config: Arc<Config>,
    /// Set by `resend` just before re-opening the socket, so the `Open`
    /// event that follows knows to announce `BeingSentAgain` instead of
    /// `BeingSent` (spec.md §5: "On retransmission, `REQ_BEING_SEND_AGAIN`
    /// fires before any new byte hits the wire").
    retransmit_next: bool,
}

impl<C: Connector> Client<C> {
    pub fn new(host: String, port: u16, connector: C, timer: TimerHandle, config: Arc<Config>) -> Client<C> {
        Client {
            host,
            port,
            connector,
            transport: None,
            state: ConnState::Idle,
            queue: VecDeque::new(),
            timer,
            config,
            retransmit_next: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn default_read_timeout(&self) -> Duration {
        self.config.read_timeout()
    }

    /// The configured backoff a `Handler` can hand back as
    /// `Disposition::Retry` when it has no more specific delay of its own
    /// in mind (spec.md §4.2: "`RetrySocketOpen` ... the user-chosen
    /// backoff (default 30 s)").
    pub fn default_retry_backoff(&self) -> Duration {
        self.config.retry_backoff()
    }

    /// How many requests are queued, including the one currently being
    /// sent or whose response is being parsed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The sticky error code latched on the Client's last trip into the
    /// `Error` state, if it is currently there (spec.md §3: "a coarse
    /// error code for the in-flight response").
    pub fn error(&self) -> Option<Error> {
        match self.state {
            ConnState::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Queue `req`. If the Client is `Idle`, this kicks off a connection
    /// (or, if a transport from a prior cycle is still open, starts
    /// writing immediately) per spec.md §4.2's `Idle` row.
    pub fn enqueue<T: TimerService>(&mut self, mut req: Request, timers: &mut T) {
        if req.buf.error() {
            warn!("{}:{} refusing to enqueue a request with a failed buffer", self.host, self.port);
            req.handler.event(Event::BuildFailed(Error::NoMem));
            return;
        }
        let should_kick = self.queue.is_empty() && matches!(self.state, ConnState::Idle);
        self.queue.push_back(req);
        if should_kick {
            if self.transport.is_some() {
                self.begin_send(timers, false);
            } else {
                self.open_socket(timers);
            }
        }
    }

    fn open_socket<T: TimerService>(&mut self, timers: &mut T) {
        debug!("{}:{} opening socket, {} request(s) queued", self.host, self.port, self.queue.len());
        let transport = self.connector.connect(&self.host, self.port);
        self.transport = Some(transport);
        self.state = ConnState::SocketOpening;
        timers.schedule(self.timer, self.config.should_not_occur());
    }

    fn begin_send<T: TimerService>(&mut self, timers: &mut T, retransmit: bool) {
        if let Some(req) = self.queue.front_mut() {
            req.tx_pos = 0;
            let ev = if retransmit { Event::BeingSentAgain } else { Event::BeingSent };
            trace!("{}:{} {}", self.host, self.port, if retransmit { "resending head request" } else { "sending head request" });
            req.handler.event(ev);
        }
        self.state = ConnState::SendingRequest;
        timers.schedule(self.timer, self.config.should_not_occur());
    }

    /// Deliver a transport-level event (spec.md §6's `{Open, Write, Read,
    /// PeerClose, Error}`).
    pub fn transport_event<T: TimerService>(&mut self, ev: TransportEvent, timers: &mut T) {
        match ev {
            TransportEvent::Open => self.on_open(timers),
            TransportEvent::Write => self.on_write(timers),
            TransportEvent::Read => self.on_read(timers),
            TransportEvent::PeerClose => self.on_peer_close(timers),
            TransportEvent::Error => self.deliver_failure(Error::WriteError, Event::TcpError, timers),
        }
    }

    fn on_open<T: TimerService>(&mut self, timers: &mut T) {
        if let ConnState::SocketOpening = self.state {
            let retransmit = mem::replace(&mut self.retransmit_next, false);
            self.begin_send(timers, retransmit);
        }
    }

    fn on_write<T: TimerService>(&mut self, timers: &mut T) {
        if !matches!(self.state, ConnState::SendingRequest) {
            return;
        }
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => return,
        };
        let (done, failed) = {
            let req = match self.queue.front_mut() {
                Some(r) => r,
                None => return,
            };
            let mut failed = false;
            let mut done = req.tx_pos >= req.buf.len();
            while !done {
                let pending = req.bytes_pending();
                if pending.is_empty() {
                    done = true;
                    break;
                }
                match transport.try_write(pending) {
                    Ok(0) => break,
                    Ok(n) => {
                        req.tx_pos += n;
                        done = req.tx_pos >= req.buf.len();
                    }
                    Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        failed = true;
                        break;
                    }
                }
            }
            (done, failed)
        };
        if failed {
            self.deliver_failure(Error::WriteError, Event::TcpError, timers);
        } else if done {
            debug!("{}:{} request sent, awaiting reply", self.host, self.port);
            let parser = Parser::new();
            self.state = ConnState::ParsingReply(parser);
            let read_timeout = self
                .queue
                .front()
                .map(|r| r.read_timeout)
                .unwrap_or_else(|| self.config.read_timeout());
            timers.schedule(self.timer, read_timeout);
        }
    }

    fn on_read<T: TimerService>(&mut self, timers: &mut T) {
        if !matches!(self.state, ConnState::ParsingReply(_)) {
            return;
        }
        let mut scratch = vec![0u8; self.config.buffer_size()];
        loop {
            let n = {
                let transport = match self.transport.as_mut() {
                    Some(t) => t,
                    None => return,
                };
                match transport.try_read(&mut scratch) {
                    Ok(0) => {
                        self.on_peer_close(timers);
                        return;
                    }
                    Ok(n) => n,
                    Err(ref e) if e.kind() == ::std::io::ErrorKind::WouldBlock => return,
                    Err(_) => {
                        self.deliver_failure(Error::WriteError, Event::TcpError, timers);
                        return;
                    }
                }
            };
            if let Err(err) = self.feed_parser(&scratch[..n], timers) {
                self.deliver_failure(err, Event::ParseError(err), timers);
                return;
            }
            if n < scratch.len() {
                // A short read means the transport has nothing more
                // buffered right now.
                return;
            }
        }
    }

    fn feed_parser<T: TimerService>(&mut self, mut bytes: &[u8], timers: &mut T) -> Result<(), Error> {
        loop {
            let (consumed, progress) = {
                let parser = match &mut self.state {
                    ConnState::ParsingReply(p) => p,
                    _ => return Ok(()),
                };
                let req = match self.queue.front_mut() {
                    Some(r) => r,
                    None => return Err(Error::ResponseTooLong),
                };
                parser.feed(bytes, |chunk| {
                    match req.handler.event(Event::Data(chunk)) {
                        Disposition::Fail(err) => Err(err),
                        _ => Ok(()),
                    }
                })?
            };
            bytes = &bytes[consumed..];
            match progress {
                Progress::NeedMore => return Ok(()),
                Progress::Done => {
                    self.finish_head(timers);
                    if bytes.is_empty() {
                        return Ok(());
                    }
                    // Leftover bytes belong to whatever response comes
                    // after this one; only meaningful if another request
                    // is already being sent/parsed.
                    if !matches!(self.state, ConnState::ParsingReply(_)) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Pop the completed head request, deliver `Done`, and advance the
    /// FIFO (spec.md §5: "`REQ_DONE` fires after the head request has
    /// been unlinked from the FIFO, so the callback may enqueue another
    /// request without causing queue corruption").
    fn finish_head<T: TimerService>(&mut self, timers: &mut T) {
        debug!("{}:{} response complete", self.host, self.port);
        if let Some(mut req) = self.queue.pop_front() {
            req.handler.event(Event::Done);
        }
        self.advance_idle(timers);
    }

    fn advance_idle<T: TimerService>(&mut self, timers: &mut T) {
        if self.queue.is_empty() {
            self.state = ConnState::Idle;
            timers.cancel(self.timer);
        } else {
            self.begin_send(timers, false);
        }
    }

    fn on_peer_close<T: TimerService>(&mut self, timers: &mut T) {
        if let ConnState::ParsingReply(parser) = &self.state {
            if parser.is_eof_terminated_body() {
                self.finish_head(timers);
                return;
            }
        }
        self.deliver_failure(Error::WriteError, Event::TcpPeerClose, timers);
    }

    /// Shared tail of every hard-failure path: shut the transport down,
    /// enter `Error`, and offer the head request's handler a chance to
    /// `retry`.
    fn deliver_failure<T: TimerService>(&mut self, err: Error, ev: Event<'static>, timers: &mut T) {
        warn!("{}:{} entering error state: {}", self.host, self.port, err);
        if let Some(t) = self.transport.as_mut() {
            t.shutdown();
        }
        self.state = ConnState::Error(err);
        let disposition = match self.queue.front_mut() {
            Some(req) => req.handler.event(ev),
            None => Disposition::Drop,
        };
        self.apply_disposition(disposition, timers);
    }

    fn apply_disposition<T: TimerService>(&mut self, disposition: Disposition, timers: &mut T) {
        match disposition {
            Disposition::Retry(after) => {
                debug!("{}:{} retrying in {:?}", self.host, self.port, after);
                self.state = ConnState::RetrySocketOpen;
                if let Some(t) = self.transport.as_mut() {
                    t.close();
                }
                self.transport = None;
                timers.schedule(self.timer, after);
            }
            Disposition::Drop | Disposition::Continue | Disposition::Fail(_) => {
                if let Some(t) = self.transport.as_mut() {
                    t.close();
                }
                self.transport = None;
                self.queue.pop_front();
                // Unlike `finish_head`'s successful-response case, the
                // transport was just closed above -- there is no live
                // socket left to hand a next queued request to, so a
                // non-empty queue must go through `open_socket` (a fresh
                // connect) rather than `advance_idle`'s `begin_send`,
                // which would flip to `SendingRequest` with no
                // `Transport` and stall until the should-not-occur timer
                // fires again.
                if self.queue.is_empty() {
                    self.state = ConnState::Idle;
                    timers.cancel(self.timer);
                } else {
                    self.open_socket(timers);
                }
            }
        }
    }

    /// Deliver the single-shot timer's fire event. Firing while
    /// `SocketOpening`/`SendingRequest` is the "should not occur" guard
    /// (spec.md §4.2); firing while `ParsingReply` is a real read
    /// timeout; firing while `RetrySocketOpen` is the scheduled retry.
    pub fn timer_fired<T: TimerService>(&mut self, timers: &mut T) {
        match mem::replace(&mut self.state, ConnState::Idle) {
            ConnState::SocketOpening | ConnState::SendingRequest => {
                error!("{}:{} should-not-occur timer fired before connect/send completed", self.host, self.port);
                self.deliver_failure(Error::Timeout, Event::TcpError, timers);
            }
            ConnState::ParsingReply(_) => {
                warn!("{}:{} read timeout", self.host, self.port);
                self.deliver_failure(Error::Timeout, Event::TcpError, timers);
            }
            ConnState::RetrySocketOpen => {
                self.retransmit_next = true;
                self.open_socket(timers);
            }
            other => {
                self.state = other;
            }
        }
    }
}
