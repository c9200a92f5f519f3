//! The JSON-driven publish/subscribe layer: builds the two PubNub
//! request shapes on top of `engine::Client`, streams each response body
//! through `json_stream::JsonStream`, tracks the rolling time token, and
//! auto-rearms the subscribe long-poll on completion.
//!
//! Publish and subscribe responses are both driven through the same
//! JSON callback, which is why `Handler` below does not branch behavior
//! by request kind except for the auto-rearm decision once a request
//! completes.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use engine::{self, Connector, Disposition, Event};
use error::Error;
use json_stream::{JsonSink, JsonStream};
use timer::TimerHandle;
use timer::TimerService;
use transport::TransportEvent;
use config::Config;
use urlenc;

/// Cap on the time token: a 20-byte buffer, 19 characters plus NUL, the
/// longest token PubNub has ever issued.
const MAX_TIME_TOKEN_LEN: usize = 19;

/// Subscribe's long-poll keep-alive: a 180s window with a 30s margin
/// added on top for the read timeout, so a server that goes silent
/// right at the edge of the window still gets flagged as a timeout
/// rather than a premature one.
const SUBSCRIBE_KEEPALIVE: Duration = Duration::from_secs(180);
const SUBSCRIBE_KEEPALIVE_MARGIN: Duration = Duration::from_secs(30);

/// Retry backoff after the peer closes mid-response: quick, since a
/// peer close during a long-poll is routine.
const RETRY_AFTER_PEER_CLOSE: Duration = Duration::from_secs(1);
/// Retry backoff after a hard transport error, or a body-level (JSON)
/// parse failure -- treated the same way, since a malformed body is as
/// unrecoverable locally as a dropped socket.
const RETRY_AFTER_TCP_ERROR: Duration = Duration::from_secs(15);

/// One event delivered to the caller's pub/sub handler.
#[derive(Debug)]
pub enum PubSubEvent<'a> {
    /// A message payload (array nesting depth ≥ 2) or, for a publish
    /// response, any depth-1 string element the layer has already
    /// consumed as the new time token -- see the depth-tracking note on
    /// `Handler::string` below for why a publish ack's human-readable
    /// status text is not delivered here.
    Data(&'a [u8]),
    /// A recoverable engine-level failure was observed; the layer is
    /// already retrying (or has already retried) on a fixed backoff.
    /// Purely informational.
    Error(Error),
    /// The request (publish or subscribe) has completed. For a
    /// subscribe, the layer has already issued the next long-poll by the
    /// time this fires.
    Done,
}

/// Receives `PubSubEvent`s for one publish or subscribe request.
pub trait PubSubHandler {
    fn event(&mut self, ev: PubSubEvent<'_>);
}

impl<F: FnMut(PubSubEvent<'_>)> PubSubHandler for F {
    fn event(&mut self, ev: PubSubEvent<'_>) {
        (self)(ev)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Publish,
    Subscribe,
}

/// What to do once the engine-level event that just fired returns
/// control to `PubSub`. Subscribe auto-rearm cannot happen from inside
/// `Handler::event` itself: by the time a request finishes, the
/// completed request's `Handler` is about to be dropped, and it has no
/// way back to the `engine::Client` that owns the FIFO it would need to
/// push onto -- Rust's ownership does not allow a `Handler` trait object
/// to hold a live reference to the `Client` that is currently calling
/// it. So the decision is recorded here instead, and acted on once
/// control returns to `PubSub` and the borrow has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rearm {
    Resubscribe,
}

/// Shared state a `Handler` updates and `PubSub` consults after each
/// engine-level event it drives.
struct Shared {
    time_token: RefCell<String>,
    rearm: RefCell<Option<Rearm>>,
}

/// `engine::Handler` implementation wiring one request's body through a
/// `JsonStream`, shared with `PubSub` via `Rc<Shared>` and the caller's
/// own `PubSubHandler` via `Rc<RefCell<dyn PubSubHandler>>` -- the latter
/// indirection is what lets the *same* user handler instance keep
/// receiving events across every auto-rearmed subscribe cycle, rather
/// than being re-supplied per request.
struct Handler {
    stream: JsonStream,
    sink: Sink,
}

struct Sink {
    kind: Kind,
    shared: Rc<Shared>,
    user: Rc<RefCell<dyn PubSubHandler>>,
}

impl JsonSink for Sink {
    fn string(&mut self, depth: u32, value: &[u8]) -> Result<(), Error> {
        if depth > 1 {
            self.user.borrow_mut().event(PubSubEvent::Data(value));
            return Ok(());
        }
        // depth == 1: this is the time token slot. For a publish
        // response (`[1,"Sent","<token>"]`) every depth-1 string passes
        // through here in wire order, so "Sent" is transiently written
        // and then immediately overwritten by the real token -- no
        // request-kind branch treats a depth-1 string any differently.
        // See DESIGN.md for the reasoning behind keeping this uniform
        // rule rather than special-casing a publish ack's status text.
        if value.len() > MAX_TIME_TOKEN_LEN {
            return Err(Error::DataParseError);
        }
        let token = String::from_utf8_lossy(value).into_owned();
        trace!("time token is now {:?}", token);
        *self.shared.time_token.borrow_mut() = token;
        Ok(())
    }
}

impl engine::Handler for Handler {
    fn event(&mut self, ev: Event) -> Disposition {
        match ev {
            Event::BeingSent | Event::BeingSentAgain => Disposition::Continue,
            Event::Data(buf) => match self.stream.feed(buf, &mut self.sink) {
                Ok(()) => Disposition::Continue,
                Err(err) => Disposition::Fail(err),
            },
            Event::Done => {
                if let Err(err) = self.stream.finish() {
                    self.sink.user.borrow_mut().event(PubSubEvent::Error(err));
                } else {
                    self.sink.user.borrow_mut().event(PubSubEvent::Done);
                }
                if self.sink.kind == Kind::Subscribe {
                    *self.sink.shared.rearm.borrow_mut() = Some(Rearm::Resubscribe);
                }
                Disposition::Continue
            }
            Event::TcpError => self.fail_and_retry(Error::WriteError, RETRY_AFTER_TCP_ERROR),
            Event::TcpPeerClose => self.fail_and_retry(Error::WriteError, RETRY_AFTER_PEER_CLOSE),
            Event::ParseError(err) => self.fail_and_retry(err, RETRY_AFTER_TCP_ERROR),
            Event::BuildFailed(err) => {
                // Never queued, so there is nothing to retry into; just
                // surface the failure. The `Disposition` is ignored by
                // `Client::enqueue` for this event.
                self.sink.user.borrow_mut().event(PubSubEvent::Error(err));
                Disposition::Drop
            }
        }
    }
}

impl Handler {
    fn fail_and_retry(&mut self, err: Error, after: Duration) -> Disposition {
        self.sink.user.borrow_mut().event(PubSubEvent::Error(err));
        Disposition::Retry(after)
    }
}

/// One long-lived publish/subscribe binding to a single channel on a
/// single `(host, port)` PubNub deployment.
pub struct PubSub<C: Connector> {
    client: engine::Client<C>,
    host: String,
    channel: String,
    publish_key: String,
    subscribe_key: String,
    /// Stored but never placed in a URL or header -- publish and
    /// subscribe requests carry no signature today. Kept on the struct
    /// for parity with the key triple PubNub deployments are configured
    /// with, and for future signed-publish support.
    #[allow(dead_code)]
    secret_key: String,
    shared: Rc<Shared>,
    subscribe_handler: Option<Rc<RefCell<dyn PubSubHandler>>>,
}

impl<C: Connector> PubSub<C> {
    pub fn new(
        host: String,
        port: u16,
        channel: String,
        publish_key: String,
        subscribe_key: String,
        secret_key: String,
        connector: C,
        timer: TimerHandle,
        config: Arc<Config>,
    ) -> PubSub<C> {
        PubSub {
            client: engine::Client::new(host.clone(), port, connector, timer, config),
            host,
            channel,
            publish_key,
            subscribe_key,
            secret_key,
            shared: Rc::new(Shared {
                time_token: RefCell::new("0".to_owned()),
                rearm: RefCell::new(None),
            }),
            subscribe_handler: None,
        }
    }

    /// The current rolling time token; starts out as `"0"`.
    pub fn time_token(&self) -> String {
        self.shared.time_token.borrow().clone()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// `GET /publish/<pubKey>/<subKey>/0/<channel>/0/<json>`.
    /// `message_json` must already be a JSON document (typically a
    /// quoted string) -- encoding the outbound payload is the caller's
    /// job, not this layer's.
    pub fn publish<H, T>(&mut self, message_json: &str, handler: H, timers: &mut T)
    where
        H: PubSubHandler + 'static,
        T: TimerService,
    {
        debug!("{} publishing to {:?}", self.host, self.channel);
        let user: Rc<RefCell<dyn PubSubHandler>> = Rc::new(RefCell::new(handler));
        let mut req = engine::Request::new(
            Box::new(Handler {
                stream: JsonStream::new(),
                sink: Sink {
                    kind: Kind::Publish,
                    shared: self.shared.clone(),
                    user,
                },
            }),
            self.client.default_read_timeout(),
        );
        let line = format!(
            "GET /publish/{}/{}/0/{}/0/{} HTTP/1.1",
            urlenc::encode(&self.publish_key),
            urlenc::encode(&self.subscribe_key),
            urlenc::encode(&self.channel),
            urlenc::encode(message_json),
        );
        req.set(&self.host, &line);
        req.add("");
        self.client.enqueue(req, timers);
    }

    /// `GET /subscribe/<subKey>/<channel>/0/<timeToken>` with a 180s
    /// keep-alive and 210s read timeout. The *same* `handler` keeps
    /// receiving events across every subsequent auto-rearmed long-poll,
    /// keeping the subscribe loop going indefinitely.
    pub fn subscribe<H, T>(&mut self, handler: H, timers: &mut T)
    where
        H: PubSubHandler + 'static,
        T: TimerService,
    {
        let user: Rc<RefCell<dyn PubSubHandler>> = Rc::new(RefCell::new(handler));
        self.subscribe_handler = Some(user.clone());
        self.issue_subscribe(user, timers);
    }

    fn issue_subscribe<T: TimerService>(&mut self, user: Rc<RefCell<dyn PubSubHandler>>, timers: &mut T) {
        let token = self.time_token();
        debug!("{} subscribing to {:?} from token {:?}", self.host, self.channel, token);
        let mut req = engine::Request::new(
            Box::new(Handler {
                stream: JsonStream::new(),
                sink: Sink {
                    kind: Kind::Subscribe,
                    shared: self.shared.clone(),
                    user,
                },
            }),
            self.client.default_read_timeout(),
        );
        let line = format!(
            "GET /subscribe/{}/{}/0/{} HTTP/1.1",
            urlenc::encode(&self.subscribe_key),
            urlenc::encode(&self.channel),
            urlenc::encode(&token),
        );
        req.set(&self.host, &line);
        req.keepalive(SUBSCRIBE_KEEPALIVE, SUBSCRIBE_KEEPALIVE_MARGIN);
        req.add("");
        self.client.enqueue(req, timers);
    }

    /// Deliver a transport event to the underlying engine, then act on
    /// any subscribe auto-rearm the handler recorded while processing it
    /// (see `Rearm`'s doc comment for why this two-step dance is
    /// necessary in safe Rust).
    pub fn transport_event<T: TimerService>(&mut self, ev: TransportEvent, timers: &mut T) {
        self.client.transport_event(ev, timers);
        self.apply_rearm(timers);
    }

    pub fn timer_fired<T: TimerService>(&mut self, timers: &mut T) {
        self.client.timer_fired(timers);
        self.apply_rearm(timers);
    }

    fn apply_rearm<T: TimerService>(&mut self, timers: &mut T) {
        let pending = self.shared.rearm.borrow_mut().take();
        if let Some(Rearm::Resubscribe) = pending {
            if let Some(user) = self.subscribe_handler.clone() {
                self.issue_subscribe(user, timers);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use error::Error;
    use json_stream::JsonSink;

    use super::{Kind, Shared, Sink};

    fn new_sink(kind: Kind) -> (Sink, Rc<Shared>, Rc<RefCell<Vec<String>>>) {
        let shared = Rc::new(Shared {
            time_token: RefCell::new("0".to_owned()),
            rearm: RefCell::new(None),
        });
        let events = Rc::new(RefCell::new(Vec::new()));
        let events_for_closure = events.clone();
        let user: Rc<RefCell<dyn super::PubSubHandler>> = Rc::new(RefCell::new(move |ev: super::PubSubEvent<'_>| {
            let line = match ev {
                super::PubSubEvent::Data(buf) => format!("data:{}", String::from_utf8_lossy(buf)),
                super::PubSubEvent::Error(err) => format!("error:{}", err),
                super::PubSubEvent::Done => "done".to_owned(),
            };
            events_for_closure.borrow_mut().push(line);
        }));
        let sink = Sink { kind, shared: shared.clone(), user };
        (sink, shared, events)
    }

    #[test]
    fn depth_one_string_updates_time_token_only() {
        let (mut sink, shared, events) = new_sink(Kind::Subscribe);
        sink.string(1, b"14000000000000000").unwrap();
        assert_eq!(*shared.time_token.borrow(), "14000000000000000");
        assert!(events.borrow().is_empty(), "depth-1 strings are never surfaced as data");
    }

    #[test]
    fn depth_two_string_is_surfaced_as_data() {
        let (mut sink, shared, events) = new_sink(Kind::Subscribe);
        sink.string(2, b"hello").unwrap();
        assert_eq!(*events.borrow(), vec!["data:hello".to_owned()]);
        assert_eq!(*shared.time_token.borrow(), "0", "a depth-2 string must not touch the token");
    }

    #[test]
    fn publish_acks_depth_one_string_is_transient_not_data() {
        // `[1,"Sent","<token>"]`: both strings sit at depth 1. Grounded on
        // `json_string` in original_source/src/tcp/pubnub.c, which only
        // ever branches on `level > 1` -- there is no special case for a
        // publish ack's human-readable status text.
        let (mut sink, shared, events) = new_sink(Kind::Publish);
        sink.string(1, b"Sent").unwrap();
        sink.string(1, b"13900000000000000").unwrap();
        assert!(events.borrow().is_empty());
        assert_eq!(*shared.time_token.borrow(), "13900000000000000");
    }

    #[test]
    fn time_token_longer_than_nineteen_bytes_fails() {
        let (mut sink, ..) = new_sink(Kind::Subscribe);
        let too_long = "1".repeat(super::MAX_TIME_TOKEN_LEN + 1);
        let err = sink.string(1, too_long.as_bytes()).unwrap_err();
        assert_eq!(err, Error::DataParseError);
    }

    #[test]
    fn time_token_at_exactly_the_limit_succeeds() {
        let (mut sink, shared, _events) = new_sink(Kind::Subscribe);
        let exact = "1".repeat(super::MAX_TIME_TOKEN_LEN);
        sink.string(1, exact.as_bytes()).unwrap();
        assert_eq!(*shared.time_token.borrow(), exact);
    }
}
