//! A minimal, resumable, byte-at-a-time JSON SAX parser.
//!
//! Only three events matter to the pub/sub layer this feeds:
//! start-of-array, end-of-array, and string values -- object keys are
//! deliberately never surfaced. No crate in this workspace's dependency
//! stack offers an incremental, allocation-light JSON tokenizer, so this
//! is hand-written, in the same byte-at-a-time table-driven style
//! `parser.rs` uses for HTTP.
//!
//! Only array nesting is tracked as "depth"; object nesting is tracked
//! separately purely for structural validity (matching brackets, key vs.
//! value position) and never changes `depth`.

use std::char;

use error::Error;

/// Receives parsed string values as they complete.
pub trait JsonSink {
    /// A string value (not an object key) has closed. `depth` is the
    /// number of arrays enclosing it at that moment.
    fn string(&mut self, depth: u32, value: &[u8]) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    is_array: bool,
    /// Only meaningful for object frames: true when the next value-like
    /// token is a key rather than a value.
    awaiting_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Waiting for the first byte of a value (or a key, in object
    /// context).
    Value,
    /// Just finished a value (or a key); waiting for `,`, a closing
    /// bracket, or -- after a key -- `:`.
    AfterValue,
    InString,
    Escape,
    /// Mid `\uXXXX` escape; `.0` counts remaining hex digits, `.1` is the
    /// accumulated codepoint so far.
    Unicode(u8, u32),
    /// Consuming a number or `true`/`false`/`null` literal; tolerated
    /// but never surfaced, so only its extent (not its exact spelling)
    /// matters.
    Skip,
    /// The top-level value has closed; further non-whitespace bytes are
    /// a structural error.
    Done,
}

/// One JSON document's worth of incremental parse state.
pub struct JsonStream {
    stack: Vec<Frame>,
    mode: Mode,
    array_depth: u32,
    scratch: Vec<u8>,
    is_key: bool,
    pending_high_surrogate: Option<u16>,
}

impl JsonStream {
    pub fn new() -> JsonStream {
        JsonStream {
            stack: Vec::new(),
            mode: Mode::Value,
            array_depth: 0,
            scratch: Vec::new(),
            is_key: false,
            pending_high_surrogate: None,
        }
    }

    /// True once the top-level value has fully closed.
    pub fn is_done(&self) -> bool {
        self.mode == Mode::Done
    }

    /// Feed the next chunk of the response body. May be called any
    /// number of times; call `finish` once after the last chunk.
    pub fn feed(&mut self, buf: &[u8], sink: &mut dyn JsonSink) -> Result<(), Error> {
        for &b in buf {
            self.step(b, sink)?;
        }
        Ok(())
    }

    /// Call once the body is exhausted. Fails if a value was left open
    /// (unterminated string, unbalanced brackets, or no top-level value
    /// seen at all).
    pub fn finish(&self) -> Result<(), Error> {
        if self.mode == Mode::Done {
            Ok(())
        } else {
            Err(Error::DataParseError)
        }
    }

    fn step(&mut self, b: u8, sink: &mut dyn JsonSink) -> Result<(), Error> {
        match self.mode {
            Mode::Value => self.step_value(b),
            Mode::AfterValue => self.step_after_value(b),
            Mode::InString => self.step_in_string(b, sink),
            Mode::Escape => self.step_escape(b),
            Mode::Unicode(left, acc) => self.step_unicode(b, left, acc),
            Mode::Skip => self.step_skip(b, sink),
            Mode::Done => {
                if is_json_space(b) {
                    Ok(())
                } else {
                    Err(Error::DataParseError)
                }
            }
        }
    }

    fn step_value(&mut self, b: u8) -> Result<(), Error> {
        if is_json_space(b) {
            return Ok(());
        }
        match b {
            b'[' => {
                self.stack.push(Frame { is_array: true, awaiting_key: false });
                self.array_depth += 1;
                Ok(())
            }
            b'{' => {
                self.stack.push(Frame { is_array: false, awaiting_key: true });
                Ok(())
            }
            b'"' => {
                self.is_key = matches!(self.stack.last(), Some(f) if !f.is_array && f.awaiting_key);
                self.scratch.clear();
                self.mode = Mode::InString;
                Ok(())
            }
            b']' => self.close_array(),
            b'}' => self.close_object(),
            b'-' | b'0'..=b'9' | b't' | b'f' | b'n' => {
                self.mode = Mode::Skip;
                Ok(())
            }
            _ => Err(Error::DataParseError),
        }
    }

    fn step_after_value(&mut self, b: u8) -> Result<(), Error> {
        if is_json_space(b) {
            return Ok(());
        }
        // A key was just closed: only `:` is legal next.
        if matches!(self.stack.last(), Some(f) if !f.is_array && !f.awaiting_key) && self.is_key {
            self.is_key = false;
            return if b == b':' {
                self.mode = Mode::Value;
                Ok(())
            } else {
                Err(Error::DataParseError)
            };
        }
        match b {
            b',' => {
                if let Some(top) = self.stack.last_mut() {
                    if !top.is_array {
                        top.awaiting_key = true;
                    }
                }
                self.mode = Mode::Value;
                Ok(())
            }
            b']' => self.close_array(),
            b'}' => self.close_object(),
            _ => Err(Error::DataParseError),
        }
    }

    fn close_array(&mut self) -> Result<(), Error> {
        match self.stack.pop() {
            Some(Frame { is_array: true, .. }) => {
                self.array_depth -= 1;
                self.after_closed_container();
                Ok(())
            }
            _ => Err(Error::DataParseError),
        }
    }

    fn close_object(&mut self) -> Result<(), Error> {
        match self.stack.last() {
            // Empty object (`{}`): legal even though `awaiting_key` is
            // still set from the opening brace.
            Some(Frame { is_array: false, .. }) => {
                self.stack.pop();
                self.after_closed_container();
                Ok(())
            }
            _ => Err(Error::DataParseError),
        }
    }

    fn after_closed_container(&mut self) {
        if self.stack.is_empty() {
            self.mode = Mode::Done;
        } else {
            self.mode = Mode::AfterValue;
        }
    }

    fn step_in_string(&mut self, b: u8, sink: &mut dyn JsonSink) -> Result<(), Error> {
        match b {
            b'"' => {
                if !self.is_key {
                    sink.string(self.array_depth, &self.scratch)?;
                } else if let Some(top) = self.stack.last_mut() {
                    top.awaiting_key = false;
                }
                self.after_string_value()
            }
            b'\\' => {
                self.mode = Mode::Escape;
                Ok(())
            }
            _ => {
                self.scratch.push(b);
                Ok(())
            }
        }
    }

    fn after_string_value(&mut self) -> Result<(), Error> {
        if self.stack.is_empty() {
            self.mode = Mode::Done;
        } else {
            self.mode = Mode::AfterValue;
        }
        Ok(())
    }

    fn step_escape(&mut self, b: u8) -> Result<(), Error> {
        let lit = match b {
            b'"' => Some(b'"'),
            b'\\' => Some(b'\\'),
            b'/' => Some(b'/'),
            b'b' => Some(0x08),
            b'f' => Some(0x0c),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            _ => None,
        };
        if let Some(c) = lit {
            self.scratch.push(c);
            self.mode = Mode::InString;
            return Ok(());
        }
        if b == b'u' {
            self.mode = Mode::Unicode(4, 0);
            return Ok(());
        }
        Err(Error::DataParseError)
    }

    fn step_unicode(&mut self, b: u8, left: u8, acc: u32) -> Result<(), Error> {
        let digit = (b as char).to_digit(16).ok_or(Error::DataParseError)?;
        let acc = acc * 16 + digit;
        if left > 1 {
            self.mode = Mode::Unicode(left - 1, acc);
            return Ok(());
        }
        self.push_unicode_escape(acc as u16);
        self.mode = Mode::InString;
        Ok(())
    }

    fn push_unicode_escape(&mut self, unit: u16) {
        if let Some(high) = self.pending_high_surrogate.take() {
            if (0xdc00..=0xdfff).contains(&unit) {
                let c = 0x10000
                    + (u32::from(high) - 0xd800) * 0x400
                    + (u32::from(unit) - 0xdc00);
                self.push_char(c);
                return;
            }
            // Unpaired high surrogate: emit the replacement character and
            // fall through to treat `unit` as its own escape.
            self.push_char(0xfffd);
        }
        if (0xd800..=0xdbff).contains(&unit) {
            self.pending_high_surrogate = Some(unit);
        } else {
            self.push_char(u32::from(unit));
        }
    }

    fn push_char(&mut self, codepoint: u32) {
        let c = char::from_u32(codepoint).unwrap_or('\u{fffd}');
        let mut tmp = [0u8; 4];
        self.scratch.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
    }

    fn step_skip(&mut self, b: u8, _sink: &mut dyn JsonSink) -> Result<(), Error> {
        match b {
            b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' | b'a'..=b'z' => Ok(()),
            _ => {
                self.mode = Mode::AfterValue;
                self.step_after_value(b)
            }
        }
    }
}

fn is_json_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

#[cfg(test)]
mod test {
    use super::{JsonSink, JsonStream};
    use error::Error;

    struct Collector(Vec<(u32, String)>);

    impl JsonSink for Collector {
        fn string(&mut self, depth: u32, value: &[u8]) -> Result<(), Error> {
            self.0.push((depth, String::from_utf8_lossy(value).into_owned()));
            Ok(())
        }
    }

    fn run(body: &[u8]) -> Vec<(u32, String)> {
        let mut stream = JsonStream::new();
        let mut sink = Collector(Vec::new());
        stream.feed(body, &mut sink).unwrap();
        stream.finish().unwrap();
        sink.0
    }

    #[test]
    fn publish_response() {
        let out = run(br#"[1,"Sent","13900000000000000"]"#);
        assert_eq!(out, vec![(1, "Sent".into()), (1, "13900000000000000".into())]);
    }

    #[test]
    fn subscribe_with_messages() {
        let out = run(br#"[["hi","bye"],"14000000000000000"]"#);
        assert_eq!(
            out,
            vec![
                (2, "hi".into()),
                (2, "bye".into()),
                (1, "14000000000000000".into()),
            ]
        );
    }

    #[test]
    fn object_keys_are_not_surfaced() {
        let out = run(br#"[{"k":"v"},"token"]"#);
        assert_eq!(out, vec![(1, "v".into()), (1, "token".into())]);
    }

    #[test]
    fn escapes_decode() {
        let out = run(br#"["a\"b\\c\nA"]"#);
        assert_eq!(out, vec![(1, "a\"b\\c\nA".into())]);
    }

    #[test]
    fn split_across_feed_calls() {
        let whole = br#"[["x"],"9"]"#;
        for split in 0..whole.len() {
            let mut stream = JsonStream::new();
            let mut sink = Collector(Vec::new());
            stream.feed(&whole[..split], &mut sink).unwrap();
            stream.feed(&whole[split..], &mut sink).unwrap();
            stream.finish().unwrap();
            assert_eq!(sink.0, vec![(2, "x".into()), (1, "9".into())], "split at {}", split);
        }
    }

    #[test]
    fn unbalanced_brackets_fail_on_finish() {
        let mut stream = JsonStream::new();
        let mut sink = Collector(Vec::new());
        stream.feed(br#"["a""#, &mut sink).unwrap();
        assert!(stream.finish().is_err());
    }
}
