use std::fmt;

/// HTTP version as parsed from a response status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Version 1.0 of the HTTP protocol
    Http10,
    /// Version 1.1 of the HTTP protocol
    Http11,
}

impl Version {
    pub(crate) fn from_major_minor(major: u32, minor: u32) -> Version {
        if major == 1 && minor == 0 {
            Version::Http10
        } else {
            // Anything else (in practice only 1.1) is treated as 1.1;
            // HTTP/2 is out of scope (spec.md Non-goals).
            Version::Http11
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}
