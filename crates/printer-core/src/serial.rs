//! Serial line discipline.
//!
//! Commands arrive CRLF-terminated, optionally wrapped as `Nnnn …*cc` where
//! `cc` is the XOR of every byte before the `*`. Line numbers must ascend
//! one by one; any violation asks the host to resend from the expected
//! number. The G-code inside the payload is dispatched elsewhere; this
//! module owns only the framing.

use std::fmt;

use crate::error::ProtocolError;

/// A response on the serial channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command accepted and processed.
    Ok,
    /// The host must resend starting from `line`.
    Resend { line: u32 },
    /// Advisory text.
    Echo(String),
    /// Error text; always followed by a `Resend` when framing failed.
    Error(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "ok"),
            Reply::Resend { line } => write!(f, "Resend:{}", line),
            Reply::Echo(msg) => write!(f, "echo:{}", msg),
            Reply::Error(msg) => write!(f, "error:{}", msg),
        }
    }
}

/// Receive-side state: the last accepted line number.
#[derive(Debug, Default)]
pub struct Session {
    last_line: Option<u32>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// The line number a resend must restart from.
    pub fn expected_line(&self) -> u32 {
        self.last_line.map_or(0, |n| n.wrapping_add(1))
    }

    /// Resets the counter, as an `M110 Nnnn` handler would.
    pub fn set_line_number(&mut self, line: u32) {
        self.last_line = Some(line);
    }

    /// Validates one received line and strips its framing.
    ///
    /// Returns the command payload. On failure the caller should emit
    /// [`Session::resend_reply`]; the session keeps expecting the same line
    /// number so the retransmission can succeed.
    pub fn accept<'a>(&mut self, line: &'a str) -> Result<&'a str, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']).trim();
        if line.is_empty() {
            return Err(ProtocolError::MalformedLine("empty line".into()));
        }

        if !line.starts_with('N') {
            // Unnumbered lines carry no protection and bypass the counter.
            return Ok(line);
        }

        let (checked, stated) = match line.rfind('*') {
            Some(pos) => {
                let stated = line[pos + 1..].trim().parse::<u8>().map_err(|_| {
                    ProtocolError::MalformedLine(format!("bad checksum field in {:?}", line))
                })?;
                (&line[..pos], Some(stated))
            }
            None => (line, None),
        };

        if let Some(stated) = stated {
            let computed = checked.bytes().fold(0u8, |acc, b| acc ^ b);
            if computed != stated {
                return Err(ProtocolError::ChecksumMismatch { stated, computed });
            }
        }

        let digits_end = checked[1..]
            .find(|c: char| !c.is_ascii_digit())
            .map_or(checked.len(), |i| i + 1);
        let number = checked[1..digits_end]
            .parse::<u32>()
            .map_err(|_| ProtocolError::MalformedLine(format!("bad line number in {:?}", line)))?;

        let expected = self.expected_line();
        if self.last_line.is_some() && number != expected {
            return Err(ProtocolError::LineNumberMismatch {
                expected,
                got: number,
            });
        }

        self.last_line = Some(number);
        Ok(checked[digits_end..].trim())
    }

    /// The `Resend:` reply matching the current expectation.
    pub fn resend_reply(&self) -> Reply {
        Reply::Resend {
            line: self.expected_line(),
        }
    }
}
