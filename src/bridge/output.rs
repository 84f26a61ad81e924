//! Output formatting for inbound messages

use std::io::{self, Write};
use std::sync::Mutex;

/// How inbound payloads are written, chosen once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Payload bytes as-is
    #[default]
    Raw,
    /// Lowercase hexadecimal text
    Hex,
}

impl OutputMode {
    pub fn from_hex_flag(hex: bool) -> Self {
        if hex {
            OutputMode::Hex
        } else {
            OutputMode::Raw
        }
    }

    /// Render `payload` followed by a newline
    pub fn format(self, payload: &[u8]) -> Vec<u8> {
        let mut line = match self {
            OutputMode::Raw => payload.to_vec(),
            OutputMode::Hex => hex::encode(payload).into_bytes(),
        };
        line.push(b'\n');
        line
    }
}

/// Line-at-a-time writer shared by every session's message handler
pub struct Printer {
    mode: OutputMode,
    out: Mutex<Box<dyn Write + Send>>,
}

impl Printer {
    pub fn new(mode: OutputMode, out: Box<dyn Write + Send>) -> Self {
        Self {
            mode,
            out: Mutex::new(out),
        }
    }

    /// Printer writing to standard output
    pub fn stdout(mode: OutputMode) -> Self {
        Self::new(mode, Box::new(io::stdout()))
    }

    /// Write one payload as a complete line and flush
    pub fn print(&self, payload: &[u8]) -> io::Result<()> {
        let line = self.mode.format(payload);
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::other("output writer poisoned"))?;
        out.write_all(&line)?;
        out.flush()
    }
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Printer").field("mode", &self.mode).finish()
    }
}
