//! Reassembly of raw terminal output into clean logical lines.
//!
//! PTY output arrives in arbitrary chunks that can split a line (or an ANSI
//! escape sequence) anywhere. The buffer holds back an incomplete trailing
//! escape until the bytes completing it arrive, strips escapes from everything
//! else, and emits a line only once its `\n` has been observed. Partial text
//! without a newline is held indefinitely; each session owns its own buffer.

/// Longest escape-sequence tail held back waiting for completion. Anything
/// longer is flushed through as-is; it is almost certainly not a real escape.
const MAX_ESCAPE_HOLD: usize = 256;

/// Incremental line buffer for a single session.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Clean (escape-stripped) text still waiting for its newline.
    partial: String,
    /// Raw tail of an escape sequence split across chunk boundaries.
    escape_tail: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk; returns every logical line completed by it.
    ///
    /// Lines come back stripped of ANSI escapes and their terminating
    /// `\n` / `\r\n`.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut data = std::mem::take(&mut self.escape_tail);
        data.push_str(chunk);

        let mut hold = escape_hold_point(&data);
        if data.len() - hold > MAX_ESCAPE_HOLD {
            hold = data.len();
        }
        if hold < data.len() {
            self.escape_tail = data[hold..].to_string();
            data.truncate(hold);
        }

        if !data.is_empty() {
            self.partial.push_str(&strip_ansi(&data));
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Whether any partial line or escape tail is pending.
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty() && self.escape_tail.is_empty()
    }

    /// The clean text accumulated so far for the unterminated line.
    pub fn pending(&self) -> &str {
        &self.partial
    }
}

/// Remove ANSI escape sequences (CSI, OSC, SGR, simple escapes).
pub fn strip_ansi(text: &str) -> String {
    String::from_utf8(strip_ansi_escapes::strip(text)).unwrap_or_else(|_| text.to_string())
}

/// Byte offset where an incomplete trailing escape sequence starts, or
/// `data.len()` when the chunk ends cleanly.
///
/// Only the last ESC in the chunk can open an unterminated sequence: an
/// ST-terminated OSC/DCS ends in `ESC \`, whose own ESC is then the last one
/// and forms a complete two-byte escape.
fn escape_hold_point(data: &str) -> usize {
    let bytes = data.as_bytes();
    let Some(esc) = bytes.iter().rposition(|&b| b == 0x1b) else {
        return data.len();
    };
    if sequence_complete(&bytes[esc..]) {
        data.len()
    } else {
        esc
    }
}

/// Whether the escape sequence starting at `seq[0] == ESC` is complete.
fn sequence_complete(seq: &[u8]) -> bool {
    match seq.get(1) {
        // Bare ESC at the very end of the chunk.
        None => false,
        // CSI: ESC [ params... final-byte in 0x40..=0x7E.
        Some(b'[') => seq.iter().skip(2).any(|&b| (0x40..=0x7e).contains(&b)),
        // OSC: ESC ] text (BEL | ST). ST would make its own ESC the last one,
        // so only BEL can terminate the sequence seen from here.
        Some(b']') => seq.iter().skip(2).any(|&b| b == 0x07),
        // DCS: ESC P text ST. ST-only terminator, so never complete here.
        Some(b'P') => false,
        // Two-byte escape (ESC c, ESC 7, ESC \, ...).
        Some(_) => true,
    }
}
