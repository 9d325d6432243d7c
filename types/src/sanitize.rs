//! Terminal control-sequence stripping.
//!
//! Subprocess output is untrusted: it may carry cursor movement, screen
//! clears, OSC 52 clipboard writes, or OSC 8 hyperlinks. Text forwarded to
//! consumers has these removed while keeping printable characters, `\n`,
//! `\t`, and `\r`.
//!
//! [`sanitize_terminal_text`] handles a complete string. [`TerminalTextFilter`]
//! handles a stream of chunks where one escape sequence may be split across
//! chunk boundaries.

use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: u8 = 0x07;
/// Single-character CSI introducer from the C1 set.
const C1_CSI: char = '\u{009b}';

/// Longest unterminated sequence carried between chunks before it is
/// dropped as garbage.
const MAX_PENDING_ESCAPE: usize = 4096;

enum Scan {
    /// Sequence is complete and spans this many bytes.
    Complete(usize),
    /// Input ended before the sequence terminated.
    Incomplete,
}

/// Strip terminal escape sequences and disallowed control characters.
///
/// Returns `Cow::Borrowed` when the input needs no changes. An unterminated
/// sequence at the end of the input is dropped.
///
/// ```
/// use anvil_types::sanitize_terminal_text;
///
/// assert_eq!(sanitize_terminal_text("\x1b[31mred\x1b[0m"), "red");
/// assert_eq!(sanitize_terminal_text("plain"), "plain");
/// ```
#[must_use]
pub fn sanitize_terminal_text(input: &str) -> Cow<'_, str> {
    if !input.chars().any(needs_removal) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    let _ = sanitize_into(input, &mut out);
    Cow::Owned(out)
}

/// Incremental form of [`sanitize_terminal_text`].
///
/// A sequence that is still open at the end of a chunk is held back and
/// completed by the next chunk, so the output does not depend on where the
/// chunk boundaries fall.
#[derive(Debug, Default)]
pub struct TerminalTextFilter {
    pending: String,
}

impl TerminalTextFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of decoded text and return its sanitized part.
    pub fn push(&mut self, text: &str) -> String {
        let input = if self.pending.is_empty() {
            Cow::Borrowed(text)
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.push_str(text);
            Cow::Owned(joined)
        };

        let mut out = String::with_capacity(input.len());
        if let Some(open_at) = sanitize_into(&input, &mut out)
            && input.len() - open_at <= MAX_PENDING_ESCAPE
        {
            self.pending = input[open_at..].to_string();
        }
        out
    }

    /// Whether an unterminated sequence is being held back.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Append the sanitized form of `input` to `out`.
///
/// Returns the byte offset of a trailing unterminated sequence, if any.
fn sanitize_into(input: &str, out: &mut String) -> Option<usize> {
    let mut at = 0;
    while let Some(c) = input[at..].chars().next() {
        let scan = match c {
            ESC => Some(scan_escape(&input[at..])),
            C1_CSI => Some(scan_csi(&input[at..], C1_CSI.len_utf8())),
            _ => None,
        };
        match scan {
            Some(Scan::Complete(len)) => at += len,
            Some(Scan::Incomplete) => return Some(at),
            None => {
                if !needs_removal(c) {
                    out.push(c);
                }
                at += c.len_utf8();
            }
        }
    }
    None
}

/// Characters dropped on their own (outside any recognized sequence).
fn needs_removal(c: char) -> bool {
    match c {
        '\n' | '\t' | '\r' => false,
        '\0'..='\x1f' | '\x7f' | '\u{0080}'..='\u{009f}' => true,
        _ => false,
    }
}

/// `rest` starts with ESC.
fn scan_escape(rest: &str) -> Scan {
    let Some(&kind) = rest.as_bytes().get(1) else {
        return Scan::Incomplete;
    };
    match kind {
        b'[' => scan_csi(rest, 2),
        // OSC ends with BEL or ST; DCS/PM/APC only with ST.
        b']' => scan_string(rest, true),
        b'P' | b'^' | b'_' => scan_string(rest, false),
        // Charset designation and line attributes take one more character.
        b'(' | b')' | b'*' | b'+' | b'#' | b' ' => match rest[2..].chars().next() {
            Some(c) => Scan::Complete(2 + c.len_utf8()),
            None => Scan::Incomplete,
        },
        b'7' | b'8' | b'c' | b'D' | b'E' | b'H' | b'M' | b'N' | b'O' | b'Z' | b'=' | b'>'
        | b'<' => Scan::Complete(2),
        // Unknown: drop the ESC, keep what follows.
        _ => Scan::Complete(1),
    }
}

/// CSI: parameter/intermediate bytes (0x20-0x3F) then a final byte (0x40-0x7E).
fn scan_csi(rest: &str, params_start: usize) -> Scan {
    for (offset, &byte) in rest.as_bytes()[params_start..].iter().enumerate() {
        let at = params_start + offset;
        match byte {
            0x40..=0x7e => return Scan::Complete(at + 1),
            0x20..=0x3f => {}
            // Malformed: end the sequence here and let the byte through.
            _ => return Scan::Complete(at),
        }
    }
    Scan::Incomplete
}

/// String-type sequence terminated by ST (`ESC \`), or BEL when allowed.
fn scan_string(rest: &str, bel_terminates: bool) -> Scan {
    let bytes = rest.as_bytes();
    let mut at = 2;
    while at < bytes.len() {
        match bytes[at] {
            BEL if bel_terminates => return Scan::Complete(at + 1),
            0x1b => match bytes.get(at + 1) {
                Some(b'\\') => return Scan::Complete(at + 2),
                Some(_) => {}
                None => return Scan::Incomplete,
            },
            _ => {}
        }
        at += 1;
    }
    Scan::Incomplete
}
