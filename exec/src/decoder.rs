//! Byte-to-text decoding and binary sniffing for subprocess output.
//!
//! The encoding is chosen once per execution from the first bytes observed
//! ([`resolve_encoding`]); each output stream then gets its own
//! [`OutputDecoder`] so a multi-byte sequence split across reads on one pipe
//! is completed by the next read on that same pipe.

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};

/// Default number of leading output bytes inspected by [`BinarySniffer`].
pub const DEFAULT_SNIFF_BYTES: usize = 4096;
/// Default number of leading output chunks inspected by [`BinarySniffer`].
pub const DEFAULT_SNIFF_CHUNKS: usize = 20;

/// File signatures that mark output as binary even without NUL bytes early on.
const BINARY_MAGIC: &[&[u8]] = &[
    b"\x89PNG\r\n\x1a\n",
    b"\xff\xd8\xff",
    b"GIF87a",
    b"GIF89a",
    b"PK\x03\x04",
    b"\x7fELF",
    b"\x1f\x8b",
];

/// Pick the encoding for an execution from its first output bytes.
///
/// Order: byte-order mark, then the locale's charset, then strict UTF-8
/// validity, then a statistical guess. Falls back to UTF-8.
#[must_use]
pub fn resolve_encoding(first_bytes: &[u8]) -> &'static Encoding {
    resolve_encoding_with_locale(first_bytes, locale_encoding())
}

/// [`resolve_encoding`] with the locale charset supplied by the caller.
#[must_use]
pub fn resolve_encoding_with_locale(
    first_bytes: &[u8],
    locale: Option<&'static Encoding>,
) -> &'static Encoding {
    if let Some((encoding, _bom_len)) = Encoding::for_bom(first_bytes) {
        return encoding;
    }
    if let Some(encoding) = locale {
        return encoding;
    }
    if first_bytes.is_empty() || is_utf8_prefix(first_bytes) {
        return UTF_8;
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(first_bytes, false);
    detector.guess(None, true)
}

/// Valid UTF-8, allowing one truncated sequence at the very end.
fn is_utf8_prefix(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(err) => err.error_len().is_none(),
    }
}

/// Charset named by the POSIX locale environment, if `encoding_rs` knows it.
#[must_use]
pub fn locale_encoding() -> Option<&'static Encoding> {
    if cfg!(windows) {
        return None;
    }
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
        .and_then(|value| charset_from_locale(&value))
}

/// Extract the charset from a locale string such as `de_DE.ISO-8859-15@euro`.
#[must_use]
pub fn charset_from_locale(locale: &str) -> Option<&'static Encoding> {
    let (_, rest) = locale.split_once('.')?;
    let charset = rest.split('@').next().unwrap_or(rest);
    Encoding::for_label(charset.as_bytes())
}

/// Stateful decoder for one output stream.
///
/// Undecoded trailing bytes are carried to the next [`decode`](Self::decode)
/// call, so decoding is independent of chunk boundaries.
pub struct OutputDecoder {
    decoder: Decoder,
}

impl std::fmt::Debug for OutputDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputDecoder")
            .field("encoding", &self.decoder.encoding().name())
            .finish()
    }
}

impl OutputDecoder {
    #[must_use]
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
        }
    }

    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.decoder.encoding()
    }

    /// Decode the next chunk. An incomplete trailing sequence is held back.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.decode_inner(bytes, false)
    }

    /// Flush held-back bytes at end of stream (as replacement characters).
    pub fn finish(&mut self) -> String {
        self.decode_inner(&[], true)
    }

    fn decode_inner(&mut self, mut bytes: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or_else(|| bytes.len().saturating_mul(3).saturating_add(16));
            out.reserve(needed);
            let (result, read, _had_replacements) =
                self.decoder.decode_to_string(bytes, &mut out, last);
            bytes = &bytes[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => {}
            }
        }
    }
}

/// Bounded-prefix binary classifier.
///
/// Inspects at most `max_bytes` bytes taken from at most `max_chunks` chunks.
/// Once content is classified as binary the verdict never changes.
#[derive(Debug)]
pub struct BinarySniffer {
    window: Vec<u8>,
    chunks_seen: usize,
    max_bytes: usize,
    max_chunks: usize,
    detected: bool,
}

impl Default for BinarySniffer {
    fn default() -> Self {
        Self::new(DEFAULT_SNIFF_BYTES, DEFAULT_SNIFF_CHUNKS)
    }
}

impl BinarySniffer {
    #[must_use]
    pub fn new(max_bytes: usize, max_chunks: usize) -> Self {
        Self {
            window: Vec::with_capacity(max_bytes.min(DEFAULT_SNIFF_BYTES)),
            chunks_seen: 0,
            max_bytes,
            max_chunks,
            detected: false,
        }
    }

    /// Feed the next chunk; returns whether the output is binary.
    pub fn observe(&mut self, chunk: &[u8]) -> bool {
        if self.detected || !self.is_open() || chunk.is_empty() {
            return self.detected;
        }
        self.chunks_seen += 1;
        let take = chunk.len().min(self.max_bytes - self.window.len());
        let fresh = &chunk[..take];
        self.window.extend_from_slice(fresh);

        self.detected = fresh.contains(&0)
            || BINARY_MAGIC
                .iter()
                .any(|magic| self.window.starts_with(magic));
        self.detected
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.detected
    }

    /// Whether more output may still be inspected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.window.len() < self.max_bytes && self.chunks_seen < self.max_chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{EUC_JP, ISO_8859_15, SHIFT_JIS, UTF_16LE};

    fn decode_in_two(bytes: &[u8], split: usize) -> String {
        let mut decoder = OutputDecoder::new(UTF_8);
        let mut text = decoder.decode(&bytes[..split]);
        text.push_str(&decoder.decode(&bytes[split..]));
        text.push_str(&decoder.finish());
        text
    }

    #[test]
    fn decoding_is_independent_of_chunk_boundaries() {
        let text = "naïve café — 日本語 👋 done\n";
        let bytes = text.as_bytes();
        for split in 0..=bytes.len() {
            assert_eq!(decode_in_two(bytes, split), text, "split at {split}");
        }
    }

    #[test]
    fn decoding_across_three_chunks_inside_one_codepoint() {
        let bytes = "👋".as_bytes();
        let mut decoder = OutputDecoder::new(UTF_8);
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..3]), "");
        assert_eq!(decoder.decode(&bytes[3..]), "👋");
    }

    #[test]
    fn finish_flushes_truncated_sequence_as_replacement() {
        let mut decoder = OutputDecoder::new(UTF_8);
        assert_eq!(decoder.decode(&[b'a', 0xe6]), "a");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[test]
    fn shift_jis_split_mid_character() {
        let (bytes, _, _) = SHIFT_JIS.encode("日本語のテキスト");
        let mut decoder = OutputDecoder::new(SHIFT_JIS);
        let mut text = decoder.decode(&bytes[..3]);
        text.push_str(&decoder.decode(&bytes[3..]));
        assert_eq!(text, "日本語のテキスト");
    }

    #[test]
    fn bom_wins_over_everything() {
        let bytes = [0xff, 0xfe, b'h', 0, b'i', 0];
        assert_eq!(resolve_encoding_with_locale(&bytes, Some(EUC_JP)), UTF_16LE);
    }

    #[test]
    fn locale_charset_used_when_present() {
        assert_eq!(resolve_encoding_with_locale(b"plain", Some(EUC_JP)), EUC_JP);
    }

    #[test]
    fn valid_utf8_resolves_to_utf8() {
        assert_eq!(resolve_encoding_with_locale("héllo".as_bytes(), None), UTF_8);
        assert_eq!(resolve_encoding_with_locale(b"", None), UTF_8);
    }

    #[test]
    fn truncated_utf8_prefix_still_resolves_to_utf8() {
        let bytes = "ok 👋".as_bytes();
        let cut = &bytes[..bytes.len() - 2];
        assert_eq!(resolve_encoding_with_locale(cut, None), UTF_8);
    }

    #[test]
    fn legacy_single_byte_text_is_guessed() {
        let text = "Le café était très animé, et la crème brûlée était délicieuse.";
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode(text);
        let encoding = resolve_encoding_with_locale(&bytes, None);
        assert_ne!(encoding, UTF_8);
        let mut decoder = OutputDecoder::new(encoding);
        assert!(decoder.decode(&bytes).contains("café"));
    }

    #[test]
    fn charset_parsed_from_locale_strings() {
        assert_eq!(charset_from_locale("en_US.UTF-8"), Some(UTF_8));
        assert_eq!(charset_from_locale("ja_JP.EUC-JP"), Some(EUC_JP));
        assert_eq!(charset_from_locale("de_DE.ISO-8859-15@euro"), Some(ISO_8859_15));
        assert_eq!(charset_from_locale("C"), None);
        assert_eq!(charset_from_locale("POSIX"), None);
        assert_eq!(charset_from_locale("xx_XX.not-a-charset"), None);
    }

    #[test]
    fn sniffer_flags_nul_bytes() {
        let mut sniffer = BinarySniffer::default();
        assert!(!sniffer.observe(b"hello "));
        assert!(sniffer.observe(b"wor\0ld"));
        assert!(sniffer.is_binary());
    }

    #[test]
    fn sniffer_flags_magic_split_across_chunks() {
        let mut sniffer = BinarySniffer::default();
        assert!(!sniffer.observe(b"\x89PN"));
        assert!(sniffer.observe(b"G\r\n\x1a\n rest"));
    }

    #[test]
    fn sniffer_verdict_is_monotonic() {
        let mut sniffer = BinarySniffer::default();
        assert!(sniffer.observe(b"\x7fELF\x02\x01"));
        assert!(sniffer.observe(b"entirely textual afterwards"));
        assert!(sniffer.is_binary());
    }

    #[test]
    fn sniffer_stops_after_byte_window() {
        let mut sniffer = BinarySniffer::new(8, 20);
        assert!(!sniffer.observe(b"12345678"));
        assert!(!sniffer.is_open());
        assert!(!sniffer.observe(b"\0\0\0"));
    }

    #[test]
    fn sniffer_stops_after_chunk_window() {
        let mut sniffer = BinarySniffer::new(4096, 2);
        assert!(!sniffer.observe(b"a"));
        assert!(!sniffer.observe(b"b"));
        assert!(!sniffer.observe(b"\0"));
    }

    #[test]
    fn sniffer_only_inspects_bytes_inside_window() {
        let mut sniffer = BinarySniffer::new(4, 20);
        assert!(!sniffer.observe(b"abcd\0"));
    }
}
