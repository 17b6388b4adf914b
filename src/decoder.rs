//! Byte-to-text decoding for upstream rule sources.
//!
//! Upstream lists arrive as raw bytes in whatever encoding the publisher
//! chose, and a few publishers ship the whole list as a single base64 blob.
//! This module turns those bytes into plain text:
//!
//! - [`decode_bytes`] walks a fixed codec chain and never fails
//! - [`decode_if_base64`] opportunistically unwraps whole-file base64 payloads
//! - [`decode_source`] combines both, in that order

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::borrow::Cow;
use tracing::debug;

/// Minimum length (after whitespace removal) of a candidate base64 payload.
const MIN_BASE64_LEN: usize = 20;

/// Decoded payloads with more non-printable characters than this are rejected.
const MAX_NON_PRINTABLE_RATIO: f64 = 0.05;

/// A character encoding tried by the codec chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8, with an optional byte-order mark stripped.
    Utf8,
    /// UTF-16 little endian; only when the input starts with its BOM.
    Utf16Le,
    /// UTF-16 big endian; only when the input starts with its BOM.
    Utf16Be,
    /// ISO-8859-1. Maps every byte, so it terminates the default chain.
    Latin1,
}

/// Codec chain used by [`decode_bytes`].
pub const DEFAULT_CHAIN: &[TextEncoding] = &[
    TextEncoding::Utf8,
    TextEncoding::Utf16Le,
    TextEncoding::Utf16Be,
    TextEncoding::Latin1,
];

impl TextEncoding {
    /// Decode `bytes`, or `None` on a fatal decoding error.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => {
                let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                std::str::from_utf8(body).ok().map(str::to_owned)
            }
            TextEncoding::Utf16Le => {
                let body = bytes.strip_prefix(&[0xFF, 0xFE])?;
                decode_utf16(body, u16::from_le_bytes)
            }
            TextEncoding::Utf16Be => {
                let body = bytes.strip_prefix(&[0xFE, 0xFF])?;
                decode_utf16(body, u16::from_be_bytes)
            }
            TextEncoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

fn decode_utf16(body: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if body.len() % 2 != 0 {
        return None;
    }
    let units = body.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

/// Decode raw bytes with the default codec chain.
pub fn decode_bytes(bytes: &[u8]) -> String {
    decode_bytes_with(bytes, DEFAULT_CHAIN)
}

/// Decode raw bytes with the first encoding in `chain` that succeeds.
///
/// Returns an empty string when every encoding fails.
pub fn decode_bytes_with(bytes: &[u8], chain: &[TextEncoding]) -> String {
    for encoding in chain {
        if let Some(text) = encoding.decode(bytes) {
            debug!("Decoded {} bytes as {:?}", bytes.len(), encoding);
            return text;
        }
    }
    String::new()
}

/// Unwrap a whole-document base64 payload, if the input looks like one.
///
/// The input qualifies only if, once trimmed, it contains no space and its
/// whitespace-free form is at least [`MIN_BASE64_LEN`] characters long and a
/// multiple of 4. The decoded bytes must form printable-dominant text with no
/// NUL. Anything else returns the input unchanged (`Cow::Borrowed`), so a
/// caller can tell whether a decode happened.
pub fn decode_if_base64(content: &str) -> Cow<'_, str> {
    let trimmed = content.trim();
    if trimmed.contains(' ') {
        return Cow::Borrowed(content);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < MIN_BASE64_LEN || compact.len() % 4 != 0 {
        return Cow::Borrowed(content);
    }

    let Ok(bytes) = BASE64.decode(compact.as_bytes()) else {
        return Cow::Borrowed(content);
    };

    let decoded = String::from_utf8_lossy(&bytes);
    if is_printable_text(&decoded) {
        Cow::Owned(decoded.into_owned())
    } else {
        Cow::Borrowed(content)
    }
}

fn is_printable_text(text: &str) -> bool {
    let mut total = 0usize;
    let mut non_printable = 0usize;
    for c in text.chars() {
        if c == '\0' {
            return false;
        }
        total += 1;
        let printable = matches!(c, '\n' | '\r' | '\t') || !(c.is_control() || c == '\u{FFFD}');
        if !printable {
            non_printable += 1;
        }
    }
    total > 0 && (non_printable as f64 / total as f64) < MAX_NON_PRINTABLE_RATIO
}

/// Decoded source text, and whether a base64 layer was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSource {
    pub text: String,
    pub was_base64: bool,
}

/// Full decoding pass: codec chain, then the base64 pre-pass.
pub fn decode_source(bytes: &[u8]) -> DecodedSource {
    let text = decode_bytes(bytes);
    match decode_if_base64(&text) {
        Cow::Owned(decoded) => DecodedSource {
            text: decoded,
            was_base64: true,
        },
        Cow::Borrowed(_) => DecodedSource {
            text,
            was_base64: false,
        },
    }
}
