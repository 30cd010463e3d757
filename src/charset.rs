//! Character sets for parameter encoding and response decoding.
//!
//! Only the charsets that can be handled losslessly without a transcoding
//! table are supported. Encoding a string into a charset that cannot
//! represent one of its characters fails, which is how a single query pair
//! gets dropped while the rest of a request is still built.

use std::fmt;
use std::str::FromStr;

use reqwest::header::{CONTENT_TYPE, HeaderMap};

use crate::{CourierError, Result};

/// Supported character sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    #[default]
    Utf8,
    /// ISO-8859-1
    Latin1,
    /// US-ASCII
    Ascii,
}

impl Charset {
    /// Canonical IANA name.
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }

    /// Encode `text` into this charset.
    ///
    /// Returns `None` when a character has no representation.
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            Charset::Utf8 => Some(text.as_bytes().to_vec()),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).ok())
                .collect(),
            Charset::Ascii => text.is_ascii().then(|| text.as_bytes().to_vec()),
        }
    }

    /// Decode `bytes` from this charset.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| CourierError::Parse(format!("invalid UTF-8 body: {e}"))),
            Charset::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Charset::Ascii => {
                if bytes.is_ascii() {
                    Ok(bytes.iter().map(|&b| char::from(b)).collect())
                } else {
                    Err(CourierError::Parse("non-ASCII byte in US-ASCII body".into()))
                }
            }
        }
    }

    /// Charset declared by a response's `Content-Type`, or `default` when
    /// none is declared.
    ///
    /// A declared but unknown charset is an error rather than a silent
    /// fallback, so the caller sees a parse failure instead of mojibake.
    pub fn from_headers(headers: &HeaderMap, default: Charset) -> Result<Charset> {
        let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
            return Ok(default);
        };

        for param in content_type.split(';').skip(1) {
            let mut pair = param.trim().splitn(2, '=');
            if let (Some(name), Some(value)) = (pair.next(), pair.next())
                && name.trim().eq_ignore_ascii_case("charset")
            {
                return value.trim().trim_matches('"').parse();
            }
        }

        Ok(default)
    }
}

impl FromStr for Charset {
    type Err = CourierError;

    fn from_str(label: &str) -> Result<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Ok(Charset::Latin1),
            "us-ascii" | "ascii" => Ok(Charset::Ascii),
            other => Err(CourierError::UnsupportedCharset(other.to_string())),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
