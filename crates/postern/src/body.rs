//! Body text/binary handling.
//!
//! Textual media types are decoded to a string with their declared charset;
//! anything else travels base64 encoded with the flag set.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mime::Mime;

/// Charsets a textual body can be decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Ascii,
    Latin1,
    Utf16Le,
    Hex,
    Base64,
}

impl Charset {
    /// Look up a charset label, ignoring case. Unknown labels give `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Some(Self::Utf8),
            "ascii" => Some(Self::Ascii),
            "latin1" | "iso-8859-1" | "binary" => Some(Self::Latin1),
            "ucs2" | "ucs-2" | "utf16le" | "utf-16le" => Some(Self::Utf16Le),
            "hex" => Some(Self::Hex),
            "base64" => Some(Self::Base64),
            _ => None,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Ascii => bytes.iter().map(|b| char::from(b & 0x7f)).collect(),
            Self::Latin1 => bytes.iter().map(|b| char::from(*b)).collect(),
            Self::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Self::Hex => hex::encode(bytes),
            Self::Base64 => STANDARD.encode(bytes),
        }
    }
}

/// Whether a media type carries text.
pub fn is_textual(media: &Mime) -> bool {
    if media.type_() == mime::TEXT {
        return true;
    }
    if media.type_() != mime::APPLICATION {
        return false;
    }
    if matches!(media.suffix(), Some(s) if s == mime::JSON || s == mime::XML) {
        return true;
    }
    matches!(
        media.subtype().as_str(),
        "json" | "xml" | "javascript" | "x-www-form-urlencoded"
    )
}

/// A body ready for a response description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub body: String,
    pub is_base64_encoded: bool,
}

/// Decode `bytes` according to a `content-type` header value.
pub fn encode_body(content_type: Option<&str>, bytes: &[u8]) -> EncodedBody {
    let media = content_type.and_then(|ct| ct.parse::<Mime>().ok());
    match media {
        Some(media) if is_textual(&media) => {
            let charset = media
                .get_param(mime::CHARSET)
                .and_then(|c| Charset::from_label(c.as_str()))
                .unwrap_or(Charset::Utf8);
            EncodedBody {
                body: charset.decode(bytes),
                is_base64_encoded: false,
            }
        }
        _ => EncodedBody {
            body: STANDARD.encode(bytes),
            is_base64_encoded: true,
        },
    }
}

/// Raw bytes of a body that may be base64 encoded. Invalid base64 is sent
/// as-is.
pub fn decode_body(body: &str, is_base64_encoded: bool) -> Vec<u8> {
    if is_base64_encoded {
        if let Ok(bytes) = STANDARD.decode(body) {
            return bytes;
        }
    }
    body.as_bytes().to_vec()
}
