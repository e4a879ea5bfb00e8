//! Typed payload codec for the seven primitive EBML element kinds.
//!
//! | Kind     | Encoded form                                          |
//! |----------|-------------------------------------------------------|
//! | Unsigned | big-endian, 0 to 8 bytes, no leading zero bytes       |
//! | Signed   | big-endian two's complement, 0 to 8 bytes             |
//! | Float    | IEEE 754 big-endian, exactly 4 or 8 bytes             |
//! | Ascii    | ASCII, may be right-padded with NUL bytes             |
//! | Utf8     | UTF-8, may be right-padded with NUL bytes             |
//! | Date     | signed 64-bit nanoseconds since 2001-01-01T00:00 UTC  |
//! | Binary   | opaque bytes                                          |
//!
//! Zero-length payloads decode to the kind's zero value (0, 0.0, the empty
//! string, the epoch). Encoding supports widths above the minimum so that
//! callers can reserve space: integers pad on the left, strings on the
//! right. Binary payloads cannot be padded.
//!
//! ASCII values substitute rather than fail: a payload byte outside the
//! ASCII range decodes to U+FFFD, and a character outside the ASCII range
//! encodes as `?`, so an `Ascii` payload always holds single-byte ASCII
//! no matter what string a caller stored.

use mkedit_error::{EbmlError, Result};

/// The primitive kind of an atomic element's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKind {
    Unsigned,
    Signed,
    Float,
    Ascii,
    Utf8,
    Date,
    Binary,
}

impl AtomKind {
    /// Human-readable kind name, used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unsigned => "unsigned",
            Self::Signed => "signed",
            Self::Float => "float",
            Self::Ascii => "string",
            Self::Utf8 => "UTF-8 string",
            Self::Date => "date",
            Self::Binary => "binary",
        }
    }
}

/// A decoded atomic payload value.
///
/// `Date` carries nanoseconds relative to the Matroska epoch,
/// 2001-01-01T00:00:00 UTC.
#[derive(Debug, Clone, PartialEq)]
pub enum EbmlValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Ascii(String),
    Utf8(String),
    Date(i64),
    Binary(Vec<u8>),
}

impl EbmlValue {
    /// The kind's zero value, used for programmatically created elements
    /// and for zero-length payloads.
    #[must_use]
    pub fn default_for(kind: AtomKind) -> Self {
        match kind {
            AtomKind::Unsigned => Self::Unsigned(0),
            AtomKind::Signed => Self::Signed(0),
            AtomKind::Float => Self::Float(0.0),
            AtomKind::Ascii => Self::Ascii(String::new()),
            AtomKind::Utf8 => Self::Utf8(String::new()),
            AtomKind::Date => Self::Date(0),
            AtomKind::Binary => Self::Binary(Vec::new()),
        }
    }

    /// The kind this value belongs to.
    #[must_use]
    pub const fn kind(&self) -> AtomKind {
        match self {
            Self::Unsigned(_) => AtomKind::Unsigned,
            Self::Signed(_) => AtomKind::Signed,
            Self::Float(_) => AtomKind::Float,
            Self::Ascii(_) => AtomKind::Ascii,
            Self::Utf8(_) => AtomKind::Utf8,
            Self::Date(_) => AtomKind::Date,
            Self::Binary(_) => AtomKind::Binary,
        }
    }

    /// Decode a payload of the given kind.
    pub fn decode(kind: AtomKind, data: &[u8]) -> Result<Self> {
        match kind {
            AtomKind::Unsigned => {
                if data.len() > 8 {
                    return Err(EbmlError::out_of_range(
                        "unsigned payload",
                        format!("{} bytes", data.len()),
                    ));
                }
                let mut value: u64 = 0;
                for &b in data {
                    value = (value << 8) | u64::from(b);
                }
                Ok(Self::Unsigned(value))
            }
            AtomKind::Signed => {
                if data.len() > 8 {
                    return Err(EbmlError::out_of_range(
                        "signed payload",
                        format!("{} bytes", data.len()),
                    ));
                }
                Ok(Self::Signed(decode_be_signed(data)))
            }
            AtomKind::Float => match data.len() {
                0 => Ok(Self::Float(0.0)),
                4 => Ok(Self::Float(f64::from(f32::from_be_bytes(
                    data.try_into().expect("length checked"),
                )))),
                8 => Ok(Self::Float(f64::from_be_bytes(
                    data.try_into().expect("length checked"),
                ))),
                n => Err(EbmlError::out_of_range("float payload", format!("{n} bytes"))),
            },
            AtomKind::Ascii => {
                let stripped = strip_trailing_nuls(data);
                let s = stripped
                    .iter()
                    .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                    .collect();
                Ok(Self::Ascii(s))
            }
            AtomKind::Utf8 => {
                let stripped = strip_trailing_nuls(data);
                let s = std::str::from_utf8(stripped).map_err(|e| EbmlError::InvalidUtf8 {
                    detail: e.to_string(),
                })?;
                Ok(Self::Utf8(s.to_owned()))
            }
            AtomKind::Date => match data.len() {
                0 => Ok(Self::Date(0)),
                8 => Ok(Self::Date(i64::from_be_bytes(
                    data.try_into().expect("length checked"),
                ))),
                n => Err(EbmlError::out_of_range("date payload", format!("{n} bytes"))),
            },
            AtomKind::Binary => Ok(Self::Binary(data.to_vec())),
        }
    }

    /// Minimum number of payload bytes that can encode this value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn min_encoded_len(&self) -> u64 {
        match self {
            Self::Unsigned(v) => {
                if *v == 0 {
                    0
                } else {
                    u64::from((64 - v.leading_zeros() + 7) / 8)
                }
            }
            Self::Signed(v) => min_signed_len(*v),
            Self::Float(v) => {
                if f64::from(*v as f32).to_bits() == v.to_bits() {
                    4
                } else {
                    8
                }
            }
            // ASCII encodes one byte per character, substituting for
            // anything outside the range; UTF-8 is written verbatim.
            Self::Ascii(s) => s.chars().count() as u64,
            Self::Utf8(s) => s.len() as u64,
            Self::Date(_) => 8,
            Self::Binary(b) => b.len() as u64,
        }
    }

    /// Encoded length with `preferred` bytes reserved where the kind allows
    /// padding. Integers and strings grow to `preferred`; floats snap to 4
    /// or 8; dates are always 8; binary is fixed at its own length.
    #[must_use]
    pub fn encoded_len(&self, preferred: u64) -> u64 {
        let min = self.min_encoded_len();
        match self {
            Self::Unsigned(_) | Self::Signed(_) => min.max(preferred.min(8)),
            Self::Float(_) => {
                if min == 8 || preferred > 4 {
                    8
                } else {
                    4
                }
            }
            Self::Ascii(_) | Self::Utf8(_) => min.max(preferred),
            Self::Date(_) => 8,
            Self::Binary(_) => min,
        }
    }

    /// Whether this value can be encoded in exactly `width` bytes.
    #[must_use]
    pub fn fits_width(&self, width: u64) -> bool {
        let min = self.min_encoded_len();
        match self {
            Self::Unsigned(_) | Self::Signed(_) => width >= min && width <= 8,
            Self::Float(v) => width == 8 || (width == 4 && min == 4) || (width == 0 && *v == 0.0),
            Self::Ascii(_) | Self::Utf8(_) => width >= min,
            Self::Date(ns) => width == 8 || (width == 0 && *ns == 0),
            Self::Binary(_) => width == min,
        }
    }

    /// Encode this value in exactly `width` bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, width: u64) -> Result<Vec<u8>> {
        if !self.fits_width(width) {
            return Err(EbmlError::out_of_range(
                format!("{} value", self.kind().name()),
                format!("cannot encode in {width} bytes"),
            ));
        }
        let width = width as usize;
        Ok(match self {
            Self::Unsigned(v) => v.to_be_bytes()[8 - width..].to_vec(),
            Self::Signed(v) | Self::Date(v) => v.to_be_bytes()[8 - width..].to_vec(),
            Self::Float(v) => match width {
                0 => Vec::new(),
                4 => (*v as f32).to_be_bytes().to_vec(),
                _ => v.to_be_bytes().to_vec(),
            },
            Self::Ascii(s) => {
                let mut out: Vec<u8> = s
                    .chars()
                    .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                    .collect();
                out.resize(width, 0);
                out
            }
            Self::Utf8(s) => {
                let mut out = s.as_bytes().to_vec();
                out.resize(width, 0);
                out
            }
            Self::Binary(b) => b.clone(),
        })
    }

    /// The value as an unsigned integer, if it is one.
    #[must_use]
    pub const fn as_unsigned(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a signed integer, if it is one.
    #[must_use]
    pub const fn as_signed(&self) -> Option<i64> {
        match self {
            Self::Signed(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a float, if it is one.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a string slice, for both string kinds.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Ascii(s) | Self::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// The value as raw bytes, if it is binary.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Nanoseconds since the Matroska epoch, if this is a date.
    #[must_use]
    pub const fn as_date_ns(&self) -> Option<i64> {
        match self {
            Self::Date(ns) => Some(*ns),
            _ => None,
        }
    }

    /// Numeric view for range checking; strings and binary have none.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Unsigned(v) => Some(*v as f64),
            Self::Signed(v) | Self::Date(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for EbmlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Signed(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Ascii(s) | Self::Utf8(s) => write!(f, "{s:?}"),
            Self::Date(ns) => write!(f, "{ns}ns since 2001-01-01"),
            Self::Binary(b) => {
                if b.len() > 32 {
                    write!(f, "[size {}]", b.len())
                } else {
                    write!(f, "{}", crate::hex_bytes(b))
                }
            }
        }
    }
}

/// Decode a big-endian two's complement integer of 0 to 8 bytes.
#[allow(clippy::cast_possible_wrap)]
fn decode_be_signed(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut value: u64 = if negative { u64::MAX } else { 0 };
    for &b in bytes {
        value = (value << 8) | u64::from(b);
    }
    value as i64
}

/// Bytes needed for a two's complement encoding of `v`.
fn min_signed_len(v: i64) -> u64 {
    if v == 0 {
        return 0;
    }
    for n in 1..8u32 {
        let bits = 8 * n - 1;
        if v >= -(1i64 << bits) && v < (1i64 << bits) {
            return u64::from(n);
        }
    }
    8
}

fn strip_trailing_nuls(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}
