//! EBML element header: ID plus data size.
//!
//! The encoded header is not uniquely determined by the ID and size: the
//! size may be written with a wider length descriptor than it needs. For
//! in-place modification it is important to keep an element's total size
//! unchanged where possible, so the size width is tracked explicitly and
//! may be inflated to reserve room for future growth.

use mkedit_error::{EbmlError, Result};

use crate::vint::{decode_id, decode_vint, encode_vint, vint_min_len};
use crate::ElementId;

/// An element header. Setting the size may grow the size width but never
/// shrinks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    id: ElementId,
    size: u64,
    size_width: u8,
}

/// Result of decoding a header from a byte buffer.
#[derive(Debug, Clone)]
pub struct DecodedHeader {
    pub header: Header,
    /// Encoded length of the header in the stream.
    pub len: usize,
    /// The size field held the reserved all-ones marker. `header.size()` is
    /// zero; the caller decides the actual extent.
    pub unknown_size: bool,
}

impl Header {
    /// Create a header with the minimal size width.
    ///
    /// # Panics
    /// If `size` exceeds [`MAX_DATA_SIZE`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(id: ElementId, size: u64) -> Self {
        let width = vint_min_len(size).expect("size exceeds maximum EBML data size") as u8;
        Self {
            id,
            size,
            size_width: width,
        }
    }

    /// Decode a header from the front of `buf`. `offset` is the absolute
    /// stream position of `buf[0]`, used only in error reports.
    pub fn decode(buf: &[u8], offset: u64) -> Result<DecodedHeader> {
        let (id, id_len) = decode_id(buf, offset)?;
        let (size, size_len) = decode_vint(&buf[id_len..], offset + id_len as u64)?;
        #[allow(clippy::cast_possible_truncation)]
        let header = Self {
            id,
            size: size.unwrap_or(0),
            size_width: size_len as u8,
        };
        Ok(DecodedHeader {
            header,
            len: id_len + size_len,
            unknown_size: size.is_none(),
        })
    }

    /// Encode the header; the result is exactly `header_len()` bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.id.encoded();
        let size = encode_vint(self.size, self.size_width as usize)
            .expect("header size is kept within the encodable range");
        out.extend_from_slice(&size);
        out
    }

    #[must_use]
    pub const fn id(&self) -> ElementId {
        self.id
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn size_width(&self) -> u8 {
        self.size_width
    }

    #[must_use]
    pub const fn id_width(&self) -> u8 {
        self.id.width()
    }

    /// Total encoded header length in bytes.
    #[must_use]
    pub const fn header_len(&self) -> u64 {
        self.id_width() as u64 + self.size_width as u64
    }

    /// Smallest size width able to hold the current size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn min_size_width(&self) -> u8 {
        vint_min_len(self.size).expect("size is kept within the encodable range") as u8
    }

    /// Largest possible header length for this ID.
    #[must_use]
    pub const fn max_header_len(&self) -> u64 {
        self.id_width() as u64 + 8
    }

    /// Set the data size, growing the size width if the current one is too
    /// narrow. The width never shrinks.
    pub fn set_size(&mut self, size: u64) -> Result<()> {
        let Some(min_width) = vint_min_len(size) else {
            return Err(EbmlError::VintTooLarge {
                value: size,
                width: 8,
            });
        };
        self.size = size;
        #[allow(clippy::cast_possible_truncation)]
        if self.size_width < min_width as u8 {
            self.size_width = min_width as u8;
        }
        Ok(())
    }

    /// Set the size width explicitly, to reserve header growth room.
    ///
    /// The width must be between the minimal width for the current size and
    /// 8, inclusive.
    pub fn set_size_width(&mut self, width: u8) -> Result<()> {
        if width < self.min_size_width() || width > 8 {
            return Err(EbmlError::out_of_range(
                "header size width",
                format!("{width} bytes for size {}", self.size),
            ));
        }
        self.size_width = width;
        Ok(())
    }
}

impl std::fmt::Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Header(id={} size={})", self.id, self.size)
    }
}
