//! Primary error type for mkedit operations.
//!
//! Structured variants for the common failure cases, convenience
//! constructors for the ones that carry free-form detail, and a couple of
//! classification helpers so callers can decide whether retrying with
//! different layout options makes sense.

use thiserror::Error;

/// A constraint from the element dictionary that the tree violates.
///
/// These are found by consistency checking, not at mutation time, so a tree
/// can pass through arbitrarily broken intermediate states while it is being
/// edited.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    /// A child element appears under a parent the dictionary forbids.
    #[error("element {child} is not allowed inside {parent}")]
    DisallowedParent { child: String, parent: String },

    /// A mandatory child element is absent.
    #[error("mandatory child {name} missing from {parent}")]
    MissingRequired { name: String, parent: String },

    /// An element that must appear at most once appears more than once.
    #[error("multiple instances of unique element {name} in {parent}")]
    DuplicateUnique { name: String, parent: String },

    /// An atomic value lies outside the range the dictionary declares.
    #[error("bad value in {name}: {detail}")]
    BadValue { name: String, detail: String },
}

/// Primary error type for mkedit operations.
#[derive(Error, Debug)]
pub enum EbmlError {
    // === Decode errors ===
    /// A variable-length integer could not be decoded.
    #[error("malformed variable-length integer: {detail}")]
    MalformedVint { detail: String },

    /// The stream ended in the middle of an element.
    #[error("unexpected end of stream at offset {offset}")]
    UnexpectedEof { offset: u64 },

    /// A UTF-8 string element held invalid byte sequences.
    #[error("invalid UTF-8: {detail}")]
    InvalidUtf8 { detail: String },

    /// A value cannot be represented in its declared encoding.
    #[error("{what} out of range: {value}")]
    ValueOutOfRange { what: String, value: String },

    /// An integer does not fit in the requested number of VINT bytes.
    #[error("integer {value} does not fit in a {width}-byte VINT")]
    VintTooLarge { value: u64, width: u8 },

    // === Consistency errors ===
    /// The tree violates a dictionary constraint.
    #[error("schema violation: {0}")]
    Schema(#[from] SchemaViolation),

    /// Children are not byte-consistent; rearrange before writing.
    #[error("inconsistent layout: {detail}")]
    Inconsistent { detail: String },

    // === Layout errors ===
    /// A fixed-size container cannot hold its children.
    #[error("insufficient space in {name}: need {needed} bytes, have {available}")]
    InsufficientSpace {
        name: String,
        needed: u64,
        available: u64,
    },

    /// Both the head and the tail region of a segment are exhausted.
    #[error("segment is full")]
    SegmentFull,

    /// A relocation would cross a region the caller asked to preserve.
    #[error("cannot rearrange: {detail}")]
    CannotRearrange { detail: String },

    // === Misc ===
    /// An element with an unknown ID was resized or modified.
    #[error("unsupported element {name} cannot be modified")]
    Unsupported { name: String },

    /// A long-running operation observed its cancellation flag.
    #[error("operation cancelled")]
    Cancelled,

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EbmlError {
    /// Create a VINT decode error.
    pub fn malformed_vint(detail: impl Into<String>) -> Self {
        Self::MalformedVint {
            detail: detail.into(),
        }
    }

    /// Create an inconsistent-layout error.
    pub fn inconsistent(detail: impl Into<String>) -> Self {
        Self::Inconsistent {
            detail: detail.into(),
        }
    }

    /// Create a cannot-rearrange error.
    pub fn cannot_rearrange(detail: impl Into<String>) -> Self {
        Self::CannotRearrange {
            detail: detail.into(),
        }
    }

    /// Create an out-of-range error.
    pub fn out_of_range(what: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ValueOutOfRange {
            what: what.into(),
            value: value.into(),
        }
    }

    /// Create an unsupported-element error.
    pub fn unsupported(name: impl Into<String>) -> Self {
        Self::Unsupported { name: name.into() }
    }

    /// Whether this error came from decoding bytes (as opposed to layout or
    /// policy). Decode errors indicate a damaged or unusual input file.
    pub const fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::MalformedVint { .. }
                | Self::UnexpectedEof { .. }
                | Self::InvalidUtf8 { .. }
                | Self::ValueOutOfRange { .. }
                | Self::VintTooLarge { .. }
        )
    }

    /// Whether this is a layout error that may succeed after retrying with
    /// different rearrangement options (shrinking allowed, packing, etc.).
    pub const fn is_layout(&self) -> bool {
        matches!(
            self,
            Self::Inconsistent { .. }
                | Self::InsufficientSpace { .. }
                | Self::SegmentFull
                | Self::CannotRearrange { .. }
        )
    }
}

/// Result type alias using `EbmlError`.
pub type Result<T> = std::result::Result<T, EbmlError>;
