//! In-place editing of Matroska (EBML) files.
//!
//! An EBML file is a sequence of elements, each a header (ID and payload
//! size) followed by that many payload bytes. Master elements nest further
//! elements; atomic elements carry integers, floats, strings, dates, or
//! opaque binary. This crate reads such files into an editable tree,
//! tracks exactly which parts of the tree differ from the bytes on disk,
//! and writes back only those parts.
//!
//! That matters because of Clusters: the media payload of a Matroska file
//! typically accounts for over 99% of its bytes. Opening a file runs a
//! *summary read* that loads all metadata while skipping the cluster
//! region entirely, edits touch only metadata elements, and saving leaves
//! the cluster bytes exactly where they were. Layout changes are absorbed
//! by Void padding elements that get created, resized, and deleted as
//! needed.
//!
//! ```no_run
//! use mkedit::{EbmlFile, RearrangeOptions};
//!
//! # fn main() -> mkedit::Result<()> {
//! let mut file = EbmlFile::open("movie.mkv")?;
//! println!("{}", file.summary());
//!
//! let registry = file.registry().clone();
//! if let Some(segment) = file.segment_mut() {
//!     segment.set_title("A better title", &registry)?;
//!     if let Some(info) = segment.child_named_mut("Info") {
//!         info.rearrange(&RearrangeOptions::default(), &registry)?;
//!     }
//! }
//! // Only the dirty metadata bytes are rewritten; the media region is
//! // untouched.
//! file.save_in_place()?;
//! # Ok(())
//! # }
//! ```
//!
//! The element dictionary (names, kinds, defaults, cardinality) comes from
//! [`mkedit_schema`]; IDs absent from it are carried through verbatim as
//! unsupported elements.

mod accessors;
mod display;
mod element;
mod file;
mod master;
mod segment;
mod writer;

pub use element::{AtomicData, Element, ElementData, MasterData, ReadMode, ReadState};
pub use file::EbmlFile;
pub use master::{RearrangeOptions, Strategy};
pub use segment::NormalizeOptions;

pub use mkedit_error::{EbmlError, Result, SchemaViolation};
pub use mkedit_schema::{ElementDef, ElementKind, ParentRule, SchemaRegistry};
pub use mkedit_types::{AtomKind, CancelToken, EbmlValue, ElementId, Header};
pub use mkedit_vfs::{ByteSource, FileSource, MemorySource};
