//! Seekable byte sources.
//!
//! The reader and the delta writer both work against [`ByteSource`], an
//! offset-addressed view of a file. Two implementations ship here: real
//! files ([`FileSource`]) and in-memory buffers ([`MemorySource`], used by
//! the tests and handy for building files from scratch).

mod file;
mod memory;
mod traits;

pub use file::FileSource;
pub use memory::MemorySource;
pub use traits::ByteSource;
