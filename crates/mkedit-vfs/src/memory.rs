//! In-memory byte source.

use crate::traits::ByteSource;
use mkedit_error::Result;

/// A growable in-memory byte source, for tests and building files from
/// scratch.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the current contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the contents out, leaving the source empty.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    #[allow(clippy::cast_possible_truncation)]
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        let end = offset as usize + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_len(&mut self, len: u64) -> Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }
}
