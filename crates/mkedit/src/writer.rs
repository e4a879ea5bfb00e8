//! The delta writer.
//!
//! Writing walks the tree in position order and only touches dirty
//! subtrees. A clean element either needs no I/O at all (saving into the
//! same file it was read from) or a verbatim byte copy (saving into a
//! different sink). Because the tree is consistent before any byte is
//! written, the walk proceeds in strictly increasing offsets, so an
//! in-place save never overwrites source bytes it still needs: everything
//! dirty lives in memory, and everything on disk is already where it
//! belongs.

use mkedit_error::{EbmlError, Result};
use mkedit_vfs::ByteSource;
use tracing::trace;

use crate::element::{Element, ElementData};

const COPY_CHUNK: usize = 64 * 1024;

/// Where the bytes go.
pub(crate) enum Sink<'a> {
    /// Writing back into the stream the tree was read from. Clean regions
    /// are skipped without I/O.
    InPlace(&'a mut dyn ByteSource),
    /// Writing into a different sink. Clean regions are copied from the
    /// source verbatim.
    Copy {
        src: &'a mut dyn ByteSource,
        dest: &'a mut dyn ByteSource,
    },
}

impl Sink<'_> {
    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        match self {
            Self::InPlace(file) => file.write_at(bytes, offset),
            Self::Copy { dest, .. } => dest.write_at(bytes, offset),
        }
    }

    /// Carry `len` unchanged bytes at `offset` over to the destination.
    /// Clean elements sit at the same offset in both streams.
    fn passthrough(&mut self, offset: u64, len: u64) -> Result<()> {
        match self {
            Self::InPlace(_) => Ok(()),
            Self::Copy { src, dest } => {
                let mut buf = vec![0u8; COPY_CHUNK];
                let mut done = 0u64;
                while done < len {
                    #[allow(clippy::cast_possible_truncation)]
                    let n = ((len - done).min(COPY_CHUNK as u64)) as usize;
                    src.read_exact_at(&mut buf[..n], offset + done)?;
                    dest.write_at(&buf[..n], offset + done)?;
                    done += n as u64;
                }
                Ok(())
            }
        }
    }
}

/// Write one subtree at its absolute position, emitting only what is
/// dirty, then record the new clean state.
pub(crate) fn write_tree(el: &mut Element, sink: &mut Sink<'_>, abs: u64) -> Result<()> {
    if !el.is_dirty_at(abs) {
        return sink.passthrough(abs, el.total_size());
    }
    if el.unknown_size {
        return Err(EbmlError::inconsistent(format!(
            "{} still carries the unknown-size marker; normalize before saving",
            el.name()
        )));
    }

    let header_bytes = el.header.encode();
    let header_len = el.header_len();
    let size = el.size();
    trace!(name = %el.name, abs, size, "writing");

    match &mut el.data {
        ElementData::Master(m) => {
            if !m.frozen.is_empty() && el.orig_pos != Some(abs) {
                return Err(EbmlError::cannot_rearrange(
                    "a segment with unread media regions cannot move",
                ));
            }
            sink.write(abs, &header_bytes)?;
            let data_abs = abs + header_len;
            let runs = m.frozen.clone();
            let mut next_run = 0;
            for child in &mut m.children {
                while next_run < runs.len() && runs[next_run].0 <= child.pos_relative {
                    let (start, end) = runs[next_run];
                    sink.passthrough(data_abs + start, end - start)?;
                    next_run += 1;
                }
                let child_abs = data_abs + child.pos_relative;
                write_tree(child, sink, child_abs)?;
            }
            for &(start, end) in &runs[next_run..] {
                sink.passthrough(data_abs + start, end - start)?;
            }
        }
        ElementData::Atomic(a) => {
            sink.write(abs, &header_bytes)?;
            let bytes = match &a.snapshot {
                // The value is unchanged; reproduce the original bytes.
                Some(snap) if snap.len() as u64 == size => snap.clone(),
                _ => {
                    let encoded = a.value.encode(size)?;
                    a.snapshot = Some(encoded.clone());
                    encoded
                }
            };
            sink.write(abs + header_len, &bytes)?;
        }
        ElementData::Void => {
            sink.write(abs, &header_bytes)?;
            // The payload content is undefined; poke the last byte so the
            // stream covers the extent without writing the rest.
            if size > 0 {
                sink.write(abs + header_len + size - 1, &[0])?;
            }
        }
        ElementData::Unsupported { snapshot } => {
            let Some(snap) = snapshot else {
                return Err(EbmlError::unsupported(el.name.clone()));
            };
            sink.write(abs, &header_bytes)?;
            sink.write(abs + header_len, snap)?;
        }
    }

    el.mark_clean_at(abs);
    Ok(())
}
