//! The file root: a byte source plus top-level elements.
//!
//! Not itself an element (it has no header), the file shares the child
//! management of masters. Opening a file runs a summary read by default,
//! which loads every top-level element while skipping cluster payloads, so
//! multi-gigabyte files open in milliseconds.

use std::path::Path;
use std::time::Instant;

use mkedit_error::{EbmlError, Result};
use mkedit_schema::SchemaRegistry;
use mkedit_types::CancelToken;
use mkedit_vfs::{ByteSource, FileSource};
use tracing::info;

use crate::display;
use crate::element::{read_child_into, Element, ReadMode};
use crate::master::{check_schema, check_tiling, end_last_child};
use crate::segment::NormalizeOptions;
use crate::writer::{write_tree, Sink};

/// An EBML file: a seekable byte source and its top-level elements.
pub struct EbmlFile {
    source: Box<dyn ByteSource>,
    registry: SchemaRegistry,
    children: Vec<Element>,
    stream_len: u64,
    cancel: CancelToken,
}

impl EbmlFile {
    /// Open a file read-write with the built-in Matroska dictionary and
    /// run a summary read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_source(Box::new(FileSource::open(path)?), SchemaRegistry::matroska())
    }

    /// Open a file read-only. Saving in place will fail; saving to another
    /// sink works.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_source(
            Box::new(FileSource::open_read_only(path)?),
            SchemaRegistry::matroska(),
        )
    }

    /// Wrap an arbitrary byte source and run a summary read.
    pub fn from_source(source: Box<dyn ByteSource>, registry: SchemaRegistry) -> Result<Self> {
        let mut file = Self::new_unread(source, registry)?;
        file.read_summary()?;
        Ok(file)
    }

    /// Wrap a byte source without reading anything, e.g. to build a file
    /// from scratch.
    pub fn new_unread(mut source: Box<dyn ByteSource>, registry: SchemaRegistry) -> Result<Self> {
        let stream_len = source.len()?;
        Ok(Self {
            source,
            registry,
            children: Vec::new(),
            stream_len,
            cancel: CancelToken::new(),
        })
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// A handle that cancels this file's long operations when triggered.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Length of the backing stream in bytes.
    #[must_use]
    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    #[must_use]
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Element] {
        &mut self.children
    }

    /// First top-level element with the given name.
    #[must_use]
    pub fn child_named(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name() == name)
    }

    pub fn child_named_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name() == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name() == name)
    }

    /// The segments of this file, in order.
    pub fn segments(&self) -> impl Iterator<Item = &Element> {
        self.children_named("Segment")
    }

    /// The first segment, mutable.
    pub fn segment_mut(&mut self) -> Option<&mut Element> {
        self.child_named_mut("Segment")
    }

    /// Append a top-level element after the current last one.
    pub fn add_child(&mut self, mut el: Element) {
        el.pos_relative = end_last_child(&self.children);
        crate::master::insert_sorted(&mut self.children, el);
    }

    /// Detach and return the top-level element at `index`.
    pub fn remove_child(&mut self, index: usize) -> Element {
        self.children.remove(index)
    }

    /// Load every top-level element in summary mode: deferred masters are
    /// skipped and segments hop over their cluster regions.
    pub fn read_summary(&mut self) -> Result<()> {
        self.read(ReadMode::Summary)
    }

    /// Load everything, cluster contents included.
    pub fn read_all(&mut self) -> Result<()> {
        self.read(ReadMode::Normal)
    }

    fn read(&mut self, mode: ReadMode) -> Result<()> {
        let started = Instant::now();
        let Self {
            source,
            registry,
            children,
            stream_len,
            cancel,
        } = self;
        let mut cur = 0u64;
        while cur < *stream_len {
            cancel.checkpoint()?;
            cur = read_child_into(children, source.as_mut(), 0, cur, *stream_len, mode, registry)?;
        }
        info!(
            elements = children.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "read file"
        );
        Ok(())
    }

    /// Whether any element differs from its on-disk representation.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.is_dirty_at(c.pos_relative()))
    }

    /// Full consistency check: positional invariants, dictionary
    /// conformance, and that we know how to write this EBML version.
    pub fn check_consistency(&self) -> Result<()> {
        check_tiling(&self.children, &[], None, "file")?;
        check_schema(&self.children, None, "file", &self.registry)?;
        for child in &self.children {
            child.check_consistency(&self.registry)?;
        }
        if let Some(ebml) = self.child_named("EBML") {
            if !ebml.ebml_write_supported(&self.registry) {
                return Err(EbmlError::inconsistent(
                    "EBML header declares a version this library cannot write",
                ));
            }
        }
        Ok(())
    }

    /// One-screen description of the file and its segments.
    #[must_use]
    pub fn summary(&self) -> String {
        display::file_summary(self)
    }

    /// Tree listing down to `depth` levels (`None` for all).
    #[must_use]
    pub fn print_children(&self, depth: Option<usize>) -> String {
        let mut out = format!(
            "File: {} bytes, {} top-level elements\n",
            self.stream_len,
            self.children.len()
        );
        out.push_str(&display::print_children(&self.children, depth, 4));
        out
    }

    /// Byte-layout table of the tree, annotating gaps, overlaps, and
    /// containers whose children do not fill them.
    #[must_use]
    pub fn print_space(&self) -> String {
        display::print_space(&self.children, &[], None, None, 0, 0)
    }

    /// Write the tree to a different sink. Unchanged regions are copied
    /// verbatim from the source; the source itself is not modified.
    pub fn save_changes(&mut self, dest: &mut dyn ByteSource) -> Result<()> {
        self.save(Some(dest))
    }

    /// Write only the dirty regions back into the backing stream.
    pub fn save_in_place(&mut self) -> Result<()> {
        self.save(None)
    }

    fn save(&mut self, dest: Option<&mut dyn ByteSource>) -> Result<()> {
        // Segments whose layout was broken by edits get normalized first;
        // a segment may only grow up to where its successor begins.
        self.normalize_dirty_segments()?;
        // Nothing is written unless the whole tree checks out.
        self.check_consistency()?;

        let in_place = dest.is_none();
        let end;
        {
            let Self {
                source,
                children,
                cancel,
                ..
            } = self;
            let mut sink = match dest {
                Some(d) => Sink::Copy {
                    src: source.as_mut(),
                    dest: d,
                },
                None => Sink::InPlace(source.as_mut()),
            };
            for child in children.iter_mut() {
                cancel.checkpoint()?;
                let pos = child.pos_relative();
                write_tree(child, &mut sink, pos)?;
            }

            end = end_last_child(children);
            let file = match sink {
                Sink::Copy { dest, .. } => dest,
                Sink::InPlace(file) => file,
            };
            file.set_len(end)?;
            file.sync()?;
        }
        if in_place {
            self.stream_len = end;
        }
        info!(bytes = end, "saved");
        Ok(())
    }

    fn normalize_dirty_segments(&mut self) -> Result<()> {
        let mut pending: Vec<(usize, Option<u64>)> = Vec::new();
        for (idx, child) in self.children.iter().enumerate() {
            if child.name() != "Segment" {
                continue;
            }
            // Broken layouts always need the pass; so does an edited
            // segment that still carries the unknown-size marker, because
            // the writer needs an explicit size field.
            let dirty_unknown = child.unknown_size && child.is_dirty_at(child.pos_relative());
            if child.check_consecutive().is_err() || dirty_unknown {
                let limit = self
                    .children
                    .get(idx + 1)
                    .map(|next| next.pos_relative() - child.pos_relative());
                pending.push((idx, limit));
            }
        }
        let Self {
            children, registry, ..
        } = self;
        for (idx, grow_limit) in pending {
            let opts = NormalizeOptions {
                grow_limit,
                ..NormalizeOptions::default()
            };
            children[idx].normalize(registry, &opts)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EbmlFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EbmlFile")
            .field("stream_len", &self.stream_len)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}
