//! The element tree model.
//!
//! An element is a header plus a payload, with the payload interpretation
//! dispatching on the dictionary kind: Master elements hold child elements,
//! atomics hold a typed value, Voids are padding, and elements with unknown
//! IDs are carried opaquely. Every element remembers where it was last read
//! or written (`orig_pos`, `orig_total_size`) so that saving can skip
//! everything that did not change.
//!
//! Positions are parent-relative; absolute positions are computed during
//! walks from the file root. Ownership is the parent link: a child belongs
//! to exactly one master's child list, and attach/detach moves the value.

use mkedit_error::{EbmlError, Result};
use mkedit_schema::{ElementDef, ElementKind, SchemaRegistry};
use mkedit_types::{EbmlValue, ElementId, Header, MAX_DATA_SIZE};
use mkedit_vfs::ByteSource;

use crate::master;
use crate::segment;

/// How much of an element has been pulled in from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Header decoded, payload untouched.
    Unread,
    /// Summary mode skipped some or all of the payload.
    SummaryLoaded,
    /// Payload fully in memory (for masters: all children).
    FullyLoaded,
}

/// Read depth requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Read everything.
    Normal,
    /// Skip deferred masters and the media regions of segments.
    Summary,
}

/// Master payload: the ordered child list, plus the byte runs a summary
/// read skipped. The runs hold Clusters, are expressed relative to this
/// master's payload, and must never move.
#[derive(Debug, Default)]
pub struct MasterData {
    pub(crate) children: Vec<Element>,
    pub(crate) frozen: Vec<(u64, u64)>,
}

/// Atomic payload: the decoded value and, when the element came from a
/// stream, the exact bytes it was decoded from. Multiple encodings are
/// legal for one value, so reproducing unchanged elements bit-exactly
/// requires keeping the original bytes, not just the value. Changing the
/// value discards the snapshot.
#[derive(Debug)]
pub struct AtomicData {
    pub(crate) value: EbmlValue,
    pub(crate) snapshot: Option<Vec<u8>>,
}

/// Kind-specific payload state.
#[derive(Debug)]
pub enum ElementData {
    Master(MasterData),
    Atomic(AtomicData),
    Void,
    /// Unknown ID; payload preserved verbatim, mutation refused.
    Unsupported { snapshot: Option<Vec<u8>> },
}

/// A single node of the element tree.
#[derive(Debug)]
pub struct Element {
    pub(crate) header: Header,
    pub(crate) name: String,
    pub(crate) data: ElementData,
    /// Offset of this element's header from the start of the parent's
    /// payload (or of the file, for top-level elements).
    pub(crate) pos_relative: u64,
    pub(crate) read_state: ReadState,
    /// Absolute stream offset at last read or write.
    pub(crate) orig_pos: Option<u64>,
    pub(crate) orig_total_size: Option<u64>,
    pub(crate) orig_header_len: u64,
    pub(crate) forced_dirty: bool,
    /// The size field was the reserved unknown-size marker on read.
    pub(crate) unknown_size: bool,
    /// Dictionary hint: keep at least this many bytes for the size field.
    pub(crate) header_len_min: u8,
    /// Dictionary hint: keep at least this many payload bytes.
    pub(crate) data_len_min: u64,
    /// Summary reads skip this master's children.
    pub(crate) defer: bool,
}

impl Element {
    /// Build the right variant for a freshly decoded header.
    #[must_use]
    pub fn from_header(header: Header, registry: &SchemaRegistry) -> Self {
        let def = registry.get(header.id());
        let (name, data, header_len_min, data_len_min, defer) = match def {
            Some(def) => {
                let data = match def.kind {
                    ElementKind::Master => ElementData::Master(MasterData::default()),
                    ElementKind::Void => ElementData::Void,
                    _ => {
                        let kind = def.kind.atom().expect("non-master, non-void kind");
                        let value = def
                            .default
                            .clone()
                            .unwrap_or_else(|| EbmlValue::default_for(kind));
                        ElementData::Atomic(AtomicData {
                            value,
                            snapshot: None,
                        })
                    }
                };
                (
                    def.name.clone(),
                    data,
                    def.header_len_min,
                    def.data_len_min,
                    def.defer,
                )
            }
            None => (
                "Unknown".to_owned(),
                ElementData::Unsupported { snapshot: None },
                0,
                0,
                false,
            ),
        };
        let orig_header_len = header.header_len();
        Self {
            header,
            name,
            data,
            pos_relative: 0,
            read_state: ReadState::Unread,
            orig_pos: None,
            orig_total_size: None,
            orig_header_len,
            forced_dirty: false,
            unknown_size: false,
            header_len_min,
            data_len_min,
            defer,
        }
    }

    /// Create an empty element programmatically. Always dirty.
    pub fn new(name: &str, registry: &SchemaRegistry) -> Result<Self> {
        let def = registry
            .by_name(name)
            .ok_or_else(|| EbmlError::unsupported(name))?;
        Ok(Self::from_def(def))
    }

    pub(crate) fn from_def(def: &ElementDef) -> Self {
        let mut header = Header::new(def.id, 0);
        let width = header.min_size_width().max(def.header_len_min).min(8);
        header
            .set_size_width(width)
            .expect("width clamped to the valid range");
        let mut registry = SchemaRegistry::empty();
        registry.insert(def.clone());
        let mut el = Self::from_header(header, &registry);
        // Atomics start sized for their default value.
        let default_len = match &el.data {
            ElementData::Atomic(a) => Some(a.value.encoded_len(def.data_len_min)),
            _ => None,
        };
        if let Some(len) = default_len {
            el.header
                .set_size(len)
                .expect("default value size is encodable");
        }
        el
    }

    /// Create an atomic element with a value. Always dirty.
    pub fn new_with_value(
        name: &str,
        value: EbmlValue,
        registry: &SchemaRegistry,
    ) -> Result<Self> {
        let mut el = Self::new(name, registry)?;
        el.set_value(value, registry)?;
        Ok(el)
    }

    /// Create a Void element of the given total size (header included).
    ///
    /// The smallest possible Void is 2 bytes: a 1-byte ID and a 1-byte zero
    /// size.
    pub fn new_void(total_size: u64) -> Result<Self> {
        if total_size < 2 {
            return Err(EbmlError::cannot_rearrange(format!(
                "cannot create a Void of {total_size} bytes"
            )));
        }
        // Pick the narrowest size field whose payload still fits.
        for width in 1..=8u64 {
            let Some(payload) = total_size.checked_sub(1 + width) else {
                break;
            };
            if payload > MAX_DATA_SIZE {
                continue;
            }
            let min = mkedit_types::vint::vint_min_len(payload)
                .expect("payload within the encodable range") as u64;
            if min <= width {
                let mut header = Header::new(void_id(), payload);
                #[allow(clippy::cast_possible_truncation)]
                header.set_size_width(width as u8)?;
                let mut el = Self {
                    header,
                    name: "Void".to_owned(),
                    data: ElementData::Void,
                    pos_relative: 0,
                    read_state: ReadState::FullyLoaded,
                    orig_pos: None,
                    orig_total_size: None,
                    orig_header_len: 0,
                    forced_dirty: false,
                    unknown_size: false,
                    header_len_min: 0,
                    data_len_min: 0,
                    defer: false,
                };
                el.orig_header_len = el.header.header_len();
                return Ok(el);
            }
        }
        Err(EbmlError::cannot_rearrange(format!(
            "cannot create a Void of {total_size} bytes"
        )))
    }

    // --- Basic accessors ---

    #[must_use]
    pub fn id(&self) -> ElementId {
        self.header.id()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.header.size()
    }

    /// Encoded header length in bytes.
    #[must_use]
    pub fn header_len(&self) -> u64 {
        self.header.header_len()
    }

    /// Header plus payload.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.header_len() + self.size()
    }

    /// Offset from the start of the parent's payload.
    #[must_use]
    pub fn pos_relative(&self) -> u64 {
        self.pos_relative
    }

    /// Offset just past this element, relative to the parent's payload.
    #[must_use]
    pub fn end_relative(&self) -> u64 {
        self.pos_relative + self.total_size()
    }

    #[must_use]
    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    #[must_use]
    pub fn is_master(&self) -> bool {
        matches!(self.data, ElementData::Master(_))
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self.data, ElementData::Void)
    }

    #[must_use]
    pub fn is_atomic(&self) -> bool {
        matches!(self.data, ElementData::Atomic(_))
    }

    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self.data, ElementData::Unsupported { .. })
    }

    /// Child elements; empty for non-masters.
    #[must_use]
    pub fn children(&self) -> &[Element] {
        match &self.data {
            ElementData::Master(m) => &m.children,
            _ => &[],
        }
    }

    pub(crate) fn master_data(&self) -> Option<&MasterData> {
        match &self.data {
            ElementData::Master(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn master_data_mut(&mut self) -> Option<&mut MasterData> {
        match &mut self.data {
            ElementData::Master(m) => Some(m),
            _ => None,
        }
    }

    /// The decoded value, for atomics.
    #[must_use]
    pub fn value(&self) -> Option<&EbmlValue> {
        match &self.data {
            ElementData::Atomic(a) => Some(&a.value),
            _ => None,
        }
    }

    // --- Dirtiness ---

    /// Whether this element would need rewriting, assuming it still sits at
    /// the absolute position it was last read or written at.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match self.orig_pos {
            None => true,
            Some(pos) => self.is_dirty_at(pos),
        }
    }

    /// Dirtiness against a concrete absolute position supplied by a walk
    /// from the root. A subtree that moved is dirty even if its bytes did
    /// not change, because they live somewhere else now.
    #[must_use]
    pub(crate) fn is_dirty_at(&self, abs_pos: u64) -> bool {
        if self.forced_dirty
            || self.orig_pos != Some(abs_pos)
            || self.orig_total_size != Some(self.total_size())
            || self.orig_header_len != self.header_len()
        {
            return true;
        }
        match &self.data {
            ElementData::Atomic(a) => a.snapshot.is_none(),
            ElementData::Master(m) => {
                let data_abs = abs_pos + self.header_len();
                m.children
                    .iter()
                    .any(|c| c.is_dirty_at(data_abs + c.pos_relative))
            }
            ElementData::Void | ElementData::Unsupported { .. } => false,
        }
    }

    /// Record the just-read or just-written position and sizes and clear
    /// the dirty state, recursively.
    pub(crate) fn mark_clean_at(&mut self, abs_pos: u64) {
        self.orig_pos = Some(abs_pos);
        self.orig_total_size = Some(self.total_size());
        self.orig_header_len = self.header_len();
        self.forced_dirty = false;
        let size = self.size();
        let data_abs = abs_pos + self.header_len();
        match &mut self.data {
            ElementData::Atomic(a) => {
                if a.snapshot.is_none() {
                    a.snapshot = a.value.encode(size).ok();
                }
            }
            ElementData::Master(m) => {
                for child in &mut m.children {
                    child.mark_clean_at(data_abs + child.pos_relative);
                }
            }
            ElementData::Void | ElementData::Unsupported { .. } => {}
        }
    }

    /// Force this element and every descendant to be rewritten on save.
    pub fn force_dirty(&mut self) {
        self.forced_dirty = true;
        if let ElementData::Master(m) = &mut self.data {
            for child in &mut m.children {
                child.force_dirty();
            }
        }
    }

    // --- Mutation ---

    /// Set an atomic value.
    ///
    /// The value kind must match, and the dictionary range (if any) is
    /// enforced. A changed value re-encodes at the canonical minimal width
    /// (respecting the dictionary's reserved minimum); setting a value to
    /// its current encoding keeps the element clean.
    pub fn set_value(&mut self, value: EbmlValue, registry: &SchemaRegistry) -> Result<()> {
        if let Some(def) = registry.get(self.header.id()) {
            if let Err(detail) = def.check_range(&value) {
                return Err(mkedit_error::SchemaViolation::BadValue {
                    name: self.name.clone(),
                    detail,
                }
                .into());
            }
        }
        let data_len_min = self.data_len_min;
        let size = self.size();
        match &mut self.data {
            ElementData::Atomic(a) => {
                if a.value.kind() != value.kind() {
                    return Err(EbmlError::out_of_range(
                        self.name.clone(),
                        format!(
                            "expected a {} value, got {}",
                            a.value.kind().name(),
                            value.kind().name()
                        ),
                    ));
                }
                let new_size = value.encoded_len(data_len_min);
                if new_size == size {
                    if a.snapshot.as_deref() != value.encode(size).ok().as_deref() {
                        a.snapshot = None;
                    }
                } else {
                    a.snapshot = None;
                    self.header.set_size(new_size)?;
                }
                a.value = value;
                Ok(())
            }
            ElementData::Unsupported { .. } => Err(EbmlError::unsupported(self.name.clone())),
            _ => Err(EbmlError::out_of_range(
                self.name.clone(),
                "element carries no value".to_owned(),
            )),
        }
    }

    /// Set the payload size. May grow the size field, never shrinks it.
    ///
    /// For atomics the current value must fit the new size; for masters the
    /// caller is responsible for making the children fill the payload
    /// (rearranging, inserting a Void, or re-encoding).
    pub fn resize(&mut self, new_size: u64) -> Result<()> {
        match &self.data {
            ElementData::Unsupported { .. } => {
                if new_size == self.size() {
                    return Ok(());
                }
                return Err(EbmlError::unsupported(self.name.clone()));
            }
            ElementData::Atomic(a) => {
                if !a.value.fits_width(new_size) {
                    return Err(EbmlError::out_of_range(
                        self.name.clone(),
                        format!("value does not fit in {new_size} bytes"),
                    ));
                }
            }
            ElementData::Master(_) | ElementData::Void => {}
        }
        self.header.set_size(new_size)
    }

    /// Inflate the size field to reserve header growth room.
    pub fn set_size_width(&mut self, width: u8) -> Result<()> {
        if self.is_unsupported() {
            return Err(EbmlError::unsupported(self.name.clone()));
        }
        self.header.set_size_width(width)
    }

    /// Grow a master's size field to `width` bytes, pulling the children
    /// back by the difference so their absolute positions are unchanged.
    /// The payload shrinks by the same difference.
    pub fn expand_header(&mut self, width: u8) -> Result<()> {
        let old_len = self.header.header_len();
        let new_len = u64::from(self.header.id_width()) + u64::from(width);
        if new_len <= old_len {
            return Ok(());
        }
        let diff = new_len - old_len;
        let size = self.size();
        let Some(m) = self.master_data_mut() else {
            return Err(EbmlError::cannot_rearrange(
                "only master elements can trade payload for header room",
            ));
        };
        if m.children.iter().any(|c| c.pos_relative < diff)
            || m.frozen.iter().any(|&(start, _)| start < diff)
        {
            return Err(EbmlError::cannot_rearrange(
                "children too close to the header to expand it",
            ));
        }
        for child in &mut m.children {
            child.pos_relative -= diff;
        }
        for run in &mut m.frozen {
            run.0 -= diff;
            run.1 -= diff;
        }
        self.header.set_size_width(width)?;
        self.header.set_size(size - diff)?;
        Ok(())
    }

    // --- Size arithmetic used by rearrangement ---

    /// Smallest payload this element's current content can be encoded in.
    #[must_use]
    pub(crate) fn min_data_size(&self) -> u64 {
        match &self.data {
            ElementData::Atomic(a) => {
                if matches!(a.value, EbmlValue::Float(_)) {
                    // Narrowing a float loses precision.
                    self.size()
                } else {
                    self.size().min(a.value.encoded_len(self.data_len_min))
                }
            }
            ElementData::Master(m) => {
                if self.read_state != ReadState::FullyLoaded || !m.frozen.is_empty() {
                    // Unread content cannot be repacked.
                    return self.size();
                }
                let sum: u64 = m
                    .children
                    .iter()
                    .filter(|c| !c.is_void())
                    .map(Element::min_total_size)
                    .sum();
                let adjusted = if sum + 1 == self.data_len_min {
                    sum + 2
                } else {
                    sum
                };
                adjusted.max(self.data_len_min)
            }
            ElementData::Void => self.size().min(self.data_len_min),
            ElementData::Unsupported { .. } => self.size(),
        }
    }

    /// Smallest header for a payload of `data_size`, honoring the reserved
    /// minimum but never reporting more than the (grown) current header.
    #[must_use]
    pub(crate) fn min_header_len(&self, data_size: u64) -> u64 {
        let id_width = u64::from(self.header.id_width());
        let minimal = mkedit_types::vint::vint_min_len(data_size)
            .map_or(8, |w| w as u64);
        let current = u64::from(self.header.size_width()).max(minimal);
        let strict = minimal.max(u64::from(self.header_len_min));
        id_width + current.min(strict)
    }

    /// Smallest total size this element can be encoded in.
    #[must_use]
    pub(crate) fn min_total_size(&self) -> u64 {
        let data = self.min_data_size();
        self.min_header_len(data) + data
    }

    /// Largest payload size <= `goal` this element can be resized to
    /// without touching the header.
    #[must_use]
    pub(crate) fn valid_data_size_le(&self, goal: u64) -> Option<u64> {
        let min = self.min_data_size();
        if goal < min {
            return None;
        }
        match &self.data {
            ElementData::Atomic(a) => match &a.value {
                // Floats keep their width, binary payloads their length.
                EbmlValue::Float(_) | EbmlValue::Binary(_) => Some(min),
                EbmlValue::Date(_) => {
                    if goal >= 8 {
                        Some(8)
                    } else {
                        Some(min).filter(|&m| m == 0)
                    }
                }
                EbmlValue::Unsigned(_) | EbmlValue::Signed(_) => Some(goal.min(8)),
                // Strings pad with trailing NULs to any length.
                EbmlValue::Ascii(_) | EbmlValue::Utf8(_) => Some(goal),
            },
            ElementData::Master(_) => {
                if min == goal || min + 2 <= goal {
                    // Slack of two bytes or more can hold a Void.
                    Some(goal)
                } else {
                    // A one-byte gap cannot hold a Void.
                    Some(min)
                }
            }
            ElementData::Void => Some(goal),
            ElementData::Unsupported { .. } => Some(self.size()),
        }
    }

    /// Best `(header_len, data_size)` split with total <= `goal`, largest
    /// total first. Prefers resizing the payload over the header, and the
    /// smallest header when the header must change.
    #[must_use]
    pub(crate) fn best_total_size_le(&self, goal: u64) -> Option<(u64, u64)> {
        let min_data = self.min_data_size();
        let min_header = self.min_header_len(min_data);
        if min_header + min_data > goal {
            return None;
        }
        let header_len = self.header_len();
        if header_len + min_data >= goal {
            // The header itself must shrink (or exactly fits).
            return Some((goal - min_data, min_data));
        }

        // Try keeping the header untouched.
        let goal_data = goal - header_len;
        if goal_data <= MAX_DATA_SIZE && self.min_header_len(goal_data) <= header_len {
            if let Some(data) = self.valid_data_size_le(goal_data) {
                if data == goal_data {
                    return Some((header_len, data));
                }
            }
        }

        // The header has to change; try candidate lengths smallest first.
        let max_header = self.header.max_header_len();
        let mut best: Option<(u64, u64)> = None;
        for hl in min_header..=max_header.min(goal) {
            let goal_data = goal - hl;
            if goal_data > MAX_DATA_SIZE || self.min_header_len(goal_data) > hl {
                continue;
            }
            let Some(data) = self.valid_data_size_le(goal_data) else {
                continue;
            };
            if data == goal_data {
                return Some((hl, data));
            }
            if best.map_or(true, |(bh, bd)| bh + bd < hl + data) {
                best = Some((hl, data));
            }
        }
        best
    }

    /// Resize to an exact total size, splitting between header and payload.
    pub fn resize_total(&mut self, new_total: u64) -> Result<()> {
        let Some((header_len, data)) = self.best_total_size_le(new_total) else {
            return Err(EbmlError::out_of_range(
                self.name.clone(),
                format!("cannot resize to {new_total} total bytes"),
            ));
        };
        if header_len + data != new_total {
            return Err(EbmlError::out_of_range(
                self.name.clone(),
                format!("{new_total} is not a valid total size"),
            ));
        }
        self.resize(data)?;
        #[allow(clippy::cast_possible_truncation)]
        let width = (header_len - u64::from(self.header.id_width())) as u8;
        self.header.set_size_width(width)
    }

    // --- Reading ---

    /// Read this element's payload. `abs_pos` is the absolute position of
    /// the element's header in the stream.
    pub(crate) fn read_payload(
        &mut self,
        src: &mut dyn ByteSource,
        abs_pos: u64,
        mode: ReadMode,
        registry: &SchemaRegistry,
    ) -> Result<()> {
        let size = self.size();
        let data_abs = abs_pos + self.header_len();

        if self.is_master() {
            if mode == ReadMode::Summary && self.defer {
                self.read_state = ReadState::SummaryLoaded;
                return Ok(());
            }
            if mode == ReadMode::Summary && self.id() == mkedit_schema::ids::SEGMENT {
                return segment::read_summary(self, src, abs_pos, registry);
            }
            let name = self.name.clone();
            let m = self.master_data_mut().expect("master variant");
            let mut cur = 0;
            while cur < size {
                cur = read_child_into(&mut m.children, src, data_abs, cur, size, mode, registry)?;
            }
            // A full read leaves no skipped media runs behind.
            m.frozen.clear();
            if cur > size {
                return Err(EbmlError::inconsistent(format!(
                    "child of {name} overruns its parent by {} bytes",
                    cur - size
                )));
            }
            self.read_state = ReadState::FullyLoaded;
            return Ok(());
        }

        let name = self.name.clone();
        match &mut self.data {
            ElementData::Atomic(a) => {
                let len = usize::try_from(size).map_err(|_| {
                    EbmlError::out_of_range(name.clone(), format!("{size}-byte payload"))
                })?;
                let mut buf = vec![0u8; len];
                src.read_exact_at(&mut buf, data_abs)?;
                a.value = EbmlValue::decode(a.value.kind(), &buf)?;
                a.snapshot = Some(buf);
            }
            ElementData::Void => {}
            ElementData::Unsupported { snapshot } => {
                let len = usize::try_from(size).map_err(|_| {
                    EbmlError::out_of_range(name.clone(), format!("{size}-byte payload"))
                })?;
                let mut buf = vec![0u8; len];
                src.read_exact_at(&mut buf, data_abs)?;
                *snapshot = Some(buf);
            }
            ElementData::Master(_) => unreachable!("handled above"),
        }
        self.read_state = ReadState::FullyLoaded;
        Ok(())
    }
}

fn void_id() -> ElementId {
    mkedit_schema::VOID_ID
}

/// Read (or re-read) the child starting at `rel` within a payload region
/// that begins at absolute offset `base_abs` and is `region_len` bytes
/// long. Returns the relative end of the child.
///
/// If a child is already present at `rel` and loaded deeply enough for
/// `mode`, it is left alone. A freshly read child is marked clean.
pub(crate) fn read_child_into(
    children: &mut Vec<Element>,
    src: &mut dyn ByteSource,
    base_abs: u64,
    rel: u64,
    region_len: u64,
    mode: ReadMode,
    registry: &SchemaRegistry,
) -> Result<u64> {
    let abs = base_abs + rel;
    if let Some(idx) = master::find_at(children, rel) {
        let loaded = match children[idx].read_state {
            ReadState::FullyLoaded => true,
            ReadState::SummaryLoaded => mode == ReadMode::Summary,
            ReadState::Unread => false,
        };
        if !loaded {
            children[idx].read_payload(src, abs, mode, registry)?;
            children[idx].mark_clean_at(abs);
        }
        return Ok(children[idx].end_relative());
    }

    let buf = src.read_prefix_at(12, abs)?;
    let decoded = Header::decode(&buf, abs)?;
    let mut el = Element::from_header(decoded.header, registry);
    el.pos_relative = rel;
    if decoded.unknown_size {
        if !el.is_master() {
            return Err(EbmlError::malformed_vint(format!(
                "unknown size on non-master element {}",
                el.name
            )));
        }
        // The element runs to the end of the enclosing region.
        let extent = region_len
            .checked_sub(rel + decoded.len as u64)
            .ok_or_else(|| EbmlError::inconsistent("unknown-size element past region end"))?;
        el.header.set_size(extent)?;
        el.unknown_size = true;
    }
    el.read_payload(src, abs, mode, registry)?;
    el.mark_clean_at(abs);
    let end = el.end_relative();
    master::insert_sorted(children, el);
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkedit_schema::ids;
    use mkedit_vfs::MemorySource;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::matroska()
    }

    #[test]
    fn new_atomic_starts_dirty_with_default() {
        let reg = registry();
        let el = Element::new("TimecodeScale", &reg).unwrap();
        assert!(el.is_dirty());
        assert_eq!(el.value(), Some(&EbmlValue::Unsigned(1_000_000)));
        assert_eq!(el.read_state(), ReadState::Unread);
    }

    #[test]
    fn new_with_value_sizes_canonically() {
        let reg = registry();
        let el = Element::new_with_value("Title", EbmlValue::Utf8("ab".into()), &reg).unwrap();
        assert_eq!(el.size(), 2);
        assert_eq!(el.total_size(), 2 + 1 + 2);
    }

    #[test]
    fn seek_position_reserves_eight_bytes() {
        let reg = registry();
        let el =
            Element::new_with_value("SeekPosition", EbmlValue::Unsigned(5), &reg).unwrap();
        assert_eq!(el.size(), 8, "dictionary reserves an 8-byte payload");
    }

    #[test]
    fn void_of_size_arithmetic() {
        for total in [2u64, 3, 10, 127, 128, 129, 1000] {
            let void = Element::new_void(total).unwrap();
            assert_eq!(void.total_size(), total, "total {total}");
        }
        assert!(Element::new_void(0).is_err());
        assert!(Element::new_void(1).is_err());
    }

    #[test]
    fn set_value_shrinks_to_canonical() {
        let reg = registry();
        let mut el =
            Element::new_with_value("Title", EbmlValue::Utf8("YY".into()), &reg).unwrap();
        assert_eq!(el.size(), 2);
        el.set_value(EbmlValue::Utf8("X".into()), &reg).unwrap();
        assert_eq!(el.size(), 1, "changed value re-encodes minimally");
    }

    #[test]
    fn set_value_enforces_kind_and_range() {
        let reg = registry();
        let mut el = Element::new("TrackType", &reg).unwrap();
        assert!(el
            .set_value(EbmlValue::Utf8("video".into()), &reg)
            .is_err());
        let err = el.set_value(EbmlValue::Unsigned(0), &reg).unwrap_err();
        assert!(matches!(err, EbmlError::Schema(_)));
        el.set_value(EbmlValue::Unsigned(2), &reg).unwrap();
        assert_eq!(el.value(), Some(&EbmlValue::Unsigned(2)));
    }

    #[test]
    fn read_atomic_snapshots_raw_bytes() {
        let reg = registry();
        // Title "YY" padded with a trailing NUL: decodes to "YY" but the
        // snapshot keeps all three bytes.
        let mut src = MemorySource::from(vec![0x7B, 0xA9, 0x83, b'Y', b'Y', 0x00]);
        let decoded = Header::decode(&[0x7B, 0xA9, 0x83], 0).unwrap();
        let mut el = Element::from_header(decoded.header, &reg);
        el.read_payload(&mut src, 0, ReadMode::Normal, &reg).unwrap();
        el.mark_clean_at(0);

        assert_eq!(el.value().unwrap().as_str(), Some("YY"));
        assert!(!el.is_dirty());

        // Setting the identical decoded value does not dirty the element,
        // because the stored bytes still encode it.
        el.set_value(EbmlValue::Utf8("YY".into()), &reg).unwrap();
        assert!(el.is_dirty(), "padded original differs from re-encoding");
    }

    #[test]
    fn set_same_value_keeps_clean_when_encoding_matches() {
        let reg = registry();
        let mut src = MemorySource::from(vec![0x7B, 0xA9, 0x82, b'Y', b'Y']);
        let decoded = Header::decode(&[0x7B, 0xA9, 0x82], 0).unwrap();
        let mut el = Element::from_header(decoded.header, &reg);
        el.read_payload(&mut src, 0, ReadMode::Normal, &reg).unwrap();
        el.mark_clean_at(0);

        el.set_value(EbmlValue::Utf8("YY".into()), &reg).unwrap();
        assert!(!el.is_dirty());

        el.set_value(EbmlValue::Utf8("X".into()), &reg).unwrap();
        assert!(el.is_dirty());
    }

    #[test]
    fn dirty_tracks_moves_and_resizes() {
        let reg = registry();
        let mut src = MemorySource::from(vec![0xEC, 0x82, 0, 0]);
        let decoded = Header::decode(&[0xEC, 0x82], 0).unwrap();
        let mut el = Element::from_header(decoded.header, &reg);
        el.read_payload(&mut src, 0, ReadMode::Normal, &reg).unwrap();
        el.mark_clean_at(0);
        assert!(!el.is_dirty());
        assert!(el.is_dirty_at(5), "a moved element is dirty");

        el.resize(6).unwrap();
        assert!(el.is_dirty());
        el.mark_clean_at(0);
        assert!(!el.is_dirty());
    }

    #[test]
    fn unsupported_refuses_mutation() {
        let reg = registry();
        // 0x81 is not in the table.
        let decoded = Header::decode(&[0x81, 0x82], 0).unwrap();
        let mut src = MemorySource::from(vec![0x81, 0x82, 1, 2]);
        let mut el = Element::from_header(decoded.header, &reg);
        assert!(el.is_unsupported());
        el.read_payload(&mut src, 0, ReadMode::Normal, &reg).unwrap();
        el.mark_clean_at(0);

        assert!(matches!(
            el.resize(5).unwrap_err(),
            EbmlError::Unsupported { .. }
        ));
        assert!(matches!(
            el.set_value(EbmlValue::Unsigned(1), &reg).unwrap_err(),
            EbmlError::Unsupported { .. }
        ));
        assert!(el.resize(2).is_ok(), "a no-op resize is fine");
    }

    #[test]
    fn expand_header_trades_payload_for_header_room() {
        let reg = registry();
        let mut info = Element::new("Info", &reg).unwrap();
        info.resize(10).unwrap();
        let total = info.total_size();

        info.expand_header(4).unwrap();
        assert_eq!(info.header_len(), 4 + 4);
        assert_eq!(info.size(), 7);
        assert_eq!(info.total_size(), total, "total size is unchanged");

        // A child sitting right behind the header blocks the expansion,
        // because its absolute position could not be preserved.
        let mut info = Element::new("Info", &reg).unwrap();
        let title =
            Element::new_with_value("Title", EbmlValue::Utf8("t".into()), &reg).unwrap();
        info.add_child(title);
        info.fit_to_children().unwrap();
        assert!(info.expand_header(8).is_err());
    }

    #[test]
    fn min_total_size_for_atomics() {
        let reg = registry();
        let el = Element::new_with_value(
            "MuxingApp",
            EbmlValue::Utf8("encoder".into()),
            &reg,
        )
        .unwrap();
        // 2-byte ID, 1-byte size, 7 payload bytes.
        assert_eq!(el.min_total_size(), 10);

        let date = Element::new_with_value("DateUTC", EbmlValue::Date(99), &reg).unwrap();
        assert_eq!(date.min_total_size(), 2 + 1 + 8);
    }

    #[test]
    fn resize_total_prefers_payload() {
        let reg = registry();
        let mut el =
            Element::new_with_value("Title", EbmlValue::Utf8("ab".into()), &reg).unwrap();
        // 2 (id) + 1 (size) + 2 (payload) = 5 now; pad the payload to 7.
        el.resize_total(10).unwrap();
        assert_eq!(el.total_size(), 10);
        assert_eq!(el.header_len(), 3, "header untouched");
        assert_eq!(el.size(), 7);
    }

    #[test]
    fn read_child_skips_already_loaded() {
        let reg = registry();
        let bytes = vec![0xEC, 0x81, 0x00, 0xEC, 0x80];
        let mut src = MemorySource::from(bytes);
        let mut children = Vec::new();
        let end =
            read_child_into(&mut children, &mut src, 0, 0, 5, ReadMode::Normal, &reg).unwrap();
        assert_eq!(end, 3);
        let end =
            read_child_into(&mut children, &mut src, 0, 3, 5, ReadMode::Normal, &reg).unwrap();
        assert_eq!(end, 5);
        assert_eq!(children.len(), 2);

        // Reading the same offset again returns the existing child.
        let end =
            read_child_into(&mut children, &mut src, 0, 0, 5, ReadMode::Normal, &reg).unwrap();
        assert_eq!(end, 3);
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn unknown_size_master_extends_to_region_end() {
        let reg = registry();
        // A Segment with the unknown-size marker followed by a Void child.
        let bytes = vec![0x18, 0x53, 0x80, 0x67, 0xFF, 0xEC, 0x81, 0x00];
        let mut src = MemorySource::from(bytes.clone());
        let mut children = Vec::new();
        let end = read_child_into(
            &mut children,
            &mut src,
            0,
            0,
            bytes.len() as u64,
            ReadMode::Normal,
            &reg,
        )
        .unwrap();
        assert_eq!(end, bytes.len() as u64);
        assert_eq!(children[0].id(), ids::SEGMENT);
        assert_eq!(children[0].size(), 3);
        assert!(children[0].unknown_size);
        assert_eq!(children[0].children().len(), 1);
    }
}
