//! Child management, consistency checking, and rearrangement.
//!
//! A master's payload must be tiled exactly by its children: the first
//! child at relative offset zero, each next child starting where the
//! previous one ends, and the last child ending at the payload size.
//! Editing breaks this freely; [`Element::rearrange`] repairs it by moving
//! children and creating, growing, and deleting Void padding.

use mkedit_error::{EbmlError, Result, SchemaViolation};
use mkedit_schema::SchemaRegistry;
use mkedit_types::ElementId;
use tracing::debug;

use crate::element::{Element, ElementData, ReadState};

/// What rearrangement is allowed to do.
#[derive(Debug, Clone)]
pub struct RearrangeOptions {
    /// Shrink atomic children whose values re-encode in fewer bytes.
    pub allow_shrink: bool,
    /// Relocate children. When false, any required move fails with
    /// `CannotRearrange`.
    pub allow_move: bool,
    /// Smallest Void worth inserting. Can never go below 2: a Void is at
    /// least a 1-byte ID plus a 1-byte size.
    pub min_void: u64,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Eliminate padding wherever possible.
    Pack,
    /// Keep children where they are and pad the gaps.
    Preserve,
}

impl Default for RearrangeOptions {
    fn default() -> Self {
        Self {
            allow_shrink: false,
            allow_move: true,
            min_void: 2,
            strategy: Strategy::Preserve,
        }
    }
}

impl RearrangeOptions {
    /// Packing layout that also shrinks oversized atomics.
    #[must_use]
    pub fn packed() -> Self {
        Self {
            allow_shrink: true,
            strategy: Strategy::Pack,
            ..Self::default()
        }
    }
}

// --- Child list helpers, shared by masters and the file root ---

/// Insert keeping the list sorted by relative position (stable: after any
/// children already at the same position).
pub(crate) fn insert_sorted(children: &mut Vec<Element>, el: Element) -> usize {
    let idx = children.partition_point(|c| c.pos_relative <= el.pos_relative);
    children.insert(idx, el);
    idx
}

/// Index of the child whose header starts exactly at `pos`.
pub(crate) fn find_at(children: &[Element], pos: u64) -> Option<usize> {
    let idx = children.partition_point(|c| c.pos_relative < pos);
    (idx < children.len() && children[idx].pos_relative == pos).then_some(idx)
}

/// Relative end of the last child, or zero without children.
pub(crate) fn end_last_child(children: &[Element]) -> u64 {
    children.iter().map(Element::end_relative).max().unwrap_or(0)
}

/// Check that children (plus any unread frozen runs) tile the payload:
/// start at zero, no gaps, no overlaps, and, when `expected_size` is given,
/// end exactly there.
pub(crate) fn check_tiling(
    children: &[Element],
    frozen: &[(u64, u64)],
    expected_size: Option<u64>,
    owner: &str,
) -> Result<()> {
    let mut extents: Vec<(u64, u64, &str)> = children
        .iter()
        .map(|c| (c.pos_relative, c.end_relative(), c.name()))
        .collect();
    extents.extend(frozen.iter().map(|&(s, e)| (s, e, "<unread media>")));
    extents.sort_unstable_by_key(|&(s, e, _)| (s, e));

    let mut cur = 0u64;
    for (start, end, name) in extents {
        if start > cur {
            return Err(EbmlError::inconsistent(format!(
                "{} bytes of empty space before {name} in {owner}",
                start - cur
            )));
        }
        if start < cur {
            return Err(EbmlError::inconsistent(format!(
                "{name} overlaps the previous child of {owner} by {} bytes",
                cur - start
            )));
        }
        cur = end;
    }
    if let Some(size) = expected_size {
        if cur < size {
            return Err(EbmlError::inconsistent(format!(
                "children of {owner} end at {cur}, {} bytes short of its payload",
                size - cur
            )));
        }
        if cur > size {
            return Err(EbmlError::inconsistent(format!(
                "children of {owner} overflow its payload by {} bytes",
                cur - size
            )));
        }
    }
    Ok(())
}

/// Dictionary checks for one child list: allowed parents, mandatory
/// children present, unique children not duplicated.
pub(crate) fn check_schema(
    children: &[Element],
    parent: Option<ElementId>,
    owner: &str,
    registry: &SchemaRegistry,
) -> Result<()> {
    for child in children {
        // Unknown IDs carry no placement rules.
        if let Some(def) = registry.get(child.id()) {
            if !def.allowed_under(parent) {
                return Err(SchemaViolation::DisallowedParent {
                    child: child.name().to_owned(),
                    parent: owner.to_owned(),
                }
                .into());
            }
        }
    }

    let count = |id: ElementId| children.iter().filter(|c| c.id() == id).count();
    let (required, unique): (Vec<_>, Vec<_>) = match parent {
        Some(p) => (
            registry.required_children(p).collect(),
            registry.unique_children(p).collect(),
        ),
        None => (
            registry.top_level().filter(|d| d.mandatory()).collect(),
            registry.top_level().filter(|d| d.unique).collect(),
        ),
    };
    for def in required {
        if count(def.id) == 0 {
            return Err(SchemaViolation::MissingRequired {
                name: def.name.clone(),
                parent: owner.to_owned(),
            }
            .into());
        }
    }
    for def in unique {
        if count(def.id) > 1 {
            return Err(SchemaViolation::DuplicateUnique {
                name: def.name.clone(),
                parent: owner.to_owned(),
            }
            .into());
        }
    }
    Ok(())
}

impl Element {
    // --- Child management ---

    /// Append a child after the current last child.
    pub fn add_child(&mut self, child: Element) -> usize {
        let end = end_last_child(self.children());
        self.add_child_at(child, end)
    }

    /// Insert a child at a relative position. No overlap checking; call
    /// [`Element::rearrange`] before writing.
    pub fn add_child_at(&mut self, mut child: Element, pos: u64) -> usize {
        let m = self
            .master_data_mut()
            .expect("children can only be added to master elements");
        child.pos_relative = pos;
        insert_sorted(&mut m.children, child)
    }

    /// Detach and return the child at `index`.
    pub fn remove_child(&mut self, index: usize) -> Element {
        let m = self
            .master_data_mut()
            .expect("children can only be removed from master elements");
        m.children.remove(index)
    }

    /// Detach every child with the given name.
    pub fn remove_children_named(&mut self, name: &str) -> Vec<Element> {
        let Some(m) = self.master_data_mut() else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        let mut i = 0;
        while i < m.children.len() {
            if m.children[i].name() == name {
                removed.push(m.children.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Move the child at `index` to a new relative position. No overlap
    /// checking.
    pub fn move_child(&mut self, index: usize, new_pos: u64) {
        let m = self
            .master_data_mut()
            .expect("children can only be moved within master elements");
        let mut child = m.children.remove(index);
        child.pos_relative = new_pos;
        insert_sorted(&mut m.children, child);
    }

    /// Children with the given dictionary name, in position order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children().iter().filter(move |c| c.name() == name)
    }

    /// First child with the given name.
    #[must_use]
    pub fn child_named<'a>(&'a self, name: &'a str) -> Option<&'a Element> {
        self.children_named(name).next()
    }

    /// First child with the given name, mutable.
    pub fn child_named_mut(&mut self, name: &str) -> Option<&mut Element> {
        match &mut self.data {
            ElementData::Master(m) => m.children.iter_mut().find(|c| c.name() == name),
            _ => None,
        }
    }

    /// Children with the given ID, in position order.
    pub fn children_with_id(&self, id: ElementId) -> impl Iterator<Item = &Element> {
        self.children().iter().filter(move |c| c.id() == id)
    }

    /// Relative end of the last child, or zero without children.
    #[must_use]
    pub fn end_last_child(&self) -> u64 {
        end_last_child(self.children())
    }

    /// Resize the payload to end exactly at the last child.
    pub fn fit_to_children(&mut self) -> Result<()> {
        let end = self.end_last_child();
        self.resize(end)
    }

    // --- Consistency ---

    /// Positional consistency only: children tile the payload, recursively.
    pub fn check_consecutive(&self) -> Result<()> {
        let Some(m) = self.master_data() else {
            return Ok(());
        };
        // A clean deferred master may legitimately have its children
        // on disk instead of in memory.
        if self.defer && self.read_state == ReadState::SummaryLoaded && !self.is_dirty() {
            return Ok(());
        }
        check_tiling(&m.children, &m.frozen, Some(self.size()), self.name())?;
        for child in &m.children {
            child.check_consecutive()?;
        }
        Ok(())
    }

    /// Full consistency: positional invariants plus dictionary conformance
    /// (allowed parents, mandatory children, uniqueness, value ranges),
    /// recursively.
    pub fn check_consistency(&self, registry: &SchemaRegistry) -> Result<()> {
        match &self.data {
            ElementData::Master(m) => {
                if self.defer && self.read_state == ReadState::SummaryLoaded && !self.is_dirty() {
                    return Ok(());
                }
                check_tiling(&m.children, &m.frozen, Some(self.size()), self.name())?;
                check_schema(&m.children, Some(self.id()), self.name(), registry)?;
                for child in &m.children {
                    child.check_consistency(registry)?;
                }
                Ok(())
            }
            ElementData::Atomic(a) => {
                if let Some(def) = registry.get(self.id()) {
                    if let Err(detail) = def.check_range(&a.value) {
                        return Err(SchemaViolation::BadValue {
                            name: self.name().to_owned(),
                            detail,
                        }
                        .into());
                    }
                }
                Ok(())
            }
            ElementData::Void | ElementData::Unsupported { .. } => Ok(()),
        }
    }

    /// Whether [`Element::check_consecutive`] passes.
    #[must_use]
    pub fn consistent(&self, registry: &SchemaRegistry) -> bool {
        self.check_consistency(registry).is_ok()
    }

    // --- Rearrangement ---

    /// Repair positional consistency.
    ///
    /// Children are walked left to right behind a cursor; Voids are treated
    /// as free space and recreated to fill whatever gaps remain. Trailing
    /// slack becomes a Void (Preserve) or shrinks the element (Pack with
    /// shrinking allowed); children past the end grow the element.
    pub fn rearrange(&mut self, opts: &RearrangeOptions, registry: &SchemaRegistry) -> Result<()> {
        let size = self.size();
        {
            let Some(m) = self.master_data() else {
                return Err(EbmlError::cannot_rearrange(format!(
                    "{} is not a master element",
                    self.name()
                )));
            };
            if !m.frozen.is_empty() {
                return Err(EbmlError::cannot_rearrange(
                    "segment holds unread media regions; use normalize",
                ));
            }
        }
        if self.defer && self.read_state == ReadState::SummaryLoaded && !self.is_dirty() {
            return Ok(());
        }

        let m = self.master_data_mut().expect("master variant");
        let end = rearrange_children(&mut m.children, opts, registry)?;
        debug!(owner = %self.name, end, size, "rearranged");

        if end == size {
            return Ok(());
        }
        if end > size || (opts.strategy == Strategy::Pack && opts.allow_shrink) {
            return self.resize(end);
        }
        // Pad the tail. A one-byte gap cannot hold a Void, so grow the
        // payload by one first.
        let mut gap = size - end;
        if gap == 1 {
            self.resize(size + 1)?;
            gap = 2;
        }
        let mut void = Element::new_void(gap)?;
        void.pos_relative = end;
        self.master_data_mut()
            .expect("master variant")
            .children
            .push(void);
        Ok(())
    }

    /// Rearrange only if the positional invariants are currently broken.
    pub fn rearrange_if_needed(
        &mut self,
        opts: &RearrangeOptions,
        registry: &SchemaRegistry,
    ) -> Result<()> {
        if self.check_consecutive().is_err() {
            self.rearrange(opts, registry)
        } else {
            Ok(())
        }
    }
}

/// Lay out a child list consecutively from offset zero, recursing into
/// master children first so their sizes are settled bottom-up. Returns the
/// end offset of the last non-Void child (gaps Void-filled).
pub(crate) fn rearrange_children(
    children: &mut Vec<Element>,
    opts: &RearrangeOptions,
    registry: &SchemaRegistry,
) -> Result<u64> {
    for child in children.iter_mut() {
        if child.is_master() {
            child.rearrange_if_needed(opts, registry)?;
        }
    }

    // Voids are free space; drop them and re-create them from the gaps.
    let mut kept: Vec<Element> = Vec::with_capacity(children.len());
    for el in children.drain(..) {
        if !el.is_void() {
            kept.push(el);
        }
    }

    let mut cursor = 0u64;
    for el in &mut kept {
        if opts.allow_shrink && el.is_atomic() {
            let min = el.min_total_size();
            if min < el.total_size() {
                el.resize_total(min)?;
            }
        }
        let mut pos = match opts.strategy {
            Strategy::Pack => cursor,
            Strategy::Preserve => el.pos_relative.max(cursor),
        };
        if pos > cursor && pos - cursor < opts.min_void.max(2) {
            // The gap could not hold a Void; close it.
            pos = cursor;
        }
        if pos != el.pos_relative {
            if !opts.allow_move {
                return Err(EbmlError::cannot_rearrange(format!(
                    "{} would have to move from {} to {}",
                    el.name(),
                    el.pos_relative,
                    pos
                )));
            }
            el.pos_relative = pos;
        }
        cursor = el.end_relative();
    }

    let mut rebuilt = Vec::with_capacity(kept.len() * 2);
    let mut cur = 0u64;
    for el in kept {
        if el.pos_relative > cur {
            let mut void = Element::new_void(el.pos_relative - cur)?;
            void.pos_relative = cur;
            rebuilt.push(void);
        }
        cur = el.end_relative();
        rebuilt.push(el);
    }
    *children = rebuilt;
    Ok(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkedit_types::EbmlValue;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::matroska()
    }

    fn utf8(name: &str, text: &str, reg: &SchemaRegistry) -> Element {
        Element::new_with_value(name, EbmlValue::Utf8(text.into()), reg).unwrap()
    }

    fn title(text: &str, reg: &SchemaRegistry) -> Element {
        utf8("Title", text, reg)
    }

    fn info_with(children: Vec<Element>, reg: &SchemaRegistry) -> Element {
        let mut info = Element::new("Info", reg).unwrap();
        for child in children {
            info.add_child(child);
        }
        info.fit_to_children().unwrap();
        info
    }

    #[test]
    fn add_child_appends_consecutively() {
        let reg = registry();
        let mut info = Element::new("Info", &reg).unwrap();
        info.add_child(title("a", &reg));
        info.add_child(utf8("MuxingApp", "b", &reg));
        let first_end = info.children()[0].end_relative();
        assert_eq!(info.children()[1].pos_relative(), first_end);
        info.fit_to_children().unwrap();
        assert!(info.check_consecutive().is_ok());
    }

    #[test]
    fn tiling_detects_gap_overlap_and_tail() {
        let reg = registry();
        let mut info = info_with(vec![title("ab", &reg)], &reg);
        assert!(info.check_consecutive().is_ok());

        // Open a gap at the front.
        info.move_child(0, 4);
        let err = info.check_consecutive().unwrap_err();
        assert!(err.to_string().contains("empty space"));

        // Overlap.
        info.move_child(0, 0);
        info.add_child_at(utf8("MuxingApp", "cd", &reg), 3);
        let err = info.check_consecutive().unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn schema_checks_missing_required() {
        let reg = registry();
        let mut attached = Element::new("AttachedFile", &reg).unwrap();
        attached.add_child(
            Element::new_with_value("FileName", EbmlValue::Utf8("a.png".into()), &reg).unwrap(),
        );
        attached.fit_to_children().unwrap();
        let err = attached.check_consistency(&reg).unwrap_err();
        assert!(matches!(
            err,
            EbmlError::Schema(SchemaViolation::MissingRequired { .. })
        ));
    }

    #[test]
    fn schema_checks_disallowed_parent_and_duplicates() {
        let reg = registry();
        // Title does not belong in Tracks.
        let mut tracks = Element::new("Tracks", &reg).unwrap();
        tracks.add_child(title("nope", &reg));
        tracks.fit_to_children().unwrap();
        let err = check_schema(tracks.children(), Some(tracks.id()), "Tracks", &reg).unwrap_err();
        assert!(matches!(
            err,
            EbmlError::Schema(SchemaViolation::DisallowedParent { .. })
        ));

        let info = info_with(vec![title("a", &reg), title("b", &reg)], &reg);
        let err = check_schema(info.children(), Some(info.id()), "Info", &reg).unwrap_err();
        assert!(matches!(
            err,
            EbmlError::Schema(SchemaViolation::DuplicateUnique { .. })
        ));
    }

    #[test]
    fn rearrange_fills_gap_with_void() {
        let reg = registry();
        let mut info = Element::new("Info", &reg).unwrap();
        info.add_child_at(title("ab", &reg), 0);
        // Leave a 4-byte hole before the second child.
        let first_end = info.children()[0].end_relative();
        info.add_child_at(utf8("MuxingApp", "cd", &reg), first_end + 4);
        info.fit_to_children().unwrap();
        assert!(info.check_consecutive().is_err());

        info.rearrange(&RearrangeOptions::default(), &reg).unwrap();
        assert!(info.check_consecutive().is_ok());
        let voids: Vec<_> = info.children_named("Void").collect();
        assert_eq!(voids.len(), 1);
        assert_eq!(voids[0].total_size(), 4);
    }

    #[test]
    fn rearrange_closes_one_byte_gap() {
        let reg = registry();
        let mut info = Element::new("Info", &reg).unwrap();
        info.add_child_at(title("ab", &reg), 0);
        let first_end = info.children()[0].end_relative();
        info.add_child_at(utf8("MuxingApp", "cd", &reg), first_end + 1);
        info.fit_to_children().unwrap();

        info.rearrange(&RearrangeOptions::default(), &reg).unwrap();
        assert!(info.check_consecutive().is_ok());
        // The second child was pulled back over the unfillable gap; the
        // one byte it vacated at the tail grew into a 2-byte Void.
        assert_eq!(info.children()[1].pos_relative(), first_end);
        let voids: Vec<_> = info.children_named("Void").collect();
        assert_eq!(voids.len(), 1);
        assert_eq!(voids[0].total_size(), 2);
    }

    #[test]
    fn rearrange_shifts_overlapping_children() {
        let reg = registry();
        let mut info = Element::new("Info", &reg).unwrap();
        info.add_child_at(title("abcd", &reg), 0);
        // Starts inside the first child.
        info.add_child_at(utf8("MuxingApp", "ef", &reg), 3);
        info.rearrange(&RearrangeOptions::default(), &reg).unwrap();
        assert!(info.check_consecutive().is_ok());
        let first_end = info.children()[0].end_relative();
        assert_eq!(info.children()[1].pos_relative(), first_end);
    }

    #[test]
    fn preserve_keeps_trailing_void_pack_shrinks() {
        let reg = registry();
        let mut info = info_with(vec![title("ab", &reg)], &reg);
        let end = info.end_last_child();
        info.resize(end + 6).unwrap();
        assert!(info.check_consecutive().is_err());

        let mut preserved = info;
        preserved
            .rearrange(&RearrangeOptions::default(), &reg)
            .unwrap();
        assert!(preserved.check_consecutive().is_ok());
        assert_eq!(preserved.size(), end + 6, "size kept, tail padded");
        assert_eq!(preserved.children_named("Void").count(), 1);

        let mut packed = info_with(vec![title("ab", &reg)], &reg);
        packed.resize(end + 6).unwrap();
        packed.rearrange(&RearrangeOptions::packed(), &reg).unwrap();
        assert_eq!(packed.size(), end, "packing reclaims the tail");
        assert_eq!(packed.children_named("Void").count(), 0);
    }

    #[test]
    fn rearrange_grows_one_byte_tail_gap() {
        let reg = registry();
        let mut info = info_with(vec![title("ab", &reg)], &reg);
        let end = info.end_last_child();
        info.resize(end + 1).unwrap();

        info.rearrange(&RearrangeOptions::default(), &reg).unwrap();
        // The 1-byte tail cannot hold a Void; the payload grew by one and
        // got a 2-byte Void instead.
        assert_eq!(info.size(), end + 2);
        assert!(info.check_consecutive().is_ok());
    }

    #[test]
    fn rearrange_grows_element_on_overflow() {
        let reg = registry();
        let mut info = info_with(vec![title("ab", &reg)], &reg);
        let size = info.size();
        info.add_child(utf8("MuxingApp", "overflowing", &reg));
        assert!(info.check_consecutive().is_err());
        info.rearrange(&RearrangeOptions::default(), &reg).unwrap();
        assert!(info.size() > size);
        assert!(info.check_consecutive().is_ok());
    }

    #[test]
    fn allow_shrink_reclaims_atomic_padding() {
        let reg = registry();
        let mut scale = Element::new("TimecodeScale", &reg).unwrap();
        scale.set_value(EbmlValue::Unsigned(1_000_000), &reg).unwrap();
        scale.resize(8).unwrap();
        let mut info = info_with(vec![scale], &reg);

        let mut opts = RearrangeOptions::packed();
        opts.allow_shrink = true;
        info.rearrange(&opts, &reg).unwrap();
        assert_eq!(info.children()[0].size(), 3, "1000000 packs into 3 bytes");
        assert!(info.check_consecutive().is_ok());
    }

    #[test]
    fn allow_move_false_fails_when_motion_needed() {
        let reg = registry();
        let mut info = Element::new("Info", &reg).unwrap();
        info.add_child_at(title("ab", &reg), 7);
        info.fit_to_children().unwrap();
        let opts = RearrangeOptions {
            allow_move: false,
            ..RearrangeOptions::default()
        };
        let err = info.rearrange(&opts, &reg).unwrap_err();
        assert!(matches!(err, EbmlError::CannotRearrange { .. }));
    }

    #[test]
    fn rearrange_recurses_into_master_children() {
        let reg = registry();
        let mut inner = Element::new("Info", &reg).unwrap();
        inner.add_child_at(title("ab", &reg), 5);
        inner.fit_to_children().unwrap();

        let mut outer = Element::new("Segment", &reg).unwrap();
        outer.add_child(inner);
        outer.fit_to_children().unwrap();
        assert!(outer.check_consecutive().is_err());

        outer.rearrange(&RearrangeOptions::default(), &reg).unwrap();
        assert!(outer.check_consecutive().is_ok());
        let info = outer.child_named("Info").unwrap();
        assert_eq!(info.children_named("Void").count(), 1);
    }
}
