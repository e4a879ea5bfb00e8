//! Segment-specific behavior.
//!
//! The Segment is the master holding all media data. Clusters usually make
//! up more than 99% of its bytes, so a summary read finds the metadata
//! children without ever touching the cluster region: it reads forward
//! until a Cluster header appears, then hops to the positions named by
//! SeekHead entries. The byte runs that were skipped are remembered as
//! frozen extents that no layout pass will ever move.
//!
//! [`Element::normalize`] is the segment-level layout pass: it rebuilds the
//! SeekHead at the front, orders the metadata around the frozen media
//! region, and pads the remainder with Voids.

use std::collections::HashMap;

use mkedit_error::{EbmlError, Result};
use mkedit_schema::{ids, SchemaRegistry};
use mkedit_types::vint::decode_id;
use mkedit_types::{EbmlValue, ElementId, Header};
use mkedit_vfs::ByteSource;
use rand::random;
use tracing::{debug, info};

use crate::element::{read_child_into, Element, ReadMode, ReadState};
use crate::master::{find_at, RearrangeOptions};

/// Layout policy for [`Element::normalize`].
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Padding reserved inside the rebuilt SeekHead so later entries can be
    /// added without relocating it.
    pub seekhead_slack: u64,
    /// Upper bound on the segment's total size; exceeding it fails with
    /// `SegmentFull`. `None` means the segment may grow freely (it is the
    /// last top-level element).
    pub grow_limit: Option<u64>,
    /// Metadata preferred in front of the media region, best first.
    pub head_order: Vec<String>,
    /// Metadata placed after the media region. Large, growable elements
    /// belong here so they can grow without disturbing the head layout.
    pub tail_order: Vec<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            seekhead_slack: 32,
            grow_limit: None,
            head_order: vec!["Info".into(), "Tracks".into(), "Chapters".into()],
            tail_order: vec!["Attachments".into(), "Tags".into()],
        }
    }
}

/// Read forward from `cur`, child by child, until a Cluster header or the
/// end of the payload. Returns the position of the Cluster, if one was hit.
fn read_until_cluster(
    children: &mut Vec<Element>,
    src: &mut dyn ByteSource,
    data_abs: u64,
    mut cur: u64,
    size: u64,
    registry: &SchemaRegistry,
) -> Result<Option<u64>> {
    while cur < size {
        let buf = src.read_prefix_at(12, data_abs + cur)?;
        let decoded = Header::decode(&buf, data_abs + cur)?;
        if decoded.header.id() == ids::CLUSTER {
            return Ok(Some(cur));
        }
        cur = read_child_into(children, src, data_abs, cur, size, ReadMode::Summary, registry)?;
    }
    Ok(None)
}

/// SeekHead entries currently present under the given children:
/// `(target id, offset relative to the segment payload)`.
fn collect_seek_entries(children: &[Element]) -> Vec<(ElementId, u64)> {
    let mut entries = Vec::new();
    for head in children.iter().filter(|c| c.name() == "SeekHead") {
        for seek in head.children_named("Seek") {
            let id = seek
                .children_named("SeekID")
                .last()
                .and_then(Element::value)
                .and_then(EbmlValue::as_bytes)
                .and_then(|raw| decode_id(raw, 0).ok())
                .map(|(id, _)| id);
            let pos = seek
                .children_named("SeekPosition")
                .last()
                .and_then(Element::value)
                .and_then(EbmlValue::as_unsigned);
            if let (Some(id), Some(pos)) = (id, pos) {
                entries.push((id, pos));
            }
        }
    }
    entries
}

/// Summary read of a segment: collect the metadata children, skip the
/// cluster region, and record the skipped byte runs as frozen extents.
pub(crate) fn read_summary(
    seg: &mut Element,
    src: &mut dyn ByteSource,
    abs_pos: u64,
    registry: &SchemaRegistry,
) -> Result<()> {
    let size = seg.size();
    let data_abs = abs_pos + seg.header_len();
    let m = seg.master_data_mut().expect("segment is a master");
    let mut cluster_starts: Vec<u64> = Vec::new();

    if let Some(pos) = read_until_cluster(&mut m.children, src, data_abs, 0, size, registry)? {
        cluster_starts.push(pos);
    }

    // Follow the ends of known children and any SeekHead entries until
    // nothing unexplored remains. Every pass either loads a new child or
    // records a new cluster run, so this terminates.
    loop {
        let mut next = None;
        for child in &m.children {
            let end = child.end_relative();
            if end < size
                && !cluster_starts.contains(&end)
                && find_at(&m.children, end).is_none()
            {
                next = Some(end);
                break;
            }
        }
        if next.is_none() {
            for (id, pos) in collect_seek_entries(&m.children) {
                if id != ids::CLUSTER
                    && pos < size
                    && !cluster_starts.contains(&pos)
                    && find_at(&m.children, pos).is_none()
                {
                    next = Some(pos);
                    break;
                }
            }
        }
        let Some(cur) = next else { break };
        if let Some(pos) =
            read_until_cluster(&mut m.children, src, data_abs, cur, size, registry)?
        {
            if !cluster_starts.contains(&pos) {
                cluster_starts.push(pos);
            }
        }
    }

    // A cluster run extends from its start to the next known child.
    cluster_starts.sort_unstable();
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for &start in &cluster_starts {
        let end = m
            .children
            .iter()
            .map(|c| c.pos_relative())
            .filter(|&p| p > start)
            .min()
            .unwrap_or(size);
        match runs.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => runs.push((start, end)),
        }
    }
    m.frozen = runs;

    debug!(
        children = m.children.len(),
        frozen = m.frozen.len(),
        "segment summary read"
    );
    seg.read_state = ReadState::SummaryLoaded;
    Ok(())
}

/// Build a Seek entry pointing at `target`, with a placeholder position.
fn new_seek(target: ElementId, registry: &SchemaRegistry) -> Result<Element> {
    let mut seek = Element::new("Seek", registry)?;
    seek.add_child(Element::new_with_value(
        "SeekID",
        EbmlValue::Binary(target.encoded()),
        registry,
    )?);
    seek.add_child(Element::new_with_value(
        "SeekPosition",
        EbmlValue::Unsigned(0),
        registry,
    )?);
    seek.fit_to_children()?;
    Ok(seek)
}

/// Grow an element's total size by one byte, if its content allows it.
fn grow_by_one(el: &mut Element) -> bool {
    let size = el.size();
    if el.is_master() {
        let grew = el
            .master_data_mut()
            .and_then(|m| m.children.last_mut())
            .filter(|last| last.is_void())
            .map(|last| {
                let s = last.size();
                last.resize(s + 1).is_ok()
            })
            .unwrap_or(false);
        return grew && el.resize(size + 1).is_ok();
    }
    if el.value().is_some_and(|v| v.fits_width(size + 1)) {
        return el.resize(size + 1).is_ok();
    }
    false
}

impl Element {
    /// Rearrange a segment's level-1 children into a canonical layout.
    ///
    /// A fresh SeekHead goes to the front, the head metadata follows it,
    /// and everything else moves behind the media region. Clusters, Cues,
    /// and the byte runs a summary read skipped are never moved. The
    /// segment may grow, up to `opts.grow_limit`; it never shrinks.
    #[allow(clippy::too_many_lines)]
    pub fn normalize(&mut self, registry: &SchemaRegistry, opts: &NormalizeOptions) -> Result<()> {
        if self.id() != ids::SEGMENT {
            return Err(EbmlError::cannot_rearrange(format!(
                "{} is not a segment",
                self.name()
            )));
        }
        if self.read_state() == ReadState::Unread {
            return Err(EbmlError::inconsistent("cannot normalize an unread segment"));
        }

        // Settle metadata children bottom-up so their sizes are final.
        // Packing here absorbs reserved slack, so a grown child first eats
        // its container's padding before the container itself grows.
        let rearr = RearrangeOptions::packed();
        {
            let m = self.master_data_mut().expect("segment is a master");
            for child in &mut m.children {
                if child.is_master() && !matches!(child.name(), "Cluster" | "Cues" | "SeekHead") {
                    child.rearrange_if_needed(&rearr, registry)?;
                }
            }
        }

        // Take the children out, widen the size field to its maximum, and
        // shift the immovables into the new coordinate system. Positions of
        // movable children are reassigned from scratch below.
        let old_header_len = self.header_len();
        let mut all = std::mem::take(
            &mut self
                .master_data_mut()
                .expect("segment is a master")
                .children,
        );
        self.expand_header(8)?;
        let diff = self.header_len() - old_header_len;

        let mut immovable: Vec<Element> = Vec::new();
        let mut movable: Vec<Element> = Vec::new();
        for mut el in all.drain(..) {
            match el.name() {
                // Voids are free space; old SeekHeads are superseded.
                "Void" | "SeekHead" => {}
                "Cluster" | "Cues" => {
                    let pos = el.pos_relative().checked_sub(diff).ok_or_else(|| {
                        EbmlError::cannot_rearrange(
                            "media region too close to the segment header",
                        )
                    })?;
                    el.pos_relative = pos;
                    immovable.push(el);
                }
                _ => movable.push(el),
            }
        }

        let size = self.size();
        let frozen = self
            .master_data()
            .expect("segment is a master")
            .frozen
            .clone();

        // One SeekHead entry per indexable child: everything movable plus
        // the Cues.
        let mut targets: Vec<ElementId> = movable.iter().map(Element::id).collect();
        targets.extend(immovable.iter().filter(|c| c.name() == "Cues").map(Element::id));
        let seek_head = if targets.is_empty() {
            None
        } else {
            let mut sh = Element::new("SeekHead", registry)?;
            for target in targets {
                sh.add_child(new_seek(target, registry)?);
            }
            let slack = Element::new_void(opts.seekhead_slack.max(2))?;
            sh.add_child(slack);
            sh.fit_to_children()?;
            Some(sh)
        };

        // Partition the movable children into head and tail, keeping the
        // configured priority order and original order within a name.
        let rank = |name: &str, order: &[String]| order.iter().position(|n| n == name);
        let mut head: Vec<Element> = Vec::new();
        let mut tail: Vec<Element> = Vec::new();
        for el in movable {
            if rank(el.name(), &opts.head_order).is_some() {
                head.push(el);
            } else {
                tail.push(el);
            }
        }
        head.sort_by_key(|el| rank(el.name(), &opts.head_order));
        tail.sort_by_key(|el| rank(el.name(), &opts.tail_order).unwrap_or(usize::MAX));

        // The head region runs up to the first immovable byte.
        let mut boundaries: Vec<(u64, u64)> = frozen.clone();
        boundaries.extend(
            immovable
                .iter()
                .map(|c| (c.pos_relative(), c.end_relative())),
        );
        boundaries.sort_unstable();
        let head_limit = boundaries.first().map(|&(s, _)| s);

        // Lay out the head: SeekHead first, then the head metadata.
        let mut placed: Vec<Element> = Vec::new();
        let mut cursor = 0u64;
        if let Some(mut sh) = seek_head {
            if head_limit.is_some_and(|l| sh.total_size() > l) {
                return Err(EbmlError::SegmentFull);
            }
            sh.pos_relative = 0;
            cursor = sh.total_size();
            placed.push(sh);
        }
        let mut overflow: Vec<Element> = Vec::new();
        for mut el in head {
            if head_limit.is_some_and(|l| cursor + el.total_size() > l) {
                overflow.push(el);
            } else {
                el.pos_relative = cursor;
                cursor = el.end_relative();
                placed.push(el);
            }
        }
        // Head metadata that did not fit goes to the tail instead.
        let mut tail: Vec<Element> = overflow.into_iter().chain(tail).collect();

        if let Some(limit) = head_limit {
            let mut gap = limit - cursor;
            if gap == 1 {
                // A one-byte gap cannot hold a Void; stretch a neighbor.
                if placed.last_mut().map_or(false, grow_by_one) {
                    cursor += 1;
                    gap = 0;
                } else if let Some(el) = placed.pop() {
                    cursor = el.pos_relative();
                    gap = limit - cursor;
                    tail.insert(0, el);
                } else {
                    return Err(EbmlError::cannot_rearrange(
                        "one unusable byte before the media region",
                    ));
                }
            }
            if gap > 0 {
                let mut void = Element::new_void(gap)?;
                void.pos_relative = cursor;
                placed.push(void);
            }
            cursor = limit;
        }

        // Pad any gaps between the frozen extents, then find the tail
        // start.
        for &(start, end) in &boundaries {
            if start > cursor {
                let hole = start - cursor;
                if hole == 1 {
                    return Err(EbmlError::cannot_rearrange(
                        "one unusable byte between media regions",
                    ));
                }
                let mut void = Element::new_void(hole)?;
                void.pos_relative = cursor;
                placed.push(void);
            }
            cursor = cursor.max(end);
        }

        for mut el in tail {
            el.pos_relative = cursor;
            cursor = el.end_relative();
            placed.push(el);
        }

        // Settle the final payload size. The segment grows as needed but
        // never shrinks; leftover space becomes a trailing Void. The size
        // field is explicit from here on, even if the stream used the
        // unknown-size marker.
        self.unknown_size = false;
        let end = cursor;
        if end > size {
            let new_total = self.header_len() + end;
            if opts.grow_limit.is_some_and(|limit| new_total > limit) {
                return Err(EbmlError::SegmentFull);
            }
            self.resize(end)?;
        } else if end < size {
            let mut gap = size - end;
            if gap == 1 {
                self.resize(size + 1)?;
                gap = 2;
            }
            let mut void = Element::new_void(gap)?;
            void.pos_relative = end;
            placed.push(void);
        }

        // Reassemble and point the SeekHead entries at the final homes.
        let m = self.master_data_mut().expect("segment is a master");
        placed.extend(immovable);
        placed.sort_by_key(Element::pos_relative);
        m.children = placed;
        finalize_seek_positions(&mut m.children, registry)?;

        info!(size = self.size(), "segment normalized");
        debug_assert!(self.check_consecutive().is_ok());
        Ok(())
    }

    /// SeekHead entries of this segment: `(target id, payload offset)`.
    #[must_use]
    pub fn seek_entries(&self) -> Vec<(ElementId, u64)> {
        collect_seek_entries(self.children())
    }

    /// Byte extents of the media region (frozen runs plus loaded Cluster
    /// and Cues children), relative to the segment payload.
    #[must_use]
    pub fn media_extents(&self) -> Vec<(u64, u64)> {
        let Some(m) = self.master_data() else {
            return Vec::new();
        };
        let mut extents = m.frozen.clone();
        extents.extend(
            m.children
                .iter()
                .filter(|c| matches!(c.name(), "Cluster" | "Cues"))
                .map(|c| (c.pos_relative(), c.end_relative())),
        );
        extents.sort_unstable();
        extents
    }

    /// Create (or update) an attached file and return it.
    ///
    /// The Attachments container is created on demand. The new AttachedFile
    /// has an empty payload and a random UID; fill the payload through
    /// [`Element::set_value`] on its FileData child. The container is left
    /// overflowing its payload; `normalize` repairs the layout.
    pub fn add_attachment(
        &mut self,
        file_name: &str,
        mime_type: &str,
        description: Option<&str>,
        registry: &SchemaRegistry,
    ) -> Result<&mut Element> {
        if self.id() != ids::SEGMENT {
            return Err(EbmlError::cannot_rearrange(format!(
                "{} is not a segment",
                self.name()
            )));
        }
        let attachments_idx = match self
            .children()
            .iter()
            .position(|c| c.name() == "Attachments")
        {
            Some(idx) => idx,
            None => {
                let el = Element::new("Attachments", registry)?;
                let pos = self.size();
                self.add_child_at(el, pos)
            }
        };

        let attachments = &mut self
            .master_data_mut()
            .expect("segment is a master")
            .children[attachments_idx];

        let existing = attachments.children().iter().position(|af| {
            af.name() == "AttachedFile"
                && af
                    .children_named("FileName")
                    .last()
                    .and_then(Element::value)
                    .and_then(EbmlValue::as_str)
                    == Some(file_name)
        });
        if let Some(idx) = existing {
            let af = &mut attachments
                .master_data_mut()
                .expect("attachments is a master")
                .children[idx];
            af.set_child_value("FileMimeType", EbmlValue::Ascii(mime_type.into()), registry)?;
            if let Some(desc) = description {
                af.set_child_value("FileDescription", EbmlValue::Utf8(desc.into()), registry)?;
            }
            return Ok(af);
        }

        let mut af = Element::new("AttachedFile", registry)?;
        af.add_child(Element::new_with_value(
            "FileName",
            EbmlValue::Utf8(file_name.into()),
            registry,
        )?);
        af.add_child(Element::new_with_value(
            "FileMimeType",
            EbmlValue::Ascii(mime_type.into()),
            registry,
        )?);
        if let Some(desc) = description {
            af.add_child(Element::new_with_value(
                "FileDescription",
                EbmlValue::Utf8(desc.into()),
                registry,
            )?);
        }
        af.add_child(Element::new_with_value(
            "FileData",
            EbmlValue::Binary(Vec::new()),
            registry,
        )?);
        af.add_child(Element::new_with_value(
            "FileUID",
            EbmlValue::Unsigned(random::<u64>().max(1)),
            registry,
        )?);
        af.fit_to_children()?;

        let idx = attachments.add_child(af);
        let af = &mut attachments
            .master_data_mut()
            .expect("attachments is a master")
            .children[idx];
        Ok(af)
    }

    /// Delete an attached file by name. Removes the Attachments container
    /// when the last one goes. Returns whether anything was removed.
    pub fn remove_attachment(&mut self, file_name: &str) -> bool {
        let Some(att_idx) = self
            .children()
            .iter()
            .position(|c| c.name() == "Attachments")
        else {
            return false;
        };
        let attachments = &mut self
            .master_data_mut()
            .expect("segment is a master")
            .children[att_idx];
        let Some(af_idx) = attachments.children().iter().position(|af| {
            af.children_named("FileName")
                .last()
                .and_then(Element::value)
                .and_then(EbmlValue::as_str)
                == Some(file_name)
        }) else {
            return false;
        };
        attachments.remove_child(af_idx);
        if attachments.children_named("AttachedFile").count() == 0 {
            self.remove_child(att_idx);
        }
        true
    }
}

/// Point every Seek entry of the first SeekHead at the current position of
/// its target, matching repeated IDs by occurrence order.
fn finalize_seek_positions(children: &mut [Element], registry: &SchemaRegistry) -> Result<()> {
    let mut positions: HashMap<u32, Vec<u64>> = HashMap::new();
    for child in children.iter() {
        if !matches!(child.name(), "SeekHead" | "Void" | "Cluster") {
            positions
                .entry(child.id().raw())
                .or_default()
                .push(child.pos_relative());
        }
    }
    let mut taken: HashMap<u32, usize> = HashMap::new();

    let Some(sh) = children.iter_mut().find(|c| c.name() == "SeekHead") else {
        return Ok(());
    };
    let Some(m) = sh.master_data_mut() else {
        return Ok(());
    };
    for seek in m
        .children
        .iter_mut()
        .filter(|c| c.name() == "Seek")
    {
        let target = seek
            .children_named("SeekID")
            .last()
            .and_then(Element::value)
            .and_then(EbmlValue::as_bytes)
            .and_then(|raw| decode_id(raw, 0).ok())
            .map(|(id, _)| id);
        let Some(target) = target else { continue };
        let nth = taken.entry(target.raw()).or_insert(0);
        let Some(pos) = positions.get(&target.raw()).and_then(|v| v.get(*nth)) else {
            continue;
        };
        let pos = *pos;
        *nth += 1;
        seek.set_child_value("SeekPosition", EbmlValue::Unsigned(pos), registry)?;
    }
    Ok(())
}
