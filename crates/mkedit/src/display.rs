//! Human-readable views of the tree: one-line element descriptions,
//! recursive child listings, and the byte-layout table.

use std::fmt;

use mkedit_types::hex_bytes;

use crate::element::{Element, ElementData};
use crate::file::EbmlFile;

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.data {
            ElementData::Master(_) => "Master",
            ElementData::Atomic(_) => "Atomic",
            ElementData::Void => "Void",
            ElementData::Unsupported { .. } => "Unsupported",
        };
        let label = if self.name == "Unknown" {
            format!("[{}]", hex_bytes(&self.id().encoded()))
        } else {
            self.name.clone()
        };
        write!(
            f,
            "{kind} {label} ({}+{} @{})",
            self.header_len(),
            self.size(),
            self.pos_relative()
        )?;
        match &self.data {
            ElementData::Master(m) => {
                write!(f, ": {} child", m.children.len())?;
                if m.children.len() != 1 {
                    write!(f, "ren")?;
                }
                if !m.frozen.is_empty() {
                    write!(f, ", {} unread media runs", m.frozen.len())?;
                }
                Ok(())
            }
            ElementData::Atomic(a) => write!(f, ": {}", a.value),
            ElementData::Void | ElementData::Unsupported { .. } => Ok(()),
        }
    }
}

/// Recursive child listing, `depth` levels deep (`None` for all).
pub(crate) fn print_children(children: &[Element], depth: Option<usize>, indent: usize) -> String {
    let mut out = String::new();
    for child in children {
        out.push_str(&" ".repeat(indent));
        out.push_str(&child.to_string());
        out.push('\n');
        let descend = match depth {
            None => true,
            Some(d) => d > 1,
        };
        if descend && child.is_master() {
            out.push_str(&print_children(
                child.children(),
                depth.map(|d| d - 1),
                indent + 4,
            ));
        }
    }
    out
}

fn space_line(start_pos: u64, start_rel: u64, end_rel: u64) -> String {
    format!(
        "{:<11}--{:<11} | {:<11}--{:<11} | {:11} bytes: ",
        start_pos + start_rel,
        start_pos + end_rel,
        start_rel,
        end_rel,
        end_rel - start_rel
    )
}

enum SpaceItem<'a> {
    Child(usize, &'a Element),
    Run(u64, u64),
}

impl SpaceItem<'_> {
    fn start(&self) -> u64 {
        match self {
            SpaceItem::Child(_, el) => el.pos_relative(),
            SpaceItem::Run(start, _) => *start,
        }
    }

    fn end(&self) -> u64 {
        match self {
            SpaceItem::Child(_, el) => el.end_relative(),
            SpaceItem::Run(_, end) => *end,
        }
    }
}

/// Byte-layout table: which child occupies which block of a container,
/// with `***NO CHILD***`, `***OVERLAP***`, `***UNUSED***`, and
/// `***OVERFLOW***` annotations where the layout is broken.
pub(crate) fn print_space(
    children: &[Element],
    frozen: &[(u64, u64)],
    parent_size: Option<u64>,
    level_up: Option<usize>,
    start_pos: u64,
    level_down: usize,
) -> String {
    let ind = format!("{}> ", level_down + 1);
    let mut items: Vec<SpaceItem<'_>> = children
        .iter()
        .enumerate()
        .map(|(i, c)| SpaceItem::Child(i, c))
        .collect();
    items.extend(frozen.iter().map(|&(s, e)| SpaceItem::Run(s, e)));
    items.sort_by_key(SpaceItem::start);

    let mut out = String::new();
    let mut cur = 0u64;
    for item in &items {
        let start = item.start();
        let end = item.end();
        if start > cur {
            out.push_str(&ind);
            out.push_str(&space_line(start_pos, cur, start));
            out.push_str("***NO CHILD***\n");
        } else if start < cur {
            out.push_str(&ind);
            out.push_str(&space_line(start_pos, start, cur));
            out.push_str("***OVERLAP***\n");
        }
        out.push_str(&ind);
        out.push_str(&space_line(start_pos, start, end));
        match item {
            SpaceItem::Child(i, child) => {
                out.push_str(&format!("[{i:2}] {}\n", child.name()));
            }
            SpaceItem::Run(..) => out.push_str("<unread media>\n"),
        }
        cur = cur.max(end);

        if let SpaceItem::Child(_, child) = item {
            let descend = level_up.map_or(true, |l| l > 1);
            if descend && child.is_master() && !child.children().is_empty() {
                let m = child.master_data().expect("master variant");
                out.push('\n');
                out.push_str(&print_space(
                    &m.children,
                    &m.frozen,
                    Some(child.size()),
                    level_up.map(|l| l - 1),
                    start_pos + child.pos_relative() + child.header_len(),
                    level_down + 1,
                ));
                out.push('\n');
            }
        }
    }

    if let Some(size) = parent_size {
        if cur < size {
            out.push_str(&ind);
            out.push_str(&space_line(start_pos, cur, size));
            out.push_str("***UNUSED***\n");
        } else if cur > size {
            out.push_str(&ind);
            out.push_str(&space_line(start_pos, size, cur));
            out.push_str("***OVERFLOW***\n");
        }
    }
    out
}

/// File-level summary: the stream, then each segment's metadata.
pub(crate) fn file_summary(file: &EbmlFile) -> String {
    let mut out = format!(
        "File: {} bytes, {} top-level element{}\n",
        file.stream_len(),
        file.children().len(),
        if file.children().len() == 1 { "" } else { "s" }
    );
    if file.segments().next().is_none() {
        out.push_str("No segments!\n");
        return out;
    }
    for segment in file.segments() {
        out.push_str(&segment_summary(segment, file));
    }
    out
}

fn segment_summary(segment: &Element, file: &EbmlFile) -> String {
    let registry = file.registry();
    let mut out = format!("{segment}\n");
    let pad = "    ";
    if let Some(title) = segment.title() {
        out.push_str(&format!("{pad}Title:       {title:?}\n"));
    }
    if let Some(duration) = segment.duration_secs(registry) {
        out.push_str(&format!("{pad}Duration:    {duration:.2} seconds\n"));
    }
    out.push_str(&format!(
        "{pad}Time scale:  {} nanoseconds\n",
        segment.timecode_scale(registry)
    ));
    if let Some(app) = segment.muxing_app() {
        out.push_str(&format!("{pad}Muxing app:  {app:?}\n"));
    }
    if let Some(app) = segment.writing_app() {
        out.push_str(&format!("{pad}Writing app: {app:?}\n"));
    }

    let entries = segment.seek_entries();
    if !entries.is_empty() {
        out.push_str(&format!("{pad}Seek entries:\n"));
        for (id, pos) in entries {
            let name = registry
                .get(id)
                .map_or_else(|| id.to_string(), |def| def.name.clone());
            out.push_str(&format!("{pad}    {name:<13} @{pos}\n"));
        }
    }

    let attachments: Vec<&Element> = segment
        .children_named("Attachments")
        .flat_map(|a| a.children_named("AttachedFile"))
        .collect();
    if !attachments.is_empty() {
        out.push_str(&format!("{pad}Attachments:\n"));
        for af in attachments {
            let name = af.file_name().unwrap_or("?");
            let mime = af.file_mime_type().unwrap_or("?");
            let len = af.file_data().map_or(0, <[u8]>::len);
            out.push_str(&format!("{pad}    {name:?} ({mime}), {len} bytes\n"));
        }
    }

    let tracks = segment
        .children_named("Tracks")
        .flat_map(|t| t.children_named("TrackEntry"))
        .count();
    if tracks > 0 {
        out.push_str(&format!("{pad}Tracks:      {tracks}\n"));
    }
    out
}
