//! End-to-end editing scenarios over hand-built Matroska fixtures.
//!
//! The fixtures are assembled byte by byte so the tests pin down on-disk
//! behavior, not just API round-trips: which byte ranges a save touches,
//! that cluster payloads survive untouched, and that the SeekHead agrees
//! with the layout after normalization.

use std::sync::{Arc, Mutex};

use mkedit::{
    ByteSource, EbmlError, EbmlFile, EbmlValue, ElementId, MemorySource, RearrangeOptions,
    SchemaRegistry, SchemaViolation,
};
use mkedit_types::vint::encode_vint;

// ===========================================================================
// Fixture building
// ===========================================================================

const EBML_ID: u32 = 0x1A45_DFA3;
const EBML_VERSION: u32 = 0x4286;
const SEGMENT: u32 = 0x1853_8067;
const SEEK_HEAD: u32 = 0x114D_9B74;
const SEEK: u32 = 0x4DBB;
const SEEK_ID: u32 = 0x53AB;
const SEEK_POSITION: u32 = 0x53AC;
const INFO: u32 = 0x1549_A966;
const TIMECODE_SCALE: u32 = 0x2A_D7B1;
const MUXING_APP: u32 = 0x4D80;
const WRITING_APP: u32 = 0x5741;
const TITLE: u32 = 0x7BA9;
const CLUSTER: u32 = 0x1F43_B675;
const TIMECODE: u32 = 0xE7;
const SIMPLE_BLOCK: u32 = 0xA3;
const ATTACHMENTS: u32 = 0x1941_A469;
const ATTACHED_FILE: u32 = 0x61A7;
const FILE_NAME: u32 = 0x466E;
const FILE_MIME_TYPE: u32 = 0x4660;
const FILE_DATA: u32 = 0x465C;
const FILE_UID: u32 = 0x46AE;

fn id_bytes(raw: u32) -> Vec<u8> {
    ElementId::new(raw).unwrap().encoded()
}

/// One element with a minimally encoded size field.
fn elem(raw: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = id_bytes(raw);
    out.extend(encode_vint(payload.len() as u64, 1).unwrap());
    out.extend_from_slice(payload);
    out
}

/// One element with an inflated size field.
fn elem_wide(raw: u32, payload: &[u8], size_width: usize) -> Vec<u8> {
    let mut out = id_bytes(raw);
    out.extend(encode_vint(payload.len() as u64, size_width).unwrap());
    out.extend_from_slice(payload);
    out
}

/// A Void of the given total size (small sizes only).
fn void(total: usize) -> Vec<u8> {
    assert!((2..=128).contains(&total));
    let mut out = vec![0xEC];
    out.extend(encode_vint((total - 2) as u64, 1).unwrap());
    out.extend(std::iter::repeat(0u8).take(total - 2));
    out
}

fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.iter().flatten().copied().collect()
}

fn ebml_header() -> Vec<u8> {
    elem(EBML_ID, &elem(EBML_VERSION, &[1]))
}

/// A Seek entry with an 8-byte position payload.
fn seek(target: u32, pos: u64) -> Vec<u8> {
    elem(
        SEEK,
        &concat(&[
            elem(SEEK_ID, &id_bytes(target)),
            elem(SEEK_POSITION, &pos.to_be_bytes()),
        ]),
    )
}

fn seek_head(entries: &[(u32, u64)]) -> Vec<u8> {
    let body: Vec<Vec<u8>> = entries.iter().map(|&(t, p)| seek(t, p)).collect();
    elem(SEEK_HEAD, &concat(&body))
}

struct MovieFixture {
    bytes: Vec<u8>,
    /// Absolute position of the segment header.
    segment_pos: u64,
    /// Absolute position of the segment payload.
    data_abs: u64,
    info_rel: u64,
    info_total: u64,
    cluster_rel: u64,
    cluster_total: u64,
    attachments_rel: u64,
    attachments_total: u64,
}

/// A small but complete movie file:
/// EBML header, then a Segment laid out as
/// `SeekHead | Info (with trailing Void) | Void | Cluster | Attachments`.
/// The Attachments container holds one file plus 6 bytes of Void slack.
fn build_movie() -> MovieFixture {
    let info = elem(
        INFO,
        &concat(&[
            elem(TIMECODE_SCALE, &[0x0F, 0x42, 0x40]),
            elem(MUXING_APP, b"mux"),
            elem(WRITING_APP, b"wr"),
            elem(TITLE, b"YY"),
            void(4),
        ]),
    );
    let cluster = elem(
        CLUSTER,
        &concat(&[elem(TIMECODE, &[0]), elem(SIMPLE_BLOCK, &[0x5A; 64])]),
    );
    let attached = elem(
        ATTACHED_FILE,
        &concat(&[
            elem(FILE_NAME, "logo.png".as_bytes()),
            elem(FILE_MIME_TYPE, b"image/png"),
            elem(FILE_DATA, &[0xAA; 16]),
            elem(FILE_UID, &[0x07]),
        ]),
    );
    let attachments = elem_wide(ATTACHMENTS, &concat(&[attached, void(6)]), 4);

    // The SeekHead's size does not depend on the entry values (positions
    // are fixed 8-byte payloads), so probe it once to learn the offsets.
    let probe = seek_head(&[(INFO, 0), (ATTACHMENTS, 0)]);
    let info_rel = probe.len() as u64;
    let pad = void(64);
    let cluster_rel = info_rel + info.len() as u64 + pad.len() as u64;
    let attachments_rel = cluster_rel + cluster.len() as u64;
    let sh = seek_head(&[(INFO, info_rel), (ATTACHMENTS, attachments_rel)]);
    assert_eq!(sh.len(), probe.len());

    let payload = concat(&[sh, info.clone(), pad, cluster.clone(), attachments.clone()]);
    let segment = elem_wide(SEGMENT, &payload, 8);
    let header = ebml_header();
    let segment_pos = header.len() as u64;
    let data_abs = segment_pos + 4 + 8;
    MovieFixture {
        bytes: concat(&[header, segment]),
        segment_pos,
        data_abs,
        info_rel,
        info_total: info.len() as u64,
        cluster_rel,
        cluster_total: cluster.len() as u64,
        attachments_rel,
        attachments_total: attachments.len() as u64,
    }
}

// ===========================================================================
// A byte source that records every write
// ===========================================================================

#[derive(Clone, Default)]
struct RecordingSource {
    data: Arc<Mutex<MemorySource>>,
    writes: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl RecordingSource {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(MemorySource::from(bytes))),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        self.data.lock().unwrap().data().to_vec()
    }

    fn writes(&self) -> Vec<(u64, u64)> {
        self.writes.lock().unwrap().clone()
    }

    fn writes_intersecting(&self, start: u64, end: u64) -> Vec<(u64, u64)> {
        self.writes()
            .into_iter()
            .filter(|&(off, len)| off < end && off + len > start)
            .collect()
    }
}

impl ByteSource for RecordingSource {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> mkedit::Result<usize> {
        self.data.lock().unwrap().read_at(buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> mkedit::Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((offset, buf.len() as u64));
        self.data.lock().unwrap().write_at(buf, offset)
    }

    fn len(&mut self) -> mkedit::Result<u64> {
        self.data.lock().unwrap().len()
    }

    fn set_len(&mut self, len: u64) -> mkedit::Result<()> {
        self.data.lock().unwrap().set_len(len)
    }
}

fn open_fixture(bytes: Vec<u8>) -> EbmlFile {
    EbmlFile::from_source(Box::new(MemorySource::from(bytes)), SchemaRegistry::matroska())
        .expect("fixture opens")
}

// ===========================================================================
// 1. ROUND-TRIP IDENTITY
// ===========================================================================

#[test]
fn minimal_file_roundtrips_byte_identical() {
    let bytes = ebml_header();
    let mut file = open_fixture(bytes.clone());

    assert_eq!(file.children().len(), 1);
    assert_eq!(file.children()[0].children().len(), 1);
    assert!(file.summary().contains("1 top-level element"));
    assert!(file
        .print_children(None)
        .contains("EBMLVersion"));
    assert!(!file.is_dirty());

    let mut dest = MemorySource::new();
    file.save_changes(&mut dest).unwrap();
    assert_eq!(dest.data(), &bytes[..], "unmutated save is byte-identical");
}

#[test]
fn movie_roundtrips_byte_identical_after_summary_read() {
    let fixture = build_movie();
    let mut file = open_fixture(fixture.bytes.clone());
    assert!(!file.is_dirty());

    let mut dest = MemorySource::new();
    file.save_changes(&mut dest).unwrap();
    assert_eq!(dest.data(), &fixture.bytes[..]);
}

#[test]
fn movie_roundtrips_byte_identical_after_full_read() {
    let fixture = build_movie();
    let mut file = open_fixture(fixture.bytes.clone());
    file.read_all().unwrap();

    // The cluster contents are now parsed elements.
    let segment = file.child_named("Segment").unwrap();
    let cluster = segment.child_named("Cluster").unwrap();
    assert!(cluster.child_named("Timecode").is_some());
    assert!(!file.is_dirty());

    let mut dest = MemorySource::new();
    file.save_changes(&mut dest).unwrap();
    assert_eq!(dest.data(), &fixture.bytes[..]);
}

#[test]
fn summary_read_finds_metadata_and_freezes_media() {
    let fixture = build_movie();
    let file = open_fixture(fixture.bytes.clone());

    let segment = file.child_named("Segment").unwrap();
    assert!(segment.child_named("Info").is_some());
    assert!(segment.child_named("Attachments").is_some());
    assert!(
        segment.child_named("Cluster").is_none(),
        "summary mode does not load clusters"
    );
    assert_eq!(
        segment.media_extents(),
        vec![(fixture.cluster_rel, fixture.cluster_rel + fixture.cluster_total)]
    );

    let summary = file.summary();
    assert!(summary.contains("\"YY\""), "title shown: {summary}");
    assert!(summary.contains("logo.png"), "attachment shown: {summary}");
}

// ===========================================================================
// 2. IN-PLACE VALUE EDIT
// ===========================================================================

#[test]
fn title_edit_shrinks_and_pads_with_void() {
    let fixture = build_movie();
    let source = RecordingSource::new(fixture.bytes.clone());
    let mut file =
        EbmlFile::from_source(Box::new(source.clone()), SchemaRegistry::matroska()).unwrap();
    let registry = file.registry().clone();

    let segment = file.segment_mut().unwrap();
    segment.set_title("X", &registry).unwrap();
    {
        let info = segment.child_named("Info").unwrap();
        let title = info.child_named("Title").unwrap();
        assert_eq!(title.size(), 1, "re-encoded title shrank by one byte");
        assert!(info.check_consecutive().is_err(), "one-byte gap opened");
    }

    // Rearranging absorbs the gap into the adjacent Void, which grows from
    // 4 to 5 total bytes. The Info payload size is unchanged.
    let info = segment.child_named_mut("Info").unwrap();
    let info_size = info.size();
    info.rearrange(&RearrangeOptions::default(), &registry)
        .unwrap();
    assert_eq!(info.size(), info_size);
    let voids: Vec<_> = info.children_named("Void").collect();
    assert_eq!(voids.len(), 1);
    assert_eq!(voids[0].total_size(), 5);

    assert!(segment.check_consecutive().is_ok());
    file.save_in_place().unwrap();

    // Only the Info subtree (plus the dirty segment's header) was written.
    let info_abs = fixture.data_abs + fixture.info_rel;
    let info_end = info_abs + fixture.info_total;
    let seg_header_end = fixture.segment_pos + 12;
    for (off, len) in source.writes() {
        let inside_info = off >= info_abs && off + len <= info_end;
        let inside_seg_header = off >= fixture.segment_pos && off + len <= seg_header_end;
        assert!(
            inside_info || inside_seg_header,
            "write at {off}+{len} outside the dirty region"
        );
    }

    // The clusters were not touched, and the edit is visible on re-open.
    let cluster_abs = fixture.data_abs + fixture.cluster_rel;
    assert!(source
        .writes_intersecting(cluster_abs, cluster_abs + fixture.cluster_total)
        .is_empty());
    let reopened = open_fixture(source.bytes());
    assert_eq!(
        reopened.child_named("Segment").unwrap().title(),
        Some("X")
    );
}

#[test]
fn unchanged_atomic_passes_through_nonminimal_encoding() {
    // A Title stored with a padding NUL decodes to "YY" but must be
    // reproduced bit-exactly as long as the value is not changed.
    let info = elem(INFO, &elem_wide(TITLE, b"YY\0", 2));
    let bytes = concat(&[ebml_header(), elem(SEGMENT, &info)]);
    let mut file = open_fixture(bytes.clone());

    let mut dest = MemorySource::new();
    file.save_changes(&mut dest).unwrap();
    assert_eq!(dest.data(), &bytes[..]);
}

// ===========================================================================
// 3. ATTACHMENT ADDITION
// ===========================================================================

#[test]
fn attachment_addition_overflows_then_normalize_grows_tail() {
    let fixture = build_movie();
    let source = RecordingSource::new(fixture.bytes.clone());
    let mut file =
        EbmlFile::from_source(Box::new(source.clone()), SchemaRegistry::matroska()).unwrap();
    let registry = file.registry().clone();

    let segment = file.segment_mut().unwrap();
    let added_total = {
        let af = segment
            .add_attachment("notes.txt", "text/plain", Some("release notes"), &registry)
            .unwrap();
        af.total_size()
    };

    // The container now overflows its payload.
    assert!(file.print_space().contains("***OVERFLOW***"));

    let segment = file.segment_mut().unwrap();
    segment
        .normalize(&registry, &mkedit::NormalizeOptions::default())
        .unwrap();

    // The slack Void was consumed and the container grew by the remainder.
    let attachments = segment.child_named("Attachments").unwrap();
    assert_eq!(
        attachments.total_size(),
        fixture.attachments_total + added_total - 6
    );
    assert_eq!(
        attachments.pos_relative(),
        fixture.attachments_rel,
        "the tail grows in place, right after the media region"
    );

    // The SeekHead agrees with the layout.
    for (id, pos) in segment.seek_entries() {
        let child = segment
            .children()
            .iter()
            .find(|c| c.pos_relative() == pos)
            .unwrap_or_else(|| panic!("no child at seek position {pos}"));
        assert_eq!(child.id(), id, "seek entry for {child}");
    }

    file.save_in_place().unwrap();

    // The media region kept its bytes and its position.
    let cluster_abs = fixture.data_abs + fixture.cluster_rel;
    let cluster_end = cluster_abs + fixture.cluster_total;
    assert!(source.writes_intersecting(cluster_abs, cluster_end).is_empty());
    #[allow(clippy::cast_possible_truncation)]
    let range = cluster_abs as usize..cluster_end as usize;
    assert_eq!(&source.bytes()[range.clone()], &fixture.bytes[range]);

    // Both attachments are visible on re-open.
    let reopened = open_fixture(source.bytes());
    let segment = reopened.child_named("Segment").unwrap();
    let names: Vec<_> = segment
        .children_named("Attachments")
        .flat_map(|a| a.children_named("AttachedFile"))
        .filter_map(|af| af.file_name())
        .collect();
    assert_eq!(names, vec!["logo.png", "notes.txt"]);
}

#[test]
fn unchanged_attached_file_is_not_rewritten() {
    let fixture = build_movie();
    let source = RecordingSource::new(fixture.bytes.clone());
    let mut file =
        EbmlFile::from_source(Box::new(source.clone()), SchemaRegistry::matroska()).unwrap();
    let registry = file.registry().clone();

    let segment = file.segment_mut().unwrap();
    segment
        .add_attachment("notes.txt", "text/plain", None, &registry)
        .unwrap();
    segment
        .normalize(&registry, &mkedit::NormalizeOptions::default())
        .unwrap();
    file.save_in_place().unwrap();

    // The original attachment sits at the same offset with clean content;
    // its payload must not be among the written ranges.
    let attachments_abs = fixture.data_abs + fixture.attachments_rel;
    // Skip the container header (4-byte ID plus 4-byte size field): the
    // container itself was resized, so its header is legitimately dirty.
    let first_file_abs = attachments_abs + 8;
    let first_file_end = attachments_abs + fixture.attachments_total - 6;
    assert!(
        source
            .writes_intersecting(first_file_abs, first_file_end)
            .is_empty(),
        "existing attachment was rewritten"
    );
}

// ===========================================================================
// 4. SCHEMA VIOLATION BLOCKS THE SAVE
// ===========================================================================

#[test]
fn missing_required_child_blocks_save_before_any_write() {
    // A segment holding only media: the mandatory Info is absent.
    let cluster = elem(
        CLUSTER,
        &concat(&[elem(TIMECODE, &[0]), elem(SIMPLE_BLOCK, &[0x11; 8])]),
    );
    let bytes = concat(&[ebml_header(), elem_wide(SEGMENT, &cluster, 8)]);
    let mut file = open_fixture(bytes);

    let mut dest = MemorySource::new();
    let err = file.save_changes(&mut dest).unwrap_err();
    assert!(matches!(
        err,
        EbmlError::Schema(SchemaViolation::MissingRequired { ref name, .. }) if name == "Info"
    ));
    assert_eq!(dest.len().unwrap(), 0, "no bytes were written");
}

#[test]
fn out_of_range_value_on_disk_fails_consistency() {
    // A file declaring a zero timestamp scale (the minimum is 1). The
    // mutation API refuses such values, but a file can arrive with one;
    // the consistency check catches it before a save writes anything.
    let info = elem(INFO, &elem(TIMECODE_SCALE, &[0x00]));
    let bytes = concat(&[ebml_header(), elem(SEGMENT, &info)]);
    let mut file = open_fixture(bytes.clone());

    let mut dest = MemorySource::new();
    let err = file.save_changes(&mut dest).unwrap_err();
    assert!(matches!(
        err,
        EbmlError::Schema(SchemaViolation::BadValue { ref name, .. }) if name == "TimecodeScale"
    ));
    assert_eq!(dest.len().unwrap(), 0);
}

// ===========================================================================
// 5. UNKNOWN IDS
// ===========================================================================

#[test]
fn unknown_id_passes_through_and_refuses_mutation() {
    // 0x4F21 is not part of the dictionary.
    let mystery = elem(0x4F21, &[1, 2, 3, 4, 5]);
    let bytes = concat(&[ebml_header(), mystery]);
    let mut file = open_fixture(bytes.clone());

    let unknown = &file.children()[1];
    assert!(unknown.is_unsupported());
    assert_eq!(unknown.size(), 5);

    let mut dest = MemorySource::new();
    file.save_changes(&mut dest).unwrap();
    assert_eq!(dest.data(), &bytes[..], "opaque passthrough is bit-exact");

    let registry = file.registry().clone();
    let unknown = &mut file.children_mut()[1];
    assert!(matches!(
        unknown.set_value(EbmlValue::Binary(vec![9]), &registry),
        Err(EbmlError::Unsupported { .. })
    ));
    assert!(matches!(
        unknown.resize(9),
        Err(EbmlError::Unsupported { .. })
    ));
}

// ===========================================================================
// 6. DIRTINESS
// ===========================================================================

#[test]
fn dirtiness_propagates_to_every_ancestor() {
    let fixture = build_movie();
    let mut file = open_fixture(fixture.bytes);
    let registry = file.registry().clone();
    assert!(!file.is_dirty());

    let segment = file.segment_mut().unwrap();
    segment.set_title("deep edit", &registry).unwrap();

    let segment = file.child_named("Segment").unwrap();
    assert!(segment.is_dirty(), "segment reports a dirty descendant");
    assert!(
        segment.child_named("Info").unwrap().is_dirty(),
        "info reports a dirty child"
    );
    assert!(file.is_dirty(), "the file root is dirty");
}

#[test]
fn in_place_edit_on_a_real_file() {
    let fixture = build_movie();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movie.mkv");
    std::fs::write(&path, &fixture.bytes).unwrap();

    let mut file = EbmlFile::open(&path).unwrap();
    let registry = file.registry().clone();
    let segment = file.segment_mut().unwrap();
    segment.set_title("X", &registry).unwrap();
    segment
        .child_named_mut("Info")
        .unwrap()
        .rearrange(&RearrangeOptions::default(), &registry)
        .unwrap();
    file.save_in_place().unwrap();
    drop(file);

    let saved = std::fs::read(&path).unwrap();
    assert_eq!(saved.len(), fixture.bytes.len(), "file size unchanged");
    #[allow(clippy::cast_possible_truncation)]
    let cluster = (fixture.data_abs + fixture.cluster_rel) as usize
        ..(fixture.data_abs + fixture.cluster_rel + fixture.cluster_total) as usize;
    assert_eq!(&saved[cluster.clone()], &fixture.bytes[cluster]);

    let reopened = EbmlFile::open(&path).unwrap();
    assert_eq!(reopened.child_named("Segment").unwrap().title(), Some("X"));
}

#[test]
fn cancellation_stops_a_save_before_it_writes() {
    let fixture = build_movie();
    let mut file = open_fixture(fixture.bytes);
    let registry = file.registry().clone();
    file.segment_mut()
        .unwrap()
        .set_title("doomed", &registry)
        .unwrap();

    file.cancel_token().cancel();
    let mut dest = MemorySource::new();
    let err = file.save_changes(&mut dest).unwrap_err();
    assert!(matches!(err, EbmlError::Cancelled));
    assert_eq!(dest.len().unwrap(), 0);
}
