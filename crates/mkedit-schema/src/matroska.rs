//! The built-in Matroska element table.
//!
//! This covers the elements the library itself needs: the EBML header
//! family, the Segment and its level-1 children, and the metadata subtrees
//! the editing operations touch. Cluster internals are deliberately thin;
//! summary reads never descend into them.

use mkedit_types::{EbmlValue, ElementId};

use crate::ids;
use crate::{ElementDef, ElementKind, ParentRule};

use ElementKind::{Ascii, Binary, Date, Float, Master, Unsigned, Utf8, Void};

fn id(raw: u32) -> ElementId {
    ElementId::new(raw).expect("table IDs are valid")
}

fn def(raw: u32, name: &str, kind: ElementKind, parents: ParentRule) -> ElementDef {
    ElementDef::new(id(raw), name, kind, parents)
}

fn under(parent: ElementId) -> ParentRule {
    ParentRule::Within(vec![parent])
}

#[allow(clippy::too_many_lines)]
pub(crate) fn defs() -> Vec<ElementDef> {
    let mut defs = Vec::new();

    // Global elements.
    defs.push(def(0xEC, "Void", Void, ParentRule::Any));
    defs.push(def(0xBF, "CRC-32", Binary, ParentRule::Any).unique());

    // EBML header.
    defs.push(
        def(0x1A45_DFA3, "EBML", Master, ParentRule::TopLevel)
            .required()
            .unique(),
    );
    defs.push(
        def(0x4286, "EBMLVersion", Unsigned, under(ids::EBML))
            .with_default(EbmlValue::Unsigned(1))
            .unique(),
    );
    defs.push(
        def(0x42F7, "EBMLReadVersion", Unsigned, under(ids::EBML))
            .with_default(EbmlValue::Unsigned(1))
            .unique(),
    );
    defs.push(
        def(0x42F2, "EBMLMaxIDLength", Unsigned, under(ids::EBML))
            .with_default(EbmlValue::Unsigned(4))
            .unique(),
    );
    defs.push(
        def(0x42F3, "EBMLMaxSizeLength", Unsigned, under(ids::EBML))
            .with_default(EbmlValue::Unsigned(8))
            .unique(),
    );
    defs.push(
        def(0x4282, "DocType", Ascii, under(ids::EBML))
            .with_default(EbmlValue::Ascii("matroska".to_owned()))
            .unique(),
    );
    defs.push(
        def(0x4287, "DocTypeVersion", Unsigned, under(ids::EBML))
            .with_default(EbmlValue::Unsigned(1))
            .unique(),
    );
    defs.push(
        def(0x4285, "DocTypeReadVersion", Unsigned, under(ids::EBML))
            .with_default(EbmlValue::Unsigned(1))
            .unique(),
    );

    // Segment. The size field is kept wide so the segment can grow without
    // moving its children.
    defs.push(def(0x1853_8067, "Segment", Master, ParentRule::TopLevel).header_len_min(8));

    // SeekHead.
    defs.push(def(0x114D_9B74, "SeekHead", Master, under(ids::SEGMENT)));
    defs.push(def(0x4DBB, "Seek", Master, under(ids::SEEK_HEAD)).required());
    defs.push(
        def(0x53AB, "SeekID", Binary, under(ids::SEEK))
            .required()
            .unique(),
    );
    defs.push(
        def(0x53AC, "SeekPosition", Unsigned, under(ids::SEEK))
            .required()
            .unique()
            .data_len_min(8),
    );

    // Info.
    defs.push(def(0x1549_A966, "Info", Master, under(ids::SEGMENT)).required());
    defs.push(def(0x73A4, "SegmentUID", Binary, under(ids::INFO)).unique());
    defs.push(
        def(0x2A_D7B1, "TimecodeScale", Unsigned, under(ids::INFO))
            .with_default(EbmlValue::Unsigned(1_000_000))
            .with_range(Some(1.0), None)
            .unique(),
    );
    defs.push(
        def(0x4489, "Duration", Float, under(ids::INFO))
            .with_range(Some(0.0), None)
            .unique(),
    );
    defs.push(def(0x4461, "DateUTC", Date, under(ids::INFO)).unique());
    defs.push(def(0x7BA9, "Title", Utf8, under(ids::INFO)).unique());
    defs.push(def(0x4D80, "MuxingApp", Utf8, under(ids::INFO)).unique());
    defs.push(def(0x5741, "WritingApp", Utf8, under(ids::INFO)).unique());

    // Tracks.
    defs.push(def(0x1654_AE6B, "Tracks", Master, under(ids::SEGMENT)));
    defs.push(def(0xAE, "TrackEntry", Master, under(ids::TRACKS)).required());
    defs.push(
        def(0xD7, "TrackNumber", Unsigned, under(ids::TRACK_ENTRY))
            .required()
            .unique()
            .with_range(Some(1.0), None),
    );
    defs.push(
        def(0x73C5, "TrackUID", Unsigned, under(ids::TRACK_ENTRY))
            .required()
            .unique()
            .with_range(Some(1.0), None),
    );
    defs.push(
        def(0x83, "TrackType", Unsigned, under(ids::TRACK_ENTRY))
            .required()
            .unique()
            .with_range(Some(1.0), Some(254.0)),
    );
    defs.push(
        def(0xB9, "FlagEnabled", Unsigned, under(ids::TRACK_ENTRY))
            .with_default(EbmlValue::Unsigned(1))
            .with_range(Some(0.0), Some(1.0))
            .unique(),
    );
    defs.push(
        def(0x88, "FlagDefault", Unsigned, under(ids::TRACK_ENTRY))
            .with_default(EbmlValue::Unsigned(1))
            .with_range(Some(0.0), Some(1.0))
            .unique(),
    );
    defs.push(
        def(0x55AA, "FlagForced", Unsigned, under(ids::TRACK_ENTRY))
            .with_default(EbmlValue::Unsigned(0))
            .with_range(Some(0.0), Some(1.0))
            .unique(),
    );
    defs.push(
        def(0x9C, "FlagLacing", Unsigned, under(ids::TRACK_ENTRY))
            .with_default(EbmlValue::Unsigned(1))
            .with_range(Some(0.0), Some(1.0))
            .unique(),
    );
    defs.push(def(0x536E, "Name", Utf8, under(ids::TRACK_ENTRY)).unique());
    defs.push(
        def(0x22_B59C, "Language", Ascii, under(ids::TRACK_ENTRY))
            .with_default(EbmlValue::Ascii("eng".to_owned()))
            .unique(),
    );
    defs.push(
        def(0x86, "CodecID", Ascii, under(ids::TRACK_ENTRY))
            .required()
            .unique(),
    );
    defs.push(def(0x25_8688, "CodecName", Utf8, under(ids::TRACK_ENTRY)).unique());

    // Video and audio settings.
    defs.push(def(0xE0, "Video", Master, under(ids::TRACK_ENTRY)).unique());
    defs.push(
        def(0xB0, "PixelWidth", Unsigned, under(ids::VIDEO))
            .required()
            .unique()
            .with_range(Some(1.0), None),
    );
    defs.push(
        def(0xBA, "PixelHeight", Unsigned, under(ids::VIDEO))
            .required()
            .unique()
            .with_range(Some(1.0), None),
    );
    defs.push(def(0x54B0, "DisplayWidth", Unsigned, under(ids::VIDEO)).unique());
    defs.push(def(0x54BA, "DisplayHeight", Unsigned, under(ids::VIDEO)).unique());
    defs.push(
        def(0x9A, "FlagInterlaced", Unsigned, under(ids::VIDEO))
            .with_default(EbmlValue::Unsigned(0))
            .unique(),
    );

    defs.push(def(0xE1, "Audio", Master, under(ids::TRACK_ENTRY)).unique());
    defs.push(
        def(0xB5, "SamplingFrequency", Float, under(ids::AUDIO))
            .with_default(EbmlValue::Float(8000.0))
            .with_range(Some(0.0), None)
            .unique(),
    );
    defs.push(
        def(0x78B5, "OutputSamplingFrequency", Float, under(ids::AUDIO))
            .with_range(Some(0.0), None)
            .unique(),
    );
    defs.push(
        def(0x9F, "Channels", Unsigned, under(ids::AUDIO))
            .with_default(EbmlValue::Unsigned(1))
            .with_range(Some(1.0), None)
            .unique(),
    );
    defs.push(
        def(0x6264, "BitDepth", Unsigned, under(ids::AUDIO))
            .with_range(Some(1.0), None)
            .unique(),
    );

    // Clusters hold the media payload. Summary reads never descend into
    // them, and the editing passes treat their extents as frozen.
    defs.push(def(0x1F43_B675, "Cluster", Master, under(ids::SEGMENT)).deferred());
    defs.push(
        def(0xE7, "Timecode", Unsigned, under(ids::CLUSTER))
            .required()
            .unique(),
    );
    defs.push(def(0xA3, "SimpleBlock", Binary, under(ids::CLUSTER)));

    // Cues are position-sensitive index data and are likewise deferred.
    defs.push(def(0x1C53_BB6B, "Cues", Master, under(ids::SEGMENT)).unique().deferred());
    defs.push(def(0xBB, "CuePoint", Master, under(ids::CUES)).required());
    defs.push(
        def(0xB3, "CueTime", Unsigned, under(id(0xBB)))
            .required()
            .unique(),
    );
    defs.push(def(0xB7, "CueTrackPositions", Master, under(id(0xBB))).required());
    defs.push(
        def(0xF7, "CueTrack", Unsigned, under(id(0xB7)))
            .required()
            .unique()
            .with_range(Some(1.0), None),
    );
    defs.push(
        def(0xF1, "CueClusterPosition", Unsigned, under(id(0xB7)))
            .required()
            .unique(),
    );

    // Attachments. The containers keep a wide size field so attachment
    // payloads can grow in place.
    defs.push(
        def(0x1941_A469, "Attachments", Master, under(ids::SEGMENT))
            .unique()
            .header_len_min(4),
    );
    defs.push(
        def(0x61A7, "AttachedFile", Master, under(ids::ATTACHMENTS))
            .required()
            .header_len_min(4),
    );
    defs.push(def(0x467E, "FileDescription", Utf8, under(ids::ATTACHED_FILE)).unique());
    defs.push(
        def(0x466E, "FileName", Utf8, under(ids::ATTACHED_FILE))
            .required()
            .unique(),
    );
    defs.push(
        def(0x4660, "FileMimeType", Ascii, under(ids::ATTACHED_FILE))
            .required()
            .unique(),
    );
    defs.push(
        def(0x465C, "FileData", Binary, under(ids::ATTACHED_FILE))
            .required()
            .unique(),
    );
    defs.push(
        def(0x46AE, "FileUID", Unsigned, under(ids::ATTACHED_FILE))
            .required()
            .unique()
            .with_range(Some(1.0), None),
    );

    // Chapters.
    defs.push(def(0x1043_A770, "Chapters", Master, under(ids::SEGMENT)).unique());
    defs.push(def(0x45B9, "EditionEntry", Master, under(ids::CHAPTERS)).required());
    defs.push(def(0x45BC, "EditionUID", Unsigned, under(id(0x45B9))).unique());
    defs.push(
        def(0x45BD, "EditionFlagHidden", Unsigned, under(id(0x45B9)))
            .with_default(EbmlValue::Unsigned(0))
            .unique(),
    );
    defs.push(
        def(0x45DB, "EditionFlagDefault", Unsigned, under(id(0x45B9)))
            .with_default(EbmlValue::Unsigned(0))
            .unique(),
    );
    defs.push(
        def(0xB6, "ChapterAtom", Master, under(id(0x45B9)))
            .required()
            .recursive(),
    );
    defs.push(
        def(0x73C4, "ChapterUID", Unsigned, under(id(0xB6)))
            .required()
            .unique()
            .with_range(Some(1.0), None),
    );
    defs.push(
        def(0x91, "ChapterTimeStart", Unsigned, under(id(0xB6)))
            .required()
            .unique(),
    );
    defs.push(def(0x92, "ChapterTimeEnd", Unsigned, under(id(0xB6))).unique());
    defs.push(def(0x80, "ChapterDisplay", Master, under(id(0xB6))));
    defs.push(def(0x85, "ChapString", Utf8, under(id(0x80))).required());
    defs.push(
        def(0x43_7C, "ChapLanguage", Ascii, under(id(0x80)))
            .with_default(EbmlValue::Ascii("eng".to_owned())),
    );

    // Tags.
    defs.push(def(0x1254_C367, "Tags", Master, under(ids::SEGMENT)));
    defs.push(def(0x7373, "Tag", Master, under(ids::TAGS)).required());
    defs.push(
        def(0x63C0, "Targets", Master, under(id(0x7373)))
            .required()
            .unique(),
    );
    defs.push(
        def(0x68CA, "TargetTypeValue", Unsigned, under(id(0x63C0)))
            .with_default(EbmlValue::Unsigned(50)),
    );
    defs.push(def(0x63CA, "TargetType", Ascii, under(id(0x63C0))).unique());
    defs.push(
        def(0x67C8, "SimpleTag", Master, under(id(0x7373)))
            .required()
            .recursive(),
    );
    defs.push(
        def(0x45A3, "TagName", Utf8, under(id(0x67C8)))
            .required()
            .unique(),
    );
    defs.push(
        def(0x447A, "TagLanguage", Ascii, under(id(0x67C8)))
            .with_default(EbmlValue::Ascii("und".to_owned()))
            .unique(),
    );
    defs.push(
        def(0x4484, "TagDefault", Unsigned, under(id(0x67C8)))
            .with_default(EbmlValue::Unsigned(1))
            .with_range(Some(0.0), Some(1.0))
            .unique(),
    );
    defs.push(def(0x4487, "TagString", Utf8, under(id(0x67C8))).unique());
    defs.push(def(0x4485, "TagBinary", Binary, under(id(0x67C8))).unique());

    defs
}
