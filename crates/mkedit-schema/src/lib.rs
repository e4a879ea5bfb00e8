//! Element dictionary.
//!
//! The dictionary maps element IDs to everything the core needs to know
//! about them: name, primitive kind, default value, permitted value range,
//! allowed parents, cardinality flags, and whether summary reads should
//! skip the element's children. The core consumes it read-only; an ID
//! absent from the table makes the reader construct an opaque unsupported
//! element.
//!
//! A built-in Matroska table ships in [`matroska`]; external tables load
//! from JSON via [`SchemaRegistry::from_json`].

mod matroska;

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use mkedit_types::{AtomKind, EbmlValue, ElementId};

/// The well-known Void ID, permitted under any parent.
pub const VOID_ID: ElementId = ids::VOID;

/// IDs for the elements the library itself needs to recognize.
pub mod ids {
    use mkedit_types::ElementId;

    const fn id(raw: u32) -> ElementId {
        match ElementId::new(raw) {
            Some(v) => v,
            None => panic!("invalid element ID constant"),
        }
    }

    pub const EBML: ElementId = id(0x1A45_DFA3);
    pub const EBML_VERSION: ElementId = id(0x4286);
    pub const EBML_READ_VERSION: ElementId = id(0x42F7);
    pub const EBML_MAX_ID_LENGTH: ElementId = id(0x42F2);
    pub const EBML_MAX_SIZE_LENGTH: ElementId = id(0x42F3);
    pub const DOC_TYPE: ElementId = id(0x4282);
    pub const DOC_TYPE_VERSION: ElementId = id(0x4287);
    pub const DOC_TYPE_READ_VERSION: ElementId = id(0x4285);

    pub const VOID: ElementId = id(0xEC);
    pub const CRC32: ElementId = id(0xBF);

    pub const SEGMENT: ElementId = id(0x1853_8067);
    pub const SEEK_HEAD: ElementId = id(0x114D_9B74);
    pub const SEEK: ElementId = id(0x4DBB);
    pub const SEEK_ID: ElementId = id(0x53AB);
    pub const SEEK_POSITION: ElementId = id(0x53AC);

    pub const INFO: ElementId = id(0x1549_A966);
    pub const SEGMENT_UID: ElementId = id(0x73A4);
    pub const TIMECODE_SCALE: ElementId = id(0x2A_D7B1);
    pub const DURATION: ElementId = id(0x4489);
    pub const DATE_UTC: ElementId = id(0x4461);
    pub const TITLE: ElementId = id(0x7BA9);
    pub const MUXING_APP: ElementId = id(0x4D80);
    pub const WRITING_APP: ElementId = id(0x5741);

    pub const TRACKS: ElementId = id(0x1654_AE6B);
    pub const TRACK_ENTRY: ElementId = id(0xAE);
    pub const TRACK_NUMBER: ElementId = id(0xD7);
    pub const TRACK_UID: ElementId = id(0x73C5);
    pub const TRACK_TYPE: ElementId = id(0x83);
    pub const CODEC_ID: ElementId = id(0x86);
    pub const VIDEO: ElementId = id(0xE0);
    pub const AUDIO: ElementId = id(0xE1);

    pub const CLUSTER: ElementId = id(0x1F43_B675);
    pub const CUES: ElementId = id(0x1C53_BB6B);

    pub const ATTACHMENTS: ElementId = id(0x1941_A469);
    pub const ATTACHED_FILE: ElementId = id(0x61A7);
    pub const FILE_DESCRIPTION: ElementId = id(0x467E);
    pub const FILE_NAME: ElementId = id(0x466E);
    pub const FILE_MIME_TYPE: ElementId = id(0x4660);
    pub const FILE_DATA: ElementId = id(0x465C);
    pub const FILE_UID: ElementId = id(0x46AE);

    pub const CHAPTERS: ElementId = id(0x1043_A770);
    pub const TAGS: ElementId = id(0x1254_C367);
}

/// Primitive kind of an element's payload, Master and Void included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Master,
    Unsigned,
    Signed,
    Float,
    Ascii,
    Utf8,
    Date,
    Binary,
    Void,
}

impl ElementKind {
    /// The payload codec kind, or `None` for Master and Void.
    #[must_use]
    pub const fn atom(self) -> Option<AtomKind> {
        match self {
            Self::Unsigned => Some(AtomKind::Unsigned),
            Self::Signed => Some(AtomKind::Signed),
            Self::Float => Some(AtomKind::Float),
            Self::Ascii => Some(AtomKind::Ascii),
            Self::Utf8 => Some(AtomKind::Utf8),
            Self::Date => Some(AtomKind::Date),
            Self::Binary => Some(AtomKind::Binary),
            Self::Master | Self::Void => None,
        }
    }

    #[must_use]
    pub const fn is_master(self) -> bool {
        matches!(self, Self::Master)
    }
}

/// Where an element is allowed to appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRule {
    /// Anywhere, including the top level (Void, CRC-32).
    Any,
    /// Only at the top level of a file.
    TopLevel,
    /// Only under the named parents.
    Within(Vec<ElementId>),
}

/// One entry of the dictionary.
#[derive(Debug, Clone)]
pub struct ElementDef {
    pub id: ElementId,
    pub name: String,
    pub kind: ElementKind,
    pub parents: ParentRule,
    /// Default value for atomics. An element with a default is never
    /// treated as mandatory, because readers can always supply the value.
    pub default: Option<EbmlValue>,
    /// Inclusive lower bound for integers, exclusive for floats.
    pub min_val: Option<f64>,
    /// Inclusive upper bound for integers, exclusive for floats.
    pub max_val: Option<f64>,
    pub required: bool,
    pub unique: bool,
    pub recursive: bool,
    /// Summary reads skip this master's children.
    pub defer: bool,
    /// Reserve at least this many bytes for the encoded size field.
    pub header_len_min: u8,
    /// Reserve at least this many payload bytes.
    pub data_len_min: u64,
}

impl ElementDef {
    #[must_use]
    pub fn new(id: ElementId, name: &str, kind: ElementKind, parents: ParentRule) -> Self {
        Self {
            id,
            name: name.to_owned(),
            kind,
            parents,
            default: None,
            min_val: None,
            max_val: None,
            required: false,
            unique: false,
            recursive: false,
            defer: false,
            header_len_min: 0,
            data_len_min: 0,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: EbmlValue) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_val = min;
        self.max_val = max;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.defer = true;
        self
    }

    #[must_use]
    pub fn header_len_min(mut self, len: u8) -> Self {
        self.header_len_min = len;
        self
    }

    #[must_use]
    pub fn data_len_min(mut self, len: u64) -> Self {
        self.data_len_min = len;
        self
    }

    /// Whether this element must be present under its parent. An element
    /// with a default value is never mandatory.
    #[must_use]
    pub fn mandatory(&self) -> bool {
        self.required && self.default.is_none()
    }

    /// Whether this element may appear under `parent` (`None` = top level).
    #[must_use]
    pub fn allowed_under(&self, parent: Option<ElementId>) -> bool {
        match (&self.parents, parent) {
            (ParentRule::Any, _) => true,
            (ParentRule::TopLevel, None) => true,
            (ParentRule::TopLevel, Some(_)) => false,
            (ParentRule::Within(_), None) => false,
            (ParentRule::Within(ids), Some(p)) => {
                ids.contains(&p) || (self.recursive && p == self.id)
            }
        }
    }

    /// Check a value against the declared range. Bounds are inclusive for
    /// integers and strict for floats.
    pub fn check_range(&self, value: &EbmlValue) -> Result<(), String> {
        let Some(num) = value.to_f64() else {
            return Ok(());
        };
        let strict = matches!(self.kind, ElementKind::Float);
        if let Some(min) = self.min_val {
            if num < min || (strict && num <= min) {
                return Err(format!("value {num} below minimum {min}"));
            }
        }
        if let Some(max) = self.max_val {
            if num > max || (strict && num >= max) {
                return Err(format!("value {num} above maximum {max}"));
            }
        }
        Ok(())
    }
}

/// Failure to load an external dictionary.
#[derive(Error, Debug)]
pub enum SchemaLoadError {
    #[error("invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad element definition {name}: {detail}")]
    BadDef { name: String, detail: String },
}

/// The read-only dictionary, indexed by ID and by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    defs: Vec<ElementDef>,
    by_id: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    /// An empty dictionary; every ID is unsupported.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in Matroska table.
    #[must_use]
    pub fn matroska() -> Self {
        let mut registry = Self::empty();
        for def in matroska::defs() {
            registry.insert(def);
        }
        registry
    }

    /// Load a dictionary from a JSON array of element definitions.
    ///
    /// Each entry needs `id`, `name`, and `kind`; `parents` is either the
    /// string `"*"`, an array of parent IDs, or absent for top-level
    /// elements. The remaining fields mirror [`ElementDef`].
    pub fn from_json(json: &str) -> Result<Self, SchemaLoadError> {
        let raw: Vec<RawDef> = serde_json::from_str(json)?;
        let mut registry = Self::empty();
        for entry in raw {
            registry.insert(entry.into_def()?);
        }
        Ok(registry)
    }

    /// Insert a definition, replacing any previous one with the same ID.
    pub fn insert(&mut self, def: ElementDef) {
        if let Some(&idx) = self.by_id.get(&def.id.raw()) {
            self.by_name.remove(&self.defs[idx].name);
            self.by_name.insert(def.name.clone(), idx);
            self.defs[idx] = def;
            return;
        }
        let idx = self.defs.len();
        self.by_id.insert(def.id.raw(), idx);
        self.by_name.insert(def.name.clone(), idx);
        self.defs.push(def);
    }

    #[must_use]
    pub fn get(&self, id: ElementId) -> Option<&ElementDef> {
        self.by_id.get(&id.raw()).map(|&i| &self.defs[i])
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&ElementDef> {
        self.by_name.get(name).map(|&i| &self.defs[i])
    }

    /// All definitions, in insertion order.
    pub fn defs(&self) -> impl Iterator<Item = &ElementDef> {
        self.defs.iter()
    }

    /// Mandatory children of the given parent.
    pub fn required_children(&self, parent: ElementId) -> impl Iterator<Item = &ElementDef> {
        self.defs
            .iter()
            .filter(move |d| d.mandatory() && d.allowed_under(Some(parent)))
    }

    /// At-most-once children of the given parent.
    pub fn unique_children(&self, parent: ElementId) -> impl Iterator<Item = &ElementDef> {
        self.defs
            .iter()
            .filter(move |d| d.unique && d.allowed_under(Some(parent)))
    }

    /// Definitions allowed only at the top level of a file.
    pub fn top_level(&self) -> impl Iterator<Item = &ElementDef> {
        self.defs
            .iter()
            .filter(|d| matches!(d.parents, ParentRule::TopLevel))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParents {
    Star(String),
    Ids(Vec<u32>),
}

#[derive(Deserialize)]
struct RawDef {
    id: u32,
    name: String,
    kind: ElementKind,
    #[serde(default)]
    parents: Option<RawParents>,
    #[serde(default)]
    default: Option<serde_json::Value>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    defer: bool,
    #[serde(default)]
    header_len_min: u8,
    #[serde(default)]
    data_len_min: u64,
}

impl RawDef {
    fn into_def(self) -> Result<ElementDef, SchemaLoadError> {
        let bad = |detail: &str| SchemaLoadError::BadDef {
            name: self.name.clone(),
            detail: detail.to_owned(),
        };
        let id = ElementId::new(self.id).ok_or_else(|| bad("invalid element ID"))?;
        let parents = match self.parents {
            None => ParentRule::TopLevel,
            Some(RawParents::Star(s)) if s == "*" => ParentRule::Any,
            Some(RawParents::Star(_)) => return Err(bad("parents must be \"*\" or an ID array")),
            Some(RawParents::Ids(raw)) => {
                let mut ids = Vec::with_capacity(raw.len());
                for p in raw {
                    ids.push(ElementId::new(p).ok_or_else(|| bad("invalid parent ID"))?);
                }
                ParentRule::Within(ids)
            }
        };
        let default = match (&self.default, self.kind.atom()) {
            (None, _) => None,
            (Some(_), None) => return Err(bad("only atomic elements take a default")),
            (Some(v), Some(kind)) => Some(json_default(v, kind).ok_or_else(|| {
                bad("default value does not match the element kind")
            })?),
        };
        Ok(ElementDef {
            id,
            name: self.name,
            kind: self.kind,
            parents,
            default,
            min_val: self.min,
            max_val: self.max,
            required: self.required,
            unique: self.unique,
            recursive: self.recursive,
            defer: self.defer,
            header_len_min: self.header_len_min,
            data_len_min: self.data_len_min,
        })
    }
}

fn json_default(value: &serde_json::Value, kind: AtomKind) -> Option<EbmlValue> {
    match kind {
        AtomKind::Unsigned => value.as_u64().map(EbmlValue::Unsigned),
        AtomKind::Signed => value.as_i64().map(EbmlValue::Signed),
        AtomKind::Date => value.as_i64().map(EbmlValue::Date),
        AtomKind::Float => value.as_f64().map(EbmlValue::Float),
        AtomKind::Ascii => value.as_str().map(|s| EbmlValue::Ascii(s.to_owned())),
        AtomKind::Utf8 => value.as_str().map(|s| EbmlValue::Utf8(s.to_owned())),
        AtomKind::Binary => None,
    }
}
