//! Convenience value access.
//!
//! Domain fields live in child elements; these helpers look up the last
//! matching child (falling back to the dictionary default) or create the
//! child on first set. They are thin layers over the core tree operations,
//! keyed by `(name, default)`.

use mkedit_error::Result;
use mkedit_schema::SchemaRegistry;
use mkedit_types::EbmlValue;

use crate::element::Element;

impl Element {
    /// Value of the last child with the given name, if any.
    #[must_use]
    pub fn find_value<'a>(&'a self, name: &'a str) -> Option<&'a EbmlValue> {
        self.children_named(name).last().and_then(Element::value)
    }

    /// Value of the last child with the given name, or the dictionary
    /// default.
    #[must_use]
    pub fn value_or_default(&self, name: &str, registry: &SchemaRegistry) -> Option<EbmlValue> {
        self.find_value(name)
            .cloned()
            .or_else(|| registry.by_name(name).and_then(|def| def.default.clone()))
    }

    /// Set the value of the last child with the given name, creating the
    /// child if absent.
    pub fn set_child_value(
        &mut self,
        name: &str,
        value: EbmlValue,
        registry: &SchemaRegistry,
    ) -> Result<()> {
        let existing = self.children().iter().rposition(|c| c.name() == name);
        match existing {
            Some(idx) => self
                .master_data_mut()
                .expect("children imply a master")
                .children[idx]
                .set_value(value, registry),
            None => {
                let child = Element::new_with_value(name, value, registry)?;
                self.add_child(child);
                Ok(())
            }
        }
    }

    // --- Segment and Info metadata ---

    /// The segment title. On a Segment this looks through the Info
    /// children; on an Info it reads the Title child directly.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        if self.name() == "Segment" {
            return self
                .children_named("Info")
                .last()
                .and_then(|info| info.title());
        }
        self.find_value("Title").and_then(EbmlValue::as_str)
    }

    /// Set the segment title, creating the Title child if needed.
    pub fn set_title(&mut self, title: &str, registry: &SchemaRegistry) -> Result<()> {
        let target = if self.name() == "Segment" {
            let idx = self
                .children()
                .iter()
                .rposition(|c| c.name() == "Info")
                .ok_or_else(|| {
                    mkedit_error::EbmlError::inconsistent("segment has no Info element")
                })?;
            &mut self
                .master_data_mut()
                .expect("segment is a master")
                .children[idx]
        } else {
            self
        };
        target.set_child_value("Title", EbmlValue::Utf8(title.to_owned()), registry)
    }

    /// Timestamp scale in nanoseconds (1,000,000 unless overridden).
    #[must_use]
    pub fn timecode_scale(&self, registry: &SchemaRegistry) -> u64 {
        let from = |el: &Element| {
            el.value_or_default("TimecodeScale", registry)
                .and_then(|v| v.as_unsigned())
        };
        if self.name() == "Segment" {
            self.children_named("Info").last().and_then(from)
        } else {
            from(self)
        }
        .unwrap_or(1_000_000)
    }

    /// Segment duration in seconds, scaled by the timestamp scale.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self, registry: &SchemaRegistry) -> Option<f64> {
        let info = if self.name() == "Segment" {
            self.children_named("Info").last()?
        } else {
            self
        };
        let raw = info.find_value("Duration")?.as_float()?;
        Some(raw * self.timecode_scale(registry) as f64 / 1e9)
    }

    #[must_use]
    pub fn muxing_app(&self) -> Option<&str> {
        self.info_string("MuxingApp")
    }

    #[must_use]
    pub fn writing_app(&self) -> Option<&str> {
        self.info_string("WritingApp")
    }

    fn info_string<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        let info = if self.name() == "Segment" {
            self.children_named("Info").last()?
        } else {
            self
        };
        info.find_value(name).and_then(EbmlValue::as_str)
    }

    // --- AttachedFile fields ---

    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.find_value("FileName").and_then(EbmlValue::as_str)
    }

    #[must_use]
    pub fn file_mime_type(&self) -> Option<&str> {
        self.find_value("FileMimeType").and_then(EbmlValue::as_str)
    }

    #[must_use]
    pub fn file_description(&self) -> Option<&str> {
        self.find_value("FileDescription").and_then(EbmlValue::as_str)
    }

    #[must_use]
    pub fn file_data(&self) -> Option<&[u8]> {
        self.find_value("FileData").and_then(EbmlValue::as_bytes)
    }

    #[must_use]
    pub fn file_uid(&self) -> Option<u64> {
        self.find_value("FileUID").and_then(EbmlValue::as_unsigned)
    }

    /// Replace the attachment payload.
    pub fn set_file_data(&mut self, data: Vec<u8>, registry: &SchemaRegistry) -> Result<()> {
        self.set_child_value("FileData", EbmlValue::Binary(data), registry)
    }

    // --- EBML header version gates ---

    /// Whether this EBML header describes a file we can read.
    #[must_use]
    pub fn ebml_read_supported(&self, registry: &SchemaRegistry) -> bool {
        self.header_field(registry, "EBMLReadVersion") <= 1
            && self.header_field(registry, "EBMLMaxIDLength") <= 4
            && self.header_field(registry, "EBMLMaxSizeLength") <= 8
            && self.doc_type_is_matroska(registry)
            && self.header_field(registry, "DocTypeReadVersion") <= 4
    }

    /// Whether this EBML header describes a file we can write back.
    #[must_use]
    pub fn ebml_write_supported(&self, registry: &SchemaRegistry) -> bool {
        self.header_field(registry, "EBMLVersion") <= 1
            && self.header_field(registry, "EBMLMaxIDLength") == 4
            && self.header_field(registry, "EBMLMaxSizeLength") == 8
            && self.doc_type_is_matroska(registry)
            && self.header_field(registry, "DocTypeVersion") <= 4
    }

    fn header_field(&self, registry: &SchemaRegistry, name: &str) -> u64 {
        self.value_or_default(name, registry)
            .and_then(|v| v.as_unsigned())
            .unwrap_or(0)
    }

    fn doc_type_is_matroska(&self, registry: &SchemaRegistry) -> bool {
        self.value_or_default("DocType", registry)
            .as_ref()
            .and_then(EbmlValue::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("matroska"))
    }
}
