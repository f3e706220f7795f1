use crate::element::Element;
use crate::error::{EbmlError, Result};
use crate::payload::{StringPayload, UIntPayload};
use crate::schema::{DefaultValue, ElementDef, Schema};

use std::borrow::Cow;

/// Element IDs of the EBML header and the Matroska segment tree.
pub mod ids {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const VOID: u32 = 0xEC;
    pub const CRC32: u32 = 0xBF;

    pub const SEGMENT: u32 = 0x1853_8067;

    pub const SEEK_HEAD: u32 = 0x114D_9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const SEEK_ID: u32 = 0x53AB;
    pub const SEEK_POSITION: u32 = 0x53AC;

    pub const INFO: u32 = 0x1549_A966;
    pub const SEGMENT_UUID: u32 = 0x73A4;
    pub const SEGMENT_FILENAME: u32 = 0x7384;
    pub const PREV_UUID: u32 = 0x3C_B923;
    pub const PREV_FILENAME: u32 = 0x3C_83AB;
    pub const NEXT_UUID: u32 = 0x3E_B923;
    pub const NEXT_FILENAME: u32 = 0x3E_83BB;
    pub const TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const DATE_UTC: u32 = 0x4461;
    pub const TITLE: u32 = 0x7BA9;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMESTAMP: u32 = 0xE7;
    pub const POSITION: u32 = 0xA7;
    pub const PREV_SIZE: u32 = 0xAB;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
    pub const BLOCK_GROUP: u32 = 0xA0;
    pub const BLOCK: u32 = 0xA1;
    pub const BLOCK_DURATION: u32 = 0x9B;
    pub const REFERENCE_PRIORITY: u32 = 0xFA;
    pub const REFERENCE_BLOCK: u32 = 0xFB;

    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_ENABLED: u32 = 0xB9;
    pub const FLAG_DEFAULT: u32 = 0x88;
    pub const FLAG_FORCED: u32 = 0x55AA;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const MIN_CACHE: u32 = 0x6DE7;
    pub const DEFAULT_DURATION: u32 = 0x23_E383;
    pub const TRACK_TIMESTAMP_SCALE: u32 = 0x23_314F;
    pub const MAX_BLOCK_ADDITION_ID: u32 = 0x55EE;
    pub const NAME: u32 = 0x536E;
    pub const LANGUAGE: u32 = 0x22_B59C;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63A2;
    pub const CODEC_NAME: u32 = 0x25_8688;
    pub const CODEC_DECODE_ALL: u32 = 0xAA;
    pub const CODEC_DELAY: u32 = 0x56AA;
    pub const SEEK_PRE_ROLL: u32 = 0x56BB;

    pub const VIDEO: u32 = 0xE0;
    pub const FLAG_INTERLACED: u32 = 0x9A;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const DISPLAY_WIDTH: u32 = 0x54B0;
    pub const DISPLAY_HEIGHT: u32 = 0x54BA;
    pub const DISPLAY_UNIT: u32 = 0x54B2;

    pub const AUDIO: u32 = 0xE1;
    pub const SAMPLING_FREQUENCY: u32 = 0xB5;
    pub const OUTPUT_SAMPLING_FREQUENCY: u32 = 0x78B5;
    pub const CHANNELS: u32 = 0x9F;
    pub const BIT_DEPTH: u32 = 0x6264;

    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
    pub const CUE_RELATIVE_POSITION: u32 = 0xF0;
    pub const CUE_BLOCK_NUMBER: u32 = 0x5378;

    pub const ATTACHMENTS: u32 = 0x1941_A469;
    pub const ATTACHED_FILE: u32 = 0x61A7;
    pub const FILE_DESCRIPTION: u32 = 0x467E;
    pub const FILE_NAME: u32 = 0x466E;
    pub const FILE_MIME_TYPE: u32 = 0x4660;
    pub const FILE_DATA: u32 = 0x465C;
    pub const FILE_UID: u32 = 0x46AE;

    pub const CHAPTERS: u32 = 0x1043_A770;
    pub const EDITION_ENTRY: u32 = 0x45B9;
    pub const EDITION_UID: u32 = 0x45BC;
    pub const EDITION_FLAG_HIDDEN: u32 = 0x45BD;
    pub const EDITION_FLAG_DEFAULT: u32 = 0x45DB;
    pub const EDITION_FLAG_ORDERED: u32 = 0x45DD;
    pub const CHAPTER_ATOM: u32 = 0xB6;
    pub const CHAPTER_UID: u32 = 0x73C4;
    pub const CHAPTER_TIME_START: u32 = 0x91;
    pub const CHAPTER_TIME_END: u32 = 0x92;
    pub const CHAPTER_FLAG_HIDDEN: u32 = 0x98;
    pub const CHAPTER_FLAG_ENABLED: u32 = 0x4598;
    pub const CHAPTER_DISPLAY: u32 = 0x80;
    pub const CHAP_STRING: u32 = 0x85;
    pub const CHAP_LANGUAGE: u32 = 0x437C;

    pub const TAGS: u32 = 0x1254_C367;
    pub const TAG: u32 = 0x7373;
    pub const TARGETS: u32 = 0x63C0;
    pub const TARGET_TYPE_VALUE: u32 = 0x68CA;
    pub const TARGET_TYPE: u32 = 0x63CA;
    pub const TAG_TRACK_UID: u32 = 0x63C5;
    pub const TAG_EDITION_UID: u32 = 0x63C9;
    pub const TAG_CHAPTER_UID: u32 = 0x63C4;
    pub const TAG_ATTACHMENT_UID: u32 = 0x63C6;
    pub const SIMPLE_TAG: u32 = 0x67C8;
    pub const TAG_NAME: u32 = 0x45A3;
    pub const TAG_LANGUAGE: u32 = 0x447A;
    pub const TAG_DEFAULT: u32 = 0x4484;
    pub const TAG_STRING: u32 = 0x4487;
    pub const TAG_BINARY: u32 = 0x4485;
}

use ids::*;

fn uint(value: u64) -> DefaultValue {
    DefaultValue::UInt(value)
}

fn text(value: &'static str) -> DefaultValue {
    DefaultValue::String(Cow::Borrowed(value))
}

// `parent => [definitions]`, parents listed before their children
macro_rules! element_table {
    ($schema:ident; $($parent:expr => [$($def:expr),* $(,)?]),* $(,)?) => {
        $( $( $schema.insert($parent, $def); )* )*
    };
}

impl Schema {
    /// An otherwise empty schema knowing the EBML header, `Void` and `CRC-32`.
    pub fn with_ebml_header(doc_type: &str) -> Self {
        let mut schema = Schema::new(doc_type);
        schema.insert_global(ElementDef::binary(VOID, "Void"));
        schema.insert_global(ElementDef::binary(CRC32, "CRC-32"));

        let doc_type = DefaultValue::String(Cow::Owned(doc_type.to_string()));
        element_table!(schema;
            None => [
                ElementDef::master(EBML, "EBML").mandatory(),
            ],
            Some(EBML) => [
                ElementDef::uint(EBML_VERSION, "EBMLVersion").with_default(uint(1)).mandatory().always_save(),
                ElementDef::uint(EBML_READ_VERSION, "EBMLReadVersion").with_default(uint(1)).mandatory().always_save(),
                ElementDef::uint(EBML_MAX_ID_LENGTH, "EBMLMaxIDLength").with_default(uint(4)).mandatory().always_save(),
                ElementDef::uint(EBML_MAX_SIZE_LENGTH, "EBMLMaxSizeLength").with_default(uint(8)).mandatory().always_save(),
                ElementDef::string(DOC_TYPE, "DocType").with_default(doc_type).mandatory().always_save(),
                ElementDef::uint(DOC_TYPE_VERSION, "DocTypeVersion").with_default(uint(1)).mandatory().always_save(),
                ElementDef::uint(DOC_TYPE_READ_VERSION, "DocTypeReadVersion").with_default(uint(1)).mandatory().always_save(),
            ],
        );
        schema
    }

    /// The EBML header and the Matroska segment tree, with Matroska defaults.
    pub fn matroska() -> Self {
        let mut schema = Schema::with_ebml_header("matroska");

        element_table!(schema;
            None => [
                ElementDef::master(SEGMENT, "Segment").mandatory().unknown_size_allowed(),
            ],
            Some(SEGMENT) => [
                ElementDef::master(SEEK_HEAD, "SeekHead").multiple(),
                ElementDef::master(INFO, "Info").mandatory(),
                ElementDef::master(TRACKS, "Tracks"),
                ElementDef::master(CHAPTERS, "Chapters"),
                ElementDef::master(CLUSTER, "Cluster").multiple().unknown_size_allowed(),
                ElementDef::master(CUES, "Cues"),
                ElementDef::master(ATTACHMENTS, "Attachments"),
                ElementDef::master(TAGS, "Tags").multiple(),
            ],
            Some(SEEK_HEAD) => [
                ElementDef::master(SEEK, "Seek").mandatory().multiple(),
            ],
            Some(SEEK) => [
                ElementDef::binary(SEEK_ID, "SeekID").mandatory(),
                ElementDef::uint(SEEK_POSITION, "SeekPosition").mandatory(),
            ],
            Some(INFO) => [
                ElementDef::binary(SEGMENT_UUID, "SegmentUUID"),
                ElementDef::utf8(SEGMENT_FILENAME, "SegmentFilename"),
                ElementDef::binary(PREV_UUID, "PrevUUID"),
                ElementDef::utf8(PREV_FILENAME, "PrevFilename"),
                ElementDef::binary(NEXT_UUID, "NextUUID"),
                ElementDef::utf8(NEXT_FILENAME, "NextFilename"),
                ElementDef::uint(TIMESTAMP_SCALE, "TimestampScale").with_default(uint(1_000_000)).mandatory(),
                ElementDef::float(DURATION, "Duration"),
                ElementDef::date(DATE_UTC, "DateUTC"),
                ElementDef::utf8(TITLE, "Title"),
                ElementDef::utf8(MUXING_APP, "MuxingApp").mandatory(),
                ElementDef::utf8(WRITING_APP, "WritingApp").mandatory(),
            ],
            Some(CLUSTER) => [
                ElementDef::uint(TIMESTAMP, "Timestamp").mandatory(),
                ElementDef::uint(POSITION, "Position"),
                ElementDef::uint(PREV_SIZE, "PrevSize"),
                ElementDef::binary(SIMPLE_BLOCK, "SimpleBlock").multiple(),
                ElementDef::master(BLOCK_GROUP, "BlockGroup").multiple(),
            ],
            Some(BLOCK_GROUP) => [
                ElementDef::binary(BLOCK, "Block").mandatory(),
                ElementDef::uint(BLOCK_DURATION, "BlockDuration"),
                ElementDef::uint(REFERENCE_PRIORITY, "ReferencePriority").with_default(uint(0)).mandatory(),
                ElementDef::int(REFERENCE_BLOCK, "ReferenceBlock").multiple(),
            ],
            Some(TRACKS) => [
                ElementDef::master(TRACK_ENTRY, "TrackEntry").mandatory().multiple(),
            ],
            Some(TRACK_ENTRY) => [
                ElementDef::uint(TRACK_NUMBER, "TrackNumber").mandatory(),
                ElementDef::uint(TRACK_UID, "TrackUID").mandatory(),
                ElementDef::uint(TRACK_TYPE, "TrackType").mandatory(),
                ElementDef::uint(FLAG_ENABLED, "FlagEnabled").with_default(uint(1)).mandatory(),
                ElementDef::uint(FLAG_DEFAULT, "FlagDefault").with_default(uint(1)).mandatory(),
                ElementDef::uint(FLAG_FORCED, "FlagForced").with_default(uint(0)).mandatory(),
                ElementDef::uint(FLAG_LACING, "FlagLacing").with_default(uint(1)).mandatory(),
                ElementDef::uint(MIN_CACHE, "MinCache").with_default(uint(0)).mandatory(),
                ElementDef::uint(DEFAULT_DURATION, "DefaultDuration"),
                ElementDef::float(TRACK_TIMESTAMP_SCALE, "TrackTimestampScale").with_default(DefaultValue::Float(1.0)).mandatory(),
                ElementDef::uint(MAX_BLOCK_ADDITION_ID, "MaxBlockAdditionID").with_default(uint(0)).mandatory(),
                ElementDef::utf8(NAME, "Name"),
                ElementDef::string(LANGUAGE, "Language").with_default(text("eng")).mandatory(),
                ElementDef::string(CODEC_ID, "CodecID").mandatory(),
                ElementDef::binary(CODEC_PRIVATE, "CodecPrivate"),
                ElementDef::utf8(CODEC_NAME, "CodecName"),
                ElementDef::uint(CODEC_DECODE_ALL, "CodecDecodeAll").with_default(uint(1)).mandatory(),
                ElementDef::uint(CODEC_DELAY, "CodecDelay").with_default(uint(0)).mandatory(),
                ElementDef::uint(SEEK_PRE_ROLL, "SeekPreRoll").with_default(uint(0)).mandatory(),
                ElementDef::master(VIDEO, "Video"),
                ElementDef::master(AUDIO, "Audio"),
            ],
            Some(VIDEO) => [
                ElementDef::uint(FLAG_INTERLACED, "FlagInterlaced").with_default(uint(0)).mandatory(),
                ElementDef::uint(PIXEL_WIDTH, "PixelWidth").mandatory(),
                ElementDef::uint(PIXEL_HEIGHT, "PixelHeight").mandatory(),
                ElementDef::uint(DISPLAY_WIDTH, "DisplayWidth"),
                ElementDef::uint(DISPLAY_HEIGHT, "DisplayHeight"),
                ElementDef::uint(DISPLAY_UNIT, "DisplayUnit").with_default(uint(0)).mandatory(),
            ],
            Some(AUDIO) => [
                ElementDef::float(SAMPLING_FREQUENCY, "SamplingFrequency").with_default(DefaultValue::Float(8000.0)).mandatory(),
                ElementDef::float(OUTPUT_SAMPLING_FREQUENCY, "OutputSamplingFrequency"),
                ElementDef::uint(CHANNELS, "Channels").with_default(uint(1)).mandatory(),
                ElementDef::uint(BIT_DEPTH, "BitDepth"),
            ],
            Some(CUES) => [
                ElementDef::master(CUE_POINT, "CuePoint").mandatory().multiple(),
            ],
            Some(CUE_POINT) => [
                ElementDef::uint(CUE_TIME, "CueTime").mandatory(),
                ElementDef::master(CUE_TRACK_POSITIONS, "CueTrackPositions").mandatory().multiple(),
            ],
            Some(CUE_TRACK_POSITIONS) => [
                ElementDef::uint(CUE_TRACK, "CueTrack").mandatory(),
                ElementDef::uint(CUE_CLUSTER_POSITION, "CueClusterPosition").mandatory(),
                ElementDef::uint(CUE_RELATIVE_POSITION, "CueRelativePosition"),
                ElementDef::uint(CUE_BLOCK_NUMBER, "CueBlockNumber"),
            ],
            Some(ATTACHMENTS) => [
                ElementDef::master(ATTACHED_FILE, "AttachedFile").mandatory().multiple(),
            ],
            Some(ATTACHED_FILE) => [
                ElementDef::utf8(FILE_DESCRIPTION, "FileDescription"),
                ElementDef::utf8(FILE_NAME, "FileName").mandatory(),
                ElementDef::string(FILE_MIME_TYPE, "FileMimeType").mandatory(),
                ElementDef::binary(FILE_DATA, "FileData").mandatory(),
                ElementDef::uint(FILE_UID, "FileUID").mandatory(),
            ],
            Some(CHAPTERS) => [
                ElementDef::master(EDITION_ENTRY, "EditionEntry").mandatory().multiple(),
            ],
            Some(EDITION_ENTRY) => [
                ElementDef::uint(EDITION_UID, "EditionUID"),
                ElementDef::uint(EDITION_FLAG_HIDDEN, "EditionFlagHidden").with_default(uint(0)).mandatory(),
                ElementDef::uint(EDITION_FLAG_DEFAULT, "EditionFlagDefault").with_default(uint(0)).mandatory(),
                ElementDef::uint(EDITION_FLAG_ORDERED, "EditionFlagOrdered").with_default(uint(0)).mandatory(),
                ElementDef::master(CHAPTER_ATOM, "ChapterAtom").mandatory().multiple(),
            ],
            Some(CHAPTER_ATOM) => [
                ElementDef::uint(CHAPTER_UID, "ChapterUID").mandatory(),
                ElementDef::uint(CHAPTER_TIME_START, "ChapterTimeStart").mandatory(),
                ElementDef::uint(CHAPTER_TIME_END, "ChapterTimeEnd"),
                ElementDef::uint(CHAPTER_FLAG_HIDDEN, "ChapterFlagHidden").with_default(uint(0)).mandatory(),
                ElementDef::uint(CHAPTER_FLAG_ENABLED, "ChapterFlagEnabled").with_default(uint(1)).mandatory(),
                ElementDef::master(CHAPTER_DISPLAY, "ChapterDisplay").multiple(),
                ElementDef::master(CHAPTER_ATOM, "ChapterAtom").multiple(),
            ],
            Some(CHAPTER_DISPLAY) => [
                ElementDef::utf8(CHAP_STRING, "ChapString").mandatory(),
                ElementDef::string(CHAP_LANGUAGE, "ChapLanguage").with_default(text("eng")).mandatory().multiple(),
            ],
            Some(TAGS) => [
                ElementDef::master(TAG, "Tag").mandatory().multiple(),
            ],
            Some(TAG) => [
                ElementDef::master(TARGETS, "Targets").mandatory(),
                ElementDef::master(SIMPLE_TAG, "SimpleTag").mandatory().multiple(),
            ],
            Some(TARGETS) => [
                ElementDef::uint(TARGET_TYPE_VALUE, "TargetTypeValue").with_default(uint(50)).mandatory(),
                ElementDef::string(TARGET_TYPE, "TargetType"),
                ElementDef::uint(TAG_TRACK_UID, "TagTrackUID").with_default(uint(0)).multiple(),
                ElementDef::uint(TAG_EDITION_UID, "TagEditionUID").with_default(uint(0)).multiple(),
                ElementDef::uint(TAG_CHAPTER_UID, "TagChapterUID").with_default(uint(0)).multiple(),
                ElementDef::uint(TAG_ATTACHMENT_UID, "TagAttachmentUID").with_default(uint(0)).multiple(),
            ],
            Some(SIMPLE_TAG) => [
                ElementDef::utf8(TAG_NAME, "TagName").mandatory(),
                ElementDef::string(TAG_LANGUAGE, "TagLanguage").with_default(text("und")).mandatory(),
                ElementDef::uint(TAG_DEFAULT, "TagDefault").with_default(uint(1)).mandatory(),
                ElementDef::utf8(TAG_STRING, "TagString"),
                ElementDef::binary(TAG_BINARY, "TagBinary"),
                ElementDef::master(SIMPLE_TAG, "SimpleTag").multiple(),
            ],
        );

        schema
    }
}

/// Typed view over the EBML header master element.
#[derive(Debug, Clone, PartialEq)]
pub struct EbmlHeader(Element);

impl EbmlHeader {
    /// A header with every field at its default and the schema's doc type.
    pub fn new(schema: &Schema) -> Result<Self> {
        let mut header = Self(schema.create(EBML)?);
        if header.doc_type() != schema.doc_type() {
            header.set_doc_type(schema.doc_type())?;
        }
        Ok(header)
    }

    pub fn from_element(element: Element) -> Result<Self> {
        if element.id() != EBML {
            return Err(EbmlError::MissingHeader { offset: 0 });
        }
        Ok(Self(element))
    }

    pub fn element(&self) -> &Element {
        &self.0
    }

    pub fn element_mut(&mut self) -> &mut Element {
        &mut self.0
    }

    pub fn into_element(self) -> Element {
        self.0
    }

    fn uint_field(&self, id: u32, default: u64) -> u64 {
        self.0.child(id).and_then(Element::uint).unwrap_or(default)
    }

    fn set_uint_field(&mut self, id: u32, value: u64) -> Result<()> {
        match self.0.child_mut(id) {
            Some(child) => child.set_uint(value),
            None => {
                let mut child = Element::new(id, UIntPayload::new(value));
                child.set_always_save(true);
                self.0.push(child)
            }
        }
    }

    pub fn version(&self) -> u64 {
        self.uint_field(EBML_VERSION, 1)
    }

    pub fn set_version(&mut self, value: u64) -> Result<()> {
        self.set_uint_field(EBML_VERSION, value)
    }

    pub fn read_version(&self) -> u64 {
        self.uint_field(EBML_READ_VERSION, 1)
    }

    pub fn set_read_version(&mut self, value: u64) -> Result<()> {
        self.set_uint_field(EBML_READ_VERSION, value)
    }

    pub fn max_id_length(&self) -> u64 {
        self.uint_field(EBML_MAX_ID_LENGTH, 4)
    }

    pub fn set_max_id_length(&mut self, value: u64) -> Result<()> {
        self.set_uint_field(EBML_MAX_ID_LENGTH, value)
    }

    pub fn max_size_length(&self) -> u64 {
        self.uint_field(EBML_MAX_SIZE_LENGTH, 8)
    }

    pub fn set_max_size_length(&mut self, value: u64) -> Result<()> {
        self.set_uint_field(EBML_MAX_SIZE_LENGTH, value)
    }

    pub fn doc_type(&self) -> &str {
        self.0
            .child(DOC_TYPE)
            .and_then(Element::string)
            .unwrap_or("matroska")
    }

    pub fn set_doc_type(&mut self, value: &str) -> Result<()> {
        match self.0.child_mut(DOC_TYPE) {
            Some(child) => child.set_string(value),
            None => {
                let mut child = Element::new(DOC_TYPE, StringPayload::new(value));
                child.set_always_save(true);
                self.0.push(child)
            }
        }
    }

    pub fn doc_type_version(&self) -> u64 {
        self.uint_field(DOC_TYPE_VERSION, 1)
    }

    pub fn set_doc_type_version(&mut self, value: u64) -> Result<()> {
        self.set_uint_field(DOC_TYPE_VERSION, value)
    }

    pub fn doc_type_read_version(&self) -> u64 {
        self.uint_field(DOC_TYPE_READ_VERSION, 1)
    }

    pub fn set_doc_type_read_version(&mut self, value: u64) -> Result<()> {
        self.set_uint_field(DOC_TYPE_READ_VERSION, value)
    }
}
