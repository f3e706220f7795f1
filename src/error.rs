use crate::schema::ElementKind;

/// Failures of the var-int / scalar codec, independent of any storage position.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VarIntError {
    #[error("no bytes to decode")]
    Empty,
    #[error("truncated input: {needed} more byte(s) needed")]
    Truncated { needed: usize },
    #[error("length marker exceeds the {max}-byte maximum")]
    TooWide { max: usize },
    #[error("value {value:#X} does not fit in {width} byte(s)")]
    DoesNotFit { value: u64, width: usize },
    #[error("invalid width {0}")]
    InvalidWidth(usize),
    #[error("invalid element id {0:#X}")]
    InvalidId(u64),
    #[error("reserved bit pattern")]
    Reserved,
    #[error("payload is not valid for its type")]
    InvalidPayload,
    #[error("parser error: {0:?}")]
    Parse(nom::error::ErrorKind),
}

impl<I> nom::error::ParseError<I> for VarIntError {
    fn from_error_kind(_input: I, kind: nom::error::ErrorKind) -> Self {
        Self::Parse(kind)
    }

    fn append(_input: I, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

impl From<nom::Err<VarIntError>> for VarIntError {
    fn from(err: nom::Err<VarIntError>) -> Self {
        match err {
            nom::Err::Incomplete(nom::Needed::Size(n)) => Self::Truncated { needed: n.get() },
            nom::Err::Incomplete(nom::Needed::Unknown) => Self::Truncated { needed: 1 },
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EbmlError {
    #[error("malformed var-int at offset {offset}: {source}")]
    MalformedVarInt {
        offset: u64,
        #[source]
        source: VarIntError,
    },
    #[error("storage failure during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("size mismatch in element {id:#X} at offset {offset}: declared {declared}, actual {actual}")]
    SizeMismatch {
        id: u32,
        offset: u64,
        declared: u64,
        actual: u64,
    },
    #[error("receipt used after its storage was closed or reopened")]
    StaleReceipt,
    #[error("receipt covers {capacity} byte(s), cannot write {len}")]
    ReceiptOverflow { capacity: u64, len: usize },
    #[error("storage is closed")]
    Closed,
    #[error("element {id:#X} has an unknown size and cannot carry a CRC-32")]
    UnknownSizeChecksum { id: u32 },
    #[error("element {id:#X} may not have an unknown size")]
    UnknownSizeNotAllowed { id: u32 },
    #[error("checksum mismatch in element {id:#X} at offset {offset}: stored {stored:#010X}, computed {computed:#010X}")]
    ChecksumMismatch {
        id: u32,
        offset: u64,
        stored: u32,
        computed: u32,
    },
    #[error("element {id:#X} at offset {offset} is not a master but declares an unknown size")]
    UnknownSizeScalar { id: u32, offset: u64 },
    #[error("element nesting too deep at offset {offset}")]
    TooDeep { offset: u64 },
    #[error("stream does not start with an EBML header (offset {offset})")]
    MissingHeader { offset: u64 },
    #[error("element {id:#X} is not defined by the schema")]
    UnknownElement { id: u32 },
    #[error("element {id:#X} is not a master element")]
    NotAMaster { id: u32 },
    #[error("element {id:#X} does not hold a {expected:?} value")]
    KindMismatch { id: u32, expected: ElementKind },
    #[error("element {child:#X} is not a valid child of {parent:#X}")]
    InvalidChild { parent: u32, child: u32 },
    #[error("invalid schema: {0}")]
    Schema(String),
    #[error("invalid schema document: {0}")]
    SchemaXml(#[from] serde_xml_rs::Error),
}

impl EbmlError {
    pub(crate) fn io(op: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { op, source }
    }

    pub(crate) fn var_int(offset: u64) -> impl FnOnce(VarIntError) -> Self {
        move |source| Self::MalformedVarInt { offset, source }
    }
}

pub type Result<T, E = EbmlError> = std::result::Result<T, E>;
