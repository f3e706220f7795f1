//! Reading and writing EBML element trees, with the Matroska schema built in.
//!
//! Elements are assembled in memory, sized with [`Element::calc_size`] and
//! written through a [`Storage`]. Every write hands back a [`Receipt`] that can
//! patch the written range later, e.g. to fill in a size or a checksum once it
//! is known. Loading reverses the process; element IDs the [`Schema`] does not
//! know are kept as opaque binary and re-saved verbatim.

mod checksum;
mod config;
mod document;
mod element;
mod error;
mod file_storage;
pub mod matroska;
mod payload;
mod schema;
mod serde_schema;
mod storage;
pub mod stream;

pub use checksum::{checksum, Crc32};
pub use config::ReadOptions;
pub use document::Document;
pub use element::{peek_header, Element, ElementHeader, LoadContext, Peeked, CRC32_ID, VOID_ID};
pub use error::{EbmlError, Result, VarIntError};
pub use file_storage::{AccessMode, FileStorage, DEFAULT_CACHE_SIZE};
pub use matroska::EbmlHeader;
pub use payload::{
    BinaryOrigin, BinaryPayload, DatePayload, DoublePayload, FloatPayload, IntPayload,
    MasterPayload, Payload, PayloadCodec, StringPayload, UIntPayload, Utf8Payload, Width,
    EBML_EPOCH_UNIX_SECS,
};
pub use schema::{DefaultValue, ElementDef, ElementKind, Schema};
pub use storage::{MemoryStorage, Receipt, Storage};
pub use stream::{
    decode_element_id, decode_vsize, decode_vsize_signed, encode_double, encode_element_id,
    encode_float, encode_int, encode_uint, encode_unknown_vsize, encode_vsize,
    encode_vsize_signed, VSize,
};
