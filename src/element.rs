use crate::checksum::Crc32;
use crate::config::ReadOptions;
use crate::error::{EbmlError, Result, VarIntError};
use crate::payload::{
    BinaryOrigin, BinaryPayload, MasterPayload, Payload, PayloadCodec, CRC_ELEMENT_LEN,
};
use crate::schema::{ElementDef, ElementKind, Schema};
use crate::storage::{read_folded, write_folded, Receipt, Storage};
use crate::stream::{
    id_width, parse, serialize, vsize_width, VSize, MAX_ID_WIDTH, MAX_VSIZE_WIDTH,
};

use std::cell::Cell;

pub const CRC32_ID: u32 = 0xBF;
pub const VOID_ID: u32 = 0xEC;

const CRC_PLACEHOLDER: [u8; CRC_ELEMENT_LEN as usize] = [0xBF, 0x84, 0, 0, 0, 0];
const UNKNOWN_SIZE_WIDTH: usize = 8;

/// The ID and size fields in front of an element's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    pub size: VSize,
    pub id_len: usize,
    pub size_len: usize,
    pub offset: u64,
}

impl ElementHeader {
    pub fn len(&self) -> u64 {
        (self.id_len + self.size_len) as u64
    }

    /// Offset just past the payload, when the size is known.
    pub fn end(&self) -> Option<u64> {
        self.size.known().map(|size| self.offset + self.len() + size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peeked {
    Eof,
    Header(ElementHeader),
    Malformed(VarIntError),
}

/// Looks at the header under the cursor without consuming it.
pub fn peek_header(storage: &mut dyn Storage, options: &ReadOptions) -> Result<Peeked> {
    let offset = storage.position();
    let mut buffer = [0u8; MAX_ID_WIDTH + MAX_VSIZE_WIDTH];
    let n = storage.peek(&mut buffer)?;
    if n == 0 {
        return Ok(Peeked::Eof);
    }

    let input = &buffer[..n];
    let (rest, (id, id_len)) = match parse::element_id(input, options.max_id_length) {
        Ok(result) => result,
        Err(e) => return Ok(Peeked::Malformed(e.into())),
    };
    let (_, (size, size_len)) = match parse::vsize(rest, options.max_size_length) {
        Ok(result) => result,
        Err(e) => return Ok(Peeked::Malformed(e.into())),
    };

    Ok(Peeked::Header(ElementHeader {
        id,
        size,
        id_len,
        size_len,
        offset,
    }))
}

/// Everything a load needs besides the storage.
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    pub schema: &'a Schema,
    pub options: &'a ReadOptions,
    /// Nesting level of the element being loaded; 0 at the top level.
    pub depth: usize,
    /// End of the innermost enclosing element of known size.
    pub limit: Option<u64>,
}

impl<'a> LoadContext<'a> {
    pub fn new(schema: &'a Schema, options: &'a ReadOptions) -> Self {
        Self {
            schema,
            options,
            depth: 0,
            limit: None,
        }
    }

    fn nested(&self, limit: Option<u64>) -> Self {
        Self {
            depth: self.depth + 1,
            limit,
            ..*self
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    id: u32,
    payload: Payload,
    always_save: bool,
    // elements built without a schema carry no restriction
    unknown_size_allowed: bool,
    size_width: Option<usize>,
    cached_size: Cell<Option<u64>>,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.payload == other.payload
            && self.always_save == other.always_save
            && self.size_width == other.size_width
    }
}

impl Element {
    pub fn new(id: u32, payload: impl Into<Payload>) -> Self {
        Self {
            id,
            payload: payload.into(),
            always_save: false,
            unknown_size_allowed: true,
            size_width: None,
            cached_size: Cell::new(None),
        }
    }

    pub fn master(id: u32, children: Vec<Element>) -> Self {
        Self::new(id, MasterPayload::new(children))
    }

    pub fn from_def(def: &ElementDef) -> Self {
        let mut element = Self::new(def.id, Payload::for_kind(def.kind, def.default.as_ref()));
        element.always_save = def.always_save;
        element.unknown_size_allowed = def.unknown_size_allowed;
        element
    }

    /// An element whose ID the schema does not know, kept verbatim.
    pub fn alien(id: u32, bytes: Vec<u8>) -> Self {
        Self::new(id, Payload::alien(bytes))
    }

    /// Headerless bytes that did not parse as children of a master.
    pub fn trailing(bytes: Vec<u8>) -> Self {
        Self::new(
            0,
            BinaryPayload {
                value: bytes,
                origin: BinaryOrigin::Trailing,
            },
        )
    }

    /// A Void element occupying exactly `total_len` bytes (at least 2).
    pub fn void(total_len: u64) -> Result<Self> {
        let (data_len, width) = (1..=MAX_VSIZE_WIDTH as u64)
            .filter_map(|width| {
                let data_len = total_len.checked_sub(1 + width)?;
                match vsize_width(data_len) {
                    Ok(needed) if needed as u64 <= width => Some((data_len, width as usize)),
                    _ => None,
                }
            })
            .next()
            .ok_or(EbmlError::MalformedVarInt {
                offset: 0,
                source: VarIntError::DoesNotFit {
                    value: total_len,
                    width: MAX_VSIZE_WIDTH,
                },
            })?;

        let mut element = Self::new(VOID_ID, BinaryPayload::new(vec![0; data_len as usize]));
        element.size_width = Some(width);
        Ok(element)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> ElementKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        self.cached_size.set(None);
        &mut self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn always_save(&self) -> bool {
        self.always_save
    }

    pub fn set_always_save(&mut self, always_save: bool) {
        self.cached_size.set(None);
        self.always_save = always_save;
    }

    pub fn size_width(&self) -> Option<usize> {
        self.size_width
    }

    /// Preferred width of the size field, used whenever the payload size fits in it.
    pub fn set_size_width(&mut self, size_width: Option<usize>) {
        self.cached_size.set(None);
        self.size_width = size_width;
    }

    pub fn will_save(&self) -> bool {
        self.always_save || !self.payload.is_default()
    }

    pub fn is_alien(&self) -> bool {
        matches!(
            &self.payload,
            Payload::Binary(BinaryPayload {
                origin: BinaryOrigin::Alien,
                ..
            })
        )
    }

    pub fn is_trailing(&self) -> bool {
        matches!(
            &self.payload,
            Payload::Binary(BinaryPayload {
                origin: BinaryOrigin::Trailing,
                ..
            })
        )
    }

    /// Number of alien elements in this subtree, this one included.
    pub fn alien_count(&self) -> usize {
        usize::from(self.is_alien())
            + self
                .children()
                .iter()
                .map(Element::alien_count)
                .sum::<usize>()
    }

    pub fn reset_to_default(&mut self) {
        self.payload_mut().reset_to_default();
    }

    // ##### typed access #####

    pub fn uint(&self) -> Option<u64> {
        match &self.payload {
            Payload::UInt(p) => Some(p.value),
            _ => None,
        }
    }

    pub fn int(&self) -> Option<i64> {
        match &self.payload {
            Payload::Int(p) => Some(p.value),
            _ => None,
        }
    }

    pub fn float(&self) -> Option<f64> {
        match &self.payload {
            Payload::Float(p) => Some(f64::from(p.value)),
            Payload::Double(p) => Some(p.value),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&str> {
        match &self.payload {
            Payload::String(p) => Some(&p.value),
            Payload::Utf8(p) => Some(&p.value),
            _ => None,
        }
    }

    pub fn binary(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Binary(p) => Some(&p.value),
            _ => None,
        }
    }

    pub fn date(&self) -> Option<i64> {
        match &self.payload {
            Payload::Date(p) => Some(p.value),
            _ => None,
        }
    }

    fn mismatch(&self, expected: ElementKind) -> EbmlError {
        EbmlError::KindMismatch {
            id: self.id,
            expected,
        }
    }

    pub fn set_uint(&mut self, value: u64) -> Result<()> {
        let err = self.mismatch(ElementKind::UInt);
        match self.payload_mut() {
            Payload::UInt(p) => p.value = value,
            _ => return Err(err),
        }
        Ok(())
    }

    pub fn set_int(&mut self, value: i64) -> Result<()> {
        let err = self.mismatch(ElementKind::Int);
        match self.payload_mut() {
            Payload::Int(p) => p.value = value,
            _ => return Err(err),
        }
        Ok(())
    }

    pub fn set_float(&mut self, value: f64) -> Result<()> {
        let err = self.mismatch(ElementKind::Float);
        match self.payload_mut() {
            Payload::Float(p) => p.value = value as f32,
            Payload::Double(p) => p.value = value,
            _ => return Err(err),
        }
        Ok(())
    }

    /// Sets a String or UTF-8 value; String elements take ASCII only.
    pub fn set_string(&mut self, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        let err = match self.kind() {
            ElementKind::String => self.mismatch(ElementKind::Utf8),
            _ => self.mismatch(ElementKind::String),
        };
        match self.payload_mut() {
            Payload::String(p) if value.is_ascii() => p.value = value,
            Payload::Utf8(p) => p.value = value,
            _ => return Err(err),
        }
        Ok(())
    }

    pub fn set_binary(&mut self, value: Vec<u8>) -> Result<()> {
        let err = self.mismatch(ElementKind::Binary);
        match self.payload_mut() {
            Payload::Binary(p) => p.value = value,
            _ => return Err(err),
        }
        Ok(())
    }

    pub fn set_date(&mut self, value: i64) -> Result<()> {
        let err = self.mismatch(ElementKind::Date);
        match self.payload_mut() {
            Payload::Date(p) => p.value = value,
            _ => return Err(err),
        }
        Ok(())
    }

    // ##### children #####

    /// Children of a master; empty for every other kind.
    pub fn children(&self) -> &[Element] {
        match &self.payload {
            Payload::Master(master) => &master.children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Element>> {
        match self.payload_mut() {
            Payload::Master(master) => Some(&mut master.children),
            _ => None,
        }
    }

    pub fn child(&self, id: u32) -> Option<&Element> {
        self.children().iter().find(|c| c.id == id)
    }

    pub fn child_mut(&mut self, id: u32) -> Option<&mut Element> {
        self.children_mut()?.iter_mut().find(|c| c.id == id)
    }

    pub fn children_with_id(&self, id: u32) -> impl Iterator<Item = &Element> {
        self.children().iter().filter(move |c| c.id == id)
    }

    pub fn push(&mut self, child: Element) -> Result<()> {
        let id = self.id;
        self.children_mut()
            .ok_or(EbmlError::NotAMaster { id })?
            .push(child);
        Ok(())
    }

    pub fn has_checksum(&self) -> bool {
        matches!(&self.payload, Payload::Master(master) if master.checksum)
    }

    pub fn set_checksum(&mut self, checksum: bool) -> Result<()> {
        let id = self.id;
        match self.payload_mut() {
            Payload::Master(master) => master.checksum = checksum,
            _ => return Err(EbmlError::NotAMaster { id }),
        }
        Ok(())
    }

    pub fn unknown_size_allowed(&self) -> bool {
        self.unknown_size_allowed
    }

    pub fn is_unknown_size(&self) -> bool {
        matches!(&self.payload, Payload::Master(master) if master.unknown_size)
    }

    /// Fails with `UnknownSizeNotAllowed` when the element's definition forbids an unknown size.
    pub fn set_unknown_size(&mut self, unknown_size: bool) -> Result<()> {
        let id = self.id;
        if unknown_size && !self.unknown_size_allowed {
            return Err(EbmlError::UnknownSizeNotAllowed { id });
        }
        match self.payload_mut() {
            Payload::Master(master) => master.unknown_size = unknown_size,
            _ => return Err(EbmlError::NotAMaster { id }),
        }
        Ok(())
    }

    // ##### sizes #####

    fn size_field_width(&self, data_size: u64) -> usize {
        if self.is_unknown_size() {
            return self.size_width.unwrap_or(UNKNOWN_SIZE_WIDTH);
        }
        let minimal = vsize_width(data_size).unwrap_or(MAX_VSIZE_WIDTH);
        match self.size_width {
            Some(width) if width >= minimal && width <= MAX_VSIZE_WIDTH => width,
            _ => minimal,
        }
    }

    /// Total encoded length: 0 when the element will not be saved.
    pub fn calc_size(&self) -> u64 {
        if let Some(size) = self.cached_size.get() {
            return size;
        }

        let data_size = self.payload.data_size();
        let size = if !self.will_save() {
            0
        } else if self.is_trailing() {
            data_size
        } else {
            id_width(self.id) as u64 + self.size_field_width(data_size) as u64 + data_size
        };
        self.cached_size.set(Some(size));
        size
    }

    fn encode_header(&self, data_size: u64, offset: u64) -> Result<Vec<u8>> {
        let mut header = serialize::element_id(self.id).map_err(EbmlError::var_int(offset))?;
        let width = self.size_field_width(data_size);
        let size = if self.is_unknown_size() {
            serialize::unknown_vsize(width)
        } else {
            serialize::vsize(data_size, Some(width))
        };
        header.extend(size.map_err(EbmlError::var_int(offset))?);
        Ok(header)
    }

    // ##### save #####

    /// Writes the element, folding every byte into `crc`.
    ///
    /// Returns `None` without writing anything when the element holds its default value.
    pub fn save(
        &self,
        storage: &mut dyn Storage,
        crc: Option<&mut Crc32>,
    ) -> Result<Option<Receipt>> {
        if !self.will_save() {
            return Ok(None);
        }

        let start = storage.position();
        let expected = self.calc_size();
        match &self.payload {
            Payload::Master(master) => self.save_master(master, storage, crc)?,
            payload => {
                let data = payload.encode().map_err(EbmlError::var_int(start))?;
                let mut bytes = if self.is_trailing() {
                    Vec::with_capacity(data.len())
                } else {
                    self.encode_header(data.len() as u64, start)?
                };
                bytes.extend_from_slice(&data);
                write_folded(storage, &bytes, crc)?;
            }
        }

        let written = storage.position() - start;
        if written != expected {
            return Err(EbmlError::SizeMismatch {
                id: self.id,
                offset: start,
                declared: expected,
                actual: written,
            });
        }
        storage.receipt(start, written).map(Some)
    }

    fn save_master(
        &self,
        master: &MasterPayload,
        storage: &mut dyn Storage,
        mut crc: Option<&mut Crc32>,
    ) -> Result<()> {
        if master.checksum && master.unknown_size {
            return Err(EbmlError::UnknownSizeChecksum { id: self.id });
        }

        let header = self.encode_header(master.data_size(), storage.position())?;
        write_folded(storage, &header, crc.as_deref_mut())?;

        if !master.checksum {
            for child in &master.children {
                child.save(storage, crc.as_deref_mut())?;
            }
            return Ok(());
        }

        let placeholder = storage.save(&CRC_PLACEHOLDER)?;
        let mut inner = Crc32::new();
        for child in &master.children {
            child.save(storage, Some(&mut inner))?;
        }
        let value = inner.finalize().to_le_bytes();
        placeholder.narrow(2, 4)?.save_again(&value)?;

        if let Some(crc) = crc {
            crc.update(&CRC_PLACEHOLDER[..2]);
            crc.update(&value);
            crc.combine(&inner);
        }
        Ok(())
    }

    // ##### load #####

    /// Reads the element under the cursor, or `None` at the end of the storage.
    pub fn read_from(
        storage: &mut dyn Storage,
        crc: Option<&mut Crc32>,
        parent: Option<u32>,
        ctx: &LoadContext,
    ) -> Result<Option<Element>> {
        match peek_header(storage, ctx.options)? {
            Peeked::Eof => Ok(None),
            Peeked::Malformed(source) => Err(EbmlError::MalformedVarInt {
                offset: storage.position(),
                source,
            }),
            Peeked::Header(header) => Self::read_with_header(storage, header, crc, parent, ctx).map(Some),
        }
    }

    fn read_with_header(
        storage: &mut dyn Storage,
        header: ElementHeader,
        mut crc: Option<&mut Crc32>,
        parent: Option<u32>,
        ctx: &LoadContext,
    ) -> Result<Element> {
        let mut raw_header = vec![0u8; header.len() as usize];
        read_folded(storage, &mut raw_header, crc.as_deref_mut())?;

        let mut element = match ctx.schema.get(header.id) {
            Some(def) => {
                if !ctx.schema.accepts(parent, header.id) {
                    log::debug!(
                        "EBML: element {} ({:#X}) at offset {} is out of place",
                        def.name,
                        header.id,
                        header.offset
                    );
                }
                Element::from_def(def)
            }
            None => {
                log::debug!(
                    "EBML: unknown element {:#X} at offset {}, keeping it as binary",
                    header.id,
                    header.offset
                );
                Element::alien(header.id, Vec::new())
            }
        };

        element.size_width = match header.size {
            VSize::Unknown if header.size_len != UNKNOWN_SIZE_WIDTH => Some(header.size_len),
            VSize::Known(size) if Ok(header.size_len) != vsize_width(size) => Some(header.size_len),
            _ => None,
        };
        element.load(storage, header.size, crc, ctx)?;
        Ok(element)
    }

    /// Reads the payload of an element whose header was already consumed; returns the bytes read.
    pub fn load(
        &mut self,
        storage: &mut dyn Storage,
        size: VSize,
        crc: Option<&mut Crc32>,
        ctx: &LoadContext,
    ) -> Result<u64> {
        self.cached_size.set(None);
        if self.payload.is_master() {
            return self.load_master(storage, size, crc, ctx);
        }

        let offset = storage.position();
        let size = size
            .known()
            .ok_or(EbmlError::UnknownSizeScalar { id: self.id, offset })?;
        let available = storage.size()?.saturating_sub(offset);
        if size > available {
            return Err(EbmlError::SizeMismatch {
                id: self.id,
                offset,
                declared: size,
                actual: available,
            });
        }

        let mut data = vec![0u8; size as usize];
        read_folded(storage, &mut data, crc)?;
        self.decode_payload(data);
        Ok(size)
    }

    fn decode_payload(&mut self, data: Vec<u8>) {
        if self.kind() == ElementKind::Float {
            self.payload.match_float_width(data.len());
        }
        if let Err(e) = self.payload.decode(&data) {
            log::warn!(
                "EBML: element {:#X} holds {} byte(s) not decodable as {:?} ({}), keeping them as binary",
                self.id,
                data.len(),
                self.kind(),
                e
            );
            self.payload = Payload::alien(data);
        }
    }

    fn load_master(
        &mut self,
        storage: &mut dyn Storage,
        size: VSize,
        mut crc: Option<&mut Crc32>,
        ctx: &LoadContext,
    ) -> Result<u64> {
        let offset = storage.position();
        if ctx.depth > ctx.options.max_depth {
            return Err(EbmlError::TooDeep { offset });
        }

        let end = match size {
            VSize::Known(declared) => {
                let available = storage.size()?.saturating_sub(offset);
                if declared > available {
                    return Err(EbmlError::SizeMismatch {
                        id: self.id,
                        offset,
                        declared,
                        actual: available,
                    });
                }
                Some(offset + declared)
            }
            VSize::Unknown => {
                if !self.unknown_size_allowed {
                    log::warn!(
                        "EBML: element {:#X} at offset {} has an unknown size its definition does not allow",
                        self.id,
                        offset
                    );
                }
                None
            }
        };
        let limit = end.or(ctx.limit);
        let child_ctx = ctx.nested(limit);

        let mut children = Vec::new();
        let mut stored_crc: Option<u32> = None;
        let mut inner = Crc32::new();
        loop {
            let position = storage.position();
            if limit.map_or(false, |limit| position >= limit) {
                break;
            }

            let header = match peek_header(storage, ctx.options)? {
                Peeked::Eof => break,
                Peeked::Header(header) => header,
                Peeked::Malformed(source) => {
                    if let Some(end) = end {
                        let active = if stored_crc.is_some() { Some(&mut inner) } else { crc.as_deref_mut() };
                        children.push(self.recover_trailing(storage, end, active)?);
                        break;
                    } else if limit.is_some() {
                        // left for the enclosing master to recover
                        break;
                    }
                    return Err(EbmlError::MalformedVarInt {
                        offset: position,
                        source,
                    });
                }
            };

            if size.is_unknown() && ctx.schema.ends_unknown_size(self.id, header.id) {
                break;
            }

            if let Some(limit) = limit {
                let overruns = position + header.len() > limit
                    || header.end().map_or(false, |child_end| child_end > limit);
                if overruns {
                    if let Some(end) = end {
                        let active = if stored_crc.is_some() { Some(&mut inner) } else { crc.as_deref_mut() };
                        children.push(self.recover_trailing(storage, end, active)?);
                    }
                    break;
                }
            }

            if header.id == CRC32_ID
                && header.size == VSize::Known(4)
                && header.len() == 2
                && children.is_empty()
                && stored_crc.is_none()
            {
                if size.is_unknown() {
                    return Err(EbmlError::UnknownSizeChecksum { id: self.id });
                }
                let mut raw = [0u8; CRC_ELEMENT_LEN as usize];
                read_folded(storage, &mut raw, crc.as_deref_mut())?;
                stored_crc = Some(u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]));
                continue;
            }

            let active = if stored_crc.is_some() {
                Some(&mut inner)
            } else {
                crc.as_deref_mut()
            };
            let child = Self::read_with_header(storage, header, active, Some(self.id), &child_ctx)?;
            children.push(child);
        }

        let consumed = storage.position() - offset;
        if let Some(stored) = stored_crc {
            let computed = inner.finalize();
            if stored != computed {
                if ctx.options.verify_checksums {
                    return Err(EbmlError::ChecksumMismatch {
                        id: self.id,
                        offset,
                        stored,
                        computed,
                    });
                }
                log::warn!(
                    "EBML: checksum mismatch in element {:#X} at offset {} (stored {:#010X}, computed {:#010X})",
                    self.id,
                    offset,
                    stored,
                    computed
                );
            }
            if let Some(crc) = crc {
                crc.combine(&inner);
            }
        }

        self.payload = MasterPayload {
            children,
            checksum: stored_crc.is_some(),
            unknown_size: size.is_unknown(),
        }
        .into();
        Ok(consumed)
    }

    fn recover_trailing(
        &self,
        storage: &mut dyn Storage,
        end: u64,
        crc: Option<&mut Crc32>,
    ) -> Result<Element> {
        let position = storage.position();
        let mut bytes = vec![0u8; (end - position) as usize];
        let n = read_folded(storage, &mut bytes, crc)?;
        if n != bytes.len() {
            return Err(EbmlError::SizeMismatch {
                id: self.id,
                offset: position,
                declared: bytes.len() as u64,
                actual: n as u64,
            });
        }
        log::warn!(
            "EBML: {} undigested byte(s) at offset {} in element {:#X}, keeping them verbatim",
            n,
            position,
            self.id
        );
        Ok(Element::trailing(bytes))
    }
}
