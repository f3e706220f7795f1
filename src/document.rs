use crate::checksum::Crc32;
use crate::config::ReadOptions;
use crate::element::{peek_header, Element, LoadContext, Peeked};
use crate::error::{EbmlError, Result};
use crate::matroska::{ids, EbmlHeader};
use crate::schema::Schema;
use crate::storage::Storage;

/// A whole EBML stream: the header followed by the body's top-level elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub header: EbmlHeader,
    pub body: Vec<Element>,
}

impl Document {
    /// A document with a default header for `schema`'s doc type and an empty body.
    pub fn new(schema: &Schema) -> Result<Self> {
        Ok(Self {
            header: EbmlHeader::new(schema)?,
            body: Vec::new(),
        })
    }

    pub fn calc_size(&self) -> u64 {
        self.header.element().calc_size() + self.body.iter().map(Element::calc_size).sum::<u64>()
    }

    /// Writes the header and the body; returns the number of bytes written.
    pub fn save(&self, storage: &mut dyn Storage, mut crc: Option<&mut Crc32>) -> Result<u64> {
        let start = storage.position();
        self.header.element().save(storage, crc.as_deref_mut())?;
        for element in &self.body {
            element.save(storage, crc.as_deref_mut())?;
        }
        Ok(storage.position() - start)
    }

    /// Reads a document from the cursor to the end of the storage.
    ///
    /// The header's `EBMLMaxIDLength` and `EBMLMaxSizeLength` bound the
    /// var-ints of the body, within the limits of `options`.
    pub fn load(storage: &mut dyn Storage, schema: &Schema, options: &ReadOptions) -> Result<Self> {
        let offset = storage.position();
        let ctx = LoadContext::new(schema, options);
        let header = match peek_header(storage, options)? {
            Peeked::Header(header) if header.id == ids::EBML => {
                Element::read_from(storage, None, None, &ctx)?
            }
            _ => None,
        };
        let header = match header {
            Some(header) => EbmlHeader::from_element(header)?,
            None => return Err(EbmlError::MissingHeader { offset }),
        };

        if header.doc_type() != schema.doc_type() {
            log::warn!(
                "EBML: document type {:?} loaded with the {:?} schema",
                header.doc_type(),
                schema.doc_type()
            );
        }

        let mut body_options = *options;
        body_options.max_id_length(usize::min(
            header.max_id_length() as usize,
            options.max_id_length,
        ));
        body_options.max_size_length(usize::min(
            header.max_size_length() as usize,
            options.max_size_length,
        ));
        let ctx = LoadContext::new(schema, &body_options);

        let mut body = Vec::new();
        while let Some(element) = Element::read_from(storage, None, None, &ctx)? {
            body.push(element);
        }
        log::debug!(
            "EBML: loaded {} document with {} top-level element(s)",
            header.doc_type(),
            body.len()
        );

        Ok(Self { header, body })
    }

    pub fn get(&self, id: u32) -> Option<&Element> {
        self.body.iter().find(|element| element.id() == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Element> {
        self.body.iter_mut().find(|element| element.id() == id)
    }

    /// Total number of alien elements in the header and the body.
    pub fn alien_count(&self) -> usize {
        self.header.element().alien_count()
            + self.body.iter().map(Element::alien_count).sum::<usize>()
    }
}
