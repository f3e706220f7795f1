use crate::error::{EbmlError, Result};
use crate::schema::{DefaultValue, ElementDef, ElementKind, Schema};

use serde_derive::Deserialize;
use serde_xml_rs::from_reader;

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;

// documentation, restriction and extension children are skipped by serde

pub(crate) mod custom_serde {
    pub(crate) mod hexadecimal {
        use serde::{de::Error as _, Deserialize, Deserializer};

        pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<u32, D::Error>
        where
            D: Deserializer<'de>,
        {
            u32::from_str_radix(
                String::deserialize(deserializer)?
                    .strip_prefix("0x")
                    .ok_or_else(|| D::Error::custom("missing hexadecimal prefix '0x'"))?,
                16,
            )
            .map_err(|e| D::Error::custom(format!("{}", e)))
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(rename = "EBMLSchema")]
#[serde(rename_all = "camelCase")]
pub(crate) struct EbmlSchema {
    pub(crate) doc_type: String,
    pub(crate) version: u32,
    pub(crate) ebml: Option<u32>,
    #[serde(rename = "$value")]
    pub(crate) elements: Option<Vec<XmlElement>>,
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(rename = "element")]
#[serde(rename_all = "camelCase")]
pub(crate) struct XmlElement {
    pub(crate) name: String,
    pub(crate) path: String,
    #[serde(with = "custom_serde::hexadecimal")]
    pub(crate) id: u32,
    pub(crate) min_occurs: Option<usize>,
    pub(crate) max_occurs: Option<usize>,
    pub(crate) default: Option<String>, // non-master elements only
    pub(crate) r#type: ElementType,
    pub(crate) unknownsizeallowed: Option<bool>, // master elements only
    pub(crate) recursive: Option<bool>,          // master elements only
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename = "type")]
pub(crate) enum ElementType {
    #[serde(rename = "integer")]
    SignedInteger,
    #[serde(rename = "uinteger")]
    UnsignedInteger,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "master")]
    Master,
    #[serde(rename = "binary")]
    Binary,
}

impl From<ElementType> for ElementKind {
    fn from(value: ElementType) -> Self {
        match value {
            ElementType::SignedInteger => ElementKind::Int,
            ElementType::UnsignedInteger => ElementKind::UInt,
            ElementType::Float => ElementKind::Float,
            ElementType::String => ElementKind::String,
            ElementType::Date => ElementKind::Date,
            ElementType::Utf8 => ElementKind::Utf8,
            ElementType::Master => ElementKind::Master,
            ElementType::Binary => ElementKind::Binary,
        }
    }
}

/// One `\`-separated step of an element path, e.g. `(1-)Void`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathAtom {
    // `(…)` prefix: the element may sit at any depth
    pub(crate) global: bool,
    pub(crate) name: String,
}

pub(crate) fn path_atoms(path: &str) -> Result<Vec<PathAtom>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    path.replace("\\)", ")") // global placeholders also use '\'
        .strip_prefix('\\')
        .ok_or_else(|| EbmlError::Schema(format!("path {:?} is missing its leading '\\'", path)))?
        .split('\\')
        .map(|atom| {
            let divider = atom.find(')').map_or(0, |i| i + 1);
            let (placeholder, name) = atom.split_at(divider);
            if !placeholder.is_empty() && !placeholder.starts_with('(') {
                return Err(EbmlError::Schema(format!(
                    "invalid global placeholder in path {:?}",
                    path
                )));
            }
            Ok(PathAtom {
                global: !placeholder.is_empty(),
                name: name.to_string(),
            })
        })
        .collect()
}

// hexadecimal floats as used by schema files, e.g. `0x1p+0` or `0x1.f4p+12`
fn parse_hex_float(s: &str) -> Option<f64> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    let (mantissa, exponent) = s.split_once(|c| c == 'p' || c == 'P')?;
    let exponent: i32 = exponent.parse().ok()?;
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    let mut value = 0f64;
    for digit in whole.chars() {
        value = value * 16.0 + f64::from(digit.to_digit(16)?);
    }
    let mut scale = 1.0 / 16.0;
    for digit in fraction.chars() {
        value += f64::from(digit.to_digit(16)?) * scale;
        scale /= 16.0;
    }
    let value = value * 2f64.powi(exponent);
    Some(if negative { -value } else { value })
}

fn parse_default(element: &XmlElement, raw: &str) -> Result<Option<DefaultValue>> {
    let invalid = || {
        EbmlError::Schema(format!(
            "invalid default {:?} for element {}",
            raw, element.name
        ))
    };
    let value = match ElementKind::from(element.r#type) {
        ElementKind::UInt => DefaultValue::UInt(match raw.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
            None => raw.parse().map_err(|_| invalid())?,
        }),
        ElementKind::Int => DefaultValue::Int(raw.parse().map_err(|_| invalid())?),
        ElementKind::Float => DefaultValue::Float(
            raw.parse()
                .ok()
                .or_else(|| parse_hex_float(raw))
                .ok_or_else(invalid)?,
        ),
        ElementKind::String | ElementKind::Utf8 => DefaultValue::String(Cow::Owned(raw.to_string())),
        ElementKind::Date => DefaultValue::Date(raw.parse().map_err(|_| invalid())?),
        ElementKind::Master | ElementKind::Binary => {
            log::debug!(
                "EBML: ignoring default of {:?} element {}",
                element.r#type,
                element.name
            );
            return Ok(None);
        }
    };
    Ok(Some(value))
}

impl Schema {
    /// Builds a schema from an RFC 8794 XML schema, on top of the EBML header elements.
    pub fn from_xml<R: Read>(reader: R) -> Result<Self> {
        let parsed: EbmlSchema = from_reader(reader)?;
        let mut schema = Schema::with_ebml_header(&parsed.doc_type);
        schema.define_xml(parsed)?;
        Ok(schema)
    }

    /// Adds the element definitions of an RFC 8794 XML schema.
    pub fn extend_from_xml<R: Read>(&mut self, reader: R) -> Result<()> {
        let parsed: EbmlSchema = from_reader(reader)?;
        self.define_xml(parsed)
    }

    fn define_xml(&mut self, parsed: EbmlSchema) -> Result<()> {
        let mut entries = Vec::new();
        for element in parsed.elements.unwrap_or_default() {
            let atoms = path_atoms(&element.path)?;
            if atoms.last().map(|atom| atom.name.as_str()) != Some(element.name.as_str()) {
                return Err(EbmlError::Schema(format!(
                    "path {:?} does not end in element {}",
                    element.path, element.name
                )));
            }
            entries.push((atoms, element));
        }

        // names resolve parents, whatever order the file lists them in
        let ids: HashMap<String, u32> = entries
            .iter()
            .map(|(_, element)| (element.name.clone(), element.id))
            .collect();
        entries.sort_by_key(|(atoms, _)| atoms.len());

        let mut defined = 0;
        for (atoms, element) in entries {
            let mut def = ElementDef::new(element.id, element.name.clone(), element.r#type.into());
            if let Some(raw) = &element.default {
                if let Some(default) = parse_default(&element, raw)? {
                    def = def.with_default(default);
                }
            }
            if element.min_occurs.unwrap_or(0) >= 1 {
                def = def.mandatory();
            }
            if element.max_occurs != Some(1) {
                def = def.multiple();
            }
            if element.unknownsizeallowed == Some(true) {
                def = def.unknown_size_allowed();
            }

            defined += 1;
            let last = atoms.len() - 1;
            if atoms[last].global {
                self.define_global(def)?;
                continue;
            }
            let parent = match last.checked_sub(1) {
                Some(index) => {
                    let name = &atoms[index].name;
                    Some(*ids.get(name).ok_or_else(|| {
                        EbmlError::Schema(format!(
                            "parent {} of element {} is not defined",
                            name, element.name
                        ))
                    })?)
                }
                None => None,
            };
            let recursive = element.recursive == Some(true);
            self.define(parent, def.clone())?;
            if recursive {
                self.define(Some(element.id), def)?;
            }
        }

        log::debug!(
            "EBML: schema {} read {} element definition(s) from XML",
            self.doc_type(),
            defined
        );
        Ok(())
    }
}
