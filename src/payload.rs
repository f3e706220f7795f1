use crate::element::Element;
use crate::error::VarIntError;
use crate::schema::{DefaultValue, ElementKind};
use crate::stream::{int_width, parse, serialize, uint_width};

use enum_dispatch::enum_dispatch;
use std::borrow::Cow;

/// Seconds between the Unix epoch and the EBML date epoch (2001-01-01T00:00:00 UTC).
pub const EBML_EPOCH_UNIX_SECS: i64 = 978_307_200;
const EBML_EPOCH_UNIX_NANOS: i64 = EBML_EPOCH_UNIX_SECS * 1_000_000_000;

/// Byte width requested for an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Width {
    #[default]
    Minimal,
    /// Used when the value fits, minimal otherwise.
    Preferred(usize),
    /// Saving fails when the value does not fit.
    Fixed(usize),
}

impl Width {
    fn resolve(self, minimal: usize, fits: impl Fn(usize) -> bool) -> usize {
        match self {
            Self::Preferred(n) | Self::Fixed(n) if fits(n) => n,
            _ => minimal,
        }
    }

    fn check(self, value: u64, fits: impl Fn(usize) -> bool) -> Result<(), VarIntError> {
        match self {
            Self::Fixed(width) if !fits(width) => Err(VarIntError::DoesNotFit { value, width }),
            _ => Ok(()),
        }
    }

    fn observed(actual: usize, minimal: usize) -> Self {
        if actual == minimal {
            Self::Minimal
        } else {
            Self::Preferred(actual)
        }
    }
}

/// Encoding behavior shared by every payload kind.
///
/// Masters have no payload bytes of their own: `Element::save` and `Element::load` walk their
/// children, so `encode` yields nothing and `decode` rejects input for them.
#[enum_dispatch]
pub trait PayloadCodec {
    fn kind(&self) -> ElementKind;
    fn data_size(&self) -> u64;
    fn is_default(&self) -> bool;
    fn reset_to_default(&mut self);
    fn encode(&self) -> Result<Vec<u8>, VarIntError>;
    fn decode(&mut self, bytes: &[u8]) -> Result<(), VarIntError>;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UIntPayload {
    pub value: u64,
    pub default: Option<u64>,
    pub width: Width,
}

impl UIntPayload {
    pub fn new(value: u64) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn with_default(default: u64) -> Self {
        Self {
            value: default,
            default: Some(default),
            width: Width::Minimal,
        }
    }

    fn fits(&self, width: usize) -> bool {
        width <= 8 && (width >= uint_width(self.value) || (width == 0 && self.value == 0))
    }
}

impl PayloadCodec for UIntPayload {
    fn kind(&self) -> ElementKind {
        ElementKind::UInt
    }

    fn data_size(&self) -> u64 {
        self.width.resolve(uint_width(self.value), |n| self.fits(n)) as u64
    }

    fn is_default(&self) -> bool {
        self.default == Some(self.value)
    }

    fn reset_to_default(&mut self) {
        self.value = self.default.unwrap_or_default();
    }

    fn encode(&self) -> Result<Vec<u8>, VarIntError> {
        self.width.check(self.value, |n| self.fits(n))?;
        serialize::uint(self.value, Some(self.data_size() as usize))
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), VarIntError> {
        let (_, value) = parse::uint(bytes, bytes.len())?;
        self.value = value;
        self.width = Width::observed(bytes.len(), uint_width(value));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntPayload {
    pub value: i64,
    pub default: Option<i64>,
    pub width: Width,
}

impl IntPayload {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn with_default(default: i64) -> Self {
        Self {
            value: default,
            default: Some(default),
            width: Width::Minimal,
        }
    }

    fn fits(&self, width: usize) -> bool {
        width <= 8 && (width >= int_width(self.value) || (width == 0 && self.value == 0))
    }
}

impl PayloadCodec for IntPayload {
    fn kind(&self) -> ElementKind {
        ElementKind::Int
    }

    fn data_size(&self) -> u64 {
        self.width.resolve(int_width(self.value), |n| self.fits(n)) as u64
    }

    fn is_default(&self) -> bool {
        self.default == Some(self.value)
    }

    fn reset_to_default(&mut self) {
        self.value = self.default.unwrap_or_default();
    }

    fn encode(&self) -> Result<Vec<u8>, VarIntError> {
        self.width.check(self.value as u64, |n| self.fits(n))?;
        serialize::int(self.value, Some(self.data_size() as usize))
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), VarIntError> {
        let (_, value) = parse::int(bytes, bytes.len())?;
        self.value = value;
        self.width = Width::observed(bytes.len(), int_width(value));
        Ok(())
    }
}

/// 4-byte float.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FloatPayload {
    pub value: f32,
    pub default: Option<f64>,
    pub width: Width,
}

impl FloatPayload {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    fn fits(&self, width: usize) -> bool {
        width == 4 || (width == 0 && self.value.to_bits() == 0)
    }
}

impl PayloadCodec for FloatPayload {
    fn kind(&self) -> ElementKind {
        ElementKind::Float
    }

    fn data_size(&self) -> u64 {
        self.width.resolve(4, |n| self.fits(n)) as u64
    }

    fn is_default(&self) -> bool {
        self.default == Some(f64::from(self.value))
    }

    fn reset_to_default(&mut self) {
        self.value = self.default.unwrap_or_default() as f32;
    }

    fn encode(&self) -> Result<Vec<u8>, VarIntError> {
        self.width
            .check(u64::from(self.value.to_bits()), |n| self.fits(n))?;
        match self.data_size() {
            0 => Ok(Vec::new()),
            _ => Ok(serialize::float32(self.value).to_vec()),
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), VarIntError> {
        let (_, value) = parse::float32(bytes, bytes.len())?;
        self.value = value;
        self.width = Width::observed(bytes.len(), 4);
        Ok(())
    }
}

/// 8-byte float.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DoublePayload {
    pub value: f64,
    pub default: Option<f64>,
    pub width: Width,
}

impl DoublePayload {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn with_default(default: f64) -> Self {
        Self {
            value: default,
            default: Some(default),
            width: Width::Minimal,
        }
    }

    fn fits(&self, width: usize) -> bool {
        width == 8 || (width == 0 && self.value.to_bits() == 0)
    }
}

impl PayloadCodec for DoublePayload {
    fn kind(&self) -> ElementKind {
        ElementKind::Float
    }

    fn data_size(&self) -> u64 {
        self.width.resolve(8, |n| self.fits(n)) as u64
    }

    fn is_default(&self) -> bool {
        self.default == Some(self.value)
    }

    fn reset_to_default(&mut self) {
        self.value = self.default.unwrap_or_default();
    }

    fn encode(&self) -> Result<Vec<u8>, VarIntError> {
        self.width.check(self.value.to_bits(), |n| self.fits(n))?;
        match self.data_size() {
            0 => Ok(Vec::new()),
            _ => Ok(serialize::float64(self.value).to_vec()),
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), VarIntError> {
        let (_, value) = parse::float64(bytes, bytes.len())?;
        self.value = value;
        self.width = Width::observed(bytes.len(), 8);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryOrigin {
    #[default]
    Declared,
    /// Element ID unknown to the schema, or data not decodable as the declared kind.
    Alien,
    /// Headerless bytes left over at the end of a master.
    Trailing,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BinaryPayload {
    pub value: Vec<u8>,
    pub origin: BinaryOrigin,
}

impl BinaryPayload {
    pub fn new(value: Vec<u8>) -> Self {
        Self {
            value,
            origin: BinaryOrigin::Declared,
        }
    }
}

impl PayloadCodec for BinaryPayload {
    fn kind(&self) -> ElementKind {
        ElementKind::Binary
    }

    fn data_size(&self) -> u64 {
        self.value.len() as u64
    }

    fn is_default(&self) -> bool {
        false
    }

    fn reset_to_default(&mut self) {
        self.value.clear();
    }

    fn encode(&self) -> Result<Vec<u8>, VarIntError> {
        Ok(self.value.clone())
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), VarIntError> {
        self.value = bytes.to_vec();
        Ok(())
    }
}

macro_rules! text_payload {
    ($name:ident, $kind:expr, $valid:expr) => {
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            pub value: String,
            pub default: Option<Cow<'static, str>>,
            pub width: Width,
        }

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self {
                    value: value.into(),
                    ..Self::default()
                }
            }

            pub fn with_default(default: Cow<'static, str>) -> Self {
                Self {
                    value: default.to_string(),
                    default: Some(default),
                    width: Width::Minimal,
                }
            }

            fn fits(&self, width: usize) -> bool {
                width >= self.value.len()
            }
        }

        impl PayloadCodec for $name {
            fn kind(&self) -> ElementKind {
                $kind
            }

            fn data_size(&self) -> u64 {
                self.width.resolve(self.value.len(), |n| self.fits(n)) as u64
            }

            fn is_default(&self) -> bool {
                self.default.as_deref() == Some(self.value.as_str())
            }

            fn reset_to_default(&mut self) {
                self.value = self.default.as_deref().unwrap_or_default().to_string();
            }

            fn encode(&self) -> Result<Vec<u8>, VarIntError> {
                self.width.check(self.value.len() as u64, |n| self.fits(n))?;
                serialize::string(&self.value, Some(self.data_size() as usize))
            }

            fn decode(&mut self, bytes: &[u8]) -> Result<(), VarIntError> {
                let (_, value) = parse::string(bytes, bytes.len())?;
                // padding must be NULs for the value to re-save unchanged
                if !($valid)(value) || bytes[value.len()..].iter().any(|&b| b != 0) {
                    return Err(VarIntError::InvalidPayload);
                }
                self.value = value.to_string();
                self.width = Width::observed(bytes.len(), value.len());
                Ok(())
            }
        }
    };
}

text_payload!(StringPayload, ElementKind::String, |s: &str| s.is_ascii());
text_payload!(Utf8Payload, ElementKind::Utf8, |_: &str| true);

/// Nanoseconds since 2001-01-01T00:00:00 UTC.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatePayload {
    pub value: i64,
    pub default: Option<i64>,
    pub width: Width,
}

impl DatePayload {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// `None` when the instant falls outside the range of an EBML date.
    pub fn from_unix_nanos(nanos: i64) -> Option<Self> {
        nanos.checked_sub(EBML_EPOCH_UNIX_NANOS).map(Self::new)
    }

    /// `None` when the date falls outside the range of a Unix timestamp in nanoseconds.
    pub fn unix_nanos(&self) -> Option<i64> {
        self.value.checked_add(EBML_EPOCH_UNIX_NANOS)
    }

    fn fits(&self, width: usize) -> bool {
        width == 8 || (width == 0 && self.value == 0)
    }
}

impl PayloadCodec for DatePayload {
    fn kind(&self) -> ElementKind {
        ElementKind::Date
    }

    fn data_size(&self) -> u64 {
        self.width.resolve(8, |n| self.fits(n)) as u64
    }

    fn is_default(&self) -> bool {
        self.default == Some(self.value)
    }

    fn reset_to_default(&mut self) {
        self.value = self.default.unwrap_or_default();
    }

    fn encode(&self) -> Result<Vec<u8>, VarIntError> {
        self.width.check(self.value as u64, |n| self.fits(n))?;
        match self.data_size() {
            0 => Ok(Vec::new()),
            _ => Ok(serialize::date(self.value).to_vec()),
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), VarIntError> {
        let (_, value) = parse::date(bytes, bytes.len())?;
        self.value = value;
        self.width = Width::observed(bytes.len(), 8);
        Ok(())
    }
}

/// Length of a CRC-32 element: 1-byte ID, 1-byte size, 4-byte value.
pub const CRC_ELEMENT_LEN: u64 = 6;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasterPayload {
    pub children: Vec<Element>,
    /// Saved with a leading CRC-32 element over the children.
    pub checksum: bool,
    /// Saved with the unknown-size marker instead of a byte count.
    pub unknown_size: bool,
}

impl MasterPayload {
    pub fn new(children: Vec<Element>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }
}

impl PayloadCodec for MasterPayload {
    fn kind(&self) -> ElementKind {
        ElementKind::Master
    }

    fn data_size(&self) -> u64 {
        let crc = if self.checksum { CRC_ELEMENT_LEN } else { 0 };
        crc + self.children.iter().map(Element::calc_size).sum::<u64>()
    }

    fn is_default(&self) -> bool {
        false
    }

    fn reset_to_default(&mut self) {
        self.children.clear();
    }

    fn encode(&self) -> Result<Vec<u8>, VarIntError> {
        Ok(Vec::new())
    }

    fn decode(&mut self, _bytes: &[u8]) -> Result<(), VarIntError> {
        Err(VarIntError::InvalidPayload)
    }
}

#[enum_dispatch(PayloadCodec)]
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    UInt(UIntPayload),
    Int(IntPayload),
    Float(FloatPayload),
    Double(DoublePayload),
    Binary(BinaryPayload),
    String(StringPayload),
    Utf8(Utf8Payload),
    Date(DatePayload),
    Master(MasterPayload),
}

impl Payload {
    /// An empty payload of `kind`, holding `default` when one applies.
    pub fn for_kind(kind: ElementKind, default: Option<&DefaultValue>) -> Self {
        match (kind, default) {
            (ElementKind::Master, _) => MasterPayload::default().into(),
            (ElementKind::UInt, Some(DefaultValue::UInt(d))) => UIntPayload::with_default(*d).into(),
            (ElementKind::UInt, _) => UIntPayload::default().into(),
            (ElementKind::Int, Some(DefaultValue::Int(d))) => IntPayload::with_default(*d).into(),
            (ElementKind::Int, _) => IntPayload::default().into(),
            (ElementKind::Float, Some(DefaultValue::Float(d))) => {
                DoublePayload::with_default(*d).into()
            }
            (ElementKind::Float, _) => DoublePayload::default().into(),
            (ElementKind::String, Some(DefaultValue::String(d))) => {
                StringPayload::with_default(d.clone()).into()
            }
            (ElementKind::String, _) => StringPayload::default().into(),
            (ElementKind::Utf8, Some(DefaultValue::String(d))) => {
                Utf8Payload::with_default(d.clone()).into()
            }
            (ElementKind::Utf8, _) => Utf8Payload::default().into(),
            (ElementKind::Date, Some(DefaultValue::Date(d))) => DatePayload {
                value: *d,
                default: Some(*d),
                width: Width::Minimal,
            }
            .into(),
            (ElementKind::Date, _) => DatePayload::default().into(),
            (ElementKind::Binary, _) => BinaryPayload::default().into(),
        }
    }

    pub fn alien(value: Vec<u8>) -> Self {
        BinaryPayload {
            value,
            origin: BinaryOrigin::Alien,
        }
        .into()
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master(_))
    }

    /// Swaps between the 4- and 8-byte float forms to match a stored width, keeping the default.
    pub(crate) fn match_float_width(&mut self, width: usize) {
        match (width, &*self) {
            (4, Self::Double(double)) => {
                *self = FloatPayload {
                    value: double.value as f32,
                    default: double.default,
                    width: double.width,
                }
                .into()
            }
            (8, Self::Float(float)) => {
                *self = DoublePayload {
                    value: f64::from(float.value),
                    default: float.default,
                    width: float.width,
                }
                .into()
            }
            _ => {}
        }
    }
}
