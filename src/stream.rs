use crate::error::VarIntError;

pub const MAX_VSIZE_WIDTH: usize = 8;
pub const MAX_ID_WIDTH: usize = 4;

/// A decoded element size: either a concrete byte count or the reserved "unknown" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VSize {
    Known(u64),
    Unknown,
}

impl VSize {
    pub fn known(self) -> Option<u64> {
        match self {
            Self::Known(n) => Some(n),
            Self::Unknown => None,
        }
    }

    pub fn is_unknown(self) -> bool {
        self == Self::Unknown
    }
}

// all VINT_DATA bits set to 1
fn all_ones(width: usize) -> u64 {
    (1u64 << (7 * width)) - 1
}

fn signed_bias(width: usize) -> i64 {
    (1i64 << (7 * width - 1)) - 1
}

/// Largest concrete value a vsize of `width` bytes can hold.
pub fn vsize_max(width: usize) -> u64 {
    all_ones(width) - 1
}

/// Smallest vsize width able to hold `value` without producing the unknown-size marker.
pub fn vsize_width(value: u64) -> Result<usize, VarIntError> {
    (1..=MAX_VSIZE_WIDTH)
        .find(|&width| value <= vsize_max(width))
        .ok_or(VarIntError::DoesNotFit {
            value,
            width: MAX_VSIZE_WIDTH,
        })
}

pub fn uint_width(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    std::cmp::max(1, (bits + 7) / 8)
}

pub fn int_width(value: i64) -> usize {
    // need one leading bit for the sign
    let bits = 65 - std::cmp::max(value.leading_zeros(), value.leading_ones()) as usize;
    (bits + 7) / 8
}

pub fn id_width(id: u32) -> usize {
    let bits = 32 - id.leading_zeros() as usize;
    std::cmp::max(1, (bits + 7) / 8)
}

pub mod parse {
    use super::{all_ones, signed_bias, VSize, MAX_ID_WIDTH, MAX_VSIZE_WIDTH};
    use crate::error::VarIntError;

    use std::cmp::min;
    use std::ops::RangeFrom;

    use nom::{
        bits::streaming::take as take_bits, bytes::streaming::take as take_bytes,
        error::ParseError, Err, IResult, InputIter, InputLength, Needed, Slice, ToUsize,
    };

    fn take_rem<I, E: ParseError<(I, usize)>>(
    ) -> impl Fn((I, usize)) -> IResult<(I, usize), (u8, usize), E>
    where
        I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
    {
        move |(input, bit_offset): (I, usize)| {
            let bitlen = (8usize - bit_offset) % 8usize;
            take_bits(bitlen)((input, bit_offset))
                .map(move |((input, bit_offset), bits)| ((input, bit_offset), (bits, bitlen)))
        }
    }

    fn take_zeros<I, C, E: ParseError<(I, usize)>>(
        max_count: C,
    ) -> impl Fn((I, usize)) -> IResult<(I, usize), usize, E>
    where
        I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
        C: ToUsize,
    {
        let max_count = max_count.to_usize();
        move |(mut input, bit_offset): (I, usize)| {
            if max_count == 0 {
                return Ok(((input, bit_offset), 0usize));
            }

            let mut streak_len: usize = 0;
            let mut item = input
                .iter_elements()
                .next()
                .ok_or_else(|| Err::Incomplete(Needed::new(1)))?;
            item &= 0xFF >> bit_offset; // mask out first `bit_offset` bits

            streak_len += (item.leading_zeros() as usize) - bit_offset;
            while item.leading_zeros() == 8 && streak_len <= max_count {
                input = input.slice(1..);
                if streak_len == max_count {
                    break;
                };
                item = input
                    .iter_elements()
                    .next()
                    .ok_or_else(|| Err::Incomplete(Needed::new(1)))?;
                streak_len += item.leading_zeros() as usize;
            }
            streak_len = min(streak_len, max_count);

            Ok(((input, (streak_len + bit_offset) % 8), streak_len))
        }
    }

    /// Reads a var-int of at most `max_width` bytes, returning its value and width.
    ///
    /// With `retain_marker` the length marker bit stays in the value (element IDs).
    pub fn vint(
        input: &[u8],
        max_width: usize,
        retain_marker: bool,
    ) -> IResult<&[u8], (u64, usize), VarIntError> {
        if input.is_empty() {
            return Err(Err::Error(VarIntError::Empty));
        }

        let ((rest, bit_offset), zeros) = take_zeros::<_, _, VarIntError>(MAX_VSIZE_WIDTH)((input, 0usize))?;
        let width = zeros + 1;
        if zeros >= MAX_VSIZE_WIDTH || width > max_width {
            return Err(Err::Error(VarIntError::TooWide { max: max_width }));
        }
        let ((rest, bit_offset), _marker) =
            take_bits::<_, u8, _, VarIntError>(1usize)((rest, bit_offset))?;
        let ((rest, _), (leftover_bits, _)) = take_rem::<_, VarIntError>()((rest, bit_offset))?;
        let (rest, bytes) = take_bytes(zeros)(rest)?;

        let mut value = u64::from(leftover_bits);
        if retain_marker {
            value |= u64::from(0x80u8 >> zeros);
        }
        for byte in bytes {
            value = (value << 8) | u64::from(*byte);
        }

        Ok((rest, (value, width)))
    }

    pub fn vsize(input: &[u8], max_width: usize) -> IResult<&[u8], (VSize, usize), VarIntError> {
        let (rest, (value, width)) = vint(input, max_width, false)?;
        let size = if value == all_ones(width) {
            VSize::Unknown
        } else {
            VSize::Known(value)
        };

        Ok((rest, (size, width)))
    }

    pub fn vsize_signed(input: &[u8]) -> IResult<&[u8], (i64, usize), VarIntError> {
        let (rest, (value, width)) = vint(input, MAX_VSIZE_WIDTH, false)?;
        if value == all_ones(width) {
            return Err(Err::Error(VarIntError::Reserved));
        }

        Ok((rest, (value as i64 - signed_bias(width), width)))
    }

    pub fn element_id(input: &[u8], max_width: usize) -> IResult<&[u8], (u32, usize), VarIntError> {
        let (rest, (value, width)) = vint(input, min(max_width, MAX_ID_WIDTH), true)?;

        let data = value ^ (0x80u64 << (8 * (width - 1)));
        if data == 0 || data == all_ones(width) {
            // corner-case: reserved ID's
            return Err(Err::Error(VarIntError::Reserved));
        }
        if width > 1 && data < all_ones(width - 1) {
            // element ID's must use the smallest representation possible
            return Err(Err::Error(VarIntError::InvalidId(value)));
        }

        Ok((rest, (value as u32, width)))
    }

    fn parse_length<'a>(
        input: &'a [u8],
        buffer: &mut [u8],
    ) -> IResult<&'a [u8], (), VarIntError> {
        let (input, bytes) = take_bytes(buffer.len())(input)?;
        buffer.copy_from_slice(bytes);

        Ok((input, ()))
    }

    pub fn uint(input: &[u8], length: usize) -> IResult<&[u8], u64, VarIntError> {
        if length > 8 {
            return Err(Err::Error(VarIntError::InvalidWidth(length)));
        }

        let mut buffer = [0u8; 8];
        let (input, _) = parse_length(input, &mut buffer[8 - length..])?;

        Ok((input, u64::from_be_bytes(buffer)))
    }

    pub fn int(input: &[u8], length: usize) -> IResult<&[u8], i64, VarIntError> {
        if length > 8 {
            return Err(Err::Error(VarIntError::InvalidWidth(length)));
        }

        let negative = length > 0 && input.first().map_or(false, |b| b & 0x80 != 0);
        let mut buffer = [if negative { 0xFF } else { 0x00 }; 8];
        let (input, _) = parse_length(input, &mut buffer[8 - length..])?;

        Ok((input, i64::from_be_bytes(buffer)))
    }

    pub fn float32(input: &[u8], length: usize) -> IResult<&[u8], f32, VarIntError> {
        match length {
            0 => Ok((input, 0.0)),
            4 => {
                let mut buffer = [0u8; 4];
                let (input, _) = parse_length(input, &mut buffer)?;
                Ok((input, f32::from_be_bytes(buffer)))
            }
            _ => Err(Err::Error(VarIntError::InvalidWidth(length))),
        }
    }

    pub fn float64(input: &[u8], length: usize) -> IResult<&[u8], f64, VarIntError> {
        match length {
            0 => Ok((input, 0.0)),
            8 => {
                let mut buffer = [0u8; 8];
                let (input, _) = parse_length(input, &mut buffer)?;
                Ok((input, f64::from_be_bytes(buffer)))
            }
            _ => Err(Err::Error(VarIntError::InvalidWidth(length))),
        }
    }

    /// Reads a string field; the value ends at the first NUL byte.
    pub fn string(input: &[u8], length: usize) -> IResult<&[u8], &str, VarIntError> {
        let (input, bytes) = take_bytes(length)(input)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let result =
            std::str::from_utf8(&bytes[..end]).or(Err(Err::Error(VarIntError::InvalidPayload)))?;

        Ok((input, result))
    }

    pub fn date(input: &[u8], length: usize) -> IResult<&[u8], i64, VarIntError> {
        match length {
            0 => Ok((input, 0)),
            8 => int(input, length),
            _ => Err(Err::Error(VarIntError::InvalidWidth(length))),
        }
    }

    pub fn binary(input: &[u8], length: usize) -> IResult<&[u8], &[u8], VarIntError> {
        take_bytes(length)(input)
    }

}

pub mod serialize {
    use super::{
        all_ones, id_width, int_width, parse, signed_bias, uint_width, vsize_max, vsize_width,
        MAX_ID_WIDTH, MAX_VSIZE_WIDTH,
    };
    use crate::error::VarIntError;

    fn resolve_width(needed: usize, width: Option<usize>, value: u64) -> Result<usize, VarIntError> {
        match width {
            None => Ok(needed),
            Some(w) if w == 0 || w > MAX_VSIZE_WIDTH => Err(VarIntError::InvalidWidth(w)),
            Some(w) if w < needed => Err(VarIntError::DoesNotFit { value, width: w }),
            Some(w) => Ok(w),
        }
    }

    fn vint_bytes(value: u64, width: usize) -> Vec<u8> {
        let mut output = value.to_be_bytes()[8 - width..].to_vec();
        output[0] |= 0x80 >> (width - 1);
        output
    }

    pub fn vsize(value: u64, width: Option<usize>) -> Result<Vec<u8>, VarIntError> {
        let width = resolve_width(vsize_width(value)?, width, value)?;
        debug_assert!(value <= vsize_max(width));
        Ok(vint_bytes(value, width))
    }

    pub fn unknown_vsize(width: usize) -> Result<Vec<u8>, VarIntError> {
        if width == 0 || width > MAX_VSIZE_WIDTH {
            return Err(VarIntError::InvalidWidth(width));
        }
        Ok(vint_bytes(all_ones(width), width))
    }

    pub fn vsize_signed(value: i64, width: Option<usize>) -> Result<Vec<u8>, VarIntError> {
        let needed = (1..=MAX_VSIZE_WIDTH)
            .find(|&w| value.unsigned_abs() <= signed_bias(w) as u64)
            .ok_or(VarIntError::DoesNotFit {
                value: value as u64,
                width: MAX_VSIZE_WIDTH,
            })?;
        let width = resolve_width(needed, width, value as u64)?;

        Ok(vint_bytes((value + signed_bias(width)) as u64, width))
    }

    pub fn element_id(id: u32) -> Result<Vec<u8>, VarIntError> {
        let width = id_width(id);
        let first = (id >> (8 * (width - 1))) as u8;
        if width > MAX_ID_WIDTH || first.leading_zeros() as usize != width - 1 {
            return Err(VarIntError::InvalidId(u64::from(id)));
        }

        let output = id.to_be_bytes()[4 - width..].to_vec();
        parse::element_id(&output, MAX_ID_WIDTH).map_err(VarIntError::from)?;
        Ok(output)
    }

    pub fn uint(value: u64, width: Option<usize>) -> Result<Vec<u8>, VarIntError> {
        if width == Some(0) && value == 0 {
            return Ok(Vec::new());
        }
        let width = resolve_width(uint_width(value), width, value)?;

        Ok(value.to_be_bytes()[8 - width..].to_vec())
    }

    pub fn int(value: i64, width: Option<usize>) -> Result<Vec<u8>, VarIntError> {
        if width == Some(0) && value == 0 {
            return Ok(Vec::new());
        }
        let width = resolve_width(int_width(value), width, value as u64)?;

        Ok(value.to_be_bytes()[8 - width..].to_vec())
    }

    pub fn float32(value: f32) -> [u8; 4] {
        value.to_be_bytes()
    }

    pub fn float64(value: f64) -> [u8; 8] {
        value.to_be_bytes()
    }

    /// Writes `value`, NUL-padded up to `length` when one is given.
    pub fn string(value: &str, length: Option<usize>) -> Result<Vec<u8>, VarIntError> {
        let mut output = value.as_bytes().to_vec();
        if let Some(length) = length {
            if length < output.len() {
                return Err(VarIntError::DoesNotFit {
                    value: output.len() as u64,
                    width: length,
                });
            }
            output.resize(length, 0);
        }

        Ok(output)
    }

    pub fn date(value: i64) -> [u8; 8] {
        value.to_be_bytes()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rstest::*;

        #[rstest(value, width, expt_output,
            case(0x01, None, &[0x81]),
            case(0x7E, None, &[0xFE]),
            case(0x7F, None, &[0x40, 0x7F]),
            case(0x2345, None, &[0x63, 0x45]),
            case(0x7F, Some(3), &[0x20, 0x00, 0x7F]),
            case(0, Some(8), &[0x01, 0, 0, 0, 0, 0, 0, 0]),
        )]
        fn test_vsize(value: u64, width: Option<usize>, expt_output: &[u8]) {
            assert_eq!(vsize(value, width).unwrap(), expt_output);
        }

        #[test]
        fn test_vsize_limits() {
            assert_eq!(
                vsize(300, Some(1)),
                Err(VarIntError::DoesNotFit { value: 300, width: 1 })
            );
            assert_eq!(vsize(1, Some(9)), Err(VarIntError::InvalidWidth(9)));
            assert!(vsize(vsize_max(8), None).is_ok());
            assert!(vsize(vsize_max(8) + 1, None).is_err());
        }

        #[rstest(width, expt_output,
            case(1, &[0xFF]),
            case(2, &[0x7F, 0xFF]),
            case(8, &[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
        )]
        fn test_unknown_vsize(width: usize, expt_output: &[u8]) {
            assert_eq!(unknown_vsize(width).unwrap(), expt_output);
        }

        #[rstest(value, expt_output,
            case(0, &[0xBF]),
            case(-1, &[0xBE]),
            case(63, &[0xFE]),
            case(-63, &[0x80]),
            case(64, &[0x60, 0x3F]),
        )]
        fn test_vsize_signed(value: i64, expt_output: &[u8]) {
            assert_eq!(vsize_signed(value, None).unwrap(), expt_output);
        }

        #[rstest(value, expt_output,
            case(0xEC, &[0xEC]),
            case(0x4286, &[0x42, 0x86]),
            case(0x1A45_DFA3, &[0x1A, 0x45, 0xDF, 0xA3]),
        )]
        fn test_element_id(value: u32, expt_output: &[u8]) {
            assert_eq!(element_id(value).unwrap(), expt_output);
        }

        #[rstest(value, case(0), case(0x01), case(0xFF), case(0x4001), case(0x0800_0000))]
        fn test_element_id_invalid(value: u32) {
            assert!(element_id(value).is_err());
        }

        #[rstest(value, width, expt_output,
            case(0x01, None, &[0x01]),
            case(0x00, None, &[0x00]),
            case(0x00, Some(0), &[]),
            case(0x01, Some(2), &[0x00, 0x01]),
            case(0x1A45_DFA3, None, &[0x1A, 0x45, 0xDF, 0xA3]),
        )]
        fn test_uint(value: u64, width: Option<usize>, expt_output: &[u8]) {
            assert_eq!(uint(value, width).unwrap(), expt_output);
        }

        #[test]
        fn test_uint_override_too_small() {
            assert_eq!(
                uint(0x1234, Some(1)),
                Err(VarIntError::DoesNotFit { value: 0x1234, width: 1 })
            );
        }

        #[rstest(value, width, expt_output,
            case(-1, None, &[0xFF]),
            case(-1, Some(2), &[0xFF, 0xFF]),
            case(127, None, &[0x7F]),
            case(128, None, &[0x00, 0x80]),
            case(-128, None, &[0x80]),
            case(-129, None, &[0xFF, 0x7F]),
        )]
        fn test_int(value: i64, width: Option<usize>, expt_output: &[u8]) {
            assert_eq!(int(value, width).unwrap(), expt_output);
        }

        #[rstest(value, length, expt_output,
            case("hello", Some(6), &[0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x00]),
            case("え？", None, &[0xE3, 0x81, 0x88, 0xEF, 0xBC, 0x9F]),
        )]
        fn test_string(value: &str, length: Option<usize>, expt_output: &[u8]) {
            assert_eq!(string(value, length).unwrap(), expt_output);
        }

        #[test]
        fn test_floats() {
            assert_eq!(float32(1.0), [0x3F, 0x80, 0x00, 0x00]);
            assert_eq!(float64(1.0), [0x3F, 0xF0, 0, 0, 0, 0, 0, 0]);
        }
    }
}

pub fn encode_uint(value: u64, width: Option<usize>) -> Result<Vec<u8>, VarIntError> {
    serialize::uint(value, width)
}

pub fn encode_int(value: i64, width: Option<usize>) -> Result<Vec<u8>, VarIntError> {
    serialize::int(value, width)
}

pub fn encode_float(value: f32) -> [u8; 4] {
    serialize::float32(value)
}

pub fn encode_double(value: f64) -> [u8; 8] {
    serialize::float64(value)
}

pub fn encode_vsize(value: u64, width: Option<usize>) -> Result<Vec<u8>, VarIntError> {
    serialize::vsize(value, width)
}

pub fn encode_unknown_vsize(width: usize) -> Result<Vec<u8>, VarIntError> {
    serialize::unknown_vsize(width)
}

/// Decodes a vsize from the front of `bytes`, returning it with the number of bytes consumed.
pub fn decode_vsize(bytes: &[u8]) -> Result<(VSize, usize), VarIntError> {
    parse::vsize(bytes, MAX_VSIZE_WIDTH)
        .map(|(_, result)| result)
        .map_err(VarIntError::from)
}

pub fn encode_vsize_signed(value: i64, width: Option<usize>) -> Result<Vec<u8>, VarIntError> {
    serialize::vsize_signed(value, width)
}

pub fn decode_vsize_signed(bytes: &[u8]) -> Result<(i64, usize), VarIntError> {
    parse::vsize_signed(bytes)
        .map(|(_, result)| result)
        .map_err(VarIntError::from)
}

pub fn encode_element_id(id: u32) -> Result<Vec<u8>, VarIntError> {
    serialize::element_id(id)
}

pub fn decode_element_id(bytes: &[u8]) -> Result<(u32, usize), VarIntError> {
    parse::element_id(bytes, MAX_ID_WIDTH)
        .map(|(_, result)| result)
        .map_err(VarIntError::from)
}
