use encoding_rs::WINDOWS_1252;
use nom::combinator::{flat_map, map};
use nom::{bytes, number, IResult, Parser};

/// Parse signed byte
pub fn parse_signed_byte(i: &[u8]) -> IResult<&[u8], i8> {
    number::complete::le_i8(i)
}

/// Parse unsigned byte
pub fn parse_byte(i: &[u8]) -> IResult<&[u8], u8> {
    number::complete::le_u8(i)
}

/// Parse signed 32
pub fn parse_int(i: &[u8]) -> IResult<&[u8], i32> {
    number::complete::le_i32(i)
}

/// Parse signed short
pub fn parse_short(i: &[u8]) -> IResult<&[u8], i16> {
    number::complete::le_i16(i)
}

/// Parse 64-bit little-endian float
pub fn parse_double(i: &[u8]) -> IResult<&[u8], f64> {
    number::complete::le_f64(i)
}

/// Parse bool (byte != 0)
pub fn parse_bool(i: &[u8]) -> IResult<&[u8], bool> {
    map(number::complete::le_u8, |b| b != 0).parse(i)
}

/// Skip `n` bytes.
pub fn skip(i: &[u8], n: usize) -> &[u8] {
    if i.len() < n {
        return &i[i.len()..];
    }
    log::debug!("skip: {n}");
    &i[n..]
}

/// Materialize properly encoded String.
/// GP3/GP5 string fields and BCFS filenames are Latin-1: one byte, one code point.
pub(crate) fn latin1_string(i: &[u8]) -> String {
    let (cow, encoding_used, had_errors) = WINDOWS_1252.decode(i);
    if had_errors {
        log::debug!("Error parsing string with {encoding_used:?}");
        match std::str::from_utf8(i) {
            Ok(s) => s.to_string(),
            Err(e) => {
                log::debug!("Error UTF-8 string parsing:{e}");
                String::new()
            }
        }
    } else {
        cow.to_string()
    }
}

/// Parse string field of length `string_len` with total size to consume `field_size`
fn parse_string_field(
    field_size: usize,
    string_len: usize,
) -> impl FnMut(&[u8]) -> IResult<&[u8], String> {
    move |i: &[u8]| {
        log::debug!("Parsing string field: field_size={field_size}, string_len={string_len}");

        // Read exactly the field size
        let (rest, field) = bytes::complete::take(field_size)(i)?;

        // Decode only the meaningful string bytes
        let string = latin1_string(&field[..std::cmp::min(string_len, field_size)]);

        Ok((rest, string))
    }
}

/// Size of string encoded as Int.
/// `[i32 string_len][len bytes]`, a non-positive length yields an empty string.
pub fn parse_int_sized_string(i: &[u8]) -> IResult<&[u8], String> {
    flat_map(parse_int, |len| {
        let len = if len > 0 { len as usize } else { 0 };
        parse_string_field(len, len)
    })
    .parse(i)
}

/// String with both sizes provided.
/// `size`: total field width to consume
/// followed by a length byte announcing the real string length
pub fn parse_byte_size_string(size: usize) -> impl FnMut(&[u8]) -> IResult<&[u8], String> {
    move |i: &[u8]| {
        let (i, length) = parse_byte(i)?;
        log::debug!("Parsing byte sized string of length {length} for String size {size}");
        parse_string_field(size, length as usize)(i)
    }
}

/// Size of string encoded as Int, but the size is encoded as a byte.
/// `[i32 total][u8 str_len][str_len bytes][total - 1 - str_len padding]`
pub fn parse_int_byte_sized_string(i: &[u8]) -> IResult<&[u8], String> {
    flat_map(parse_int, |len| {
        flat_map(parse_byte, move |str_len| {
            log::debug!("Parsing int byte sized string int_len={len} u8_len={str_len}");
            let field = (len as usize).saturating_sub(1).max(str_len as usize);
            parse_string_field(field, str_len as usize)
        })
    })
    .parse(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_byte_size_string() {
        let data: Vec<u8> = vec![
            0x18, 0x46, 0x49, 0x43, 0x48, 0x49, 0x45, 0x52, 0x20, 0x47, 0x55, 0x49, 0x54, 0x41,
            0x52, 0x20, 0x50, 0x52, 0x4f, 0x20, 0x76, 0x33, 0x2e, 0x30, 0x30, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let (_rest, res) = parse_byte_size_string(30)(&data).unwrap();
        assert_eq!(res, "FICHIER GUITAR PRO v3.00");
    }

    #[test]
    fn read_int_byte_sized_string() {
        // total = 6, str_len = 5, "Intro"
        let data: Vec<u8> = vec![0x06, 0x00, 0x00, 0x00, 0x05, b'I', b'n', b't', b'r', b'o'];
        let (rest, res) = parse_int_byte_sized_string(&data).unwrap();
        assert_eq!(res, "Intro");
        assert!(rest.is_empty());
    }

    #[test]
    fn read_int_sized_string_negative_length() {
        let data: Vec<u8> = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xAA];
        let (rest, res) = parse_int_sized_string(&data).unwrap();
        assert_eq!(res, "");
        assert_eq!(rest, &[0xAA]);
    }

    #[test]
    fn read_latin1_bytes() {
        // 0xE9 is 'é' in Latin-1, invalid as UTF-8
        let data: Vec<u8> = vec![0x02, 0x00, 0x00, 0x00, 0xE9, 0x21];
        let (_rest, res) = parse_int_sized_string(&data).unwrap();
        assert_eq!(res, "é!");
    }

    #[test]
    fn truncated_read_fails() {
        let data: Vec<u8> = vec![0x0A, 0x00, 0x00, 0x00, b'x'];
        assert!(parse_int_sized_string(&data).is_err());
    }
}
