//! RFC 1951 DEFLATE decoder.
//!
//! Decompresses the raw deflate streams found in GP7 archive entries.
//! All three block types are supported: stored, fixed Huffman and dynamic
//! Huffman. The output buffer is sized from the declared uncompressed
//! length up front and the decoder refuses to grow past it.

use crate::error::TabError;
use crate::parser::bit_reader::LsbBitReader;

/// Order of the code-length alphabet entries in a dynamic block header
/// (RFC 1951 section 3.2.7).
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Base lengths for symbols 257..=285 (RFC 1951 section 3.2.5).
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u32; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Base distances for symbols 0..=29 (RFC 1951 section 3.2.5).
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u32; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

const END_OF_BLOCK: u16 = 256;

/// Canonical Huffman table: per-length symbol counts plus the symbols
/// sorted by (length, symbol).
struct Huffman {
    counts: [u16; 16],
    symbols: Vec<u16>,
}

impl Huffman {
    fn build(lengths: &[u8]) -> Result<Huffman, TabError> {
        let mut counts = [0u16; 16];
        for &len in lengths {
            counts[len as usize] += 1;
        }
        counts[0] = 0;

        // reject over-subscribed codes
        let mut left = 1i32;
        for &count in counts.iter().skip(1) {
            left = (left << 1) - i32::from(count);
            if left < 0 {
                return Err(TabError::CorruptDeflate(
                    "over-subscribed huffman code".to_string(),
                ));
            }
        }

        let mut offsets = [0u16; 16];
        for len in 1..16 {
            offsets[len] = offsets[len - 1] + counts[len - 1];
        }

        let mut symbols = vec![0u16; lengths.iter().filter(|&&l| l != 0).count()];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbols[offsets[len as usize] as usize] = symbol as u16;
                offsets[len as usize] += 1;
            }
        }
        Ok(Huffman { counts, symbols })
    }

    fn decode(&self, reader: &mut LsbBitReader) -> Result<u16, TabError> {
        let mut code = 0u32;
        let mut first = 0u32;
        let mut index = 0u32;
        for len in 1..16 {
            code |= reader.read_bit()?;
            let count = u32::from(self.counts[len]);
            if code < first + count {
                return Ok(self.symbols[(index + code - first) as usize]);
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(TabError::CorruptDeflate(
            "huffman code not found".to_string(),
        ))
    }
}

fn fixed_tables() -> Result<(Huffman, Huffman), TabError> {
    // RFC 1951 section 3.2.6
    let mut lit_lengths = [0u8; 288];
    lit_lengths[0..144].fill(8);
    lit_lengths[144..256].fill(9);
    lit_lengths[256..280].fill(7);
    lit_lengths[280..288].fill(8);
    let lit = Huffman::build(&lit_lengths)?;
    let dist = Huffman::build(&[5u8; 30])?;
    Ok((lit, dist))
}

fn dynamic_tables(reader: &mut LsbBitReader) -> Result<(Huffman, Huffman), TabError> {
    let hlit = reader.read(5)? as usize + 257;
    let hdist = reader.read(5)? as usize + 1;
    let hclen = reader.read(4)? as usize + 4;
    log::debug!("dynamic block: hlit={hlit} hdist={hdist} hclen={hclen}");

    let mut cl_lengths = [0u8; 19];
    for &position in CODE_LENGTH_ORDER.iter().take(hclen) {
        cl_lengths[position] = reader.read(3)? as u8;
    }
    let cl_table = Huffman::build(&cl_lengths)?;

    // literal/length and distance code lengths share one repeat-coded array
    let mut lengths = vec![0u8; hlit + hdist];
    let mut filled = 0usize;
    while filled < lengths.len() {
        let symbol = cl_table.decode(reader)?;
        let (value, repeat) = match symbol {
            0..=15 => {
                lengths[filled] = symbol as u8;
                filled += 1;
                continue;
            }
            16 => {
                if filled == 0 {
                    return Err(TabError::CorruptDeflate(
                        "repeat code with no previous length".to_string(),
                    ));
                }
                (lengths[filled - 1], 3 + reader.read(2)? as usize)
            }
            17 => (0, 3 + reader.read(3)? as usize),
            18 => (0, 11 + reader.read(7)? as usize),
            _ => unreachable!("code-length alphabet is 0..=18"),
        };
        if filled + repeat > lengths.len() {
            return Err(TabError::CorruptDeflate(
                "code lengths overrun the alphabet".to_string(),
            ));
        }
        lengths[filled..filled + repeat].fill(value);
        filled += repeat;
    }

    if lengths[END_OF_BLOCK as usize] == 0 {
        return Err(TabError::CorruptDeflate(
            "end-of-block symbol has zero length".to_string(),
        ));
    }

    let lit = Huffman::build(&lengths[..hlit])?;
    let dist = Huffman::build(&lengths[hlit..])?;
    Ok((lit, dist))
}

fn push_output(out: &mut Vec<u8>, byte: u8, expected_len: usize) -> Result<(), TabError> {
    if out.len() >= expected_len {
        return Err(TabError::CorruptDeflate(
            "output exceeds declared size".to_string(),
        ));
    }
    out.push(byte);
    Ok(())
}

fn inflate_huffman_block(
    reader: &mut LsbBitReader,
    out: &mut Vec<u8>,
    lit: &Huffman,
    dist: &Huffman,
    expected_len: usize,
) -> Result<(), TabError> {
    loop {
        let symbol = lit.decode(reader)?;
        if symbol < END_OF_BLOCK {
            push_output(out, symbol as u8, expected_len)?;
        } else if symbol == END_OF_BLOCK {
            return Ok(());
        } else {
            let index = (symbol - 257) as usize;
            if index >= LENGTH_BASE.len() {
                return Err(TabError::CorruptDeflate(format!(
                    "invalid length symbol {symbol}"
                )));
            }
            let length = usize::from(LENGTH_BASE[index]) + reader.read(LENGTH_EXTRA[index])? as usize;

            let dist_symbol = dist.decode(reader)? as usize;
            if dist_symbol >= DIST_BASE.len() {
                return Err(TabError::CorruptDeflate(format!(
                    "invalid distance symbol {dist_symbol}"
                )));
            }
            let distance =
                usize::from(DIST_BASE[dist_symbol]) + reader.read(DIST_EXTRA[dist_symbol])? as usize;
            if distance > out.len() {
                return Err(TabError::CorruptDeflate(format!(
                    "back-reference distance {distance} exceeds output {}",
                    out.len()
                )));
            }
            // copies may overlap their own output, byte at a time
            for _ in 0..length {
                let byte = out[out.len() - distance];
                push_output(out, byte, expected_len)?;
            }
        }
    }
}

fn inflate_stored_block(
    reader: &mut LsbBitReader,
    out: &mut Vec<u8>,
    expected_len: usize,
) -> Result<(), TabError> {
    reader.align_to_byte();
    let header = reader.read_bytes(4)?;
    let len = u16::from_le_bytes([header[0], header[1]]);
    let nlen = u16::from_le_bytes([header[2], header[3]]);
    if len != !nlen {
        return Err(TabError::CorruptDeflate(
            "stored block length complement mismatch".to_string(),
        ));
    }
    let bytes = reader.read_bytes(len as usize)?;
    if out.len() + bytes.len() > expected_len {
        return Err(TabError::CorruptDeflate(
            "output exceeds declared size".to_string(),
        ));
    }
    out.extend_from_slice(bytes);
    Ok(())
}

/// Inflate a raw deflate stream into a buffer of at most `expected_len` bytes.
pub fn inflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>, TabError> {
    let mut reader = LsbBitReader::new(data);
    let mut out = Vec::with_capacity(expected_len);
    loop {
        let bfinal = reader.read(1)?;
        let btype = reader.read(2)?;
        log::debug!("deflate block: final={bfinal} type={btype}");
        match btype {
            0 => inflate_stored_block(&mut reader, &mut out, expected_len)?,
            1 => {
                let (lit, dist) = fixed_tables()?;
                inflate_huffman_block(&mut reader, &mut out, &lit, &dist, expected_len)?;
            }
            2 => {
                let (lit, dist) = dynamic_tables(&mut reader)?;
                inflate_huffman_block(&mut reader, &mut out, &lit, &dist, expected_len)?;
            }
            _ => {
                return Err(TabError::CorruptDeflate("invalid block type 3".to_string()));
            }
        }
        if bfinal == 1 {
            return Ok(out);
        }
    }
}
