//! GPX (GP6) container decoder.
//!
//! A GPX file is either a `BCFZ` blob (a custom LZ-style bit stream) or a
//! raw `BCFS` image. Both yield a sector-based virtual filesystem from
//! which only `score.gpif` is lifted, as UTF-8 XML.

use crate::error::TabError;
use crate::parser::bit_reader::MsbBitReader;
use crate::parser::primitive_parser::latin1_string;

const SECTOR_SIZE: usize = 0x1000;
const SCORE_FILE: &str = "score.gpif";
const MAX_FILENAME: usize = 127;

/// File-entry marker at a sector base.
const SECTOR_FILE_ENTRY: u32 = 2;

/// Extract the `score.gpif` XML document from a GPX container.
pub fn extract_score(data: &[u8]) -> Result<String, TabError> {
    if data.len() < 4 {
        return Err(TabError::Truncated("GPX header".to_string()));
    }
    match &data[..4] {
        b"BCFZ" => {
            if data.len() < 8 {
                return Err(TabError::Truncated("BCFZ length header".to_string()));
            }
            let expected_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
            log::debug!("BCFZ container, declared uncompressed length {expected_len}");
            let decompressed = decompress_bcfz(&data[8..], expected_len);
            // the first 4 bytes repeat the length header
            if decompressed.len() < 4 {
                return Err(TabError::BadContainer(
                    "BCFZ payload shorter than its own header".to_string(),
                ));
            }
            find_score(&decompressed[4..])
        }
        b"BCFS" => {
            log::debug!("uncompressed BCFS container");
            find_score(&data[4..])
        }
        magic => Err(TabError::BadHeader(format!(
            "expected BCFZ/BCFS magic, got {magic:02X?}"
        ))),
    }
}

/// Decompress the BCFZ LZ stream (MSB-first bits).
///
/// Word layout per chunk: a discriminator bit, then either a back-reference
/// (4-bit word size, offset and size both read bit-reversed) or a literal
/// run (2-bit reversed size, raw bytes). An unexpected end of stream is
/// treated as a clean end of block: whatever was written is kept, since
/// some editors truncate the final block.
fn decompress_bcfz(stream: &[u8], expected_len: usize) -> Vec<u8> {
    let mut reader = MsbBitReader::new(stream);
    let mut out: Vec<u8> = Vec::with_capacity(expected_len);

    while out.len() < expected_len {
        let Ok(flag) = reader.read_bit() else { break };
        if flag == 1 {
            let Ok(word_size) = reader.read(4) else { break };
            let Ok(offset) = reader.read_reversed(word_size) else {
                break;
            };
            let Ok(size) = reader.read_reversed(word_size) else {
                break;
            };
            let offset = offset as usize;
            if offset == 0 || offset > out.len() {
                log::warn!(
                    "BCFZ back-reference offset {offset} outside the {} bytes written",
                    out.len()
                );
                break;
            }
            let to_copy = offset.min(size as usize);
            let start = out.len() - offset;
            for k in 0..to_copy {
                let byte = out[start + k];
                out.push(byte);
            }
        } else {
            let Ok(size) = reader.read_reversed(2) else { break };
            let mut ended = false;
            for _ in 0..size {
                match reader.read(8) {
                    Ok(byte) => out.push(byte as u8),
                    Err(_) => {
                        ended = true;
                        break;
                    }
                }
            }
            if ended {
                break;
            }
        }
    }
    out.truncate(expected_len);
    log::debug!(
        "BCFZ decompressed {} of {expected_len} declared bytes",
        out.len()
    );
    out
}

fn read_u32(image: &[u8], offset: usize) -> Option<u32> {
    let bytes = image.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Walk the BCFS sector filesystem and materialise `score.gpif`.
///
/// Sector layout of a file entry: `0x04` NUL-terminated filename (max 127
/// bytes), `0x8C` declared size, `0x94` zero-terminated array of block IDs,
/// each pointing at `id * SECTOR_SIZE`.
fn find_score(image: &[u8]) -> Result<String, TabError> {
    let mut sector = SECTOR_SIZE;
    while sector + 4 <= image.len() {
        if read_u32(image, sector) == Some(SECTOR_FILE_ENTRY) {
            let name = read_filename(image, sector + 0x04);
            log::debug!("BCFS file entry: {name:?}");
            if name == SCORE_FILE {
                let declared_size = read_u32(image, sector + 0x8C).unwrap_or(0) as usize;
                let payload = read_blocks(image, sector + 0x94, declared_size);
                return Ok(String::from_utf8_lossy(&payload).into_owned());
            }
        }
        sector += SECTOR_SIZE;
    }
    Err(TabError::BadContainer(
        "container holds no score.gpif".to_string(),
    ))
}

fn read_filename(image: &[u8], offset: usize) -> String {
    let end = (offset + MAX_FILENAME).min(image.len());
    let bytes = &image[offset.min(end)..end];
    let name_len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    latin1_string(&bytes[..name_len])
}

fn read_blocks(image: &[u8], mut offset: usize, declared_size: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(declared_size);
    while payload.len() < declared_size {
        let Some(block_id) = read_u32(image, offset) else {
            break;
        };
        if block_id == 0 {
            break;
        }
        let start = block_id as usize * SECTOR_SIZE;
        if start >= image.len() {
            log::warn!("BCFS block {block_id} points outside the image");
            break;
        }
        let take = SECTOR_SIZE
            .min(declared_size - payload.len())
            .min(image.len() - start);
        payload.extend_from_slice(&image[start..start + take]);
        offset += 4;
    }
    payload
}
