//! GP7+ archive container.
//!
//! GP7 files are a standard archive wrapping the GPIF document at
//! `Content/score.gpif`, stored either raw or as a deflate stream. The
//! central directory is located through the trailing end-of-central-directory
//! record and walked manually; payloads are decoded with the in-crate
//! inflater.

use crate::error::TabError;
use crate::parser::inflate::inflate;

const EOCD_MAGIC: u32 = 0x0605_4B50;
const CENTRAL_MAGIC: u32 = 0x0201_4B50;
const LOCAL_MAGIC: u32 = 0x0403_4B50;

const EOCD_MIN_SIZE: usize = 22;
const CENTRAL_HEADER_SIZE: usize = 46;
const LOCAL_HEADER_SIZE: usize = 30;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

const SCORE_PATH: &str = "Content/score.gpif";

fn read_u16(data: &[u8], offset: usize) -> Result<u16, TabError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| TabError::Truncated("archive record".to_string()))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, TabError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| TabError::Truncated("archive record".to_string()))
}

/// Extract the `Content/score.gpif` XML document from a GP7 archive.
pub fn extract_score(data: &[u8]) -> Result<String, TabError> {
    let eocd = find_end_of_central_directory(data)?;
    let entry_count = read_u16(data, eocd + 10)?;
    let directory_offset = read_u32(data, eocd + 16)? as usize;
    log::debug!("archive central directory: {entry_count} entries at {directory_offset:#x}");

    let mut pos = directory_offset;
    for _ in 0..entry_count {
        if read_u32(data, pos)? != CENTRAL_MAGIC {
            return Err(TabError::BadContainer(
                "central directory entry magic mismatch".to_string(),
            ));
        }
        let method = read_u16(data, pos + 10)?;
        let crc = read_u32(data, pos + 16)?;
        let compressed_size = read_u32(data, pos + 20)? as usize;
        let uncompressed_size = read_u32(data, pos + 24)? as usize;
        let name_len = read_u16(data, pos + 28)? as usize;
        let extra_len = read_u16(data, pos + 30)? as usize;
        let comment_len = read_u16(data, pos + 32)? as usize;
        let local_offset = read_u32(data, pos + 42)? as usize;

        let name_bytes = data
            .get(pos + CENTRAL_HEADER_SIZE..pos + CENTRAL_HEADER_SIZE + name_len)
            .ok_or_else(|| TabError::Truncated("central directory entry name".to_string()))?;
        let name = String::from_utf8_lossy(name_bytes);
        log::debug!("archive entry {name:?} method {method}");

        if name == SCORE_PATH {
            let payload = read_entry(
                data,
                method,
                crc,
                compressed_size,
                uncompressed_size,
                local_offset,
            )?;
            return Ok(String::from_utf8_lossy(&payload).into_owned());
        }
        pos += CENTRAL_HEADER_SIZE + name_len + extra_len + comment_len;
    }
    Err(TabError::BadContainer(format!("archive holds no {SCORE_PATH}")))
}

/// Scan backwards from the end for the end-of-central-directory record.
fn find_end_of_central_directory(data: &[u8]) -> Result<usize, TabError> {
    if data.len() < EOCD_MIN_SIZE {
        return Err(TabError::Truncated("archive too small".to_string()));
    }
    let mut pos = data.len() - EOCD_MIN_SIZE;
    loop {
        if read_u32(data, pos)? == EOCD_MAGIC {
            return Ok(pos);
        }
        if pos == 0 {
            return Err(TabError::BadHeader(
                "end of central directory record not found".to_string(),
            ));
        }
        pos -= 1;
    }
}

fn read_entry(
    data: &[u8],
    method: u16,
    expected_crc: u32,
    compressed_size: usize,
    uncompressed_size: usize,
    local_offset: usize,
) -> Result<Vec<u8>, TabError> {
    if read_u32(data, local_offset)? != LOCAL_MAGIC {
        return Err(TabError::BadHeader(
            "local file header magic mismatch".to_string(),
        ));
    }
    // name and extra lengths in the local header may differ from the
    // central directory, so they are re-read here
    let name_len = read_u16(data, local_offset + 26)? as usize;
    let extra_len = read_u16(data, local_offset + 28)? as usize;
    let data_start = local_offset + LOCAL_HEADER_SIZE + name_len + extra_len;
    let raw = data
        .get(data_start..data_start + compressed_size)
        .ok_or_else(|| TabError::Truncated("archive entry payload".to_string()))?;

    let payload = match method {
        METHOD_STORED => raw.to_vec(),
        METHOD_DEFLATE => inflate(raw, uncompressed_size)?,
        other => return Err(TabError::UnsupportedCompression(other)),
    };

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let actual_crc = hasher.finalize();
    if actual_crc != expected_crc {
        log::warn!("archive entry CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}");
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc32(data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Deflate a buffer as literal-only fixed-Huffman, for test archives.
    fn deflate_fixed(data: &[u8]) -> Vec<u8> {
        let mut bytes: Vec<u8> = vec![];
        let mut bit_pos = 0u8;
        let push_bit = |bytes: &mut Vec<u8>, bit_pos: &mut u8, bit: u32| {
            if *bit_pos == 0 {
                bytes.push(0);
            }
            if bit != 0 {
                *bytes.last_mut().unwrap() |= 1 << *bit_pos;
            }
            *bit_pos = (*bit_pos + 1) % 8;
        };
        let push_code = |bytes: &mut Vec<u8>, bit_pos: &mut u8, code: u32, n: u32| {
            for i in (0..n).rev() {
                push_bit(bytes, bit_pos, (code >> i) & 1);
            }
        };
        // BFINAL=1, BTYPE=01 (header fields are LSB-first)
        push_bit(&mut bytes, &mut bit_pos, 1);
        push_bit(&mut bytes, &mut bit_pos, 1);
        push_bit(&mut bytes, &mut bit_pos, 0);
        for &b in data {
            if b < 144 {
                push_code(&mut bytes, &mut bit_pos, 0x30 + u32::from(b), 8);
            } else {
                push_code(&mut bytes, &mut bit_pos, 0x190 + u32::from(b - 144), 9);
            }
        }
        // end of block
        push_code(&mut bytes, &mut bit_pos, 0, 7);
        bytes
    }

    fn build_archive(name: &str, stored: &[u8], method: u16, payload: &[u8]) -> Vec<u8> {
        let crc = crc32(payload);
        let mut out: Vec<u8> = vec![];
        // local file header
        out.extend_from_slice(&LOCAL_MAGIC.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // time + date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(stored);

        let directory_offset = out.len();
        // central directory entry
        out.extend_from_slice(&CENTRAL_MAGIC.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version made by
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // time + date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
        out.extend_from_slice(name.as_bytes());
        let directory_size = out.len() - directory_offset;

        // end of central directory
        out.extend_from_slice(&EOCD_MAGIC.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // disk number
        out.extend_from_slice(&0u16.to_le_bytes()); // directory disk
        out.extend_from_slice(&1u16.to_le_bytes()); // entries on disk
        out.extend_from_slice(&1u16.to_le_bytes()); // entries total
        out.extend_from_slice(&(directory_size as u32).to_le_bytes());
        out.extend_from_slice(&(directory_offset as u32).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len
        out
    }

    #[test]
    fn stored_entry() {
        let xml = b"<GPIF><Score/></GPIF>";
        let data = build_archive(SCORE_PATH, xml, METHOD_STORED, xml);
        assert_eq!(extract_score(&data).unwrap(), "<GPIF><Score/></GPIF>");
    }

    #[test]
    fn deflated_entry() {
        let xml = b"<GPIF><Score><Title>Archive</Title></Score></GPIF>";
        let compressed = deflate_fixed(xml);
        let data = build_archive(SCORE_PATH, &compressed, METHOD_DEFLATE, xml);
        assert_eq!(
            extract_score(&data).unwrap(),
            "<GPIF><Score><Title>Archive</Title></Score></GPIF>"
        );
    }

    #[test]
    fn deflated_archive_to_song() {
        let xml = b"<GPIF><Score><Title>Archive</Title></Score><Tracks/><MasterBars/></GPIF>";
        let compressed = deflate_fixed(xml);
        let data = build_archive(SCORE_PATH, &compressed, METHOD_DEFLATE, xml);
        let song = crate::parser::parse_gp7(&data).unwrap();
        assert_eq!(song.title, "Archive");
    }

    #[test]
    fn unsupported_method() {
        let xml = b"<GPIF/>";
        let data = build_archive(SCORE_PATH, xml, 12, xml);
        assert!(matches!(
            extract_score(&data),
            Err(TabError::UnsupportedCompression(12))
        ));
    }

    #[test]
    fn missing_score_entry() {
        let data = build_archive("Content/other.xml", b"x", METHOD_STORED, b"x");
        assert!(matches!(
            extract_score(&data),
            Err(TabError::BadContainer(_))
        ));
    }

    #[test]
    fn tiny_input_is_truncated() {
        assert!(matches!(
            extract_score(&[0x50, 0x4B]),
            Err(TabError::Truncated(_))
        ));
    }

    #[test]
    fn no_directory_record() {
        let data = vec![0u8; 64];
        assert!(matches!(
            extract_score(&data),
            Err(TabError::BadHeader(_))
        ));
    }
}
