//! Format detection and dispatch over the four supported generations.

pub(crate) mod bit_reader;
pub(crate) mod gp7_parser;
pub(crate) mod gpif_parser;
pub(crate) mod gpx_parser;
pub(crate) mod inflate;
pub(crate) mod music_parser;
pub(crate) mod primitive_parser;
pub(crate) mod song_parser;


use crate::error::TabError;
use crate::model::Song;
use crate::parser::primitive_parser::latin1_string;
use crate::parser::song_parser::GpFamily;

/// The supported file format generations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GpFormat {
    Gpx,
    Gp7,
    Gp5,
    Gp3,
}

const GP_HEADER_MARKER: &str = "GUITAR PRO";

/// Sniff the format from the first bytes, falling back to the filename
/// suffix. Inputs shorter than four bytes cannot be classified at all.
pub fn detect_format(data: &[u8], filename: Option<&str>) -> Result<GpFormat, TabError> {
    if data.len() < 4 {
        return Err(TabError::Truncated(
            "format detection needs at least 4 bytes".to_string(),
        ));
    }
    if data.starts_with(b"BCFZ") || data.starts_with(b"BCFS") {
        return Ok(GpFormat::Gpx);
    }
    if data[0] == 0x50 && data[1] == 0x4B {
        return Ok(GpFormat::Gp7);
    }

    // GP3/GP5 files open with a length-prefixed version string
    let length = data[0] as usize;
    if length > 10 && length < 50 {
        if let Some(window) = data.get(1..1 + length.min(40)) {
            let header = latin1_string(window);
            if header.contains(GP_HEADER_MARKER) {
                return Ok(if header.contains("v3") {
                    GpFormat::Gp3
                } else {
                    GpFormat::Gp5
                });
            }
        }
    }

    if let Some(name) = filename {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".gpx") {
            return Ok(GpFormat::Gpx);
        }
        if name.ends_with(".gp5") || name.ends_with(".gp4") || name.ends_with(".gp3") {
            return Ok(GpFormat::Gp5);
        }
        if name.ends_with(".gp") {
            return Ok(GpFormat::Gp7);
        }
    }
    Err(TabError::UnrecognizedFormat)
}

/// Parse a Guitar Pro file of any supported generation into a `Song`.
pub fn parse(data: &[u8], filename: Option<&str>) -> Result<Song, TabError> {
    match detect_format(data, filename)? {
        GpFormat::Gpx => parse_gpx(data),
        GpFormat::Gp7 => parse_gp7(data),
        // the version string inside refines GP3 vs GP5
        GpFormat::Gp5 | GpFormat::Gp3 => song_parser::parse_gp_data(data, None),
    }
}

/// Parse a GPX (BCFZ/BCFS) container.
pub fn parse_gpx(data: &[u8]) -> Result<Song, TabError> {
    let xml = gpx_parser::extract_score(data)?;
    gpif_parser::parse_gpif(&xml)
}

/// Parse a GP7+ archive.
pub fn parse_gp7(data: &[u8]) -> Result<Song, TabError> {
    let xml = gp7_parser::extract_score(data)?;
    gpif_parser::parse_gpif(&xml)
}

/// Parse a GP5 sequential binary file.
pub fn parse_gp5(data: &[u8]) -> Result<Song, TabError> {
    song_parser::parse_gp_data(data, Some(GpFamily::Gp5))
}

/// Parse a GP3 sequential binary file.
pub fn parse_gp3(data: &[u8]) -> Result<Song, TabError> {
    song_parser::parse_gp_data(data, Some(GpFamily::Gp3))
}
