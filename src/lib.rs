//! Ruxtab - Guitar Pro tablature decoder
//!
//! This library decodes the Guitar Pro file family into one unified song
//! model:
//! - GP3 and GP5 (.gp3/.gp4/.gp5): sequential little-endian binary
//! - GPX (.gpx): BCFZ/BCFS container wrapping a GPIF XML document
//! - GP7+ (.gp): archive container wrapping the same GPIF dialect
//!
//! # Example
//!
//! ```no_run
//! use ruxtab::parse;
//!
//! let file_data = std::fs::read("song.gp5").unwrap();
//! let song = parse(&file_data, Some("song.gp5")).unwrap();
//! for track in &song.tracks {
//!     println!("{}: {} bars", track.name, track.bars.len());
//! }
//! ```

pub mod error;
pub mod model;
pub mod parser;

// Re-export main types for convenience
pub use error::TabError;
pub use model::{
    bar_musical_beat_count, beat_duration_ms, duration_to_beats, midi_to_pitch_class,
    musical_beat_position, Accent, Bar, Beat, Bend, Duration, HarmonicType, KeyMode, KeySignature,
    Note, NoteName, Section, SlideType, Song, Tie, Track,
};
pub use parser::{detect_format, parse, parse_gp3, parse_gp5, parse_gp7, parse_gpx, GpFormat};
