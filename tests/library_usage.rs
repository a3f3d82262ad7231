//! Integration tests for ruxtab library usage.
//!
//! These tests verify the public surface: format detection, dispatch,
//! container parsing and the model helper functions.

use ruxtab::{
    bar_musical_beat_count, beat_duration_ms, detect_format, duration_to_beats,
    midi_to_pitch_class, musical_beat_position, parse, parse_gpx, Bar, Beat, Duration, GpFormat,
    NoteName, Song, TabError,
};

/// Test that all major types are accessible from the library.
#[test]
fn test_types_accessible() {
    // If any re-export is missing, this test fails to compile.
    fn _assert_types() {
        let _: fn(&[u8], Option<&str>) -> Result<Song, TabError> = parse;
        let _: fn(&[u8], Option<&str>) -> Result<GpFormat, TabError> = detect_format;
    }
}

#[test]
fn test_detection_scenarios() {
    let zeros = [0u8; 10];
    assert!(matches!(
        detect_format(&zeros, None),
        Err(TabError::UnrecognizedFormat)
    ));
    assert_eq!(detect_format(&zeros, Some("x.gpx")).unwrap(), GpFormat::Gpx);
    assert_eq!(detect_format(&zeros, Some("x.gp")).unwrap(), GpFormat::Gp7);
    assert_eq!(detect_format(&zeros, Some("x.gp5")).unwrap(), GpFormat::Gp5);

    assert!(matches!(
        detect_format(&[0, 1], None),
        Err(TabError::Truncated(_))
    ));
}

/// Test error handling for invalid data.
#[test]
fn test_parse_error() {
    let invalid_data = vec![0u8; 10];
    let result = parse(&invalid_data, None);
    assert!(result.is_err(), "Should return error for invalid data");
    assert!(matches!(result, Err(TabError::UnrecognizedFormat)));
}

/// A BCFS container built in memory: one file entry pointing at one
/// payload sector.
fn build_bcfs_container(payload: &[u8]) -> Vec<u8> {
    const SECTOR: usize = 0x1000;
    assert!(payload.len() <= SECTOR);
    let mut image = vec![0u8; 3 * SECTOR];
    image[SECTOR..SECTOR + 4].copy_from_slice(&2u32.to_le_bytes());
    image[SECTOR + 4..SECTOR + 4 + 10].copy_from_slice(b"score.gpif");
    image[SECTOR + 0x8C..SECTOR + 0x90].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    image[SECTOR + 0x94..SECTOR + 0x98].copy_from_slice(&2u32.to_le_bytes());
    image[2 * SECTOR..2 * SECTOR + payload.len()].copy_from_slice(payload);
    let mut data = b"BCFS".to_vec();
    data.extend_from_slice(&image);
    data
}

const GPIF_XML: &str = r#"<GPIF>
  <Score><Title>Container Song</Title><Artist>Somebody</Artist></Score>
  <Tracks>
    <Track id="0"><Name>Guitar</Name></Track>
  </Tracks>
  <MasterBars><MasterBar><Time>4/4</Time><Bars>0</Bars></MasterBar></MasterBars>
  <Bars><Bar id="0"><Voices>0</Voices></Bar></Bars>
  <Voices><Voice id="0"><Beats>0</Beats></Voice></Voices>
  <Beats>
    <Beat id="0"><Rhythm ref="0"/><Notes>0</Notes></Beat>
  </Beats>
  <Rhythms><Rhythm id="0"><NoteValue>Half</NoteValue></Rhythm></Rhythms>
  <Notes>
    <Note id="0">
      <Properties>
        <Property name="String"><String>5</String></Property>
        <Property name="Fret"><Fret>0</Fret></Property>
      </Properties>
    </Note>
  </Notes>
</GPIF>"#;

/// Test parsing a GPX container end to end through the public dispatch.
#[test]
fn test_parse_gpx_container() {
    let data = build_bcfs_container(GPIF_XML.as_bytes());
    assert_eq!(detect_format(&data, None).unwrap(), GpFormat::Gpx);

    let song = parse(&data, Some("song.gpx")).unwrap();
    assert_eq!(song.title, "Container Song");
    assert_eq!(song.artist, "Somebody");
    assert_eq!(song.tracks.len(), 1);

    let track = &song.tracks[0];
    assert!(!track.bars.is_empty());
    assert!(!track.tuning.is_empty());
    assert_eq!(track.tuning.len(), track.tuning_midi.len());

    // GPIF string 5 is the highest string; the model flips the axis
    let note = &track.bars[0].beats[0].notes[0];
    assert_eq!(note.string, 0);
    assert_eq!(
        note.pitch_class,
        midi_to_pitch_class(track.tuning_midi[0])
    );

    // the format-specific entry point accepts the same bytes
    let again = parse_gpx(&data).unwrap();
    assert_eq!(again, song);
}

#[test]
fn test_gpx_container_without_score_fails() {
    let mut data = b"BCFS".to_vec();
    data.extend_from_slice(&vec![0u8; 0x2000]);
    assert!(matches!(
        parse(&data, None),
        Err(TabError::BadContainer(_))
    ));
}

#[test]
fn test_duration_helpers() {
    assert_eq!(duration_to_beats(Duration::Whole, 0, None), 4.0);
    assert_eq!(duration_to_beats(Duration::Quarter, 1, None), 1.5);
    assert_eq!(duration_to_beats(Duration::Quarter, 1, Some((3, 2))), 1.0);

    let beat = Beat {
        duration: Duration::Quarter,
        tempo: 120,
        ..Default::default()
    };
    assert_eq!(beat_duration_ms(&beat), 500.0);

    let eighth = Beat {
        duration: Duration::Eighth,
        tempo: 60,
        ..Default::default()
    };
    assert_eq!(beat_duration_ms(&eighth), 500.0);
}

#[test]
fn test_pitch_helpers() {
    assert_eq!(midi_to_pitch_class(60), 0);
    assert_eq!(midi_to_pitch_class(-3), 9);
    for pc in 0..12 {
        assert_eq!(NoteName::from_pitch_class(pc, true).pitch_class, pc);
    }
}

#[test]
fn test_bar_position_helpers() {
    let bar = Bar {
        time_signature: (4, 4),
        beats: vec![
            Beat {
                duration: Duration::Quarter,
                ..Default::default()
            },
            Beat {
                duration: Duration::Quarter,
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    assert_eq!(bar_musical_beat_count(&bar), 4);
    assert_eq!(musical_beat_position(&bar, 0), 1);
    assert_eq!(musical_beat_position(&bar, 1), 2);
}
