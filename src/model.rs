//! Unified song model produced by every decoder in the crate.
//!
//! All entity references are resolved during decoding; no file-level IDs
//! survive into these types. Values are immutable by convention once the
//! decoder returns them.

/// Note spellings with sharp accidentals, indexed by pitch class.
pub const SHARP_NOTES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Note spellings with flat accidentals, indexed by pitch class.
pub const FLAT_NOTES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// Map a MIDI pitch number to its pitch class in `[0..12)`.
pub fn midi_to_pitch_class(midi: i32) -> u8 {
    (((midi % 12) + 12) % 12) as u8
}

/// A pitch class rendered as a note name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteName {
    pub pitch_class: u8,
    pub name: String,
}

impl NoteName {
    /// Render a pitch class with the given accidental preference.
    /// The seven naturals carry no accidental either way.
    pub fn from_pitch_class(pitch_class: u8, sharp: bool) -> Self {
        let index = (pitch_class % 12) as usize;
        let name = if sharp {
            SHARP_NOTES[index]
        } else {
            FLAT_NOTES[index]
        };
        NoteName {
            pitch_class: pitch_class % 12,
            name: name.to_string(),
        }
    }

    pub fn from_midi(midi: i32, sharp: bool) -> Self {
        Self::from_pitch_class(midi_to_pitch_class(midi), sharp)
    }
}

/// Symbolic beat duration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Duration {
    Whole,
    Half,
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
    HundredTwentyEighth,
}

impl Duration {
    /// Base value in quarter-note beats.
    pub fn base_beats(self) -> f64 {
        match self {
            Duration::Whole => 4.0,
            Duration::Half => 2.0,
            Duration::Quarter => 1.0,
            Duration::Eighth => 0.5,
            Duration::Sixteenth => 0.25,
            Duration::ThirtySecond => 0.125,
            Duration::SixtyFourth => 0.0625,
            Duration::HundredTwentyEighth => 0.03125,
        }
    }
}

/// Beat fraction of a duration with augmentation dots and an optional tuplet.
/// Each dot adds half of the running value; a tuplet `(num, den)` squeezes
/// `num` notes into the time of `den`.
pub fn duration_to_beats(duration: Duration, dots: u8, tuplet: Option<(u8, u8)>) -> f64 {
    let mut beats = duration.base_beats();
    for _ in 0..dots {
        beats *= 1.5;
    }
    if let Some((num, den)) = tuplet {
        if num != 0 {
            beats = beats * f64::from(den) / f64::from(num);
        }
    }
    beats
}

/// Wall-clock milliseconds of one beat at its effective tempo.
pub fn beat_duration_ms(beat: &Beat) -> f64 {
    let tempo = if beat.tempo > 0 { beat.tempo } else { 120 };
    duration_to_beats(beat.duration, beat.dotted, beat.tuplet) * 60_000.0 / f64::from(tempo)
}

/// 1-based musical beat on which `bar.beats[beat_index]` falls, clamped to
/// the bar's time-signature numerator.
pub fn musical_beat_position(bar: &Bar, beat_index: usize) -> u32 {
    let (numerator, denominator) = bar.time_signature;
    let elapsed: f64 = bar
        .beats
        .iter()
        .take(beat_index)
        .map(|b| duration_to_beats(b.duration, b.dotted, b.tuplet))
        .sum();
    let beat_unit = 4.0 / f64::from(denominator.max(1));
    let position = (elapsed / beat_unit).floor() as u32 + 1;
    position.min(u32::from(numerator.max(1)))
}

/// Number of musical beats in the bar: the time-signature numerator.
pub fn bar_musical_beat_count(bar: &Bar) -> u32 {
    u32::from(bar.time_signature.0)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyMode {
    Major,
    Minor,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeySignature {
    pub accidental_count: i8,
    pub mode: KeyMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Section {
    pub letter: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlideType {
    Shift,
    Legato,
    OutDownwards,
    OutUpwards,
    IntoFromBelow,
    IntoFromAbove,
}

impl SlideType {
    /// Map the GP slide flag byte; unknown bits yield `None`.
    pub fn from_flags(flags: u8) -> Option<SlideType> {
        if flags & 0x01 != 0 {
            Some(SlideType::Shift)
        } else if flags & 0x02 != 0 {
            Some(SlideType::Legato)
        } else if flags & 0x04 != 0 {
            Some(SlideType::OutDownwards)
        } else if flags & 0x08 != 0 {
            Some(SlideType::OutUpwards)
        } else if flags & 0x10 != 0 {
            Some(SlideType::IntoFromBelow)
        } else if flags & 0x20 != 0 {
            Some(SlideType::IntoFromAbove)
        } else {
            None
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HarmonicType {
    Natural,
    Artificial,
    Pinch,
    Tap,
    Semi,
    Feedback,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Accent {
    Normal,
    Heavy,
}

/// Pitch-bend shape in semitones relative to the fretted pitch.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Bend {
    pub origin: f32,
    pub middle: f32,
    pub destination: f32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Tie {
    pub origin: bool,
    pub destination: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Note {
    /// 0-based string, 0 = highest-pitch string
    pub string: u8,
    pub fret: u8,
    pub pitch_class: u8,
    pub note_name: String,
    pub slide: Option<SlideType>,
    pub harmonic: Option<HarmonicType>,
    pub palm_mute: bool,
    pub muted: bool,
    pub let_ring: bool,
    pub bend: Option<Bend>,
    pub tie: Tie,
    pub vibrato: bool,
    pub hammer_on: bool,
    pub pull_off: bool,
    pub tapped: bool,
    pub accent: Option<Accent>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Beat {
    /// Global index within the owning track, assigned in traversal order
    pub index: usize,
    pub bar_index: usize,
    pub notes: Vec<Note>,
    pub duration: Duration,
    pub tuplet: Option<(u8, u8)>,
    pub dotted: u8,
    pub is_rest: bool,
    pub dynamic: Option<String>,
    /// Tempo in BPM effective at this beat
    pub tempo: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub index: usize,
    /// (numerator, denominator)
    pub time_signature: (u8, u8),
    pub key_signature: Option<KeySignature>,
    pub section: Option<Section>,
    pub beats: Vec<Beat>,
    pub repeat_start: bool,
    pub repeat_end: bool,
    pub repeat_count: i32,
}

impl Default for Bar {
    fn default() -> Self {
        Bar {
            index: 0,
            time_signature: (4, 4),
            key_signature: None,
            section: None,
            beats: vec![],
            repeat_start: false,
            repeat_end: false,
            repeat_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    pub id: i32,
    pub name: String,
    pub short_name: String,
    pub instrument: Option<String>,
    /// Open-string note names, index 0 = highest-pitch string
    pub tuning: Vec<NoteName>,
    /// Open-string MIDI pitches, same order as `tuning`
    pub tuning_midi: Vec<i32>,
    pub capo_fret: i32,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Song {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Song tempo in BPM
    pub tempo: i32,
    pub tracks: Vec<Track>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_pitch_class_wraps_negatives() {
        for n in -60..=180 {
            assert_eq!(midi_to_pitch_class(n), (((n % 12) + 12) % 12) as u8);
        }
        assert_eq!(midi_to_pitch_class(64), 4); // E4
        assert_eq!(midi_to_pitch_class(-1), 11);
    }

    #[test]
    fn note_name_round_trip() {
        let naturals = [0u8, 2, 4, 5, 7, 9, 11];
        let natural_names = ["C", "D", "E", "F", "G", "A", "B"];
        for pc in 0..12u8 {
            let sharp = NoteName::from_pitch_class(pc, true);
            let flat = NoteName::from_pitch_class(pc, false);
            assert_eq!(sharp.pitch_class, pc);
            assert_eq!(flat.pitch_class, pc);
            if let Some(pos) = naturals.iter().position(|&n| n == pc) {
                assert_eq!(sharp.name, natural_names[pos]);
                assert_eq!(flat.name, natural_names[pos]);
            } else {
                assert!(sharp.name.ends_with('#'));
                assert!(flat.name.ends_with('b'));
            }
        }
    }

    #[test]
    fn duration_to_beats_table() {
        assert_eq!(duration_to_beats(Duration::Whole, 0, None), 4.0);
        assert_eq!(duration_to_beats(Duration::Quarter, 1, None), 1.5);
        let third = duration_to_beats(Duration::Quarter, 0, Some((3, 2)));
        assert!((third - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(duration_to_beats(Duration::Quarter, 1, Some((3, 2))), 1.0);
        assert_eq!(duration_to_beats(Duration::HundredTwentyEighth, 0, None), 0.03125);
    }

    #[test]
    fn beat_duration_wall_clock() {
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
    fn musical_beat_positions_in_four_four() {
        let beat = |duration| Beat {
            duration,
            ..Default::default()
        };
        let bar = Bar {
            time_signature: (4, 4),
            beats: vec![
                beat(Duration::Eighth),
                beat(Duration::Eighth),
                beat(Duration::Quarter),
                beat(Duration::Half),
            ],
            ..Default::default()
        };
        assert_eq!(musical_beat_position(&bar, 0), 1);
        assert_eq!(musical_beat_position(&bar, 1), 1);
        assert_eq!(musical_beat_position(&bar, 2), 2);
        assert_eq!(musical_beat_position(&bar, 3), 3);
        assert_eq!(bar_musical_beat_count(&bar), 4);
    }

    #[test]
    fn musical_beat_position_clamps_to_numerator() {
        let bar = Bar {
            time_signature: (3, 4),
            beats: vec![
                Beat {
                    duration: Duration::Whole,
                    ..Default::default()
                },
                Beat {
                    duration: Duration::Quarter,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(musical_beat_position(&bar, 1), 3);
    }

    #[test]
    fn slide_flag_mapping() {
        assert_eq!(SlideType::from_flags(0x01), Some(SlideType::Shift));
        assert_eq!(SlideType::from_flags(0x20), Some(SlideType::IntoFromAbove));
        assert_eq!(SlideType::from_flags(0x00), None);
        assert_eq!(SlideType::from_flags(0x40), None);
    }
}
