//! GP3/GP5 music data: tracks, row-major measures, voices, beats and notes,
//! flattened straight into the unified model.

use crate::model::{Accent, Bar, Beat, Note, NoteName, Song, Track, midi_to_pitch_class};
use crate::parser::primitive_parser::{
    parse_byte, parse_byte_size_string, parse_double, parse_int, parse_int_byte_sized_string,
    parse_short, parse_signed_byte, skip,
};
use crate::parser::song_parser::{
    dynamic_name, parse_beat_effects, parse_chord, parse_duration, parse_measure_headers,
    parse_note_effects, BeatTemplate, GpVersion, MeasureHeader, SongHeader, DEFAULT_DYNAMIC,
};
use nom::error::{Error, ErrorKind};
use nom::{IResult, Parser};

const MAX_STRINGS: u8 = 7;

pub(crate) struct MusicParser {
    version: GpVersion,
    song: Song,
    headers: Vec<MeasureHeader>,
    /// Per-track running beat index
    beat_counters: Vec<usize>,
}

fn failure(i: &[u8]) -> nom::Err<Error<&[u8]>> {
    nom::Err::Failure(Error::new(i, ErrorKind::Verify))
}

impl MusicParser {
    pub(crate) fn new(header: SongHeader) -> Self {
        let song = Song {
            title: header.title,
            artist: header.artist,
            album: header.album,
            tempo: header.tempo,
            tracks: vec![],
        };
        MusicParser {
            version: header.version,
            song,
            headers: vec![],
            beat_counters: vec![],
        }
    }

    pub(crate) fn take_song(&mut self) -> Song {
        std::mem::take(&mut self.song)
    }

    pub(crate) fn parse_music_data<'a>(&mut self, i: &'a [u8]) -> IResult<&'a [u8], ()> {
        let mut i = i;
        if self.version >= GpVersion::GP5 {
            // directions (19 shorts) and master reverb
            i = skip(i, 42);
        }

        let (i, (measure_count, track_count)) = (parse_int, parse_int).parse(i)?;
        log::debug!("Parsing music data -> track_count: {track_count} measure_count: {measure_count}");
        if measure_count < 1 || track_count < 1 {
            return Err(failure(i));
        }

        let song_tempo = self.song.tempo;
        let (i, headers) = parse_measure_headers(measure_count, song_tempo, self.version)(i)?;
        self.headers = headers;

        let i = self.parse_tracks(i, track_count as usize)?;
        let i = self.parse_measures(i, measure_count as usize)?;
        Ok((i, ()))
    }

    fn parse_tracks<'a>(&mut self, i: &'a [u8], track_count: usize) -> Result<&'a [u8], nom::Err<Error<&'a [u8]>>> {
        log::debug!("Parsing {track_count} tracks");
        let mut i = i;
        for number in 1..=track_count {
            i = self.parse_track(i, number)?;
        }
        self.beat_counters = vec![0; track_count];
        // tracks done
        if self.version == GpVersion::GP5 {
            i = skip(i, 2);
        }
        if self.version > GpVersion::GP5 {
            i = skip(i, 1);
        }
        Ok(i)
    }

    fn parse_track<'a>(&mut self, i: &'a [u8], number: usize) -> Result<&'a [u8], nom::Err<Error<&'a [u8]>>> {
        log::debug!("--------");
        log::debug!("Parsing track {number}");
        let mut i = i;

        // a blank byte precedes the first track always, and every track
        // on GP5.0
        if self.version >= GpVersion::GP5 && (number == 1 || self.version == GpVersion::GP5) {
            i = skip(i, 1);
        }

        let (inner, _flags1) = parse_byte(i)?; // bit 0: percussion
        i = inner;

        let (inner, name) = parse_byte_size_string(40)(i)?;
        i = inner;
        log::debug!("Track name: {name}");

        let (inner, string_count) = parse_int(i)?;
        i = inner;
        log::debug!("String count: {string_count}");
        if string_count < 1 || string_count > i32::from(MAX_STRINGS) {
            return Err(failure(i));
        }

        // seven tuning slots, highest-pitch string first
        let mut tuning_midi = Vec::with_capacity(string_count as usize);
        for slot in 0..7 {
            let (inner, midi) = parse_int(i)?;
            i = inner;
            if slot < string_count {
                tuning_midi.push(midi);
            }
        }
        log::debug!("Tuning: {tuning_midi:?}");

        let (inner, _midi_port) = parse_int(i)?;
        i = inner;
        let (inner, _channel_index) = parse_int(i)?;
        i = inner;
        let (inner, _effect_channel_index) = parse_int(i)?;
        i = inner;
        let (inner, _fret_count) = parse_int(i)?;
        i = inner;
        let (inner, capo_fret) = parse_int(i)?;
        i = inner;
        i = skip(i, 4); // colour

        // display flags and the RSE tail, fixed-size per minor version
        if self.version == GpVersion::GP5 {
            i = skip(i, 44);
        } else if self.version == GpVersion::GP5_10 {
            i = skip(i, 49);
            let (inner, _rse_effect) = parse_int_byte_sized_string(i)?;
            i = inner;
            let (inner, _rse_effect_category) = parse_int_byte_sized_string(i)?;
            i = inner;
        }

        let tuning = tuning_midi
            .iter()
            .map(|&midi| NoteName::from_midi(midi, true))
            .collect();
        self.song.tracks.push(Track {
            id: number as i32 - 1,
            name,
            short_name: String::new(),
            instrument: None,
            tuning,
            tuning_midi,
            capo_fret,
            bars: vec![],
        });
        Ok(i)
    }

    /// Measures are stored row-major: measure 1 for every track, then
    /// measure 2 for every track, and so on. GP5 ends each track-measure
    /// with a line-break byte.
    fn parse_measures<'a>(&mut self, i: &'a [u8], measure_count: usize) -> Result<&'a [u8], nom::Err<Error<&'a [u8]>>> {
        let track_count = self.song.tracks.len();
        let mut i = i;
        for measure_index in 0..measure_count {
            for track_index in 0..track_count {
                log::debug!("--------");
                log::debug!("Parsing measure {measure_index} for track {track_index}");
                i = self.parse_measure(i, measure_index, track_index)?;
                if self.version >= GpVersion::GP5 {
                    i = skip(i, 1);
                }
            }
        }
        Ok(i)
    }

    fn parse_measure<'a>(
        &mut self,
        i: &'a [u8],
        measure_index: usize,
        track_index: usize,
    ) -> Result<&'a [u8], nom::Err<Error<&'a [u8]>>> {
        let mut i = i;
        let mut voices: Vec<(Vec<Beat>, bool)> = vec![];
        let voice_count = if self.version >= GpVersion::GP5 { 2 } else { 1 };
        for voice_index in 0..voice_count {
            log::debug!("Parsing voice {voice_index}");
            let (inner, voice) = self.parse_voice(i, measure_index, track_index)?;
            i = inner;
            voices.push(voice);
        }

        // publish the first voice unless it holds nothing but empty beats
        let mut voices = voices.into_iter();
        let first = voices.next().unwrap_or_default();
        let beats = if first.1 {
            voices.next().map(|(beats, _)| beats).unwrap_or(first.0)
        } else {
            first.0
        };

        let header = &self.headers[measure_index];
        let tempo = header.tempo;
        let mut bar = Bar {
            index: measure_index,
            time_signature: header.time_signature,
            key_signature: header.key_signature,
            section: header.section.clone(),
            repeat_start: header.repeat_open,
            repeat_end: header.repeat_close.is_some(),
            repeat_count: header.repeat_close.unwrap_or(0).max(0),
            beats,
        };
        let counter = &mut self.beat_counters[track_index];
        for beat in &mut bar.beats {
            beat.index = *counter;
            *counter += 1;
            beat.bar_index = measure_index;
            beat.tempo = tempo;
            beat.is_rest = beat.notes.is_empty();
        }
        self.song.tracks[track_index].bars.push(bar);
        Ok(i)
    }

    fn parse_voice<'a>(
        &mut self,
        i: &'a [u8],
        measure_index: usize,
        track_index: usize,
    ) -> Result<(&'a [u8], (Vec<Beat>, bool)), nom::Err<Error<&'a [u8]>>> {
        let (mut i, beat_count) = parse_int(i)?;
        log::debug!("...with {beat_count} beats");
        let mut beats: Vec<Beat> = vec![];
        let mut all_empty = true;
        for _ in 0..beat_count.max(0) {
            let (inner, empty) = self.parse_beat(i, measure_index, track_index, &mut beats)?;
            i = inner;
            all_empty &= empty;
        }
        let empty = all_empty || beats.is_empty();
        Ok((i, (beats, empty)))
    }

    /// Parse one beat into `voice_beats`; returns whether the beat carried
    /// the empty status marker.
    fn parse_beat<'a>(
        &mut self,
        i: &'a [u8],
        measure_index: usize,
        track_index: usize,
        voice_beats: &mut Vec<Beat>,
    ) -> Result<(&'a [u8], bool), nom::Err<Error<&'a [u8]>>> {
        let (mut i, flags) = parse_byte(i)?;
        log::debug!("Beat flags: {flags:08b}");

        let mut empty = false;
        if (flags & 0x40) != 0 {
            let (inner, status) = parse_byte(i)?;
            i = inner;
            empty = status & 0x02 == 0;
        }

        let (inner, (duration, dotted, tuplet)) = parse_duration(flags)(i)?;
        i = inner;

        let mut beat = Beat {
            duration,
            dotted,
            tuplet,
            ..Default::default()
        };

        if (flags & 0x02) != 0 {
            let (inner, ()) = parse_chord(self.version)(i)?;
            i = inner;
        }

        if (flags & 0x04) != 0 {
            let (inner, _text) = parse_int_byte_sized_string(i)?;
            i = inner;
        }

        let mut template = BeatTemplate::default();
        if (flags & 0x08) != 0 {
            let (inner, ()) = parse_beat_effects(&mut template, self.version)(i)?;
            i = inner;
        }

        if (flags & 0x10) != 0 {
            i = self.parse_mix_change(i, measure_index)?;
        }

        let (inner, string_mask) = parse_byte(i)?;
        i = inner;
        let string_count = self.song.tracks[track_index].tuning_midi.len() as u8;
        log::debug!("String mask: {string_mask:08b} over {string_count} strings");
        let mut dynamic_code: Option<i8> = None;
        for gp_string in 1..=string_count {
            if string_mask & (1 << (7 - gp_string)) != 0 {
                let (inner, code) =
                    self.parse_note(i, gp_string, track_index, voice_beats, &mut beat, &template)?;
                i = inner;
                dynamic_code.get_or_insert(code);
            }
        }
        if !beat.notes.is_empty() {
            beat.dynamic = Some(dynamic_name(dynamic_code.unwrap_or(DEFAULT_DYNAMIC)).to_string());
        }

        if self.version >= GpVersion::GP5 {
            let (inner, flags2) = parse_short(i)?;
            i = inner;
            if (flags2 & 0x0800) != 0 {
                i = skip(i, 1);
            }
        }

        voice_beats.push(beat);
        Ok((i, empty))
    }

    /// Parse one note onto `beat`; returns the dynamic byte.
    fn parse_note<'a>(
        &mut self,
        i: &'a [u8],
        gp_string: u8,
        track_index: usize,
        voice_beats: &mut [Beat],
        beat: &mut Beat,
        template: &BeatTemplate,
    ) -> Result<(&'a [u8], i8), nom::Err<Error<&'a [u8]>>> {
        let (mut i, flags) = parse_byte(i)?;
        log::debug!("Note flags: {flags:08b} on string {gp_string}");

        let mut note = Note {
            string: gp_string - 1,
            vibrato: template.vibrato,
            harmonic: template.harmonic,
            tapped: template.tapped,
            ..Default::default()
        };
        if (flags & 0x02) != 0 {
            note.accent = Some(Accent::Heavy);
        } else if (flags & 0x40) != 0 {
            note.accent = Some(Accent::Normal);
        }

        let mut tied = false;
        if (flags & 0x20) != 0 {
            let (inner, note_type) = parse_byte(i)?;
            i = inner;
            tied = note_type == 2;
            note.muted = note_type == 3;
        }

        // time-independent duration, GP3 only
        if self.version < GpVersion::GP5 && (flags & 0x01) != 0 {
            i = skip(i, 2);
        }

        let mut dynamic_code = DEFAULT_DYNAMIC;
        if (flags & 0x10) != 0 {
            let (inner, velocity) = parse_signed_byte(i)?;
            i = inner;
            dynamic_code = velocity;
        }

        if (flags & 0x20) != 0 {
            let (inner, fret) = parse_signed_byte(i)?;
            i = inner;
            note.fret = if tied {
                self.resolve_tie(track_index, note.string, voice_beats)
            } else {
                fret.clamp(0, 99) as u8
            };
            note.tie.destination = tied;
        }

        if (flags & 0x80) != 0 {
            // fingering
            i = skip(i, 2);
        }

        if self.version >= GpVersion::GP5 {
            if (flags & 0x01) != 0 {
                let (inner, _duration_percent) = parse_double(i)?;
                i = inner;
            }
            let (inner, _flags2) = parse_byte(i)?; // swap accidentals
            i = inner;
        }

        if (flags & 0x08) != 0 {
            let (inner, ()) = parse_note_effects(&mut note, self.version)(i)?;
            i = inner;
        }

        let track = &self.song.tracks[track_index];
        let open = track
            .tuning_midi
            .get(note.string as usize)
            .copied()
            .unwrap_or(0);
        note.pitch_class = midi_to_pitch_class(open + track.capo_fret + i32::from(note.fret));
        note.note_name = NoteName::from_pitch_class(note.pitch_class, true).name;

        beat.notes.push(note);
        Ok((i, dynamic_code))
    }

    /// Fret of the most recent note on the same string, marking it as the
    /// tie origin.
    fn resolve_tie(&mut self, track_index: usize, string: u8, voice_beats: &mut [Beat]) -> u8 {
        for beat in voice_beats.iter_mut().rev() {
            for note in beat.notes.iter_mut().rev() {
                if note.string == string {
                    note.tie.origin = true;
                    return note.fret;
                }
            }
        }
        let track = &mut self.song.tracks[track_index];
        for bar in track.bars.iter_mut().rev() {
            for beat in bar.beats.iter_mut().rev() {
                for note in beat.notes.iter_mut().rev() {
                    if note.string == string {
                        note.tie.origin = true;
                        return note.fret;
                    }
                }
            }
        }
        log::debug!("tie destination without an origin on string {string}");
        0
    }

    /// Mix-table change: instrument/volume/pan/effects values with
    /// conditional trailing bytes; a non-negative tempo re-times every
    /// measure from this one on.
    fn parse_mix_change<'a>(&mut self, i: &'a [u8], measure_index: usize) -> Result<&'a [u8], nom::Err<Error<&'a [u8]>>> {
        log::debug!("Parsing mix change");
        let (mut i, _instrument) = parse_signed_byte(i)?;

        if self.version >= GpVersion::GP5 {
            // RSE instrument ids
            i = skip(i, 16);
        }

        let (inner, volume) = parse_signed_byte(i)?;
        i = inner;
        let (inner, pan) = parse_signed_byte(i)?;
        i = inner;
        let (inner, chorus) = parse_signed_byte(i)?;
        i = inner;
        let (inner, reverb) = parse_signed_byte(i)?;
        i = inner;
        let (inner, phaser) = parse_signed_byte(i)?;
        i = inner;
        let (inner, tremolo) = parse_signed_byte(i)?;
        i = inner;

        if self.version >= GpVersion::GP5 {
            let (inner, _tempo_name) = parse_int_byte_sized_string(i)?;
            i = inner;
        }

        let (inner, tempo_value) = parse_int(i)?;
        i = inner;

        for value in [volume, pan, chorus, reverb, phaser, tremolo] {
            if value >= 0 {
                i = skip(i, 1);
            }
        }

        if tempo_value >= 0 {
            for header in self.headers[measure_index..].iter_mut() {
                header.tempo = tempo_value;
            }
            i = skip(i, 1);
            if self.version > GpVersion::GP5 {
                i = skip(i, 1);
            }
        }

        if self.version >= GpVersion::GP5 {
            // applied-tracks byte and an extra GP5 byte
            i = skip(i, 1);
            i = skip(i, 1);
            if self.version > GpVersion::GP5 {
                let (inner, _effect) = parse_int_byte_sized_string(i)?;
                i = inner;
                let (inner, _effect_category) = parse_int_byte_sized_string(i)?;
                i = inner;
            }
        }

        Ok(i)
    }
}
