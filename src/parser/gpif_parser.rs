//! GPIF XML to `Song` transformer, shared by the GPX and GP7 paths.
//!
//! The GPIF document is an ID-referenced entity graph: `<Notes>`, `<Beats>`,
//! `<Voices>`, `<Bars>` and `<Rhythms>` hold children addressed by `id`
//! attribute, and `<MasterBars>` enumerates the timeline with one bar id per
//! track. The transformer builds one index per entity kind up front and
//! flattens the graph per track, so no ids survive into the output model.

use crate::error::TabError;
use crate::model::{
    Accent, Bar, Beat, Bend, Duration, HarmonicType, KeyMode, KeySignature, Note, NoteName,
    Section, SlideType, Song, Tie, Track, midi_to_pitch_class,
};
use regex::Regex;
use roxmltree::{Document, Node};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Standard six-string tuning, low to high (E2 A2 D3 G3 B3 E4).
const DEFAULT_TUNING: [i32; 6] = [40, 45, 50, 55, 59, 64];

const DEFAULT_TEMPO: i32 = 120;

fn capo_regex() -> &'static Regex {
    static CAPO_RE: OnceLock<Regex> = OnceLock::new();
    CAPO_RE.get_or_init(|| Regex::new(r"(?i)capo\s+(\d+)").expect("valid capo pattern"))
}

/// Parse a GPIF XML document into a `Song`.
pub fn parse_gpif(xml: &str) -> Result<Song, TabError> {
    let xml = xml.trim_start_matches('\u{feff}');
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if root.tag_name().name() != "GPIF" {
        return Err(TabError::BadContainer(format!(
            "expected <GPIF> root, got <{}>",
            root.tag_name().name()
        )));
    }

    let bars = collect_index(root, "Bars", "Bar");
    let voices = collect_index(root, "Voices", "Voice");
    let beats = collect_index(root, "Beats", "Beat");
    let notes = collect_index(root, "Notes", "Note");
    let rhythms = collect_index(root, "Rhythms", "Rhythm");
    let master_bars: Vec<Node> = child(root, "MasterBars")
        .map(|mb| elements_named(mb, "MasterBar").collect())
        .unwrap_or_default();
    let tempo_automations = collect_tempo_automations(root);

    let mut song = Song {
        tempo: tempo_at(&tempo_automations, 0),
        ..Default::default()
    };
    if let Some(score) = child(root, "Score") {
        song.title = child_text(score, "Title").unwrap_or_default();
        song.artist = child_text(score, "Artist").unwrap_or_default();
        song.album = child_text(score, "Album").unwrap_or_default();
    }

    let track_nodes: Vec<Node> = child(root, "Tracks")
        .map(|t| elements_named(t, "Track").collect())
        .unwrap_or_default();
    log::debug!(
        "GPIF: {} tracks, {} master bars",
        track_nodes.len(),
        master_bars.len()
    );

    for (track_index, track_node) in track_nodes.iter().enumerate() {
        let track = build_track(
            *track_node,
            track_index,
            &master_bars,
            &bars,
            &voices,
            &beats,
            &notes,
            &rhythms,
            &tempo_automations,
        );
        song.tracks.push(track);
    }
    Ok(song)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn elements_named<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: Node, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn collect_index<'a, 'input>(
    root: Node<'a, 'input>,
    kind: &str,
    entity: &str,
) -> HashMap<String, Node<'a, 'input>> {
    let mut index = HashMap::new();
    if let Some(container) = child(root, kind) {
        for node in container.children().filter(|n| n.is_element()) {
            if node.tag_name().name() == entity {
                if let Some(id) = node.attribute("id") {
                    index.insert(id.to_string(), node);
                }
            }
        }
    }
    index
}

fn id_list(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// `<MasterTrack>` tempo automations as `(bar_index, bpm)` sorted by bar.
fn collect_tempo_automations(root: Node) -> Vec<(usize, i32)> {
    let mut automations = vec![];
    let Some(master_track) = child(root, "MasterTrack") else {
        return automations;
    };
    let Some(container) = child(master_track, "Automations") else {
        return automations;
    };
    for automation in elements_named(container, "Automation") {
        let kind = child_text(automation, "Type").unwrap_or_default();
        if !kind.eq_ignore_ascii_case("tempo") {
            continue;
        }
        let bar = child_text(automation, "Bar")
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0);
        // the value carries the BPM followed by a beat-unit token
        let value = child_text(automation, "Value")
            .and_then(|t| t.split_whitespace().next().and_then(|v| v.parse::<f32>().ok()));
        if let Some(bpm) = value {
            automations.push((bar, bpm.round() as i32));
        }
    }
    automations.sort_by_key(|(bar, _)| *bar);
    automations
}

/// Tempo effective at `bar`: the most recent automation at or before it.
fn tempo_at(automations: &[(usize, i32)], bar: usize) -> i32 {
    automations
        .iter()
        .take_while(|(b, _)| *b <= bar)
        .last()
        .or_else(|| automations.first().filter(|(b, _)| *b == 0))
        .map(|(_, bpm)| *bpm)
        .unwrap_or(DEFAULT_TEMPO)
}

/// Find a named `<Property>` on the track, falling back to the first staff.
fn find_track_property<'a, 'input>(
    track: Node<'a, 'input>,
    name: &str,
) -> Option<Node<'a, 'input>> {
    let direct = child(track, "Properties").and_then(|props| find_property(props, name));
    direct.or_else(|| {
        child(track, "Staves")
            .and_then(|staves| child(staves, "Staff"))
            .and_then(|staff| child(staff, "Properties"))
            .and_then(|props| find_property(props, name))
    })
}

fn find_property<'a, 'input>(properties: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    elements_named(properties, "Property").find(|p| p.attribute("name") == Some(name))
}

/// Track tuning as MIDI pitches low to high, plus the capo fret.
fn track_tuning(track: Node) -> (Vec<i32>, i32) {
    let tuning = find_track_property(track, "Tuning")
        .and_then(|p| child_text(p, "Pitches"))
        .map(|pitches| {
            pitches
                .split_whitespace()
                .filter_map(|p| p.parse::<i32>().ok())
                .collect::<Vec<i32>>()
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TUNING.to_vec());
    let capo = find_track_property(track, "CapoFret")
        .and_then(|p| child_text(p, "Fret"))
        .and_then(|f| f.parse::<i32>().ok())
        .unwrap_or(0);
    (tuning, capo)
}

fn parse_time_signature(text: &str) -> Option<(u8, u8)> {
    let (num, den) = text.split_once('/')?;
    Some((num.trim().parse().ok()?, den.trim().parse().ok()?))
}

fn parse_key_signature(master_bar: Node) -> Option<KeySignature> {
    let key = child(master_bar, "Key")?;
    let accidental_count = child_text(key, "AccidentalCount")?.parse::<i8>().ok()?;
    let mode = match child_text(key, "Mode").as_deref() {
        Some(m) if m.eq_ignore_ascii_case("minor") => KeyMode::Minor,
        _ => KeyMode::Major,
    };
    Some(KeySignature {
        accidental_count,
        mode,
    })
}

fn parse_section(master_bar: Node) -> Option<Section> {
    let section = child(master_bar, "Section")?;
    let letter = child_text(section, "Letter");
    let text = child_text(section, "Text");
    if letter.is_none() && text.is_none() {
        return None;
    }
    Some(Section { letter, text })
}

fn duration_from_note_value(value: &str) -> Duration {
    match value {
        "Whole" => Duration::Whole,
        "Half" => Duration::Half,
        "Quarter" => Duration::Quarter,
        "Eighth" => Duration::Eighth,
        "16th" => Duration::Sixteenth,
        "32nd" => Duration::ThirtySecond,
        "64th" => Duration::SixtyFourth,
        "128th" => Duration::HundredTwentyEighth,
        other => {
            log::debug!("unknown rhythm note value {other:?}");
            Duration::Quarter
        }
    }
}

/// Duration, augmentation dots and tuplet from a referenced `<Rhythm>`.
fn resolve_rhythm(
    beat_node: Node,
    rhythms: &HashMap<String, Node>,
) -> (Duration, u8, Option<(u8, u8)>) {
    let rhythm = child(beat_node, "Rhythm")
        .and_then(|r| r.attribute("ref"))
        .and_then(|id| rhythms.get(id));
    let Some(rhythm) = rhythm else {
        return (Duration::Quarter, 0, None);
    };
    let duration = child_text(*rhythm, "NoteValue")
        .map(|v| duration_from_note_value(&v))
        .unwrap_or_default();
    let dots = child(*rhythm, "AugmentationDot")
        .and_then(|d| d.attribute("count"))
        .and_then(|c| c.parse::<u8>().ok())
        .unwrap_or(0);
    let tuplet = child(*rhythm, "PrimaryTuplet").and_then(|t| {
        let num = t.attribute("num")?.parse::<u8>().ok()?;
        let den = t.attribute("den")?.parse::<u8>().ok()?;
        // a 1:1 tuplet is no tuplet
        (num != 1 || den != 1).then_some((num, den))
    });
    (duration, dots, tuplet)
}

fn harmonic_from_htype(htype: &str) -> Option<HarmonicType> {
    match htype {
        "Natural" => Some(HarmonicType::Natural),
        "Artificial" => Some(HarmonicType::Artificial),
        "Pinch" => Some(HarmonicType::Pinch),
        "Tap" => Some(HarmonicType::Tap),
        "Semi" => Some(HarmonicType::Semi),
        "Feedback" => Some(HarmonicType::Feedback),
        other => {
            log::debug!("unknown harmonic type {other:?}");
            None
        }
    }
}

/// Build a note from its `<Note>` element. Notes without a string/fret pair
/// (e.g. percussion elements) are skipped.
fn parse_note(note_node: Node) -> Option<Note> {
    let mut properties: HashMap<&str, Node> = HashMap::new();
    if let Some(props) = child(note_node, "Properties") {
        for property in elements_named(props, "Property") {
            if let Some(name) = property.attribute("name") {
                properties.insert(name, property);
            }
        }
    }

    let prop_text = |name: &str, tag: &str| -> Option<String> {
        properties.get(name).and_then(|p| child_text(*p, tag))
    };
    let prop_enabled =
        |name: &str| -> bool { properties.get(name).is_some_and(|p| child(*p, "Enable").is_some()) };
    let prop_float = |name: &str| -> Option<f32> {
        prop_text(name, "Float").and_then(|f| f.parse::<f32>().ok())
    };

    let string = prop_text("String", "String")?.parse::<u8>().ok()?;
    let fret = prop_text("Fret", "Fret")?.parse::<u8>().ok()?;

    let mut note = Note {
        string,
        fret,
        ..Default::default()
    };

    note.palm_mute = prop_enabled("PalmMuted");
    note.muted = prop_enabled("Muted");
    note.tapped = prop_enabled("Tapped");
    note.hammer_on = prop_enabled("HopoOrigin");
    note.pull_off = prop_enabled("HopoDestination");
    note.slide = prop_text("Slide", "Flags")
        .and_then(|f| f.parse::<u8>().ok())
        .and_then(SlideType::from_flags);
    note.harmonic = prop_text("HarmonicType", "HType")
        .as_deref()
        .and_then(harmonic_from_htype);
    if prop_enabled("Bended") {
        note.bend = Some(Bend {
            origin: prop_float("BendOriginValue").unwrap_or(0.0),
            middle: prop_float("BendMiddleValue").unwrap_or(0.0),
            destination: prop_float("BendDestinationValue").unwrap_or(0.0),
        });
    }

    note.let_ring = child(note_node, "LetRing").is_some();
    note.vibrato = child(note_node, "Vibrato").is_some();
    note.accent = child_text(note_node, "Accent")
        .and_then(|a| a.parse::<u8>().ok())
        .and_then(|a| match a {
            0 => None,
            8 => Some(Accent::Heavy),
            _ => Some(Accent::Normal),
        });
    if let Some(tie) = child(note_node, "Tie") {
        note.tie = Tie {
            origin: tie.attribute("origin") == Some("true"),
            destination: tie.attribute("destination") == Some("true"),
        };
    }
    Some(note)
}

#[allow(clippy::too_many_arguments)]
fn build_track(
    track_node: Node,
    track_index: usize,
    master_bars: &[Node],
    bars: &HashMap<String, Node>,
    voices: &HashMap<String, Node>,
    beats: &HashMap<String, Node>,
    notes: &HashMap<String, Node>,
    rhythms: &HashMap<String, Node>,
    tempo_automations: &[(usize, i32)],
) -> Track {
    let id = track_node
        .attribute("id")
        .and_then(|id| id.parse::<i32>().ok())
        .unwrap_or(track_index as i32);
    let (tuning_low_to_high, mut capo) = track_tuning(track_node);
    let string_count = tuning_low_to_high.len() as u8;

    let mut track = Track {
        id,
        name: child_text(track_node, "Name").unwrap_or_default(),
        short_name: child_text(track_node, "ShortName").unwrap_or_default(),
        instrument: child(track_node, "Instrument")
            .and_then(|i| i.attribute("ref"))
            .map(|r| r.to_string()),
        tuning_midi: tuning_low_to_high,
        ..Default::default()
    };

    let mut beat_counter = 0usize;
    let mut time_signature = (4u8, 4u8);
    let mut free_texts: Vec<String> = vec![];

    for (bar_index, master_bar) in master_bars.iter().enumerate() {
        if let Some(ts) = child_text(*master_bar, "Time").and_then(|t| parse_time_signature(&t)) {
            time_signature = ts;
        }
        let repeat = child(*master_bar, "Repeat");
        let mut bar = Bar {
            index: bar_index,
            time_signature,
            key_signature: parse_key_signature(*master_bar),
            section: parse_section(*master_bar),
            repeat_start: repeat.is_some_and(|r| r.attribute("start") == Some("true")),
            repeat_end: repeat.is_some_and(|r| r.attribute("end") == Some("true")),
            repeat_count: repeat
                .and_then(|r| r.attribute("count"))
                .and_then(|c| c.parse::<i32>().ok())
                .unwrap_or(0),
            ..Default::default()
        };

        let tempo = tempo_at(tempo_automations, bar_index);
        for beat_node in bar_beats(*master_bar, track_index, bars, voices, beats) {
            let (duration, dotted, tuplet) = resolve_rhythm(beat_node, rhythms);
            if let Some(text) = child_text(beat_node, "FreeText") {
                free_texts.push(text);
            }
            let mut beat = Beat {
                index: beat_counter,
                bar_index,
                duration,
                dotted,
                tuplet,
                dynamic: child_text(beat_node, "Dynamic"),
                tempo,
                ..Default::default()
            };
            if let Some(ids) = child_text(beat_node, "Notes") {
                for note_id in id_list(&ids) {
                    if let Some(note) = notes.get(note_id).and_then(|n| parse_note(*n)) {
                        beat.notes.push(note);
                    }
                }
            }
            beat.is_rest = beat.notes.is_empty();
            beat_counter += 1;
            bar.beats.push(beat);
        }
        track.bars.push(bar);
    }

    // some exports only mention the capo in a free-text annotation
    if capo == 0 {
        capo = free_texts
            .iter()
            .find_map(|text| {
                capo_regex()
                    .captures(text)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<i32>().ok())
            })
            .filter(|fret| (1..=24).contains(fret))
            .unwrap_or(0);
    }
    track.capo_fret = capo;

    reverse_string_axis(&mut track, string_count);
    track
}

/// Beats of the track's bar within one master bar, first voice only.
fn bar_beats<'a, 'input>(
    master_bar: Node<'a, 'input>,
    track_index: usize,
    bars: &HashMap<String, Node<'a, 'input>>,
    voices: &HashMap<String, Node<'a, 'input>>,
    beats: &HashMap<String, Node<'a, 'input>>,
) -> Vec<Node<'a, 'input>> {
    let Some(bar_ids) = child_text(master_bar, "Bars") else {
        return vec![];
    };
    let bar_ids = id_list(&bar_ids);
    let bar_node = bar_ids
        .get(track_index)
        .or_else(|| bar_ids.first())
        .and_then(|id| bars.get(*id));
    let Some(bar_node) = bar_node else {
        return vec![];
    };

    let voice = child_text(*bar_node, "Voices").and_then(|ids| {
        id_list(&ids)
            .iter()
            .find(|id| **id != "-1")
            .and_then(|id| voices.get(*id))
            .copied()
    });
    let Some(voice) = voice else { return vec![] };

    child_text(voice, "Beats")
        .map(|ids| {
            id_list(&ids)
                .iter()
                .filter_map(|id| beats.get(*id).copied())
                .collect()
        })
        .unwrap_or_default()
}

/// GPIF numbers strings low to high; the model publishes high to low, with
/// pitch classes computed against the published tuning.
fn reverse_string_axis(track: &mut Track, string_count: u8) {
    track.tuning_midi.reverse();
    track.tuning = track
        .tuning_midi
        .iter()
        .map(|&midi| NoteName::from_midi(midi, true))
        .collect();
    for bar in &mut track.bars {
        for beat in &mut bar.beats {
            for note in &mut beat.notes {
                note.string = string_count
                    .saturating_sub(1)
                    .saturating_sub(note.string.min(string_count.saturating_sub(1)));
                let open = track.tuning_midi.get(note.string as usize).copied().unwrap_or(0);
                note.pitch_class =
                    midi_to_pitch_class(open + track.capo_fret + i32::from(note.fret));
                note.note_name = NoteName::from_pitch_class(note.pitch_class, true).name;
            }
        }
    }
}
