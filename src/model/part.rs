// Cantus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use super::{Error, GlobalAttributes, Result};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    convert::TryFrom,
    fmt,
};

const DEFAULT_TEMPO: f64 = 120.0;
const DEFAULT_VOLUME: f64 = 100.0;
const DEFAULT_QUANTIZATION: f64 = 90.0;
const DEFAULT_OCTAVE: i32 = 4;

/// The lowest and highest octaves a cursor can be in. Octave -1 holds MIDI note 0.
pub const OCTAVE_RANGE: std::ops::RangeInclusive<i32> = -1..=9;

/// The identity of a part.
///
/// Several parts can play the same instrument, so parts are told apart by their origin rather
/// than their name. The origin is also the track number the player knows the part by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PartOrigin(pub u32);

impl fmt::Display for PartOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The length of a note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoteLength {
    /// A number of beats, scaled by the part's tempo.
    Beats(f64),
    /// A fixed number of milliseconds.
    Millis(f64),
}

impl Default for NoteLength {
    /// Returns a quarter note.
    fn default() -> NoteLength {
        NoteLength::Beats(1.0)
    }
}

impl NoteLength {
    /// Converts the length to milliseconds at the given tempo in beats per minute.
    pub fn millis(self, tempo: f64) -> f64 {
        match self {
            NoteLength::Beats(beats) => beats * 60_000.0 / tempo,
            NoteLength::Millis(ms) => ms,
        }
    }
}

/// The position and note defaults of a part or voice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cursor {
    /// Where the next note starts, in milliseconds.
    pub current_offset: f64,
    /// Where the previous note started, in milliseconds.
    pub last_offset: f64,
    pub octave: i32,
    /// The length used by notes that do not specify one.
    pub length: NoteLength,
}

impl Default for Cursor {
    fn default() -> Cursor {
        Cursor {
            current_offset: 0.0,
            last_offset: 0.0,
            octave: DEFAULT_OCTAVE,
            length: NoteLength::default(),
        }
    }
}

impl Cursor {
    pub(crate) fn jump_to(&mut self, offset: f64) {
        self.last_offset = offset;
        self.current_offset = offset;
    }

    /// Moves the cursor to `octave`, which must be within [`OCTAVE_RANGE`].
    pub(crate) fn set_octave(&mut self, octave: i64) -> Result<()> {
        match i32::try_from(octave) {
            Ok(octave) if OCTAVE_RANGE.contains(&octave) => {
                self.octave = octave;
                Ok(())
            }
            _ => Err(Error::InvalidAttribute {
                attribute: "octave",
                value: octave as f64,
            }),
        }
    }
}

/// Part attributes that can also be set for the whole score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeKind {
    /// Beats per minute.
    Tempo,
    /// 0 to 100.
    Volume,
    /// The percentage of a note's length that it sounds for, 0 to 100.
    Quantization,
}

impl AttributeKind {
    pub fn name(self) -> &'static str {
        match self {
            AttributeKind::Tempo => "tempo",
            AttributeKind::Volume => "volume",
            AttributeKind::Quantization => "quantization",
        }
    }

    fn default_value(self) -> f64 {
        match self {
            AttributeKind::Tempo => DEFAULT_TEMPO,
            AttributeKind::Volume => DEFAULT_VOLUME,
            AttributeKind::Quantization => DEFAULT_QUANTIZATION,
        }
    }

    /// Checks that `value` is in range for this attribute.
    pub fn validate(self, value: f64) -> Result<f64> {
        let valid = match self {
            AttributeKind::Tempo => value.is_finite() && value > 0.0,
            AttributeKind::Volume | AttributeKind::Quantization => (0.0..=100.0).contains(&value),
        };
        if valid {
            Ok(value)
        } else {
            Err(Error::InvalidAttribute {
                attribute: self.name(),
                value,
            })
        }
    }
}

/// One instrument line of a score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Part {
    /// The instrument the part plays.
    pub name: String,
    pub origin: PartOrigin,
    /// The General MIDI program of the instrument.
    pub patch: u8,
    /// The part's own position, used while no voice group is active.
    pub cursor: Cursor,
    pub tempo: f64,
    pub volume: f64,
    pub quantization: f64,
    pub voices: VoiceGroup,
    #[serde(skip)]
    overrides: BTreeSet<AttributeKind>,
}

impl Part {
    pub(crate) fn new(
        name: &str,
        origin: PartOrigin,
        patch: u8,
        globals: &GlobalAttributes,
    ) -> Part {
        let value = |kind: AttributeKind| globals.get(kind).unwrap_or_else(|| kind.default_value());
        Part {
            name: name.to_owned(),
            origin,
            patch,
            cursor: Cursor::default(),
            tempo: value(AttributeKind::Tempo),
            volume: value(AttributeKind::Volume),
            quantization: value(AttributeKind::Quantization),
            voices: VoiceGroup::default(),
            overrides: BTreeSet::new(),
        }
    }

    /// The part's own offset, ignoring voices.
    pub fn current_offset(&self) -> f64 {
        self.cursor.current_offset
    }

    /// The cursor of the current voice, or the part's own cursor if no voice group is active.
    pub fn active_cursor(&self) -> &Cursor {
        match self.voices.current.and_then(|n| self.voices.voices.get(&n)) {
            Some(voice) => &voice.cursor,
            None => &self.cursor,
        }
    }

    pub fn active_cursor_mut(&mut self) -> &mut Cursor {
        let Part { cursor, voices, .. } = self;
        let current = voices.current;
        match current {
            Some(number) => match voices.voices.get_mut(&number) {
                Some(voice) => &mut voice.cursor,
                None => cursor,
            },
            None => cursor,
        }
    }

    /// Returns the voice with the given number, creating it at the part's position if the part
    /// has never used it.
    pub fn voice_mut(&mut self, number: u32) -> &mut Voice {
        let Part { cursor, voices, .. } = self;
        voices
            .voices
            .entry(number)
            .or_insert_with(|| Voice::new(number, cursor.clone()))
    }

    pub fn attribute(&self, kind: AttributeKind) -> f64 {
        match kind {
            AttributeKind::Tempo => self.tempo,
            AttributeKind::Volume => self.volume,
            AttributeKind::Quantization => self.quantization,
        }
    }

    /// Sets an attribute on this part only. Later global changes to it are ignored.
    pub(crate) fn set_attribute(&mut self, kind: AttributeKind, value: f64) {
        self.overrides.insert(kind);
        self.store_attribute(kind, value);
    }

    /// Applies a global attribute change unless this part has set its own value.
    pub(crate) fn inherit_attribute(&mut self, kind: AttributeKind, value: f64) {
        if !self.overrides.contains(&kind) {
            self.store_attribute(kind, value);
        }
    }

    fn store_attribute(&mut self, kind: AttributeKind, value: f64) {
        match kind {
            AttributeKind::Tempo => self.tempo = value,
            AttributeKind::Volume => self.volume = value,
            AttributeKind::Quantization => self.quantization = value,
        }
    }

    /// Makes `number` the current voice. Returns true if the set of active voices changed.
    pub(crate) fn enter_voice(&mut self, number: u32) -> bool {
        let Part { cursor, voices, .. } = self;
        let started = voices.active.insert(number);
        voices.current = Some(number);
        let voice = voices
            .voices
            .entry(number)
            .or_insert_with(|| Voice::new(number, cursor.clone()));
        if started {
            // Voices from an earlier group start over from where the part is now.
            voice.cursor = cursor.clone();
        }
        started
    }

    /// Ends the active voice group, moving the part to the furthest point any voice reached.
    /// Returns false if no voice group was active.
    pub(crate) fn end_voice_group(&mut self) -> bool {
        if !self.voices.is_active() {
            return false;
        }
        let (current, last) = self.voices.active_voices().fold(
            (self.cursor.current_offset, self.cursor.last_offset),
            |(current, last), voice| {
                (
                    current.max(voice.cursor.current_offset),
                    last.max(voice.cursor.last_offset),
                )
            },
        );
        self.cursor.current_offset = current;
        self.cursor.last_offset = last;
        self.voices.active.clear();
        self.voices.current = None;
        true
    }
}

/// An independent position within a part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Voice {
    pub number: u32,
    pub cursor: Cursor,
}

impl Voice {
    fn new(number: u32, cursor: Cursor) -> Voice {
        Voice { number, cursor }
    }
}

/// Every voice a part has used, and which of them are active.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoiceGroup {
    voices: BTreeMap<u32, Voice>,
    active: BTreeSet<u32>,
    current: Option<u32>,
}

impl VoiceGroup {
    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn get(&self, number: u32) -> Option<&Voice> {
        self.voices.get(&number)
    }

    /// The number of voices ever used, active or not.
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn active_voices(&self) -> impl Iterator<Item = &Voice> {
        self.active
            .iter()
            .filter_map(move |number| self.voices.get(number))
    }

    /// The offset every active voice has reached, or `None` if no voice is active.
    pub fn sync_offset(&self) -> Option<f64> {
        self.active_voices()
            .map(|voice| voice.cursor.current_offset)
            .fold(None, |min: Option<f64>, offset| {
                Some(min.map_or(offset, |min| min.min(offset)))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn piano() -> Part {
        Part::new("piano", PartOrigin(1), 0, &GlobalAttributes::default())
    }

    #[test]
    fn test_note_length_millis() {
        assert_eq!(NoteLength::Beats(1.0).millis(120.0), 500.0);
        assert_eq!(NoteLength::Beats(0.5).millis(60.0), 500.0);
        assert_eq!(NoteLength::Millis(250.0).millis(60.0), 250.0);
    }

    #[test]
    fn test_new_part_defaults() {
        let part = piano();
        assert_eq!(part.tempo, 120.0);
        assert_eq!(part.volume, 100.0);
        assert_eq!(part.quantization, 90.0);
        assert_eq!(part.cursor, Cursor::default());
        assert!(part.voices.is_empty());
    }

    #[test]
    fn test_active_cursor_follows_current_voice() {
        let mut part = piano();
        part.cursor.current_offset = 100.0;
        part.active_cursor_mut().current_offset = 200.0;
        assert_eq!(part.current_offset(), 200.0);

        assert!(part.enter_voice(1));
        assert_eq!(part.active_cursor().current_offset, 200.0);
        part.active_cursor_mut().current_offset = 700.0;
        assert_eq!(part.current_offset(), 200.0);
        assert_eq!(part.voices.get(1).unwrap().cursor.current_offset, 700.0);
    }

    #[test]
    fn test_reentering_active_voice_is_not_a_change() {
        let mut part = piano();
        assert!(part.enter_voice(1));
        part.active_cursor_mut().current_offset = 300.0;
        assert!(part.enter_voice(2));
        assert!(!part.enter_voice(1));
        assert_eq!(part.active_cursor().current_offset, 300.0);
    }

    #[test]
    fn test_end_voice_group_moves_to_furthest_voice() {
        let mut part = piano();
        part.enter_voice(1);
        part.active_cursor_mut().current_offset = 1000.0;
        part.enter_voice(2);
        part.active_cursor_mut().current_offset = 1500.0;
        assert_eq!(part.voices.sync_offset(), Some(1000.0));

        assert!(part.end_voice_group());
        assert_eq!(part.current_offset(), 1500.0);
        assert!(!part.voices.is_active());
        assert_eq!(part.voices.len(), 2);
        assert!(!part.end_voice_group());
    }

    #[test]
    fn test_voices_restart_from_part_in_new_group() {
        let mut part = piano();
        part.enter_voice(1);
        part.active_cursor_mut().current_offset = 400.0;
        part.end_voice_group();

        part.enter_voice(1);
        assert_eq!(part.active_cursor().current_offset, 400.0);
        part.active_cursor_mut().current_offset = 900.0;
        part.end_voice_group();
        assert_eq!(part.current_offset(), 900.0);
    }

    #[test]
    fn test_voice_mut_creates_lazily() {
        let mut part = piano();
        part.cursor.current_offset = 42.0;
        assert_eq!(part.voice_mut(3).cursor.current_offset, 42.0);
        assert_eq!(part.voices.len(), 1);
        assert!(!part.voices.is_active());
    }

    #[test]
    fn test_validate_attribute() {
        assert_eq!(AttributeKind::Tempo.validate(60.0).unwrap(), 60.0);
        assert!(AttributeKind::Tempo.validate(0.0).is_err());
        assert!(AttributeKind::Volume.validate(101.0).is_err());
        assert_eq!(AttributeKind::Quantization.validate(0.0).unwrap(), 0.0);
    }
}
