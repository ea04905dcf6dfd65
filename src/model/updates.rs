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

//! The concrete [`ScoreUpdate`] types.
//!
//! Every construct of the notation language becomes one of these types when parsed. Each type
//! documents the syntax it is parsed from.

use super::{
    midi_patch, AttributeKind, Error, NoteEvent, NoteLength, Part, PartOrigin, Result, Score,
    ScoreUpdate, SourceContext, MAX_EVENTS, MAX_NESTING, MAX_VARIABLE_UPDATES,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

fn tagged(kind: &str, value: impl Serialize) -> Value {
    json!({ "type": kind, "value": value })
}

fn updates_json(updates: &[Box<dyn ScoreUpdate>]) -> Vec<Value> {
    updates.iter().map(|update| update.to_json()).collect()
}

fn count_all(updates: &[Box<dyn ScoreUpdate>], score: &Score) -> usize {
    let mut total = 0_usize;
    for update in updates {
        total = total.saturating_add(update.update_count(score));
        if total > MAX_VARIABLE_UPDATES {
            break;
        }
    }
    total
}

fn max_depth(updates: &[Box<dyn ScoreUpdate>], score: &Score) -> usize {
    updates
        .iter()
        .map(|update| update.nesting_depth(score))
        .max()
        .unwrap_or(0)
}

fn resolve_all(
    updates: &[Box<dyn ScoreUpdate>],
    score: &Score,
) -> Result<Vec<Box<dyn ScoreUpdate>>> {
    updates
        .iter()
        .map(|update| update.variable_value(score))
        .collect()
}

/// Selects the parts that following updates apply to, creating them if needed.
///
/// Parsed from `piano:`, `violin/viola:`, `piano "left":` and `"left":`.
///
/// An instrument name selects the first part already playing that instrument, or creates one.
/// Giving an alias always creates new parts and names the group, unless the alias is already
/// defined, in which case the aliased parts are selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartDeclaration {
    pub context: SourceContext,
    pub names: Vec<String>,
    pub alias: Option<String>,
}

impl PartDeclaration {
    pub fn new(context: SourceContext, names: Vec<String>, alias: Option<String>) -> Self {
        PartDeclaration {
            context,
            names,
            alias,
        }
    }

    fn create_parts(&self, score: &mut Score) -> Result<Vec<PartOrigin>> {
        let mut origins = Vec::with_capacity(self.names.len());
        for name in self.names.iter() {
            let part = score.new_part(name)?;
            origins.push(part.origin);
            score.parts.push(part);
        }
        Ok(origins)
    }

    fn resolve(&self, score: &mut Score) -> Result<Vec<PartOrigin>> {
        if let Some(alias) = &self.alias {
            if let Some(origins) = score.aliases.get(alias) {
                return Ok(origins.clone());
            }
            if self.names.is_empty() {
                return Err(Error::UndefinedAlias(alias.clone()));
            }
            self.check_instruments(score)?;
            let origins = self.create_parts(score)?;
            score.aliases.insert(alias.clone(), origins.clone());
            return Ok(origins);
        }

        self.check_instruments(score)?;
        let mut origins = Vec::new();
        for name in self.names.iter() {
            if let Some(aliased) = score.aliases.get(name) {
                origins.extend(aliased.iter().copied());
            } else if let Some(part) = score.parts.iter().find(|part| &part.name == name) {
                origins.push(part.origin);
            } else {
                let part = score.new_part(name)?;
                origins.push(part.origin);
                score.parts.push(part);
            }
        }
        Ok(origins)
    }

    // Fails before any part is created so a bad name leaves the score untouched.
    fn check_instruments(&self, score: &Score) -> Result<()> {
        for name in self.names.iter() {
            if !score.aliases.contains_key(name) && midi_patch(name).is_none() {
                return Err(Error::UnrecognizedInstrument(name.clone()));
            }
        }
        Ok(())
    }
}

impl ScoreUpdate for PartDeclaration {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        let origins = self.resolve(score)?;
        score.current_parts = origins;
        Ok(())
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("part-declaration", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Accidental {
    Sharp,
    Flat,
    Natural,
}

impl Accidental {
    fn semitones(self) -> i32 {
        match self {
            Accidental::Sharp => 1,
            Accidental::Flat => -1,
            Accidental::Natural => 0,
        }
    }
}

/// A note played by every current part.
///
/// Parsed from a letter `a` to `g`, optional accidentals (`+`, `-`, `_`) and an optional
/// length: `c`, `f+8`, `b-2.`, `e500ms`. A length given on a note becomes the default for
/// following notes of the same part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub context: SourceContext,
    pub letter: char,
    pub accidentals: Vec<Accidental>,
    pub length: Option<NoteLength>,
}

impl Note {
    pub fn new(
        context: SourceContext,
        letter: char,
        accidentals: Vec<Accidental>,
        length: Option<NoteLength>,
    ) -> Self {
        Note {
            context,
            letter,
            accidentals,
            length,
        }
    }

    /// The MIDI note number of this note in the given octave. Octave 4 contains middle C.
    pub fn midi_note(&self, octave: i32) -> i32 {
        let pitch_class = match self.letter {
            'c' => 0,
            'd' => 2,
            'e' => 4,
            'f' => 5,
            'g' => 7,
            'a' => 9,
            _ => 11,
        };
        let accidentals = self
            .accidentals
            .iter()
            .fold(0_i32, |sum, a| sum.saturating_add(a.semitones()));
        octave
            .saturating_add(1)
            .saturating_mul(12)
            .saturating_add(pitch_class)
            .saturating_add(accidentals)
    }
}

impl ScoreUpdate for Note {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        score.with_current_parts(|part, events| {
            if events.len() >= MAX_EVENTS {
                return Err(Error::TooManyEvents(MAX_EVENTS));
            }
            let duration = self.duration_ms(part);
            let voice = part.voices.current();
            let event = NoteEvent {
                part: part.origin,
                voice,
                offset: part.active_cursor().current_offset,
                duration,
                audible_duration: duration * part.quantization / 100.0,
                midi_note: self.midi_note(part.active_cursor().octave),
                volume: part.volume / 100.0,
                midi_patch: part.patch,
            };
            let cursor = part.active_cursor_mut();
            if let Some(length) = self.length {
                cursor.length = length;
            }
            cursor.last_offset = cursor.current_offset;
            cursor.current_offset += duration;
            events.push(event);
            Ok(())
        })
    }

    fn duration_ms(&self, part: &Part) -> f64 {
        self.length
            .unwrap_or(part.active_cursor().length)
            .millis(part.tempo)
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("note", self)
    }
}

/// Silence. Parsed from `r` with an optional length: `r`, `r2`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rest {
    pub context: SourceContext,
    pub length: Option<NoteLength>,
}

impl Rest {
    pub fn new(context: SourceContext, length: Option<NoteLength>) -> Self {
        Rest { context, length }
    }
}

impl ScoreUpdate for Rest {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        score.with_current_parts(|part, _| {
            let duration = self.duration_ms(part);
            let cursor = part.active_cursor_mut();
            if let Some(length) = self.length {
                cursor.length = length;
            }
            cursor.last_offset = cursor.current_offset;
            cursor.current_offset += duration;
            Ok(())
        })
    }

    fn duration_ms(&self, part: &Part) -> f64 {
        self.length
            .unwrap_or(part.active_cursor().length)
            .millis(part.tempo)
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("rest", self)
    }
}

/// Notes that start together. Parsed from notes and rests joined by `/`: `c/e/g`.
///
/// Each part moves forward by its shortest member.
#[derive(Debug, Clone)]
pub struct Chord {
    pub context: SourceContext,
    pub members: Vec<Box<dyn ScoreUpdate>>,
}

impl Chord {
    pub fn new(context: SourceContext, members: Vec<Box<dyn ScoreUpdate>>) -> Self {
        Chord { context, members }
    }
}

impl ScoreUpdate for Chord {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        let mut starts = Vec::new();
        score.with_current_parts(|part, _| {
            starts.push((part.origin, part.active_cursor().current_offset));
            Ok(())
        })?;

        let mut ends: HashMap<PartOrigin, f64> = HashMap::new();
        for member in self.members.iter() {
            for (origin, start) in starts.iter() {
                if let Some(part) = score.part_mut(*origin) {
                    part.active_cursor_mut().current_offset = *start;
                }
            }
            score.apply_update(member.as_ref())?;
            for (origin, _) in starts.iter() {
                if let Some(part) = score.part(*origin) {
                    let end = part.active_cursor().current_offset;
                    ends.entry(*origin)
                        .and_modify(|shortest| *shortest = shortest.min(end))
                        .or_insert(end);
                }
            }
        }

        for (origin, start) in starts {
            if let Some(part) = score.part_mut(origin) {
                let cursor = part.active_cursor_mut();
                cursor.last_offset = start;
                cursor.current_offset = ends.get(&origin).copied().unwrap_or(start);
            }
        }
        Ok(())
    }

    fn duration_ms(&self, part: &Part) -> f64 {
        self.members
            .iter()
            .map(|member| member.duration_ms(part))
            .fold(None, |min: Option<f64>, d| Some(min.map_or(d, |min| min.min(d))))
            .unwrap_or(0.0)
    }

    fn nesting_depth(&self, score: &Score) -> usize {
        1 + max_depth(&self.members, score)
    }

    fn update_count(&self, score: &Score) -> usize {
        count_all(&self.members, score).saturating_add(1)
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged(
            "chord",
            json!({ "context": self.context, "members": updates_json(&self.members) }),
        )
    }
}

/// A change to an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeChange {
    Set(AttributeKind, f64),
    Octave(i32),
    OctaveUp,
    OctaveDown,
}

/// Changes an attribute of the current parts, or of the whole score.
///
/// Parsed from `(tempo 90)`, `(volume 50)`, `(quant 80)`, `(octave 3)`, `o3`, `>` and `<`.
/// Tempo, volume and quantization can be set for every part that has not set its own by
/// suffixing the name with `!`: `(tempo! 90)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeUpdate {
    pub context: SourceContext,
    pub change: AttributeChange,
    pub global: bool,
}

impl AttributeUpdate {
    pub fn new(context: SourceContext, change: AttributeChange, global: bool) -> Self {
        AttributeUpdate {
            context,
            change,
            global,
        }
    }
}

impl ScoreUpdate for AttributeUpdate {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        match self.change {
            AttributeChange::Set(kind, value) => {
                let value = kind.validate(value)?;
                if self.global {
                    score.set_global_attribute(kind, value);
                    Ok(())
                } else {
                    score.with_current_parts(|part, _| {
                        part.set_attribute(kind, value);
                        Ok(())
                    })
                }
            }
            AttributeChange::Octave(octave) => score.with_current_parts(|part, _| {
                part.active_cursor_mut().set_octave(i64::from(octave))
            }),
            AttributeChange::OctaveUp => score.with_current_parts(|part, _| {
                let cursor = part.active_cursor_mut();
                cursor.set_octave(i64::from(cursor.octave) + 1)
            }),
            AttributeChange::OctaveDown => score.with_current_parts(|part, _| {
                let cursor = part.active_cursor_mut();
                cursor.set_octave(i64::from(cursor.octave) - 1)
            }),
        }
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("attribute-update", self)
    }
}

/// Switches the current parts to a voice. Parsed from `V1:`, `V2:`, ...
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceMarker {
    pub context: SourceContext,
    pub number: u32,
}

impl VoiceMarker {
    pub fn new(context: SourceContext, number: u32) -> Self {
        VoiceMarker { context, number }
    }
}

impl ScoreUpdate for VoiceMarker {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        let mut changed = false;
        score.with_current_parts(|part, _| {
            changed |= part.enter_voice(self.number);
            Ok(())
        })?;
        if changed {
            score.note_voice_change();
        }
        Ok(())
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("voice-marker", self)
    }
}

/// Ends the voice group of the current parts. Parsed from `V0:`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceGroupEnd {
    pub context: SourceContext,
}

impl VoiceGroupEnd {
    pub fn new(context: SourceContext) -> Self {
        VoiceGroupEnd { context }
    }
}

impl ScoreUpdate for VoiceGroupEnd {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        let mut changed = false;
        score.with_current_parts(|part, _| {
            changed |= part.end_voice_group();
            Ok(())
        })?;
        if changed {
            score.note_voice_change();
        }
        Ok(())
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("voice-group-end", self)
    }
}

/// Names the current position of the first current part. Parsed from `%name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerDefinition {
    pub context: SourceContext,
    pub name: String,
}

impl MarkerDefinition {
    pub fn new(context: SourceContext, name: impl Into<String>) -> Self {
        MarkerDefinition {
            context,
            name: name.into(),
        }
    }
}

impl ScoreUpdate for MarkerDefinition {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        let offset = score
            .current_parts
            .first()
            .and_then(|origin| score.part(*origin))
            .map(|part| part.active_cursor().current_offset)
            .ok_or(Error::NoCurrentParts)?;
        score.markers.insert(self.name.clone(), offset);
        Ok(())
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("marker", self)
    }
}

/// Moves the current parts to a marker. Parsed from `@name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtMarker {
    pub context: SourceContext,
    pub name: String,
}

impl AtMarker {
    pub fn new(context: SourceContext, name: impl Into<String>) -> Self {
        AtMarker {
            context,
            name: name.into(),
        }
    }
}

impl ScoreUpdate for AtMarker {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        let offset = *score
            .markers
            .get(&self.name)
            .ok_or_else(|| Error::UndefinedMarker(self.name.clone()))?;
        score.with_current_parts(|part, _| {
            part.active_cursor_mut().jump_to(offset);
            Ok(())
        })
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("at-marker", self)
    }
}

/// Stores updates under a name. Parsed from `name = ...` up to the end of the line.
#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub context: SourceContext,
    pub name: String,
    pub updates: Vec<Box<dyn ScoreUpdate>>,
}

impl VariableDefinition {
    pub fn new(
        context: SourceContext,
        name: impl Into<String>,
        updates: Vec<Box<dyn ScoreUpdate>>,
    ) -> Self {
        VariableDefinition {
            context,
            name: name.into(),
            updates,
        }
    }
}

impl ScoreUpdate for VariableDefinition {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        if count_all(&self.updates, score) > MAX_VARIABLE_UPDATES {
            return Err(Error::VariableTooLarge {
                name: self.name.clone(),
                limit: MAX_VARIABLE_UPDATES,
            });
        }
        if max_depth(&self.updates, score) > MAX_NESTING {
            return Err(Error::TooDeep(MAX_NESTING));
        }
        let value = resolve_all(&self.updates, score)?;
        score.variables.insert(self.name.clone(), value);
        Ok(())
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged(
            "variable-definition",
            json!({
                "context": self.context,
                "name": self.name,
                "events": updates_json(&self.updates),
            }),
        )
    }
}

/// Applies the updates stored under a name. Parsed from any other bare word.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableReference {
    pub context: SourceContext,
    pub name: String,
}

impl VariableReference {
    pub fn new(context: SourceContext, name: impl Into<String>) -> Self {
        VariableReference {
            context,
            name: name.into(),
        }
    }

    fn lookup(&self, score: &Score) -> Result<Vec<Box<dyn ScoreUpdate>>> {
        score
            .variables
            .get(&self.name)
            .cloned()
            .ok_or_else(|| Error::UndefinedVariable(self.name.clone()))
    }
}

impl ScoreUpdate for VariableReference {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        let updates = self.lookup(score)?;
        score.apply_updates(&updates)
    }

    fn variable_value(&self, score: &Score) -> Result<Box<dyn ScoreUpdate>> {
        let updates = self.lookup(score)?;
        Ok(Box::new(EventSequence::new(self.context.clone(), updates)))
    }

    fn nesting_depth(&self, score: &Score) -> usize {
        score
            .variables
            .get(&self.name)
            .map_or(1, |updates| 1 + max_depth(updates, score))
    }

    fn update_count(&self, score: &Score) -> usize {
        score
            .variables
            .get(&self.name)
            .map_or(1, |updates| count_all(updates, score).saturating_add(1))
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged("variable-reference", self)
    }
}

/// Updates applied in order. Parsed from `[ ... ]`.
#[derive(Debug, Clone)]
pub struct EventSequence {
    pub context: SourceContext,
    pub updates: Vec<Box<dyn ScoreUpdate>>,
}

impl EventSequence {
    pub fn new(context: SourceContext, updates: Vec<Box<dyn ScoreUpdate>>) -> Self {
        EventSequence { context, updates }
    }
}

impl ScoreUpdate for EventSequence {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        score.apply_updates(&self.updates)
    }

    fn duration_ms(&self, part: &Part) -> f64 {
        self.updates.iter().map(|u| u.duration_ms(part)).sum()
    }

    fn variable_value(&self, score: &Score) -> Result<Box<dyn ScoreUpdate>> {
        let updates = resolve_all(&self.updates, score)?;
        Ok(Box::new(EventSequence::new(self.context.clone(), updates)))
    }

    fn nesting_depth(&self, score: &Score) -> usize {
        1 + max_depth(&self.updates, score)
    }

    fn update_count(&self, score: &Score) -> usize {
        count_all(&self.updates, score).saturating_add(1)
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged(
            "event-sequence",
            json!({ "context": self.context, "events": updates_json(&self.updates) }),
        )
    }
}

/// An update applied several times. Parsed from `[ ... ]*N`.
#[derive(Debug, Clone)]
pub struct Repeat {
    pub context: SourceContext,
    pub update: Box<dyn ScoreUpdate>,
    pub times: u32,
}

impl Repeat {
    pub fn new(context: SourceContext, update: Box<dyn ScoreUpdate>, times: u32) -> Self {
        Repeat {
            context,
            update,
            times,
        }
    }
}

impl ScoreUpdate for Repeat {
    fn update_score(&self, score: &mut Score) -> Result<()> {
        for _ in 0..self.times {
            score.apply_update(self.update.as_ref())?;
        }
        Ok(())
    }

    fn duration_ms(&self, part: &Part) -> f64 {
        self.update.duration_ms(part) * f64::from(self.times)
    }

    fn variable_value(&self, score: &Score) -> Result<Box<dyn ScoreUpdate>> {
        let update = self.update.variable_value(score)?;
        Ok(Box::new(Repeat::new(self.context.clone(), update, self.times)))
    }

    fn nesting_depth(&self, score: &Score) -> usize {
        1 + self.update.nesting_depth(score)
    }

    fn update_count(&self, score: &Score) -> usize {
        self.update.update_count(score).saturating_add(1)
    }

    fn source_context(&self) -> &SourceContext {
        &self.context
    }

    fn to_json(&self) -> Value {
        tagged(
            "repeat",
            json!({
                "context": self.context,
                "event": self.update.to_json(),
                "times": self.times,
            }),
        )
    }
}
