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

//! The incremental score model.
//!
//! A [`Score`] is the mutable aggregate of everything a session has evaluated so far: its
//! [parts](Part), their [voices](Voice), markers, variables, score-wide attributes, and the
//! append-only log of [`NoteEvent`] values that will eventually be sent to a player.
//!
//! Scores are only ever changed by applying [`ScoreUpdate`] values to them, usually produced by
//! [`parser::parse`](crate::parser::parse). The concrete update types live in the [`updates`]
//! module.
//!
//! ```
//! use cantus::{model::Score, parser::parse};
//!
//! let mut score = Score::new();
//! let updates = parse("example", "piano: c d e f").unwrap();
//! score.apply_updates(&updates).unwrap();
//!
//! assert_eq!(score.events.len(), 4);
//! ```
//!
//! # Partial application
//!
//! [`Score::apply_updates`] stops at the first update that fails and does not undo the updates
//! that were applied before it. The score is still consistent afterwards, it just contains less
//! than was asked for.

use serde::Serialize;
use std::{collections::HashMap, fmt};
use thiserror::Error;

mod instruments;
mod offsets;
mod part;
pub mod updates;

pub use instruments::{midi_patch, stock_instruments};
pub use part::{
    AttributeKind, Cursor, NoteLength, Part, PartOrigin, Voice, VoiceGroup, OCTAVE_RANGE,
};

/// How deeply sequences can nest, in parsed text and in variable values.
pub const MAX_NESTING: usize = 64;

/// The most updates a variable can hold once the variables it refers to are expanded.
pub const MAX_VARIABLE_UPDATES: usize = 100_000;

/// The most note events a score can hold.
pub const MAX_EVENTS: usize = 1_000_000;

/// The most updates, counting nested ones and repetitions, that one top-level update may apply.
pub const MAX_STEPS: u64 = 10_000_000;

/// A specialized [`Result`] type for score operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned when an update cannot be applied to a score.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unrecognized instrument: {0}")]
    UnrecognizedInstrument(String),
    #[error("undefined alias: {0}")]
    UndefinedAlias(String),
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("undefined marker: {0}")]
    UndefinedMarker(String),
    #[error("no part has been declared yet")]
    NoCurrentParts,
    #[error("invalid {attribute} value: {value}")]
    InvalidAttribute {
        attribute: &'static str,
        value: f64,
    },
    #[error("nested more than {0} levels deep")]
    TooDeep(usize),
    #[error("variable {name} would hold more than {limit} updates")]
    VariableTooLarge { name: String, limit: usize },
    #[error("score has reached the limit of {0} events")]
    TooManyEvents(usize),
    #[error("update applies more than {0} steps")]
    TooManySteps(u64),
    #[error("{context}: {source}")]
    Update {
        context: SourceContext,
        #[source]
        source: Box<Error>,
    },
}

/// The location in source text that an update was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceContext {
    pub source: String,
    pub line: usize,
    pub column: usize,
}

impl SourceContext {
    pub fn new(source: impl Into<String>, line: usize, column: usize) -> SourceContext {
        SourceContext {
            source: source.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.column)
    }
}

/// One atomic change to a [`Score`].
///
/// Updates are applied with [`Score::apply_updates`]. Applying an update is the only way a score
/// changes, and nothing stops the same update from being applied twice, so callers must keep
/// track of which updates they have already applied.
pub trait ScoreUpdate: CloneUpdate + fmt::Debug + Send {
    /// Applies this update to the score.
    fn update_score(&self, score: &mut Score) -> Result<()>;

    /// The number of milliseconds this update advances the given part by.
    fn duration_ms(&self, _part: &Part) -> f64 {
        0.0
    }

    /// Resolves this update for storage in a variable.
    ///
    /// Variable references inside a variable definition are expanded when the definition is
    /// applied, so redefining a variable later does not change the ones defined in terms of it.
    fn variable_value(&self, _score: &Score) -> Result<Box<dyn ScoreUpdate>> {
        Ok(self.clone_update())
    }

    /// How many levels of updates this one contains once variable references are expanded,
    /// counting itself.
    fn nesting_depth(&self, _score: &Score) -> usize {
        1
    }

    /// How many updates this one contains once variable references are expanded, counting
    /// itself. Repetitions are counted once. Counting may stop early once the total passes
    /// [`MAX_VARIABLE_UPDATES`].
    fn update_count(&self, _score: &Score) -> usize {
        1
    }

    /// Where in the source text this update came from.
    fn source_context(&self) -> &SourceContext;

    /// A JSON representation of this update, used to show clients what was parsed.
    fn to_json(&self) -> serde_json::Value;
}

#[doc(hidden)]
pub trait CloneUpdate {
    fn clone_update(&self) -> Box<dyn ScoreUpdate>;
}

impl<T> CloneUpdate for T
where
    T: ScoreUpdate + Clone + 'static,
{
    fn clone_update(&self) -> Box<dyn ScoreUpdate> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn ScoreUpdate> {
    fn clone(&self) -> Box<dyn ScoreUpdate> {
        self.clone_update()
    }
}

/// A note that a part plays.
///
/// Note events are appended to [`Score::events`] as notes are applied and are never modified
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteEvent {
    /// The part that plays the note.
    pub part: PartOrigin,
    /// The voice of the part playing the note, if a voice group is active.
    pub voice: Option<u32>,
    /// Milliseconds from the start of the score.
    pub offset: f64,
    /// Milliseconds until the next note of the same voice.
    pub duration: f64,
    /// Milliseconds the note actually sounds for, after quantization.
    pub audible_duration: f64,
    pub midi_note: i32,
    /// Between 0.0 and 1.0.
    pub volume: f64,
    pub midi_patch: u8,
}

/// Attribute values that apply to every part that has not set its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalAttributes {
    pub tempo: Option<f64>,
    pub volume: Option<f64>,
    pub quantization: Option<f64>,
}

impl GlobalAttributes {
    pub fn get(&self, kind: AttributeKind) -> Option<f64> {
        match kind {
            AttributeKind::Tempo => self.tempo,
            AttributeKind::Volume => self.volume,
            AttributeKind::Quantization => self.quantization,
        }
    }

    fn set(&mut self, kind: AttributeKind, value: f64) {
        let slot = match kind {
            AttributeKind::Tempo => &mut self.tempo,
            AttributeKind::Volume => &mut self.volume,
            AttributeKind::Quantization => &mut self.quantization,
        };
        *slot = Some(value);
    }
}

/// The root of a session's musical state.
///
/// See [the module level documentation](self) for more.
#[derive(Debug, Clone, Default)]
pub struct Score {
    /// Every part in the order it was first declared.
    pub parts: Vec<Part>,
    /// The parts that subsequent updates apply to.
    pub current_parts: Vec<PartOrigin>,
    pub aliases: HashMap<String, Vec<PartOrigin>>,
    /// Marker names and their offsets in milliseconds.
    pub markers: HashMap<String, f64>,
    pub variables: HashMap<String, Vec<Box<dyn ScoreUpdate>>>,
    pub global_attributes: GlobalAttributes,
    /// Every note event produced so far. Only ever appended to.
    pub events: Vec<NoteEvent>,

    // Bumped whenever a voice enters or leaves the active set of a part. Compared against
    // `observed_voice_change` by `part_offsets`.
    voice_change: u64,
    observed_voice_change: u64,
    next_origin: u32,

    // Nesting of `apply_update` calls, and the steps taken by the outermost one.
    applying: usize,
    steps: u64,
}

impl Score {
    /// Creates an empty score.
    pub fn new() -> Score {
        Score::default()
    }

    /// Creates a part for the named instrument.
    ///
    /// The part is given a new origin and the current global attributes, but it is not added
    /// to the score.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnrecognizedInstrument`] if `name` is not a stock instrument.
    pub fn new_part(&mut self, name: &str) -> Result<Part> {
        let patch =
            midi_patch(name).ok_or_else(|| Error::UnrecognizedInstrument(name.to_owned()))?;
        self.next_origin += 1;
        Ok(Part::new(
            name,
            PartOrigin(self.next_origin),
            patch,
            &self.global_attributes,
        ))
    }

    /// Applies each update in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Update`] wrapping the cause and the location of the update that failed.
    /// Updates before it remain applied.
    pub fn apply_updates(&mut self, updates: &[Box<dyn ScoreUpdate>]) -> Result<()> {
        for update in updates {
            self.apply_update(update.as_ref())?;
        }
        Ok(())
    }

    /// Applies a single update, attaching its source location to any error.
    ///
    /// # Errors
    ///
    /// Besides the update's own errors, returns [`Error::TooManySteps`] once the outermost
    /// update has applied [`MAX_STEPS`] updates.
    pub fn apply_update(&mut self, update: &dyn ScoreUpdate) -> Result<()> {
        if self.applying == 0 {
            self.steps = 0;
        }
        self.steps += 1;
        let result = if self.steps > MAX_STEPS {
            Err(Error::TooManySteps(MAX_STEPS))
        } else {
            self.applying += 1;
            let result = update.update_score(self);
            self.applying -= 1;
            result
        };
        result.map_err(|err| match err {
            // Keep the innermost location, e.g. the note inside a variable.
            Error::Update { .. } => err,
            err => Error::Update {
                context: update.source_context().clone(),
                source: Box::new(err),
            },
        })
    }

    pub fn part(&self, origin: PartOrigin) -> Option<&Part> {
        self.parts.iter().find(|part| part.origin == origin)
    }

    pub fn part_mut(&mut self, origin: PartOrigin) -> Option<&mut Part> {
        self.parts.iter_mut().find(|part| part.origin == origin)
    }

    /// Calls `f` with each current part and the event log.
    pub(crate) fn with_current_parts<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Part, &mut Vec<NoteEvent>) -> Result<()>,
    {
        if self.current_parts.is_empty() {
            return Err(Error::NoCurrentParts);
        }
        let Score {
            parts,
            current_parts,
            events,
            ..
        } = self;
        for part in parts
            .iter_mut()
            .filter(|part| current_parts.contains(&part.origin))
        {
            f(part, events)?;
        }
        Ok(())
    }

    pub(crate) fn set_global_attribute(&mut self, kind: AttributeKind, value: f64) {
        self.global_attributes.set(kind, value);
        for part in self.parts.iter_mut() {
            part.inherit_attribute(kind, value);
        }
    }

    pub(crate) fn note_voice_change(&mut self) {
        self.voice_change += 1;
    }

    /// A JSON summary of the score's state, without its events.
    pub fn to_json(&self) -> serde_json::Value {
        let variables = self
            .variables
            .iter()
            .map(|(name, updates)| {
                let updates = updates.iter().map(|u| u.to_json()).collect::<Vec<_>>();
                (name.clone(), serde_json::Value::Array(updates))
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::json!({
            "parts": self.parts,
            "current-parts": self.current_parts,
            "aliases": self.aliases,
            "markers": self.markers,
            "variables": variables,
            "global-attributes": self.global_attributes,
            "event-count": self.events.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone)]
    struct StubUpdate {
        context: SourceContext,
        fail: bool,
    }

    impl StubUpdate {
        fn ok() -> StubUpdate {
            StubUpdate {
                context: SourceContext::new("stub", 1, 1),
                fail: false,
            }
        }

        fn failing() -> StubUpdate {
            StubUpdate {
                context: SourceContext::new("stub", 2, 7),
                fail: true,
            }
        }
    }

    impl ScoreUpdate for StubUpdate {
        fn update_score(&self, score: &mut Score) -> Result<()> {
            if self.fail {
                return Err(Error::UndefinedVariable("bad update".to_owned()));
            }
            score.markers.insert("stub".to_owned(), 1.0);
            Ok(())
        }

        fn source_context(&self) -> &SourceContext {
            &self.context
        }

        fn to_json(&self) -> serde_json::Value {
            serde_json::json!("stub")
        }
    }

    #[test]
    fn test_new_score_is_empty() {
        let score = Score::new();
        assert!(score.parts.is_empty());
        assert!(score.current_parts.is_empty());
        assert!(score.aliases.is_empty());
        assert!(score.markers.is_empty());
        assert!(score.variables.is_empty());
        assert!(score.events.is_empty());
        assert_eq!(score.global_attributes, GlobalAttributes::default());
    }

    #[test]
    fn test_apply_updates_success() {
        let mut score = Score::new();
        score
            .apply_updates(&[Box::new(StubUpdate::ok()) as Box<dyn ScoreUpdate>])
            .unwrap();
        assert_eq!(score.markers.get("stub"), Some(&1.0));
    }

    #[test]
    fn test_apply_updates_failure_is_partial() {
        let mut score = Score::new();
        let updates = vec![
            Box::new(StubUpdate::ok()) as Box<dyn ScoreUpdate>,
            Box::new(StubUpdate::failing()),
        ];

        let err = score.apply_updates(&updates).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("bad update"), "got: {}", message);
        assert!(message.starts_with("stub:2:7"), "got: {}", message);
        assert_eq!(score.markers.get("stub"), Some(&1.0));
    }

    #[test]
    fn test_new_part_assigns_distinct_origins() {
        let mut score = Score::new();
        let first = score.new_part("piano").unwrap();
        let second = score.new_part("piano").unwrap();
        assert_ne!(first.origin, second.origin);
        assert!(score.parts.is_empty());
    }

    #[test]
    fn test_new_part_unknown_instrument() {
        let mut score = Score::new();
        let err = score.new_part("kazoo-of-doom").unwrap_err();
        assert_eq!(err.to_string(), "unrecognized instrument: kazoo-of-doom");
    }

    #[test]
    fn test_with_current_parts_requires_a_part() {
        let mut score = Score::new();
        let result = score.with_current_parts(|_, _| Ok(()));
        assert!(matches!(result, Err(Error::NoCurrentParts)));
    }

    #[test]
    fn test_global_attribute_respects_overrides() {
        let mut score = Score::new();
        let mut piano = score.new_part("piano").unwrap();
        piano.set_attribute(AttributeKind::Tempo, 90.0);
        let violin = score.new_part("violin").unwrap();
        score.parts = vec![piano, violin];

        score.set_global_attribute(AttributeKind::Tempo, 150.0);

        assert_eq!(score.parts[0].tempo, 90.0);
        assert_eq!(score.parts[1].tempo, 150.0);
        let cello = score.new_part("cello").unwrap();
        assert_eq!(cello.tempo, 150.0);
    }
}
