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

//! Turns score text into [`ScoreUpdate`]s.
//!
//! The accepted language is a compact subset of a text music notation:
//!
//! ```text
//! piano "left": (tempo 96) o4 c8 d e f | g2 c/e/g
//! riff = [c d e]*2
//! violin: V1: riff V2: > riff V0: r1 %coda
//! ```
//!
//! Each construct maps to one type in [`updates`](crate::model::updates), which documents the
//! syntax it is parsed from. `#` starts a comment that runs to the end of the line and `|` bar
//! lines are ignored.

use crate::model::{
    updates::{
        Accidental, AtMarker, AttributeChange, AttributeUpdate, Chord, EventSequence,
        MarkerDefinition, Note, PartDeclaration, Repeat, Rest, VariableDefinition,
        VariableReference, VoiceGroupEnd, VoiceMarker,
    },
    AttributeKind, NoteLength, ScoreUpdate, SourceContext, MAX_NESTING,
};
use scanner::{Spanned, Token};
use thiserror::Error;

mod scanner;

/// The largest count a `[ ... ]*N` repeat accepts.
pub const MAX_REPEAT_COUNT: u32 = 10_000;

/// A syntax error and where it happened.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{context}: {message}")]
pub struct ParseError {
    pub context: SourceContext,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Parses `text` into the updates it describes, in source order.
///
/// `source` names the text in [`SourceContext`]s, for example a file name or `"<input>"`.
pub fn parse(source: &str, text: &str) -> Result<Vec<Box<dyn ScoreUpdate>>> {
    let tokens = scanner::scan(source, text)?;
    let mut parser = Parser {
        source,
        tokens,
        position: 0,
        depth: 0,
    };
    parser.parse_until(Stop::End)
}

enum Stop {
    End,
    Newline,
    CloseSequence(SourceContext),
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    position: usize,
    // Sequences and variable definitions currently open.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.position).cloned();
        if spanned.is_some() {
            self.position += 1;
        }
        spanned
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|spanned| &spanned.token)
    }

    fn context(&self, spanned: &Spanned) -> SourceContext {
        SourceContext::new(self.source, spanned.line, spanned.column)
    }

    fn parse_nested(
        &mut self,
        context: &SourceContext,
        stop: Stop,
    ) -> Result<Vec<Box<dyn ScoreUpdate>>> {
        if self.depth >= MAX_NESTING {
            return Err(error(
                context.clone(),
                format!("nested more than {} levels deep", MAX_NESTING),
            ));
        }
        self.depth += 1;
        let updates = self.parse_until(stop);
        self.depth -= 1;
        updates
    }

    fn parse_until(&mut self, stop: Stop) -> Result<Vec<Box<dyn ScoreUpdate>>> {
        let mut updates = Vec::new();
        while let Some(spanned) = self.next() {
            let context = self.context(&spanned);
            let update: Box<dyn ScoreUpdate> = match spanned.token {
                Token::Newline => {
                    if let Stop::Newline = stop {
                        return Ok(updates);
                    }
                    continue;
                }
                Token::CloseSequence => {
                    if let Stop::CloseSequence(_) = stop {
                        return Ok(updates);
                    }
                    return Err(error(context, "unexpected ']'"));
                }
                Token::OpenSequence => self.sequence(context)?,
                Token::Word(word) => self.word(context, word)?,
                Token::Str { value, colon } => {
                    if !colon {
                        return Err(error(context, format!("expected ':' after \"{}\"", value)));
                    }
                    Box::new(PartDeclaration::new(context, vec![], Some(value)))
                }
                Token::Form(words) => Box::new(attribute_form(context, &words)?),
                Token::OctaveUp => Box::new(AttributeUpdate::new(
                    context,
                    AttributeChange::OctaveUp,
                    false,
                )),
                Token::OctaveDown => Box::new(AttributeUpdate::new(
                    context,
                    AttributeChange::OctaveDown,
                    false,
                )),
                Token::Equals => return Err(error(context, "unexpected '='")),
            };
            updates.push(update);
        }

        match stop {
            Stop::CloseSequence(context) => Err(error(context, "unterminated sequence")),
            _ => Ok(updates),
        }
    }

    fn sequence(&mut self, context: SourceContext) -> Result<Box<dyn ScoreUpdate>> {
        let updates = self.parse_nested(&context, Stop::CloseSequence(context.clone()))?;
        let sequence: Box<dyn ScoreUpdate> =
            Box::new(EventSequence::new(context.clone(), updates));

        let times = match self.peek() {
            Some(Token::Word(word)) if word.starts_with('*') => word[1..].parse::<u32>().ok(),
            _ => return Ok(sequence),
        };
        let spanned = self.next();
        match times {
            Some(times) if times <= MAX_REPEAT_COUNT => {
                Ok(Box::new(Repeat::new(context, sequence, times)))
            }
            Some(times) => {
                let context = spanned.map_or(context, |spanned| self.context(&spanned));
                Err(error(
                    context,
                    format!("repeat count {} is more than {}", times, MAX_REPEAT_COUNT),
                ))
            }
            None => {
                let context = spanned.map_or(context, |spanned| self.context(&spanned));
                Err(error(context, "expected a repeat count"))
            }
        }
    }

    fn word(&mut self, context: SourceContext, word: String) -> Result<Box<dyn ScoreUpdate>> {
        if self.peek() == Some(&Token::Equals) {
            if !is_identifier(&word) {
                return Err(error(context, format!("invalid variable name: {}", word)));
            }
            self.position += 1;
            let updates = self.parse_nested(&context, Stop::Newline)?;
            return Ok(Box::new(VariableDefinition::new(context, word, updates)));
        }

        if let Some(Token::Str { value, colon }) = self.peek().cloned() {
            if is_part_names(&word) {
                self.position += 1;
                if !colon {
                    return Err(error(context, format!("expected ':' after \"{}\"", value)));
                }
                let names = split_part_names(&word);
                return Ok(Box::new(PartDeclaration::new(context, names, Some(value))));
            }
        }

        if let Some(head) = word.strip_suffix(':') {
            if let Some(number) = head.strip_prefix('V').and_then(|n| n.parse::<u32>().ok()) {
                if number == 0 {
                    return Ok(Box::new(VoiceGroupEnd::new(context)));
                }
                return Ok(Box::new(VoiceMarker::new(context, number)));
            }
            if is_part_names(head) {
                let names = split_part_names(head);
                return Ok(Box::new(PartDeclaration::new(context, names, None)));
            }
            return Err(error(context, format!("invalid part declaration: {}", word)));
        }

        if let Some(name) = word.strip_prefix('%') {
            let name = marker_name(&context, name)?;
            return Ok(Box::new(MarkerDefinition::new(context, name)));
        }
        if let Some(name) = word.strip_prefix('@') {
            let name = marker_name(&context, name)?;
            return Ok(Box::new(AtMarker::new(context, name)));
        }

        if word.contains('/') {
            let members = word
                .split('/')
                .map(|member| {
                    event(&context, member)?
                        .ok_or_else(|| error(context.clone(), format!("invalid chord: {}", word)))
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Box::new(Chord::new(context, members)));
        }

        if let Some(octave) = word.strip_prefix('o').and_then(|n| n.parse::<i32>().ok()) {
            return Ok(Box::new(AttributeUpdate::new(
                context,
                AttributeChange::Octave(octave),
                false,
            )));
        }

        if let Some(update) = event(&context, &word)? {
            return Ok(update);
        }

        if is_identifier(&word) {
            return Ok(Box::new(VariableReference::new(context, word)));
        }
        Err(error(context, format!("unexpected '{}'", word)))
    }
}

fn error(context: SourceContext, message: impl Into<String>) -> ParseError {
    ParseError {
        context,
        message: message.into(),
    }
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && word.len() >= 2
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_part_names(word: &str) -> bool {
    word.split('/').all(is_identifier)
}

fn split_part_names(word: &str) -> Vec<String> {
    word.split('/').map(str::to_owned).collect()
}

fn marker_name<'w>(context: &SourceContext, name: &'w str) -> Result<&'w str> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(error(
            context.clone(),
            format!("invalid marker name: {}", name),
        ))
    }
}

// A note or a rest, or None when the word is neither.
fn event(context: &SourceContext, word: &str) -> Result<Option<Box<dyn ScoreUpdate>>> {
    let mut chars = word.chars();
    let letter = match chars.next() {
        Some(letter) => letter,
        None => return Ok(None),
    };
    let rest = chars.as_str();

    if letter == 'r' {
        return Ok(note_length(rest)
            .map(|length| Box::new(Rest::new(context.clone(), length)) as Box<dyn ScoreUpdate>));
    }
    if !('a'..='g').contains(&letter) {
        return Ok(None);
    }

    let accidentals = rest.chars().map_while(accidental).collect::<Vec<_>>();
    let length = &rest[accidentals.len()..];
    Ok(note_length(length).map(|length| {
        Box::new(Note::new(context.clone(), letter, accidentals, length)) as Box<dyn ScoreUpdate>
    }))
}

fn accidental(c: char) -> Option<Accidental> {
    match c {
        '+' => Some(Accidental::Sharp),
        '-' => Some(Accidental::Flat),
        '_' => Some(Accidental::Natural),
        _ => None,
    }
}

// Some(None) for an empty length, None when the text is not a length.
fn note_length(text: &str) -> Option<Option<NoteLength>> {
    if text.is_empty() {
        return Some(None);
    }
    if let Some(millis) = text.strip_suffix("ms") {
        return positive(millis).map(|ms| Some(NoteLength::Millis(ms)));
    }
    if let Some(seconds) = text.strip_suffix('s') {
        return positive(seconds).map(|s| Some(NoteLength::Millis(s * 1000.0)));
    }

    let denominator = text.trim_end_matches('.');
    let dots = text.len() - denominator.len();
    let denominator = positive(denominator)?;
    let beats = 4.0 / denominator * (2.0 - 0.5f64.powi(dots as i32));
    Some(Some(NoteLength::Beats(beats)))
}

fn positive(text: &str) -> Option<f64> {
    if !text.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    text.parse::<f64>().ok().filter(|n| *n > 0.0)
}

fn attribute_form(context: SourceContext, words: &[String]) -> Result<AttributeUpdate> {
    let name = match words.first() {
        Some(name) => name.as_str(),
        None => return Err(error(context, "empty attribute")),
    };
    let (name, global) = match name.strip_suffix('!') {
        Some(name) => (name, true),
        None => (name, false),
    };
    let value = match words {
        [_, value] => value,
        _ => return Err(error(context, format!("{} takes exactly one value", name))),
    };

    let kind = match name {
        "tempo" => AttributeKind::Tempo,
        "volume" | "vol" => AttributeKind::Volume,
        "quant" | "quantize" | "quantization" => AttributeKind::Quantization,
        "octave" if !global => {
            let octave = value
                .parse::<i32>()
                .map_err(|_| error(context.clone(), format!("invalid octave: {}", value)))?;
            return Ok(AttributeUpdate::new(
                context,
                AttributeChange::Octave(octave),
                false,
            ));
        }
        _ => return Err(error(context, format!("unrecognized attribute: {}", words[0]))),
    };
    let value = value
        .parse::<f64>()
        .map_err(|_| error(context.clone(), format!("invalid {} value: {}", name, value)))?;
    Ok(AttributeUpdate::new(
        context,
        AttributeChange::Set(kind, value),
        global,
    ))
}
