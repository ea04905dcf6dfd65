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

use super::{ParseError, Result};
use crate::model::SourceContext;
use std::{iter::Peekable, str::Chars};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    Str { value: String, colon: bool },
    Form(Vec<String>),
    OctaveUp,
    OctaveDown,
    Equals,
    OpenSequence,
    CloseSequence,
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

pub fn scan(source: &str, text: &str) -> Result<Vec<Spanned>> {
    let mut scanner = Scanner {
        source,
        chars: text.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();
    while let Some(token) = scanner.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

fn ends_word(c: char) -> bool {
    c.is_whitespace() || "\"()[]|#<>=".contains(c)
}

struct Scanner<'a> {
    source: &'a str,
    chars: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            context: SourceContext::new(self.source, line, column),
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Option<Spanned>> {
        loop {
            let (line, column) = (self.line, self.column);
            let c = match self.chars.peek() {
                Some(c) => *c,
                None => return Ok(None),
            };
            let token = match c {
                '\n' => {
                    self.bump();
                    Token::Newline
                }
                '#' => {
                    while self.chars.peek().map_or(false, |c| *c != '\n') {
                        self.bump();
                    }
                    continue;
                }
                '|' => {
                    self.bump();
                    continue;
                }
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                '"' => self.string(line, column)?,
                '(' => self.form(line, column)?,
                ')' => return Err(self.error(line, column, "unexpected ')'")),
                '[' => {
                    self.bump();
                    Token::OpenSequence
                }
                ']' => {
                    self.bump();
                    Token::CloseSequence
                }
                '>' => {
                    self.bump();
                    Token::OctaveUp
                }
                '<' => {
                    self.bump();
                    Token::OctaveDown
                }
                '=' => {
                    self.bump();
                    Token::Equals
                }
                _ => Token::Word(self.word()),
            };
            return Ok(Some(Spanned {
                token,
                line,
                column,
            }));
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if ends_word(c) {
                break;
            }
            word.push(c);
            self.bump();
        }
        word
    }

    fn string(&mut self, line: usize, column: usize) -> Result<Token> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some(c) => value.push(c),
                None => return Err(self.error(line, column, "unterminated string")),
            }
        }
        let colon = self.chars.peek() == Some(&':');
        if colon {
            self.bump();
        }
        Ok(Token::Str { value, colon })
    }

    fn form(&mut self, line: usize, column: usize) -> Result<Token> {
        self.bump();
        let mut contents = String::new();
        loop {
            match self.bump() {
                Some(')') => break,
                Some('(') => return Err(self.error(line, column, "nested forms are not supported")),
                Some(c) => contents.push(c),
                None => return Err(self.error(line, column, "unterminated form")),
            }
        }
        Ok(Token::Form(
            contents.split_whitespace().map(str::to_owned).collect(),
        ))
    }
}
