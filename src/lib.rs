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


//! A session server for live coding music in a text notation.
//!
//! # Introduction
//!
//! Cantus keeps an evolving score in memory while a musician types fragments of it into a
//! client. Each fragment is parsed, applied to the score, and only the notes it added are sent to
//! a player process over [OSC](http://opensoundcontrol.org/spec-1_0). Nothing that was already
//! played is sent again, even when voices that run in parallel are still being written.
//!
//! The crate is organised bottom up:
//!
//!  * [`model`](crate::model) - The [`Score`](model::Score): parts, voices, markers, variables
//!    and the log of note events. Scores change only by applying
//!    [`ScoreUpdate`](model::ScoreUpdate)s.
//!
//!  * [`parser`](crate::parser) - Turns notation text such as `piano: c d e f` into score
//!    updates.
//!
//!  * [`player`](crate::player) - Sends note events and playback commands to a player over UDP.
//!
//!  * [`repl`](crate::repl) - A [`Session`](repl::Session) that evaluates input incrementally,
//!    and a [`Server`](repl::Server) that exposes a session to clients over TCP.
//!
//!  * [`bencode`](crate::bencode) - The wire format spoken between clients and servers.
//!
//!  * [`registry`](crate::registry) - Discovery files that let clients find running servers.
//!
//! This crate does not launch players, install a logger or parse command lines. Those are left
//! to the program that embeds it.
//!
//! # Examples
//!
//! Evaluating input one fragment at a time:
//!
//! ```
//! use cantus::{player::TransmissionOption, repl::Session};
//!
//! let mut session = Session::new("abc");
//! session.update_score_with_input("piano: c d")?;
//! let options = session.update_score_with_input("e f")?;
//!
//! // Only the two new notes are sent.
//! assert_eq!(options[0], TransmissionOption::FromIndex(2));
//! assert_eq!(options[1], TransmissionOption::ToIndex(4));
//! # cantus::repl::session::Result::Ok(())
//! ```

pub mod bencode;
pub mod model;
pub mod parser;
pub mod player;
pub mod registry;
pub mod repl;
