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

//! Talking to player processes.
//!
//! A player is an external process that turns note events into sound. It listens for [OSC]
//! packets on a UDP port of the local machine. This crate never launches players; a
//! [`PlayerSupervisor`] hands out ones that are already running.
//!
//! The [`Transmitter`] sends the events of a [`Score`](crate::model::Score) to a player. Which
//! events are sent, and how their offsets are shifted, is controlled by [`TransmissionOption`]s.
//!
//! # Messages
//!
//! | Address | Arguments |
//! |---|---|
//! | `/track/<part>/midi/patch` | offset, MIDI program |
//! | `/track/<part>/midi/note` | offset, MIDI note, duration, audible duration, velocity |
//! | `/system/play` | |
//! | `/system/stop` | |
//! | `/system/clear` | |
//! | `/system/shutdown` | delay |
//!
//! Offsets and durations are whole milliseconds.
//!
//! [OSC]: http://opensoundcontrol.org/spec-1_0

mod osc;
mod transmitter;

pub use transmitter::Transmitter;

use crate::model::PartOrigin;
use rosc::OscError;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, error, fmt, io};

/// Identifies a running player process.
///
/// The zero value, an empty id and port 0, means that there is no player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: String,
    pub port: u16,
}

impl PlayerState {
    pub fn new(id: impl Into<String>, port: u16) -> PlayerState {
        PlayerState {
            id: id.into(),
            port,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.id.is_empty() && self.port == 0
    }
}

/// Hands out running players.
pub trait PlayerSupervisor: fmt::Debug {
    /// Returns a player that is ready to receive a score.
    ///
    /// # Errors
    ///
    /// Returns an error if no player is available.
    fn find_available_player(&mut self) -> Result<PlayerState>;
}

/// A supervisor for a single player that was started on a known port.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedPlayer(PlayerState);

impl FixedPlayer {
    pub fn new(player: PlayerState) -> FixedPlayer {
        FixedPlayer(player)
    }
}

impl PlayerSupervisor for FixedPlayer {
    fn find_available_player(&mut self) -> Result<PlayerState> {
        if self.0.is_zero() {
            return Err(Error(ErrorInner::Unavailable));
        }
        Ok(self.0.clone())
    }
}

/// Controls which part of a score is transmitted.
#[derive(Debug, Clone, PartialEq)]
pub enum TransmissionOption {
    /// Send the events without starting playback.
    LoadOnly,

    /// Send events starting at this index of [`Score::events`](crate::model::Score::events).
    FromIndex(usize),

    /// Send events up to, but not including, this index.
    ToIndex(usize),

    /// Shift each part's events back by its offset in this map, so that events already
    /// transmitted are not replayed.
    SyncOffsets(HashMap<PartOrigin, f64>),
}

/// A specialized [`Result`] type for player operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by player operations.
#[derive(Debug)]
pub struct Error(ErrorInner);

#[derive(Debug)]
enum ErrorInner {
    UdpBind(io::Error),
    UdpConnect(io::Error),
    Send(io::Error),
    OscEncode(OscError),
    Unavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ErrorInner::UdpBind(e) => write!(f, "binding to UDP socket: {}", e),
            ErrorInner::UdpConnect(e) => write!(f, "connecting UDP socket to player: {}", e),
            ErrorInner::Send(e) => write!(f, "sending message to player: {}", e),
            ErrorInner::OscEncode(_) => write!(f, "encoding OSC packet"),
            ErrorInner::Unavailable => write!(f, "no player is available"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.0 {
            ErrorInner::UdpBind(e) => Some(e),
            ErrorInner::UdpConnect(e) => Some(e),
            ErrorInner::Send(e) => Some(e),
            ErrorInner::OscEncode(_) => None,
            ErrorInner::Unavailable => None,
        }
    }
}
