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

//! The state of one interactive session.

use crate::{
    model::{self, Score, ScoreUpdate},
    parser::{self, ParseError},
    player::{self, PlayerState, PlayerSupervisor, TransmissionOption, Transmitter},
};
use thiserror::Error;

// The source name given to parsed input in error messages.
const INPUT_SOURCE: &str = "input";

/// A specialized [`Result`] type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by [`Session`] operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Update(#[from] model::Error),
    #[error("no player is available")]
    NoPlayer,
    #[error("transmitting to player: {0}")]
    Transmission(#[from] player::Error),
}

/// A score being built up from input, and the player it is performed on.
///
/// Input arrives in fragments. Every fragment is added to the score, and only the events that
/// the fragment added are sent to the player.
#[derive(Debug)]
pub struct Session {
    id: String,
    input: String,
    score: Score,
    event_index: usize,
    update_index: usize,
    player: PlayerState,
    supervisor: Option<Box<dyn PlayerSupervisor + Send>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Session {
        Session {
            id: id.into(),
            input: String::new(),
            score: Score::new(),
            event_index: 0,
            update_index: 0,
            player: PlayerState::default(),
            supervisor: None,
        }
    }

    /// Sets the supervisor that [`ensure_player`](Session::ensure_player) asks for players.
    pub fn with_supervisor(mut self, supervisor: Box<dyn PlayerSupervisor + Send>) -> Session {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// All input evaluated since the last reset.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    /// The number of score events that have been handed to the player.
    pub fn event_index(&self) -> usize {
        self.event_index
    }

    pub fn player(&self) -> &PlayerState {
        &self.player
    }

    pub fn set_player(&mut self, player: PlayerState) {
        self.player = player;
    }

    /// Starts over with an empty score. The player is kept.
    pub fn reset_state(&mut self) {
        self.input.clear();
        self.score = Score::new();
        self.event_index = 0;
        self.update_index = 0;
    }

    /// Evaluates a fragment of input against the score.
    ///
    /// The fragment is appended to the input and the whole input is parsed again, but only the
    /// updates that are new are applied. On success, returns the options that transmit exactly
    /// the events added since the last successful call, and marks those events as sent.
    ///
    /// # Errors
    ///
    /// * Returns [`Error::Parse`] if the input does not parse. The fragment is discarded.
    /// * Returns [`Error::Update`] if an update cannot be applied. Updates before it stay
    ///   applied and the fragment is kept. No events are marked as sent, so the next successful
    ///   call also transmits the events this call added.
    pub fn update_score_with_input(&mut self, text: &str) -> Result<Vec<TransmissionOption>> {
        let previous_len = self.input.len();
        if !self.input.is_empty() && !self.input.ends_with('\n') {
            self.input.push('\n');
        }
        self.input.push_str(text);

        let updates = match parser::parse(INPUT_SOURCE, &self.input) {
            Ok(updates) => updates,
            Err(err) => {
                self.input.truncate(previous_len);
                return Err(err.into());
            }
        };

        let sync_offsets = self.score.part_offsets();
        let new_updates = &updates[self.update_index.min(updates.len())..];
        self.update_index = updates.len();
        for update in new_updates {
            self.score.apply_update(update.as_ref())?;
        }

        let options = vec![
            TransmissionOption::FromIndex(self.event_index),
            TransmissionOption::ToIndex(self.score.events.len()),
            TransmissionOption::SyncOffsets(sync_offsets),
        ];
        self.event_index = self.score.events.len();
        Ok(options)
    }

    /// Evaluates a fragment of input and plays the events it added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPlayer`] without evaluating anything if no player is available, and
    /// otherwise the errors of [`update_score_with_input`](Session::update_score_with_input)
    /// and [`with_transmitter`](Session::with_transmitter).
    pub fn eval_and_play(&mut self, text: &str) -> Result<()> {
        if !self.ensure_player() {
            return Err(Error::NoPlayer);
        }
        let options = self.update_score_with_input(text)?;
        let score = &self.score;
        self.with_transmitter(|transmitter| transmitter.transmit_score(score, &options))
    }

    /// Replaces the score with `text`, loading it into the player without playing it.
    pub fn load(&mut self, text: &str) -> Result<()> {
        self.reset_state();
        let mut options = self.update_score_with_input(text)?;
        if !self.ensure_player() {
            return Ok(());
        }
        options.push(TransmissionOption::LoadOnly);
        let score = &self.score;
        self.with_transmitter(|transmitter| {
            transmitter.transmit_clear()?;
            transmitter.transmit_score(score, &options)
        })
    }

    /// Stops and clears the player, if there is one, and starts over with an empty score.
    pub fn new_score(&mut self) -> Result<()> {
        if self.has_player() {
            self.with_transmitter(|transmitter| {
                transmitter.transmit_stop()?;
                transmitter.transmit_clear()
            })?;
        }
        self.reset_state();
        Ok(())
    }

    /// Sends the whole score to the player again and plays it from the start.
    pub fn replay(&mut self) -> Result<()> {
        if !self.ensure_player() {
            return Err(Error::NoPlayer);
        }
        let score = &self.score;
        self.with_transmitter(|transmitter| {
            transmitter.transmit_stop()?;
            transmitter.transmit_clear()?;
            transmitter.transmit_score(score, &[])
        })
    }

    pub fn stop(&self) -> Result<()> {
        self.with_transmitter(Transmitter::transmit_stop)
    }

    /// Parses all input evaluated since the last reset.
    pub fn parsed_input(&self) -> Result<Vec<Box<dyn ScoreUpdate>>> {
        Ok(parser::parse(INPUT_SOURCE, &self.input)?)
    }

    pub fn has_player(&self) -> bool {
        !self.player.is_zero()
    }

    pub fn unset_player(&mut self) {
        self.player = PlayerState::default();
    }

    /// Makes sure a player is bound, asking the supervisor for one if needed.
    ///
    /// Returns whether a player is bound afterwards.
    pub fn ensure_player(&mut self) -> bool {
        if self.has_player() {
            return true;
        }
        if let Some(supervisor) = self.supervisor.as_mut() {
            match supervisor.find_available_player() {
                Ok(player) => {
                    log::info!(
                        "session {} using player {} on port {}",
                        self.id,
                        player.id,
                        player.port
                    );
                    self.player = player;
                }
                Err(err) => log::warn!("session {}: {}", self.id, err),
            }
        }
        self.has_player()
    }

    /// Calls `f` once with a transmitter connected to the player.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPlayer`] without calling `f` if no player is bound, and
    /// [`Error::Transmission`] if connecting fails or `f` fails.
    pub fn with_transmitter<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Transmitter) -> player::Result<()>,
    {
        if !self.has_player() {
            return Err(Error::NoPlayer);
        }
        let transmitter = Transmitter::connect(&self.player)?;
        f(&transmitter)?;
        Ok(())
    }

    /// Tells the player to exit and forgets it.
    pub fn shutdown_player(&mut self) -> Result<()> {
        let result = self.with_transmitter(Transmitter::transmit_shutdown);
        if self.has_player() {
            log::info!("session {} released player {}", self.id, self.player.id);
            self.unset_player();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::PartOrigin, player::FixedPlayer};
    use pretty_assertions::assert_eq;
    use std::{net::UdpSocket, time::Duration};

    fn stub_player() -> PlayerState {
        PlayerState::new("player1", 1234)
    }

    fn fake_player() -> (UdpSocket, PlayerState) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, PlayerState::new("fake", port))
    }

    #[test]
    fn test_has_player_and_unset_player() {
        let mut session = Session::new("abc");
        assert!(!session.has_player());

        session.set_player(stub_player());
        assert!(session.has_player());

        session.unset_player();
        assert!(!session.has_player());
    }

    #[test]
    fn test_with_transmitter_no_player() {
        let session = Session::new("abc");
        let mut called = false;
        let err = session
            .with_transmitter(|_| {
                called = true;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::NoPlayer));
        assert!(!called);
    }

    #[test]
    fn test_with_transmitter_success() {
        let mut session = Session::new("abc");
        session.set_player(stub_player());
        let mut calls = 0;
        session
            .with_transmitter(|_| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_reset_state() {
        let mut session = Session::new("abc");
        session.update_score_with_input("piano: c d e").unwrap();
        session.set_player(stub_player());

        session.reset_state();
        assert_eq!(session.input(), "");
        assert_eq!(session.event_index(), 0);
        assert!(session.score().events.is_empty());
        assert!(session.score().parts.is_empty());
        assert!(session.has_player());
    }

    #[test]
    fn test_update_score_with_input() {
        let mut session = Session::new("abc");
        let options = session.update_score_with_input("piano: c d e f").unwrap();

        assert_eq!(session.input(), "piano: c d e f");
        assert_eq!(session.score().events.len(), 4);
        assert_eq!(session.event_index(), 4);
        assert_eq!(
            options,
            vec![
                TransmissionOption::FromIndex(0),
                TransmissionOption::ToIndex(4),
                TransmissionOption::SyncOffsets(Default::default()),
            ]
        );
    }

    #[test]
    fn test_update_score_with_input_is_incremental() {
        let mut session = Session::new("abc");
        session.update_score_with_input("piano: c d").unwrap();
        let options = session.update_score_with_input("e").unwrap();

        assert_eq!(session.input(), "piano: c d\ne");
        assert_eq!(session.score().events.len(), 3);
        let mut offsets = std::collections::HashMap::new();
        offsets.insert(PartOrigin(1), 1000.0);
        assert_eq!(
            options,
            vec![
                TransmissionOption::FromIndex(2),
                TransmissionOption::ToIndex(3),
                TransmissionOption::SyncOffsets(offsets),
            ]
        );
    }

    #[test]
    fn test_update_score_with_input_syncs_voices() {
        let mut session = Session::new("abc");
        session.update_score_with_input("piano: V1: c d").unwrap();

        let options = session.update_score_with_input("e").unwrap();
        let mut offsets = std::collections::HashMap::new();
        offsets.insert(PartOrigin(1), 0.0);
        assert_eq!(options[2], TransmissionOption::SyncOffsets(offsets));

        let options = session.update_score_with_input("f").unwrap();
        let mut offsets = std::collections::HashMap::new();
        offsets.insert(PartOrigin(1), 1500.0);
        assert_eq!(options[2], TransmissionOption::SyncOffsets(offsets));
        assert_eq!(session.event_index(), 4);
    }

    #[test]
    fn test_parse_error_discards_fragment() {
        let mut session = Session::new("abc");
        session.update_score_with_input("piano: c").unwrap();
        let err = session.update_score_with_input("d ]").unwrap_err();

        assert_eq!(err.to_string(), "input:2:3: unexpected ']'");
        assert_eq!(session.input(), "piano: c");
        session.update_score_with_input("d").unwrap();
        assert_eq!(session.score().events.len(), 2);
    }

    #[test]
    fn test_update_error_keeps_applied_updates() {
        let mut session = Session::new("abc");
        session.update_score_with_input("piano: c").unwrap();
        let err = session.update_score_with_input("d @nowhere e").unwrap_err();

        assert_eq!(err.to_string(), "input:2:3: undefined marker: nowhere");
        assert_eq!(session.score().events.len(), 2);
        assert_eq!(session.event_index(), 1);

        let options = session.update_score_with_input("f").unwrap();
        assert_eq!(options[0], TransmissionOption::FromIndex(1));
        assert_eq!(options[1], TransmissionOption::ToIndex(3));
    }

    #[test]
    fn test_out_of_range_octave_is_an_update_error() {
        let mut session = Session::new("abc");
        let err = session
            .update_score_with_input("piano: o2147483647 c")
            .unwrap_err();
        assert!(matches!(err, Error::Update(_)));
        assert_eq!(
            err.to_string(),
            "input:1:8: invalid octave value: 2147483647"
        );

        session.update_score_with_input("> c").unwrap();
        let notes = session
            .score()
            .events
            .iter()
            .map(|e| e.midi_note)
            .collect::<Vec<_>>();
        assert_eq!(notes, vec![72]);
    }

    #[test]
    fn test_eval_and_play_no_player() {
        let mut session = Session::new("abc");
        let err = session.eval_and_play("piano: c d e f").unwrap_err();
        assert!(matches!(err, Error::NoPlayer));
        assert_eq!(session.input(), "");
        assert!(session.score().events.is_empty());
    }

    #[test]
    fn test_eval_and_play_uses_supervisor() {
        let (socket, player) = fake_player();
        let mut session = Session::new("abc").with_supervisor(Box::new(FixedPlayer::new(player)));
        session.eval_and_play("piano: c").unwrap();

        let mut buffer = [0_u8; 1024];
        assert!(socket.recv(&mut buffer).unwrap() > 0);
        assert_eq!(session.player().id, "fake");
    }

    #[test]
    fn test_eval_and_play_reports_failed_send() {
        // Nothing listens on the port once the socket is dropped, so sends are refused.
        let port = {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        let mut session = Session::new("abc");
        session.set_player(PlayerState::new("gone", port));

        let err = session.eval_and_play("piano: [c]*2000").unwrap_err();
        assert!(matches!(err, Error::Transmission(_)), "got {:?}", err);
        assert_eq!(session.score().events.len(), 2000);
        assert_eq!(session.event_index(), session.score().events.len());
    }

    #[test]
    fn test_shutdown_player() {
        let mut session = Session::new("abc");
        assert!(matches!(
            session.shutdown_player().unwrap_err(),
            Error::NoPlayer
        ));

        let (socket, player) = fake_player();
        session.set_player(player);
        session.shutdown_player().unwrap();
        assert!(!session.has_player());

        let mut buffer = [0_u8; 1024];
        let len = socket.recv(&mut buffer).unwrap();
        match rosc::decoder::decode(&buffer[..len]).unwrap() {
            rosc::OscPacket::Message(message) => assert_eq!(message.addr, "/system/shutdown"),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_load_without_player_evaluates() {
        let mut session = Session::new("abc");
        session.update_score_with_input("violin: c").unwrap();
        session.load("piano: c d").unwrap();

        assert_eq!(session.input(), "piano: c d");
        assert_eq!(session.score().parts.len(), 1);
        assert_eq!(session.event_index(), 2);
    }

    #[test]
    fn test_parsed_input() {
        let mut session = Session::new("abc");
        session.update_score_with_input("piano: c").unwrap();
        session.update_score_with_input("d").unwrap();
        assert_eq!(session.parsed_input().unwrap().len(), 3);
    }
}
