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

use super::{
    osc::{Message, Packet},
    Error, ErrorInner, PlayerState, Result, TransmissionOption,
};
use crate::model::{NoteEvent, PartOrigin, Score};
use rosc::encoder::encode;
use std::{collections::HashMap, net::UdpSocket};

// Players read whole datagrams, so large scores are split over several bundles.
const MAX_BUNDLE_LEN: usize = 256;

/// Sends scores and control messages to a player.
#[derive(Debug)]
pub struct Transmitter {
    socket: UdpSocket,
}

impl Transmitter {
    /// Connects to the player listening on `player.port` of the local machine.
    ///
    /// # Errors
    ///
    /// Returns an error if a UDP socket cannot be created or connected.
    pub fn connect(player: &PlayerState) -> Result<Transmitter> {
        let socket =
            UdpSocket::bind("0.0.0.0:0").map_err(|err| Error(ErrorInner::UdpBind(err)))?;
        socket
            .connect(("127.0.0.1", player.port))
            .map_err(|err| Error(ErrorInner::UdpConnect(err)))?;
        Ok(Transmitter { socket })
    }

    /// Sends the events of `score` selected by `options`, then starts playback unless
    /// [`TransmissionOption::LoadOnly`] is given.
    ///
    /// Without options every event is sent with its absolute offset.
    pub fn transmit_score(&self, score: &Score, options: &[TransmissionOption]) -> Result<()> {
        let mut load_only = false;
        let mut from = 0;
        let mut to = score.events.len();
        let mut sync_offsets = None;
        for option in options {
            match option {
                TransmissionOption::LoadOnly => load_only = true,
                TransmissionOption::FromIndex(index) => from = *index,
                TransmissionOption::ToIndex(index) => to = *index,
                TransmissionOption::SyncOffsets(offsets) => sync_offsets = Some(offsets),
            }
        }
        let to = to.min(score.events.len());
        let from = from.min(to);

        let mut messages = event_messages(&score.events[from..to], sync_offsets);
        if !load_only {
            messages.push(Message::addr("/system/play"));
        }
        log::debug!(
            "transmitting events {}..{} in {} messages",
            from,
            to,
            messages.len()
        );
        self.send_messages(messages)
    }

    pub fn transmit_stop(&self) -> Result<()> {
        self.send(Message::addr("/system/stop").into_packet())
    }

    /// Discards everything the player has been sent.
    pub fn transmit_clear(&self) -> Result<()> {
        self.send(Message::addr("/system/clear").into_packet())
    }

    /// Asks the player process to exit.
    pub fn transmit_shutdown(&self) -> Result<()> {
        self.send(Message::addr("/system/shutdown").arg(0).into_packet())
    }

    fn send_messages(&self, messages: Vec<Message>) -> Result<()> {
        let mut messages = messages.into_iter().peekable();
        while messages.peek().is_some() {
            let chunk = messages.by_ref().take(MAX_BUNDLE_LEN).collect::<Vec<_>>();
            self.send(Packet::bundle(chunk))?;
        }
        Ok(())
    }

    fn send(&self, packet: Packet) -> Result<()> {
        log::debug!("send: {:?}", packet);
        let bytes = encode(&packet.0).map_err(|err| Error(ErrorInner::OscEncode(err)))?;
        self.socket
            .send(&bytes)
            .map_err(|err| Error(ErrorInner::Send(err)))?;
        Ok(())
    }
}

fn event_messages(
    events: &[NoteEvent],
    sync_offsets: Option<&HashMap<PartOrigin, f64>>,
) -> Vec<Message> {
    let relative = |event: &NoteEvent| {
        let sync = sync_offsets
            .and_then(|offsets| offsets.get(&event.part))
            .copied()
            .unwrap_or(0.0);
        millis(event.offset - sync)
    };

    let mut patched = Vec::new();
    let mut messages = Vec::with_capacity(events.len());
    for event in events {
        let offset = relative(event);
        if !patched.contains(&event.part) {
            patched.push(event.part);
            messages.push(
                Message::addr(format!("/track/{}/midi/patch", event.part))
                    .args(vec![offset, i32::from(event.midi_patch)]),
            );
        }
        messages.push(
            Message::addr(format!("/track/{}/midi/note", event.part)).args(vec![
                offset,
                event.midi_note,
                millis(event.duration),
                millis(event.audible_duration),
                (event.volume * 127.0).round() as i32,
            ]),
        );
    }
    messages
}

fn millis(ms: f64) -> i32 {
    ms.max(0.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;
    use rosc::{decoder::decode, OscPacket, OscType};
    use std::time::Duration;

    struct FakePlayer {
        socket: UdpSocket,
    }

    impl FakePlayer {
        fn new() -> FakePlayer {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            FakePlayer { socket }
        }

        fn state(&self) -> PlayerState {
            PlayerState::new("fake", self.socket.local_addr().unwrap().port())
        }

        // Returns the address and integer arguments of every message in the next packet.
        fn recv(&self) -> Vec<(String, Vec<i32>)> {
            let mut buffer = [0_u8; 65536];
            let len = self.socket.recv(&mut buffer).unwrap();
            let messages = match decode(&buffer[..len]).unwrap() {
                OscPacket::Message(message) => vec![message],
                OscPacket::Bundle(bundle) => bundle
                    .content
                    .into_iter()
                    .map(|packet| match packet {
                        OscPacket::Message(message) => message,
                        OscPacket::Bundle(_) => panic!("nested bundle"),
                    })
                    .collect(),
            };
            messages
                .into_iter()
                .map(|message| {
                    let args = message
                        .args
                        .into_iter()
                        .map(|arg| match arg {
                            OscType::Int(n) => n,
                            other => panic!("unexpected argument {:?}", other),
                        })
                        .collect();
                    (message.addr, args)
                })
                .collect()
        }
    }

    fn score(text: &str) -> Score {
        let mut score = Score::new();
        score.apply_updates(&parse("test", text).unwrap()).unwrap();
        score
    }

    fn msg(addr: &str, args: Vec<i32>) -> (String, Vec<i32>) {
        (addr.to_owned(), args)
    }

    #[test]
    fn test_transmit_whole_score() {
        let player = FakePlayer::new();
        let transmitter = Transmitter::connect(&player.state()).unwrap();
        transmitter
            .transmit_score(&score("cello: c d"), &[])
            .unwrap();

        assert_eq!(
            player.recv(),
            vec![
                msg("/track/1/midi/patch", vec![0, 42]),
                msg("/track/1/midi/note", vec![0, 60, 500, 450, 127]),
                msg("/track/1/midi/note", vec![500, 62, 500, 450, 127]),
                msg("/system/play", vec![]),
            ]
        );
    }

    #[test]
    fn test_transmit_slice_with_sync_offsets() {
        let player = FakePlayer::new();
        let transmitter = Transmitter::connect(&player.state()).unwrap();
        let score = score("piano: c d (volume 50) e");

        let mut offsets = HashMap::new();
        offsets.insert(PartOrigin(1), 500.0);
        let options = vec![
            TransmissionOption::LoadOnly,
            TransmissionOption::FromIndex(1),
            TransmissionOption::ToIndex(3),
            TransmissionOption::SyncOffsets(offsets),
        ];
        transmitter.transmit_score(&score, &options).unwrap();

        assert_eq!(
            player.recv(),
            vec![
                msg("/track/1/midi/patch", vec![0, 0]),
                msg("/track/1/midi/note", vec![0, 62, 500, 450, 127]),
                msg("/track/1/midi/note", vec![500, 64, 500, 450, 64]),
            ]
        );
    }

    #[test]
    fn test_transmit_splits_bundles() {
        let player = FakePlayer::new();
        let transmitter = Transmitter::connect(&player.state()).unwrap();
        let text = format!("piano: {}", vec!["c"; 300].join(" "));
        transmitter.transmit_score(&score(&text), &[]).unwrap();

        assert_eq!(player.recv().len(), 256);
        assert_eq!(player.recv().len(), 46);
    }

    #[test]
    fn test_control_messages() {
        let player = FakePlayer::new();
        let transmitter = Transmitter::connect(&player.state()).unwrap();
        transmitter.transmit_stop().unwrap();
        transmitter.transmit_clear().unwrap();
        transmitter.transmit_shutdown().unwrap();

        assert_eq!(player.recv(), vec![msg("/system/stop", vec![])]);
        assert_eq!(player.recv(), vec![msg("/system/clear", vec![])]);
        assert_eq!(player.recv(), vec![msg("/system/shutdown", vec![0])]);
    }
}
