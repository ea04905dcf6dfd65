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

use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};

// OSC reserves this time tag to mean "now".
const IMMEDIATELY: OscTime = (0, 1);

#[derive(Debug, Clone, PartialEq)]
pub struct Packet(pub OscPacket);

impl Packet {
    /// Wraps messages into a bundle to be executed immediately.
    pub fn bundle(messages: impl IntoIterator<Item = Message>) -> Packet {
        Packet(OscPacket::Bundle(OscBundle {
            timetag: IMMEDIATELY,
            content: messages
                .into_iter()
                .map(|message| OscPacket::Message(message.0))
                .collect(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message(OscMessage);

impl Message {
    pub fn addr(addr: impl Into<String>) -> Message {
        Message(OscMessage {
            addr: addr.into(),
            args: Vec::new(),
        })
    }

    pub fn arg<T: Into<OscType>>(mut self, arg: T) -> Message {
        self.0.args.push(arg.into());
        self
    }

    pub fn args<I, T>(mut self, args: I) -> Message
    where
        I: IntoIterator<Item = T>,
        T: Into<OscType>,
    {
        self.0.args.extend(args.into_iter().map(T::into));
        self
    }

    pub fn into_packet(self) -> Packet {
        Packet(OscPacket::Message(self.0))
    }
}
