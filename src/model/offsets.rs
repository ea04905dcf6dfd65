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

use super::{PartOrigin, Score};
use std::collections::HashMap;

impl Score {
    /// Returns where each part of the score currently is, in milliseconds.
    ///
    /// A part without an active voice group is at its own offset. A part with an active voice
    /// group is at the point every active voice has reached, with one exception: the first call
    /// after voices enter or leave a group reconciles the new voice structure and reports the
    /// offset the group started from. Offsets the voices have reached only show up from the
    /// following call onwards.
    ///
    /// Parts that are not in [`Score::parts`] have no entry.
    pub fn part_offsets(&mut self) -> HashMap<PartOrigin, f64> {
        let reconciling = self.voice_change != self.observed_voice_change;
        if reconciling {
            log::debug!(
                "reconciling voice structure (change {} -> {})",
                self.observed_voice_change,
                self.voice_change
            );
            self.observed_voice_change = self.voice_change;
        }

        self.parts
            .iter()
            .map(|part| {
                let offset = match part.voices.sync_offset() {
                    Some(offset) if !reconciling => offset,
                    _ => part.current_offset(),
                };
                (part.origin, offset)
            })
            .collect()
    }
}
