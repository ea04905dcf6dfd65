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

// Instrument names and their General MIDI programs (zero based).
const STOCK_INSTRUMENTS: &[(&str, u8)] = &[
    ("piano", 0),
    ("electric-piano", 4),
    ("harpsichord", 6),
    ("celesta", 8),
    ("glockenspiel", 9),
    ("vibraphone", 11),
    ("marimba", 12),
    ("xylophone", 13),
    ("organ", 19),
    ("accordion", 21),
    ("harmonica", 22),
    ("guitar", 24),
    ("electric-guitar", 27),
    ("bass", 32),
    ("electric-bass", 33),
    ("violin", 40),
    ("viola", 41),
    ("cello", 42),
    ("contrabass", 43),
    ("harp", 46),
    ("timpani", 47),
    ("choir", 52),
    ("trumpet", 56),
    ("trombone", 57),
    ("tuba", 58),
    ("french-horn", 60),
    ("soprano-sax", 64),
    ("alto-sax", 65),
    ("tenor-sax", 66),
    ("oboe", 68),
    ("bassoon", 70),
    ("clarinet", 71),
    ("piccolo", 72),
    ("flute", 73),
    ("recorder", 74),
    ("pan-flute", 75),
    ("ocarina", 79),
    ("sitar", 104),
    ("banjo", 105),
    ("kalimba", 108),
    ("bagpipes", 109),
];

/// Returns the MIDI program of a stock instrument.
pub fn midi_patch(name: &str) -> Option<u8> {
    STOCK_INSTRUMENTS
        .iter()
        .find(|(instrument, _)| *instrument == name)
        .map(|(_, patch)| *patch)
}

/// The names of every stock instrument.
pub fn stock_instruments() -> impl Iterator<Item = &'static str> {
    STOCK_INSTRUMENTS.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_patch() {
        assert_eq!(midi_patch("piano"), Some(0));
        assert_eq!(midi_patch("cello"), Some(42));
        assert_eq!(midi_patch("theremin"), None);
    }

    #[test]
    fn test_stock_instruments_are_unique() {
        let mut names = stock_instruments().collect::<Vec<_>>();
        let count = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), count);
    }
}
