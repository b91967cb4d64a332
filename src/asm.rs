//! Macro-annotated assembly text for songs.
//!
//! The dialect is the one used by the community music disassemblies: notes
//! are written as `C4`/`Cs4`, durations as `!4th`-style constants and every
//! command as a `%Macro(...)` call.

pub mod export;
pub mod import;

pub use export::{export_song, export_song_to, AsmExportOptions};
pub use import::{import_file, import_song, AsmImportOptions, AsmParseResult};

use crate::song::{CommandType, NOTE_MAX_PITCH, NOTE_MIN_PITCH, NOTE_REST, NOTE_TIE, TRACK_END};

pub const ARAM_ADDR_DIRECTIVE: &str = "ARAMAddr";
pub const LOOP_SEGMENT_DIRECTIVE: &str = "LoopSegment";

pub const TIE_TOKEN: &str = "Tie";
pub const REST_TOKEN: &str = "Rest";
pub const END_TOKEN: &str = "End";

/// Note letters as they appear in tokens, sharps spelled with `s`.
pub const NOTE_TOKENS: [&str; 12] = [
    "C", "Cs", "D", "Ds", "E", "F", "Fs", "G", "Gs", "A", "As", "B",
];

pub const DURATION_CONSTANTS: phf::Map<&'static str, u8> = phf::phf_map! {
    "!4th" => 0x48,
    "!4thD" => 0x6C,
    "!4thT" => 0x30,
    "!8th" => 0x24,
    "!8thD" => 0x36,
    "!8thT" => 0x18,
    "!16th" => 0x12,
    "!16thD" => 0x1B,
    "!32nd" => 0x09,
};

/// Macro name of every defined opcode, indexed by `opcode - 0xE0`.
pub const COMMAND_MACRO_NAMES: [&str; CommandType::ALL.len()] = [
    "SetInstrument",
    "SetPan",
    "PanFade",
    "VibratoOn",
    "VibratoOff",
    "SetMasterVolume",
    "MasterVolumeFade",
    "SetTempo",
    "TempoFade",
    "GlobalTranspose",
    "ChannelTranspose",
    "TremoloOn",
    "TremoloOff",
    "SetChannelVolume",
    "ChannelVolumeFade",
    "CallSubroutine",
    "VibratoFade",
    "PitchEnvelopeTo",
    "PitchEnvelopeFrom",
    "PitchEnvelopeOff",
    "Tuning",
    "EchoVBits",
    "EchoOff",
    "EchoParams",
    "EchoVolumeFade",
    "PitchSlide",
    "PercussionPatch",
];

pub const COMMAND_MACROS: phf::Map<&'static str, u8> = phf::phf_map! {
    "SetInstrument" => 0xE0,
    "SetPan" => 0xE1,
    "PanFade" => 0xE2,
    "VibratoOn" => 0xE3,
    "VibratoOff" => 0xE4,
    "SetMasterVolume" => 0xE5,
    "MasterVolumeFade" => 0xE6,
    "SetTempo" => 0xE7,
    "TempoFade" => 0xE8,
    "GlobalTranspose" => 0xE9,
    "ChannelTranspose" => 0xEA,
    "TremoloOn" => 0xEB,
    "TremoloOff" => 0xEC,
    "SetChannelVolume" => 0xED,
    "ChannelVolumeFade" => 0xEE,
    "CallSubroutine" => 0xEF,
    "VibratoFade" => 0xF0,
    "PitchEnvelopeTo" => 0xF1,
    "PitchEnvelopeFrom" => 0xF2,
    "PitchEnvelopeOff" => 0xF3,
    "Tuning" => 0xF4,
    "EchoVBits" => 0xF5,
    "EchoOff" => 0xF6,
    "EchoParams" => 0xF7,
    "EchoVolumeFade" => 0xF8,
    "PitchSlide" => 0xF9,
    "PercussionPatch" => 0xFA,
};

/// Shorthand for `%SetInstrument` with each vanilla instrument.
pub const INSTRUMENT_MACRO_NAMES: [&str; 25] = [
    "Noise",
    "Rain",
    "Timpani",
    "SquareWave",
    "SawWave",
    "Clink",
    "WobblyLead",
    "CompoundSaw",
    "Tweet",
    "StringsA",
    "StringsB",
    "Trombone",
    "Cymbal",
    "Ocarina",
    "Chimes",
    "Harp",
    "Splash",
    "Trumpet",
    "Horn",
    "SnareA",
    "SnareB",
    "Choir",
    "Flute",
    "Oof",
    "Piano",
];

pub const INSTRUMENT_MACROS: phf::Map<&'static str, u8> = phf::phf_map! {
    "Noise" => 0x00,
    "Rain" => 0x01,
    "Timpani" => 0x02,
    "SquareWave" => 0x03,
    "SawWave" => 0x04,
    "Clink" => 0x05,
    "WobblyLead" => 0x06,
    "CompoundSaw" => 0x07,
    "Tweet" => 0x08,
    "StringsA" => 0x09,
    "StringsB" => 0x0A,
    "Trombone" => 0x0B,
    "Cymbal" => 0x0C,
    "Ocarina" => 0x0D,
    "Chimes" => 0x0E,
    "Harp" => 0x0F,
    "Splash" => 0x10,
    "Trumpet" => 0x11,
    "Horn" => 0x12,
    "SnareA" => 0x13,
    "SnareB" => 0x14,
    "Choir" => 0x15,
    "Flute" => 0x16,
    "Oof" => 0x17,
    "Piano" => 0x18,
};

/// Token for a note, tie, rest or the end marker.
pub fn note_token(pitch: u8) -> Option<String> {
    match pitch {
        NOTE_MIN_PITCH..=NOTE_MAX_PITCH => {
            let n = (pitch - NOTE_MIN_PITCH) as usize;
            Some(format!("{}{}", NOTE_TOKENS[n % 12], n / 12 + 1))
        }
        NOTE_TIE => Some(TIE_TOKEN.into()),
        NOTE_REST => Some(REST_TOKEN.into()),
        TRACK_END => Some(END_TOKEN.into()),
        _ => None,
    }
}

pub fn parse_note_token(token: &str) -> Option<u8> {
    match token {
        TIE_TOKEN => return Some(NOTE_TIE),
        REST_TOKEN => return Some(NOTE_REST),
        END_TOKEN => return Some(TRACK_END),
        _ => {}
    }
    // older sources put the sharp after the octave: `D4s`
    let (token, trailing_sharp) = match token.strip_suffix('s') {
        Some(t) if t.ends_with(|c: char| c.is_ascii_digit()) => (t, true),
        _ => (token, false),
    };
    let split = token.find(|c: char| c.is_ascii_digit())?;
    let (letter, octave) = token.split_at(split);
    let mut semitone = NOTE_TOKENS.iter().position(|t| *t == letter)?;
    if trailing_sharp {
        semitone += 1;
        if NOTE_TOKENS.get(semitone)?.strip_suffix('s') != Some(letter) {
            return None;
        }
    }
    let octave: u8 = octave.parse().ok()?;
    if !(1..=6).contains(&octave) {
        return None;
    }
    Some(NOTE_MIN_PITCH + (octave - 1) * 12 + semitone as u8)
}

/// Named constant for a duration byte, if there is one.
pub fn duration_constant(value: u8) -> Option<&'static str> {
    DURATION_CONSTANTS
        .entries()
        .find(|(_, v)| **v == value)
        .map(|(k, _)| *k)
}

/// Resolves `!4th` or `4th` to its duration byte.
pub fn parse_duration_constant(token: &str) -> Option<u8> {
    let name = token.strip_prefix('!').unwrap_or(token);
    DURATION_CONSTANTS
        .entries()
        .find(|(k, _)| k[1..] == *name)
        .map(|(_, v)| *v)
}

#[inline]
pub fn command_macro_name(opcode: u8) -> Option<&'static str> {
    CommandType::from_opcode(opcode).map(|t| COMMAND_MACRO_NAMES[(t.opcode() - 0xE0) as usize])
}

#[inline]
pub fn instrument_macro_name(id: u8) -> Option<&'static str> {
    INSTRUMENT_MACRO_NAMES.get(id as usize).copied()
}

/// Parses `$XX`, `0xXX` or a decimal literal.
pub fn parse_number(token: &str) -> Option<u32> {
    if let Some(hex) = token.strip_prefix('$').or_else(|| token.strip_prefix("0x")) {
        u32::from_str_radix(hex, 16).ok()
    } else if token.starts_with(|c: char| c.is_ascii_digit()) {
        token.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_tokens() {
        assert_eq!(note_token(0x80).as_deref(), Some("C1"));
        assert_eq!(note_token(0x81).as_deref(), Some("Cs1"));
        assert_eq!(note_token(0xA4).as_deref(), Some("C4"));
        assert_eq!(note_token(0xC7).as_deref(), Some("B6"));
        assert_eq!(note_token(0xC8).as_deref(), Some("Tie"));
        assert_eq!(note_token(0xC9).as_deref(), Some("Rest"));
        assert_eq!(note_token(0x00).as_deref(), Some("End"));
        assert_eq!(note_token(0xCA), None);
        for pitch in (0x80..=0xC9).chain([0]) {
            assert_eq!(parse_note_token(&note_token(pitch).unwrap()), Some(pitch));
        }
        assert_eq!(parse_note_token("D4s"), Some(0xA7));
        assert_eq!(parse_note_token("Ds4"), Some(0xA7));
        assert_eq!(parse_note_token("E4s"), None);
        assert_eq!(parse_note_token("Cs4s"), None);
        assert_eq!(parse_note_token("C7"), None);
        assert_eq!(parse_note_token("H1"), None);
    }

    #[test]
    fn tables_agree() {
        for (i, name) in COMMAND_MACRO_NAMES.iter().enumerate() {
            assert_eq!(COMMAND_MACROS.get(name), Some(&(0xE0 + i as u8)));
        }
        assert_eq!(COMMAND_MACROS.len(), COMMAND_MACRO_NAMES.len());
        for (i, name) in INSTRUMENT_MACRO_NAMES.iter().enumerate() {
            assert_eq!(INSTRUMENT_MACROS.get(name), Some(&(i as u8)));
            assert!(!COMMAND_MACROS.contains_key(name));
        }
        assert_eq!(command_macro_name(0xE7), Some("SetTempo"));
        assert_eq!(command_macro_name(0xFB), None);
        assert_eq!(instrument_macro_name(0x18), Some("Piano"));
        assert_eq!(instrument_macro_name(0x19), None);
    }

    #[test]
    fn durations() {
        assert_eq!(duration_constant(0x48), Some("!4th"));
        assert_eq!(duration_constant(0x09), Some("!32nd"));
        assert_eq!(duration_constant(0x47), None);
        assert_eq!(parse_duration_constant("!8thT"), Some(0x18));
        assert_eq!(parse_duration_constant("16thD"), Some(0x1B));
        assert_eq!(parse_duration_constant("!64th"), None);
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("$80"), Some(0x80));
        assert_eq!(parse_number("0xD000"), Some(0xD000));
        assert_eq!(parse_number("12"), Some(12));
        assert_eq!(parse_number("C4"), None);
        assert_eq!(parse_number("$ZZ"), None);
    }
}
