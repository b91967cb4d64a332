use crate::{
    bank::Bank,
    error::{ErrorClass, MusicError, Result},
    rom::Rom,
    song::{
        DurationCursor, MusicCommand, MusicSegment, MusicSong, MusicTrack, TrackEvent,
        CHANNEL_COUNT, NOTE_REST, NOTE_TIE, TRACK_END,
    },
    spc::{self, SpcBank},
};

pub use crate::song::command_param_count;

/// Bounds on the work a single parse may do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseOptions {
    /// Maximum subroutine nesting, counting the track itself.
    pub max_parse_depth: usize,
    /// Parsing of a track stops once this many ticks have elapsed.
    pub max_ticks: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_parse_depth: 100,
            max_ticks: 50_000,
        }
    }
}

#[inline]
pub fn is_duration(b: u8) -> bool {
    (0x01..0x80).contains(&b)
}

#[inline]
pub fn is_note_pitch(b: u8) -> bool {
    (0x80..=NOTE_REST).contains(&b)
}

#[inline]
pub fn is_command(b: u8) -> bool {
    b >= 0xE0
}

struct ParsedTrack {
    track: MusicTrack,
    ticks: u32,
}

struct ParseContext<'a> {
    rom: &'a Rom,
    bank: SpcBank,
    options: ParseOptions,
    call_stack: Vec<u16>,
}

impl<'a> ParseContext<'a> {
    fn new(rom: &'a Rom, bank: SpcBank, options: ParseOptions) -> Self {
        Self {
            rom,
            bank,
            options,
            call_stack: Vec::new(),
        }
    }

    fn track(&mut self, address: u16, max_ticks: u32, cursor: &mut DurationCursor) -> Result<ParsedTrack> {
        if address == 0 {
            return Ok(ParsedTrack {
                track: MusicTrack::empty(),
                ticks: 0,
            });
        }
        if self.call_stack.contains(&address) {
            return Err(MusicError::CircularReference(address));
        }
        if self.call_stack.len() >= self.options.max_parse_depth {
            return Err(MusicError::DepthExceeded(self.options.max_parse_depth));
        }
        let data = spc::require_spc_data(self.rom, address, self.bank)?;
        self.call_stack.push(address);
        let res = self.events(address, data, max_ticks, cursor);
        self.call_stack.pop();
        res
    }

    fn events(
        &mut self,
        address: u16,
        data: &[u8],
        max_ticks: u32,
        cursor: &mut DurationCursor,
    ) -> Result<ParsedTrack> {
        let mut track = MusicTrack::with_events(Vec::new());
        let mut emitted = DurationCursor::default();
        let mut ticks = 0u32;
        let mut pos = 0;
        while pos < data.len() && ticks < max_ticks {
            let b = data[pos];
            pos += 1;
            match b {
                TRACK_END => {
                    track.events.push(TrackEvent::End);
                    break;
                }
                0x01..=0x7F => {
                    cursor.duration = b;
                    if let Some(&v) = data.get(pos).filter(|v| is_duration(**v)) {
                        cursor.velocity = v;
                        pos += 1;
                    }
                }
                0x80..=NOTE_REST => {
                    let note = cursor.note(b, &mut emitted);
                    if b != NOTE_TIE {
                        ticks = ticks.saturating_add(note.duration as u32);
                    }
                    track.events.push(TrackEvent::Note(note));
                }
                0xCA..=0xDF => {
                    log::debug!(
                        "Skipping unknown byte 0x{b:02X} at ${:04X}",
                        address.wrapping_add(pos as u16 - 1)
                    );
                }
                _ => {
                    let n = command_param_count(b);
                    let params = data.get(pos..pos + n).ok_or_else(|| {
                        MusicError::malformed(format!(
                            "truncated command 0x{b:02X} in track ${address:04X}"
                        ))
                    })?;
                    pos += n;
                    let cmd = MusicCommand::new(b, params);
                    if cmd.is_subroutine() {
                        let sub = self.subroutine(&cmd, max_ticks - ticks, *cursor)?;
                        ticks = ticks.saturating_add(sub);
                    }
                    track.events.push(TrackEvent::from_command(cmd));
                }
            }
        }
        Ok(ParsedTrack { track, ticks })
    }

    /// Ticks spent in a called fragment, repeats included. The fragment sees
    /// the caller's duration state but does not change it.
    fn subroutine(&mut self, cmd: &MusicCommand, remaining: u32, mut cursor: DurationCursor) -> Result<u32> {
        let repeat = cmd.subroutine_repeat() as u32;
        if repeat == 0 {
            return Ok(0);
        }
        let address = cmd.subroutine_address();
        match self.track(address, remaining / repeat, &mut cursor) {
            Ok(parsed) => Ok(parsed.ticks.saturating_mul(repeat)),
            Err(e @ MusicError::AddressNotFound { .. }) => {
                log::debug!("Ignoring subroutine call: {e}");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

/// Parses the channel data at `address`. Address 0 yields an empty track.
pub fn parse_track(rom: &Rom, address: u16, bank: SpcBank, options: ParseOptions) -> Result<MusicTrack> {
    if !rom.is_loaded() {
        return Err(MusicError::RomNotLoaded);
    }
    let mut cursor = DurationCursor::default();
    ParseContext::new(rom, bank, options)
        .track(address, options.max_ticks, &mut cursor)
        .map(|p| p.track)
}

struct SongHeader {
    segments: Vec<u16>,
    loop_target: Option<u16>,
}

fn song_header(data: &[u8], address: u16) -> Result<SongHeader> {
    let mut segments = Vec::new();
    let mut words = data.chunks_exact(2).map(|w| u16::from_le_bytes([w[0], w[1]]));
    loop {
        match words.next() {
            Some(0) => {
                return Ok(SongHeader {
                    segments,
                    loop_target: None,
                })
            }
            Some(w) if w < 0x100 => {
                let target = words.next().ok_or_else(|| {
                    MusicError::malformed(format!("song ${address:04X} is missing its loop target"))
                })?;
                return Ok(SongHeader {
                    segments,
                    loop_target: Some(target),
                });
            }
            Some(w) => segments.push(w),
            None => {
                return Err(MusicError::malformed(format!(
                    "unterminated segment list in song ${address:04X}"
                )))
            }
        }
    }
}

fn parse_segment(rom: &Rom, address: u16, bank: SpcBank, options: ParseOptions) -> Result<MusicSegment> {
    let mut segment = MusicSegment::default();
    let Some(data) = spc::get_spc_data(rom, address, bank).filter(|d| d.len() >= CHANNEL_COUNT * 2) else {
        log::warn!("Segment ${address:04X} is not resolvable, leaving it empty");
        return Ok(segment);
    };
    for (ch, w) in data.chunks_exact(2).take(CHANNEL_COUNT).enumerate() {
        let ptr = u16::from_le_bytes([w[0], w[1]]);
        match parse_track(rom, ptr, bank, options) {
            Ok(track) => segment.tracks[ch] = track,
            Err(e) if e.class() == ErrorClass::Malformed => return Err(e),
            Err(e) => log::warn!("Channel {ch} of segment ${address:04X}: {e}"),
        }
    }
    Ok(segment)
}

/// Parses the song whose header lives at ARAM `address` in `bank`.
pub fn parse_song(rom: &Rom, address: u16, bank: Bank, options: ParseOptions) -> Result<MusicSong> {
    if !rom.is_loaded() {
        return Err(MusicError::RomNotLoaded);
    }
    if address == 0 {
        return Err(MusicError::InvalidIndex {
            what: "song address",
            index: 0,
        });
    }
    let spc_bank = bank.spc_bank();
    let header = song_header(spc::require_spc_data(rom, address, spc_bank)?, address)?;

    let mut song = MusicSong::new(format!("Song ${address:04X}"), bank);
    song.rom_address = address;
    song.segments = header
        .segments
        .iter()
        .map(|seg| parse_segment(rom, *seg, spc_bank, options))
        .collect::<Result<_>>()?;
    if song.segments.is_empty() {
        song.segments.push(MusicSegment::default());
    }
    if let Some(target) = header.loop_target {
        song.loop_point = header.segments.iter().position(|s| *s == target);
        if song.loop_point.is_none() {
            log::debug!("Song ${address:04X} loops to ${target:04X}, outside its segment list");
        }
    }
    log::debug!(
        "Parsed song ${address:04X}: {} segments, loop {:?}",
        song.segments.len(),
        song.loop_point
    );
    Ok(song)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{song::Note, spc::tests::rom_with_chain};
    use hex_literal::hex;

    fn note(pitch: u8, duration: u8, velocity: u8, prefix: bool) -> TrackEvent {
        TrackEvent::Note(Note {
            pitch,
            duration,
            velocity,
            has_duration_prefix: prefix,
        })
    }

    fn ticks(rom: &Rom, address: u16, options: ParseOptions) -> u32 {
        let mut cursor = DurationCursor::default();
        ParseContext::new(rom, SpcBank::Dungeon, options)
            .track(address, options.max_ticks, &mut cursor)
            .unwrap()
            .ticks
    }

    #[test]
    fn classify() {
        assert!(!is_duration(0));
        assert!(is_duration(0x7F));
        assert!(is_note_pitch(0x80) && is_note_pitch(NOTE_REST));
        assert!(!is_note_pitch(0xCA));
        assert!(is_command(0xE0) && !is_command(0xDF));
        assert_eq!(command_param_count(0xEF), 3);
    }

    #[test]
    fn track_events() {
        let rom = rom_with_chain(
            SpcBank::Dungeon,
            &[(0x1000, &hex!("48 A4 A5 24 7F C9 CA E7 80 48 A4 00 A4"))],
        );
        let track = parse_track(&rom, 0x1000, SpcBank::Dungeon, ParseOptions::default()).unwrap();
        assert!(!track.is_empty);
        assert_eq!(
            track.events,
            vec![
                note(0xA4, 0x48, 0, true),
                note(0xA5, 0x48, 0, false),
                note(NOTE_REST, 0x24, 0x7F, true),
                TrackEvent::Command(MusicCommand::new(0xE7, &[0x80])),
                note(0xA4, 0x48, 0x7F, true),
                TrackEvent::End,
            ]
        );
        assert_eq!(ticks(&rom, 0x1000, ParseOptions::default()), 0x48 * 3 + 0x24);
    }

    #[test]
    fn empty_and_missing() {
        let rom = rom_with_chain(SpcBank::Dungeon, &[(0x1000, &[0])]);
        let track = parse_track(&rom, 0, SpcBank::Dungeon, ParseOptions::default()).unwrap();
        assert!(track.is_empty && track.events.is_empty());
        let err = parse_track(&rom, 0x2000, SpcBank::Dungeon, ParseOptions::default()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::OutOfRange);
    }

    #[test]
    fn truncated_command() {
        let rom = rom_with_chain(SpcBank::Dungeon, &[(0x1000, &hex!("48 A4 E3 01"))]);
        let err = parse_track(&rom, 0x1000, SpcBank::Dungeon, ParseOptions::default()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Malformed);
    }

    #[test]
    fn subroutine_ticks() {
        let rom = rom_with_chain(
            SpcBank::Dungeon,
            &[
                (0x1000, &hex!("EF 00 11 03 48 A4 00")),
                (0x1100, &hex!("24 A4 A5 00")),
            ],
        );
        let track = parse_track(&rom, 0x1000, SpcBank::Dungeon, ParseOptions::default()).unwrap();
        assert_eq!(
            track.events,
            vec![
                TrackEvent::SubroutineCall {
                    address: 0x1100,
                    repeat: 3
                },
                note(0xA4, 0x48, 0, true),
                TrackEvent::End,
            ]
        );
        assert_eq!(ticks(&rom, 0x1000, ParseOptions::default()), 0x24 * 2 * 3 + 0x48);
    }

    #[test]
    fn tick_budget() {
        let rom = rom_with_chain(SpcBank::Dungeon, &[(0x1000, &hex!("48 A4 A4 A4 A4 00"))]);
        let options = ParseOptions {
            max_ticks: 0x90,
            ..Default::default()
        };
        let track = parse_track(&rom, 0x1000, SpcBank::Dungeon, options).unwrap();
        assert_eq!(track.events.len(), 2);
    }

    #[test]
    fn unresolved_subroutine_ignored() {
        let rom = rom_with_chain(SpcBank::Dungeon, &[(0x1000, &hex!("EF 00 50 01 48 A4 00"))]);
        let track = parse_track(&rom, 0x1000, SpcBank::Dungeon, ParseOptions::default()).unwrap();
        assert_eq!(track.events.len(), 3);
    }

    #[test]
    fn cycle_is_malformed() {
        let rom = rom_with_chain(
            SpcBank::Dungeon,
            &[
                (0x1000, &hex!("EF 00 11 01 00")),
                (0x1100, &hex!("EF 00 10 01 00")),
            ],
        );
        for depth in [1, 2, 3, 100] {
            let options = ParseOptions {
                max_parse_depth: depth,
                ..Default::default()
            };
            let err = parse_track(&rom, 0x1000, SpcBank::Dungeon, options).unwrap_err();
            assert_eq!(err.class(), ErrorClass::Malformed, "depth {depth}");
        }
        let err = parse_track(&rom, 0x1000, SpcBank::Dungeon, ParseOptions::default()).unwrap_err();
        assert!(matches!(err, MusicError::CircularReference(0x1000)));
    }

    #[test]
    fn depth_exceeded() {
        let rom = rom_with_chain(
            SpcBank::Dungeon,
            &[
                (0x1000, &hex!("EF 00 11 01 00")),
                (0x1100, &hex!("EF 00 12 01 00")),
                (0x1200, &hex!("48 A4 00")),
            ],
        );
        let options = ParseOptions {
            max_parse_depth: 2,
            ..Default::default()
        };
        let err = parse_track(&rom, 0x1000, SpcBank::Dungeon, options).unwrap_err();
        assert!(matches!(err, MusicError::DepthExceeded(2)));
        let options = ParseOptions {
            max_parse_depth: 3,
            ..Default::default()
        };
        assert!(parse_track(&rom, 0x1000, SpcBank::Dungeon, options).is_ok());
    }

    #[test]
    fn song_with_loop() {
        let rom = rom_with_chain(
            SpcBank::Dungeon,
            &[(
                0x1000,
                &hex!(
                    "06 10 FF 00 06 10"
                    "16 10 00 00 00 00 00 00 00 00 00 00 00 00 00 00"
                    "48 A4 00"
                ),
            )],
        );
        let song = parse_song(&rom, 0x1000, Bank::Dungeon, ParseOptions::default()).unwrap();
        assert_eq!(song.segments.len(), 1);
        assert_eq!(song.loop_point, Some(0));
        assert_eq!(song.rom_address, 0x1000);
        assert_eq!(song.bank, Bank::Dungeon);
        let tracks = &song.segments[0].tracks;
        assert_eq!(tracks[0].events.len(), 2);
        assert!(tracks[1..].iter().all(|t| t.is_empty));
    }

    #[test]
    fn song_errors() {
        let rom = rom_with_chain(SpcBank::Dungeon, &[(0x1000, &hex!("04 10 08 10"))]);
        let options = ParseOptions::default();
        assert_eq!(
            parse_song(&rom, 0, Bank::Dungeon, options).unwrap_err().class(),
            ErrorClass::OutOfRange
        );
        assert_eq!(
            parse_song(&rom, 0x3000, Bank::Dungeon, options).unwrap_err().class(),
            ErrorClass::OutOfRange
        );
        assert_eq!(
            parse_song(&rom, 0x1000, Bank::Dungeon, options).unwrap_err().class(),
            ErrorClass::Malformed
        );
        assert!(matches!(
            parse_song(&Rom::default(), 0x1000, Bank::Dungeon, options),
            Err(MusicError::RomNotLoaded)
        ));
    }
}
