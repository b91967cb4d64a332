use super::{
    command_macro_name, duration_constant, instrument_macro_name, note_token, ARAM_ADDR_DIRECTIVE,
    END_TOKEN, LOOP_SEGMENT_DIRECTIVE,
};
use crate::{
    serializer,
    song::{
        CommandType, DurationCursor, DurationPrefix, MusicCommand, MusicSong, MusicTrack, TrackEvent,
        NOTE_MIN_PITCH, NOTE_REST,
    },
};
use itertools::Itertools;
use std::fmt::{self, Write};

const INDENT: &str = "    ";

#[derive(Clone, Debug)]
pub struct AsmExportOptions {
    /// Song label. Derived from the song name when unset.
    pub label: Option<String>,
    /// Written as `!ARAMAddr`. Defaults to the song's own address.
    pub aram_address: Option<u16>,
    pub header_comments: bool,
}

impl Default for AsmExportOptions {
    fn default() -> Self {
        Self {
            label: None,
            aram_address: None,
            header_comments: true,
        }
    }
}

/// Turns a song name into an assembler label.
pub fn song_label(name: &str) -> String {
    let label: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if label.is_empty() || label.starts_with(|c: char| c.is_ascii_digit()) {
        format!("Song{label}")
    } else {
        label
    }
}

fn duration_token(duration: u8) -> String {
    duration_constant(duration).map_or_else(|| format!("${duration:02X}"), String::from)
}

fn write_command(w: &mut impl Write, cmd: &MusicCommand) -> fmt::Result {
    if cmd.command_type() == Some(CommandType::SetInstrument) {
        if let Some(name) = instrument_macro_name(cmd.params[0]) {
            return writeln!(w, "{INDENT}%{name}()");
        }
    }
    let params = cmd.used_params().iter().map(|p| format!("${p:02X}")).join(", ");
    match command_macro_name(cmd.opcode) {
        Some(name) => writeln!(w, "{INDENT}%{name}({params})"),
        None if params.is_empty() => writeln!(w, "{INDENT}db ${:02X}", cmd.opcode),
        None => writeln!(w, "{INDENT}db ${:02X}, {params}", cmd.opcode),
    }
}

fn write_track(w: &mut impl Write, track: &MusicTrack) -> fmt::Result {
    let mut cursor = DurationCursor::default();
    for ev in &track.events {
        match ev {
            TrackEvent::Note(n) => {
                match cursor.advance(n.duration, n.velocity) {
                    DurationPrefix::None => {}
                    // a bare $00 would read back as End
                    DurationPrefix::Duration if n.duration == 0 => {
                        writeln!(w, "{INDENT}%SetDuration($00)")?
                    }
                    DurationPrefix::Duration => {
                        writeln!(w, "{INDENT}db {}", duration_token(n.duration))?
                    }
                    DurationPrefix::WithVelocity => writeln!(
                        w,
                        "{INDENT}%SetDurationN({}, ${:02X})",
                        duration_token(n.duration),
                        n.velocity
                    )?,
                }
                match note_token(n.pitch).filter(|_| (NOTE_MIN_PITCH..=NOTE_REST).contains(&n.pitch)) {
                    Some(token) => writeln!(w, "{INDENT}db {token}")?,
                    None => writeln!(w, "{INDENT}db ${:02X}", n.pitch)?,
                }
            }
            TrackEvent::Command(cmd) => write_command(w, cmd)?,
            TrackEvent::SubroutineCall { address, repeat } => {
                let [lo, hi] = address.to_le_bytes();
                writeln!(w, "{INDENT}%CallSubroutine(${lo:02X}, ${hi:02X}, ${repeat:02X})")?;
            }
            TrackEvent::End => break,
        }
    }
    writeln!(w, "{INDENT}db {END_TOKEN}")
}

/// Writes `song` as assembly text.
pub fn export_song_to(w: &mut impl Write, song: &MusicSong, options: &AsmExportOptions) -> fmt::Result {
    let label = options
        .label
        .clone()
        .unwrap_or_else(|| song_label(&song.name));
    let base = options.aram_address.unwrap_or(song.rom_address);
    let segment_ptrs: Vec<u16> = serializer::serialize_song(song, base)
        .map(|s| {
            s.data
                .chunks_exact(2)
                .take(song.segments.len())
                .map(|p| u16::from_le_bytes([p[0], p[1]]))
                .collect()
        })
        .unwrap_or_default();

    if options.header_comments {
        writeln!(w, "; {}", song.name)?;
        writeln!(w, "; Bank: {}", song.bank)?;
        writeln!(
            w,
            "; {} segment(s), {} ticks",
            song.segments.len(),
            song.duration_ticks()
        )?;
        writeln!(w)?;
    }
    if let Some(lp) = song.loop_point {
        writeln!(w, "!{LOOP_SEGMENT_DIRECTIVE} = {lp}")?;
    }

    for (i, segment) in song.segments.iter().enumerate() {
        if i == 0 {
            writeln!(w, "{label}:")?;
        } else {
            writeln!(w)?;
            writeln!(w, "{label}_Segment{i}:")?;
        }
        writeln!(w, "!{ARAM_ADDR_DIRECTIVE} = ${base:04X}")?;
        if let Some(ptr) = segment_ptrs.get(i) {
            writeln!(w, "; segment {i} channel table at ${ptr:04X}")?;
        }
        if song.loop_point == Some(i) {
            writeln!(w, "; loop start")?;
        }
        writeln!(w, ".Channels:")?;
        for (ch, track) in segment.tracks.iter().enumerate() {
            if track.is_empty {
                writeln!(w, "{INDENT}dw $0000")?;
            } else {
                writeln!(w, "{INDENT}dw .Channel{ch}")?;
            }
        }
        for (ch, track) in segment.tracks.iter().enumerate() {
            if track.is_empty {
                continue;
            }
            writeln!(w)?;
            writeln!(w, ".Channel{ch}:")?;
            write_track(w, track)?;
        }
    }
    Ok(())
}

pub fn export_song(song: &MusicSong, options: &AsmExportOptions) -> String {
    let mut out = String::new();
    // formatting into a String cannot fail
    let _ = export_song_to(&mut out, song, options);
    out
}
