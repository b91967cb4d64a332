use crate::{
    error::{MusicError, Result},
    song::{
        DurationCursor, DurationPrefix, MusicSong, MusicTrack, TrackEvent, CALL_SUBROUTINE,
        CHANNEL_COUNT, COMMAND_BASE, NOTE_MIN_PITCH, NOTE_REST, TRACK_END,
    },
};

/// Destination for encoded bytecode.
pub trait ByteSink {
    fn push(&mut self, b: u8);
    fn extend_from_slice(&mut self, b: &[u8]) {
        for &b in b {
            self.push(b);
        }
    }
}

impl ByteSink for Vec<u8> {
    #[inline]
    fn push(&mut self, b: u8) {
        Vec::push(self, b)
    }
    #[inline]
    fn extend_from_slice(&mut self, b: &[u8]) {
        Vec::extend_from_slice(self, b)
    }
}

/// Sink that only counts bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct CountingSink(pub usize);

impl ByteSink for CountingSink {
    #[inline]
    fn push(&mut self, _: u8) {
        self.0 += 1;
    }
    #[inline]
    fn extend_from_slice(&mut self, b: &[u8]) {
        self.0 += b.len();
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SerializedSong {
    pub data: Vec<u8>,
    /// Offsets within `data` of every 16-bit ARAM pointer.
    pub relocations: Vec<usize>,
    pub base_address: u16,
}

fn unencodable(what: impl std::fmt::Display) -> MusicError {
    MusicError::Unencodable(what.to_string())
}

/// Encodes one channel, emitting duration prefixes only where `cursor` moves.
pub fn serialize_track<S: ByteSink>(
    track: &MusicTrack,
    cursor: &mut DurationCursor,
    out: &mut S,
) -> Result<()> {
    for ev in &track.events {
        match ev {
            TrackEvent::Note(n) => {
                if !(NOTE_MIN_PITCH..=NOTE_REST).contains(&n.pitch) {
                    return Err(unencodable(format_args!("note pitch 0x{:02X}", n.pitch)));
                }
                let prefix = cursor.advance(n.duration, n.velocity);
                if prefix.is_some() && !(0x01..0x80).contains(&n.duration) {
                    return Err(unencodable(format_args!("duration 0x{:02X}", n.duration)));
                }
                match prefix {
                    DurationPrefix::None => {}
                    DurationPrefix::Duration => out.push(n.duration),
                    DurationPrefix::WithVelocity => {
                        if !(0x01..0x80).contains(&n.velocity) {
                            return Err(unencodable(format_args!("velocity 0x{:02X}", n.velocity)));
                        }
                        out.extend_from_slice(&[n.duration, n.velocity]);
                    }
                }
                out.push(n.pitch);
            }
            TrackEvent::Command(cmd) => {
                if cmd.opcode < COMMAND_BASE {
                    return Err(unencodable(format_args!("command opcode 0x{:02X}", cmd.opcode)));
                }
                out.push(cmd.opcode);
                out.extend_from_slice(cmd.used_params());
            }
            TrackEvent::SubroutineCall { address, repeat } => {
                let [lo, hi] = address.to_le_bytes();
                out.extend_from_slice(&[CALL_SUBROUTINE, lo, hi, *repeat]);
            }
            TrackEvent::End => {
                out.push(TRACK_END);
                return Ok(());
            }
        }
    }
    out.push(TRACK_END);
    Ok(())
}

#[inline]
fn header_len(song: &MusicSong) -> usize {
    song.segments.len() * 2 + 2 + if song.has_loop() { 2 } else { 0 }
}

fn track_len(track: &MusicTrack) -> Result<usize> {
    let mut sink = CountingSink::default();
    serialize_track(track, &mut DurationCursor::default(), &mut sink)?;
    Ok(sink.0)
}

/// Bytes `serialize_song` would produce.
pub fn calculate_required_space(song: &MusicSong) -> Result<usize> {
    let mut total = header_len(song) + song.segments.len() * CHANNEL_COUNT * 2;
    for track in song.segments.iter().flat_map(|s| &s.tracks) {
        if !track.is_empty {
            total += track_len(track)?;
        }
    }
    Ok(total)
}

/// Lays the song out as `[segment ptrs][0000 | 00FF loop ptr][channel tables][channel data]`
/// for upload at `base_address`.
pub fn serialize_song(song: &MusicSong, base_address: u16) -> Result<SerializedSong> {
    if let Some(lp) = song.loop_point.filter(|lp| *lp >= song.segments.len()) {
        return Err(MusicError::InvalidIndex {
            what: "loop segment",
            index: lp,
        });
    }
    let header = header_len(song);
    let tables = header + song.segments.len() * CHANNEL_COUNT * 2;

    let mut tracks = Vec::new();
    let mut track_addrs = Vec::with_capacity(song.segments.len() * CHANNEL_COUNT);
    for track in song.segments.iter().flat_map(|s| &s.tracks) {
        if track.is_empty {
            track_addrs.push(None);
        } else {
            track_addrs.push(Some(tables + tracks.len()));
            serialize_track(track, &mut DurationCursor::default(), &mut tracks)?;
        }
    }

    let mut out = SerializedSong {
        data: Vec::with_capacity(tables + tracks.len()),
        relocations: Vec::new(),
        base_address,
    };
    let seg_addr = |i: usize| header + i * CHANNEL_COUNT * 2;
    for i in 0..song.segments.len() {
        out.push_pointer(Some(seg_addr(i)));
    }
    match song.loop_point {
        Some(lp) => {
            out.data.extend_from_slice(&0x00FFu16.to_le_bytes());
            out.push_pointer(Some(seg_addr(lp)));
        }
        None => out.data.extend_from_slice(&[0, 0]),
    }
    for addr in track_addrs {
        out.push_pointer(addr);
    }
    out.data.extend_from_slice(&tracks);
    Ok(out)
}

impl SerializedSong {
    /// Appends a pointer to `offset` within the song, or a null word.
    fn push_pointer(&mut self, offset: Option<usize>) {
        match offset {
            Some(off) => {
                self.relocations.push(self.data.len());
                let addr = self.base_address.wrapping_add(off as u16);
                self.data.extend_from_slice(&addr.to_le_bytes());
            }
            None => self.data.extend_from_slice(&[0, 0]),
        }
    }
}

/// Moves the song to `new_base`, rewriting every recorded pointer.
pub fn apply_base_address(song: &mut SerializedSong, new_base: u16) {
    let delta = new_base.wrapping_sub(song.base_address);
    for &off in &song.relocations {
        if let Some(w) = song.data.get_mut(off..off + 2) {
            let v = u16::from_le_bytes([w[0], w[1]]).wrapping_add(delta);
            w.copy_from_slice(&v.to_le_bytes());
        }
    }
    song.base_address = new_base;
}
