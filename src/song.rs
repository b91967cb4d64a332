use crate::bank::Bank;
use serde::{Deserialize, Serialize};

pub const TRACK_END: u8 = 0x00;
pub const NOTE_MIN_PITCH: u8 = 0x80;
pub const NOTE_MAX_PITCH: u8 = 0xC7;
pub const NOTE_TIE: u8 = 0xC8;
pub const NOTE_REST: u8 = 0xC9;
pub const COMMAND_BASE: u8 = 0xE0;
pub const CALL_SUBROUTINE: u8 = 0xEF;
pub const CHANNEL_COUNT: usize = 8;

/// Parameter bytes following each opcode, indexed by `opcode - 0xE0`.
pub const COMMAND_PARAM_COUNT: [u8; 32] = [
    1, 1, 2, 3, 0, 1, 2, 1, 2, 1, 1, 3, 0, 1, 2, 3, //
    1, 3, 3, 0, 1, 3, 0, 3, 3, 3, 1, 2, 0, 0, 0, 0,
];

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

#[inline]
pub fn command_param_count(opcode: u8) -> usize {
    match opcode {
        COMMAND_BASE..=0xFF => COMMAND_PARAM_COUNT[(opcode - COMMAND_BASE) as usize] as usize,
        _ => 0,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CommandType {
    SetInstrument = 0xE0,
    SetPan,
    PanFade,
    VibratoOn,
    VibratoOff,
    SetMasterVolume,
    MasterVolumeFade,
    SetTempo,
    TempoFade,
    GlobalTranspose,
    ChannelTranspose,
    TremoloOn,
    TremoloOff,
    SetChannelVolume,
    ChannelVolumeFade,
    CallSubroutine,
    VibratoFade,
    PitchEnvelopeTo,
    PitchEnvelopeFrom,
    PitchEnvelopeOff,
    Tuning,
    EchoVBits,
    EchoOff,
    EchoParams,
    EchoVolumeFade,
    PitchSlide,
    PercussionPatch,
}

impl CommandType {
    pub const ALL: [CommandType; 27] = [
        Self::SetInstrument,
        Self::SetPan,
        Self::PanFade,
        Self::VibratoOn,
        Self::VibratoOff,
        Self::SetMasterVolume,
        Self::MasterVolumeFade,
        Self::SetTempo,
        Self::TempoFade,
        Self::GlobalTranspose,
        Self::ChannelTranspose,
        Self::TremoloOn,
        Self::TremoloOff,
        Self::SetChannelVolume,
        Self::ChannelVolumeFade,
        Self::CallSubroutine,
        Self::VibratoFade,
        Self::PitchEnvelopeTo,
        Self::PitchEnvelopeFrom,
        Self::PitchEnvelopeOff,
        Self::Tuning,
        Self::EchoVBits,
        Self::EchoOff,
        Self::EchoParams,
        Self::EchoVolumeFade,
        Self::PitchSlide,
        Self::PercussionPatch,
    ];

    #[inline]
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        opcode
            .checked_sub(COMMAND_BASE)
            .and_then(|i| Self::ALL.get(i as usize).copied())
    }
    #[inline]
    pub fn opcode(self) -> u8 {
        self as u8
    }
    #[inline]
    pub fn param_count(self) -> usize {
        command_param_count(self.opcode())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub duration: u8,
    pub velocity: u8,
    #[serde(default)]
    pub has_duration_prefix: bool,
}

impl Note {
    #[inline]
    pub fn new(pitch: u8, duration: u8) -> Self {
        Self {
            pitch,
            duration,
            ..Default::default()
        }
    }
    #[inline]
    pub fn is_note(&self) -> bool {
        (NOTE_MIN_PITCH..=NOTE_MAX_PITCH).contains(&self.pitch)
    }
    #[inline]
    pub fn is_tie(&self) -> bool {
        self.pitch == NOTE_TIE
    }
    #[inline]
    pub fn is_rest(&self) -> bool {
        self.pitch == NOTE_REST
    }
    /// 1 through 6 for real notes, 0 otherwise.
    #[inline]
    pub fn octave(&self) -> u8 {
        if self.is_note() {
            (self.pitch - NOTE_MIN_PITCH) / 12 + 1
        } else {
            0
        }
    }
    #[inline]
    pub fn semitone(&self) -> u8 {
        if self.is_note() {
            (self.pitch - NOTE_MIN_PITCH) % 12
        } else {
            0
        }
    }
    pub fn name(&self) -> String {
        match self.pitch {
            NOTE_TIE => "---".into(),
            NOTE_REST => "...".into(),
            _ if self.is_note() => {
                format!("{}{}", NOTE_NAMES[self.semitone() as usize], self.octave())
            }
            _ => "???".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MusicCommand {
    pub opcode: u8,
    pub params: [u8; 3],
}

impl MusicCommand {
    /// Builds a command from positional parameters. Extra parameters beyond
    /// the opcode's arity are dropped.
    pub fn new(opcode: u8, params: &[u8]) -> Self {
        let mut cmd = Self {
            opcode,
            params: [0; 3],
        };
        let n = cmd.param_count().min(params.len());
        cmd.params[..n].copy_from_slice(&params[..n]);
        cmd
    }
    #[inline]
    pub fn param_count(&self) -> usize {
        command_param_count(self.opcode)
    }
    #[inline]
    pub fn used_params(&self) -> &[u8] {
        &self.params[..self.param_count()]
    }
    #[inline]
    pub fn command_type(&self) -> Option<CommandType> {
        CommandType::from_opcode(self.opcode)
    }
    #[inline]
    pub fn is_subroutine(&self) -> bool {
        self.opcode == CALL_SUBROUTINE
    }
    #[inline]
    pub fn subroutine_address(&self) -> u16 {
        u16::from_le_bytes([self.params[0], self.params[1]])
    }
    #[inline]
    pub fn subroutine_repeat(&self) -> u8 {
        self.params[2]
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackEvent {
    Note(Note),
    Command(MusicCommand),
    SubroutineCall { address: u16, repeat: u8 },
    End,
}

impl TrackEvent {
    /// Wraps a command, routing subroutine calls to their dedicated variant.
    pub fn from_command(cmd: MusicCommand) -> Self {
        if cmd.is_subroutine() {
            Self::SubroutineCall {
                address: cmd.subroutine_address(),
                repeat: cmd.subroutine_repeat(),
            }
        } else {
            Self::Command(cmd)
        }
    }
    #[inline]
    pub fn note(&self) -> Option<&Note> {
        match self {
            Self::Note(note) => Some(note),
            _ => None,
        }
    }
    /// Ticks this event advances its track by. Ties extend the previous note
    /// without moving the cursor.
    #[inline]
    pub fn ticks(&self) -> u32 {
        match self {
            Self::Note(note) if !note.is_tie() => note.duration as u32,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MusicTrack {
    pub events: Vec<TrackEvent>,
    pub is_empty: bool,
}

impl Default for MusicTrack {
    fn default() -> Self {
        Self::empty()
    }
}

impl MusicTrack {
    #[inline]
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            is_empty: true,
        }
    }
    pub fn with_events(events: Vec<TrackEvent>) -> Self {
        Self {
            events,
            is_empty: false,
        }
    }
    pub fn duration_ticks(&self) -> u32 {
        self.events.iter().map(TrackEvent::ticks).sum()
    }
    /// Start tick of every event.
    pub fn event_ticks(&self) -> Vec<u32> {
        self.events
            .iter()
            .scan(0u32, |tick, ev| {
                let start = *tick;
                *tick += ev.ticks();
                Some(start)
            })
            .collect()
    }
    pub fn push(&mut self, event: TrackEvent) {
        self.is_empty = false;
        self.events.push(event);
    }
    pub fn insert(&mut self, index: usize, event: TrackEvent) -> bool {
        if index > self.events.len() {
            return false;
        }
        self.is_empty = false;
        self.events.insert(index, event);
        true
    }
    pub fn remove(&mut self, index: usize) -> Option<TrackEvent> {
        (index < self.events.len()).then(|| self.events.remove(index))
    }
    #[inline]
    pub fn ends_with_end(&self) -> bool {
        matches!(self.events.last(), Some(TrackEvent::End))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MusicSegment {
    pub tracks: [MusicTrack; CHANNEL_COUNT],
}

impl MusicSegment {
    pub fn duration_ticks(&self) -> u32 {
        self.tracks
            .iter()
            .map(MusicTrack::duration_ticks)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MusicSong {
    pub name: String,
    pub segments: Vec<MusicSegment>,
    pub loop_point: Option<usize>,
    pub bank: Bank,
    pub rom_address: u16,
    #[serde(default)]
    pub modified: bool,
}

impl MusicSong {
    pub fn new(name: impl Into<String>, bank: Bank) -> Self {
        Self {
            name: name.into(),
            segments: vec![MusicSegment::default()],
            loop_point: None,
            bank,
            rom_address: 0,
            modified: false,
        }
    }
    #[inline]
    pub fn has_loop(&self) -> bool {
        self.loop_point.is_some()
    }
    pub fn duration_ticks(&self) -> u32 {
        self.segments.iter().map(MusicSegment::duration_ticks).sum()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MusicInstrument {
    pub name: String,
    pub sample_index: u8,
    pub attack: u8,
    pub decay: u8,
    pub sustain_level: u8,
    pub sustain_rate: u8,
    pub gain: u8,
    pub pitch_mult: u16,
}

impl MusicInstrument {
    /// DSP ADSR1 register. Bit 7 enables ADSR mode.
    #[inline]
    pub fn ad_byte(&self) -> u8 {
        (self.attack & 0x0F) | ((self.decay & 0x07) << 4) | 0x80
    }
    /// DSP ADSR2 register.
    #[inline]
    pub fn sr_byte(&self) -> u8 {
        (self.sustain_rate & 0x1F) | ((self.sustain_level & 0x07) << 5)
    }
    pub fn set_from_bytes(&mut self, ad: u8, sr: u8) {
        self.attack = ad & 0x0F;
        self.decay = (ad >> 4) & 0x07;
        self.sustain_rate = sr & 0x1F;
        self.sustain_level = (sr >> 5) & 0x07;
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MusicSample {
    pub name: String,
    pub brr_data: Vec<u8>,
    pub pcm_data: Vec<i16>,
    pub loop_point: usize,
    pub loops: bool,
}

/// Sticky duration/velocity state of an N-SPC channel. A duration byte only
/// appears in the stream when a note's timing differs from the cursor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DurationCursor {
    pub duration: u8,
    pub velocity: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DurationPrefix {
    None,
    Duration,
    WithVelocity,
}

impl DurationPrefix {
    #[inline]
    pub fn is_some(self) -> bool {
        self != Self::None
    }
}

impl DurationCursor {
    /// Moves the cursor to `(duration, velocity)` and reports which prefix
    /// bytes must precede the note.
    pub fn advance(&mut self, duration: u8, velocity: u8) -> DurationPrefix {
        let prefix = if velocity != self.velocity {
            DurationPrefix::WithVelocity
        } else if duration != self.duration {
            DurationPrefix::Duration
        } else {
            DurationPrefix::None
        };
        self.duration = duration;
        self.velocity = velocity;
        prefix
    }
    /// Builds a note at this cursor. `emitted` holds the timing of the previous
    /// note and decides whether the note needs a prefix when re-encoded.
    pub fn note(&self, pitch: u8, emitted: &mut DurationCursor) -> Note {
        let prefix = emitted.advance(self.duration, self.velocity);
        Note {
            pitch,
            duration: self.duration,
            velocity: self.velocity,
            has_duration_prefix: prefix.is_some(),
        }
    }
}
