use super::{
    parse_duration_constant, parse_note_token, parse_number, ARAM_ADDR_DIRECTIVE, COMMAND_MACROS,
    INSTRUMENT_MACROS, LOOP_SEGMENT_DIRECTIVE,
};
use crate::{
    bank::Bank,
    error::{MusicError, Result},
    parser::{is_duration, is_note_pitch},
    song::{
        CommandType, DurationCursor, MusicCommand, MusicSegment, MusicSong, TrackEvent, CHANNEL_COUNT,
        TRACK_END,
    },
};
use arrayvec::ArrayVec;
use std::path::Path;

#[derive(Clone, Debug)]
pub struct AsmImportOptions {
    /// Fail on the first unknown macro or value instead of warning.
    pub strict: bool,
    /// Warn about lines that are not labels, directives, data or macros.
    pub verbose_errors: bool,
    /// Bank assigned to the imported song.
    pub bank: Bank,
}

impl Default for AsmImportOptions {
    fn default() -> Self {
        Self {
            strict: false,
            verbose_errors: true,
            bank: Bank::Overworld,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AsmParseResult {
    pub song: MusicSong,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub lines_parsed: usize,
    /// Bytecode size implied by the source, table words included.
    pub bytes_generated: usize,
    pub aram_address: Option<u16>,
}

struct Importer<'a> {
    options: &'a AsmImportOptions,
    song: MusicSong,
    label: Option<String>,
    segment: usize,
    channel: usize,
    cursor: DurationCursor,
    emitted: DurationCursor,
    line: usize,
    warnings: Vec<String>,
    bytes_generated: usize,
    aram_address: Option<u16>,
}

fn channel_label(label: &str) -> Option<usize> {
    let n = label.strip_prefix(".Channel")?;
    let n: usize = n.parse().ok()?;
    (n < CHANNEL_COUNT).then_some(n)
}

/// Splits `%Name(a, b)` into its name and parameters.
fn parse_macro_call(call: &str) -> Option<(&str, Vec<&str>)> {
    let call = call.strip_prefix('%')?;
    let Some((name, rest)) = call.split_once('(') else {
        return Some((call.trim(), Vec::new()));
    };
    let (params, _) = rest.split_once(')')?;
    let params = params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    Some((name.trim(), params))
}

/// Splits `db a, b` / `dw a, b` into the directive and its operands.
fn data_directive(line: &str) -> Option<(&str, &str)> {
    let op = line.get(..2)?;
    let rest = &line[2..];
    let valid = matches!(op, "db" | "dw") && (rest.is_empty() || rest.starts_with(char::is_whitespace));
    valid.then(|| (op, rest.trim()))
}

impl<'a> Importer<'a> {
    fn new(options: &'a AsmImportOptions) -> Self {
        Self {
            options,
            song: MusicSong::new("", options.bank),
            label: None,
            segment: 0,
            channel: 0,
            cursor: DurationCursor::default(),
            emitted: DurationCursor::default(),
            line: 0,
            warnings: Vec::new(),
            bytes_generated: 0,
            aram_address: None,
        }
    }

    /// Reports a recoverable problem: fatal in strict mode, a warning otherwise.
    fn complain(&mut self, err: MusicError) -> Result<()> {
        if self.options.strict {
            return Err(err);
        }
        self.warnings.push(format!("Line {}: {err}", self.line));
        Ok(())
    }

    fn reset_cursor(&mut self) {
        self.cursor = DurationCursor::default();
        self.emitted = DurationCursor::default();
    }

    fn push(&mut self, event: TrackEvent) {
        self.song.segments[self.segment].tracks[self.channel].push(event);
    }

    fn push_note(&mut self, pitch: u8) {
        let note = self.cursor.note(pitch, &mut self.emitted);
        self.push(TrackEvent::Note(note));
    }

    fn line(&mut self, line: &str) -> Result<()> {
        let line = line.split_once(';').map_or(line, |(code, _)| code).trim();
        if line.is_empty() {
            return Ok(());
        }
        if self.label(line) || self.directive(line)? {
            return Ok(());
        }
        if let Some((op, operands)) = data_directive(line) {
            return self.data(op, operands);
        }
        if line.starts_with('%') {
            return self.macro_call(line);
        }
        if self.options.verbose_errors {
            self.warnings
                .push(format!("Line {}: Unrecognized: {line}", self.line));
        }
        Ok(())
    }

    fn label(&mut self, line: &str) -> bool {
        let label = match line.strip_suffix(':') {
            Some(label) => label.trim(),
            None if line.starts_with('.') => line,
            None => return false,
        };
        if let Some(ch) = channel_label(label) {
            self.channel = ch;
            self.reset_cursor();
        } else if label.starts_with('.') {
            log::trace!("Ignoring local label {label}");
        } else if self.label.is_none() {
            self.label = Some(label.to_string());
        } else {
            self.song.segments.push(MusicSegment::default());
            self.segment = self.song.segments.len() - 1;
            self.channel = 0;
            self.reset_cursor();
        }
        true
    }

    fn directive(&mut self, line: &str) -> Result<bool> {
        let Some((name, value)) = line.strip_prefix('!').and_then(|l| l.split_once('=')) else {
            return Ok(false);
        };
        let (name, value) = (name.trim(), value.trim());
        match name {
            ARAM_ADDR_DIRECTIVE => match parse_number(value).and_then(|v| u16::try_from(v).ok()) {
                Some(addr) => self.aram_address = Some(addr),
                None => self.complain(MusicError::malformed(format!("invalid ARAM address `{value}`")))?,
            },
            LOOP_SEGMENT_DIRECTIVE => match parse_number(value) {
                Some(n) => self.song.loop_point = Some(n as usize),
                None => self.complain(MusicError::malformed(format!("invalid loop segment `{value}`")))?,
            },
            _ => log::trace!("Ignoring directive !{name}"),
        }
        Ok(true)
    }

    fn byte(&mut self, value: &str) -> Result<Option<u8>> {
        match parse_number(value).map(u8::try_from) {
            Some(Ok(b)) => Ok(Some(b)),
            Some(Err(_)) => {
                self.complain(MusicError::malformed(format!("value `{value}` does not fit in a byte")))?;
                Ok(None)
            }
            None => {
                self.complain(MusicError::malformed(format!("unknown value `{value}`")))?;
                Ok(None)
            }
        }
    }

    fn data(&mut self, op: &str, operands: &str) -> Result<()> {
        let values = operands.split(',').map(str::trim).filter(|v| !v.is_empty());
        if op == "dw" {
            self.bytes_generated += 2 * values.count();
            return Ok(());
        }
        for value in values {
            if let Some(pitch) = parse_note_token(value) {
                if pitch == TRACK_END {
                    self.push(TrackEvent::End);
                } else {
                    self.push_note(pitch);
                }
                self.bytes_generated += 1;
                continue;
            }
            if let Some(duration) = parse_duration_constant(value) {
                self.cursor.duration = duration;
                self.bytes_generated += 1;
                continue;
            }
            let Some(b) = self.byte(value)? else {
                continue;
            };
            self.bytes_generated += 1;
            match b {
                TRACK_END => self.push(TrackEvent::End),
                b if is_duration(b) => self.cursor.duration = b,
                b if is_note_pitch(b) => self.push_note(b),
                0xCA..=0xDF => {
                    self.complain(MusicError::malformed(format!("byte ${b:02X} has no meaning in a track")))?
                }
                // parameters of a raw command byte are not tracked
                _ => self.push(TrackEvent::from_command(MusicCommand::new(b, &[]))),
            }
        }
        Ok(())
    }

    fn duration_value(&mut self, value: &str) -> Result<Option<u8>> {
        if let Some(d) = parse_duration_constant(value) {
            return Ok(Some(d));
        }
        match self.byte(value)? {
            Some(b) if !is_duration(b) && b != 0 => {
                self.complain(MusicError::malformed(format!("duration `{value}` is out of range")))?;
                Ok(None)
            }
            b => Ok(b),
        }
    }

    fn velocity_value(&mut self, value: &str) -> Result<Option<u8>> {
        match self.byte(value)? {
            Some(b) if !is_duration(b) => {
                self.complain(MusicError::malformed(format!("velocity `{value}` is out of range")))?;
                Ok(None)
            }
            b => Ok(b),
        }
    }

    fn macro_call(&mut self, call: &str) -> Result<()> {
        let (name, params) = parse_macro_call(call)
            .ok_or_else(|| MusicError::malformed(format!("invalid macro call `{call}`")))?;

        if let Some(&id) = INSTRUMENT_MACROS.get(name) {
            self.push(TrackEvent::Command(MusicCommand::new(
                CommandType::SetInstrument.opcode(),
                &[id],
            )));
            self.bytes_generated += 2;
            return Ok(());
        }
        match (name, params.as_slice()) {
            ("SetDuration", [duration, ..]) => {
                if let Some(d) = self.duration_value(duration)? {
                    self.cursor.duration = d;
                    self.bytes_generated += 1;
                }
                return Ok(());
            }
            ("SetDurationN", [duration, velocity, ..]) => {
                if let (Some(d), Some(v)) = (self.duration_value(duration)?, self.velocity_value(velocity)?) {
                    self.cursor.duration = d;
                    self.cursor.velocity = v;
                    self.bytes_generated += 2;
                }
                return Ok(());
            }
            _ => {}
        }

        let Some(&opcode) = COMMAND_MACROS.get(name) else {
            return self.complain(MusicError::UnknownMacro(name.to_string()));
        };
        let mut bytes = ArrayVec::<u8, 3>::new();
        for p in &params {
            let Some(b) = self.byte(p)? else {
                return Ok(());
            };
            if bytes.try_push(b).is_err() {
                return self.complain(MusicError::malformed(format!("too many parameters for %{name}")));
            }
        }
        let cmd = MusicCommand::new(opcode, &bytes);
        if bytes.len() != cmd.param_count() {
            self.complain(MusicError::malformed(format!(
                "%{name} takes {} parameter(s), got {}",
                cmd.param_count(),
                bytes.len()
            )))?;
        }
        self.push(TrackEvent::from_command(cmd));
        self.bytes_generated += 1 + cmd.param_count();
        Ok(())
    }

    fn finish(mut self, errors: Vec<String>, lines_parsed: usize) -> AsmParseResult {
        if let Some(lp) = self.song.loop_point.filter(|lp| *lp >= self.song.segments.len()) {
            self.warnings.push(format!("Loop segment {lp} does not exist"));
            self.song.loop_point = None;
        }
        if let Some(label) = self.label {
            self.song.name = label;
        }
        self.song.rom_address = self.aram_address.unwrap_or(0);
        AsmParseResult {
            song: self.song,
            warnings: self.warnings,
            errors,
            lines_parsed,
            bytes_generated: self.bytes_generated,
            aram_address: self.aram_address,
        }
    }
}

/// Builds a song from assembly text. Channel 0 of the first segment receives
/// data that precedes any channel label.
pub fn import_song(source: &str, options: &AsmImportOptions) -> Result<AsmParseResult> {
    let mut importer = Importer::new(options);
    let mut errors = Vec::new();
    let mut lines_parsed = 0;
    for (i, line) in source.lines().enumerate() {
        importer.line = i + 1;
        lines_parsed += 1;
        if let Err(e) = importer.line(line) {
            if options.strict {
                return Err(e);
            }
            errors.push(format!("Line {}: {e}", i + 1));
        }
    }
    let result = importer.finish(errors, lines_parsed);
    log::debug!(
        "Imported '{}': {} lines, {} bytes, {} warnings, {} errors",
        result.song.name,
        result.lines_parsed,
        result.bytes_generated,
        result.warnings.len(),
        result.errors.len()
    );
    Ok(result)
}

/// Imports a file, naming the song after the file when it has no label.
pub fn import_file(path: impl AsRef<Path>, options: &AsmImportOptions) -> Result<AsmParseResult> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)?;
    let mut result = import_song(&source, options)?;
    if result.song.name.is_empty() {
        if let Some(stem) = path.file_stem() {
            result.song.name = stem.to_string_lossy().into_owned();
        }
    }
    Ok(result)
}
