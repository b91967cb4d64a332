use crate::{
    asm::{self, AsmImportOptions},
    bank::{self, Bank, MusicBank},
    error::{MusicError, Result},
    rom::Rom,
    song::MusicSong,
};
use std::path::{Path, PathBuf};

#[derive(clap::Args)]
pub struct Args {
    /// ROM to add music to
    rom: PathBuf,
    /// Assembly files to import as songs
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// ROM file to output to [default: <ROM>.music.sfc]
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Bank new songs are placed in
    #[arg(short, long, value_enum, default_value_t = Bank::Overworld)]
    bank: Bank,
    /// Replace the song with the same name instead of adding a new one
    #[arg(long, default_value_t = false)]
    replace: bool,
    /// WAV files to encode into the sample with the same index, e.g. `0a=lead.wav`
    #[arg(long, value_parser = parse_sample_arg)]
    sample: Vec<(usize, PathBuf)>,
    /// Fail on unknown macros and values
    #[arg(long, default_value_t = false)]
    strict: bool,
    /// Ignore errors when importing input files
    #[arg(long, default_value_t = false)]
    ignore_errors: bool,
    /// Override a bank's capacity, e.g. `dungeon=12000`
    #[arg(long, value_parser = crate::parse_bank_limit)]
    limit: Vec<(Bank, usize)>,
}

fn parse_sample_arg(s: &str) -> std::result::Result<(usize, PathBuf), String> {
    let (index, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=PATH, got `{s}`"))?;
    let index = usize::from_str_radix(index.trim(), 16).map_err(|e| e.to_string())?;
    Ok((index, PathBuf::from(path)))
}

fn import_one(path: &Path, options: &AsmImportOptions, ignore_errors: bool) -> Result<Option<MusicSong>> {
    log::debug!("Reading file `{}`", path.display());
    let result = match asm::import_file(path, options) {
        Ok(result) => result,
        Err(e) if ignore_errors => {
            log::warn!("Skipping `{}`: {e}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    for warning in &result.warnings {
        log::warn!("{}: {warning}", path.display());
    }
    for error in &result.errors {
        log::error!("{}: {error}", path.display());
    }
    if !result.errors.is_empty() && !ignore_errors {
        return Err(MusicError::malformed(format!(
            "{} error(s) in `{}`",
            result.errors.len(),
            path.display()
        )));
    }
    Ok(Some(result.song))
}

fn place_song(music: &mut MusicBank, mut song: MusicSong, replace: bool) -> Result<usize> {
    let existing = replace
        .then(|| music.songs().iter().position(|s| s.name == song.name))
        .flatten();
    match existing {
        Some(index) => {
            let slot = music.song_mut(index)?;
            song.bank = slot.bank;
            song.rom_address = slot.rom_address;
            song.modified = true;
            *slot = song;
            log::info!(
                "Replaced {} song {} `{}`",
                if bank::is_vanilla(index) { "vanilla" } else { "custom" },
                index + 1,
                slot.name
            );
            Ok(index)
        }
        None => {
            let index = music.add_song(song);
            log::info!("Added song {} `{}`", index + 1, music.song(index)?.name);
            Ok(index)
        }
    }
}

pub fn build(args: Args) -> Result<()> {
    let Args {
        rom: rom_path,
        inputs,
        output,
        bank,
        replace,
        sample,
        strict,
        ignore_errors,
        limit,
    } = args;
    let output = output.unwrap_or_else(|| rom_path.with_extension("music.sfc"));
    let mut rom = Rom::load(&rom_path)?;
    let mut music = MusicBank::new(crate::bank_config(&limit));
    music.load_from_rom(&rom)?;

    let options = AsmImportOptions {
        strict,
        verbose_errors: true,
        bank,
    };
    for input in &inputs {
        if let Some(song) = import_one(input, &options, ignore_errors)? {
            place_song(&mut music, song, replace)?;
        }
    }

    for (index, path) in &sample {
        let data = std::fs::read(path)?;
        music.replace_sample_from_wav_data(*index, &data)?;
        log::info!("Encoded `{}` into sample {index:02X}", path.display());
    }

    for b in music.dirty_banks() {
        let space = music.calculate_space_usage(b);
        log::info!(
            "{b} bank: {}/{} bytes ({:.1}%)",
            space.used_bytes,
            space.total_bytes,
            space.usage_percent
        );
        if let Some(rec) = space.recommendation {
            log::warn!("{b} bank: {rec}");
        }
    }
    music.save_to_rom(&mut rom)?;
    rom.save(&output)?;
    log::info!("Wrote `{}`", output.display());
    Ok(())
}
