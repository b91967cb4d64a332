use std::{
    borrow::Cow,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    asm::{self, AsmExportOptions},
    bank::{Bank, MusicBank},
    error::Result,
    rom::Rom,
    serializer,
    wav::{Wav, DSP_SAMPLE_RATE},
};

#[derive(clap::Args)]
pub struct Args {
    /// ROM file to extract music from
    input: PathBuf,
    /// Directory to output music data into [default: music]
    #[arg(short, long)]
    outdir: Option<PathBuf>,
    /// Glob patterns to include file names
    #[arg(short, long)]
    include: Vec<String>,
    /// Don't extract to subfolders
    #[arg(short, long, default_value_t = false)]
    flat: bool,
    /// Write songs as bytecode and samples as BRR
    #[arg(long, default_value_t = false)]
    raw: bool,
    /// Skip writing music.json
    #[arg(long, default_value_t = false)]
    no_json: bool,
    /// Override a bank's capacity, e.g. `dungeon=12000`
    #[arg(long, value_parser = crate::parse_bank_limit)]
    limit: Vec<(Bank, usize)>,
}

pub fn extract(args: Args) -> Result<()> {
    let rom = Rom::load(&args.input)?;
    let mut music = MusicBank::new(crate::bank_config(&args.limit));
    music.load_from_rom(&rom)?;
    let outdir = args.outdir.as_deref().unwrap_or(Path::new("music"));
    std::fs::create_dir_all(outdir)?;

    let mut songs = 0usize;
    for (index, song) in music.songs().iter().enumerate() {
        let name = format!("{:02}_{}", index + 1, asm::export::song_label(&song.name));
        let Some(mut file) = args.try_create_file(outdir, "SONGS", &name, "asm", "bin")? else {
            continue;
        };
        if args.raw {
            match serializer::serialize_song(song, song.rom_address) {
                Ok(s) => file.write_all(&s.data)?,
                Err(e) => log::warn!("Cannot encode `{}`: {e}", song.name),
            }
        } else {
            asm::export_song_to(
                &mut IoFmt(&mut file),
                song,
                &AsmExportOptions::default(),
            )
            .map_err(|_| std::io::Error::other("failed to write assembly"))?;
        }
        file.flush()?;
        songs += 1;
    }

    let mut samples = 0usize;
    for (index, sample) in music.samples().iter().enumerate() {
        if sample.brr_data.is_empty() {
            continue;
        }
        let name = format!("SMP_{index:02X}");
        let Some(mut file) = args.try_create_file(outdir, "SAMPLES", &name, "wav", "brr")? else {
            continue;
        };
        if args.raw {
            file.write_all(&sample.brr_data)?;
        } else {
            Wav {
                sample_rate: DSP_SAMPLE_RATE,
                samples: sample.pcm_data.clone(),
                loop_start: sample.loops.then_some(sample.loop_point as u32),
            }
            .write(&mut file)?;
        }
        file.flush()?;
        samples += 1;
    }

    if !args.no_json {
        let path = outdir.join("music.json");
        log::debug!("writing `{}`", path.display());
        std::fs::write(path, music.to_json()?)?;
    }
    log::info!(
        "Extracted {songs} songs and {samples} samples to `{}`",
        outdir.display()
    );
    Ok(())
}

/// Adapts an `io::Write` for `fmt::Write` users.
struct IoFmt<'a, W: Write>(&'a mut W);

impl<W: Write> std::fmt::Write for IoFmt<'_, W> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.write_all(s.as_bytes()).map_err(|_| std::fmt::Error)
    }
}

impl Args {
    fn try_create_file(
        &self,
        outdir: &Path,
        subdir: &str,
        filename: &str,
        ext: &str,
        raw_ext: &str,
    ) -> std::io::Result<Option<impl Write>> {
        let Self {
            include, flat, raw, ..
        } = self;
        if !include.is_empty() && !include.iter().any(|g| glob_match::glob_match(g, filename)) {
            return Ok(None);
        }
        let dir = if *flat {
            Cow::Borrowed(outdir)
        } else {
            let dir = outdir.join(subdir);
            std::fs::create_dir_all(&dir)?;
            Cow::Owned(dir)
        };
        let mut filename = dir.join(filename);
        filename.set_extension(if *raw { raw_ext } else { ext });
        log::debug!("writing `{}`", filename.display());
        std::fs::File::create(filename.as_path())
            .map(std::io::BufWriter::new)
            .map(Some)
    }
}
