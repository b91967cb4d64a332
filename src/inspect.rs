use std::path::PathBuf;

use crate::{
    bank::{self, Bank, MusicBank},
    error::Result,
    rom::Rom,
    serializer,
    song::{MusicSong, TrackEvent},
    FileFilters,
};

#[derive(clap::Args)]
pub struct Args {
    /// ROM file to inspect
    input: PathBuf,
    /// Glob patterns to include song names
    #[arg(short, long)]
    include: Vec<String>,
    /// Glob patterns to exclude song names
    #[arg(short, long)]
    exclude: Vec<String>,
    /// Override a bank's capacity, e.g. `dungeon=12000`
    #[arg(long, value_parser = crate::parse_bank_limit)]
    limit: Vec<(Bank, usize)>,
}

fn dump_song(song: &MusicSong) {
    for (si, segment) in song.segments.iter().enumerate() {
        for (ch, track) in segment.tracks.iter().enumerate() {
            if track.is_empty {
                continue;
            }
            log::debug!(
                "    SEGMENT {si} CHANNEL {ch}: {} events, {} ticks",
                track.events.len(),
                track.duration_ticks()
            );
            for (tick, event) in track.event_ticks().into_iter().zip(&track.events) {
                match event {
                    TrackEvent::Note(n) => {
                        log::debug!("      {tick: >6} {: <4} 0x{:02X}", n.name(), n.duration)
                    }
                    TrackEvent::Command(c) => log::debug!(
                        "      {tick: >6} {:?} {:02X?}",
                        c.command_type(),
                        c.used_params()
                    ),
                    TrackEvent::SubroutineCall { address, repeat } => {
                        log::debug!("      {tick: >6} CALL ${address:04X} x{repeat}")
                    }
                    TrackEvent::End => log::debug!("      {tick: >6} END"),
                }
            }
        }
    }
}

pub fn inspect(args: Args) -> Result<()> {
    let Args {
        input,
        include,
        exclude,
        limit,
    } = args;
    let verbose = crate::is_log_level(log::LevelFilter::Debug);
    let filters = FileFilters {
        includes: include,
        excludes: exclude,
    };
    let rom = Rom::load(&input)?;
    let mut music = MusicBank::new(crate::bank_config(&limit));
    music.load_from_rom(&rom)?;
    let expanded = music.expanded_info();
    if expanded.detected {
        log::info!("Expanded music patch: JSL ${:06X}", expanded.hook_address);
    }

    log::info!("Songs: {}", music.songs().len());
    log::info!("  ID  BANK       ADDR  SEG LOOP TICKS    SIZE   KIND     NAME");
    for (index, song) in music.songs().iter().enumerate() {
        if !filters.is_empty() && !filters.matches(&song.name) {
            continue;
        }
        let size = serializer::calculate_required_space(song)
            .map_or_else(|_| "?".to_string(), |s| s.to_string());
        let kind = if bank::is_vanilla(index) {
            "vanilla"
        } else if music.is_expanded_song(index) {
            "expanded"
        } else {
            "custom"
        };
        let lp = song
            .loop_point
            .map_or_else(|| "-".to_string(), |l| l.to_string());
        log::info!(
            "  {: <3} {: <10} ${:04X} {: <3} {: <4} {: <8} {: <6} {: <8} {}",
            index + 1,
            song.bank.name(),
            song.rom_address,
            song.segments.len(),
            lp,
            song.duration_ticks(),
            size,
            kind,
            song.name,
        );
        if verbose {
            dump_song(song);
        }
    }

    log::info!("Bank usage:");
    log::info!("  BANK       USED   TOTAL  FREE   USAGE");
    for b in Bank::ALL {
        if !expanded.detected && matches!(b, Bank::OverworldExpanded | Bank::Auxiliary) {
            continue;
        }
        let space = music.calculate_space_usage(b);
        log::info!(
            "  {: <10} {: <6} {: <6} {: <6} {:>5.1}%",
            b.name(),
            space.used_bytes,
            space.total_bytes,
            space.free_bytes,
            space.usage_percent,
        );
        if let Some(rec) = space.recommendation {
            log::warn!("{b} bank: {rec}");
        }
    }

    log::info!("Instruments: {}", music.instruments().len());
    if !music.instruments().is_empty() {
        log::info!("  ID  SAMPLE AD SR GAIN PITCH  NAME");
        for (index, inst) in music.instruments().iter().enumerate() {
            log::info!(
                "  {index: <3} {: <6} {:02X} {:02X} {:02X}   0x{:04X} {}",
                inst.sample_index,
                inst.ad_byte(),
                inst.sr_byte(),
                inst.gain,
                inst.pitch_mult,
                inst.name,
            );
        }
    }

    let sample_count = music.samples().iter().filter(|s| !s.brr_data.is_empty()).count();
    log::info!("Samples: {sample_count}");
    log::info!("  ID  BRRSIZE  SAMPLES  LOOP");
    for (index, sample) in music.samples().iter().enumerate() {
        if sample.brr_data.is_empty() {
            continue;
        }
        let lp = if sample.loops {
            sample.loop_point.to_string()
        } else {
            "-".to_string()
        };
        log::info!(
            "  {index: <3} 0x{: <6x} {: <8} {}",
            sample.brr_data.len(),
            sample.pcm_data.len(),
            lp,
        );
    }
    Ok(())
}
