use hex_literal::hex;
use nspcutil::{
    asm::{self, AsmExportOptions, AsmImportOptions},
    bank::{self, Bank, MusicBank, INSTRUMENT_NAMES},
    error::MusicError,
    rom::Rom,
    serializer,
    song::{DurationCursor, MusicTrack, TrackEvent},
    spc::{self, SpcBank},
    wav::{Wav, DSP_SAMPLE_RATE},
};

const SONG_A: u16 = 0xD01A;
const SONG_B: u16 = 0xD036;

fn chain(blocks: &[(u16, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (aram, data) in blocks {
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(&aram.to_le_bytes());
        out.extend_from_slice(data);
    }
    out.extend_from_slice(&[0; 4]);
    out
}

fn song_a() -> Vec<u8> {
    let mut song = hex!("1E D0 00 00 2E D0").to_vec();
    song.extend_from_slice(&[0; 14]);
    song.extend_from_slice(&hex!("E7 80 E0 0B 48 A4 C9 00"));
    song
}

/// Two segments looping back to the second one. Channel 0 calls a fragment
/// living in the common bank.
fn song_b() -> Vec<u8> {
    let mut song = hex!("3E D0 4E D0 FF 00 4E D0 5E D0").to_vec();
    song.extend_from_slice(&[0; 14]);
    song.extend_from_slice(&hex!("00 00 66 D0"));
    song.extend_from_slice(&[0; 12]);
    song.extend_from_slice(&hex!("EF 00 50 02 24 7F B0 00"));
    song.extend_from_slice(&hex!("30 C9 C8 00"));
    song
}

fn overworld_block() -> Vec<u8> {
    let mut table = vec![SONG_A];
    table.extend([0; 10]);
    table.extend([SONG_B, 0]);
    let mut data: Vec<u8> = table.iter().flat_map(|w| w.to_le_bytes()).collect();
    assert_eq!(data.len(), (SONG_A - 0xD000) as usize);
    data.extend(song_a());
    assert_eq!(data.len(), (SONG_B - 0xD000) as usize);
    data.extend(song_b());
    data
}

fn instrument_table() -> Vec<u8> {
    let mut table = vec![0; INSTRUMENT_NAMES.len() * 6];
    table[..6].copy_from_slice(&hex!("00 FF E0 B8 04 70"));
    table[6..12].copy_from_slice(&hex!("00 8F 1F 00 10 00"));
    table
}

fn brr_sample() -> Vec<u8> {
    hex!("B0 12 34 56 78 87 65 43 21 B3 00 11 22 33 44 55 66 77").to_vec()
}

fn test_rom(header: bool) -> Rom {
    let mut image = vec![0; 0x200000];
    let instruments = instrument_table();
    let brr = brr_sample();
    let common = chain(&[
        (0x3C00, &hex!("00 40 00 40")),
        (0x3D00, &instruments),
        (0x4000, &brr),
        (0x5000, &hex!("18 A0 00")),
    ]);
    let overworld = overworld_block();
    let blocks = [
        (SpcBank::Common, common),
        (SpcBank::Overworld, chain(&[(0xD000, &overworld)])),
        (SpcBank::Dungeon, chain(&[(0xD000, &[0, 0])])),
        (SpcBank::Credits, chain(&[(0xD000, &[0, 0])])),
    ];
    for (bank, data) in blocks {
        let at = bank.rom_offset();
        image[at..at + data.len()].copy_from_slice(&data);
    }
    if header {
        image.splice(0..0, [0; 0x200]);
    }
    Rom::new(image)
}

fn loaded(rom: &Rom) -> MusicBank {
    let mut music = MusicBank::default();
    music.load_from_rom(rom).unwrap();
    music
}

#[test]
fn load_songs() {
    let rom = test_rom(false);
    let music = loaded(&rom);
    assert!(music.is_loaded());
    assert!(!music.expanded_info().detected);
    assert_eq!(music.songs().len(), 35);
    assert_eq!(music.table_song_count(Bank::Overworld), 13);

    let a = music.song_by_id(1).unwrap();
    assert_eq!(a.rom_address, SONG_A);
    assert_eq!(a.bank, Bank::Overworld);
    assert_eq!(a.segments.len(), 1);
    assert_eq!(a.loop_point, None);
    assert_eq!(a.duration_ticks(), 0x48 * 2);
    assert!(a.segments[0].tracks[1..].iter().all(|t| t.is_empty));

    let placeholder = music.song(1).unwrap();
    assert_eq!(placeholder.rom_address, 0);
    assert_eq!(music.song(11).unwrap().bank, Bank::Dungeon);
    assert_eq!(music.song(31).unwrap().bank, Bank::Credits);

    let b = music.song(34).unwrap();
    assert_eq!(b.name, "Custom Song 1");
    assert_eq!(b.rom_address, SONG_B);
    assert_eq!(b.segments.len(), 2);
    assert_eq!(b.loop_point, Some(1));
    assert_eq!(
        b.segments[0].tracks[0].events[0],
        TrackEvent::SubroutineCall {
            address: 0x5000,
            repeat: 2
        }
    );
    assert!(b.segments[1].tracks[0].is_empty);
    assert!(!b.segments[1].tracks[1].is_empty);
    assert!(!music.has_modifications());
}

#[test]
fn reserialize_matches_image() {
    let rom = test_rom(false);
    let music = loaded(&rom);
    for (index, original) in [(0, song_a()), (34, song_b())] {
        let song = music.song(index).unwrap();
        let out = serializer::serialize_song(song, song.rom_address).unwrap();
        assert_eq!(out.data, original, "song {index}");
        assert_eq!(serializer::calculate_required_space(song).unwrap(), original.len());
        let stored = spc::get_spc_data(&rom, song.rom_address, SpcBank::Overworld).unwrap();
        assert_eq!(&stored[..original.len()], &original[..]);
    }
}

#[test]
fn copier_header() {
    let plain = loaded(&test_rom(false));
    let headered = loaded(&test_rom(true));
    assert_eq!(plain.songs(), headered.songs());
    assert_eq!(plain.instruments(), headered.instruments());
    assert_eq!(plain.samples(), headered.samples());
}

#[test]
fn instruments_and_samples() {
    let music = loaded(&test_rom(false));
    assert_eq!(music.instruments().len(), INSTRUMENT_NAMES.len());
    let inst = music.instrument(0).unwrap();
    assert_eq!(inst.name, INSTRUMENT_NAMES[0]);
    assert_eq!((inst.ad_byte(), inst.sr_byte()), (0xFF, 0xE0));
    assert_eq!(inst.gain, 0xB8);
    assert_eq!(inst.pitch_mult, 0x0470);
    assert_eq!(music.instrument(1).unwrap().pitch_mult, 0x1000);

    assert_eq!(music.samples().len(), 1);
    let sample = music.sample(0).unwrap();
    assert_eq!(sample.brr_data, brr_sample());
    assert_eq!(sample.pcm_data.len(), 32);
    assert!(sample.loops);
    assert_eq!(sample.loop_point, 0);
    assert!(matches!(
        music.sample(1),
        Err(MusicError::InvalidIndex { what: "sample", index: 1 })
    ));
}

#[test]
fn save_and_reload() {
    let mut rom = test_rom(false);
    let mut music = loaded(&rom);

    let b = music.song(34).unwrap().clone();
    let text = asm::export_song(&b, &AsmExportOptions::default());
    let imported = asm::import_song(&text, &AsmImportOptions::default()).unwrap();
    assert!(imported.errors.is_empty(), "{:?}", imported.errors);
    let copy = music.add_song(imported.song);
    assert_eq!(copy, 35);

    music.instrument_mut(1).unwrap().gain = 0x9F;
    let mut wav = Vec::new();
    Wav {
        sample_rate: DSP_SAMPLE_RATE,
        samples: (0..16).map(|i| i * 256).collect(),
        loop_start: None,
    }
    .write(&mut wav)
    .unwrap();
    music.replace_sample_from_wav_data(0, &wav).unwrap();
    assert_eq!(music.sample(0).unwrap().name, "Sample 00");
    assert_eq!(music.sample(0).unwrap().brr_data.len(), 9);

    assert!(music.has_modifications());
    assert_eq!(music.dirty_banks().into_iter().collect::<Vec<_>>(), [Bank::Overworld]);
    let credits_before = rom
        .read_bytes(Bank::Credits.rom_offset(), 16)
        .unwrap()
        .to_vec();
    music.save_to_rom(&mut rom).unwrap();
    assert!(!music.has_modifications());

    assert_eq!(rom.read_byte(0x0914).unwrap(), 0xF5);
    assert_eq!(rom.read_byte(0x0918).unwrap() & 0x7F, 0x1E);
    assert_eq!(rom.read_byte(0x091C).unwrap(), 0x1A);
    assert_eq!(
        rom.read_bytes(Bank::Credits.rom_offset(), 16).unwrap(),
        credits_before
    );

    let reloaded = loaded(&rom);
    assert_eq!(reloaded.songs().len(), 36);
    assert_eq!(reloaded.table_song_count(Bank::Overworld), 14);
    let a = music.song(0).unwrap();
    assert_eq!(reloaded.song(0).unwrap().segments, a.segments);
    assert_eq!(reloaded.song(0).unwrap().rom_address, a.rom_address);
    for index in [34, 35] {
        let song = reloaded.song(index).unwrap();
        assert_eq!(song.segments, b.segments, "song {index}");
        assert_eq!(song.loop_point, Some(1));
    }
    assert_eq!(reloaded.song(35).unwrap().name, "Custom Song 2");
    assert_eq!(reloaded.instrument(1).unwrap().gain, 0x9F);
    assert_eq!(reloaded.instrument(0).unwrap(), music.instrument(0).unwrap());
    assert_eq!(
        reloaded.sample(0).unwrap().brr_data,
        music.sample(0).unwrap().brr_data
    );
    assert!(!reloaded.sample(0).unwrap().loops);
}

#[test]
fn overflow_leaves_image_untouched() {
    let mut rom = test_rom(false);
    let before = rom.data().to_vec();
    let mut music = MusicBank::new(nspcutil::bank_config(&[(Bank::Overworld, 64)]));
    music.load_from_rom(&rom).unwrap();
    music.song_mut(0).unwrap();
    let space = music.calculate_space_usage(Bank::Overworld);
    assert!(space.is_critical);
    assert!(space.free_bytes < 0);
    assert!(matches!(
        music.save_to_rom(&mut rom),
        Err(MusicError::BankOverflow { bank: "Overworld", limit: 64, .. })
    ));
    assert_eq!(rom.data(), &before[..]);
}

#[test]
fn delete_custom_song() {
    let mut rom = test_rom(false);
    let mut music = loaded(&rom);
    assert!(matches!(music.delete_song(3), Err(MusicError::VanillaProtected(3))));
    let removed = music.delete_song(34).unwrap();
    assert_eq!(removed.rom_address, SONG_B);
    music.save_to_rom(&mut rom).unwrap();

    let reloaded = loaded(&rom);
    assert_eq!(reloaded.songs().len(), 34);
    assert_eq!(reloaded.table_song_count(Bank::Overworld), 12);
    assert_eq!(reloaded.song(0).unwrap().segments, music.song(0).unwrap().segments);
}

#[test]
fn json_state() {
    let music = loaded(&test_rom(false));
    let json = music.to_json().unwrap();
    let mut restored = MusicBank::default();
    restored.load_from_json(&json).unwrap();
    assert_eq!(restored.songs(), music.songs());
    assert_eq!(restored.instruments(), music.instruments());
    assert_eq!(restored.table_song_count(Bank::Overworld), 13);
}

/// Adds the expanded-music hook plus one song in each extra bank.
fn expanded_rom() -> Rom {
    let mut rom = test_rom(false);
    rom.write_bytes(bank::EXPANDED_MUSIC_HOOK, &hex!("22 00 80 1A")).unwrap();
    let mut expanded = hex!("04 D0 00 00 08 D0 00 00 18 D0").to_vec();
    expanded.extend_from_slice(&[0; 14]);
    expanded.extend_from_slice(&hex!("48 A4 00"));
    let mut auxiliary = hex!("04 2B 00 00 08 2B 00 00 18 2B").to_vec();
    auxiliary.extend_from_slice(&[0; 14]);
    auxiliary.extend_from_slice(&hex!("24 C9 00"));
    rom.write_bytes(SpcBank::Expanded.rom_offset(), &chain(&[(0xD000, &expanded)]))
        .unwrap();
    rom.write_bytes(SpcBank::Auxiliary.rom_offset(), &chain(&[(0x2B00, &auxiliary)]))
        .unwrap();
    rom
}

#[test]
fn missing_bank_is_isolated() {
    let mut rom = test_rom(false);
    rom.write_bytes(Bank::Credits.rom_offset(), &[0; 16]).unwrap();
    let mut music = loaded(&rom);
    assert_eq!(music.songs().len(), 35);
    assert_eq!(music.table_song_count(Bank::Credits), 0);
    assert_eq!(music.table_song_count(Bank::Overworld), 13);
    for index in 31..34 {
        let song = music.song(index).unwrap();
        assert_eq!(song.bank, Bank::Credits);
        assert_eq!(song.rom_address, 0);
        assert_eq!(Some(song.name.as_str()), bank::vanilla_song_name(index + 1));
    }
    assert_eq!(music.song(34).unwrap().rom_address, SONG_B);
    assert_eq!(music.instruments().len(), INSTRUMENT_NAMES.len());
    assert_eq!(music.samples().len(), 1);

    music.create_new_song("Finale", Bank::Credits);
    music.save_to_rom(&mut rom).unwrap();
    let reloaded = loaded(&rom);
    assert_eq!(reloaded.songs().len(), 36);
    assert_eq!(reloaded.table_song_count(Bank::Credits), 5);
    assert_eq!(reloaded.song(35).unwrap().bank, Bank::Credits);
}

#[test]
fn moved_song_leaves_old_bank() {
    let mut rom = test_rom(false);
    let mut music = loaded(&rom);
    let index = music.create_new_song("Wanderer", Bank::Dungeon);
    music.save_to_rom(&mut rom).unwrap();

    let mut music = loaded(&rom);
    assert_eq!(music.song(index).unwrap().bank, Bank::Dungeon);
    music.song_mut(index).unwrap().bank = Bank::Overworld;
    assert_eq!(
        music.dirty_banks().into_iter().collect::<Vec<_>>(),
        [Bank::Overworld, Bank::Dungeon]
    );
    music.save_to_rom(&mut rom).unwrap();

    let reloaded = loaded(&rom);
    assert_eq!(reloaded.songs().len(), 36);
    assert_eq!(reloaded.songs_in_bank(Bank::Dungeon).len(), 20);
    assert_eq!(reloaded.songs_in_bank(Bank::Overworld).len(), 13);
    assert_eq!(reloaded.table_song_count(Bank::Dungeon), 21);
}

#[test]
fn expanded_banks() {
    let mut rom = expanded_rom();
    let mut music = loaded(&rom);
    let info = music.expanded_info();
    assert!(info.detected);
    assert_eq!(info.hook_address, 0x1A8000);
    assert_eq!(music.songs().len(), 37);
    assert!(!music.is_expanded_song(34));

    let expanded = music.song(35).unwrap();
    assert_eq!(expanded.name, "Expanded Song 1");
    assert_eq!(expanded.bank, Bank::OverworldExpanded);
    assert_eq!(expanded.rom_address, 0xD004);
    assert_eq!(expanded.duration_ticks(), 0x48);
    let auxiliary = music.song(36).unwrap();
    assert_eq!(auxiliary.name, "Auxiliary Song 1");
    assert_eq!(auxiliary.bank, Bank::Auxiliary);
    assert_eq!(auxiliary.rom_address, 0x2B04);
    assert!(music.is_expanded_song(35) && music.is_expanded_song(36));
    assert_eq!(music.table_song_count(Bank::OverworldExpanded), 1);
    assert_eq!(music.table_song_count(Bank::Auxiliary), 1);

    let mut emitted = DurationCursor::default();
    let cursor = DurationCursor {
        duration: 0x30,
        velocity: 0,
    };
    music.song_mut(36).unwrap().segments[0].tracks[1] = MusicTrack::with_events(vec![
        TrackEvent::Note(cursor.note(0xB0, &mut emitted)),
        TrackEvent::End,
    ]);
    music.song_mut(35).unwrap();
    let overworld_before = rom
        .read_bytes(Bank::Overworld.rom_offset(), 0x80)
        .unwrap()
        .to_vec();
    music.save_to_rom(&mut rom).unwrap();
    assert_eq!(
        rom.read_bytes(Bank::Overworld.rom_offset(), 0x80).unwrap(),
        overworld_before
    );
    assert_eq!(
        rom.read_bytes(Bank::Auxiliary.rom_offset(), 4).unwrap(),
        hex!("1E 00 00 2B")
    );

    let reloaded = loaded(&rom);
    assert_eq!(reloaded.songs().len(), 37);
    for index in [35, 36] {
        let before = music.song(index).unwrap();
        let after = reloaded.song(index).unwrap();
        assert_eq!(after.segments, before.segments, "song {index}");
        assert_eq!(after.bank, before.bank);
        assert_eq!(after.rom_address, before.rom_address);
    }
    assert_eq!(reloaded.song(36).unwrap().duration_ticks(), 0x30);
    assert_eq!(reloaded.table_song_count(Bank::Auxiliary), 1);
}
