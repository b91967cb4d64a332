use crate::{
    compression::brr,
    error::{MusicError, Result},
    parser::{self, ParseOptions},
    rom::{self, LoRomPointerRegs, Rom},
    serializer,
    song::{MusicInstrument, MusicSample, MusicSong},
    spc::{self, BlockHeader, SpcBank},
    wav::Wav,
};
use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    io::Cursor,
    ops::RangeInclusive,
    path::Path,
};

pub const VANILLA_SONG_COUNT: usize = 34;
pub const VANILLA_INSTRUMENT_COUNT: usize = 25;
pub const INSTRUMENT_ENTRY_SIZE: usize = 6;
pub const MAX_SAMPLES: usize = 64;
/// Longest song table looked at when searching for custom slots.
pub const MAX_TABLE_ENTRIES: usize = 64;
pub const MAX_EXPANDED_SONGS: usize = 16;

pub const EXPANDED_MUSIC_HOOK: usize = 0x008919;
/// Song data may not extend past the top of the 64 KiB ARAM.
const ARAM_SIZE: usize = 0x10000;
const JSL_OPCODE: u8 = 0x22;

const VANILLA_SONGS: [(&str, Bank); VANILLA_SONG_COUNT] = [
    ("Title", Bank::Overworld),
    ("Light World", Bank::Overworld),
    ("Beginning", Bank::Overworld),
    ("Rabbit", Bank::Overworld),
    ("Forest", Bank::Overworld),
    ("Intro", Bank::Overworld),
    ("Town", Bank::Overworld),
    ("Warp", Bank::Overworld),
    ("Dark World", Bank::Overworld),
    ("Master Sword", Bank::Overworld),
    ("File Select", Bank::Overworld),
    ("Soldier", Bank::Dungeon),
    ("Mountain", Bank::Dungeon),
    ("Shop", Bank::Dungeon),
    ("Fanfare", Bank::Dungeon),
    ("Castle", Bank::Dungeon),
    ("Palace (Pendant)", Bank::Dungeon),
    ("Cave", Bank::Dungeon),
    ("Clear", Bank::Dungeon),
    ("Church", Bank::Dungeon),
    ("Boss", Bank::Dungeon),
    ("Dungeon (Crystal)", Bank::Dungeon),
    ("Psychic", Bank::Dungeon),
    ("Secret Way", Bank::Dungeon),
    ("Rescue", Bank::Dungeon),
    ("Crystal", Bank::Dungeon),
    ("Fountain", Bank::Dungeon),
    ("Pyramid", Bank::Dungeon),
    ("Kill Agahnim", Bank::Dungeon),
    ("Ganon Room", Bank::Dungeon),
    ("Last Boss", Bank::Dungeon),
    ("Credits 1", Bank::Credits),
    ("Credits 2", Bank::Credits),
    ("Credits 3", Bank::Credits),
];

pub const INSTRUMENT_NAMES: [&str; VANILLA_INSTRUMENT_COUNT] = [
    "Noise",
    "Rain",
    "Timpani",
    "Square wave",
    "Saw wave",
    "Clink",
    "Wobbly lead",
    "Compound saw",
    "Tweet",
    "Strings A",
    "Strings B",
    "Trombone",
    "Cymbal",
    "Ocarina",
    "Chimes",
    "Harp",
    "Splash",
    "Trumpet",
    "Horn",
    "Snare A",
    "Snare B",
    "Choir",
    "Flute",
    "Oof",
    "Piano",
];

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Bank {
    Overworld,
    Dungeon,
    Credits,
    OverworldExpanded,
    Auxiliary,
}

impl Bank {
    pub const ALL: [Bank; 5] = [
        Self::Overworld,
        Self::Dungeon,
        Self::Credits,
        Self::OverworldExpanded,
        Self::Auxiliary,
    ];

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::Overworld => "Overworld",
            Self::Dungeon => "Dungeon",
            Self::Credits => "Credits",
            Self::OverworldExpanded => "Expanded",
            Self::Auxiliary => "Auxiliary",
        }
    }
    #[inline]
    pub fn spc_bank(self) -> SpcBank {
        match self {
            Self::Overworld => SpcBank::Overworld,
            Self::Dungeon => SpcBank::Dungeon,
            Self::Credits => SpcBank::Credits,
            Self::OverworldExpanded => SpcBank::Expanded,
            Self::Auxiliary => SpcBank::Auxiliary,
        }
    }
    /// Headerless PC offset the bank's song block is stored at.
    #[inline]
    pub fn rom_offset(self) -> usize {
        self.spc_bank().rom_offset()
    }
    #[inline]
    pub fn default_max_size(self) -> usize {
        match self {
            Self::Overworld => 12032,
            Self::Dungeon => 11200,
            Self::Credits => 4200,
            Self::OverworldExpanded => 0x2DAE,
            Self::Auxiliary => 0x0688,
        }
    }
    /// ARAM address of the bank's song pointer table.
    #[inline]
    pub fn song_table_address(self) -> u16 {
        match self {
            Self::Auxiliary => spc::AUX_SONG_TABLE_ARAM,
            _ => spc::SONG_TABLE_ARAM,
        }
    }
    /// 1-based ids of the vanilla songs stored in this bank.
    pub fn song_range(self) -> Option<RangeInclusive<usize>> {
        match self {
            Self::Overworld => Some(1..=11),
            Self::Dungeon => Some(12..=31),
            Self::Credits => Some(32..=34),
            Self::OverworldExpanded | Self::Auxiliary => None,
        }
    }
    #[inline]
    fn vanilla_slots(self) -> usize {
        self.song_range().map_or(0, |r| r.count())
    }
    #[inline]
    fn pointer_regs(self) -> Option<LoRomPointerRegs> {
        match self {
            Self::Overworld => Some(rom::OVERWORLD_POINTER_REGS),
            Self::Credits => Some(rom::CREDITS_POINTER_REGS),
            _ => None,
        }
    }
}

impl std::fmt::Display for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
pub fn is_vanilla(index: usize) -> bool {
    index < VANILLA_SONG_COUNT
}

#[inline]
pub fn vanilla_song_name(id: usize) -> Option<&'static str> {
    id.checked_sub(1)
        .and_then(|i| VANILLA_SONGS.get(i))
        .map(|(name, _)| *name)
}

#[inline]
pub fn vanilla_song_bank(id: usize) -> Option<Bank> {
    id.checked_sub(1)
        .and_then(|i| VANILLA_SONGS.get(i))
        .map(|(_, bank)| *bank)
}

#[binrw::binrw]
#[brw(big)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct InstrumentEntry {
    sample_index: u8,
    ad: u8,
    sr: u8,
    gain: u8,
    pitch_mult: u16,
}

impl InstrumentEntry {
    fn to_instrument(self, name: &str) -> MusicInstrument {
        let mut inst = MusicInstrument {
            name: name.into(),
            sample_index: self.sample_index,
            gain: self.gain,
            pitch_mult: self.pitch_mult,
            ..Default::default()
        };
        inst.set_from_bytes(self.ad, self.sr);
        inst
    }
    fn from_instrument(inst: &MusicInstrument) -> Self {
        Self {
            sample_index: inst.sample_index,
            ad: inst.ad_byte(),
            sr: inst.sr_byte(),
            gain: inst.gain,
            pitch_mult: inst.pitch_mult,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExpandedBankInfo {
    pub detected: bool,
    /// 24-bit SNES address the hook jumps to.
    pub hook_address: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpaceInfo {
    pub total_bytes: usize,
    pub used_bytes: usize,
    pub free_bytes: i64,
    pub usage_percent: f32,
    pub is_warning: bool,
    pub is_critical: bool,
    pub recommendation: Option<&'static str>,
    /// Songs left out of `used_bytes` because they cannot be encoded.
    pub unencodable_songs: usize,
}

#[derive(Clone, Debug, Default)]
pub struct MusicBankConfig {
    /// Capacity overrides, in bytes.
    pub bank_limits: HashMap<Bank, usize>,
    pub parse_options: ParseOptions,
}

impl MusicBankConfig {
    pub fn with_limit(mut self, bank: Bank, bytes: usize) -> Self {
        self.bank_limits.insert(bank, bytes);
        self
    }
    #[inline]
    pub fn bank_limit(&self, bank: Bank) -> usize {
        self.bank_limits
            .get(&bank)
            .copied()
            .unwrap_or_else(|| bank.default_max_size())
    }
}

/// Where a sample was found in the image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct SampleSlot {
    directory_offset: usize,
    rom_offset: usize,
    aram_start: u16,
    capacity: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct MusicBankState {
    songs: Vec<MusicSong>,
    instruments: Vec<MusicInstrument>,
    samples: Vec<MusicSample>,
    #[serde(default)]
    overworld_song_count: usize,
    #[serde(default)]
    dungeon_song_count: usize,
    #[serde(default)]
    credits_song_count: usize,
    #[serde(default)]
    expanded_song_count: usize,
    #[serde(default)]
    auxiliary_song_count: usize,
}

/// All music of a ROM: songs of every bank, the instrument table and the
/// sample directory.
#[derive(Clone, Debug, Default)]
pub struct MusicBank {
    config: MusicBankConfig,
    state: MusicBankState,
    loaded: bool,
    expanded: ExpandedBankInfo,
    dirty_banks: BTreeSet<Bank>,
    instruments_modified: bool,
    modified_samples: BTreeSet<usize>,
    sample_slots: Vec<Option<SampleSlot>>,
}

impl MusicBank {
    pub fn new(config: MusicBankConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }
    #[inline]
    pub fn config(&self) -> &MusicBankConfig {
        &self.config
    }
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
    #[inline]
    pub fn expanded_info(&self) -> ExpandedBankInfo {
        self.expanded
    }
    #[inline]
    pub fn songs(&self) -> &[MusicSong] {
        &self.state.songs
    }
    #[inline]
    pub fn instruments(&self) -> &[MusicInstrument] {
        &self.state.instruments
    }
    #[inline]
    pub fn samples(&self) -> &[MusicSample] {
        &self.state.samples
    }
    /// Number of pointer table slots found in `bank` when it was loaded.
    pub fn table_song_count(&self, bank: Bank) -> usize {
        match bank {
            Bank::Overworld => self.state.overworld_song_count,
            Bank::Dungeon => self.state.dungeon_song_count,
            Bank::Credits => self.state.credits_song_count,
            Bank::OverworldExpanded => self.state.expanded_song_count,
            Bank::Auxiliary => self.state.auxiliary_song_count,
        }
    }
    fn set_table_song_count(&mut self, bank: Bank, count: usize) {
        *match bank {
            Bank::Overworld => &mut self.state.overworld_song_count,
            Bank::Dungeon => &mut self.state.dungeon_song_count,
            Bank::Credits => &mut self.state.credits_song_count,
            Bank::OverworldExpanded => &mut self.state.expanded_song_count,
            Bank::Auxiliary => &mut self.state.auxiliary_song_count,
        } = count;
    }

    pub fn load_from_rom(&mut self, rom: &Rom) -> Result<()> {
        if !rom.is_loaded() {
            return Err(MusicError::RomNotLoaded);
        }
        self.state = MusicBankState::default();
        self.dirty_banks.clear();
        self.instruments_modified = false;
        self.modified_samples.clear();
        self.sample_slots.clear();
        self.expanded = detect_expanded_patch(rom);

        let mut custom = Vec::new();
        for bank in [Bank::Overworld, Bank::Dungeon, Bank::Credits] {
            self.load_song_table(rom, bank, &mut custom);
        }
        if self.expanded.detected {
            log::info!(
                "Expanded music patch detected (hook ${:06X})",
                self.expanded.hook_address
            );
            for bank in [Bank::OverworldExpanded, Bank::Auxiliary] {
                self.load_extra_table(rom, bank, &mut custom);
            }
        }
        self.state.songs.append(&mut custom);

        self.load_instruments(rom)?;
        self.load_samples(rom)?;
        self.loaded = true;
        log::info!(
            "Loaded {} songs, {} instruments, {} samples",
            self.state.songs.len(),
            self.state.instruments.len(),
            self.state.samples.len()
        );
        Ok(())
    }

    fn parse_or_placeholder(&self, rom: &Rom, address: u16, bank: Bank, name: String) -> MusicSong {
        let mut song = if address == 0 {
            MusicSong::new("", bank)
        } else {
            parser::parse_song(rom, address, bank, self.config.parse_options).unwrap_or_else(|e| {
                log::warn!("Failed to parse song '{name}' at ${address:04X} ({bank}): {e}");
                let mut song = MusicSong::new("", bank);
                song.rom_address = address;
                song
            })
        };
        song.name = name;
        song.modified = false;
        song
    }

    /// An unreadable table leaves the bank's vanilla slots as placeholders.
    fn load_song_table(&mut self, rom: &Rom, bank: Bank, custom: &mut Vec<MusicSong>) {
        let table_address = bank.song_table_address();
        let entries =
            spc::read_song_pointer_table(rom, table_address, bank.spc_bank(), MAX_TABLE_ENTRIES)
                .unwrap_or_else(|e| {
                    log::warn!("Failed to read {bank} song table: {e}");
                    Vec::new()
                });
        let len = table_len(&entries, table_address);
        let range = bank.song_range().unwrap_or(1..=0);

        for (slot, id) in range.enumerate() {
            let address = entries[..len].get(slot).copied().unwrap_or(0);
            let name = vanilla_song_name(id).unwrap_or("Unknown").to_string();
            let song = self.parse_or_placeholder(rom, address, bank, name);
            self.state.songs.push(song);
        }
        let customs = entries[..len]
            .iter()
            .skip(bank.vanilla_slots())
            .take_while(|a| **a != 0);
        for &address in customs {
            let name = format!("Custom Song {}", custom.len() + 1);
            custom.push(self.parse_or_placeholder(rom, address, bank, name));
        }
        self.set_table_song_count(bank, len);
        log::debug!("{bank} song table: {len} slots");
    }

    fn load_extra_table(&mut self, rom: &Rom, bank: Bank, custom: &mut Vec<MusicSong>) {
        let table_address = bank.song_table_address();
        let header = rom
            .read_bytes(rom.pc(bank.rom_offset()), 4)
            .ok()
            .and_then(|b| BlockHeader::read(&mut Cursor::new(b)).ok());
        match header {
            Some(h)
                if h.aram_address == table_address
                    && h.size != 0
                    && h.size as usize <= self.config.bank_limit(bank) => {}
            _ => {
                log::debug!("No {bank} song block found");
                return;
            }
        }
        let entries = match spc::read_song_pointer_table(
            rom,
            table_address,
            bank.spc_bank(),
            MAX_EXPANDED_SONGS,
        ) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Failed to read {bank} song table: {e}");
                return;
            }
        };
        let len = table_len(&entries, table_address);
        let mut n = 0;
        for &address in entries[..len].iter().filter(|a| **a != 0) {
            n += 1;
            let name = format!("{} Song {n}", bank.name());
            custom.push(self.parse_or_placeholder(rom, address, bank, name));
        }
        self.set_table_song_count(bank, n);
    }

    fn load_instruments(&mut self, rom: &Rom) -> Result<()> {
        let data = spc::require_spc_data(rom, spc::INSTRUMENT_TABLE_ARAM, SpcBank::Common)?;
        let table = data
            .get(..VANILLA_INSTRUMENT_COUNT * INSTRUMENT_ENTRY_SIZE)
            .ok_or_else(|| MusicError::malformed("instrument table is truncated"))?;
        let mut r = Cursor::new(table);
        for name in INSTRUMENT_NAMES {
            let entry = InstrumentEntry::read(&mut r).map_err(MusicError::malformed)?;
            self.state.instruments.push(entry.to_instrument(name));
        }
        Ok(())
    }

    fn load_samples(&mut self, rom: &Rom) -> Result<()> {
        let dir_offset = spc::spc_address_to_rom_offset(rom, spc::SAMPLE_DIRECTORY_ARAM, SpcBank::Common)
            .ok_or(MusicError::AddressNotFound {
                address: spc::SAMPLE_DIRECTORY_ARAM,
                bank: SpcBank::Common.id(),
            })?;
        let dir = spc::require_spc_data(rom, spc::SAMPLE_DIRECTORY_ARAM, SpcBank::Common)?;
        for (i, entry) in dir.chunks_exact(4).take(MAX_SAMPLES).enumerate() {
            let start = u16::from_le_bytes([entry[0], entry[1]]);
            let loop_addr = u16::from_le_bytes([entry[2], entry[3]]);
            let mut sample = MusicSample {
                name: format!("Sample {i:02X}"),
                ..Default::default()
            };
            let slot = (start != 0)
                .then(|| spc::spc_address_to_rom_offset(rom, start, SpcBank::Common))
                .flatten();
            let Some(rom_offset) = slot else {
                self.state.samples.push(sample);
                self.sample_slots.push(None);
                continue;
            };
            let data = spc::get_spc_data(rom, start, SpcBank::Common).unwrap_or_default();
            let len = brr::brr_length(data)
                .unwrap_or(data.len() / brr::BLOCK_SIZE * brr::BLOCK_SIZE);
            sample.brr_data = data[..len].to_vec();
            let mut decoded_loop = None;
            sample.pcm_data = brr::decode_brr(&sample.brr_data, &mut decoded_loop);
            sample.loops = decoded_loop.is_some();
            sample.loop_point = loop_addr
                .checked_sub(start)
                .map_or(0, |d| d as usize / brr::BLOCK_SIZE * brr::SAMPLES_PER_BLOCK);
            self.state.samples.push(sample);
            self.sample_slots.push(Some(SampleSlot {
                directory_offset: dir_offset + i * 4,
                rom_offset,
                aram_start: start,
                capacity: len,
            }));
        }
        Ok(())
    }

    fn bank_payload_size(&self, bank: Bank) -> Result<usize> {
        let songs = self.songs_in_bank(bank);
        let mut total = (songs.len() + 1) * 2;
        for song in songs {
            total += serializer::calculate_required_space(song)?;
        }
        Ok(total)
    }

    /// Banks holding new, modified or deleted songs.
    pub fn dirty_banks(&self) -> BTreeSet<Bank> {
        let mut dirty = self.dirty_banks.clone();
        dirty.extend(self.state.songs.iter().filter(|s| s.modified).map(|s| s.bank));
        dirty
    }

    #[inline]
    pub fn has_modifications(&self) -> bool {
        self.instruments_modified || !self.modified_samples.is_empty() || !self.dirty_banks().is_empty()
    }

    pub fn save_to_rom(&mut self, rom: &mut Rom) -> Result<()> {
        if !self.loaded {
            return Err(MusicError::NotLoaded);
        }
        if !rom.is_loaded() {
            return Err(MusicError::RomNotLoaded);
        }
        let dirty = self.dirty_banks();
        for &bank in &dirty {
            let needed = self.bank_payload_size(bank)?;
            let limit = self
                .config
                .bank_limit(bank)
                .min(ARAM_SIZE - bank.song_table_address() as usize);
            if needed > limit {
                return Err(MusicError::BankOverflow {
                    bank: bank.name(),
                    needed,
                    limit,
                });
            }
        }
        for &i in &self.modified_samples {
            if let (Some(Some(slot)), Some(sample)) = (self.sample_slots.get(i), self.state.samples.get(i)) {
                if sample.brr_data.len() > slot.capacity {
                    return Err(MusicError::BankOverflow {
                        bank: "sample slot",
                        needed: sample.brr_data.len(),
                        limit: slot.capacity,
                    });
                }
            }
        }

        for &bank in &dirty {
            self.save_song_table(rom, bank)?;
        }
        if self.instruments_modified {
            self.save_instruments(rom)?;
        }
        self.save_samples(rom)?;

        self.dirty_banks.clear();
        self.instruments_modified = false;
        self.modified_samples.clear();
        for song in &mut self.state.songs {
            song.modified = false;
        }
        Ok(())
    }

    fn save_song_table(&mut self, rom: &mut Rom, bank: Bank) -> Result<()> {
        let base = bank.song_table_address();
        let count = self.state.songs.iter().filter(|s| s.bank == bank).count();
        let mut table = Vec::with_capacity((count + 1) * 2);
        let mut body = Vec::new();
        let mut addr = base as usize + (count + 1) * 2;
        let overflow = |end: usize| MusicError::BankOverflow {
            bank: bank.name(),
            needed: end - base as usize,
            limit: ARAM_SIZE - base as usize,
        };
        for song in self.state.songs.iter_mut().filter(|s| s.bank == bank) {
            let song_base = u16::try_from(addr).map_err(|_| overflow(addr))?;
            let serialized = serializer::serialize_song(song, song_base)?;
            if addr + serialized.data.len() > ARAM_SIZE {
                return Err(overflow(addr + serialized.data.len()));
            }
            table.extend_from_slice(&song_base.to_le_bytes());
            body.extend_from_slice(&serialized.data);
            song.rom_address = song_base;
            addr += serialized.data.len();
        }
        table.extend_from_slice(&[0, 0]);
        table.append(&mut body);

        let mut block = Cursor::new(Vec::with_capacity(table.len() + 8));
        BlockHeader {
            size: table.len() as u16,
            aram_address: base,
        }
        .write(&mut block)
        .map_err(MusicError::malformed)?;
        let mut block = block.into_inner();
        block.extend_from_slice(&table);
        block.extend_from_slice(&[0, 0, 0, 0]);
        rom.write_bytes(rom.pc(bank.rom_offset()), &block)?;

        if let Some(regs) = bank.pointer_regs() {
            rom::write_lorom_pointer(rom, regs, bank.rom_offset() as u32)?;
        }
        self.set_table_song_count(bank, count + 1);
        log::info!("Saved {count} songs to the {bank} bank ({} bytes)", table.len());
        Ok(())
    }

    fn save_instruments(&self, rom: &mut Rom) -> Result<()> {
        let offset =
            spc::spc_address_to_rom_offset(rom, spc::INSTRUMENT_TABLE_ARAM, SpcBank::Common).ok_or(
                MusicError::AddressNotFound {
                    address: spc::INSTRUMENT_TABLE_ARAM,
                    bank: SpcBank::Common.id(),
                },
            )?;
        if self.state.instruments.len() > VANILLA_INSTRUMENT_COUNT {
            log::warn!(
                "Only the first {VANILLA_INSTRUMENT_COUNT} of {} instruments fit the instrument table",
                self.state.instruments.len()
            );
        }
        let mut out = Cursor::new(Vec::new());
        for inst in self.state.instruments.iter().take(VANILLA_INSTRUMENT_COUNT) {
            InstrumentEntry::from_instrument(inst)
                .write(&mut out)
                .map_err(MusicError::malformed)?;
        }
        rom.write_bytes(offset, out.get_ref())
    }

    fn save_samples(&self, rom: &mut Rom) -> Result<()> {
        for &i in &self.modified_samples {
            let (Some(sample), Some(Some(slot))) = (self.state.samples.get(i), self.sample_slots.get(i)) else {
                log::warn!("Sample {i} has no slot in the sample directory and was not written");
                continue;
            };
            rom.write_bytes(slot.rom_offset, &sample.brr_data)?;
            let loop_block = if sample.loops {
                sample.loop_point / brr::SAMPLES_PER_BLOCK
            } else {
                0
            };
            let loop_addr = slot
                .aram_start
                .wrapping_add((loop_block * brr::BLOCK_SIZE) as u16);
            rom.write_bytes(slot.directory_offset + 2, &loop_addr.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn calculate_space_usage(&self, bank: Bank) -> SpaceInfo {
        let total_bytes = self.config.bank_limit(bank);
        let mut used_bytes = 0;
        let mut unencodable_songs = 0;
        for song in self.songs_in_bank(bank) {
            match serializer::calculate_required_space(song) {
                Ok(size) => used_bytes += size,
                Err(e) => {
                    log::warn!("Cannot size song '{}': {e}", song.name);
                    unencodable_songs += 1;
                }
            }
        }
        let usage_percent = if total_bytes > 0 {
            100.0 * used_bytes as f32 / total_bytes as f32
        } else {
            0.0
        };
        let is_critical = usage_percent > 90.0 || unencodable_songs > 0;
        let is_warning = usage_percent > 75.0 || is_critical;
        let recommendation = if unencodable_songs > 0 {
            Some("Fix songs that cannot be encoded")
        } else if is_critical {
            Some(match bank {
                Bank::Overworld if self.expanded.detected => "Move songs to Expanded bank",
                Bank::OverworldExpanded => "Move songs to Auxiliary bank",
                _ => "Remove or shorten songs",
            })
        } else if is_warning {
            Some("Approaching bank limit")
        } else {
            None
        };
        SpaceInfo {
            total_bytes,
            used_bytes,
            free_bytes: total_bytes as i64 - used_bytes as i64,
            usage_percent,
            is_warning,
            is_critical,
            recommendation,
            unencodable_songs,
        }
    }

    pub fn create_new_song(&mut self, name: impl Into<String>, bank: Bank) -> usize {
        let mut song = MusicSong::new(name, bank);
        song.modified = true;
        self.state.songs.push(song);
        self.state.songs.len() - 1
    }

    /// Appends an already built song, marking its bank for saving.
    pub fn add_song(&mut self, mut song: MusicSong) -> usize {
        song.modified = true;
        self.state.songs.push(song);
        self.state.songs.len() - 1
    }

    pub fn duplicate_song(&mut self, index: usize) -> Result<usize> {
        let mut song = self.song(index)?.clone();
        song.name.push_str(" (Copy)");
        Ok(self.add_song(song))
    }

    pub fn delete_song(&mut self, index: usize) -> Result<MusicSong> {
        self.song(index)?;
        if is_vanilla(index) {
            return Err(MusicError::VanillaProtected(index));
        }
        let song = self.state.songs.remove(index);
        self.dirty_banks.insert(song.bank);
        Ok(song)
    }

    pub fn song(&self, index: usize) -> Result<&MusicSong> {
        self.state
            .songs
            .get(index)
            .ok_or(MusicError::InvalidIndex { what: "song", index })
    }

    /// Mutable access marks the song as modified.
    pub fn song_mut(&mut self, index: usize) -> Result<&mut MusicSong> {
        let song = self
            .state
            .songs
            .get_mut(index)
            .ok_or(MusicError::InvalidIndex { what: "song", index })?;
        song.modified = true;
        // the caller may move the song to another bank
        self.dirty_banks.insert(song.bank);
        Ok(song)
    }

    /// Looks a song up by its 1-based id.
    pub fn song_by_id(&self, id: usize) -> Option<&MusicSong> {
        id.checked_sub(1).and_then(|i| self.state.songs.get(i))
    }

    pub fn songs_in_bank(&self, bank: Bank) -> Vec<&MusicSong> {
        self.state.songs.iter().filter(|s| s.bank == bank).collect()
    }

    pub fn is_expanded_song(&self, index: usize) -> bool {
        self.state
            .songs
            .get(index)
            .is_some_and(|s| matches!(s.bank, Bank::OverworldExpanded | Bank::Auxiliary))
    }

    pub fn instrument(&self, index: usize) -> Result<&MusicInstrument> {
        self.state.instruments.get(index).ok_or(MusicError::InvalidIndex {
            what: "instrument",
            index,
        })
    }

    pub fn instrument_mut(&mut self, index: usize) -> Result<&mut MusicInstrument> {
        let inst = self
            .state
            .instruments
            .get_mut(index)
            .ok_or(MusicError::InvalidIndex {
                what: "instrument",
                index,
            })?;
        self.instruments_modified = true;
        Ok(inst)
    }

    pub fn create_new_instrument(&mut self, name: impl Into<String>) -> usize {
        self.state.instruments.push(MusicInstrument {
            name: name.into(),
            sample_index: 0,
            attack: 15,
            decay: 7,
            sustain_level: 7,
            sustain_rate: 0,
            gain: 0,
            pitch_mult: 0x1000,
        });
        self.instruments_modified = true;
        self.state.instruments.len() - 1
    }

    pub fn sample(&self, index: usize) -> Result<&MusicSample> {
        self.state
            .samples
            .get(index)
            .ok_or(MusicError::InvalidIndex { what: "sample", index })
    }

    pub fn sample_mut(&mut self, index: usize) -> Result<&mut MusicSample> {
        let sample = self
            .state
            .samples
            .get_mut(index)
            .ok_or(MusicError::InvalidIndex { what: "sample", index })?;
        self.modified_samples.insert(index);
        Ok(sample)
    }

    /// Encodes WAV data to BRR and appends it as a new sample.
    pub fn import_sample_from_wav_data(&mut self, data: &[u8], name: impl Into<String>) -> Result<usize> {
        let sample = sample_from_wav(name.into(), Wav::read_file(data)?);
        self.state.samples.push(sample);
        self.sample_slots.push(None);
        let index = self.state.samples.len() - 1;
        self.modified_samples.insert(index);
        Ok(index)
    }

    /// Re-encodes an existing sample from WAV data, keeping its name and slot.
    pub fn replace_sample_from_wav_data(&mut self, index: usize, data: &[u8]) -> Result<()> {
        let wav = Wav::read_file(data)?;
        let sample = self.sample_mut(index)?;
        *sample = sample_from_wav(std::mem::take(&mut sample.name), wav);
        Ok(())
    }

    pub fn import_sample_from_wav(&mut self, path: impl AsRef<Path>, name: impl Into<String>) -> Result<usize> {
        let data = std::fs::read(path)?;
        self.import_sample_from_wav_data(&data, name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.state)?)
    }

    /// Replaces the bank contents with a previously saved JSON state.
    pub fn load_from_json(&mut self, json: &str) -> Result<()> {
        let state: MusicBankState = serde_json::from_str(json)?;
        self.sample_slots = vec![None; state.samples.len()];
        self.state = state;
        self.dirty_banks.clear();
        self.instruments_modified = false;
        self.modified_samples.clear();
        self.loaded = true;
        Ok(())
    }
}

fn sample_from_wav(name: String, wav: Wav) -> MusicSample {
    if wav.sample_rate != crate::wav::DSP_SAMPLE_RATE {
        log::warn!(
            "Sample rate {} Hz of `{name}` differs from the DSP rate; pitch will need adjusting",
            wav.sample_rate
        );
    }
    let loop_start = wav.loop_start.map(|s| s as usize);
    MusicSample {
        brr_data: brr::encode_brr(&wav.samples, loop_start),
        loop_point: loop_start.map_or(0, |s| s / brr::SAMPLES_PER_BLOCK * brr::SAMPLES_PER_BLOCK),
        loops: loop_start.is_some(),
        pcm_data: wav.samples,
        name,
    }
}

/// Number of table words before the table would overlap the lowest song
/// it points to.
fn table_len(entries: &[u16], table_address: u16) -> usize {
    let mut lowest = u16::MAX as usize + 1;
    for (i, &e) in entries.iter().enumerate() {
        if table_address as usize + i * 2 >= lowest {
            return i;
        }
        if e != 0 && (e as usize) > table_address as usize {
            lowest = lowest.min(e as usize);
        }
    }
    entries.len()
}

/// Looks for the JSL that replaces the overworld song loader in the expanded
/// music patch.
pub fn detect_expanded_patch(rom: &Rom) -> ExpandedBankInfo {
    let Ok(hook) = rom.read_bytes(rom.pc(EXPANDED_MUSIC_HOOK), 4) else {
        return ExpandedBankInfo::default();
    };
    if hook[0] != JSL_OPCODE {
        return ExpandedBankInfo::default();
    }
    let target = u32::from_le_bytes([hook[1], hook[2], hook[3], 0]);
    if (0x40..=0x7F).contains(&hook[3]) {
        return ExpandedBankInfo::default();
    }
    ExpandedBankInfo {
        detected: true,
        hook_address: target,
    }
}
