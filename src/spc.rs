use crate::{
    error::{MusicError, Result},
    rom::Rom,
};
use nom::{
    bytes::complete::take,
    error::ParseError,
    number::complete::le_u16,
    IResult, Offset,
};

/// Upper bound on the number of blocks followed in one chain.
pub const MAX_BLOCKS: usize = 1000;

/// ARAM address every song table is uploaded to.
pub const SONG_TABLE_ARAM: u16 = 0xD000;
pub const AUX_SONG_TABLE_ARAM: u16 = 0x2B00;
pub const INSTRUMENT_TABLE_ARAM: u16 = 0x3D00;
pub const SAMPLE_DIRECTORY_ARAM: u16 = 0x3C00;
pub const SAMPLE_DATA_ARAM: u16 = 0x4000;

/// A region of ROM holding a chain of `[size:2][aram:2][data]` upload blocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SpcBank {
    Common,
    Overworld,
    Dungeon,
    Credits,
    Expanded,
    Auxiliary,
}

impl SpcBank {
    /// Headerless PC offset of the first block of the chain.
    #[inline]
    pub fn rom_offset(self) -> usize {
        match self {
            Self::Common => 0xC8000,
            Self::Overworld => 0xD1EF5,
            Self::Dungeon => 0xD8000,
            Self::Credits => 0xD5380,
            Self::Expanded => 0x1A9EF5,
            Self::Auxiliary => 0x1ACCA7,
        }
    }
    #[inline]
    pub fn id(self) -> u8 {
        match self {
            Self::Common => 0,
            Self::Overworld => 1,
            Self::Dungeon => 2,
            Self::Credits => 3,
            Self::Expanded => 4,
            Self::Auxiliary => 5,
        }
    }
}

/// Upload block header as stored in ROM.
#[binrw::binrw]
#[brw(little)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub size: u16,
    pub aram_address: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpcBlock {
    /// Image offset of the first data byte.
    pub rom_offset: usize,
    pub aram_address: u16,
    pub size: usize,
}

impl SpcBlock {
    #[inline]
    pub fn contains(&self, aram: u16) -> bool {
        let start = self.aram_address as usize;
        (start..start + self.size).contains(&(aram as usize))
    }
}

fn spc_block<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], (u16, &'a [u8]), E> {
    let (input, size) = le_u16(input)?;
    if size == 0 {
        return Err(crate::nom_fail(input));
    }
    let (input, aram) = le_u16(input)?;
    let (input, data) = take(size)(input)?;
    Ok((input, (aram, data)))
}

/// Follows the block chain of `bank` until a zero size, a truncated block or
/// `MAX_BLOCKS`.
pub fn scan_blocks(rom: &Rom, bank: SpcBank) -> Vec<SpcBlock> {
    let image = rom.data();
    let start = rom.pc(bank.rom_offset());
    let Some(mut input) = image.get(start..) else {
        return Vec::new();
    };
    let mut blocks = Vec::new();
    while blocks.len() < MAX_BLOCKS {
        match spc_block::<nom::error::Error<_>>(input) {
            Ok((rest, (aram_address, data))) => {
                blocks.push(SpcBlock {
                    rom_offset: image.offset(data),
                    aram_address,
                    size: data.len(),
                });
                input = rest;
            }
            Err(_) => break,
        }
    }
    blocks
}

fn find_block(rom: &Rom, aram: u16, bank: SpcBank) -> Option<SpcBlock> {
    scan_blocks(rom, bank).into_iter().find(|b| b.contains(aram)).or_else(|| {
        if bank != SpcBank::Common {
            find_block(rom, aram, SpcBank::Common)
        } else {
            None
        }
    })
}

/// Resolves an ARAM address to its image offset, falling back to the common
/// bank when `bank` does not upload it.
pub fn spc_address_to_rom_offset(rom: &Rom, aram: u16, bank: SpcBank) -> Option<usize> {
    find_block(rom, aram, bank).map(|b| b.rom_offset + (aram - b.aram_address) as usize)
}

/// Bytes from `aram` to the end of the block that uploads it.
pub fn get_spc_data(rom: &Rom, aram: u16, bank: SpcBank) -> Option<&[u8]> {
    let block = find_block(rom, aram, bank)?;
    let skip = (aram - block.aram_address) as usize;
    rom.data()
        .get(block.rom_offset + skip..block.rom_offset + block.size)
}

/// Like `get_spc_data`, reporting unresolved addresses as errors.
pub fn require_spc_data(rom: &Rom, aram: u16, bank: SpcBank) -> Result<&[u8]> {
    if !rom.is_loaded() {
        return Err(MusicError::RomNotLoaded);
    }
    get_spc_data(rom, aram, bank).ok_or(MusicError::AddressNotFound {
        address: aram,
        bank: bank.id(),
    })
}

/// Reads up to `max_entries` little-endian words, null slots included.
pub fn read_song_pointer_table(
    rom: &Rom,
    table_address: u16,
    bank: SpcBank,
    max_entries: usize,
) -> Result<Vec<u16>> {
    let data = require_spc_data(rom, table_address, bank)?;
    if data.len() < 2 {
        return Err(MusicError::malformed(format!(
            "song pointer table at ${table_address:04X} is too small"
        )));
    }
    Ok(data
        .chunks_exact(2)
        .take(max_entries)
        .map(|w| u16::from_le_bytes([w[0], w[1]]))
        .collect())
}
