use crate::error::{MusicError, Result};
use std::path::Path;

/// Size of the copier header some dumps carry in front of the image.
const SMC_HEADER_SIZE: usize = 0x200;

/// Bounds-checked ROM image. Every access is fallible and reports the
/// offending range instead of panicking.
#[derive(Clone, Debug, Default)]
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    #[inline]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        Ok(std::fs::write(path, &self.data)?)
    }
    #[inline]
    pub fn is_loaded(&self) -> bool {
        !self.data.is_empty()
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
    /// 0x200 when the image carries an SMC copier header.
    #[inline]
    pub fn header_offset(&self) -> usize {
        match self.data.len() % 0x8000 {
            SMC_HEADER_SIZE => SMC_HEADER_SIZE,
            _ => 0,
        }
    }
    /// Converts a headerless PC offset into an offset in this image.
    #[inline]
    pub fn pc(&self, offset: usize) -> usize {
        offset + self.header_offset()
    }
    #[inline]
    fn out_of_range(&self, offset: usize, len: usize) -> MusicError {
        MusicError::OutOfRange {
            offset,
            len,
            size: self.data.len(),
        }
    }
    fn check(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>> {
        if !self.is_loaded() {
            return Err(MusicError::RomNotLoaded);
        }
        offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .map(|end| offset..end)
            .ok_or_else(|| self.out_of_range(offset, len))
    }
    pub fn read_byte(&self, offset: usize) -> Result<u8> {
        let range = self.check(offset, 1)?;
        Ok(self.data[range.start])
    }
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let range = self.check(offset, len)?;
        Ok(&self.data[range])
    }
    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        let b = self.read_bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
    pub fn write_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        let range = self.check(offset, 1)?;
        self.data[range.start] = value;
        Ok(())
    }
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let range = self.check(offset, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

/// Locations of the three bytes holding a relocatable bank's LoROM address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoRomPointerRegs {
    pub low: usize,
    pub mid: usize,
    pub bank: usize,
}

pub const OVERWORLD_POINTER_REGS: LoRomPointerRegs = LoRomPointerRegs {
    low: 0x0914,
    mid: 0x0918,
    bank: 0x091C,
};

pub const CREDITS_POINTER_REGS: LoRomPointerRegs = LoRomPointerRegs {
    low: 0x0932,
    mid: 0x0936,
    bank: 0x093A,
};

/// Splits a PC offset into its LoROM (low, mid, bank) bytes. The mid byte only
/// carries 7 bits; bit 7 belongs to the caller.
#[inline]
pub fn lorom_triplet(pc_offset: u32) -> [u8; 3] {
    [
        (pc_offset & 0xFF) as u8,
        ((pc_offset & 0x7FFF) >> 8) as u8 & 0x7F,
        ((pc_offset >> 15) & 0xFF) as u8,
    ]
}

/// Points a register triplet at `pc_offset`, keeping bit 7 of the mid byte.
pub fn write_lorom_pointer(rom: &mut Rom, regs: LoRomPointerRegs, pc_offset: u32) -> Result<()> {
    let [low, mid, bank] = lorom_triplet(pc_offset);
    let preserved = rom.read_byte(rom.pc(regs.mid))? & 0x80;
    rom.write_byte(rom.pc(regs.low), low)?;
    rom.write_byte(rom.pc(regs.mid), preserved | mid)?;
    rom.write_byte(rom.pc(regs.bank), bank)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let mut rom = Rom::new(vec![0; 16]);
        assert_eq!(rom.read_byte(15).unwrap(), 0);
        assert!(rom.read_byte(16).is_err());
        assert!(rom.read_bytes(15, 2).is_err());
        assert!(rom.read_bytes(usize::MAX, 2).is_err());
        assert!(rom.write_bytes(14, &[1, 2, 3]).is_err());
        rom.write_bytes(14, &[1, 2]).unwrap();
        assert_eq!(rom.read_u16(14).unwrap(), 0x0201);
    }

    #[test]
    fn unloaded() {
        let rom = Rom::default();
        assert!(matches!(rom.read_byte(0), Err(MusicError::RomNotLoaded)));
    }

    #[test]
    fn smc_header() {
        assert_eq!(Rom::new(vec![0; 0x8000]).header_offset(), 0);
        let rom = Rom::new(vec![0; 0x8200]);
        assert_eq!(rom.header_offset(), 0x200);
        assert_eq!(rom.pc(0x10), 0x210);
    }

    #[test]
    fn triplet() {
        assert_eq!(lorom_triplet(0xD1EF5), [0xF5, 0x1E, 0x1A]);
        assert_eq!(lorom_triplet(0xD8000), [0x00, 0x00, 0x1B]);
        assert_eq!(lorom_triplet(0xD5380), [0x80, 0x53, 0x1A]);
    }

    #[test]
    fn pointer_preserves_mid_flag() {
        let mut rom = Rom::new(vec![0; 0x1000]);
        rom.write_byte(0x0918, 0x80).unwrap();
        rom.write_byte(0x0936, 0x7F).unwrap();
        write_lorom_pointer(&mut rom, OVERWORLD_POINTER_REGS, 0xD1EF5).unwrap();
        assert_eq!(rom.read_byte(0x0914).unwrap(), 0xF5);
        assert_eq!(rom.read_byte(0x0918).unwrap(), 0x80 | 0x1E);
        assert_eq!(rom.read_byte(0x091C).unwrap(), 0x1A);

        write_lorom_pointer(&mut rom, CREDITS_POINTER_REGS, 0xD5380).unwrap();
        assert_eq!(rom.read_byte(0x0932).unwrap(), 0x80);
        assert_eq!(rom.read_byte(0x0936).unwrap(), 0x53);
        assert_eq!(rom.read_byte(0x093A).unwrap(), 0x1A);
    }

    #[test]
    fn pointer_propagates_failure() {
        let mut rom = Rom::new(vec![0; 0x918]);
        assert!(matches!(
            write_lorom_pointer(&mut rom, OVERWORLD_POINTER_REGS, 0xD1EF5),
            Err(MusicError::OutOfRange { offset: 0x918, .. })
        ));
        // the mid read happens first, so nothing was written
        assert_eq!(rom.read_byte(0x0914).unwrap(), 0);

        let mut rom = Rom::new(vec![0; 0x91C]);
        assert!(matches!(
            write_lorom_pointer(&mut rom, OVERWORLD_POINTER_REGS, 0xD1EF5),
            Err(MusicError::OutOfRange { offset: 0x91C, .. })
        ));
    }
}
