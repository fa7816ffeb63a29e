//! Guest memory
//!
//! One arena holds data, bss and stack back to back. Blocks handed out by
//! `malloc` live outside the arena and are addressed through tagged
//! "foreign" pointers: bit 63 set, block id in bits 32..63, offset in the
//! low 32 bits.

use std::collections::HashMap;

use tracing::trace;

use crate::error::VmError;
use crate::isa::Width;

pub const FOREIGN_TAG: u64 = 1 << 63;

const BLOCK_SHIFT: u32 = 32;
const OFFSET_MASK: u64 = 0xFFFF_FFFF;
const BLOCK_MASK: u64 = 0x7FFF_FFFF;

pub fn is_foreign(addr: u64) -> bool {
    addr & FOREIGN_TAG != 0
}

fn split_foreign(addr: u64) -> (u32, u64) {
    (((addr >> BLOCK_SHIFT) & BLOCK_MASK) as u32, addr & OFFSET_MASK)
}

#[derive(Debug, Default)]
pub struct Memory {
    arena: Vec<u8>,
    blocks: HashMap<u32, Vec<u8>>,
    next_block: u32,
}

impl Memory {
    pub fn new(arena: Vec<u8>) -> Self {
        Self {
            arena,
            blocks: HashMap::new(),
            next_block: 1,
        }
    }

    pub fn arena_len(&self) -> u64 {
        self.arena.len() as u64
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn region(&self, addr: u64, len: u64) -> Result<&[u8], VmError> {
        let fault = || VmError::OutOfBounds { addr, len };
        let (bytes, start) = if is_foreign(addr) {
            let (id, offset) = split_foreign(addr);
            let block = self
                .blocks
                .get(&id)
                .ok_or(VmError::ForeignPointer(addr))?;
            (block.as_slice(), offset)
        } else {
            (self.arena.as_slice(), addr)
        };

        let end = start.checked_add(len).ok_or_else(fault)?;
        if end > bytes.len() as u64 {
            return Err(fault());
        }
        Ok(&bytes[start as usize..end as usize])
    }

    fn region_mut(&mut self, addr: u64, len: u64) -> Result<&mut [u8], VmError> {
        let fault = || VmError::OutOfBounds { addr, len };
        let (bytes, start) = if is_foreign(addr) {
            let (id, offset) = split_foreign(addr);
            let block = self
                .blocks
                .get_mut(&id)
                .ok_or(VmError::ForeignPointer(addr))?;
            (block.as_mut_slice(), offset)
        } else {
            (self.arena.as_mut_slice(), addr)
        };

        let end = start.checked_add(len).ok_or_else(fault)?;
        if end > bytes.len() as u64 {
            return Err(fault());
        }
        Ok(&mut bytes[start as usize..end as usize])
    }

    /// Reads `width` bytes little-endian, zero-extended to 64 bits.
    pub fn read(&self, addr: u64, width: Width) -> Result<u64, VmError> {
        let bytes = self.region(addr, width.bytes())?;
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes the low `width` bits of `value` little-endian.
    pub fn write(&mut self, addr: u64, width: Width, value: u64) -> Result<(), VmError> {
        let len = width.bytes() as usize;
        self.region_mut(addr, width.bytes())?
            .copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }

    pub fn read_bytes(&self, addr: u64, len: u64) -> Result<&[u8], VmError> {
        self.region(addr, len)
    }

    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), VmError> {
        self.region_mut(addr, bytes.len() as u64)?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Bytes from `addr` up to, not including, the first NUL.
    pub fn read_cstr(&self, addr: u64) -> Result<&[u8], VmError> {
        let rest = if is_foreign(addr) {
            let (id, offset) = split_foreign(addr);
            let block = self
                .blocks
                .get(&id)
                .ok_or(VmError::ForeignPointer(addr))?;
            block.get(offset as usize..)
        } else {
            self.arena.get(addr as usize..)
        }
        .ok_or(VmError::OutOfBounds { addr, len: 1 })?;

        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(VmError::UnterminatedString(addr))?;
        Ok(&rest[..end])
    }

    pub fn fill(&mut self, addr: u64, byte: u8, len: u64) -> Result<(), VmError> {
        self.region_mut(addr, len)?.fill(byte);
        Ok(())
    }

    pub fn copy(&mut self, dst: u64, src: u64, len: u64) -> Result<(), VmError> {
        let bytes = self.read_bytes(src, len)?.to_vec();
        self.write_bytes(dst, &bytes)
    }

    /// Allocates a zeroed block and returns a foreign pointer to it.
    pub fn allocate(&mut self, size: u64) -> Result<u64, VmError> {
        if size > OFFSET_MASK || self.next_block as u64 > BLOCK_MASK {
            return Err(VmError::OutOfBounds {
                addr: FOREIGN_TAG,
                len: size,
            });
        }

        let id = self.next_block;
        self.next_block += 1;
        self.blocks.insert(id, vec![0; size as usize]);

        let ptr = FOREIGN_TAG | (id as u64) << BLOCK_SHIFT;
        trace!(size, ptr = format_args!("{ptr:#x}"), "allocated block");
        Ok(ptr)
    }

    pub fn free(&mut self, ptr: u64) -> Result<(), VmError> {
        if !is_foreign(ptr) {
            return Err(VmError::ForeignPointer(ptr));
        }
        let (id, offset) = split_foreign(ptr);
        if offset != 0 || self.blocks.remove(&id).is_none() {
            return Err(VmError::ForeignPointer(ptr));
        }
        trace!(ptr = format_args!("{ptr:#x}"), "freed block");
        Ok(())
    }

    /// Translates a foreign pointer into a real host address. Any other
    /// value is returned unchanged.
    pub fn host_address(&mut self, value: u64) -> u64 {
        if !is_foreign(value) {
            return value;
        }
        let (id, offset) = split_foreign(value);
        match self.blocks.get_mut(&id) {
            Some(block) if (offset as usize) <= block.len() => {
                block.as_mut_ptr() as u64 + offset
            }
            _ => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_are_little_endian() {
        let mut mem = Memory::new(vec![0; 16]);
        mem.write(0, Width::QWord, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.read(0, Width::Byte).unwrap(), 0x88);
        assert_eq!(mem.read(0, Width::Word).unwrap(), 0x7788);
        assert_eq!(mem.read(4, Width::DWord).unwrap(), 0x1122_3344);

        mem.write(8, Width::Byte, 0x1FF).unwrap();
        assert_eq!(mem.read(8, Width::QWord).unwrap(), 0xFF);
    }

    #[test]
    fn arena_accesses_are_bounds_checked() {
        let mut mem = Memory::new(vec![0; 8]);
        assert!(mem.read(1, Width::QWord).is_err());
        assert!(mem.write(8, Width::Byte, 1).is_err());
        assert!(mem.read(u64::MAX >> 1, Width::Word).is_err());
        assert!(mem.read(0, Width::QWord).is_ok());
    }

    #[test]
    fn foreign_blocks() {
        let mut mem = Memory::new(Vec::new());
        let ptr = mem.allocate(4).unwrap();
        assert!(is_foreign(ptr));

        mem.write(ptr + 2, Width::Word, 0xBEEF).unwrap();
        assert_eq!(mem.read(ptr, Width::DWord).unwrap(), 0xBEEF_0000);
        assert!(mem.read(ptr + 1, Width::DWord).is_err());

        mem.free(ptr).unwrap();
        assert!(matches!(
            mem.read(ptr, Width::Byte),
            Err(VmError::ForeignPointer(_))
        ));
        assert!(mem.free(ptr).is_err());
    }

    #[test]
    fn copy_between_arena_and_blocks() {
        let mut mem = Memory::new(b"hello\0".to_vec());
        let ptr = mem.allocate(6).unwrap();
        mem.copy(ptr, 0, 6).unwrap();
        assert_eq!(mem.read_cstr(ptr).unwrap(), b"hello");

        mem.fill(ptr, b'z', 2).unwrap();
        assert_eq!(mem.read_cstr(ptr).unwrap(), b"zzllo");
    }

    #[test]
    fn unterminated_strings_fail() {
        let mem = Memory::new(b"abc".to_vec());
        assert!(matches!(
            mem.read_cstr(0),
            Err(VmError::UnterminatedString(0))
        ));
    }
}
