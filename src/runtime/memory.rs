//! Flat byte-addressed memory for the reference interpreter
//!
//! Address 0 is never allocated so it can serve as null. Pointers into the
//! distributed-global space carry their owning core in the top 16 bits;
//! only the low 48 bits select a byte.

use crate::{Error, Result};

/// Bits holding the local part of a global-space address
pub const ADDRESS_BITS: u32 = 48;
const ADDRESS_MASK: u64 = (1 << ADDRESS_BITS) - 1;
const FIRST_ADDRESS: u64 = 16;

/// Encodes a global-space pointer from its owning core and local address
pub fn global_pointer(core: u16, address: u64) -> u64 {
    ((core as u64) << ADDRESS_BITS) | (address & ADDRESS_MASK)
}

/// Owning core of a global-space pointer
pub fn owning_core(pointer: u64) -> u16 {
    (pointer >> ADDRESS_BITS) as u16
}

/// Bump-allocated byte memory
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    limit: u64,
}

impl Memory {
    /// Empty memory that may grow up to `limit` bytes
    pub fn new(limit: u64) -> Self {
        Self {
            bytes: vec![0; FIRST_ADDRESS as usize],
            limit,
        }
    }

    /// Allocates `size` zeroed bytes aligned to `align`
    pub fn allocate(&mut self, size: u64, align: u64) -> Result<u64> {
        let align = align.max(1);
        let start = (self.bytes.len() as u64).div_ceil(align) * align;
        let end = start + size.max(1);
        if end > self.limit {
            return Err(Error::MemoryFault {
                address: start,
                size,
            });
        }
        self.bytes.resize(end as usize, 0);
        Ok(start)
    }

    /// Allocates `size` bytes owned by `core` and returns the encoded
    /// global-space pointer
    pub fn allocate_on(&mut self, core: u16, size: u64, align: u64) -> Result<u64> {
        Ok(global_pointer(core, self.allocate(size, align)?))
    }

    fn range(&self, address: u64, size: u64) -> Result<std::ops::Range<usize>> {
        let local = address & ADDRESS_MASK;
        let end = local.checked_add(size);
        match end {
            Some(end) if local >= FIRST_ADDRESS && end <= self.bytes.len() as u64 => {
                Ok(local as usize..end as usize)
            }
            _ => Err(Error::MemoryFault { address, size }),
        }
    }

    /// Reads a little-endian integer of `size` bytes (at most 8)
    pub fn read(&self, address: u64, size: u64) -> Result<u64> {
        let range = self.range(address, size)?;
        let mut buf = [0u8; 8];
        buf[..range.len()].copy_from_slice(&self.bytes[range]);
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes the low `size` bytes of `value`, little-endian
    pub fn write(&mut self, address: u64, size: u64, value: u64) -> Result<()> {
        let range = self.range(address, size)?;
        let len = range.len();
        self.bytes[range].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }

    /// Copies raw bytes out of memory
    pub fn read_bytes(&self, address: u64, size: u64) -> Result<Vec<u8>> {
        let range = self.range(address, size)?;
        Ok(self.bytes[range].to_vec())
    }

    /// Copies raw bytes into memory
    pub fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let range = self.range(address, data.len() as u64)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Bytes in use, including the reserved null page
    pub fn used(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_never_mapped() {
        let mut memory = Memory::new(1024);
        let addr = memory.allocate(8, 8).unwrap();
        assert!(addr >= FIRST_ADDRESS);
        assert!(matches!(memory.read(0, 8), Err(Error::MemoryFault { .. })));
    }

    #[test]
    fn test_read_write_widths() {
        let mut memory = Memory::new(1024);
        let addr = memory.allocate(16, 8).unwrap();
        memory.write(addr, 8, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(memory.read(addr, 2).unwrap(), 0x7788);
        memory.write(addr, 1, 0xff).unwrap();
        assert_eq!(memory.read(addr, 8).unwrap(), 0x1122_3344_5566_77ff);
        assert!(memory.read(addr + 12, 8).is_err());
    }

    #[test]
    fn test_global_pointer_encoding() {
        let mut memory = Memory::new(1024);
        let ptr = memory.allocate_on(3, 8, 8).unwrap();
        assert_eq!(owning_core(ptr), 3);
        memory.write(ptr, 8, 42).unwrap();
        assert_eq!(memory.read(ptr & ADDRESS_MASK, 8).unwrap(), 42);
    }

    #[test]
    fn test_limit() {
        let mut memory = Memory::new(64);
        assert!(memory.allocate(128, 8).is_err());
    }
}
