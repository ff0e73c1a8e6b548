use std::ops::Range;

use crate::runtime::runtime_error::VmError;

/// Linear byte-addressable memory.
///
/// Multi-byte values are 4 bytes wide and little-endian: `i32` for the
/// integer accessors, `f32` for the float ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Grow to `new_size` bytes, zero-filled. Never shrinks.
    pub fn grow(&mut self, new_size: usize) {
        if new_size > self.data.len() {
            self.data.resize(new_size, 0);
        }
    }

    fn range(&self, address: i64, width: usize) -> Result<Range<usize>, VmError> {
        let out_of_bounds = || VmError::MemoryOutOfBounds {
            address,
            width,
            size: self.data.len(),
        };

        let start = usize::try_from(address).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(width).ok_or_else(out_of_bounds)?;
        if end > self.data.len() {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }

    fn read4(&self, address: i64) -> Result<[u8; 4], VmError> {
        let range = self.range(address, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[range]);
        Ok(bytes)
    }

    pub fn read_i32(&self, address: i64) -> Result<i32, VmError> {
        self.read4(address).map(i32::from_le_bytes)
    }

    pub fn write_i32(&mut self, address: i64, value: i32) -> Result<(), VmError> {
        let range = self.range(address, 4)?;
        self.data[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_f32(&self, address: i64) -> Result<f32, VmError> {
        self.read4(address).map(f32::from_le_bytes)
    }

    pub fn write_f32(&mut self, address: i64, value: f32) -> Result<(), VmError> {
        let range = self.range(address, 4)?;
        self.data[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_u8(&self, address: i64) -> Result<u8, VmError> {
        let range = self.range(address, 1)?;
        Ok(self.data[range.start])
    }

    pub fn write_u8(&mut self, address: i64, value: u8) -> Result<(), VmError> {
        let range = self.range(address, 1)?;
        self.data[range.start] = value;
        Ok(())
    }
}
