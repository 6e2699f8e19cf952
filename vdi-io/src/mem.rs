// SPDX-License-Identifier: MIT

use crate::{BlockIo, BlockIoSetLen, error::*};
use alloc::vec::Vec;

/// In-memory `BlockIo` implementation backed by a growable buffer.
///
/// Unlike a fixed-size borrow, writes past the current end grow the buffer
/// (zero-filling the gap), which is what `VdiDisk::create` needs when it
/// lays out header/block-map/data regions before any host file exists.
#[derive(Debug, Default)]
pub struct MemBackend {
    buffer: Vec<u8>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(cap),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    fn ensure_len(&mut self, end: usize) {
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
    }
}

impl BlockIo for MemBackend {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> IoResult {
        let start = offset as usize;
        let end = start.saturating_add(buf.len());
        if end > self.buffer.len() {
            return Err(IoError::OutOfBounds);
        }
        buf.copy_from_slice(&self.buffer[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> IoResult {
        let start = offset as usize;
        let end = start.saturating_add(data.len());
        self.ensure_len(end);
        self.buffer[start..end].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> IoResult {
        Ok(())
    }

    fn len(&mut self) -> IoResult<u64> {
        Ok(self.buffer.len() as u64)
    }
}

impl BlockIoSetLen for MemBackend {
    fn set_len(&mut self, len: u64) -> IoResult {
        self.buffer.resize(len as usize, 0);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grows_on_write() {
        let mut io = MemBackend::new();
        io.write_at(10, &[1, 2, 3, 4]).unwrap();
        assert_eq!(io.len().unwrap(), 14);

        let mut out = [0u8; 4];
        io.read_at(10, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn read_past_end_fails() {
        let mut io = MemBackend::new();
        io.set_len(8).unwrap();
        let mut out = [0u8; 4];
        assert!(io.read_at(8, &mut out).is_err());
    }

    #[test]
    fn zero_fill_clears_bytes() {
        let mut io = MemBackend::new();
        io.write_at(0, &[0xFF; 16]).unwrap();
        io.zero_fill(4, 8).unwrap();
        let mut out = [0u8; 16];
        io.read_at(0, &mut out).unwrap();
        assert_eq!(&out[0..4], &[0xFF; 4]);
        assert_eq!(&out[4..12], &[0u8; 8]);
        assert_eq!(&out[12..16], &[0xFF; 4]);
    }
}
