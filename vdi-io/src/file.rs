// SPDX-License-Identifier: MIT

use std::io::{Read, Seek, SeekFrom, Write};

use crate::{BlockIo, BlockIoSetLen, error::*};

/// `BlockIo` backed by a host file (or anything implementing
/// `Read + Write + Seek`).
#[derive(Debug)]
pub struct FileBackend<'a, T: Read + Write + Seek> {
    io: &'a mut T,
}

impl<'a, T: Read + Write + Seek> FileBackend<'a, T> {
    pub fn new(io: &'a mut T) -> Self {
        Self { io }
    }
}

impl<'a, T: Read + Write + Seek> BlockIo for FileBackend<'a, T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> IoResult {
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> IoResult {
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> IoResult {
        self.io.flush()?;
        Ok(())
    }

    fn len(&mut self) -> IoResult<u64> {
        let cur = self.io.stream_position()?;
        let end = self.io.seek(SeekFrom::End(0))?;
        self.io.seek(SeekFrom::Start(cur))?;
        Ok(end)
    }
}

impl<'a> BlockIoSetLen for FileBackend<'a, std::fs::File> {
    fn set_len(&mut self, len: u64) -> IoResult {
        self.io.set_len(len)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn rw_round_trip() {
        let mut file = tempfile().unwrap();
        let mut io = FileBackend::new(&mut file);
        io.write_at(10, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        io.read_at(10, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn set_len_grows_file() {
        let mut file = tempfile().unwrap();
        let mut io = FileBackend::new(&mut file);
        io.set_len(4096).unwrap();
        assert_eq!(io.len().unwrap(), 4096);
    }
}
