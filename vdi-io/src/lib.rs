// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod error;

#[cfg(feature = "mem")]
mod mem;

#[cfg(feature = "std")]
mod file;

#[cfg(feature = "alloc")]
pub mod async_io;

pub mod prelude {
    pub use super::BlockIo;
    pub use super::BlockIoSetLen;
    pub use super::BlockIoStructExt;
    pub use super::error::*;

    #[cfg(feature = "mem")]
    pub use super::mem::MemBackend;

    #[cfg(feature = "std")]
    pub use super::file::FileBackend;

    #[cfg(feature = "alloc")]
    pub use super::async_io::*;
}

use error::*;

/// Maximum size handled by a single `read_struct`/`write_struct` call.
const STRUCT_BUF_SIZE: usize = 8192;

/// Block IO abstraction: read/write/flush at arbitrary byte offsets.
///
/// Implementations may target RAM, a host file, or any other byte-addressable
/// backing store. Offsets are absolute, in bytes, from the start of the
/// backing store.
pub trait BlockIo {
    /// Reads `buf.len()` bytes into `buf` starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> IoResult;

    /// Writes `data` at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> IoResult;

    /// Flushes any buffered data. May be a no-op for in-memory backends.
    fn flush(&mut self) -> IoResult;

    /// Current logical length of the backing store, in bytes.
    fn len(&mut self) -> IoResult<u64>;

    /// Fills `len` bytes starting at `offset` with zero.
    fn zero_fill(&mut self, offset: u64, len: usize) -> IoResult {
        const ZERO_BUF: [u8; 4096] = [0u8; 4096];
        let mut remaining = len;
        let mut off = offset;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_BUF.len());
            self.write_at(off, &ZERO_BUF[..chunk])?;
            off += chunk as u64;
            remaining -= chunk;
        }
        Ok(())
    }
}

/// Resizes the underlying storage, when the backend supports it.
pub trait BlockIoSetLen {
    fn set_len(&mut self, len: u64) -> IoResult;
}

/// Zero-copy struct read/write helpers built on `zerocopy`.
pub trait BlockIoStructExt: BlockIo {
    fn read_struct<T>(&mut self, offset: u64) -> IoResult<T>
    where
        T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable,
    {
        let size = core::mem::size_of::<T>();
        assert!(size <= STRUCT_BUF_SIZE, "read_struct: type too large");
        let mut buf = [0u8; STRUCT_BUF_SIZE];
        self.read_at(offset, &mut buf[..size])?;
        T::read_from_bytes(&buf[..size]).map_err(|_| IoError::Other("read_struct: size mismatch"))
    }

    fn write_struct<T>(&mut self, offset: u64, val: &T) -> IoResult
    where
        T: zerocopy::IntoBytes + zerocopy::KnownLayout + zerocopy::Immutable,
    {
        self.write_at(offset, val.as_bytes())
    }
}

impl<T: BlockIo + ?Sized> BlockIoStructExt for T {}
