// SPDX-License-Identifier: MIT

//! Small shared helpers for reading/writing the header and block-map
//! sectors, used by both the synchronous allocator and the asynchronous
//! state machine so the two paths agree on wire layout.

use vdi_io::error::IoResult;
use vdi_io::{BlockIo, BlockIoStructExt};

use crate::blockmap::BlockMap;
use crate::header::{VdiHeader, VdiHeaderRaw, VdiPreHeader};

pub fn read_header<IO: BlockIo + ?Sized>(io: &mut IO) -> IoResult<VdiHeader> {
    let raw: VdiHeaderRaw = io.read_struct(64)?;
    Ok(VdiHeader::from_raw(&raw))
}

pub fn write_header<IO: BlockIo + ?Sized>(io: &mut IO, header: &VdiHeader) -> IoResult {
    io.write_struct(0, &VdiPreHeader::new())?;
    io.write_struct(64, &header.to_raw())?;
    Ok(())
}

/// Writes the single 512-byte block-map sector containing `entry_index`
/// (§4.7 step (b)).
pub fn write_blockmap_sector<IO: BlockIo + ?Sized>(
    io: &mut IO,
    header: &VdiHeader,
    blockmap: &BlockMap,
    entry_index: u32,
) -> IoResult {
    let (bytes, sector) = blockmap.sector_bytes(entry_index);
    let offset = header.offset_blockmap as u64 + sector * 512;
    io.write_at(offset, &bytes)
}
