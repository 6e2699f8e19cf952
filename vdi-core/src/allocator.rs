// SPDX-License-Identifier: MIT

//! Synchronous allocator / publish sequence (§4.7): append a physical
//! block, update the block map, and rewrite the header's allocated count,
//! in that strict order.

use vdi_io::BlockIo;

use crate::blockmap::BlockMap;
use crate::error::{VdiError, VdiResult};
use crate::header::VdiHeader;
use crate::io_ops;

/// Allocates a new physical block to back `virtual_block`, writes
/// `payload` at `sector_in_block * 512` within it, and durably publishes
/// the allocation in the order the spec mandates: data block, then
/// block-map sector, then header sector. Returns the newly assigned
/// physical block index.
///
/// `header` and `blockmap` are mutated in place; on a write failure partway
/// through the sequence the in-memory state may be ahead of what is on
/// disk — see the module-level rationale in spec §4.7/§7, preserved
/// verbatim: the driver never reuses indices, so nothing is lost, only
/// possibly orphaned until the next `check`.
pub fn allocate_and_publish<IO: BlockIo + ?Sized>(
    io: &mut IO,
    header: &mut VdiHeader,
    blockmap: &mut BlockMap,
    virtual_block: u32,
    sector_in_block: u64,
    payload: &[u8],
) -> VdiResult<u32> {
    let new_index = header.blocks_allocated;
    let block_size = header.block_size as usize;

    let mut block_buf = vec![0u8; block_size];
    let start = (sector_in_block * 512) as usize;
    block_buf[start..start + payload.len()].copy_from_slice(payload);

    blockmap.set(virtual_block, new_index);
    header.blocks_allocated += 1;

    // (a) data block
    let data_offset = header.offset_data as u64 + new_index as u64 * header.block_size as u64;
    io.write_at(data_offset, &block_buf)
        .map_err(VdiError::WriteFailed)?;

    // (b) block-map sector
    io_ops::write_blockmap_sector(io, header, blockmap, virtual_block)
        .map_err(VdiError::WriteFailed)?;

    // (c) header sector (now carries the incremented blocks_allocated)
    io_ops::write_header(io, header).map_err(VdiError::WriteFailed)?;

    Ok(new_index)
}
