// SPDX-License-Identifier: MIT

//! Lifecycle and synchronous I/O path: create, open, read, write,
//! is-allocated, check, close/flush.

use vdi_io::{BlockIo, BlockIoStructExt};

use crate::allocator;
use crate::blockmap::BlockMap;
use crate::check::{CheckReport, Finding};
use crate::error::{VdiError, VdiResult};
use crate::header::{
    self, IMAGE_TYPE_DYNAMIC, IMAGE_TYPE_STATIC, SECTOR_SIZE, UNALLOCATED, VdiHeader,
    VdiHeaderRaw,
};
use crate::io_ops;
use crate::translate::{self, Segment};

/// A single open VDI image: owns the child block device for its lifetime,
/// plus the in-memory header and block-map cache (§3 "Lifecycle").
pub struct VdiDisk<IO: BlockIo> {
    io: IO,
    header: VdiHeader,
    blockmap: BlockMap,
}

impl<IO: BlockIo> VdiDisk<IO> {
    fn offset_data_sectors(&self) -> u64 {
        self.header.offset_data as u64 / SECTOR_SIZE
    }

    pub fn total_sectors(&self) -> u64 {
        self.header.total_sectors()
    }

    pub fn header(&self) -> &VdiHeader {
        &self.header
    }

    /// Physical block index backing virtual block `index`, or
    /// `UNALLOCATED`. Exposed for diagnostics (`check`, `vdi-cli stat`) —
    /// ordinary I/O goes through `read_at`/`write_at`/`is_allocated`.
    pub fn blockmap_entry(&self, index: u32) -> u32 {
        self.blockmap.get(index)
    }

    /// Test/diagnostic hook: corrupts a block-map entry in memory without
    /// touching disk, so `check` can be exercised against a known-bad map.
    #[doc(hidden)]
    pub fn corrupt_blockmap_entry_for_test(&mut self, index: u32, value: u32) {
        self.blockmap.set(index, value);
    }

    /// §4.10 create. `static_alloc` selects the fully pre-allocated variant
    /// (identity block map, `blocks_allocated = blocks`).
    pub fn create(mut io: IO, size: u64, static_alloc: bool, uuid: [u8; 16]) -> VdiResult<Self> {
        if size == 0 {
            return Err(VdiError::InvalidArgument("size must be non-zero"));
        }

        let block_size = header::BLOCK_SIZE as u64;
        let blocks = (size / block_size) as u32;
        if blocks == 0 {
            return Err(VdiError::InvalidArgument(
                "size must be at least one block",
            ));
        }
        let truncated_size = blocks as u64 * block_size;

        let image_type = if static_alloc {
            IMAGE_TYPE_STATIC
        } else {
            IMAGE_TYPE_DYNAMIC
        };
        let mut header = VdiHeader::new(truncated_size, blocks, image_type, uuid);

        let blockmap = if static_alloc {
            header.blocks_allocated = blocks;
            BlockMap::new_identity(blocks)
        } else {
            BlockMap::new_unallocated(blocks)
        };

        io_ops::write_header(&mut io, &header).map_err(VdiError::WriteFailed)?;
        io.write_at(header.offset_blockmap as u64, &blockmap.to_padded_bytes())
            .map_err(VdiError::WriteFailed)?;

        if static_alloc {
            io.zero_fill(header.offset_data as u64, blocks as usize * block_size as usize)
                .map_err(VdiError::WriteFailed)?;
        }

        Ok(Self {
            io,
            header,
            blockmap,
        })
    }

    /// §4.3 open. Validates the header and bootstraps the block-map cache.
    pub fn open(mut io: IO) -> VdiResult<Self> {
        let raw: VdiHeaderRaw = io
            .read_struct(64)
            .map_err(VdiError::ReadFailed)?;

        if raw.signature.get() != header::SIGNATURE {
            return Err(VdiError::UnsupportedFormat("bad signature"));
        }
        if raw.version.get() != header::VERSION {
            return Err(VdiError::UnsupportedFormat("unsupported version"));
        }

        let hdr = VdiHeader::from_raw(&raw);

        if hdr.offset_blockmap as u64 % SECTOR_SIZE != 0 {
            return Err(VdiError::UnsupportedFormat("offset_blockmap misaligned"));
        }
        if hdr.offset_data as u64 % SECTOR_SIZE != 0 {
            return Err(VdiError::UnsupportedFormat("offset_data misaligned"));
        }
        if hdr.sector_size as u64 != SECTOR_SIZE {
            return Err(VdiError::UnsupportedFormat("unsupported sector size"));
        }
        if hdr.block_size != header::BLOCK_SIZE {
            return Err(VdiError::UnsupportedFormat("unsupported block size"));
        }
        if hdr.disk_size != hdr.blocks_in_image as u64 * hdr.block_size as u64 {
            return Err(VdiError::UnsupportedFormat(
                "disk_size inconsistent with blocks_in_image",
            ));
        }
        if hdr.image_type == IMAGE_TYPE_STATIC && hdr.blocks_allocated != hdr.blocks_in_image {
            return Err(VdiError::UnsupportedFormat(
                "static image not fully allocated",
            ));
        }

        let blockmap_bytes = (hdr.blocks_in_image as u64 * 4).div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        let mut raw_map = vec![0u8; blockmap_bytes as usize];
        io.read_at(hdr.offset_blockmap as u64, &mut raw_map)
            .map_err(VdiError::ReadFailed)?;
        let blockmap = BlockMap::from_le_bytes(&raw_map, hdr.blocks_in_image);

        Ok(Self {
            io,
            header: hdr,
            blockmap,
        })
    }

    /// §4.5 is-allocated: reports whether the run starting at `sector` is
    /// allocated, and how many consecutive sectors share that status.
    pub fn is_allocated(&self, sector: u64) -> (bool, u64) {
        let remaining = self.header.total_sectors().saturating_sub(sector);
        if remaining == 0 {
            return (false, 0);
        }
        match translate::next_segment(
            sector,
            remaining,
            self.header.block_sectors(),
            self.offset_data_sectors(),
            &self.blockmap,
        ) {
            Segment::Hole { len } => (false, len),
            Segment::Mapped { len, .. } => (true, len),
        }
    }

    /// §4.6 synchronous read. `buf.len()` must be a multiple of 512.
    /// Returns the number of sectors actually transferred: fewer than
    /// requested only if `sector + n` runs past `total_sectors`, which is
    /// not an error (§8 B1).
    pub fn read_at(&mut self, sector: u64, buf: &mut [u8]) -> VdiResult<u64> {
        assert!(buf.len() % 512 == 0, "buffer must be sector-sized");
        let total = self.header.total_sectors();
        let mut s = sector;
        let mut remaining = (buf.len() / 512) as u64;
        let mut pos = 0usize;

        while remaining > 0 && s < total {
            let n = remaining.min(total - s);
            let seg = translate::next_segment(
                s,
                n,
                self.header.block_sectors(),
                self.offset_data_sectors(),
                &self.blockmap,
            );
            let len = seg.len() as usize;
            match seg {
                Segment::Hole { .. } => {
                    buf[pos..pos + len * 512].fill(0);
                }
                Segment::Mapped { offset, .. } => {
                    self.io
                        .read_at(offset * 512, &mut buf[pos..pos + len * 512])
                        .map_err(VdiError::ReadFailed)?;
                }
            }
            s += len as u64;
            pos += len * 512;
            remaining -= len as u64;
        }

        Ok((pos / 512) as u64)
    }

    /// §4.8 synchronous write. `buf.len()` must be a multiple of 512.
    pub fn write_at(&mut self, sector: u64, buf: &[u8]) -> VdiResult<u64> {
        assert!(buf.len() % 512 == 0, "buffer must be sector-sized");
        let total = self.header.total_sectors();
        let mut s = sector;
        let mut remaining = (buf.len() / 512) as u64;
        let mut pos = 0usize;

        while remaining > 0 && s < total {
            let n = remaining.min(total - s);
            let seg = translate::next_segment(
                s,
                n,
                self.header.block_sectors(),
                self.offset_data_sectors(),
                &self.blockmap,
            );
            let len = seg.len() as usize;
            match seg {
                Segment::Mapped { offset, .. } => {
                    self.io
                        .write_at(offset * 512, &buf[pos..pos + len * 512])
                        .map_err(VdiError::WriteFailed)?;
                }
                Segment::Hole { .. } => {
                    let block_sectors = self.header.block_sectors();
                    let virtual_block = (s / block_sectors) as u32;
                    let sector_in_block = s % block_sectors;
                    allocator::allocate_and_publish(
                        &mut self.io,
                        &mut self.header,
                        &mut self.blockmap,
                        virtual_block,
                        sector_in_block,
                        &buf[pos..pos + len * 512],
                    )?;
                }
            }
            s += len as u64;
            pos += len * 512;
            remaining -= len as u64;
        }

        Ok((pos / 512) as u64)
    }

    /// §4.11 check: scans the block map, never mutates the image.
    pub fn check(&self) -> CheckReport {
        let mut report = CheckReport::default();
        let mut counted = 0u32;

        for i in 0..self.blockmap.len() as u32 {
            let entry = self.blockmap.get(i);
            if entry == UNALLOCATED {
                continue;
            }
            if entry >= self.header.blocks_in_image {
                report.push(Finding::error(
                    "blockmap-out-of-range",
                    format!(
                        "blockmap[{i}] = {entry} >= blocks_in_image ({})",
                        self.header.blocks_in_image
                    ),
                ));
                continue;
            }
            counted += 1;
        }

        if counted != self.header.blocks_allocated {
            report.push(Finding::error(
                "blocks-allocated-mismatch",
                format!(
                    "blocks_allocated header field is {} but {counted} entries are allocated",
                    self.header.blocks_allocated
                ),
            ));
        }

        report
    }

    /// §4.12 flush: delegates to the child block device.
    pub fn flush(&mut self) -> VdiResult {
        self.io.flush().map_err(VdiError::WriteFailed)
    }

    /// §6 `make-empty`: currently a documented no-op. Listed in the driver
    /// interface for parity with the surrounding block-device registry,
    /// which expects every registered format to expose it, but this driver
    /// has no use for it yet — discarding an image's contents in place is
    /// create's job.
    pub fn make_empty(&mut self) -> VdiResult {
        Ok(())
    }

    /// §4.12 close: releases the in-memory block map and header, handing
    /// the child block device back to the caller (drop it to close it).
    pub fn close(self) -> IO {
        self.io
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vdi_io::prelude::*;

    fn uuid() -> [u8; 16] {
        [0x11u8; 16]
    }

    #[test]
    fn create_then_open_reports_total_sectors() {
        let io = MemBackend::new();
        let disk = VdiDisk::create(io, 2 * 1024 * 1024, false, uuid()).unwrap();
        let io = disk.close();
        let disk = VdiDisk::open(io).unwrap();
        assert_eq!(disk.total_sectors(), 2 * 1024 * 1024 / 512);
    }

    #[test]
    fn fresh_image_reads_as_zero() {
        let io = MemBackend::new();
        let mut disk = VdiDisk::create(io, 2 * 1024 * 1024, false, uuid()).unwrap();
        let mut buf = [0xAAu8; 512];
        let n = disk.read_at(0, &mut buf).unwrap();
        assert_eq!(n, 1);
        assert_eq!(buf, [0u8; 512]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let io = MemBackend::new();
        let mut disk = VdiDisk::create(io, 2 * 1024 * 1024, false, uuid()).unwrap();
        let payload = [0xAAu8; 512];
        disk.write_at(0, &payload).unwrap();
        let mut out = [0u8; 512];
        disk.read_at(0, &mut out).unwrap();
        assert_eq!(out, payload);
        assert_eq!(disk.header().blocks_allocated, 1);
    }

    #[test]
    fn second_write_to_same_block_reuses_mapping() {
        let io = MemBackend::new();
        let mut disk = VdiDisk::create(io, 2 * 1024 * 1024, false, uuid()).unwrap();
        disk.write_at(0, &[0xAAu8; 512]).unwrap();
        disk.write_at(1, &[0xBBu8; 512]).unwrap();
        assert_eq!(disk.header().blocks_allocated, 1);
    }

    #[test]
    fn read_past_end_returns_short_count() {
        let io = MemBackend::new();
        let mut disk = VdiDisk::create(io, 1024 * 1024, false, uuid()).unwrap();
        let total = disk.total_sectors();
        let mut buf = vec![0u8; 4096];
        let n = disk.read_at(total - 2, &mut buf).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn check_is_clean_after_normal_use() {
        let io = MemBackend::new();
        let mut disk = VdiDisk::create(io, 2 * 1024 * 1024, false, uuid()).unwrap();
        disk.write_at(0, &[0xAAu8; 512]).unwrap();
        disk.write_at(2048, &[0x55u8; 512]).unwrap();
        assert_eq!(disk.check().error_count(), 0);
    }

    #[test]
    fn static_image_is_fully_allocated_with_identity_map() {
        let io = MemBackend::new();
        let disk = VdiDisk::create(io, 2 * 1024 * 1024, true, uuid()).unwrap();
        assert_eq!(disk.header().blocks_allocated, disk.header().blocks_in_image);
        assert!(disk.is_allocated(0).0);
        assert!(disk.is_allocated(2048).0);
    }

    #[test]
    fn open_rejects_bad_version() {
        let mut header = VdiHeader::new(1024 * 1024, 1, IMAGE_TYPE_DYNAMIC, uuid());
        header.version = 0xdead_beef;
        let mut io = MemBackend::new();
        io_ops::write_header(&mut io, &header).unwrap();
        let blockmap = BlockMap::new_unallocated(1);
        io.write_at(header.offset_blockmap as u64, &blockmap.to_padded_bytes())
            .unwrap();
        assert!(matches!(
            VdiDisk::open(io),
            Err(VdiError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn open_rejects_disk_size_mismatch() {
        let mut header = VdiHeader::new(1024 * 1024, 1, IMAGE_TYPE_DYNAMIC, uuid());
        header.disk_size = 999;
        let mut io = MemBackend::new();
        io_ops::write_header(&mut io, &header).unwrap();
        let blockmap = BlockMap::new_unallocated(1);
        io.write_at(header.offset_blockmap as u64, &blockmap.to_padded_bytes())
            .unwrap();
        assert!(matches!(
            VdiDisk::open(io),
            Err(VdiError::UnsupportedFormat(_))
        ));
    }
}
