// SPDX-License-Identifier: MIT

//! On-disk header layout and the endian codec between its little-endian
//! wire form and the host-form view the rest of the driver operates on.

use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const SIGNATURE: u32 = 0xbeda107f;
pub const VERSION: u32 = 0x0001_0001;
/// Declared header size written on create. The real on-disk footprint of
/// pre-header + header is 512 bytes (one sector); this field is metadata
/// only, not a struct size.
pub const HEADER_SIZE_DECLARED: u32 = 0x180;
pub const SECTOR_SIZE: u64 = 512;
pub const BLOCK_SIZE: u32 = 1024 * 1024;
pub const UNALLOCATED: u32 = 0xFFFF_FFFF;

pub const IMAGE_TYPE_DYNAMIC: u32 = 1;
pub const IMAGE_TYPE_STATIC: u32 = 2;

pub const PRE_HEADER_TEXT: &[u8] = b"<<< Oracle VM VirtualBox Disk Image >>>\n";
pub const DEFAULT_OFFSET_BLOCKMAP: u32 = 0x200;

/// Total size in bytes of pre-header + header: one 512-byte sector.
pub const HEADER_SECTOR_LEN: u64 = 512;

/// 64-byte magic-text prefix, written verbatim and ignored on open.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
pub struct VdiPreHeader {
    pub text: [u8; 64],
}

impl VdiPreHeader {
    pub fn new() -> Self {
        let mut text = [0u8; 64];
        text[..PRE_HEADER_TEXT.len()].copy_from_slice(PRE_HEADER_TEXT);
        Self { text }
    }
}

impl Default for VdiPreHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk (little-endian) form of the 448-byte header that follows the
/// pre-header. Every multi-byte integer field is a zerocopy LE wrapper, so
/// a byte-for-byte read/write of this struct is the entire endian codec for
/// those fields; byte-array fields (`description`, the UUIDs) need no
/// conversion.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
pub struct VdiHeaderRaw {
    pub signature: U32<LittleEndian>,
    pub version: U32<LittleEndian>,
    pub header_size: U32<LittleEndian>,
    pub image_type: U32<LittleEndian>,
    pub image_flags: U32<LittleEndian>,
    pub description: [u8; 256],
    pub offset_blockmap: U32<LittleEndian>,
    pub offset_data: U32<LittleEndian>,
    pub geometry_cylinders: U32<LittleEndian>,
    pub geometry_heads: U32<LittleEndian>,
    pub geometry_sectors: U32<LittleEndian>,
    pub sector_size: U32<LittleEndian>,
    pub unused1: U32<LittleEndian>,
    pub disk_size: U64<LittleEndian>,
    pub block_size: U32<LittleEndian>,
    pub block_extra_data: U32<LittleEndian>,
    pub blocks_in_image: U32<LittleEndian>,
    pub blocks_allocated: U32<LittleEndian>,
    pub uuid_image: [u8; 16],
    pub uuid_last_snap: [u8; 16],
    pub uuid_link: [u8; 16],
    pub uuid_parent: [u8; 16],
    pub unused2: [u8; 56],
}

/// Host-form header: every field in native representation. This is the
/// shape the rest of the driver reads and mutates; it never touches
/// `VdiHeaderRaw` directly outside of `to_raw`/`from_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VdiHeader {
    pub version: u32,
    pub header_size: u32,
    pub image_type: u32,
    pub image_flags: u32,
    pub description: [u8; 256],
    pub offset_blockmap: u32,
    pub offset_data: u32,
    pub geometry_cylinders: u32,
    pub geometry_heads: u32,
    pub geometry_sectors: u32,
    pub sector_size: u32,
    pub disk_size: u64,
    pub block_size: u32,
    pub block_extra_data: u32,
    pub blocks_in_image: u32,
    pub blocks_allocated: u32,
    pub uuid_image: [u8; 16],
    pub uuid_last_snap: [u8; 16],
    pub uuid_link: [u8; 16],
    pub uuid_parent: [u8; 16],
}

impl VdiHeader {
    /// Builds the header for a newly created image (dynamic or static);
    /// `blocks_allocated`/block-map identity mapping for static images is
    /// the caller's (create path's) responsibility, not the header's.
    pub fn new(disk_size: u64, blocks: u32, image_type: u32, uuid_image: [u8; 16]) -> Self {
        let blockmap_bytes = (blocks as u64) * 4;
        let blockmap_bytes_rounded = blockmap_bytes.div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        let offset_data = DEFAULT_OFFSET_BLOCKMAP as u64 + blockmap_bytes_rounded;
        let total_sectors = disk_size / SECTOR_SIZE;
        let cylinders = (total_sectors / (16 * 63)) as u32;

        Self {
            version: VERSION,
            header_size: HEADER_SIZE_DECLARED,
            image_type,
            image_flags: 0,
            description: [0u8; 256],
            offset_blockmap: DEFAULT_OFFSET_BLOCKMAP,
            offset_data: offset_data as u32,
            geometry_cylinders: cylinders,
            geometry_heads: 16,
            geometry_sectors: 63,
            sector_size: SECTOR_SIZE as u32,
            disk_size,
            block_size: BLOCK_SIZE,
            block_extra_data: 0,
            blocks_in_image: blocks,
            blocks_allocated: 0,
            uuid_image,
            uuid_last_snap: [0u8; 16],
            uuid_link: [0u8; 16],
            uuid_parent: [0u8; 16],
        }
    }

    pub fn block_sectors(&self) -> u64 {
        self.block_size as u64 / self.sector_size as u64
    }

    pub fn total_sectors(&self) -> u64 {
        self.disk_size / self.sector_size as u64
    }

    /// The endian codec's "to wire form" half: converts every multi-byte
    /// field to little-endian.
    pub fn to_raw(&self) -> VdiHeaderRaw {
        VdiHeaderRaw {
            signature: U32::new(SIGNATURE),
            version: U32::new(self.version),
            header_size: U32::new(self.header_size),
            image_type: U32::new(self.image_type),
            image_flags: U32::new(self.image_flags),
            description: self.description,
            offset_blockmap: U32::new(self.offset_blockmap),
            offset_data: U32::new(self.offset_data),
            geometry_cylinders: U32::new(self.geometry_cylinders),
            geometry_heads: U32::new(self.geometry_heads),
            geometry_sectors: U32::new(self.geometry_sectors),
            sector_size: U32::new(self.sector_size),
            unused1: U32::new(0),
            disk_size: U64::new(self.disk_size),
            block_size: U32::new(self.block_size),
            block_extra_data: U32::new(self.block_extra_data),
            blocks_in_image: U32::new(self.blocks_in_image),
            blocks_allocated: U32::new(self.blocks_allocated),
            uuid_image: self.uuid_image,
            uuid_last_snap: self.uuid_last_snap,
            uuid_link: self.uuid_link,
            uuid_parent: self.uuid_parent,
            unused2: [0u8; 56],
        }
    }

    /// The endian codec's "to host form" half. Does not validate the
    /// signature or any other field — that is `open`'s job (§4.3).
    pub fn from_raw(raw: &VdiHeaderRaw) -> Self {
        Self {
            version: raw.version.get(),
            header_size: raw.header_size.get(),
            image_type: raw.image_type.get(),
            image_flags: raw.image_flags.get(),
            description: raw.description,
            offset_blockmap: raw.offset_blockmap.get(),
            offset_data: raw.offset_data.get(),
            geometry_cylinders: raw.geometry_cylinders.get(),
            geometry_heads: raw.geometry_heads.get(),
            geometry_sectors: raw.geometry_sectors.get(),
            sector_size: raw.sector_size.get(),
            disk_size: raw.disk_size.get(),
            block_size: raw.block_size.get(),
            block_extra_data: raw.block_extra_data.get(),
            blocks_in_image: raw.blocks_in_image.get(),
            blocks_allocated: raw.blocks_allocated.get(),
            uuid_image: raw.uuid_image,
            uuid_last_snap: raw.uuid_last_snap,
            uuid_link: raw.uuid_link,
            uuid_parent: raw.uuid_parent,
        }
    }
}

/// Renders pre-header + header as the single 512-byte sector they occupy
/// on disk. Used by the asynchronous path, which issues one write for the
/// whole sector rather than two `write_struct` calls.
pub fn header_sector_bytes(header: &VdiHeader) -> [u8; 512] {
    let mut buf = [0u8; 512];
    buf[0..64].copy_from_slice(&VdiPreHeader::new().text);
    buf[64..512].copy_from_slice(header.to_raw().as_bytes());
    buf
}

/// Score 100 iff `bytes` (the first >= 64 bytes of a candidate file) decode
/// a VDI signature at the magic offset; 0 otherwise. No side effects.
pub fn probe(bytes: &[u8]) -> u32 {
    if bytes.len() < 68 {
        return 0;
    }
    let sig = u32::from_le_bytes([bytes[64], bytes[65], bytes[66], bytes[67]]);
    if sig == SIGNATURE { 100 } else { 0 }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_header_is_byte_identical() {
        let h = VdiHeader::new(2 * 1024 * 1024, 2, IMAGE_TYPE_DYNAMIC, [7u8; 16]);
        let raw = h.to_raw();
        let back = VdiHeader::from_raw(&raw);
        assert_eq!(h, back);
        assert_eq!(raw.as_bytes(), h.to_raw().as_bytes());
    }

    #[test]
    fn probe_matches_signature_at_offset_64() {
        let h = VdiHeader::new(1024 * 1024, 1, IMAGE_TYPE_DYNAMIC, [1u8; 16]);
        let mut bytes = vec![0u8; 512];
        bytes[0..64].copy_from_slice(&VdiPreHeader::new().text);
        bytes[64..64 + core::mem::size_of::<VdiHeaderRaw>()].copy_from_slice(h.to_raw().as_bytes());
        assert_eq!(probe(&bytes), 100);
    }

    #[test]
    fn probe_rejects_zeroed_buffer() {
        let bytes = vec![0u8; 128];
        assert_eq!(probe(&bytes), 0);
    }

    #[test]
    fn probe_rejects_short_buffer() {
        assert_eq!(probe(&[0u8; 10]), 0);
    }
}
