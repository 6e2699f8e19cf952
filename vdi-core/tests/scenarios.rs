// SPDX-License-Identifier: MIT

//! End-to-end scenarios S1-S5 and the boundary/round-trip properties they
//! exercise.

use vdi_core::disk::VdiDisk;
use vdi_core::header::{IMAGE_TYPE_DYNAMIC, UNALLOCATED};
use vdi_io::prelude::*;

const UUID: [u8; 16] = [0x42; 16];
const MIB: u64 = 1024 * 1024;

#[test]
fn s1_create_two_mib_dynamic_image() {
    let io = MemBackend::new();
    let disk = VdiDisk::create(io, 2 * MIB, false, UUID).unwrap();
    assert_eq!(disk.header().image_type, IMAGE_TYPE_DYNAMIC);
    assert_eq!(disk.header().blocks_in_image, 2);
    assert_eq!(disk.header().blocks_allocated, 0);

    let io = disk.close();
    let bytes = io.as_slice();
    // header (512) + round_up(2*4, 512) = 512 + 512 = 1024 bytes
    assert_eq!(bytes.len(), 1024);

    assert_eq!(&bytes[0..40], &b"<<< Oracle VM VirtualBox Disk Image >>>"[..]);
    let sig = u32::from_le_bytes(bytes[64..68].try_into().unwrap());
    assert_eq!(sig, 0xbeda107f);

    let e0 = u32::from_le_bytes(bytes[512..516].try_into().unwrap());
    let e1 = u32::from_le_bytes(bytes[516..520].try_into().unwrap());
    assert_eq!(e0, UNALLOCATED);
    assert_eq!(e1, UNALLOCATED);
    assert!(bytes[520..1024].iter().all(|&b| b == 0));
}

#[test]
fn s2_first_write_allocates_block_zero() {
    let io = MemBackend::new();
    let mut disk = VdiDisk::create(io, 2 * MIB, false, UUID).unwrap();
    disk.write_at(0, &[0xAA; 512]).unwrap();

    assert_eq!(disk.header().blocks_allocated, 1);
    assert_eq!(disk.blockmap_entry(0), 0);
    assert_eq!(disk.blockmap_entry(1), UNALLOCATED);

    let io = disk.close();
    let bytes = io.as_slice();
    assert_eq!(bytes.len() as u64, 1024 + MIB);
    assert_eq!(&bytes[1024..1024 + 512], &[0xAAu8; 512][..]);
    assert!(bytes[1024 + 512..].iter().all(|&b| b == 0));
}

#[test]
fn s3_second_write_allocates_block_one() {
    let io = MemBackend::new();
    let mut disk = VdiDisk::create(io, 2 * MIB, false, UUID).unwrap();
    disk.write_at(0, &[0xAA; 512]).unwrap();
    disk.write_at(2048, &[0x55; 512]).unwrap();

    assert_eq!(disk.header().blocks_allocated, 2);
    assert_eq!(disk.blockmap_entry(1), 1);

    let io = disk.close();
    let bytes = io.as_slice();
    let off = (1024 + MIB) as usize;
    assert_eq!(&bytes[off..off + 512], &[0x55u8; 512][..]);
    assert!(bytes[off + 512..].iter().all(|&b| b == 0));
}

#[test]
fn s4_close_and_reopen_preserves_contents() {
    let io = MemBackend::new();
    let mut disk = VdiDisk::create(io, 2 * MIB, false, UUID).unwrap();
    disk.write_at(0, &[0xAA; 512]).unwrap();
    disk.write_at(2048, &[0x55; 512]).unwrap();
    let io = disk.close();

    let mut disk = VdiDisk::open(io).unwrap();

    let mut buf = [0u8; 512];
    disk.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, [0xAA; 512]);

    disk.read_at(2048, &mut buf).unwrap();
    assert_eq!(buf, [0x55; 512]);

    // sector 1024 (middle of virtual block 0, still a hole within that
    // block's unwritten sectors)
    disk.read_at(1024, &mut buf).unwrap();
    assert_eq!(buf, [0u8; 512]);

    // sector 1536 (virtual block 0, allocated, written as zero)
    disk.read_at(1536, &mut buf).unwrap();
    assert_eq!(buf, [0u8; 512]);
}

#[test]
fn s5_corrupted_blockmap_entry_yields_two_findings() {
    let io = MemBackend::new();
    let mut disk = VdiDisk::create(io, 2 * MIB, false, UUID).unwrap();
    disk.write_at(0, &[0xAA; 512]).unwrap();
    disk.write_at(2048, &[0x55; 512]).unwrap();

    disk.corrupt_blockmap_entry_for_test(1, 0x10);

    let report = disk.check();
    assert_eq!(report.error_count(), 2);
}

#[test]
fn b1_read_past_end_returns_short_count_not_error() {
    let io = MemBackend::new();
    let mut disk = VdiDisk::create(io, MIB, false, UUID).unwrap();
    let total = disk.total_sectors();
    let mut buf = vec![0u8; 4 * 512];
    let n = disk.read_at(total - 1, &mut buf).unwrap();
    assert_eq!(n, 1);
}

#[test]
fn b2_write_crossing_block_boundary_allocates_two_consecutive_blocks() {
    let io = MemBackend::new();
    let mut disk = VdiDisk::create(io, 4 * MIB, false, UUID).unwrap();
    // sector 2047..2049 straddles block 0 / block 1
    let payload = vec![0x7Fu8; 2 * 512];
    disk.write_at(2047, &payload).unwrap();
    assert_eq!(disk.header().blocks_allocated, 2);
    assert_eq!(disk.blockmap_entry(0), 0);
    assert_eq!(disk.blockmap_entry(1), 1);
}

#[test]
fn b3_open_rejects_bad_version() {
    use vdi_core::header::VdiHeader;
    use vdi_core::VdiError;

    let mut header = VdiHeader::new(MIB, 1, IMAGE_TYPE_DYNAMIC, UUID);
    header.version = 0x0002_0000;
    let mut io = MemBackend::new();
    vdi_core_test_support::write_raw_header(&mut io, &header);

    assert!(matches!(VdiDisk::open(io), Err(VdiError::UnsupportedFormat(_))));
}

#[test]
fn b4_open_rejects_disk_size_mismatch() {
    use vdi_core::header::VdiHeader;
    use vdi_core::VdiError;

    let mut header = VdiHeader::new(MIB, 1, IMAGE_TYPE_DYNAMIC, UUID);
    header.disk_size = 123;
    let mut io = MemBackend::new();
    vdi_core_test_support::write_raw_header(&mut io, &header);

    assert!(matches!(VdiDisk::open(io), Err(VdiError::UnsupportedFormat(_))));
}

mod vdi_core_test_support {
    use vdi_core::header::VdiHeader;
    use vdi_io::prelude::*;

    /// Writes a header + fully-unallocated block map without going through
    /// `create`, so tests can corrupt a single field first.
    pub fn write_raw_header(io: &mut MemBackend, header: &VdiHeader) {
        let bytes = vdi_core::header::header_sector_bytes(header);
        io.write_at(0, &bytes).unwrap();
        let blockmap = vdi_core::BlockMap::new_unallocated(header.blocks_in_image);
        io.write_at(header.offset_blockmap as u64, &blockmap.to_padded_bytes())
            .unwrap();
    }
}
