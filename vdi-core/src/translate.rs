// SPDX-License-Identifier: MIT

//! Virtual-sector to physical-offset translation. Pure function, no I/O.

use crate::blockmap::BlockMap;

/// One contiguous run produced by `next_segment`, expressed in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// `len` sectors of virtual space with no backing physical block.
    Hole { len: u64 },
    /// `len` sectors starting at physical sector `offset` (sectors from the
    /// start of the backing file, i.e. already includes `offset_data`).
    Mapped { offset: u64, len: u64 },
}

impl Segment {
    pub fn len(&self) -> u64 {
        match self {
            Segment::Hole { len } => *len,
            Segment::Mapped { len, .. } => *len,
        }
    }
}

/// Produces the next segment starting at virtual sector `s`, covering at
/// most `n` sectors (fewer if a block boundary is reached first).
///
/// `offset_data` and `block_sectors` are in sectors (already divided by the
/// 512-byte sector size) to keep every returned offset directly addable to
/// a sector-granular IO call.
pub fn next_segment(
    s: u64,
    n: u64,
    block_sectors: u64,
    offset_data_sectors: u64,
    blockmap: &BlockMap,
) -> Segment {
    debug_assert!(n > 0);
    let block_index = (s / block_sectors) as u32;
    let sector_in_block = s % block_sectors;
    let seg_len = n.min(block_sectors - sector_in_block);
    let entry = blockmap.get(block_index);

    if entry == crate::header::UNALLOCATED {
        Segment::Hole { len: seg_len }
    } else {
        let offset = offset_data_sectors + entry as u64 * block_sectors + sector_in_block;
        Segment::Mapped {
            offset,
            len: seg_len,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const BLOCK_SECTORS: u64 = 2048;

    #[test]
    fn unallocated_block_yields_hole() {
        let map = BlockMap::new_unallocated(4);
        let seg = next_segment(0, 10, BLOCK_SECTORS, 2, &map);
        assert_eq!(seg, Segment::Hole { len: 10 });
    }

    #[test]
    fn allocated_block_yields_mapped_offset() {
        let mut map = BlockMap::new_unallocated(4);
        map.set(1, 0);
        let seg = next_segment(BLOCK_SECTORS, 5, BLOCK_SECTORS, 2, &map);
        assert_eq!(
            seg,
            Segment::Mapped {
                offset: 2,
                len: 5
            }
        );
    }

    #[test]
    fn segment_is_capped_at_block_boundary() {
        let map = BlockMap::new_unallocated(4);
        let seg = next_segment(BLOCK_SECTORS - 3, 10, BLOCK_SECTORS, 2, &map);
        assert_eq!(seg, Segment::Hole { len: 3 });
    }

    #[test]
    fn concatenated_segments_cover_exactly_n_sectors() {
        let mut map = BlockMap::new_unallocated(4);
        map.set(0, 0);
        let mut s = 0u64;
        let mut remaining = 3000u64;
        let mut total = 0u64;
        while remaining > 0 {
            let seg = next_segment(s, remaining, BLOCK_SECTORS, 2, &map);
            total += seg.len();
            s += seg.len();
            remaining -= seg.len();
        }
        assert_eq!(total, 3000);
    }
}
