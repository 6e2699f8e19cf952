// SPDX-License-Identifier: MIT

//! Asynchronous I/O path (§4.9): the same read/write logic as `disk.rs`,
//! driven through callback completions instead of blocking.
//!
//! The in-memory header and block map are shared across concurrently
//! in-flight requests (§5), so they live behind `Rc<RefCell<..>>` — the
//! idiomatic shape for callback-reentrant state in safe Rust without an
//! async runtime. The spec's single-threaded-dispatch assumption is what
//! makes the plain `RefCell` (no `Mutex`) sound; see the doc comment on
//! `VdiAsyncDisk`.

use std::cell::RefCell;
use std::rc::Rc;

use vdi_io::async_io::{AsyncBlockIo, Completion, IoOutcome, Trampoline};

use crate::blockmap::BlockMap;
use crate::error::{VdiError, VdiResult};
use crate::header::{self, VdiHeader};
use crate::translate::{self, Segment};

/// Phase tag for an in-flight allocating write (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Between segments; no publish sequence in flight.
    Normal,
    /// The data block has been written; next action is the block-map
    /// sector write (publish step (b)).
    MustWriteBlockmap { virtual_block: u32, new_index: u32 },
    /// The block-map sector has been written; next action is the header
    /// write (publish step (c)).
    MustWriteHeader { virtual_block: u32, new_index: u32 },
    /// All three publish-sequence writes have completed; the next
    /// completion resets to `Normal` and advances the cursor.
    HeaderWritten { advance: u64 },
}

struct Shared<IO: AsyncBlockIo> {
    io: IO,
    header: VdiHeader,
    blockmap: BlockMap,
    trampoline: Trampoline,
}

/// A single open VDI image driven through the asynchronous path.
///
/// NOTE on the single-mutex escape hatch (§5): this implementation assumes
/// the surrounding event loop dispatches completions serially, matching
/// the spec's scheduling model, so `Rc<RefCell<_>>` (not `Send`/`Sync`) is
/// sufficient. A framework that ever runs completions in parallel must
/// swap this for `Arc<Mutex<_>>` — the spec calls this out explicitly as
/// the implementer's responsibility, not something this core does today.
pub struct VdiAsyncDisk<IO: AsyncBlockIo> {
    shared: Rc<RefCell<Shared<IO>>>,
}

impl<IO: AsyncBlockIo + 'static> VdiAsyncDisk<IO> {
    pub fn new(io: IO, header: VdiHeader, blockmap: BlockMap) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                io,
                header,
                blockmap,
                trampoline: Trampoline::new(),
            })),
        }
    }

    pub fn header(&self) -> VdiHeader {
        self.shared.borrow().header
    }

    /// Runs every completion currently queued in the trampoline. The
    /// surrounding event loop is expected to call this whenever it is safe
    /// to re-enter (after the current phase transition has been
    /// committed), exactly as the zero-fill "must yield" rule requires.
    pub fn pump(&self) {
        // Split the borrow so `io`'s completions (invoked by the backend
        // before returning from `submit_*`, if it chooses to) can't alias
        // `trampoline` while we're draining it.
        let mut pending = {
            let mut s = self.shared.borrow_mut();
            core::mem::take(&mut s.trampoline)
        };
        pending.run_pending();
        self.shared.borrow_mut().trampoline = pending;
    }

    fn offset_data_sectors(&self) -> u64 {
        self.shared.borrow().header.offset_data as u64 / 512
    }

    /// Issues an asynchronous read of `nb_sectors` sectors starting at
    /// `sector_num`. `on_complete` fires exactly once, with the filled
    /// buffer on success.
    pub fn submit_read(
        &self,
        sector_num: u64,
        nb_sectors: u64,
        on_complete: impl FnOnce(VdiResult<Vec<u8>>) + 'static,
    ) {
        let buf = vec![0u8; (nb_sectors as usize) * 512];
        let state = Rc::new(RefCell::new(ReadState {
            disk: self.shared.clone(),
            sector_num,
            nb_sectors,
            buf,
            pos: 0,
            on_complete: Some(Box::new(on_complete)),
        }));
        Self::step_read(state);
    }

    fn step_read(state: Rc<RefCell<ReadState<IO>>>) {
        let (total, block_sectors, offset_data_sectors) = {
            let st = state.borrow();
            let shared = st.disk.borrow();
            (
                shared.header.total_sectors(),
                shared.header.block_sectors(),
                shared.header.offset_data as u64 / 512,
            )
        };

        let (sector_num, nb_sectors) = {
            let st = state.borrow();
            (st.sector_num, st.nb_sectors)
        };

        if nb_sectors == 0 || sector_num >= total {
            let mut st = state.borrow_mut();
            let cb = st.on_complete.take().expect("completed twice");
            let buf = core::mem::take(&mut st.buf);
            drop(st);
            cb(Ok(buf));
            return;
        }

        let n = nb_sectors.min(total - sector_num);
        let seg = {
            let st = state.borrow();
            let shared = st.disk.borrow();
            translate::next_segment(
                sector_num,
                n,
                block_sectors,
                offset_data_sectors,
                &shared.blockmap,
            )
        };

        match seg {
            Segment::Hole { len } => {
                {
                    let mut st = state.borrow_mut();
                    let pos = st.pos;
                    st.buf[pos..pos + len as usize * 512].fill(0);
                    st.pos += len as usize * 512;
                    st.sector_num += len;
                    st.nb_sectors -= len;
                }
                let disk = state.borrow().disk.clone();
                let state2 = state.clone();
                disk.borrow_mut()
                    .trampoline
                    .defer(move || Self::step_read(state2));
            }
            Segment::Mapped { offset, len } => {
                let read_len = len as usize * 512;
                let buf = vec![0u8; read_len];
                let cb: Completion = Box::new({
                    let state = state.clone();
                    move |outcome| {
                        if let IoOutcome::Read { buf, result } = outcome {
                            match result {
                                Ok(()) => {
                                    {
                                        let mut st = state.borrow_mut();
                                        let pos = st.pos;
                                        st.buf[pos..pos + buf.len()].copy_from_slice(&buf);
                                        st.pos += buf.len();
                                        st.sector_num += len;
                                        st.nb_sectors -= len;
                                    }
                                    Self::step_read(state);
                                }
                                Err(e) => {
                                    let mut st = state.borrow_mut();
                                    let cb = st.on_complete.take().expect("completed twice");
                                    drop(st);
                                    cb(Err(VdiError::ReadFailed(e)));
                                }
                            }
                        }
                    }
                });
                let mut shared = state.borrow().disk.borrow_mut();
                let s = &mut *shared;
                s.io.submit_read(offset * 512, buf, &mut s.trampoline, cb);
            }
        }
    }

    /// Issues an asynchronous write of `data` (sector-sized) starting at
    /// `sector_num`. `on_complete` fires exactly once.
    pub fn submit_write(
        &self,
        sector_num: u64,
        data: Vec<u8>,
        on_complete: impl FnOnce(VdiResult<()>) + 'static,
    ) {
        let nb_sectors = (data.len() / 512) as u64;
        let state = Rc::new(RefCell::new(WriteState {
            disk: self.shared.clone(),
            sector_num,
            nb_sectors,
            buf: data,
            pos: 0,
            phase: Phase::Normal,
            staging: None,
            on_complete: Some(Box::new(on_complete)),
        }));
        Self::step_write(state);
    }

    fn step_write(state: Rc<RefCell<WriteState<IO>>>) {
        let (total, block_sectors, offset_data_sectors) = {
            let st = state.borrow();
            let shared = st.disk.borrow();
            (
                shared.header.total_sectors(),
                shared.header.block_sectors(),
                shared.header.offset_data as u64 / 512,
            )
        };
        let (sector_num, nb_sectors) = {
            let st = state.borrow();
            (st.sector_num, st.nb_sectors)
        };

        if nb_sectors == 0 || sector_num >= total {
            let mut st = state.borrow_mut();
            let cb = st.on_complete.take().expect("completed twice");
            drop(st);
            cb(Ok(()));
            return;
        }

        let n = nb_sectors.min(total - sector_num);
        let seg = {
            let st = state.borrow();
            let shared = st.disk.borrow();
            translate::next_segment(
                sector_num,
                n,
                block_sectors,
                offset_data_sectors,
                &shared.blockmap,
            )
        };

        match seg {
            Segment::Mapped { offset, len } => {
                let chunk = {
                    let st = state.borrow();
                    st.buf[st.pos..st.pos + len as usize * 512].to_vec()
                };
                let cb = Self::write_completion_cb(state.clone(), len);
                let mut shared = state.borrow().disk.borrow_mut();
                let s = &mut *shared;
                s.io.submit_write(offset * 512, chunk, &mut s.trampoline, cb);
            }
            Segment::Hole { len } => {
                let (_virtual_block, sector_in_block, new_index, block_size) = {
                    let mut st = state.borrow_mut();
                    let mut shared = st.disk.borrow_mut();
                    let block_sectors = shared.header.block_sectors();
                    let virtual_block = (sector_num / block_sectors) as u32;
                    let sector_in_block = sector_num % block_sectors;
                    let new_index = shared.header.blocks_allocated;
                    shared.blockmap.set(virtual_block, new_index);
                    shared.header.blocks_allocated += 1;
                    let block_size = shared.header.block_size as usize;
                    st.phase = Phase::MustWriteBlockmap {
                        virtual_block,
                        new_index,
                    };
                    (virtual_block, sector_in_block, new_index, block_size)
                };

                let mut staging = vec![0u8; block_size];
                let chunk_start = (sector_in_block * 512) as usize;
                {
                    let st = state.borrow();
                    staging[chunk_start..chunk_start + len as usize * 512]
                        .copy_from_slice(&st.buf[st.pos..st.pos + len as usize * 512]);
                }
                state.borrow_mut().staging = Some(staging.clone());

                let data_offset = {
                    let st = state.borrow();
                    let shared = st.disk.borrow();
                    shared.header.offset_data as u64 + new_index as u64 * shared.header.block_size as u64
                };

                let cb = Self::write_completion_cb(state.clone(), len);
                let mut shared = state.borrow().disk.borrow_mut();
                let s = &mut *shared;
                s.io.submit_write(data_offset, staging, &mut s.trampoline, cb);
            }
        }
    }

    fn write_completion_cb(state: Rc<RefCell<WriteState<IO>>>, seg_len: u64) -> Completion {
        Box::new(move |outcome| {
            let result = match outcome {
                IoOutcome::Write { result } => result,
                _ => return,
            };

            if let Err(e) = result {
                let mut st = state.borrow_mut();
                let cb = st.on_complete.take().expect("completed twice");
                drop(st);
                cb(Err(VdiError::WriteFailed(e)));
                return;
            }

            let phase = state.borrow().phase;
            match phase {
                Phase::Normal => {
                    // a plain in-place (Mapped) write just completed
                    let mut st = state.borrow_mut();
                    st.pos += seg_len as usize * 512;
                    st.sector_num += seg_len;
                    st.nb_sectors -= seg_len;
                    drop(st);
                    Self::step_write(state);
                }
                Phase::MustWriteBlockmap {
                    virtual_block,
                    new_index,
                } => {
                    // (a) just completed; issue (b)
                    let (bytes, offset) = {
                        let st = state.borrow();
                        let shared = st.disk.borrow();
                        let (bytes, sector) = shared.blockmap.sector_bytes(virtual_block);
                        (bytes, shared.header.offset_blockmap as u64 + sector * 512)
                    };
                    state.borrow_mut().phase = Phase::MustWriteHeader {
                        virtual_block,
                        new_index,
                    };
                    let cb = Self::write_completion_cb(state.clone(), seg_len);
                    let mut shared = state.borrow().disk.borrow_mut();
                    let s = &mut *shared;
                    s.io.submit_write(offset, bytes.to_vec(), &mut s.trampoline, cb);
                }
                Phase::MustWriteHeader { .. } => {
                    // (b) just completed; issue (c)
                    let bytes = {
                        let st = state.borrow();
                        let shared = st.disk.borrow();
                        header::header_sector_bytes(&shared.header)
                    };
                    state.borrow_mut().phase = Phase::HeaderWritten { advance: seg_len };
                    let cb = Self::write_completion_cb(state.clone(), seg_len);
                    let mut shared = state.borrow().disk.borrow_mut();
                    let s = &mut *shared;
                    s.io.submit_write(0, bytes.to_vec(), &mut s.trampoline, cb);
                }
                Phase::HeaderWritten { advance } => {
                    // (c) just completed; publish sequence is durable
                    let mut st = state.borrow_mut();
                    st.staging = None;
                    st.phase = Phase::Normal;
                    st.pos += advance as usize * 512;
                    st.sector_num += advance;
                    st.nb_sectors -= advance;
                    drop(st);
                    Self::step_write(state);
                }
            }
        })
    }
}

struct ReadState<IO: AsyncBlockIo> {
    disk: Rc<RefCell<Shared<IO>>>,
    sector_num: u64,
    nb_sectors: u64,
    buf: Vec<u8>,
    pos: usize,
    on_complete: Option<Box<dyn FnOnce(VdiResult<Vec<u8>>)>>,
}

struct WriteState<IO: AsyncBlockIo> {
    disk: Rc<RefCell<Shared<IO>>>,
    sector_num: u64,
    nb_sectors: u64,
    buf: Vec<u8>,
    pos: usize,
    phase: Phase,
    staging: Option<Vec<u8>>,
    on_complete: Option<Box<dyn FnOnce(VdiResult<()>)>>,
}
