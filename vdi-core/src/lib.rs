// SPDX-License-Identifier: MIT

//! VirtualBox VDI sparse block-device driver: header/block-map model,
//! virtual-to-physical translation, the synchronous and asynchronous I/O
//! paths, and image lifecycle (create/open/close/flush/check).

pub mod allocator;
pub mod async_disk;
pub mod blockmap;
pub mod check;
pub mod disk;
pub mod driver;
pub mod error;
pub mod header;
mod io_ops;
pub mod translate;

pub use blockmap::BlockMap;
pub use check::{CheckReport, Finding, Severity};
pub use disk::VdiDisk;
pub use driver::{CreateOptions, VdiFormat};
pub use error::{VdiError, VdiResult};
pub use header::VdiHeader;
pub use translate::Segment;
