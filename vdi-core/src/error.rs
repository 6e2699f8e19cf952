// SPDX-License-Identifier: MIT

use core::fmt;

use vdi_io::error::IoError;

pub type VdiResult<T = ()> = core::result::Result<T, VdiError>;

/// Error type for every `vdi-core` operation.
#[derive(Debug, Clone, Copy)]
pub enum VdiError {
    /// Signature, version, alignment or size-consistency check failed on
    /// open. The string names which check failed.
    UnsupportedFormat(&'static str),
    /// The child block device failed a read.
    ReadFailed(IoError),
    /// The child block device failed a write.
    WriteFailed(IoError),
    /// Block-map or staging-buffer allocation failed.
    OutOfMemory,
    /// `create` invoked with a zero size or a missing required option.
    InvalidArgument(&'static str),
}

impl VdiError {
    pub fn msg(&self) -> &'static str {
        match self {
            VdiError::UnsupportedFormat(reason) => reason,
            VdiError::ReadFailed(_) => "read error",
            VdiError::WriteFailed(_) => "write error",
            VdiError::OutOfMemory => "out of memory",
            VdiError::InvalidArgument(reason) => reason,
        }
    }

    pub fn source(&self) -> Option<&IoError> {
        match self {
            VdiError::ReadFailed(e) | VdiError::WriteFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for VdiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        if let Some(src) = self.source() {
            write!(f, "\n  caused by: {src}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VdiError {}
