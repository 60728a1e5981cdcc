//! Error types for CDB storage operations

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdbError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted database header")]
    CorruptHeader,

    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: &'static str },

    #[error("writer has already been finalized")]
    AlreadyFinalized,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("database size exceeded: {size} > {max}")]
    TooLarge { size: u64, max: u64 },
}

pub type Result<T> = std::result::Result<T, CdbError>;
