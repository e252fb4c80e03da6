// loader error taxonomy
use thiserror::Error;

use super::sector::LoaderState;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("image is too large ({len} bytes, needs {blocks} blocks, slot holds {max_blocks})")]
    OversizeImage { len: usize, blocks: usize, max_blocks: usize },

    #[error("device never reported idle after {ticks} ticks")]
    DeviceStall { ticks: u64 },

    #[error("loader made no progress in {state:?} for {ticks} ticks")]
    Stalled { state: LoaderState, ticks: u64 },

    #[error("unrecognized loader state register value {0:#04x}")]
    UnrecognizedState(u8),

    #[error("checksum mismatch: expected {expected:08X}, got {actual:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("block {index} is outside the medium ({blocks} blocks)")]
    BlockOutOfRange { index: u64, blocks: u64 },

    #[error("write to {address:#08x} is outside the memory target ({capacity} bytes)")]
    AddressOutOfRange { address: u32, capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
