// game slot layout on the raw medium
use std::io::{Seek, SeekFrom, Write};

use log::info;

use super::block::BLOCK_SIZE;
use super::error::{LoaderError, Result};

/// Block 0 is reserved; slot `n` starts at `reserved_blocks + n * blocks_per_slot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    pub block_size: usize,
    pub blocks_per_slot: u32,
    pub reserved_blocks: u32,
}

impl Default for SlotLayout {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            blocks_per_slot: 100,
            reserved_blocks: 1,
        }
    }
}

impl SlotLayout {
    pub fn start_block(&self, slot: u32) -> Result<u32> {
        slot.checked_mul(self.blocks_per_slot)
            .and_then(|b| b.checked_add(self.reserved_blocks))
            .ok_or_else(|| {
                LoaderError::InvalidConfig(format!(
                    "slot {slot} with {} blocks per slot is beyond the addressable medium",
                    self.blocks_per_slot
                ))
            })
    }

    pub fn byte_offset(&self, slot: u32) -> Result<u64> {
        Ok(self.start_block(slot)? as u64 * self.block_size as u64)
    }

    pub fn blocks_needed(&self, len: usize) -> usize {
        len.div_ceil(self.block_size)
    }

    pub fn max_image_bytes(&self) -> usize {
        self.blocks_per_slot as usize * self.block_size
    }

    /// Number of blocks the image occupies, or `OversizeImage`.
    pub fn check_fits(&self, len: usize) -> Result<usize> {
        let blocks = self.blocks_needed(len);
        if blocks > self.blocks_per_slot as usize {
            return Err(LoaderError::OversizeImage {
                len,
                blocks,
                max_blocks: self.blocks_per_slot as usize,
            });
        }
        Ok(blocks)
    }

    /// Write `image` into `slot`, zero-padding only up to the next block boundary.
    pub fn provision<W: Write + Seek>(&self, medium: &mut W, slot: u32, image: &[u8]) -> Result<usize> {
        let blocks = self.check_fits(image.len())?;
        let start = self.start_block(slot)?;

        info!(
            "slot {slot}: {} bytes, {blocks} blocks at {}-{}",
            image.len(),
            start,
            (start as usize + blocks).saturating_sub(1)
        );

        medium.seek(SeekFrom::Start(start as u64 * self.block_size as u64))?;
        medium.write_all(image)?;
        let remainder = image.len() % self.block_size;
        if remainder > 0 {
            medium.write_all(&vec![0; self.block_size - remainder])?;
        }
        medium.flush()?;
        Ok(blocks)
    }
}
