// external memory array: byte-addressed, word-organised
use super::error::{LoaderError, Result};

pub const WORD_BYTES: usize = 4;

/// Where a logical byte address lands in the word store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Placement {
    pub word_index: u32,
    pub byte_lane: u8,
}

impl Placement {
    pub fn of(address: u32) -> Self {
        Self {
            word_index: address >> 2,
            byte_lane: (address & 3) as u8,
        }
    }
}

#[derive(Debug)]
pub struct MemoryTarget {
    words: Vec<u32>,
}

impl MemoryTarget {
    /// Capacity is rounded up to a whole word.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            words: vec![0; capacity_bytes.div_ceil(WORD_BYTES)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BYTES
    }

    pub fn write_byte(&mut self, address: u32, v: u8) -> Result<()> {
        let p = Placement::of(address);
        let capacity = self.capacity();
        let word = self
            .words
            .get_mut(p.word_index as usize)
            .ok_or(LoaderError::AddressOutOfRange { address, capacity })?;
        let shift = p.byte_lane as u32 * 8;
        *word = (*word & !(0xFF << shift)) | ((v as u32) << shift);
        Ok(())
    }

    /// Out-of-range reads return 0, like an undriven bus.
    pub fn read_byte(&self, address: u32) -> u8 {
        let p = Placement::of(address);
        match self.words.get(p.word_index as usize) {
            Some(w) => (w >> (p.byte_lane as u32 * 8)) as u8,
            None => 0,
        }
    }

    pub fn read_word(&self, word_index: u32) -> u32 {
        self.words.get(word_index as usize).copied().unwrap_or(0)
    }

    pub fn read_bytes(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32).map(|i| self.read_byte(address + i)).collect()
    }
}
