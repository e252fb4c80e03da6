// raw block media
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::error::{LoaderError, Result};

pub const BLOCK_SIZE: usize = 512;

/// Read-only view of a raw, unpartitioned medium made of fixed-size blocks.
pub trait BlockSource {
    fn block_size(&self) -> usize;

    /// Number of whole blocks on the medium.
    fn block_count(&self) -> u64;

    /// Returns exactly `block_size()` bytes, or `BlockOutOfRange` past the end.
    fn read_block(&mut self, index: u64) -> Result<Vec<u8>>;
}

/// Medium held entirely in memory. A trailing partial block is not addressable.
pub struct MemMedium {
    data: Vec<u8>,
    block_size: usize,
}

impl MemMedium {
    pub fn new(data: Vec<u8>, block_size: usize) -> Self {
        Self { data, block_size }
    }
}

impl BlockSource for MemMedium {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.len() / self.block_size) as u64
    }

    fn read_block(&mut self, index: u64) -> Result<Vec<u8>> {
        let blocks = self.block_count();
        if index >= blocks {
            return Err(LoaderError::BlockOutOfRange { index, blocks });
        }
        let start = index as usize * self.block_size;
        Ok(self.data[start..start + self.block_size].to_vec())
    }
}

/// Disk image or raw device node.
pub struct FileMedium {
    file: File,
    block_size: usize,
    blocks: u64,
}

impl FileMedium {
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let mut file = File::open(path)?;
        // seek works for device nodes where metadata().len() reports 0
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            block_size,
            blocks: len / block_size as u64,
        })
    }
}

impl BlockSource for FileMedium {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_block(&mut self, index: u64) -> Result<Vec<u8>> {
        if index >= self.blocks {
            return Err(LoaderError::BlockOutOfRange {
                index,
                blocks: self.blocks,
            });
        }
        let mut buf = vec![0; self.block_size];
        self.file
            .seek(SeekFrom::Start(index * self.block_size as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mem_medium_reads_whole_blocks_only() {
        let mut data = vec![0u8; BLOCK_SIZE * 2 + 100];
        data[BLOCK_SIZE] = 0xAA;
        let mut m = MemMedium::new(data, BLOCK_SIZE);

        assert_eq!(m.block_count(), 2);
        let b = m.read_block(1).unwrap();
        assert_eq!(b.len(), BLOCK_SIZE);
        assert_eq!(b[0], 0xAA);
        assert!(matches!(
            m.read_block(2),
            Err(LoaderError::BlockOutOfRange { index: 2, blocks: 2 })
        ));
    }

    #[test]
    fn file_medium_reads_at_block_offsets() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let mut data = vec![0u8; BLOCK_SIZE * 3];
        data[2 * BLOCK_SIZE + 5] = 0x42;
        f.write_all(&data).unwrap();
        f.flush().unwrap();

        let mut m = FileMedium::open(f.path(), BLOCK_SIZE).unwrap();
        assert_eq!(m.block_count(), 3);
        assert_eq!(m.read_block(2).unwrap()[5], 0x42);
        assert!(m.read_block(3).is_err());
    }
}
