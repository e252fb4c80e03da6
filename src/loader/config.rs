// loader configuration
use super::block::BLOCK_SIZE;
use super::card::STATUS_IDLE;
use super::error::{LoaderError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub block_size: usize,
    /// Leading bytes of the stream that are read but never written (A78 header).
    pub header_skip_bytes: u32,
    /// Blocks read per load, regardless of the header skip.
    pub total_sectors: u32,
    /// Device status value that lets the loader leave `Idle`.
    pub device_ready_idle_value: u8,
    /// First block of the image on the medium.
    pub start_block: u32,
    /// Abort after this many ticks without progress. `None` waits forever.
    pub stall_timeout_ticks: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            header_skip_bytes: 128,
            total_sectors: 97,
            device_ready_idle_value: STATUS_IDLE,
            start_block: 1,
            stall_timeout_ticks: None,
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > u32::MAX as usize {
            return Err(LoaderError::InvalidConfig(format!(
                "block_size {} out of range",
                self.block_size
            )));
        }
        if self.total_sectors == 0 {
            return Err(LoaderError::InvalidConfig("total_sectors must be at least 1".into()));
        }
        if self.start_block.checked_add(self.total_sectors - 1).is_none() {
            return Err(LoaderError::InvalidConfig(format!(
                "{} sectors from block {} run past the last addressable block",
                self.total_sectors, self.start_block
            )));
        }
        if self.header_skip_bytes as u64 > self.stream_len() {
            return Err(LoaderError::InvalidConfig(format!(
                "header_skip_bytes {} exceeds the {} byte stream",
                self.header_skip_bytes,
                self.stream_len()
            )));
        }
        Ok(())
    }

    /// Bytes read from the device over a whole load.
    pub fn stream_len(&self) -> u64 {
        self.total_sectors as u64 * self.block_size as u64
    }

    /// Bytes that land in the memory target after the header skip.
    pub fn payload_len(&self) -> u64 {
        self.stream_len().saturating_sub(self.header_skip_bytes as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_payload_is_97_sectors_minus_header() {
        let cfg = LoaderConfig::default();
        assert_eq!(cfg.stream_len(), 49664);
        assert_eq!(cfg.payload_len(), 49536);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_values() {
        let zero = LoaderConfig { total_sectors: 0, ..Default::default() };
        assert!(zero.validate().is_err());

        let huge_header = LoaderConfig {
            total_sectors: 1,
            header_skip_bytes: 513,
            ..Default::default()
        };
        assert!(huge_header.validate().is_err());
    }

    #[test]
    fn last_sector_must_be_addressable() {
        let at_edge = LoaderConfig { start_block: u32::MAX - 96, ..Default::default() };
        assert!(at_edge.validate().is_ok());

        let past_edge = LoaderConfig { start_block: u32::MAX - 95, ..Default::default() };
        assert!(matches!(past_edge.validate(), Err(LoaderError::InvalidConfig(_))));

        let single = LoaderConfig {
            start_block: u32::MAX,
            total_sectors: 1,
            header_skip_bytes: 0,
            ..Default::default()
        };
        assert!(single.validate().is_ok());
    }
}
