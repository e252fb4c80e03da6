//! Load verification checksums.
//!
//! Two strategies exist. `full_sum` adds every byte and is what the host
//! side computes over an image before provisioning it. `partial_sum`
//! replicates the hardware checksum unit, which only has time to fetch a few
//! words per sweep period before its cursor moves on, so most bytes never
//! contribute. Several sweep variants have been observed and none is known
//! to be authoritative; every knob lives in [`SweepConfig`].

use super::error::{LoaderError, Result};
use super::memory::MemoryTarget;

/// Anything the sampler can fetch bytes from.
pub trait SampleSource {
    /// Bytes past the end of the source read as zero.
    fn byte_at(&self, offset: u64) -> u8;
}

impl SampleSource for [u8] {
    fn byte_at(&self, offset: u64) -> u8 {
        usize::try_from(offset)
            .ok()
            .and_then(|i| self.get(i))
            .copied()
            .unwrap_or(0)
    }
}

impl SampleSource for MemoryTarget {
    fn byte_at(&self, offset: u64) -> u8 {
        match u32::try_from(offset) {
            Ok(a) => self.read_byte(a),
            Err(_) => 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Bound {
    Inclusive,
    Exclusive,
}

impl Bound {
    fn admits(self, cursor: u64, bound: u64) -> bool {
        match self {
            Bound::Inclusive => cursor <= bound,
            Bound::Exclusive => cursor < bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    /// First cursor value of the sweep.
    pub cursor_start: u32,
    /// Cursor value that maps to byte offset 0 of the source.
    pub cursor_origin: u32,
    /// Bytes per cursor unit (2 for a 16-bit word-addressed cursor).
    pub cursor_unit_bytes: u32,
    /// Cursor increment per period.
    pub period_step: u32,
    /// Consecutive words summed at the start of each period.
    pub samples_per_period: u32,
    pub word_bytes: u32,
    pub sweep_upper_bound: u32,
    pub upper_bound_comparison: Bound,
}

impl SweepConfig {
    /// 16-bit word cursor stepping 16 words (32 bytes); the burst engine
    /// returns after three 4-byte words, bound 0x00BFF0 inclusive.
    pub fn burst32() -> Self {
        Self {
            cursor_start: 0,
            cursor_origin: 0,
            cursor_unit_bytes: 2,
            period_step: 16,
            samples_per_period: 3,
            word_bytes: 4,
            sweep_upper_bound: 0x00BFF0,
            upper_bound_comparison: Bound::Inclusive,
        }
    }

    /// Byte cursor from 0x4000 to 0x10000 (exclusive) in 16-byte steps,
    /// summing the whole step.
    pub fn linear16() -> Self {
        Self {
            cursor_start: 0x4000,
            cursor_origin: 0x4000,
            cursor_unit_bytes: 1,
            period_step: 16,
            samples_per_period: 4,
            word_bytes: 4,
            sweep_upper_bound: 0x10000,
            upper_bound_comparison: Bound::Exclusive,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.period_step == 0 {
            return Err(LoaderError::InvalidConfig("period_step must be non-zero".into()));
        }
        if self.cursor_unit_bytes == 0 || self.word_bytes == 0 {
            return Err(LoaderError::InvalidConfig(
                "cursor_unit_bytes and word_bytes must be non-zero".into(),
            ));
        }
        if self.cursor_start < self.cursor_origin {
            return Err(LoaderError::InvalidConfig(format!(
                "cursor_start {:#x} is below cursor_origin {:#x}",
                self.cursor_start, self.cursor_origin
            )));
        }
        Ok(())
    }

    /// Number of periods a sweep visits.
    pub fn periods(&self) -> u64 {
        let (start, bound, step) = (
            self.cursor_start as u64,
            self.sweep_upper_bound as u64,
            self.period_step as u64,
        );
        if !self.upper_bound_comparison.admits(start, bound) {
            return 0;
        }
        let last = match self.upper_bound_comparison {
            Bound::Inclusive => bound,
            Bound::Exclusive => bound - 1,
        };
        (last - start) / step + 1
    }
}

pub fn full_sum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

pub fn partial_sum<S: SampleSource + ?Sized>(src: &S, cfg: &SweepConfig) -> Result<u32> {
    cfg.validate()?;

    let sample_len = cfg.samples_per_period as u64 * cfg.word_bytes as u64;
    let bound = cfg.sweep_upper_bound as u64;
    let mut acc = 0u32;
    let mut cursor = cfg.cursor_start as u64;

    while cfg.upper_bound_comparison.admits(cursor, bound) {
        let base = (cursor - cfg.cursor_origin as u64) * cfg.cursor_unit_bytes as u64;
        for i in 0..sample_len {
            acc = acc.wrapping_add(src.byte_at(base + i) as u32);
        }
        cursor += cfg.period_step as u64;
    }
    Ok(acc)
}

pub fn verify(actual: u32, expected: u32) -> Result<u32> {
    if actual != expected {
        return Err(LoaderError::ChecksumMismatch { expected, actual });
    }
    Ok(actual)
}
