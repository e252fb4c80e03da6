//! Sector-to-memory loader state machine.
//!
//! Mirrors the register-transfer design it replaces: every tick the next
//! register set is computed from a snapshot of the current one and committed
//! in one go, so no branch ever observes a value written earlier in the
//! same tick.

use log::{debug, info, warn};

use super::card::{CardSignals, HostRequest};
use super::config::LoaderConfig;
use super::error::{LoaderError, Result};
use super::memory::MemoryTarget;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum LoaderState {
    Idle = 0,
    LoadStart = 1,
    LoadWait = 2,
    LoadData = 3,
    LoadNext = 4,
    Complete = 5,
}

impl LoaderState {
    pub fn decode(code: u8) -> Option<Self> {
        Some(match code {
            0 => LoaderState::Idle,
            1 => LoaderState::LoadStart,
            2 => LoaderState::LoadWait,
            3 => LoaderState::LoadData,
            4 => LoaderState::LoadNext,
            5 => LoaderState::Complete,
            _ => return None,
        })
    }
}

/// Byte strobe as seen this tick and the tick before.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct EdgeShadow {
    pub current: bool,
    pub previous: bool,
}

impl EdgeShadow {
    fn sample(self, level: bool) -> Self {
        Self { current: level, previous: self.current }
    }

    pub fn rising(&self) -> bool {
        self.current && !self.previous
    }
}

/// Registers of one image transfer. A fresh session starts with every flag clear.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSession {
    /// Raw state register; decoded each tick.
    pub state: u8,
    /// Block offset from the configured start block.
    pub sector: u32,
    pub byte_in_sector: u32,
    pub header_skipped: u32,
    pub write_addr: u32,
    pub bytes_written: u64,
    pub rd: bool,
    pub wr_pending: bool,
    pub strobe: EdgeShadow,
    pub load_complete: bool,
    pub game_loaded: bool,
    pub anomalies: u32,
}

pub struct SectorLoader {
    cfg: LoaderConfig,
    regs: LoadSession,
}

impl SectorLoader {
    pub fn new(cfg: LoaderConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg, regs: LoadSession::default() })
    }

    /// Discard the current session and start over in `Idle`.
    pub fn reset(&mut self) {
        self.regs = LoadSession::default();
    }

    pub fn session(&self) -> &LoadSession {
        &self.regs
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    pub fn state(&self) -> Option<LoaderState> {
        LoaderState::decode(self.regs.state)
    }

    /// Lines driven into the device until the next tick.
    pub fn request(&self) -> HostRequest {
        HostRequest {
            rd: self.regs.rd,
            address: self.cfg.start_block + self.regs.sector,
        }
    }

    /// Overwrite the state register, as a glitch on the real flops would.
    #[cfg(test)]
    pub(crate) fn force_state_register(&mut self, code: u8) {
        self.regs.state = code;
    }

    pub fn step(&mut self, sig: &CardSignals, mem: &mut MemoryTarget) -> Result<()> {
        let cur = self.regs.clone();
        let mut next = cur.clone();
        next.strobe = cur.strobe.sample(sig.byte_available);

        let block_size = self.cfg.block_size as u32;

        match LoaderState::decode(cur.state) {
            Some(LoaderState::Idle) => {
                if sig.ready && sig.status == self.cfg.device_ready_idle_value {
                    next.state = LoaderState::LoadStart as u8;
                }
            }

            Some(LoaderState::LoadStart) => {
                next.rd = true;
                next.byte_in_sector = 0;
                next.state = LoaderState::LoadWait as u8;
            }

            Some(LoaderState::LoadWait) => {
                if !sig.ready {
                    next.rd = false;
                    next.state = LoaderState::LoadData as u8;
                }
            }

            Some(LoaderState::LoadData) => {
                if sig.ready && cur.byte_in_sector < block_size {
                    debug!(
                        "block {} ended after {} bytes",
                        self.cfg.start_block + cur.sector,
                        cur.byte_in_sector
                    );
                    next.state = LoaderState::LoadNext as u8;
                } else if next.strobe.rising() {
                    if cur.header_skipped < self.cfg.header_skip_bytes {
                        next.header_skipped = cur.header_skipped + 1;
                    } else {
                        mem.write_byte(cur.write_addr, sig.data)?;
                        next.wr_pending = true;
                        next.write_addr = cur.write_addr + 1;
                        next.bytes_written = cur.bytes_written + 1;
                    }
                    next.byte_in_sector = cur.byte_in_sector + 1;

                    if cur.byte_in_sector == block_size - 1 {
                        next.state = LoaderState::LoadNext as u8;
                    }
                }
            }

            Some(LoaderState::LoadNext) => {
                next.wr_pending = false;
                if cur.sector == self.cfg.total_sectors - 1 {
                    next.state = LoaderState::Complete as u8;
                } else {
                    debug!("block {} done", self.cfg.start_block + cur.sector);
                    next.sector = cur.sector + 1;
                    next.state = LoaderState::LoadStart as u8;
                }
            }

            Some(LoaderState::Complete) => {
                if !cur.load_complete {
                    info!(
                        "load complete: {} sectors, {} bytes written",
                        self.cfg.total_sectors, cur.bytes_written
                    );
                }
                next.load_complete = true;
                next.game_loaded = true;
            }

            None => {
                // restart the transfer from a fresh session; a half-skipped
                // header or stale write address would corrupt the reload
                warn!("{}, returning to idle", LoaderError::UnrecognizedState(cur.state));
                next = LoadSession {
                    strobe: next.strobe,
                    anomalies: cur.anomalies + 1,
                    ..LoadSession::default()
                };
            }
        }

        self.regs = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::card::STATUS_IDLE;

    fn cfg(header: u32, sectors: u32) -> LoaderConfig {
        LoaderConfig {
            header_skip_bytes: header,
            total_sectors: sectors,
            start_block: 0,
            ..LoaderConfig::default()
        }
    }

    const IDLE: CardSignals = CardSignals {
        ready: true,
        status: STATUS_IDLE,
        byte_available: false,
        data: 0,
    };
    const BUSY: CardSignals = CardSignals {
        ready: false,
        status: 9,
        byte_available: false,
        data: 0,
    };

    fn strobe(data: u8) -> CardSignals {
        CardSignals { byte_available: true, data, ..BUSY }
    }

    /// Drive the loader into LoadData for the current sector.
    fn enter_data(l: &mut SectorLoader, mem: &mut MemoryTarget) {
        l.step(&IDLE, mem).unwrap();
        assert_eq!(l.state(), Some(LoaderState::LoadStart));
        l.step(&IDLE, mem).unwrap();
        assert_eq!(l.state(), Some(LoaderState::LoadWait));
        assert!(l.request().rd);
        l.step(&BUSY, mem).unwrap();
        assert_eq!(l.state(), Some(LoaderState::LoadData));
        assert!(!l.request().rd);
    }

    #[test]
    fn idle_waits_for_idle_status() {
        let mut l = SectorLoader::new(cfg(0, 1)).unwrap();
        let mut mem = MemoryTarget::new(16);

        let not_idle = CardSignals { status: 3, ..IDLE };
        for _ in 0..10_000 {
            l.step(&not_idle, &mut mem).unwrap();
            l.step(&BUSY, &mut mem).unwrap();
            assert_eq!(l.state(), Some(LoaderState::Idle));
        }
        l.step(&IDLE, &mut mem).unwrap();
        assert_eq!(l.state(), Some(LoaderState::LoadStart));
    }

    #[test]
    fn load_wait_holds_until_device_busy() {
        let mut l = SectorLoader::new(cfg(0, 1)).unwrap();
        let mut mem = MemoryTarget::new(16);
        l.step(&IDLE, &mut mem).unwrap();
        l.step(&IDLE, &mut mem).unwrap();
        for _ in 0..5 {
            l.step(&IDLE, &mut mem).unwrap();
            assert_eq!(l.state(), Some(LoaderState::LoadWait));
            assert!(l.request().rd);
        }
    }

    #[test]
    fn held_strobe_commits_one_byte() {
        let mut l = SectorLoader::new(cfg(0, 1)).unwrap();
        let mut mem = MemoryTarget::new(16);
        enter_data(&mut l, &mut mem);

        for _ in 0..4 {
            l.step(&strobe(0xAB), &mut mem).unwrap();
        }
        l.step(&BUSY, &mut mem).unwrap();
        l.step(&strobe(0xCD), &mut mem).unwrap();

        assert_eq!(l.session().byte_in_sector, 2);
        assert_eq!(l.session().write_addr, 2);
        assert_eq!(mem.read_bytes(0, 2), vec![0xAB, 0xCD]);
    }

    #[test]
    fn header_bytes_are_consumed_not_written() {
        let mut l = SectorLoader::new(cfg(3, 1)).unwrap();
        let mut mem = MemoryTarget::new(16);
        enter_data(&mut l, &mut mem);

        for b in 1..=5u8 {
            l.step(&strobe(b), &mut mem).unwrap();
            l.step(&BUSY, &mut mem).unwrap();
        }
        let s = l.session();
        assert_eq!(s.header_skipped, 3);
        assert_eq!(s.byte_in_sector, 5);
        assert_eq!(s.write_addr, 2);
        assert_eq!(mem.read_bytes(0, 3), vec![4, 5, 0]);
    }

    #[test]
    fn early_ready_ends_the_block() {
        let mut l = SectorLoader::new(cfg(0, 2)).unwrap();
        let mut mem = MemoryTarget::new(16);
        enter_data(&mut l, &mut mem);

        l.step(&strobe(1), &mut mem).unwrap();
        l.step(&IDLE, &mut mem).unwrap();
        assert_eq!(l.state(), Some(LoaderState::LoadNext));
        l.step(&IDLE, &mut mem).unwrap();
        assert_eq!(l.state(), Some(LoaderState::LoadStart));
        assert_eq!(l.session().sector, 1);
        assert_eq!(l.request().address, 1);
    }

    #[test]
    fn full_block_then_complete() {
        let mut l = SectorLoader::new(cfg(0, 1)).unwrap();
        let mut mem = MemoryTarget::new(512);
        enter_data(&mut l, &mut mem);

        for i in 0..512u32 {
            assert_eq!(l.state(), Some(LoaderState::LoadData));
            l.step(&strobe(i as u8), &mut mem).unwrap();
            if i < 511 {
                l.step(&BUSY, &mut mem).unwrap();
            }
        }
        assert_eq!(l.state(), Some(LoaderState::LoadNext));
        assert!(l.session().wr_pending);

        l.step(&IDLE, &mut mem).unwrap();
        assert_eq!(l.state(), Some(LoaderState::Complete));
        assert!(!l.session().wr_pending);
        assert!(!l.session().load_complete);

        l.step(&IDLE, &mut mem).unwrap();
        assert!(l.session().load_complete);
        assert!(l.session().game_loaded);
        for _ in 0..10 {
            l.step(&strobe(0xEE), &mut mem).unwrap();
            assert_eq!(l.state(), Some(LoaderState::Complete));
        }
        assert_eq!(mem.read_byte(511), 0xFF);
    }

    #[test]
    fn unknown_state_recovers_to_idle() {
        let mut l = SectorLoader::new(cfg(0, 1)).unwrap();
        let mut mem = MemoryTarget::new(16);
        l.force_state_register(0x17);
        assert_eq!(l.state(), None);

        l.step(&BUSY, &mut mem).unwrap();
        assert_eq!(l.state(), Some(LoaderState::Idle));
        assert_eq!(l.session().anomalies, 1);
        assert_eq!(l.session().write_addr, 0);
    }

    #[test]
    fn reset_clears_flags() {
        let mut l = SectorLoader::new(cfg(0, 1)).unwrap();
        let mut mem = MemoryTarget::new(16);
        l.force_state_register(LoaderState::Complete as u8);
        l.step(&IDLE, &mut mem).unwrap();
        assert!(l.session().game_loaded);

        l.reset();
        assert_eq!(l.session(), &LoadSession::default());
        assert_eq!(l.state(), Some(LoaderState::Idle));
    }

    #[test]
    fn write_past_memory_is_an_error() {
        let mut l = SectorLoader::new(cfg(0, 1)).unwrap();
        let mut mem = MemoryTarget::new(4);
        enter_data(&mut l, &mut mem);
        for i in 0..4 {
            l.step(&strobe(i), &mut mem).unwrap();
            l.step(&BUSY, &mut mem).unwrap();
        }
        assert!(matches!(
            l.step(&strobe(9), &mut mem),
            Err(LoaderError::AddressOutOfRange { address: 4, .. })
        ));
    }
}
