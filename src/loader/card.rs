// simulated SD controller, signal-level
use log::{debug, trace};

use super::block::BlockSource;
use super::error::{LoaderError, Result};

/// Status code the controller reports once initialised and idle.
pub const STATUS_IDLE: u8 = 6;
const STATUS_INIT: u8 = 1;
const STATUS_READ: u8 = 9;

/// What the loader samples from the device at the start of each tick.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CardSignals {
    pub ready: bool,
    pub status: u8,
    pub byte_available: bool,
    pub data: u8,
}

/// Lines the loader drives into the device.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct HostRequest {
    pub rd: bool,
    pub address: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardTiming {
    /// Ticks until the card reports idle. `None` never finishes initialising.
    pub init_ticks: Option<u32>,
    /// Busy ticks between accepting a read and the first byte.
    pub start_latency: u32,
    /// Ticks `byte_available` stays high per byte.
    pub strobe_ticks: u32,
    /// Low ticks after each strobe.
    pub gap_ticks: u32,
    /// Stream only this many bytes of every block, then report ready.
    pub abort_after: Option<usize>,
}

impl Default for CardTiming {
    fn default() -> Self {
        Self {
            init_ticks: Some(8),
            start_latency: 2,
            strobe_ticks: 1,
            gap_ticks: 1,
            abort_after: None,
        }
    }
}

impl CardTiming {
    pub fn validate(&self) -> Result<()> {
        if self.strobe_ticks == 0 || self.gap_ticks == 0 {
            return Err(LoaderError::InvalidConfig(
                "strobe_ticks and gap_ticks must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

enum Phase {
    Init { remaining: Option<u32> },
    Idle,
    Starting { block: Vec<u8>, remaining: u32 },
    Streaming { block: Vec<u8>, pos: usize, high: u32, low: u32 },
    Fault,
}

pub struct SimCard<B: BlockSource> {
    source: B,
    timing: CardTiming,
    phase: Phase,
    out: CardSignals,
    // a rising edge of rd latches the address until the card is free
    rd_prev: bool,
    pending: Option<u32>,
    fault: Option<LoaderError>,
}

impl<B: BlockSource> SimCard<B> {
    pub fn new(source: B, timing: CardTiming) -> Result<Self> {
        timing.validate()?;
        Ok(Self {
            source,
            phase: Phase::Init { remaining: timing.init_ticks },
            timing,
            out: CardSignals { status: STATUS_INIT, ..Default::default() },
            rd_prev: false,
            pending: None,
            fault: None,
        })
    }

    pub fn signals(&self) -> CardSignals {
        self.out
    }

    pub fn block_count(&self) -> u64 {
        self.source.block_count()
    }

    /// Structural failure (e.g. a read past the medium); the card stays dead afterwards.
    pub fn take_fault(&mut self) -> Option<LoaderError> {
        self.fault.take()
    }

    pub fn tick(&mut self, req: HostRequest) {
        if req.rd && !self.rd_prev {
            self.pending = Some(req.address);
        }
        self.rd_prev = req.rd;

        let phase = std::mem::replace(&mut self.phase, Phase::Fault);
        self.phase = match phase {
            Phase::Init { remaining: None } => Phase::Init { remaining: None },
            Phase::Init { remaining: Some(0) } => self.go_idle(),
            Phase::Init { remaining: Some(n) } => Phase::Init { remaining: Some(n - 1) },

            Phase::Idle => match self.pending.take() {
                Some(address) => self.accept(address),
                None => Phase::Idle,
            },

            Phase::Starting { block, remaining: 0 } => self.present(block, 0),
            Phase::Starting { block, remaining } => Phase::Starting {
                block,
                remaining: remaining - 1,
            },

            Phase::Streaming { block, pos, high, low } => {
                if high > 1 {
                    Phase::Streaming { block, pos, high: high - 1, low }
                } else if high == 1 {
                    self.out.byte_available = false;
                    Phase::Streaming { block, pos, high: 0, low }
                } else if low > 1 {
                    Phase::Streaming { block, pos, high, low: low - 1 }
                } else {
                    self.present(block, pos + 1)
                }
            }

            Phase::Fault => Phase::Fault,
        };
    }

    fn go_idle(&mut self) -> Phase {
        self.out.ready = true;
        self.out.status = STATUS_IDLE;
        self.out.byte_available = false;
        // serve a request that was latched while busy
        match self.pending.take() {
            Some(address) => self.accept(address),
            None => Phase::Idle,
        }
    }

    fn accept(&mut self, address: u32) -> Phase {
        trace!("card: read block {address}");
        match self.source.read_block(address as u64) {
            Ok(mut block) => {
                if let Some(n) = self.timing.abort_after {
                    block.truncate(n);
                }
                self.out.ready = false;
                self.out.status = STATUS_READ;
                Phase::Starting {
                    block,
                    remaining: self.timing.start_latency,
                }
            }
            Err(e) => {
                debug!("card: fault reading block {address}: {e}");
                self.out.ready = false;
                self.fault = Some(e);
                Phase::Fault
            }
        }
    }

    fn present(&mut self, block: Vec<u8>, pos: usize) -> Phase {
        match block.get(pos) {
            Some(&b) => {
                self.out.data = b;
                self.out.byte_available = true;
                Phase::Streaming {
                    block,
                    pos,
                    high: self.timing.strobe_ticks,
                    low: self.timing.gap_ticks,
                }
            }
            None => self.go_idle(),
        }
    }
}
