// loader module root
pub mod block;
pub mod card;
pub mod checksum;
pub mod config;
pub mod error;
pub mod layout;
pub mod memory;
pub mod sector;

use log::{debug, info};

use block::BlockSource;
use card::SimCard;
use config::LoaderConfig;
use error::{LoaderError, Result};
use memory::MemoryTarget;
use sector::{LoaderState, SectorLoader};

pub use card::CardTiming;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub ticks: u64,
    pub bytes_written: u64,
    pub header_skipped: u32,
    pub anomalies: u32,
    pub load_complete: bool,
    pub game_loaded: bool,
}

/// Ticks a simulated card and the sector loader in lock-step.
pub struct Loader<B: BlockSource> {
    card: SimCard<B>,
    sectors: SectorLoader,
    mem: MemoryTarget,
    ticks: u64,
}

impl<B: BlockSource> Loader<B> {
    pub fn new(source: B, cfg: LoaderConfig, timing: CardTiming) -> Result<Self> {
        if source.block_size() != cfg.block_size {
            return Err(LoaderError::InvalidConfig(format!(
                "medium block size {} does not match configured {}",
                source.block_size(),
                cfg.block_size
            )));
        }
        let mem = MemoryTarget::new(cfg.payload_len() as usize);
        let card = SimCard::new(source, timing)?;
        let sectors = SectorLoader::new(cfg)?;
        Ok(Self { card, sectors, mem, ticks: 0 })
    }

    /// One tick: the loader sees the card's outputs from the previous tick,
    /// then the card sees the loader's.
    pub fn tick(&mut self) -> Result<()> {
        let sig = self.card.signals();
        self.sectors.step(&sig, &mut self.mem)?;
        self.card.tick(self.sectors.request());
        self.ticks += 1;
        match self.card.take_fault() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn sector_loader(&mut self) -> &mut SectorLoader {
        &mut self.sectors
    }

    /// Run until `Complete`. Without a stall timeout a card that never
    /// becomes idle keeps this spinning forever.
    pub fn run(mut self) -> Result<(MemoryTarget, LoadReport)> {
        let cfg = self.sectors.config().clone();
        info!(
            "loading {} sectors from block {} ({} blocks on medium)",
            cfg.total_sectors,
            cfg.start_block,
            self.card.block_count()
        );

        let mut last = (self.sectors.state(), self.sectors.session().byte_in_sector);
        let mut quiet = 0u64;

        while !self.sectors.session().load_complete {
            self.tick()?;

            let now = (self.sectors.state(), self.sectors.session().byte_in_sector);
            if now != last {
                if now.0 != last.0 {
                    debug!("tick {}: {:?} -> {:?}", self.ticks, last.0, now.0);
                }
                last = now;
                quiet = 0;
                continue;
            }

            quiet += 1;
            if let Some(limit) = cfg.stall_timeout_ticks {
                if quiet >= limit {
                    return Err(match now.0 {
                        Some(LoaderState::Idle) => LoaderError::DeviceStall { ticks: quiet },
                        Some(state) => LoaderError::Stalled { state, ticks: quiet },
                        None => LoaderError::UnrecognizedState(self.sectors.session().state),
                    });
                }
            }
        }

        let s = self.sectors.session();
        let report = LoadReport {
            ticks: self.ticks,
            bytes_written: s.bytes_written,
            header_skipped: s.header_skipped,
            anomalies: s.anomalies,
            load_complete: s.load_complete,
            game_loaded: s.game_loaded,
        };
        Ok((self.mem, report))
    }
}
