use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, error, info, warn};

use cart_loader::loader::block::{FileMedium, BLOCK_SIZE};
use cart_loader::loader::checksum::{self, Bound, SweepConfig};
use cart_loader::loader::config::LoaderConfig;
use cart_loader::loader::error::LoaderError;
use cart_loader::loader::layout::SlotLayout;
use cart_loader::loader::{CardTiming, Loader};

#[derive(Parser, Debug)]
#[command(about = "Provision, load and verify cartridge images on raw block media")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write images into consecutive game slots of a raw medium (destroys its contents)
    Provision {
        /// Disk image or raw device node
        medium: PathBuf,
        /// Image files; the n-th file goes to slot n
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
        #[arg(long, default_value_t = 100)]
        blocks_per_slot: u32,
        #[arg(long, default_value_t = BLOCK_SIZE, value_parser = parse_block_size)]
        block_size: usize,
    },

    /// Simulate the cartridge loader over a medium and checksum the result
    Load {
        medium: PathBuf,
        #[arg(long, default_value_t = 0)]
        slot: u32,
        /// Overrides the block derived from --slot
        #[arg(long)]
        start_block: Option<u32>,
        #[arg(long, default_value_t = 100)]
        blocks_per_slot: u32,
        /// Bytes per medium block; also sets the slot stride
        #[arg(long, default_value_t = BLOCK_SIZE, value_parser = parse_block_size)]
        block_size: usize,
        #[arg(long, default_value_t = 128)]
        header_skip: u32,
        #[arg(long, default_value_t = 97)]
        sectors: u32,
        #[arg(long, default_value_t = 6)]
        idle_status: u8,
        /// Ticks without progress before giving up; 0 waits forever
        #[arg(long, default_value_t = 1_000_000)]
        stall_timeout: u64,
        #[command(flatten)]
        card: CardArgs,
        #[command(flatten)]
        sweep: SweepArgs,
        /// Expected checksum (hex or decimal)
        #[arg(long, value_parser = parse_u32)]
        expect: Option<u32>,
    },

    /// Checksum an image file the way the host and the hardware do
    Checksum {
        image: PathBuf,
        /// Leading bytes to drop before summing (A78 header)
        #[arg(long, default_value_t = 0)]
        skip_header: usize,
        #[command(flatten)]
        sweep: SweepArgs,
        #[arg(long, value_parser = parse_u32)]
        expect: Option<u32>,
    },
}

#[derive(Args, Debug)]
struct CardArgs {
    #[arg(long, default_value_t = 8)]
    init_ticks: u32,
    #[arg(long, default_value_t = 2)]
    start_latency: u32,
    #[arg(long, default_value_t = 1)]
    strobe_ticks: u32,
    #[arg(long, default_value_t = 1)]
    gap_ticks: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Full,
    Partial,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Preset {
    Burst32,
    Linear16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BoundArg {
    Inclusive,
    Exclusive,
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// Which checksum decides --expect
    #[arg(long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,
    /// Base sweep variant; the flags below override single fields
    #[arg(long, value_enum, default_value_t = Preset::Burst32)]
    preset: Preset,
    #[arg(long, value_parser = parse_u32)]
    cursor_start: Option<u32>,
    #[arg(long, value_parser = parse_u32)]
    cursor_origin: Option<u32>,
    #[arg(long)]
    cursor_unit: Option<u32>,
    #[arg(long)]
    period_step: Option<u32>,
    /// Words summed per period
    #[arg(long)]
    samples: Option<u32>,
    /// Bytes per summed word
    #[arg(long)]
    word_bytes: Option<u32>,
    #[arg(long, value_parser = parse_u32)]
    upper_bound: Option<u32>,
    #[arg(long, value_enum)]
    bound: Option<BoundArg>,
}

impl SweepArgs {
    fn config(&self) -> SweepConfig {
        let base = match self.preset {
            Preset::Burst32 => SweepConfig::burst32(),
            Preset::Linear16 => SweepConfig::linear16(),
        };
        SweepConfig {
            cursor_start: self.cursor_start.unwrap_or(base.cursor_start),
            cursor_origin: self.cursor_origin.unwrap_or(base.cursor_origin),
            cursor_unit_bytes: self.cursor_unit.unwrap_or(base.cursor_unit_bytes),
            period_step: self.period_step.unwrap_or(base.period_step),
            samples_per_period: self.samples.unwrap_or(base.samples_per_period),
            word_bytes: self.word_bytes.unwrap_or(base.word_bytes),
            sweep_upper_bound: self.upper_bound.unwrap_or(base.sweep_upper_bound),
            upper_bound_comparison: match self.bound {
                Some(BoundArg::Inclusive) => Bound::Inclusive,
                Some(BoundArg::Exclusive) => Bound::Exclusive,
                None => base.upper_bound_comparison,
            },
        }
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let r = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    r.map_err(|e| format!("{s}: {e}"))
}

fn parse_block_size(s: &str) -> Result<usize, String> {
    match parse_u32(s)? {
        0 => Err("block size must be non-zero".into()),
        n => Ok(n as usize),
    }
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Provision { medium, images, yes, blocks_per_slot, block_size } => {
            let layout = SlotLayout { block_size, blocks_per_slot, ..Default::default() };
            provision(&medium, &images, yes, &layout)
        }

        Command::Load {
            medium,
            slot,
            start_block,
            blocks_per_slot,
            block_size,
            header_skip,
            sectors,
            idle_status,
            stall_timeout,
            card,
            sweep,
            expect,
        } => {
            let layout = SlotLayout { block_size, blocks_per_slot, ..Default::default() };
            let start_block = match start_block {
                Some(b) => b,
                None => layout.start_block(slot)?,
            };
            let cfg = LoaderConfig {
                block_size,
                header_skip_bytes: header_skip,
                total_sectors: sectors,
                device_ready_idle_value: idle_status,
                start_block,
                stall_timeout_ticks: (stall_timeout > 0).then_some(stall_timeout),
            };
            let timing = CardTiming {
                init_ticks: Some(card.init_ticks),
                start_latency: card.start_latency,
                strobe_ticks: card.strobe_ticks,
                gap_ticks: card.gap_ticks,
                abort_after: None,
            };
            load(&medium, cfg, timing, &sweep, expect)
        }

        Command::Checksum { image, skip_header, sweep, expect } => {
            let data = fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            if skip_header > data.len() {
                bail!("header skip {skip_header} is larger than the {} byte image", data.len());
            }
            let payload = &data[skip_header..];
            println!("File:        {}", image.display());
            println!("Total bytes: {}", data.len());
            report(payload, &sweep, expect)
        }
    }
}

fn provision(medium: &Path, images: &[PathBuf], yes: bool, layout: &SlotLayout) -> Result<ExitCode> {
    let name = medium.to_string_lossy();
    if ["/dev/disk0", "/dev/disk1"].iter().any(|d| name.contains(d)) {
        bail!("refusing to write to {name} (likely the system drive)");
    }
    if !medium.exists() {
        bail!("medium {name} not found");
    }

    println!("Writing {} image(s) to {name}; existing contents will be destroyed.", images.len());
    for (i, img) in images.iter().enumerate() {
        println!("  slot {i}: {} (block {})", img.display(), layout.start_block(i as u32)?);
    }
    if !yes && !confirm()? {
        println!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut dev = OpenOptions::new()
        .read(true)
        .write(true)
        .open(medium)
        .with_context(|| format!("opening {name}"))?;

    let mut ok = 0;
    for (slot, img) in images.iter().enumerate() {
        let data = match fs::read(img) {
            Ok(d) => d,
            Err(e) => {
                error!("{}: {e}", img.display());
                continue;
            }
        };
        match layout.provision(&mut dev, slot as u32, &data) {
            Ok(blocks) => {
                let sum = checksum::full_sum(&data);
                println!("  slot {slot}: {} bytes, {blocks} blocks, sum {sum:08X}", data.len());
                ok += 1;
            }
            Err(e @ LoaderError::OversizeImage { .. }) => {
                error!("{}: {e} (max {} bytes)", img.display(), layout.max_image_bytes());
            }
            Err(e) => return Err(e).with_context(|| format!("writing slot {slot}")),
        }
    }
    dev.sync_all()?;

    println!("{ok}/{} images written.", images.len());
    Ok(if ok == images.len() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn confirm() -> Result<bool> {
    print!("Type 'YES' to continue: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim() == "YES")
}

fn load(
    medium: &Path,
    cfg: LoaderConfig,
    timing: CardTiming,
    sweep: &SweepArgs,
    expect: Option<u32>,
) -> Result<ExitCode> {
    let source = FileMedium::open(medium, cfg.block_size)
        .with_context(|| format!("opening {}", medium.display()))?;
    let (mem, rep) = Loader::new(source, cfg, timing)?
        .run()
        .context("load did not complete")?;

    info!("loaded in {} ticks", rep.ticks);
    if rep.anomalies > 0 {
        warn!("{} state anomalies recovered during load", rep.anomalies);
    }
    debug!("first word {:08X}", mem.read_word(0));

    println!("Bytes written: {}", rep.bytes_written);
    println!("Header skipped: {}", rep.header_skipped);
    let loaded = mem.read_bytes(0, rep.bytes_written as usize);
    report(&loaded, sweep, expect)
}

fn report(payload: &[u8], sweep: &SweepArgs, expect: Option<u32>) -> Result<ExitCode> {
    let cfg = sweep.config();
    let full = checksum::full_sum(payload);
    let partial = checksum::partial_sum(payload, &cfg)?;

    println!("Full sum:    {full:08X}");
    println!("Partial sum: {partial:08X} ({} periods, {:?})", cfg.periods(), sweep.preset);

    let Some(expected) = expect else {
        return Ok(ExitCode::SUCCESS);
    };
    let actual = match sweep.mode {
        Mode::Full => full,
        Mode::Partial => partial,
    };
    match checksum::verify(actual, expected) {
        Ok(_) => {
            println!("Checksum OK");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("{e}");
            println!("Checksum MISMATCH");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_u32("0x00BFF0"), Ok(0xBFF0));
        assert_eq!(parse_u32("0X00C0_BE80"), Ok(0x00C0_BE80));
        assert_eq!(parse_u32("49536"), Ok(49536));
        assert!(parse_u32("0xZZ").is_err());
    }

    #[test]
    fn sweep_flags_override_preset() {
        let cli = Cli::parse_from([
            "cart_loader", "checksum", "x.bin", "--preset", "burst32", "--bound", "exclusive", "--samples", "4",
        ]);
        let Command::Checksum { sweep, .. } = cli.cmd else {
            panic!("wrong subcommand");
        };
        let cfg = sweep.config();
        assert_eq!(cfg.upper_bound_comparison, Bound::Exclusive);
        assert_eq!(cfg.samples_per_period, 4);
        assert_eq!(cfg.period_step, 16);
        assert_eq!(cfg.cursor_unit_bytes, 2);
    }

    #[test]
    fn block_and_word_size_reach_the_configs() {
        let cli = Cli::parse_from([
            "cart_loader", "load", "sd.img", "--block-size", "1024", "--word-bytes", "2", "--slot", "3",
        ]);
        let Command::Load { block_size, blocks_per_slot, slot, sweep, .. } = cli.cmd else {
            panic!("wrong subcommand");
        };
        assert_eq!(block_size, 1024);
        assert_eq!(sweep.config().word_bytes, 2);
        assert_eq!(sweep.config().samples_per_period, 3);

        let layout = SlotLayout { block_size, blocks_per_slot, ..Default::default() };
        assert_eq!(layout.byte_offset(slot).unwrap(), 301 * 1024);

        assert!(Cli::try_parse_from(["cart_loader", "load", "sd.img", "--block-size", "0"]).is_err());
        let cli = Cli::parse_from(["cart_loader", "provision", "sd.img", "a.a78", "--block-size", "0x800"]);
        let Command::Provision { block_size, .. } = cli.cmd else {
            panic!("wrong subcommand");
        };
        assert_eq!(block_size, 2048);
    }

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
