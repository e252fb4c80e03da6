//! Cartridge image loading from raw block media.
//!
//! - **loader::layout** – game slots on the medium and provisioning images into them
//! - **loader::card** – simulated SD controller speaking the ready/status/strobe handshake
//! - **loader::sector** – the sector-to-memory state machine
//! - **loader::memory** – word-organised memory target
//! - **loader::checksum** – full-sum and hardware-accurate partial-sample checksums

pub mod loader;
