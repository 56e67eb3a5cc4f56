// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash layout and image assembly for ESP8266 (lx106) firmware.
//!
//! The flow for one build is:
//!
//! 1. [`params::derive`] turns the board profile and linker script name into
//!    size, frequency and mode classes.
//! 2. [`select::select`] picks a [`Strategy`] from the build mode and
//!    framework.
//! 3. [`assemble`] extracts sections from the executable (or packs a data
//!    directory) and writes the artifacts an uploader needs.
//!
//! Linker scripts and executables use bus addresses; [`addr`] converts them
//! to physical flash offsets.

pub mod addr;
pub mod assemble;
pub mod bootimg;
pub mod elf;
pub mod error;
pub mod ldscript;
pub mod mode;
pub mod params;
pub mod select;

pub use addr::{correct_flash_address, FlashRegion};
pub use assemble::{Artifact, Assembly, ExternalTools, Segment};
pub use elf::{ElfImage, SectionSource};
pub use error::{LayoutError, Result};
pub use mode::{BoardProfile, BuildMode, FlashMode, Framework, OtaSlot};
pub use params::BuildParams;
pub use select::Strategy;
