// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversions between linker addresses and physical flash offsets.
//!
//! The linker sees flash through the CPU's memory-mapped window, while the
//! programmer and the filesystem packer want byte offsets from the start of
//! the flash chip. The mapping is piecewise and only holds for the lx106
//! family.

use crate::error::{LayoutError, Result};

/// Largest flash part this family can address.
pub const MAX_FLASH_BYTES: u32 = 16 * 1024 * 1024;

const KIB: u32 = 1024;
const MIB: u32 = 1024 * 1024;

/// Start of the second cache-mapped window.
const UPPER_WINDOW: u32 = 0x4030_0000;
/// Start of the window that maps the top of a 16M part.
const TOP_WINDOW: u32 = 0x411F_B000;

/// Formats a byte count as a size class: `512K`, `1M`, `4M` and so on.
///
/// The value is truncated, not rounded, so callers should hand in a size
/// that is already a whole number of KiB (below 1M) or MiB.
pub fn classify_size(max_bytes: u32) -> Result<String> {
    if max_bytes == 0 {
        return Err(LayoutError::invalid(
            "maximum flash size",
            "a non-zero byte count",
            max_bytes,
        ));
    }
    Ok(if max_bytes < MIB {
        format!("{}K", max_bytes / KIB)
    } else {
        format!("{}M", max_bytes / MIB)
    })
}

/// Turns a memory-mapped linker address into a physical flash offset.
///
/// Addresses between the upper window and the top window that wrap below
/// zero yield offsets past the end of flash; [`FlashRegion::corrected`]
/// rejects them.
pub fn correct_flash_address(raw: u32) -> u32 {
    if raw < UPPER_WINDOW {
        raw & 0xF_FFFF
    } else if raw < TOP_WINDOW {
        (raw & 0xFF_FFFF).wrapping_sub(0x20_0000)
    } else {
        (raw & 0xFF_FFFF) + 0xE0_0000
    }
}

/// Parses a clock like `40000000L` or `80000000UL` and returns whole MHz.
pub fn frequency_class_mhz(hz: &str) -> Result<u32> {
    let digits = hz.trim().trim_end_matches(|c: char| !c.is_ascii_digit());
    let hz_value = digits.parse::<u32>().map_err(|_| {
        LayoutError::invalid("flash frequency", "an integer in Hz", hz)
    })?;
    match hz_value / 1_000_000 {
        0 => Err(LayoutError::invalid(
            "flash frequency",
            "at least 1 MHz, given in Hz",
            hz,
        )),
        mhz => Ok(mhz),
    }
}

/// The filesystem partition window and geometry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FlashRegion {
    pub start: u32,
    pub end: u32,
    pub page_size: u32,
    pub block_size: u32,
}

impl FlashRegion {
    /// Converts a region in linker addresses to physical offsets.
    ///
    /// `start` and `end` are corrected one at a time. Correcting `end -
    /// start` as a whole gives the wrong answer for partitions that cross a
    /// window boundary.
    pub fn corrected(&self) -> Result<FlashRegion> {
        let region = FlashRegion {
            start: correct_flash_address(self.start),
            end: correct_flash_address(self.end),
            page_size: self.page_size,
            block_size: self.block_size,
        };
        log::debug!(
            "spiffs {:#010x}..{:#010x} -> {:#x}..{:#x}",
            self.start,
            self.end,
            region.start,
            region.end
        );
        region.check()?;
        Ok(region)
    }

    /// Byte budget of the region, zero if it is inverted. Only meaningful
    /// once corrected.
    pub fn size(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    fn check(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(LayoutError::invalid(
                "SPIFFS_END",
                format!("an offset above start {:#x}", self.start),
                format!("{:#x}", self.end),
            ));
        }
        if self.end > MAX_FLASH_BYTES {
            return Err(LayoutError::invalid(
                "SPIFFS_END",
                format!("an offset within {:#x}", MAX_FLASH_BYTES),
                format!("{:#x}", self.end),
            ));
        }
        if self.page_size == 0 || self.block_size == 0 {
            return Err(LayoutError::invalid(
                "SPIFFS_PAGE/SPIFFS_BLOCK",
                "non-zero sizes",
                format!("{}/{}", self.page_size, self.block_size),
            ));
        }
        Ok(())
    }
}
