// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The image format the ROM boot loader reads from offset 0.
//!
//! ```text
//! +------+-------+------+-----------+----------+
//! | 0xE9 | count | mode | size|freq | entry LE |   8-byte header
//! +------+-------+------+-----------+----------+
//! | addr LE | len LE | data (padded to 4) ... |   repeated `count` times
//! +-----------------------------------------+
//! | zero padding | checksum |                   total is a multiple of 16
//! +--------------+----------+
//! ```

use scroll::{Pwrite, LE};

use crate::error::{LayoutError, Result};
use crate::mode::FlashMode;
use crate::params::BuildParams;

pub const IMAGE_MAGIC: u8 = 0xE9;
const CHECKSUM_SEED: u8 = 0xEF;
const HEADER_LEN: usize = 8;
const SEGMENT_HEADER_LEN: usize = 8;
/// Offset of the first segment's data from the start of an image.
pub const FIRST_SEGMENT_DATA: u32 = (HEADER_LEN + SEGMENT_HEADER_LEN) as u32;
/// The ROM loader refuses images with more segments than this.
pub const MAX_SEGMENTS: usize = 16;

/// Flash geometry and entry point, as stamped into the image header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootHeader {
    pub flash_mode: FlashMode,
    pub size_code: u8,
    pub freq_code: u8,
    pub entry: u32,
}

impl BootHeader {
    pub fn new(params: &BuildParams, entry: u32) -> Result<Self> {
        Ok(BootHeader {
            flash_mode: params.flash_mode,
            size_code: size_code(&params.size_class)?,
            freq_code: freq_code(params.freq_class)?,
            entry,
        })
    }
}

fn size_code(size_class: &str) -> Result<u8> {
    Ok(match size_class {
        "512K" => 0x0,
        "256K" => 0x1,
        "1M" => 0x2,
        "2M" => 0x3,
        "4M" => 0x4,
        "8M" => 0x8,
        "16M" => 0x9,
        other => {
            return Err(LayoutError::invalid(
                "flash size class",
                "one of 256K, 512K, 1M, 2M, 4M, 8M, 16M",
                other,
            ))
        }
    })
}

fn freq_code(mhz: u32) -> Result<u8> {
    Ok(match mhz {
        40 => 0x0,
        26 => 0x1,
        20 => 0x2,
        80 => 0xF,
        other => {
            return Err(LayoutError::invalid(
                "flash frequency class",
                "20, 26, 40 or 80 MHz",
                other,
            ))
        }
    })
}

/// A chunk of memory the ROM copies to `addr` at boot.
#[derive(Copy, Clone, Debug)]
pub struct RomSegment<'a> {
    pub addr: u32,
    pub data: &'a [u8],
}

/// Serializes a boot image.
pub fn encode(header: &BootHeader, segments: &[RomSegment<'_>]) -> Result<Vec<u8>> {
    if segments.len() > MAX_SEGMENTS {
        return Err(LayoutError::invalid(
            "boot image segment count",
            format!("at most {MAX_SEGMENTS}"),
            segments.len(),
        ));
    }

    let mut out = vec![0u8; HEADER_LEN];
    write_header(&mut out, header, segments.len() as u8)?;

    let mut checksum = CHECKSUM_SEED;
    for seg in segments {
        let padded = seg.data.len().next_multiple_of(4);
        let len = u32::try_from(padded).map_err(|_| {
            LayoutError::invalid("segment length", "under 4 GiB", padded)
        })?;

        let at = out.len();
        out.resize(at + SEGMENT_HEADER_LEN, 0);
        out.pwrite_with(seg.addr, at, LE).map_err(scroll_err)?;
        out.pwrite_with(len, at + 4, LE).map_err(scroll_err)?;

        out.extend_from_slice(seg.data);
        out.resize(out.len() + (padded - seg.data.len()), 0);
        checksum = seg.data.iter().fold(checksum, |acc, b| acc ^ b);

        log::debug!(
            "boot image: segment at {:#010x}, {:#x} bytes",
            seg.addr,
            padded
        );
    }

    // Pad so that the checksum byte lands on the last byte of a 16-byte line.
    let total = (out.len() + 1).next_multiple_of(16);
    out.resize(total - 1, 0);
    out.push(checksum);
    Ok(out)
}

fn write_header(out: &mut [u8], header: &BootHeader, count: u8) -> Result<()> {
    out[0] = IMAGE_MAGIC;
    out[1] = count;
    out[2] = header.flash_mode.header_code();
    out[3] = (header.size_code << 4) | (header.freq_code & 0xF);
    out.pwrite_with(header.entry, 4, LE).map_err(scroll_err)?;
    Ok(())
}

fn scroll_err(e: scroll::Error) -> LayoutError {
    LayoutError::invalid("boot image", "a writable buffer", e)
}
