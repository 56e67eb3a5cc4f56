// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::addr::{classify_size, frequency_class_mhz};
use crate::error::{LayoutError, Result};
use crate::mode::{BoardProfile, FlashMode};

/// Numeric build parameters shared by the assembler and the uploader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    /// e.g. `4M`, `512K`
    pub size_class: String,
    /// Flash clock in whole MHz.
    pub freq_class: u32,
    pub flash_mode: FlashMode,
}

/// Derives the flash size and frequency classes for a build.
///
/// A linker script named like `eagle.flash.4m1m.ld` declares the flash size
/// itself; that declaration wins over the board's maximum size.
pub fn derive(board: &BoardProfile, ldscript: &Path) -> Result<BuildParams> {
    let max_bytes = match size_override(ldscript)? {
        Some(bytes) => {
            log::debug!(
                "{} overrides board flash size: {:#x} bytes",
                ldscript.display(),
                bytes
            );
            bytes
        }
        None => board.max_flash_bytes,
    };
    Ok(BuildParams {
        size_class: classify_size(max_bytes)?,
        freq_class: frequency_class_mhz(&board.flash_freq)?,
        flash_mode: board.flash_mode,
    })
}

/// Pulls a `.flash.<N>(m|k)...ld` size token out of a linker script name.
pub fn size_override(ldscript: &Path) -> Result<Option<u32>> {
    let re = Regex::new(r"\.flash\.(\d+)(m|k).*\.ld").expect("valid pattern");
    let name = ldscript.to_string_lossy();
    let Some(cap) = re.captures(&name) else {
        return Ok(None);
    };
    let too_big = || {
        LayoutError::invalid(
            "linker script size token",
            "a size that fits in 32 bits",
            format!("{}{}", &cap[1], &cap[2]),
        )
    };
    let n = cap[1].parse::<u32>().map_err(|_| too_big())?;
    let unit: u32 = if &cap[2] == "m" { 1024 * 1024 } else { 1024 };
    n.checked_mul(unit).map(Some).ok_or_else(too_big)
}
