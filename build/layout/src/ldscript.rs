// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recovers the filesystem partition from linker-script markers.
//!
//! Linker scripts for this family publish the partition as a set of
//! `PROVIDE ( _SPIFFS_<NAME> = 0x<HEX> )` statements. The values are raw
//! linker addresses; see [`crate::addr`] for turning them into flash
//! offsets.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;

use crate::addr::FlashRegion;
use crate::error::{LayoutError, Result};

/// Markers every filesystem-capable linker script must provide.
pub const REQUIRED_SYMBOLS: [&str; 4] = ["START", "END", "PAGE", "BLOCK"];

/// Reads `path` and returns every `_SPIFFS_*` marker it provides.
pub fn scan(path: &Path) -> Result<BTreeMap<String, u32>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| LayoutError::io(path, e))?;
    scan_str(&text, path)
}

/// Like [`scan`], over script text already in memory. `path` is only used
/// for error messages.
pub fn scan_str(text: &str, path: &Path) -> Result<BTreeMap<String, u32>> {
    let re = Regex::new(
        r"PROVIDE\s*\(\s*_SPIFFS_(\w+)\s*=\s*0[xX]([0-9A-Fa-f]+)\s*\)",
    )
    .expect("marker pattern is valid");

    let mut symbols = BTreeMap::new();
    for cap in re.captures_iter(text) {
        let name = cap[1].to_ascii_uppercase();
        let value = u32::from_str_radix(&cap[2], 16).map_err(|_| {
            LayoutError::invalid(
                format!("_SPIFFS_{name}"),
                "a 32-bit address",
                format!("0x{}", &cap[2]),
            )
        })?;
        log::debug!("{}: _SPIFFS_{} = {:#010x}", path.display(), name, value);
        symbols.insert(name, value);
    }

    for name in REQUIRED_SYMBOLS {
        if !symbols.contains_key(name) {
            return Err(LayoutError::MissingSymbol {
                name: name.to_string(),
                path: path.to_path_buf(),
            });
        }
    }
    Ok(symbols)
}

/// Reads the raw (uncorrected) filesystem region out of a linker script.
pub fn flash_region(path: &Path) -> Result<FlashRegion> {
    let symbols = scan(path)?;
    Ok(region_from_symbols(&symbols))
}

/// Builds a raw region from a symbol map that has passed [`scan_str`].
pub fn region_from_symbols(symbols: &BTreeMap<String, u32>) -> FlashRegion {
    FlashRegion {
        start: symbols["START"],
        end: symbols["END"],
        page_size: symbols["PAGE"],
        block_size: symbols["BLOCK"],
    }
}

/// Older SDK releases shipped `esp8266.flash.*` scripts; the same files are
/// now called `eagle.flash.*`.
pub fn modernize_script_name(name: &str) -> Option<String> {
    if name.contains("esp8266.flash") {
        Some(name.replace("esp8266.flash", "eagle.flash"))
    } else {
        None
    }
}
