// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Write;
use std::path::Path;

use anyhow::Result;

use layout::elf::berkeley_sizes;
use layout::ElfImage;

use crate::config::Config;

pub fn run(cfg: &Config) -> Result<()> {
    let elf = ElfImage::open(&cfg.elf)?;
    let sizes = berkeley_sizes(elf.sections());
    print!("{}", report(sizes, &cfg.elf, cfg.board.max_flash_bytes)?);
    Ok(())
}

/// Formats sizes like `size -B -d`, plus how much of the board's flash the
/// loadable parts use.
fn report(
    (text, data, bss): (u64, u64, u64),
    path: &Path,
    max_flash: u32,
) -> Result<String> {
    let mut out = String::new();
    let dec = text + data + bss;
    writeln!(out, "   text\t   data\t    bss\t    dec\t    hex\tfilename")?;
    writeln!(
        out,
        "{:>7}\t{:>7}\t{:>7}\t{:>7}\t{:>7x}\t{}",
        text,
        data,
        bss,
        dec,
        dec,
        path.display()
    )?;
    if max_flash != 0 {
        let used = text + data;
        writeln!(
            out,
            "flash: {} of {} bytes ({:.1}%)",
            used,
            max_flash,
            used as f64 * 100.0 / f64::from(max_flash)
        )?;
    }
    Ok(out)
}
