// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use layout::assemble::{
    artifact_names, assemble_filesystem, assemble_firmware, write_artifact,
    FirmwareParams,
};
use layout::{
    ldscript, params, select, Artifact, BuildParams, ElfImage, FlashRegion,
    SectionSource, Strategy,
};

use crate::config::Config;
use crate::tools::SystemTools;

pub const MANIFEST: &str = "manifest.json";
pub const MAP: &str = "flash.txt";
const BUILDSTAMP: &str = "buildstamp";

/// What `dist` produced, in the order the uploader should write it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    pub name: String,
    pub framework: String,
    pub strategy: Strategy,
    pub params: BuildParams,
    /// Corrected filesystem region, for filesystem builds.
    pub region: Option<FlashRegion>,
    pub artifacts: Vec<Artifact>,
}

pub fn package(cfg: &Config, fs: bool, force: bool) -> Result<Manifest> {
    let mode = cfg.build_mode(fs);

    // Refuse unknown frameworks before touching anything on disk.
    let strategy = select::select(mode, &cfg.framework)?;
    let params = params::derive(&cfg.board, &cfg.ldscript)?;

    let dist_dir = cfg.dist_dir();
    std::fs::create_dir_all(&dist_dir)
        .with_context(|| format!("creating {}", dist_dir.display()))?;
    // gen_appbin runs inside the dist directory, so everything it is handed
    // must be absolute.
    let dist_dir = std::fs::canonicalize(&dist_dir)?;
    let manifest_path = dist_dir.join(MANIFEST);

    let mut tools = SystemTools::new(&cfg.tools);
    let (artifacts, region) = if strategy == Strategy::FsImage {
        let data_dir = cfg.data_dir.as_deref().ok_or_else(|| {
            anyhow!("{} has no data-dir to build a filesystem from", cfg.name)
        })?;
        if !data_dir.is_dir() {
            bail!("data-dir {} is not a directory", data_dir.display());
        }
        let raw = ldscript::flash_region(&cfg.ldscript)?;
        println!("packing {} into {}", data_dir.display(), ldscript_name(cfg));
        let assembly =
            assemble_filesystem(&raw, data_dir, &dist_dir, &mut tools)?;
        (assembly.artifacts, Some(raw.corrected()?))
    } else {
        if !force {
            if let Some(manifest) = up_to_date(cfg, strategy, &dist_dir)? {
                println!("{} (unchanged)", cfg.elf.display());
                return Ok(manifest);
            }
        }
        let elf_path = std::fs::canonicalize(&cfg.elf)
            .with_context(|| format!("finding {}", cfg.elf.display()))?;
        println!("assembling {} as {:?}", elf_path.display(), strategy);
        let elf = ElfImage::open(&elf_path)?;
        let stub = match (strategy, &cfg.tools.boot_stub) {
            (Strategy::SingleRegion, Some(path)) => Some(ElfImage::open(path)?),
            _ => None,
        };
        let firmware = FirmwareParams {
            build: &params,
            upload_address: cfg.framework.upload_address(mode),
            boot_stub: stub.as_ref().map(|s| s as &dyn SectionSource),
        };
        let assembly =
            assemble_firmware(strategy, &elf, &firmware, &dist_dir, &mut tools)?;
        (assembly.artifacts, None)
    };

    let manifest = Manifest {
        name: cfg.name.clone(),
        framework: cfg.framework.to_string(),
        strategy,
        params,
        region,
        artifacts,
    };

    write_artifact(&dist_dir.join(MAP), artifact_table(&manifest)?.as_bytes())?;
    write_artifact(&manifest_path, &serde_json::to_vec_pretty(&manifest)?)?;

    if strategy != Strategy::FsImage {
        // Only now that every artifact is in place does the stamp vouch for
        // them.
        std::fs::write(
            dist_dir.join(BUILDSTAMP),
            format!("{:x}", cfg.buildhash),
        )?;
    }

    Ok(manifest)
}

fn ldscript_name(cfg: &Config) -> String {
    cfg.ldscript
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Checks the buildstamp file against the current config.
fn stamp_matches(cfg: &Config, stamp: &Path) -> bool {
    match std::fs::read(stamp) {
        Ok(contents) => {
            if let Ok(contents) = std::str::from_utf8(&contents) {
                if let Ok(cmp) = u64::from_str_radix(contents, 16) {
                    if cfg.buildhash != cmp {
                        println!("image.toml has changed; re-building.");
                    }
                    cfg.buildhash == cmp
                } else {
                    println!("buildstamp file contents unknown; re-building.");
                    false
                }
            } else {
                println!("buildstamp file contents corrupt; re-building.");
                false
            }
        }
        Err(_) => {
            println!("no buildstamp file found; re-building.");
            false
        }
    }
}

/// Returns the previous manifest if every firmware artifact it lists is
/// newer than the executables it was built from and nothing in the config
/// has changed.
fn up_to_date(
    cfg: &Config,
    strategy: Strategy,
    dist_dir: &Path,
) -> Result<Option<Manifest>> {
    if !stamp_matches(cfg, &dist_dir.join(BUILDSTAMP)) {
        return Ok(None);
    }
    let manifest_path = dist_dir.join(MANIFEST);
    let Ok(contents) = std::fs::read(&manifest_path) else {
        return Ok(None);
    };
    let manifest: Manifest = match serde_json::from_slice(&contents) {
        Ok(m) => m,
        Err(e) => {
            log::info!("ignoring unreadable {}: {}", manifest_path.display(), e);
            return Ok(None);
        }
    };
    if manifest.strategy != strategy
        || manifest.artifacts.len() != artifact_names(strategy).len()
    {
        return Ok(None);
    }

    let mut inputs = vec![cfg.elf.as_path()];
    if strategy == Strategy::SingleRegion {
        inputs.extend(cfg.tools.boot_stub.as_deref());
    }
    let mut newest: Option<std::time::SystemTime> = None;
    for input in inputs {
        let t = std::fs::metadata(input)
            .and_then(|m| m.modified())
            .with_context(|| format!("reading {}", input.display()))?;
        newest = newest.max(Some(t));
    }
    for artifact in &manifest.artifacts {
        match std::fs::metadata(&artifact.path).and_then(|m| m.modified()) {
            Ok(t) if Some(t) > newest => (),
            _ => {
                log::debug!("{} is stale", artifact.path.display());
                return Ok(None);
            }
        }
    }
    Ok(Some(manifest))
}

/// Renders the artifact list the way it is written to `flash.txt`.
pub fn artifact_table(manifest: &Manifest) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "OFFSET       SIZE FILE")?;
    for a in &manifest.artifacts {
        let size = std::fs::metadata(&a.path)
            .with_context(|| format!("reading {}", a.path.display()))?
            .len();
        let name = a
            .path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        match a.flash_offset {
            Some(off) => writeln!(out, "{:08x} {:>8x} {}", off, size, name)?,
            None => writeln!(out, "{:>8} {:>8x} {} (not flashed)", "-", size, name)?,
        }
    }
    Ok(out)
}

/// Describes the layout a config would produce without building anything.
pub fn describe(cfg: &Config) -> Result<String> {
    let params = params::derive(&cfg.board, &cfg.ldscript)?;
    let mut out = String::new();
    writeln!(out, "image:      {}", cfg.name)?;
    writeln!(out, "framework:  {}", cfg.framework)?;
    writeln!(out, "script:     {}", cfg.ldscript.display())?;
    writeln!(out, "flash size: {}", params.size_class)?;
    writeln!(out, "flash freq: {} MHz", params.freq_class)?;
    writeln!(out, "flash mode: {}", params.flash_mode)?;

    let mode = cfg.build_mode(false);
    match select::select(mode, &cfg.framework) {
        Ok(strategy) => writeln!(out, "firmware:   {:?} ({:?})", strategy, mode)?,
        Err(e) => writeln!(out, "firmware:   {}", e)?,
    }
    if let Some(addr) = cfg.framework.upload_address(mode) {
        writeln!(out, "upload at:  {:#x}", addr)?;
    }

    // Plenty of SDK scripts carry no filesystem at all.
    match ldscript::flash_region(&cfg.ldscript).and_then(|r| r.corrected()) {
        Ok(region) => {
            writeln!(
                out,
                "filesystem: {:#x}..{:#x} ({:#x} bytes, page {:#x}, block {:#x})",
                region.start,
                region.end,
                region.size(),
                region.page_size,
                region.block_size
            )?;
        }
        Err(e) => writeln!(out, "filesystem: none ({})", e)?,
    }
    Ok(out)
}
