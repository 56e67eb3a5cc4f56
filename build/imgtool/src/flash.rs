// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;

use layout::mode::FrameworkFamily;
use layout::{OtaSlot, Strategy};

use crate::config::Config;
use crate::dist::Manifest;

/// How to get a build onto the device.
#[derive(Debug, PartialEq, Eq)]
pub enum UploadPlan {
    /// Nothing to write; the string says why.
    Skip(&'static str),
    /// Full argv of the uploader.
    Run(Vec<String>),
}

/// Upload ports that are addresses or host names, rather than serial
/// devices, mean the image goes over the network.
pub fn is_network_port(port: &str) -> bool {
    let re = Regex::new(
        r#"^"?((([0-9]{1,3}\.){3}[0-9]{1,3})|[^\\/]+\.[^\\/]+)"?$"#,
    )
    .expect("valid pattern");
    re.is_match(port)
}

pub fn plan(cfg: &Config, manifest: &Manifest, verbose: bool) -> Result<UploadPlan> {
    if manifest.strategy == Strategy::DualSlotSegment(OtaSlot::Two) {
        return Ok(UploadPlan::Skip(
            "no need to upload the slot 2 image; the running firmware \
             fetches it over the air",
        ));
    }

    let port = cfg
        .upload
        .port
        .as_deref()
        .ok_or_else(|| anyhow!("no upload port set in [upload]"))?;
    let fs_start = manifest.region.map(|r| r.start);

    let argv = if cfg.framework.family() == Some(FrameworkFamily::ArduinoLike) {
        let [artifact] = manifest.artifacts.as_slice() else {
            bail!(
                "expected a single image to upload, found {}",
                manifest.artifacts.len()
            );
        };
        let file = artifact.path.display().to_string();
        if is_network_port(port) {
            espota(cfg, port, &file, fs_start.is_some())
        } else {
            esptool_ck(cfg, port, &file, fs_start, verbose)
        }
    } else {
        esptool_py(cfg, port, manifest)?
    };
    Ok(UploadPlan::Run(argv))
}

fn espota(cfg: &Config, port: &str, file: &str, fs: bool) -> Vec<String> {
    let mut argv = cfg.tools.espota.argv();
    argv.extend(["--debug", "--progress", "-i", port].map(String::from));
    argv.extend(cfg.upload.flags.iter().cloned());
    if fs {
        argv.push("-s".into());
    }
    argv.extend(["-f".to_string(), file.to_string()]);
    argv
}

fn esptool_ck(
    cfg: &Config,
    port: &str,
    file: &str,
    fs_start: Option<u32>,
    verbose: bool,
) -> Vec<String> {
    let mut argv = cfg.tools.esptool_ck.argv();
    if verbose {
        argv.push("-vv".into());
    }
    argv.extend([
        "-cd".to_string(),
        cfg.upload.reset_method.clone(),
        "-cb".to_string(),
        cfg.upload.speed.to_string(),
        "-cp".to_string(),
        port.to_string(),
    ]);
    if let Some(start) = fs_start {
        argv.extend(["-ca".to_string(), format!("{:#x}", start)]);
    }
    argv.extend(["-cf".to_string(), file.to_string()]);
    argv
}

fn esptool_py(cfg: &Config, port: &str, manifest: &Manifest) -> Result<Vec<String>> {
    let mut argv = cfg.tools.esptool.argv();
    argv.extend([
        "--baud".to_string(),
        cfg.upload.speed.to_string(),
        "--port".to_string(),
        port.to_string(),
        "--chip".to_string(),
        "esp8266".to_string(),
        "--after".to_string(),
        "no_reset".to_string(),
        "write_flash".to_string(),
        "--flash_freq".to_string(),
        format!("{}m", manifest.params.freq_class),
        "--flash_mode".to_string(),
        manifest.params.flash_mode.to_string(),
        "--flash_size".to_string(),
        format!("{}B", manifest.params.size_class),
    ]);

    // An OTA image needs the SDK's second-stage loader in front of it.
    if let Strategy::DualSlotSegment(_) = manifest.strategy {
        let boot = cfg.tools.boot_image.as_deref().ok_or_else(|| {
            anyhow!("OTA builds need [tools] boot-image to flash at 0x0")
        })?;
        argv.extend([offset(0), boot.display().to_string()]);
    }

    for artifact in &manifest.artifacts {
        let Some(off) = artifact.flash_offset else {
            continue;
        };
        argv.extend([offset(off), artifact.path.display().to_string()]);
    }
    Ok(argv)
}

fn offset(off: u32) -> String {
    format!("{:#07x}", off)
}

pub fn run(cfg: &Config, manifest: &Manifest, dry_run: bool, verbose: bool) -> Result<()> {
    let argv = match plan(cfg, manifest, verbose)? {
        UploadPlan::Skip(why) => {
            println!("{}", why);
            return Ok(());
        }
        UploadPlan::Run(argv) => argv,
    };

    if dry_run {
        println!("{}", argv.join(" "));
        return Ok(());
    }

    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty upload command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).envs(&cfg.tools.env);
    for a in &manifest.artifacts {
        println!("uploading {}", display_name(&a.path));
    }
    log::info!("running {:?}", cmd);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {:?}", cmd))?;
    if !status.success() {
        bail!("upload failed, see output for details");
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
