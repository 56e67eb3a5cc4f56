// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

use layout::ldscript::modernize_script_name;
use layout::{BoardProfile, BuildMode, FlashMode, Framework, OtaSlot};

/// A `RawConfig` is an `image.toml` file as written; paths in it are still
/// relative to the file itself.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    name: String,
    framework: String,
    elf: PathBuf,
    ldscript: PathBuf,
    data_dir: Option<PathBuf>,
    ota_slot: Option<u8>,
    board: Board,
    #[serde(default)]
    tools: Tools,
    #[serde(default)]
    upload: Upload,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct Board {
    maximum_size: u32,
    f_flash: String,
    flash_mode: FlashMode,
}

/// An external program, either a single executable name or a full argv
/// prefix (`["python3", "tools/gen_appbin.py"]`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ToolCommand {
    Program(String),
    Argv(Vec<String>),
}

impl ToolCommand {
    pub fn command(&self) -> Result<Command> {
        match self {
            ToolCommand::Program(p) => Ok(Command::new(p)),
            ToolCommand::Argv(argv) => {
                let (program, args) = argv
                    .split_first()
                    .ok_or_else(|| anyhow!("empty tool command"))?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                Ok(cmd)
            }
        }
    }

    /// The program name, for messages.
    pub fn display_name(&self) -> &str {
        match self {
            ToolCommand::Program(p) => p,
            ToolCommand::Argv(argv) => {
                argv.last().map(String::as_str).unwrap_or("<empty>")
            }
        }
    }

    /// The full argv prefix, for printing a command line.
    pub fn argv(&self) -> Vec<String> {
        match self {
            ToolCommand::Program(p) => vec![p.clone()],
            ToolCommand::Argv(argv) => argv.clone(),
        }
    }
}

fn program(name: &str) -> ToolCommand {
    ToolCommand::Program(name.to_string())
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Tools {
    #[serde(default = "default_mkspiffs")]
    pub mkspiffs: ToolCommand,
    #[serde(default = "default_gen_appbin")]
    pub gen_appbin: ToolCommand,
    #[serde(default = "default_esptool")]
    pub esptool: ToolCommand,
    #[serde(default = "default_esptool_ck")]
    pub esptool_ck: ToolCommand,
    #[serde(default = "default_espota")]
    pub espota: ToolCommand,
    /// Second-stage loader flashed at 0 ahead of an OTA image.
    pub boot_image: Option<PathBuf>,
    /// Boot loader executable (eboot) built into Arduino-style images.
    pub boot_stub: Option<PathBuf>,
    /// Extra environment for every tool, e.g. `PYTHONPATH`.
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

fn default_mkspiffs() -> ToolCommand {
    program("mkspiffs")
}
fn default_gen_appbin() -> ToolCommand {
    program("gen_appbin.py")
}
fn default_esptool() -> ToolCommand {
    program("esptool.py")
}
fn default_esptool_ck() -> ToolCommand {
    program("esptool")
}
fn default_espota() -> ToolCommand {
    program("espota.py")
}

impl Default for Tools {
    fn default() -> Self {
        Tools {
            mkspiffs: default_mkspiffs(),
            gen_appbin: default_gen_appbin(),
            esptool: default_esptool(),
            esptool_ck: default_esptool_ck(),
            espota: default_espota(),
            boot_image: None,
            boot_stub: None,
            env: IndexMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Upload {
    pub port: Option<String>,
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default = "default_reset_method")]
    pub reset_method: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

fn default_speed() -> u32 {
    115200
}
fn default_reset_method() -> String {
    "ck".to_string()
}

impl Default for Upload {
    fn default() -> Self {
        Upload {
            port: None,
            speed: default_speed(),
            reset_method: default_reset_method(),
            flags: vec![],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub name: String,
    pub framework: Framework,
    pub elf: PathBuf,
    pub ldscript: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub ota_slot: Option<OtaSlot>,
    pub board: BoardProfile,
    pub tools: Tools,
    pub upload: Upload,
    /// Hash of the config and linker script; a change forces a rebuild.
    pub buildhash: u64,
}

impl Config {
    pub fn from_file(cfg: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(cfg)
            .with_context(|| format!("reading {}", cfg.display()))?;
        let base = cfg
            .parent()
            .ok_or_else(|| anyhow!("Could not get image toml directory"))?;
        let mut config = Self::parse(&contents, base)?;

        let mut hasher = DefaultHasher::new();
        hasher.write(contents.as_bytes());
        let script = std::fs::read(&config.ldscript).with_context(|| {
            format!("reading linker script {}", config.ldscript.display())
        })?;
        hasher.write(&script);
        config.buildhash = hasher.finish();

        Ok(config)
    }

    /// Parses `contents`, resolving relative paths against `base`. The
    /// buildhash is left at zero.
    pub fn parse(contents: &str, base: &Path) -> Result<Self> {
        let toml: RawConfig = toml::from_str(contents)?;

        let framework = Framework::from_str(&toml.framework)
            .unwrap_or_else(|never| match never {});
        let ota_slot = toml.ota_slot.map(OtaSlot::try_from).transpose()?;

        let mut ldscript = base.join(&toml.ldscript);
        if let Some(name) = ldscript.file_name().and_then(|n| n.to_str()) {
            if let Some(modern) = modernize_script_name(name) {
                log::info!(
                    "linker script {} is a legacy name; using {}",
                    name,
                    modern
                );
                ldscript.set_file_name(modern);
            }
        }

        if toml.name.is_empty() || toml.name.contains(['/', '\\']) {
            bail!("image name {:?} must be a plain file name", toml.name);
        }

        let mut tools = toml.tools;
        for path in [&mut tools.boot_image, &mut tools.boot_stub]
            .into_iter()
            .flatten()
        {
            *path = base.join(&*path);
        }

        Ok(Config {
            name: toml.name,
            framework,
            elf: base.join(&toml.elf),
            ldscript,
            data_dir: toml.data_dir.map(|d| base.join(d)),
            ota_slot,
            board: BoardProfile {
                max_flash_bytes: toml.board.maximum_size,
                flash_freq: toml.board.f_flash,
                flash_mode: toml.board.flash_mode,
            },
            tools,
            upload: toml.upload,
            buildhash: 0,
        })
    }

    /// `--fs` always wins; otherwise an OTA slot makes this an OTA build.
    pub fn build_mode(&self, fs: bool) -> BuildMode {
        match (fs, self.ota_slot) {
            (true, _) => BuildMode::FilesystemImage,
            (false, Some(slot)) => BuildMode::OtaFirmware(slot),
            (false, None) => BuildMode::PlainFirmware,
        }
    }

    pub fn out_dir(&self) -> PathBuf {
        Path::new("target").join(&self.name)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.out_dir().join("dist")
    }
}
