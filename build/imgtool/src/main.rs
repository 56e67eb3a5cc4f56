// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use anyhow::Result;
use structopt::StructOpt;

mod config;
mod dist;
mod flash;
mod sizes;
mod tools;

use config::Config;

#[derive(Debug, StructOpt)]
#[structopt(
    max_term_width = 80,
    about = "lays out and assembles ESP8266 flash images"
)]
enum Imgtool {
    /// Assembles the flashable artifacts for a build, and writes a
    /// `flash.txt` map and `manifest.json` next to them.
    Dist {
        /// Raise log verbosity (-v debug, -vv trace).
        #[structopt(short, parse(from_occurrences))]
        verbose: u8,
        /// Build the filesystem image instead of firmware.
        #[structopt(long)]
        fs: bool,
        /// Re-assemble firmware even if it looks up to date.
        #[structopt(long)]
        force: bool,
        /// Path to the image configuration file, in TOML.
        cfg: PathBuf,
    },

    /// Runs `imgtool dist` and writes the result to the device
    Flash {
        /// Raise log verbosity, and ask the uploader for more output.
        #[structopt(short, parse(from_occurrences))]
        verbose: u8,
        /// Upload the filesystem image instead of firmware.
        #[structopt(long)]
        fs: bool,
        /// Print the upload command instead of running it.
        #[structopt(long)]
        dry_run: bool,
        /// Path to the image configuration file, in TOML.
        cfg: PathBuf,
    },

    /// Prints the flash parameters and filesystem region a config implies
    Layout {
        #[structopt(short, parse(from_occurrences))]
        verbose: u8,
        /// Path to the image configuration file, in TOML.
        cfg: PathBuf,
    },

    /// Reports text/data/bss sizes of the linked executable
    Size {
        #[structopt(short, parse(from_occurrences))]
        verbose: u8,
        /// Path to the image configuration file, in TOML.
        cfg: PathBuf,
    },
}

impl Imgtool {
    fn verbosity(&self) -> u8 {
        match self {
            Imgtool::Dist { verbose, .. }
            | Imgtool::Flash { verbose, .. }
            | Imgtool::Layout { verbose, .. }
            | Imgtool::Size { verbose, .. } => *verbose,
        }
    }
}

fn main() -> Result<()> {
    let imgtool = Imgtool::from_args();

    let level = match imgtool.verbosity() {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);
    env_logger::init_from_env(env);

    match imgtool {
        Imgtool::Dist {
            fs, force, cfg, ..
        } => {
            let toml = Config::from_file(&cfg)?;
            let manifest = dist::package(&toml, fs, force)?;
            print!("{}", dist::artifact_table(&manifest)?);
        }
        Imgtool::Flash {
            verbose,
            fs,
            dry_run,
            cfg,
        } => {
            let toml = Config::from_file(&cfg)?;
            let manifest = dist::package(&toml, fs, false)?;
            flash::run(&toml, &manifest, dry_run, verbose > 0)?;
        }
        Imgtool::Layout { cfg, .. } => {
            let toml = Config::from_file(&cfg)?;
            print!("{}", dist::describe(&toml)?);
        }
        Imgtool::Size { cfg, .. } => {
            let toml = Config::from_file(&cfg)?;
            sizes::run(&toml)?;
        }
    }

    Ok(())
}
