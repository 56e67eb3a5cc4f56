// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::process::Command;

use layout::assemble::{AppBinJob, ExternalTools, SpiffsJob};
use layout::LayoutError;

use crate::config::{ToolCommand, Tools};

/// Runs the external collaborators as child processes.
pub struct SystemTools<'a> {
    tools: &'a Tools,
}

impl<'a> SystemTools<'a> {
    pub fn new(tools: &'a Tools) -> Self {
        Self { tools }
    }

    fn command(&self, tool: &ToolCommand) -> layout::Result<Command> {
        let mut cmd = tool.command().map_err(|e| LayoutError::Tool {
            tool: tool.display_name().to_string(),
            reason: e.to_string(),
        })?;
        cmd.envs(&self.tools.env);
        Ok(cmd)
    }
}

impl ExternalTools for SystemTools<'_> {
    fn gen_appbin(&mut self, job: &AppBinJob) -> layout::Result<()> {
        let tool = &self.tools.gen_appbin;
        let mut cmd = self.command(tool)?;
        cmd.args(job.args()).current_dir(&job.workdir);
        run(tool, cmd)
    }

    fn mkspiffs(&mut self, job: &SpiffsJob) -> layout::Result<()> {
        let tool = &self.tools.mkspiffs;
        let mut cmd = self.command(tool)?;
        cmd.args(job.args());
        run(tool, cmd)
    }
}

fn run(tool: &ToolCommand, mut cmd: Command) -> layout::Result<()> {
    log::info!("running {:?}", cmd);
    let failed = |reason: String| LayoutError::Tool {
        tool: tool.display_name().to_string(),
        reason,
    };
    let status = cmd
        .status()
        .map_err(|e| failed(format!("could not start ({e})")))?;
    if !status.success() {
        return Err(failed(format!("{status}, see output for details")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_program_is_a_tool_error() {
        let tools = Tools {
            mkspiffs: ToolCommand::Program(
                "definitely-not-an-installed-mkspiffs".into(),
            ),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = SystemTools::new(&tools)
            .mkspiffs(&SpiffsJob {
                data_dir: PathBuf::from("data"),
                output: dir.path().join("spiffs.bin.partial"),
                page_size: 256,
                block_size: 8192,
                size: 0x1000,
            })
            .unwrap_err();
        match err {
            LayoutError::Tool { tool, .. } => {
                assert_eq!(tool, "definitely-not-an-installed-mkspiffs")
            }
            e => panic!("unexpected {e:?}"),
        }
    }

    #[test]
    fn empty_argv_is_a_tool_error() {
        let tools = Tools {
            gen_appbin: ToolCommand::Argv(vec![]),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = SystemTools::new(&tools)
            .gen_appbin(&AppBinJob {
                workdir: dir.path().to_path_buf(),
                inputs: vec![],
                output: dir.path().join("eagle.app.flash.bin"),
                slot: layout::OtaSlot::One,
            })
            .unwrap_err();
        assert!(matches!(err, LayoutError::Tool { .. }));
    }
}
