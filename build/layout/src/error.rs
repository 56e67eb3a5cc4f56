// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LayoutError>;

/// Everything that can stop an image from being laid out.
///
/// None of these are transient: each one is a static misconfiguration, so
/// callers should report them and stop rather than retry.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// A required `PROVIDE(_SPIFFS_<NAME> = ...)` marker was not found.
    #[error("linker script {} does not provide _SPIFFS_{name}", path.display())]
    MissingSymbol { name: String, path: PathBuf },

    /// A numeric board, linker or override value could not be used.
    #[error("invalid {name}: expected {expected}, found {found:?}")]
    InvalidParameter {
        name: String,
        expected: String,
        found: String,
    },

    /// No image strategy exists for this framework and build mode.
    #[error("unrecognized framework '{0}' for a firmware build")]
    UnrecognizedFramework(String),

    /// The executable lacks a section the chosen strategy extracts.
    #[error("{}: section {section} not found", elf.display())]
    ExtractionFailure { section: String, elf: PathBuf },

    /// An external collaborator (packer, header generator) failed.
    #[error("{tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Elf {
        path: PathBuf,
        #[source]
        source: goblin::error::Error,
    },
}

impl LayoutError {
    pub(crate) fn invalid(
        name: impl Into<String>,
        expected: impl Into<String>,
        found: impl ToString,
    ) -> Self {
        LayoutError::InvalidParameter {
            name: name.into(),
            expected: expected.into(),
            found: found.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LayoutError::Io {
            path: path.into(),
            source,
        }
    }
}
