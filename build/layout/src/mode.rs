// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};

/// One of the two alternating firmware locations used for OTA updates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtaSlot {
    One,
    Two,
}

impl OtaSlot {
    pub fn index(self) -> u8 {
        match self {
            OtaSlot::One => 1,
            OtaSlot::Two => 2,
        }
    }
}

impl TryFrom<u8> for OtaSlot {
    type Error = LayoutError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(OtaSlot::One),
            2 => Ok(OtaSlot::Two),
            _ => Err(LayoutError::invalid("ota-slot", "1 or 2", v)),
        }
    }
}

/// What a single build invocation is asked to produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum BuildMode {
    PlainFirmware,
    OtaFirmware(OtaSlot),
    FilesystemImage,
}

/// Frameworks a project can be built against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Framework {
    Arduino,
    Simba,
    RtosSdk,
    NonOsSdk,
    NativeSdk,
    /// Anything else. Kept so that filesystem builds, which do not care,
    /// still work; firmware builds reject it.
    Other(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameworkFamily {
    /// The framework ships its own boot stub and wants one flat image.
    ArduinoLike,
    /// Vendor SDKs, flashed as a boot region plus a separate irom image.
    Sdk,
}

impl Framework {
    pub fn family(&self) -> Option<FrameworkFamily> {
        match self {
            Framework::Arduino | Framework::Simba => {
                Some(FrameworkFamily::ArduinoLike)
            }
            Framework::RtosSdk | Framework::NonOsSdk | Framework::NativeSdk => {
                Some(FrameworkFamily::Sdk)
            }
            Framework::Other(_) => None,
        }
    }

    /// Where the SDK image that is not the boot region gets flashed.
    ///
    /// This is a fixed convention of each SDK's boot loader; flat images
    /// have no such address.
    pub fn upload_address(&self, mode: BuildMode) -> Option<u32> {
        match self {
            Framework::RtosSdk => Some(0x2_0000),
            Framework::NonOsSdk => match mode {
                BuildMode::OtaFirmware(_) => Some(0x1000),
                _ => Some(0x1_0000),
            },
            Framework::NativeSdk => Some(0x4_0000),
            _ => None,
        }
    }
}

impl FromStr for Framework {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "arduino" => Framework::Arduino,
            "simba" => Framework::Simba,
            "esp8266-rtos-sdk" => Framework::RtosSdk,
            "esp8266-nonos-sdk" => Framework::NonOsSdk,
            "esp8266-sdk" => Framework::NativeSdk,
            other => Framework::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Framework::Arduino => "arduino",
            Framework::Simba => "simba",
            Framework::RtosSdk => "esp8266-rtos-sdk",
            Framework::NonOsSdk => "esp8266-nonos-sdk",
            Framework::NativeSdk => "esp8266-sdk",
            Framework::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// SPI flash access mode, as written into the boot header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    Qio,
    Qout,
    Dio,
    Dout,
}

impl FlashMode {
    pub fn header_code(self) -> u8 {
        match self {
            FlashMode::Qio => 0,
            FlashMode::Qout => 1,
            FlashMode::Dio => 2,
            FlashMode::Dout => 3,
        }
    }
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlashMode::Qio => "qio",
            FlashMode::Qout => "qout",
            FlashMode::Dio => "dio",
            FlashMode::Dout => "dout",
        };
        f.write_str(s)
    }
}

/// Read-only facts about the target board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardProfile {
    /// Declared flash size in bytes.
    pub max_flash_bytes: u32,
    /// Declared flash clock as the board lists it, e.g. `40000000L`.
    pub flash_freq: String,
    pub flash_mode: FlashMode,
}
