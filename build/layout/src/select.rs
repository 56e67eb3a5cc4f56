// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};
use crate::mode::{BuildMode, Framework, FrameworkFamily, OtaSlot};

/// The image-assembly pipelines we know how to run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Flat image: boot header plus code, with irom placed behind it.
    SingleRegion,
    /// Boot-region image at 0 plus a separate irom image.
    MultiSegment,
    /// Raw segments handed to the OTA header generator for one slot.
    DualSlotSegment(OtaSlot),
    /// Filesystem image built by the external packer.
    FsImage,
}

/// Picks the assembly strategy for a build.
///
/// Filesystem images do not depend on the framework at all. Firmware builds
/// against a framework we don't know are refused here, before any tool runs.
pub fn select(mode: BuildMode, framework: &Framework) -> Result<Strategy> {
    let family = framework.family();
    let strategy = match (mode, family) {
        (BuildMode::FilesystemImage, _) => Strategy::FsImage,
        (_, None) => {
            return Err(LayoutError::UnrecognizedFramework(
                framework.to_string(),
            ))
        }
        (
            BuildMode::PlainFirmware | BuildMode::OtaFirmware(_),
            Some(FrameworkFamily::ArduinoLike),
        ) => Strategy::SingleRegion,
        (BuildMode::PlainFirmware, Some(FrameworkFamily::Sdk)) => {
            Strategy::MultiSegment
        }
        (BuildMode::OtaFirmware(slot), Some(FrameworkFamily::Sdk)) => {
            Strategy::DualSlotSegment(slot)
        }
    };
    log::debug!("{:?} on {} -> {:?}", mode, framework, strategy);
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [BuildMode; 4] = [
        BuildMode::PlainFirmware,
        BuildMode::OtaFirmware(OtaSlot::One),
        BuildMode::OtaFirmware(OtaSlot::Two),
        BuildMode::FilesystemImage,
    ];

    fn expected(
        mode: BuildMode,
        family: Option<FrameworkFamily>,
    ) -> Option<Strategy> {
        use FrameworkFamily::*;
        Some(match (mode, family) {
            (BuildMode::FilesystemImage, _) => Strategy::FsImage,
            (_, None) => return None,
            (_, Some(ArduinoLike)) => Strategy::SingleRegion,
            (BuildMode::PlainFirmware, Some(Sdk)) => Strategy::MultiSegment,
            (BuildMode::OtaFirmware(s), Some(Sdk)) => {
                Strategy::DualSlotSegment(s)
            }
        })
    }

    #[test]
    fn table_is_total() {
        let frameworks = [
            Framework::Arduino,
            Framework::NonOsSdk,
            Framework::Other("mbed".into()),
        ];
        for mode in MODES {
            for fw in &frameworks {
                let got = select(mode, fw);
                match expected(mode, fw.family()) {
                    Some(s) => assert_eq!(got.unwrap(), s, "{mode:?}/{fw}"),
                    None => assert!(
                        matches!(
                            got,
                            Err(LayoutError::UnrecognizedFramework(ref n)) if n == "mbed"
                        ),
                        "{mode:?}/{fw}"
                    ),
                }
            }
        }
    }

    #[test]
    fn sdk_rows() {
        for fw in [Framework::RtosSdk, Framework::NonOsSdk, Framework::NativeSdk]
        {
            assert_eq!(
                select(BuildMode::PlainFirmware, &fw).unwrap(),
                Strategy::MultiSegment
            );
            assert_eq!(
                select(BuildMode::OtaFirmware(OtaSlot::Two), &fw).unwrap(),
                Strategy::DualSlotSegment(OtaSlot::Two)
            );
        }
    }

    #[test]
    fn arduino_ignores_ota() {
        assert_eq!(
            select(BuildMode::OtaFirmware(OtaSlot::One), &Framework::Simba)
                .unwrap(),
            Strategy::SingleRegion
        );
    }

    #[test]
    fn filesystem_with_unknown_framework() {
        assert_eq!(
            select(BuildMode::FilesystemImage, &Framework::Other("x".into()))
                .unwrap(),
            Strategy::FsImage
        );
    }
}
