// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turns a linked executable (or a data directory) into flashable artifacts.
//!
//! Each [`Strategy`] has its own pipeline here. Artifacts are always written
//! to a `.partial` file first and renamed into place once complete, so an
//! interrupted build never leaves something that looks like a valid image.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::addr::{correct_flash_address, FlashRegion};
use crate::bootimg::{self, BootHeader, RomSegment};
use crate::elf::{format_symbols, ElfSection, SectionSource};
use crate::error::{LayoutError, Result};
use crate::mode::OtaSlot;
use crate::params::BuildParams;
use crate::select::Strategy;

pub const FIRMWARE_BIN: &str = "firmware.bin";
pub const BOOT_REGION_BIN: &str = "eagle.flash.bin";
pub const IROM_BIN: &str = "eagle.irom0text.bin";
pub const OTA_SYMBOLS: &str = "eagle.app.sym";
pub const OTA_APP_BIN: &str = "eagle.app.flash.bin";
pub const SPIFFS_BIN: &str = "spiffs.bin";

/// Raw section dumps handed to the OTA header generator, in the order it
/// expects them.
pub const OTA_SEGMENT_FILES: [(&str, &str); 4] = [
    (".text", "eagle.app.v6.text.bin"),
    (".data", "eagle.app.v6.data.bin"),
    (".rodata", "eagle.app.v6.rodata.bin"),
    (".irom0.text", "eagle.app.v6.irom0text.bin"),
];

const BOOT_SECTIONS: [&str; 3] = [".text", ".data", ".rodata"];
const IROM_SECTION: &str = ".irom0.text";

/// Where a single-region image starts, behind the boot stub.
pub const APP_IMAGE_OFFSET: u32 = 0x1000;

/// Fixed positional parameters for the OTA header generator: boot loader
/// version, SPI mode, clock divider and flash map.
const OTA_HEADER_PARAMS: [&str; 4] = ["2", "2", "0", "2"];

/// One named chunk of the final image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub section: String,
    pub data: Vec<u8>,
    /// `None` when the chunk lives inside another blob (for instance, a
    /// section the boot ROM copies to RAM).
    pub flash_offset: Option<u32>,
}

/// A finished file for the uploader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub flash_offset: Option<u32>,
    /// Sections (or source) the file was built from.
    pub sections: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Assembly {
    pub strategy: Strategy,
    pub segments: Vec<Segment>,
    pub artifacts: Vec<Artifact>,
}

/// Parameters for the OTA application-header generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppBinJob {
    /// Directory the generator runs in; it also looks for its inputs here.
    pub workdir: PathBuf,
    /// Symbol dump, executable, then the four section dumps.
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub slot: OtaSlot,
}

impl AppBinJob {
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> =
            self.inputs.iter().map(|p| p.clone().into_os_string()).collect();
        args.push(self.output.clone().into_os_string());
        args.extend(OTA_HEADER_PARAMS.iter().map(OsString::from));
        args.push(self.slot.index().to_string().into());
        args
    }
}

/// Parameters for the filesystem image packer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpiffsJob {
    pub data_dir: PathBuf,
    pub output: PathBuf,
    pub page_size: u32,
    pub block_size: u32,
    /// Always the corrected end minus the corrected start.
    pub size: u32,
}

impl SpiffsJob {
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "-c".into(),
            self.data_dir.clone().into_os_string(),
            "-p".into(),
            self.page_size.to_string().into(),
            "-b".into(),
            self.block_size.to_string().into(),
            "-s".into(),
            self.size.to_string().into(),
            self.output.clone().into_os_string(),
        ]
    }
}

/// The outside programs some strategies depend on.
pub trait ExternalTools {
    fn gen_appbin(&mut self, job: &AppBinJob) -> Result<()>;
    fn mkspiffs(&mut self, job: &SpiffsJob) -> Result<()>;
}

/// Files a strategy leaves behind, in upload order.
pub fn artifact_names(strategy: Strategy) -> &'static [&'static str] {
    match strategy {
        Strategy::SingleRegion => &[FIRMWARE_BIN],
        Strategy::MultiSegment => &[BOOT_REGION_BIN, IROM_BIN],
        Strategy::DualSlotSegment(_) => &[OTA_APP_BIN],
        Strategy::FsImage => &[SPIFFS_BIN],
    }
}

/// What a firmware strategy needs besides the executable.
#[derive(Clone)]
pub struct FirmwareParams<'a> {
    pub build: &'a BuildParams,
    /// Flash offset of the SDK's second image, if the framework has one.
    pub upload_address: Option<u32>,
    /// Boot loader placed ahead of a single-region image.
    pub boot_stub: Option<&'a dyn SectionSource>,
}

/// Runs a firmware strategy, writing its artifacts into `out_dir`.
pub fn assemble_firmware(
    strategy: Strategy,
    elf: &dyn SectionSource,
    params: &FirmwareParams<'_>,
    out_dir: &Path,
    tools: &mut dyn ExternalTools,
) -> Result<Assembly> {
    match strategy {
        Strategy::SingleRegion => single_region(elf, params, out_dir),
        Strategy::MultiSegment => multi_segment(elf, params, out_dir),
        Strategy::DualSlotSegment(slot) => {
            dual_slot(elf, params, slot, out_dir, tools)
        }
        Strategy::FsImage => Err(LayoutError::invalid(
            "strategy",
            "a firmware strategy",
            "FsImage",
        )),
    }
}

/// Packs `data_dir` into a filesystem image sized by the linker script.
///
/// `region` is the raw region as scanned; it is corrected here. The image is
/// rebuilt on every call because nothing tracks the directory contents.
pub fn assemble_filesystem(
    region: &FlashRegion,
    data_dir: &Path,
    out_dir: &Path,
    tools: &mut dyn ExternalTools,
) -> Result<Assembly> {
    let region = region.corrected()?;
    let output = out_dir.join(SPIFFS_BIN);

    produce(&output, |partial| {
        tools.mkspiffs(&SpiffsJob {
            data_dir: data_dir.to_path_buf(),
            output: partial.to_path_buf(),
            page_size: region.page_size,
            block_size: region.block_size,
            size: region.size(),
        })
    })?;

    let data = std::fs::read(&output).map_err(|e| LayoutError::io(&output, e))?;
    Ok(Assembly {
        strategy: Strategy::FsImage,
        segments: vec![Segment {
            section: "spiffs".to_string(),
            data,
            flash_offset: Some(region.start),
        }],
        artifacts: vec![Artifact {
            path: output,
            flash_offset: Some(region.start),
            sections: vec![data_dir.display().to_string()],
        }],
    })
}

fn boot_image<'a>(
    elf: &'a dyn SectionSource,
    params: &BuildParams,
) -> Result<(Vec<u8>, Vec<&'a ElfSection>)> {
    let sections = BOOT_SECTIONS
        .iter()
        .map(|name| elf.require(name))
        .collect::<Result<Vec<_>>>()?;
    let header = BootHeader::new(params, elf.entry())?;
    let rom: Vec<_> = sections
        .iter()
        .map(|s| RomSegment {
            addr: s.addr,
            data: &s.data,
        })
        .collect();
    Ok((bootimg::encode(&header, &rom)?, sections))
}

fn single_region(
    elf: &dyn SectionSource,
    params: &FirmwareParams<'_>,
    out_dir: &Path,
) -> Result<Assembly> {
    let build = params.build;
    let mut blob = match params.boot_stub {
        Some(stub) => {
            let text = stub.require(".text")?;
            let header = BootHeader::new(build, stub.entry())?;
            bootimg::encode(
                &header,
                &[RomSegment {
                    addr: text.addr,
                    data: &text.data,
                }],
            )?
        }
        None => {
            log::warn!(
                "no boot stub configured; {:#x} bytes at 0 left erased",
                APP_IMAGE_OFFSET
            );
            vec![]
        }
    };
    if blob.len() > APP_IMAGE_OFFSET as usize {
        return Err(LayoutError::invalid(
            "boot stub size",
            format!("at most {:#x} bytes", APP_IMAGE_OFFSET),
            format!("{:#x}", blob.len()),
        ));
    }
    blob.resize(APP_IMAGE_OFFSET as usize, 0xFF);

    // The cache maps flash 1:1 into irom0, so .irom0.text must be the first
    // segment of the application image and be linked right behind its
    // headers.
    let irom = elf.require(IROM_SECTION)?;
    let irom_offset = APP_IMAGE_OFFSET + bootimg::FIRST_SEGMENT_DATA;
    let linked_at = correct_flash_address(irom.addr);
    if linked_at != irom_offset {
        return Err(LayoutError::invalid(
            "irom0 offset",
            format!("{:#x}", irom_offset),
            format!("{:#x}", linked_at),
        ));
    }

    let ram = BOOT_SECTIONS
        .iter()
        .map(|name| elf.require(name))
        .collect::<Result<Vec<_>>>()?;
    let mut rom = vec![RomSegment {
        addr: irom.addr,
        data: &irom.data,
    }];
    rom.extend(ram.iter().map(|s| RomSegment {
        addr: s.addr,
        data: &s.data,
    }));
    let app = bootimg::encode(&BootHeader::new(build, elf.entry())?, &rom)?;

    // Everything after .irom0.text, headers and padding included.
    let ram_offset = irom_offset as usize + irom.data.len().next_multiple_of(4);
    let ram_blob = app[ram_offset - APP_IMAGE_OFFSET as usize..].to_vec();

    blob.extend_from_slice(&app);
    let path = out_dir.join(FIRMWARE_BIN);
    write_artifact(&path, &blob)?;

    Ok(Assembly {
        strategy: Strategy::SingleRegion,
        segments: vec![
            Segment {
                section: IROM_SECTION.to_string(),
                data: irom.data.clone(),
                flash_offset: Some(irom_offset),
            },
            Segment {
                section: BOOT_SECTIONS.join("/"),
                data: ram_blob,
                flash_offset: Some(ram_offset as u32),
            },
        ],
        artifacts: vec![Artifact {
            path,
            flash_offset: Some(0),
            sections: section_list(&[&[IROM_SECTION], &BOOT_SECTIONS[..]]),
        }],
    })
}

fn multi_segment(
    elf: &dyn SectionSource,
    params: &FirmwareParams<'_>,
    out_dir: &Path,
) -> Result<Assembly> {
    let upload_address = require_upload_address(params)?;
    let (boot, boot_sections) = boot_image(elf, params.build)?;
    let irom = elf.require(IROM_SECTION)?;

    let mapped = correct_flash_address(irom.addr);
    if mapped != upload_address {
        log::warn!(
            "{} is linked at {:#010x} (flash {:#x}) but will be written \
             to {:#x}",
            IROM_SECTION,
            irom.addr,
            mapped,
            upload_address
        );
    }

    let boot_path = out_dir.join(BOOT_REGION_BIN);
    let irom_path = out_dir.join(IROM_BIN);
    write_artifact(&boot_path, &boot)?;
    write_artifact(&irom_path, &irom.data)?;

    let mut segments: Vec<_> = boot_sections
        .iter()
        .map(|s| Segment {
            section: s.name.clone(),
            data: s.data.clone(),
            flash_offset: None,
        })
        .collect();
    segments.push(Segment {
        section: IROM_SECTION.to_string(),
        data: irom.data.clone(),
        flash_offset: Some(upload_address),
    });

    Ok(Assembly {
        strategy: Strategy::MultiSegment,
        segments,
        artifacts: vec![
            Artifact {
                path: boot_path,
                flash_offset: Some(0),
                sections: section_list(&[&BOOT_SECTIONS[..]]),
            },
            Artifact {
                path: irom_path,
                flash_offset: Some(upload_address),
                sections: section_list(&[&[IROM_SECTION]]),
            },
        ],
    })
}

fn dual_slot(
    elf: &dyn SectionSource,
    params: &FirmwareParams<'_>,
    slot: OtaSlot,
    out_dir: &Path,
    tools: &mut dyn ExternalTools,
) -> Result<Assembly> {
    let upload_address = require_upload_address(params)?;

    let mut segments = vec![];
    let mut seg_paths = vec![];
    for (section, file) in OTA_SEGMENT_FILES {
        let s = elf.require(section)?;
        let path = out_dir.join(file);
        write_artifact(&path, &s.data)?;
        seg_paths.push(path);
        segments.push(Segment {
            section: section.to_string(),
            data: s.data.clone(),
            flash_offset: None,
        });
    }

    let sym_path = out_dir.join(OTA_SYMBOLS);
    write_artifact(&sym_path, format_symbols(&elf.global_symbols()).as_bytes())?;

    let mut inputs = vec![sym_path, elf.path().to_path_buf()];
    inputs.extend(seg_paths);

    let output = out_dir.join(OTA_APP_BIN);
    produce(&output, |partial| {
        tools.gen_appbin(&AppBinJob {
            workdir: out_dir.to_path_buf(),
            inputs,
            output: partial.to_path_buf(),
            slot,
        })
    })?;

    // Only the first slot sits at a fixed offset we can flash directly; the
    // second is delivered over the air by the running firmware.
    let flash_offset = match slot {
        OtaSlot::One => Some(upload_address),
        OtaSlot::Two => None,
    };

    Ok(Assembly {
        strategy: Strategy::DualSlotSegment(slot),
        segments,
        artifacts: vec![Artifact {
            path: output,
            flash_offset,
            sections: OTA_SEGMENT_FILES
                .iter()
                .map(|(s, _)| s.to_string())
                .collect(),
        }],
    })
}

fn require_upload_address(params: &FirmwareParams<'_>) -> Result<u32> {
    params.upload_address.ok_or_else(|| {
        LayoutError::invalid("upload address", "an SDK framework", "none")
    })
}

fn section_list(groups: &[&[&str]]) -> Vec<String> {
    groups.iter().flat_map(|g| g.iter().map(|s| s.to_string())).collect()
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Writes `data` to `path` via a `.partial` file.
pub fn write_artifact(path: &Path, data: &[u8]) -> Result<()> {
    produce(path, |partial| {
        std::fs::write(partial, data).map_err(|e| LayoutError::io(partial, e))
    })
}

/// Lets `make` fill in a `.partial` file, then moves it to `path`.
///
/// Any previous `path` is removed first. If `make` fails, nothing is left
/// under either name.
fn produce(
    path: &Path,
    make: impl FnOnce(&Path) -> Result<()>,
) -> Result<()> {
    let partial = partial_path(path);
    for stale in [path, partial.as_path()] {
        match std::fs::remove_file(stale) {
            Ok(()) => (),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => return Err(LayoutError::io(stale, e)),
        }
    }

    if let Err(e) = make(&partial) {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    if !partial.exists() {
        return Err(LayoutError::Tool {
            tool: "artifact producer".to_string(),
            reason: format!("{} was not created", partial.display()),
        });
    }
    std::fs::rename(&partial, path).map_err(|e| LayoutError::io(path, e))?;
    log::debug!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::Symbol;
    use crate::mode::FlashMode;

    struct FakeElf {
        path: PathBuf,
        sections: Vec<ElfSection>,
    }

    impl FakeElf {
        fn new(irom_addr: u32) -> Self {
            let sec = |name: &str, addr, data: Vec<u8>| ElfSection {
                name: name.to_string(),
                addr,
                size: data.len() as u32,
                kind: crate::elf::SectionKind::Code,
                data,
            };
            FakeElf {
                path: PathBuf::from("/build/firmware.elf"),
                sections: vec![
                    sec(".text", 0x4010_0000, vec![0xAA; 6]),
                    sec(".data", 0x3FFE_8000, vec![0xBB; 4]),
                    sec(".rodata", 0x3FFE_8010, vec![0xCC; 8]),
                    sec(".irom0.text", irom_addr, vec![0xDD; 32]),
                ],
            }
        }

        /// A boot loader with nothing but `len` bytes of `.text`.
        fn stub(len: usize) -> Self {
            FakeElf {
                path: PathBuf::from("/sdk/eboot.elf"),
                sections: vec![ElfSection {
                    name: ".text".into(),
                    addr: 0x4010_0000,
                    size: len as u32,
                    kind: crate::elf::SectionKind::Code,
                    data: vec![0xEE; len],
                }],
            }
        }

        fn with(mut self, name: &str, data: Vec<u8>) -> Self {
            for s in self.sections.iter_mut().filter(|s| s.name == name) {
                s.size = data.len() as u32;
                s.data = data.clone();
            }
            self
        }

        fn without(mut self, name: &str) -> Self {
            self.sections.retain(|s| s.name != name);
            self
        }
    }

    impl SectionSource for FakeElf {
        fn path(&self) -> &Path {
            &self.path
        }
        fn entry(&self) -> u32 {
            0x4010_0004
        }
        fn section(&self, name: &str) -> Option<&ElfSection> {
            self.sections.iter().find(|s| s.name == name)
        }
        fn global_symbols(&self) -> Vec<Symbol> {
            vec![Symbol {
                name: "user_init".into(),
                value: Some(0x4021_0000),
                kind: 'T',
            }]
        }
    }

    #[derive(Default)]
    struct Recorder {
        appbin: Vec<AppBinJob>,
        spiffs: Vec<SpiffsJob>,
        fail: bool,
    }

    impl ExternalTools for Recorder {
        fn gen_appbin(&mut self, job: &AppBinJob) -> Result<()> {
            self.appbin.push(job.clone());
            if self.fail {
                std::fs::write(&job.output, b"half").unwrap();
                return Err(LayoutError::Tool {
                    tool: "gen_appbin".into(),
                    reason: "killed".into(),
                });
            }
            std::fs::write(&job.output, b"ota image").unwrap();
            Ok(())
        }

        fn mkspiffs(&mut self, job: &SpiffsJob) -> Result<()> {
            self.spiffs.push(job.clone());
            if self.fail {
                return Err(LayoutError::Tool {
                    tool: "mkspiffs".into(),
                    reason: "exit status 1".into(),
                });
            }
            std::fs::write(&job.output, vec![0xFF; 16]).unwrap();
            Ok(())
        }
    }

    fn build_params() -> BuildParams {
        BuildParams {
            size_class: "4M".into(),
            freq_class: 40,
            flash_mode: FlashMode::Dio,
        }
    }

    #[test]
    fn plain_sdk_build_gives_two_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let elf = FakeElf::new(0x4021_0000);
        let build = build_params();
        let params = FirmwareParams {
            build: &build,
            upload_address: Some(0x1_0000),
            boot_stub: None,
        };
        let out = assemble_firmware(
            Strategy::MultiSegment,
            &elf,
            &params,
            dir.path(),
            &mut Recorder::default(),
        )
        .unwrap();

        assert_eq!(out.artifacts.len(), 2);
        assert_eq!(out.artifacts[0].sections, [".text", ".data", ".rodata"]);
        assert_eq!(out.artifacts[0].flash_offset, Some(0));
        assert_eq!(out.artifacts[1].sections, [".irom0.text"]);
        assert_eq!(out.artifacts[1].flash_offset, Some(0x1_0000));

        assert_eq!(out.segments.len(), 4);
        assert_eq!(out.segments[3].flash_offset, Some(0x1_0000));

        let boot = std::fs::read(dir.path().join(BOOT_REGION_BIN)).unwrap();
        assert_eq!(boot[0], bootimg::IMAGE_MAGIC);
        assert_eq!(boot[1], 3);
        assert_eq!(boot[2], FlashMode::Dio.header_code());
        assert_eq!(boot[3], 0x40);
        let irom = std::fs::read(dir.path().join(IROM_BIN)).unwrap();
        assert_eq!(irom, vec![0xDD; 32]);
        assert!(!partial_path(&dir.path().join(IROM_BIN)).exists());
    }

    fn single_region(
        elf: &FakeElf,
        stub: Option<&FakeElf>,
        dir: &Path,
    ) -> Result<Assembly> {
        let build = build_params();
        let params = FirmwareParams {
            build: &build,
            upload_address: None,
            boot_stub: stub.map(|s| s as &dyn SectionSource),
        };
        assemble_firmware(
            Strategy::SingleRegion,
            elf,
            &params,
            dir,
            &mut Recorder::default(),
        )
    }

    #[test]
    fn single_region_puts_irom_first_in_the_app_image() {
        let dir = tempfile::tempdir().unwrap();
        let elf = FakeElf::new(0x4020_1010).with(".text", vec![0xAA; 0x6000]);
        let stub = FakeElf::stub(0x600);
        let out = single_region(&elf, Some(&stub), dir.path()).unwrap();

        assert_eq!(out.artifacts.len(), 1);
        assert_eq!(out.artifacts[0].flash_offset, Some(0));
        assert_eq!(
            out.artifacts[0].sections,
            [".irom0.text", ".text", ".data", ".rodata"]
        );
        assert_eq!(out.segments.len(), 2);
        assert_eq!(out.segments[0].section, ".irom0.text");
        assert_eq!(out.segments[0].flash_offset, Some(0x1010));
        assert_eq!(out.segments[1].section, ".text/.data/.rodata");
        assert_eq!(out.segments[1].flash_offset, Some(0x1030));

        let blob = std::fs::read(dir.path().join(FIRMWARE_BIN)).unwrap();
        assert_eq!(blob.len() % 16, 0);

        // boot stub, then erased flash up to the app image
        assert_eq!(&blob[..2], &[bootimg::IMAGE_MAGIC, 1]);
        assert_eq!(&blob[8..12], &0x4010_0000u32.to_le_bytes());
        assert_eq!(&blob[16..0x616], &[0xEE; 0x600]);
        assert_eq!(blob[0xFFF], 0xFF);

        // app header, then .irom0.text at its linked offset
        assert_eq!(&blob[0x1000..0x1004], &[bootimg::IMAGE_MAGIC, 4, 2, 0x40]);
        assert_eq!(&blob[0x1008..0x100C], &0x4020_1010u32.to_le_bytes());
        assert_eq!(&blob[0x100C..0x1010], &32u32.to_le_bytes());
        assert_eq!(&blob[0x1010..0x1030], &[0xDD; 32]);

        // then the RAM segments
        assert_eq!(&blob[0x1030..0x1034], &0x4010_0000u32.to_le_bytes());
        assert_eq!(&blob[0x1034..0x1038], &0x6000u32.to_le_bytes());
        assert_eq!(&blob[0x1038..0x7038], &[0xAA; 0x6000][..]);
        assert_eq!(&blob[0x1030..], &out.segments[1].data[..]);
    }

    #[test]
    fn single_region_without_stub_leaves_boot_sector_erased() {
        let dir = tempfile::tempdir().unwrap();
        let elf = FakeElf::new(0x4020_1010);
        single_region(&elf, None, dir.path()).unwrap();

        let blob = std::fs::read(dir.path().join(FIRMWARE_BIN)).unwrap();
        assert!(blob[..0x1000].iter().all(|&b| b == 0xFF));
        assert_eq!(blob[0x1000], bootimg::IMAGE_MAGIC);
        assert_eq!(&blob[0x1010..0x1030], &[0xDD; 32]);
    }

    #[test]
    fn single_region_rejects_misplaced_irom() {
        let dir = tempfile::tempdir().unwrap();
        // linked for an SDK layout at 0x10000
        let elf = FakeElf::new(0x4021_0000);
        let err = single_region(&elf, None, dir.path()).unwrap_err();
        match err {
            LayoutError::InvalidParameter { name, .. } => {
                assert_eq!(name, "irom0 offset")
            }
            e => panic!("unexpected {e:?}"),
        }
        assert!(!dir.path().join(FIRMWARE_BIN).exists());
    }

    #[test]
    fn single_region_rejects_oversized_stub() {
        let dir = tempfile::tempdir().unwrap();
        let elf = FakeElf::new(0x4020_1010);
        let stub = FakeElf::stub(0x1000);
        assert!(matches!(
            single_region(&elf, Some(&stub), dir.path()),
            Err(LayoutError::InvalidParameter { .. })
        ));
        assert!(!dir.path().join(FIRMWARE_BIN).exists());
    }

    #[test]
    fn missing_section_names_the_section() {
        let dir = tempfile::tempdir().unwrap();
        let elf = FakeElf::new(0x4021_0000).without(".rodata");
        let build = build_params();
        let params = FirmwareParams {
            build: &build,
            upload_address: Some(0x1_0000),
            boot_stub: None,
        };
        let err = assemble_firmware(
            Strategy::MultiSegment,
            &elf,
            &params,
            dir.path(),
            &mut Recorder::default(),
        )
        .unwrap_err();
        match err {
            LayoutError::ExtractionFailure { section, elf } => {
                assert_eq!(section, ".rodata");
                assert_eq!(elf, PathBuf::from("/build/firmware.elf"));
            }
            e => panic!("unexpected {e:?}"),
        }
    }

    #[test]
    fn ota_build_feeds_the_header_generator() {
        let dir = tempfile::tempdir().unwrap();
        let elf = FakeElf::new(0x4021_0000);
        let build = build_params();
        let params = FirmwareParams {
            build: &build,
            upload_address: Some(0x1000),
            boot_stub: None,
        };
        let mut tools = Recorder::default();
        let out = assemble_firmware(
            Strategy::DualSlotSegment(OtaSlot::One),
            &elf,
            &params,
            dir.path(),
            &mut tools,
        )
        .unwrap();

        assert_eq!(tools.appbin.len(), 1);
        let job = &tools.appbin[0];
        assert_eq!(job.inputs.len(), 6);
        assert_eq!(job.inputs[0], dir.path().join(OTA_SYMBOLS));
        assert_eq!(job.inputs[1], PathBuf::from("/build/firmware.elf"));
        assert_eq!(job.inputs[5], dir.path().join("eagle.app.v6.irom0text.bin"));

        let args = job.args();
        let tail: Vec<_> = args[args.len() - 5..]
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(tail, ["2", "2", "0", "2", "1"]);

        let syms = std::fs::read_to_string(dir.path().join(OTA_SYMBOLS)).unwrap();
        assert_eq!(syms, "40210000 T user_init\n");

        assert_eq!(out.segments.len(), 4);
        assert_eq!(out.artifacts.len(), 1);
        assert_eq!(out.artifacts[0].path, dir.path().join(OTA_APP_BIN));
        assert_eq!(out.artifacts[0].flash_offset, Some(0x1000));
        assert_eq!(
            std::fs::read(dir.path().join(OTA_APP_BIN)).unwrap(),
            b"ota image"
        );
    }

    #[test]
    fn second_slot_has_no_flash_offset() {
        let dir = tempfile::tempdir().unwrap();
        let elf = FakeElf::new(0x4021_0000);
        let build = build_params();
        let params = FirmwareParams {
            build: &build,
            upload_address: Some(0x1000),
            boot_stub: None,
        };
        let mut tools = Recorder::default();
        let out = assemble_firmware(
            Strategy::DualSlotSegment(OtaSlot::Two),
            &elf,
            &params,
            dir.path(),
            &mut tools,
        )
        .unwrap();
        assert_eq!(out.artifacts[0].flash_offset, None);
        assert_eq!(tools.appbin[0].slot, OtaSlot::Two);
    }

    #[test]
    fn failed_generator_leaves_no_image() {
        let dir = tempfile::tempdir().unwrap();
        let elf = FakeElf::new(0x4021_0000);
        let build = build_params();
        let params = FirmwareParams {
            build: &build,
            upload_address: Some(0x1000),
            boot_stub: None,
        };
        std::fs::write(dir.path().join(OTA_APP_BIN), b"old image").unwrap();
        let mut tools = Recorder {
            fail: true,
            ..Default::default()
        };
        assert!(assemble_firmware(
            Strategy::DualSlotSegment(OtaSlot::One),
            &elf,
            &params,
            dir.path(),
            &mut tools,
        )
        .is_err());
        assert!(!dir.path().join(OTA_APP_BIN).exists());
        assert!(!partial_path(&dir.path().join(OTA_APP_BIN)).exists());
    }

    #[test]
    fn filesystem_budget_uses_corrected_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let raw = FlashRegion {
            start: 0x4030_0000,
            end: 0x404F_B000,
            page_size: 0x100,
            block_size: 0x2000,
        };
        let mut tools = Recorder::default();
        let out = assemble_filesystem(
            &raw,
            Path::new("data"),
            dir.path(),
            &mut tools,
        )
        .unwrap();

        let job = &tools.spiffs[0];
        assert_eq!(job.size, 0x2F_B000 - 0x10_0000);
        assert_ne!(job.size, correct_flash_address(raw.end - raw.start));
        assert_eq!(job.page_size, 0x100);
        assert_eq!(job.block_size, 0x2000);
        assert_eq!(job.output, partial_path(&dir.path().join(SPIFFS_BIN)));

        let args: Vec<_> = job
            .args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[..2], ["-c", "data"]);
        assert_eq!(args[7], (0x1F_B000u32).to_string());

        assert_eq!(out.artifacts[0].flash_offset, Some(0x10_0000));
        assert_eq!(out.segments[0].data.len(), 16);
    }

    #[test]
    fn filesystem_is_always_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let raw = FlashRegion {
            start: 0x4030_0000,
            end: 0x403F_B000,
            page_size: 0x100,
            block_size: 0x2000,
        };
        std::fs::write(dir.path().join(SPIFFS_BIN), b"stale").unwrap();
        let mut tools = Recorder {
            fail: true,
            ..Default::default()
        };
        assert!(assemble_filesystem(&raw, Path::new("data"), dir.path(), &mut tools)
            .is_err());
        assert_eq!(tools.spiffs.len(), 1);
        assert!(!dir.path().join(SPIFFS_BIN).exists());
    }

    #[test]
    fn fs_strategy_is_not_firmware() {
        let dir = tempfile::tempdir().unwrap();
        let build = build_params();
        let params = FirmwareParams {
            build: &build,
            upload_address: None,
            boot_stub: None,
        };
        assert!(assemble_firmware(
            Strategy::FsImage,
            &FakeElf::new(0),
            &params,
            dir.path(),
            &mut Recorder::default(),
        )
        .is_err());
    }

    #[test]
    fn names_match_strategies() {
        assert_eq!(artifact_names(Strategy::MultiSegment), [BOOT_REGION_BIN, IROM_BIN]);
        assert_eq!(artifact_names(Strategy::FsImage), [SPIFFS_BIN]);
    }
}
