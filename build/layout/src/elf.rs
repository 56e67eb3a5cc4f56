// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use goblin::elf::section_header::{
    SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHT_NOBITS,
};
use goblin::elf::sym::{STB_GLOBAL, STB_WEAK};
use goblin::elf::Elf;

use crate::error::{LayoutError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Code,
    ReadOnly,
    Writable,
    /// Occupies memory at run time but nothing in the file.
    NoBits,
}

/// An allocated section, copied out of the executable.
#[derive(Clone, Debug)]
pub struct ElfSection {
    pub name: String,
    pub addr: u32,
    pub size: u32,
    pub kind: SectionKind,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    /// `None` for undefined symbols.
    pub value: Option<u32>,
    /// `nm` type letter: `T`, `D`, `B`, `R`, `A`, `W`, `U`...
    pub kind: char,
}

/// Everything the assembler needs out of a linked executable.
///
/// The default implementation reads an ELF file; tests substitute their own.
pub trait SectionSource {
    fn path(&self) -> &Path;

    fn entry(&self) -> u32;

    fn section(&self, name: &str) -> Option<&ElfSection>;

    /// Global and weak symbols, sorted by name.
    fn global_symbols(&self) -> Vec<Symbol>;

    /// Looks up `name`, failing the build if the executable lacks it.
    fn require(&self, name: &str) -> Result<&ElfSection> {
        self.section(name).ok_or_else(|| LayoutError::ExtractionFailure {
            section: name.to_string(),
            elf: self.path().to_path_buf(),
        })
    }
}

/// A parsed lx106 executable.
#[derive(Clone, Debug)]
pub struct ElfImage {
    path: PathBuf,
    entry: u32,
    sections: Vec<ElfSection>,
    symbols: Vec<Symbol>,
}

impl ElfImage {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| LayoutError::io(path, e))?;
        Self::parse(path, &bytes)
    }

    pub fn parse(path: &Path, bytes: &[u8]) -> Result<Self> {
        let elf = Elf::parse(bytes).map_err(|source| LayoutError::Elf {
            path: path.to_path_buf(),
            source,
        })?;

        if !elf.little_endian {
            return Err(LayoutError::invalid(
                "ELF byte order",
                "little-endian",
                "big-endian",
            ));
        }
        if elf.header.e_machine != goblin::elf::header::EM_XTENSA {
            return Err(LayoutError::invalid(
                "ELF machine",
                format!("Xtensa ({})", goblin::elf::header::EM_XTENSA),
                elf.header.e_machine,
            ));
        }

        let mut sections = vec![];
        for shdr in &elf.section_headers {
            if shdr.sh_flags & u64::from(SHF_ALLOC) == 0 {
                continue;
            }
            let Some(name) = elf.shdr_strtab.get_at(shdr.sh_name) else {
                continue;
            };
            let kind = if shdr.sh_type == SHT_NOBITS {
                SectionKind::NoBits
            } else if shdr.sh_flags & u64::from(SHF_EXECINSTR) != 0 {
                SectionKind::Code
            } else if shdr.sh_flags & u64::from(SHF_WRITE) != 0 {
                SectionKind::Writable
            } else {
                SectionKind::ReadOnly
            };
            let data = if kind == SectionKind::NoBits {
                vec![]
            } else {
                let start = shdr.sh_offset as usize;
                let end = start + shdr.sh_size as usize;
                bytes
                    .get(start..end)
                    .ok_or_else(|| {
                        LayoutError::invalid(
                            format!("{name} file range"),
                            format!("within {} bytes", bytes.len()),
                            format!("{start:#x}..{end:#x}"),
                        )
                    })?
                    .to_vec()
            };
            sections.push(ElfSection {
                name: name.to_string(),
                addr: shdr.sh_addr as u32,
                size: shdr.sh_size as u32,
                kind,
                data,
            });
        }

        let mut symbols = vec![];
        for sym in elf.syms.iter() {
            let bind = sym.st_bind();
            if bind != STB_GLOBAL && bind != STB_WEAK {
                continue;
            }
            let name = match elf.strtab.get_at(sym.st_name) {
                Some(n) if !n.is_empty() => n,
                _ => continue,
            };
            let defined = sym.st_shndx != goblin::elf::section_header::SHN_UNDEF as usize;
            let kind = if bind == STB_WEAK {
                if defined {
                    'W'
                } else {
                    'w'
                }
            } else if !defined {
                'U'
            } else if sym.st_shndx == goblin::elf::section_header::SHN_ABS as usize {
                'A'
            } else {
                let shdr = elf.section_headers.get(sym.st_shndx);
                match shdr {
                    Some(s) if s.sh_type == SHT_NOBITS => 'B',
                    Some(s) if s.sh_flags & u64::from(SHF_EXECINSTR) != 0 => 'T',
                    Some(s) if s.sh_flags & u64::from(SHF_WRITE) != 0 => 'D',
                    Some(_) => 'R',
                    None => '?',
                }
            };
            symbols.push(Symbol {
                name: name.to_string(),
                value: defined.then_some(sym.st_value as u32),
                kind,
            });
        }
        symbols.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ElfImage {
            path: path.to_path_buf(),
            entry: elf.header.e_entry as u32,
            sections,
            symbols,
        })
    }

    pub fn sections(&self) -> &[ElfSection] {
        &self.sections
    }
}

impl SectionSource for ElfImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn entry(&self) -> u32 {
        self.entry
    }

    fn section(&self, name: &str) -> Option<&ElfSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn global_symbols(&self) -> Vec<Symbol> {
        self.symbols.clone()
    }
}

/// Renders symbols the way `nm -g` prints them.
pub fn format_symbols(symbols: &[Symbol]) -> String {
    let mut out = String::new();
    for sym in symbols {
        match sym.value {
            Some(v) => out.push_str(&format!("{:08x} {} {}\n", v, sym.kind, sym.name)),
            None => out.push_str(&format!("{:8} {} {}\n", "", sym.kind, sym.name)),
        }
    }
    out
}

/// Berkeley-style size totals: text, data, bss.
pub fn berkeley_sizes(sections: &[ElfSection]) -> (u64, u64, u64) {
    let mut text = 0u64;
    let mut data = 0u64;
    let mut bss = 0u64;
    for s in sections {
        let size = u64::from(s.size);
        match s.kind {
            SectionKind::Code | SectionKind::ReadOnly => text += size,
            SectionKind::Writable => data += size,
            SectionKind::NoBits => bss += size,
        }
    }
    (text, data, bss)
}
