//! Raw `.modinfo` extraction.
//!
//! A module object carries its metadata in the `.modinfo` ELF section as a
//! run of NUL-terminated `key=value` strings. Built-in modules have the same
//! data in `modules.builtin.modinfo`, with every key prefixed by
//! `<module>.`.

use super::InfoRecord;
use crate::config::ProviderConfig;
use crate::{KmodError, Result};
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Compression applied to a module object, judged by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
    Xz,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("zst") => Compression::Zstd,
            Some("xz") => Compression::Xz,
            _ => Compression::None,
        }
    }
}

/// Read a module object from disk, decompressing it if needed.
pub fn read_module_file(path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path).map_err(|e| KmodError::io_with_path(e, path))?;
    let mut reader = BufReader::new(file);
    let mut bytes = Vec::new();

    match Compression::from_path(path) {
        Compression::None => {
            reader
                .read_to_end(&mut bytes)
                .map_err(|e| KmodError::io_with_path(e, path))?;
        }
        Compression::Gzip => {
            flate2::read::GzDecoder::new(reader)
                .read_to_end(&mut bytes)
                .map_err(|e| KmodError::io_with_path(e, path))?;
        }
        Compression::Zstd => {
            bytes = zstd::stream::decode_all(reader).map_err(|e| KmodError::io_with_path(e, path))?;
        }
        Compression::Xz => {
            return Err(KmodError::Other(format!(
                "xz compressed modules are not supported: {}",
                path.display()
            )));
        }
    }

    debug!("Read {} bytes of module object {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Split a `.modinfo` blob into records, skipping alignment padding.
pub fn parse_modinfo(data: &[u8]) -> Vec<InfoRecord> {
    data.split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| InfoRecord::parse(&String::from_utf8_lossy(entry)))
        .collect()
}

/// Extract the `.modinfo` records of an ELF module object.
pub fn modinfo_from_elf(bytes: &[u8]) -> Result<Vec<InfoRecord>> {
    let elf = goblin::elf::Elf::parse(bytes)?;

    for header in &elf.section_headers {
        if elf.shdr_strtab.get_at(header.sh_name) != Some(ProviderConfig::MODINFO_SECTION) {
            continue;
        }
        let data = header
            .file_range()
            .and_then(|range| bytes.get(range))
            .ok_or_else(|| KmodError::Other(".modinfo section lies outside the file".into()))?;
        return Ok(parse_modinfo(data));
    }

    Err(KmodError::Other("no .modinfo section".into()))
}

/// Pick the records of `module` out of `modules.builtin.modinfo`.
pub fn builtin_modinfo(data: &[u8], module: &str) -> Vec<InfoRecord> {
    let prefix = format!("{}.", module);
    parse_modinfo(data)
        .into_iter()
        .filter_map(|record| {
            record.key.strip_prefix(&prefix).map(|key| InfoRecord {
                key: key.to_string(),
                value: record.value.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    /// Build a minimal little-endian ELF64 relocatable object with a single
    /// `.modinfo` section.
    pub(crate) fn build_elf(modinfo: &[u8]) -> Vec<u8> {
        const EHDR: usize = 64;
        const SHDR: usize = 64;
        let shstrtab: &[u8] = b"\0.modinfo\0.shstrtab\0";

        let modinfo_off = EHDR;
        let shstrtab_off = modinfo_off + modinfo.len();
        let mut shoff = shstrtab_off + shstrtab.len();
        shoff += (8 - shoff % 8) % 8;

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&1u16.to_le_bytes()); // e_type: ET_REL
        out.extend_from_slice(&62u16.to_le_bytes()); // e_machine: x86_64
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        out.extend_from_slice(&(shoff as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(EHDR as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&(SHDR as u16).to_le_bytes());
        out.extend_from_slice(&3u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&2u16.to_le_bytes()); // e_shstrndx
        assert_eq!(out.len(), EHDR);

        out.extend_from_slice(modinfo);
        out.extend_from_slice(shstrtab);
        out.resize(shoff, 0);

        let mut section = |name: u32, kind: u32, offset: usize, size: usize| {
            out.extend_from_slice(&name.to_le_bytes());
            out.extend_from_slice(&kind.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
            out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
            out.extend_from_slice(&(offset as u64).to_le_bytes());
            out.extend_from_slice(&(size as u64).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes()); // sh_link
            out.extend_from_slice(&0u32.to_le_bytes()); // sh_info
            out.extend_from_slice(&1u64.to_le_bytes()); // sh_addralign
            out.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
        };
        section(0, 0, 0, 0);
        section(1, 1, modinfo_off, modinfo.len()); // SHT_PROGBITS
        section(10, 3, shstrtab_off, shstrtab.len()); // SHT_STRTAB
        out
    }

    const MODINFO: &[u8] =
        b"license=GPL\0description=Loopback device\0alias=block-major-7-*\0\0\0parm=max_loop:Maximum loop devices\0";

    #[test]
    fn test_parse_modinfo_skips_padding() {
        let records = parse_modinfo(MODINFO);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], InfoRecord::new("license", "GPL"));
        assert_eq!(records[3], InfoRecord::new("parm", "max_loop:Maximum loop devices"));
    }

    #[test]
    fn test_modinfo_from_elf() {
        let elf = build_elf(MODINFO);
        let records = modinfo_from_elf(&elf).unwrap();
        assert_eq!(records, parse_modinfo(MODINFO));
    }

    #[test]
    fn test_modinfo_from_non_elf_fails() {
        assert!(modinfo_from_elf(b"definitely not an elf file").is_err());
    }

    #[test]
    fn test_builtin_modinfo_filters_by_module() {
        let data = b"ext4.license=GPL\0ext4.alias=fs-ext4\0ext4dev.alias=fs-ext4dev\0loop.license=GPL\0";
        let records = builtin_modinfo(data, "ext4");
        assert_eq!(
            records,
            vec![
                InfoRecord::new("license", "GPL"),
                InfoRecord::new("alias", "fs-ext4"),
            ]
        );
    }

    #[test]
    fn test_read_module_file_decompresses() {
        let temp_dir = TempDir::new().unwrap();
        let elf = build_elf(MODINFO);

        let plain = temp_dir.path().join("loop.ko");
        std::fs::write(&plain, &elf).unwrap();
        assert_eq!(read_module_file(&plain).unwrap(), elf);

        let gz = temp_dir.path().join("loop.ko.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&elf).unwrap();
        std::fs::write(&gz, encoder.finish().unwrap()).unwrap();
        assert_eq!(read_module_file(&gz).unwrap(), elf);

        let zst = temp_dir.path().join("loop.ko.zst");
        std::fs::write(&zst, zstd::stream::encode_all(&elf[..], 0).unwrap()).unwrap();
        assert_eq!(read_module_file(&zst).unwrap(), elf);
    }

    #[test]
    fn test_read_module_file_rejects_xz() {
        let temp_dir = TempDir::new().unwrap();
        let xz = temp_dir.path().join("loop.ko.xz");
        std::fs::write(&xz, b"\xfd7zXZ\0").unwrap();
        assert!(read_module_file(&xz).is_err());
    }
}
