// SPDX-License-Identifier: Apache-2.0
//! Loader registry key derivation.
//!
//! Every operating system keeps a process-wide table of already-mapped
//! shared libraries, and the key it uses to recognise a repeat load differs
//! per platform:
//!
//! - Windows: the base filename, case-insensitive, directory-independent.
//! - macOS: the install name embedded in the Mach-O (`LC_ID_DYLIB`).
//! - Linux: the `DT_SONAME` embedded in the ELF dynamic section.
//!
//! On Linux a library *without* a SONAME is not deduplicated at all; repeat
//! loads from different paths each map a fresh copy. That case is surfaced
//! as [`RegistryKey::Unkeyed`] so callers can warn, never as an error.
//!
//! Setting a correct install name / SONAME is a build-time precondition of
//! the wheel; this module only reads what the build embedded.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::platform::Platform;

/// The key the platform loader registry will use for a library, or the
/// explicit statement that no dedup key exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegistryKey {
    /// The loader will recognise a repeat load request by this string.
    Keyed(String),
    /// No embedded metadata was found (or it was unreadable). The loader
    /// gives no dedup guarantee for this library.
    Unkeyed,
}

impl RegistryKey {
    /// The key string, if one exists.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegistryKey::Keyed(k) => Some(k.as_str()),
            RegistryKey::Unkeyed => None,
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, RegistryKey::Keyed(_))
    }
}

impl std::fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryKey::Keyed(k) => f.write_str(k),
            RegistryKey::Unkeyed => f.write_str("<unkeyed>"),
        }
    }
}

/// Derive the registry key for a library at `path` on `platform`.
///
/// `declared` is an optional key supplied by the descriptor (the "be told"
/// path, e.g. when the packaging layer already knows the SONAME). It takes
/// precedence over reading the file, except on Windows where the loader
/// ignores embedded metadata entirely.
pub fn registry_key(platform: Platform, path: &Path, declared: Option<&str>) -> RegistryKey {
    match platform {
        Platform::Windows => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| RegistryKey::Keyed(n.to_ascii_lowercase()))
            .unwrap_or(RegistryKey::Unkeyed),
        Platform::MacOs => declared
            .map(|k| RegistryKey::Keyed(k.to_string()))
            .or_else(|| macho::install_name(path).map(RegistryKey::Keyed))
            .unwrap_or(RegistryKey::Unkeyed),
        Platform::Linux => declared
            .map(|k| RegistryKey::Keyed(k.to_string()))
            .or_else(|| elf::soname(path).map(RegistryKey::Keyed))
            .unwrap_or(RegistryKey::Unkeyed),
    }
}

// Bounded read at an absolute offset. Any IO error or over-limit request
// degrades to None; key derivation must never fail loudly.
fn read_at(file: &mut File, offset: u64, len: usize) -> Option<Vec<u8>> {
    const MAX_READ: usize = 1 << 20;
    if len > MAX_READ {
        return None;
    }
    file.seek(SeekFrom::Start(offset)).ok()?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).ok()?;
    Some(buf)
}

fn cstr_prefix(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&bytes[..end]).ok().map(str::to_string)
}

/// Minimal ELF dynamic-section walk: just enough to pull out `DT_SONAME`.
mod elf {
    use super::{cstr_prefix, read_at};
    use std::fs::File;
    use std::path::Path;

    const PT_LOAD: u32 = 1;
    const PT_DYNAMIC: u32 = 2;
    const DT_NULL: u64 = 0;
    const DT_STRTAB: u64 = 5;
    const DT_SONAME: u64 = 14;

    struct Layout {
        is_64: bool,
        little: bool,
    }

    impl Layout {
        fn u16(&self, b: &[u8], off: usize) -> Option<u16> {
            let raw: [u8; 2] = b.get(off..off + 2)?.try_into().ok()?;
            Some(if self.little {
                u16::from_le_bytes(raw)
            } else {
                u16::from_be_bytes(raw)
            })
        }

        fn u32(&self, b: &[u8], off: usize) -> Option<u32> {
            let raw: [u8; 4] = b.get(off..off + 4)?.try_into().ok()?;
            Some(if self.little {
                u32::from_le_bytes(raw)
            } else {
                u32::from_be_bytes(raw)
            })
        }

        fn u64(&self, b: &[u8], off: usize) -> Option<u64> {
            let raw: [u8; 8] = b.get(off..off + 8)?.try_into().ok()?;
            Some(if self.little {
                u64::from_le_bytes(raw)
            } else {
                u64::from_be_bytes(raw)
            })
        }

        /// Class-dependent word: u32 on ELF32, u64 on ELF64.
        fn word(&self, b: &[u8], off: usize) -> Option<u64> {
            if self.is_64 {
                self.u64(b, off)
            } else {
                self.u32(b, off).map(u64::from)
            }
        }
    }

    /// Read the SONAME of the ELF shared object at `path`.
    ///
    /// Returns `None` for anything that is not a well-formed dynamic ELF
    /// with a `DT_SONAME` entry. All failures are silent; the caller maps
    /// `None` to [`super::RegistryKey::Unkeyed`].
    pub(super) fn soname(path: &Path) -> Option<String> {
        let mut file = File::open(path).ok()?;
        let ident = read_at(&mut file, 0, 64)?;
        if &ident[..4] != b"\x7fELF" {
            return None;
        }
        let layout = Layout {
            is_64: ident[4] == 2,
            little: ident[5] == 1,
        };
        if ident[4] != 1 && ident[4] != 2 {
            return None;
        }
        if ident[5] != 1 && ident[5] != 2 {
            return None;
        }

        let (phoff, phentsize, phnum) = if layout.is_64 {
            (
                layout.u64(&ident, 0x20)?,
                layout.u16(&ident, 0x36)? as usize,
                layout.u16(&ident, 0x38)? as usize,
            )
        } else {
            (
                layout.u32(&ident, 0x1c)? as u64,
                layout.u16(&ident, 0x2a)? as usize,
                layout.u16(&ident, 0x2c)? as usize,
            )
        };
        if phnum == 0 || phnum > 512 || phentsize < if layout.is_64 { 56 } else { 32 } {
            return None;
        }

        let phdrs = read_at(&mut file, phoff, phentsize * phnum)?;

        // (vaddr, file offset, filesz) for every PT_LOAD, plus the dynamic
        // segment's file extent.
        let mut loads: Vec<(u64, u64, u64)> = Vec::new();
        let mut dynamic: Option<(u64, u64)> = None;
        for i in 0..phnum {
            let base = i * phentsize;
            let p_type = layout.u32(&phdrs, base)?;
            let (offset, vaddr, filesz) = if layout.is_64 {
                (
                    layout.u64(&phdrs, base + 0x08)?,
                    layout.u64(&phdrs, base + 0x10)?,
                    layout.u64(&phdrs, base + 0x20)?,
                )
            } else {
                (
                    layout.u32(&phdrs, base + 0x04)? as u64,
                    layout.u32(&phdrs, base + 0x08)? as u64,
                    layout.u32(&phdrs, base + 0x10)? as u64,
                )
            };
            match p_type {
                PT_LOAD => loads.push((vaddr, offset, filesz)),
                PT_DYNAMIC => dynamic = Some((offset, filesz)),
                _ => {}
            }
        }

        let (dyn_off, dyn_sz) = dynamic?;
        if dyn_sz > 1 << 16 {
            return None;
        }
        let dyn_bytes = read_at(&mut file, dyn_off, dyn_sz as usize)?;

        let entry_size = if layout.is_64 { 16 } else { 8 };
        let mut strtab_vaddr: Option<u64> = None;
        let mut soname_off: Option<u64> = None;
        let mut pos = 0;
        while pos + entry_size <= dyn_bytes.len() {
            let tag = layout.word(&dyn_bytes, pos)?;
            let val = layout.word(&dyn_bytes, pos + entry_size / 2)?;
            match tag {
                DT_NULL => break,
                DT_STRTAB => strtab_vaddr = Some(val),
                DT_SONAME => soname_off = Some(val),
                _ => {}
            }
            pos += entry_size;
        }

        let strtab_vaddr = strtab_vaddr?;
        let soname_off = soname_off?;

        // DT_STRTAB holds a virtual address; translate it to a file offset
        // through the PT_LOAD segment that maps it.
        let strtab_file_off = loads.iter().find_map(|&(vaddr, offset, filesz)| {
            if strtab_vaddr >= vaddr && strtab_vaddr < vaddr.checked_add(filesz)? {
                Some(strtab_vaddr - vaddr + offset)
            } else {
                None
            }
        })?;

        let name_bytes = read_at(&mut file, strtab_file_off.checked_add(soname_off)?, 256)
            .or_else(|| {
                // Near end of file read_exact may overrun; retry with the
                // remaining length.
                let len = file.metadata().ok()?.len();
                let start = strtab_file_off.checked_add(soname_off)?;
                let avail = len.checked_sub(start)?;
                read_at(&mut file, start, avail.min(256) as usize)
            })?;
        cstr_prefix(&name_bytes)
    }
}

/// Minimal Mach-O load-command walk: just enough to pull out `LC_ID_DYLIB`.
mod macho {
    use super::{cstr_prefix, read_at};
    use std::fs::File;
    use std::path::Path;

    const MH_MAGIC: u32 = 0xfeed_face;
    const MH_MAGIC_64: u32 = 0xfeed_facf;
    const MH_CIGAM: u32 = 0xcefa_edfe;
    const MH_CIGAM_64: u32 = 0xcffa_edfe;
    const LC_ID_DYLIB: u32 = 0xd;

    /// Read the install name of the Mach-O dylib at `path`.
    ///
    /// Fat (universal) binaries are not walked; they yield `None`, which the
    /// caller treats as "no dedup guarantee". All failures are silent.
    pub(super) fn install_name(path: &Path) -> Option<String> {
        let mut file = File::open(path).ok()?;
        let head = read_at(&mut file, 0, 32)?;
        let raw_magic = u32::from_le_bytes(head[..4].try_into().ok()?);

        let (little, is_64) = match raw_magic {
            MH_MAGIC => (true, false),
            MH_MAGIC_64 => (true, true),
            MH_CIGAM => (false, false),
            MH_CIGAM_64 => (false, true),
            _ => return None,
        };
        let u32_at = |b: &[u8], off: usize| -> Option<u32> {
            let raw: [u8; 4] = b.get(off..off + 4)?.try_into().ok()?;
            Some(if little {
                u32::from_le_bytes(raw)
            } else {
                u32::from_be_bytes(raw)
            })
        };

        let header_size: u64 = if is_64 { 32 } else { 28 };
        let ncmds = u32_at(&head, 16)?;
        let sizeofcmds = u32_at(&head, 20)?;
        if ncmds > 4096 || sizeofcmds > 1 << 20 {
            return None;
        }

        let cmds = read_at(&mut file, header_size, sizeofcmds as usize)?;
        let mut pos: usize = 0;
        for _ in 0..ncmds {
            let cmd = u32_at(&cmds, pos)?;
            let cmdsize = u32_at(&cmds, pos + 4)? as usize;
            if cmdsize < 8 || pos + cmdsize > cmds.len() {
                return None;
            }
            if cmd == LC_ID_DYLIB {
                // struct dylib_command: cmd, cmdsize, then a dylib struct
                // whose first field is the name offset (relative to the
                // start of the load command).
                let name_off = u32_at(&cmds, pos + 8)? as usize;
                if name_off >= cmdsize {
                    return None;
                }
                return cstr_prefix(&cmds[pos + name_off..pos + cmdsize]);
            }
            pos += cmdsize;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("temp file");
        f.write_all(bytes).expect("write fixture");
        f
    }

    /// Assemble a minimal 64-bit little-endian dynamic ELF whose only
    /// interesting content is a DT_SONAME entry.
    fn minimal_elf_with_soname(soname: &str) -> Vec<u8> {
        let phoff = 64u64;
        let dyn_off = 64 + 2 * 56; // = 176
        let strtab_off = dyn_off + 3 * 16; // = 224
        let strtab: Vec<u8> = std::iter::once(0u8)
            .chain(soname.bytes())
            .chain(std::iter::once(0u8))
            .collect();
        let total = strtab_off as usize + strtab.len();

        let mut out = Vec::with_capacity(total);
        // ELF header
        out.extend_from_slice(b"\x7fELF");
        out.extend_from_slice(&[2, 1, 1, 0]); // 64-bit, LE, version 1
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&3u16.to_le_bytes()); // ET_DYN
        out.extend_from_slice(&0x3eu16.to_le_bytes()); // x86-64
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&phoff.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&2u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(out.len(), 64);

        let phdr = |p_type: u32, offset: u64, vaddr: u64, filesz: u64| -> Vec<u8> {
            let mut p = Vec::with_capacity(56);
            p.extend_from_slice(&p_type.to_le_bytes());
            p.extend_from_slice(&4u32.to_le_bytes()); // p_flags (R)
            p.extend_from_slice(&offset.to_le_bytes());
            p.extend_from_slice(&vaddr.to_le_bytes()); // p_vaddr
            p.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
            p.extend_from_slice(&filesz.to_le_bytes());
            p.extend_from_slice(&filesz.to_le_bytes()); // p_memsz
            p.extend_from_slice(&0x1000u64.to_le_bytes());
            p
        };
        // One PT_LOAD mapping the whole file at vaddr 0, then PT_DYNAMIC.
        out.extend_from_slice(&phdr(1, 0, 0, total as u64));
        out.extend_from_slice(&phdr(2, dyn_off, dyn_off, 3 * 16));
        assert_eq!(out.len() as u64, dyn_off);

        let dyn_entry = |tag: u64, val: u64| -> Vec<u8> {
            let mut d = Vec::with_capacity(16);
            d.extend_from_slice(&tag.to_le_bytes());
            d.extend_from_slice(&val.to_le_bytes());
            d
        };
        out.extend_from_slice(&dyn_entry(5, strtab_off)); // DT_STRTAB
        out.extend_from_slice(&dyn_entry(14, 1)); // DT_SONAME -> strtab + 1
        out.extend_from_slice(&dyn_entry(0, 0)); // DT_NULL
        assert_eq!(out.len() as u64, strtab_off);

        out.extend_from_slice(&strtab);
        out
    }

    /// Assemble a minimal 64-bit little-endian Mach-O dylib with only an
    /// LC_ID_DYLIB load command.
    fn minimal_macho_with_install_name(name: &str) -> Vec<u8> {
        let name_bytes = name.as_bytes();
        let padded = (name_bytes.len() + 1).div_ceil(8) * 8;
        let cmdsize = 24 + padded;

        let mut out = Vec::new();
        out.extend_from_slice(&0xfeed_facfu32.to_le_bytes()); // MH_MAGIC_64
        out.extend_from_slice(&0x0100_000cu32.to_le_bytes()); // arm64
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&6u32.to_le_bytes()); // MH_DYLIB
        out.extend_from_slice(&1u32.to_le_bytes()); // ncmds
        out.extend_from_slice(&(cmdsize as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // flags
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        assert_eq!(out.len(), 32);

        out.extend_from_slice(&0xdu32.to_le_bytes()); // LC_ID_DYLIB
        out.extend_from_slice(&(cmdsize as u32).to_le_bytes());
        out.extend_from_slice(&24u32.to_le_bytes()); // name offset
        out.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        out.extend_from_slice(&0u32.to_le_bytes()); // current_version
        out.extend_from_slice(&0u32.to_le_bytes()); // compatibility_version
        out.extend_from_slice(name_bytes);
        out.resize(32 + cmdsize, 0);
        out
    }

    #[test]
    fn linux_key_is_soname_not_path() {
        let fixture = write_temp(&minimal_elf_with_soname("libdemo.so.3"));
        let key = registry_key(Platform::Linux, fixture.path(), None);
        assert_eq!(key, RegistryKey::Keyed("libdemo.so.3".into()));

        // Same bytes at a different path: identical key.
        let copy = write_temp(&minimal_elf_with_soname("libdemo.so.3"));
        let key2 = registry_key(Platform::Linux, copy.path(), None);
        assert_eq!(key, key2);
    }

    #[test]
    fn linux_missing_soname_is_unkeyed() {
        // An ELF with no dynamic segment at all.
        let mut bytes = minimal_elf_with_soname("libdemo.so.3");
        // Flip PT_DYNAMIC (second phdr) to PT_NOTE so no soname is found.
        bytes[64 + 56] = 4;
        let fixture = write_temp(&bytes);
        assert_eq!(
            registry_key(Platform::Linux, fixture.path(), None),
            RegistryKey::Unkeyed
        );
    }

    #[test]
    fn garbage_file_is_unkeyed_never_fatal() {
        let fixture = write_temp(b"this is not an object file");
        assert_eq!(
            registry_key(Platform::Linux, fixture.path(), None),
            RegistryKey::Unkeyed
        );
        assert_eq!(
            registry_key(Platform::MacOs, fixture.path(), None),
            RegistryKey::Unkeyed
        );
    }

    #[test]
    fn missing_file_is_unkeyed_never_fatal() {
        let p = Path::new("/nonexistent/libghost.so");
        assert_eq!(registry_key(Platform::Linux, p, None), RegistryKey::Unkeyed);
    }

    #[test]
    fn macos_key_is_install_name() {
        let fixture = write_temp(&minimal_macho_with_install_name("@rpath/libdemo.dylib"));
        assert_eq!(
            registry_key(Platform::MacOs, fixture.path(), None),
            RegistryKey::Keyed("@rpath/libdemo.dylib".into())
        );
    }

    #[test]
    fn windows_key_is_lowercased_filename_ignoring_metadata() {
        // Embedded metadata is irrelevant on Windows; only the filename counts.
        let fixture = write_temp(&minimal_elf_with_soname("libdemo.so.3"));
        let dir = tempfile::tempdir().unwrap();
        let dll = dir.path().join("Demo.DLL");
        std::fs::copy(fixture.path(), &dll).unwrap();
        assert_eq!(
            registry_key(Platform::Windows, &dll, None),
            RegistryKey::Keyed("demo.dll".into())
        );
    }

    #[test]
    fn declared_key_takes_precedence_over_file_contents() {
        let fixture = write_temp(&minimal_elf_with_soname("libdemo.so.3"));
        assert_eq!(
            registry_key(Platform::Linux, fixture.path(), Some("libdemo.so.4")),
            RegistryKey::Keyed("libdemo.so.4".into())
        );
    }
}
