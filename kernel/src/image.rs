//! In-memory image table (spec.md §1/§3's `readfile`/`exec` collaborator).
//!
//! Stands in for the original kernel's `exec2obj`-generated `user_apps.S`
//! (`examples/original_source/kern/loader/loader.c`'s `getbytes`): a fixed
//! table of `(name, bytes)` pairs baked into the kernel image, read-only
//! from `process::exec`/the `readfile` syscall's perspective. Per the
//! Non-goal on filesystems, this is the only "file" surface the kernel has.

use alloc::vec::Vec;

use lazy_static::lazy_static;

use crate::error::KernelError;

struct ImageEntry {
    name: &'static str,
    bytes: Vec<u8>,
}

lazy_static! {
    static ref IMAGE_TABLE: Vec<ImageEntry> = alloc::vec![
        ImageEntry {
            name: "coolness",
            bytes: build_demo_elf(0x0100_0000),
        },
        ImageEntry {
            name: "idle",
            bytes: build_demo_elf(0x0100_0000),
        },
    ];
}

/// Look up `name` in the table and return its full byte image.
pub fn find(name: &str) -> Option<&'static [u8]> {
    IMAGE_TABLE
        .iter()
        .find(|e| e.name == name)
        .map(|e| e.bytes.as_slice())
}

/// `readfile` syscall collaborator (spec.md §6): copy up to `size` bytes
/// of `name` starting at `offset` into `buf`, returning the number of
/// bytes actually copied (short at end of file, per the original's
/// `getbytes`).
pub fn getbytes(name: &str, offset: usize, size: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
    let image = find(name).ok_or(KernelError::NotFound {
        resource: "image",
        id: 0,
    })?;
    if offset > image.len() {
        return Ok(0);
    }
    let n = size.min(image.len() - offset).min(buf.len());
    buf[..n].copy_from_slice(&image[offset..offset + n]);
    Ok(n)
}

/// Build a minimal valid ELF32/i386 executable with one `PT_LOAD` text
/// segment (`hlt; jmp $-2`), entry at `load_addr`. This tree has no
/// userland toolchain to produce real demo binaries from, so this is
/// enough to exercise `elf::elf_check_header`/`elf_load_helper` and the
/// full `process::exec` load path end to end.
fn build_demo_elf(load_addr: u32) -> Vec<u8> {
    const EHSIZE: u32 = 52;
    const PHENTSIZE: u32 = 32;
    const PF_X: u32 = 1;
    const PF_R: u32 = 4;
    let code: &[u8] = &[0xF4, 0xEB, 0xFD]; // hlt; jmp $-2

    let mut buf = Vec::new();
    buf.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
    buf.push(1); // EI_CLASS = ELFCLASS32
    buf.push(1); // EI_DATA = ELFDATA2LSB
    buf.push(1); // EI_VERSION
    buf.extend_from_slice(&[0u8; 9]); // EI_PAD
    buf.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    buf.extend_from_slice(&3u16.to_le_bytes()); // e_machine = EM_386
    buf.extend_from_slice(&1u32.to_le_bytes()); // e_version
    buf.extend_from_slice(&load_addr.to_le_bytes()); // e_entry
    buf.extend_from_slice(&EHSIZE.to_le_bytes()); // e_phoff
    buf.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    buf.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    buf.extend_from_slice(&(EHSIZE as u16).to_le_bytes()); // e_ehsize
    buf.extend_from_slice(&(PHENTSIZE as u16).to_le_bytes()); // e_phentsize
    buf.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    buf.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    buf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    buf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    debug_assert_eq!(buf.len() as u32, EHSIZE);

    let data_off = EHSIZE + PHENTSIZE;
    buf.extend_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
    buf.extend_from_slice(&data_off.to_le_bytes()); // p_offset
    buf.extend_from_slice(&load_addr.to_le_bytes()); // p_vaddr
    buf.extend_from_slice(&load_addr.to_le_bytes()); // p_paddr
    buf.extend_from_slice(&(code.len() as u32).to_le_bytes()); // p_filesz
    buf.extend_from_slice(&(code.len() as u32).to_le_bytes()); // p_memsz
    buf.extend_from_slice(&(PF_X | PF_R).to_le_bytes()); // p_flags
    buf.extend_from_slice(&4096u32.to_le_bytes()); // p_align

    buf.extend_from_slice(code);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_images_pass_header_validation() {
        for name in ["coolness", "idle"] {
            let bytes = find(name).expect("demo image present");
            assert!(crate::elf::elf_check_header(bytes).is_ok());
        }
    }

    #[test]
    fn getbytes_reports_a_short_count_at_eof() {
        let image = find("coolness").unwrap();
        let mut buf = alloc::vec![0u8; image.len() + 16];
        let n = getbytes("coolness", 0, buf.len(), &mut buf).unwrap();
        assert_eq!(n, image.len());
    }

    #[test]
    fn unknown_name_is_not_found() {
        let mut buf = [0u8; 4];
        assert!(getbytes("does-not-exist", 0, 4, &mut buf).is_err());
    }
}
