//! Minimal ELF32 header validation and segment extraction.
//!
//! Named in spec.md §1 as a thin, intentionally-small boundary module (the
//! Non-goal is loader mechanics, not exec's reliance on *a* loadable
//! format). Grounded in the original kernel's `elf_check_header`/
//! `elf_load_helper` split (`examples/original_source/kern/loader/loader.c`):
//! validate the header, then hand back a flattened view -- the original's
//! `simple_elf_t` -- that `process::exec` loads directly without walking
//! section headers or relocations.

use crate::error::KernelError;

const EI_MAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf32Header {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf32ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

/// One loadable segment: where it lives in the image, and where it goes
/// in the new address space. Mirrors the original's `e_txtoff`/
/// `e_txtstart`/`e_txtlen` triples, one per segment kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct Segment {
    pub file_offset: u32,
    pub vaddr: u32,
    pub file_len: u32,
    pub mem_len: u32,
    pub writable: bool,
}

/// Flattened view of an executable's loadable segments -- the original
/// kernel's `simple_elf_t` -- since `process::exec` only ever needs text,
/// rodata, data (whose tail beyond `file_len` is the bss), and the entry
/// point, never a general-purpose ELF object model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleElf32 {
    pub entry: u32,
    pub text: Option<Segment>,
    pub rodata: Option<Segment>,
    pub data: Option<Segment>,
}

fn invalid(value: &'static str) -> KernelError {
    KernelError::InvalidArgument {
        name: "elf image",
        value,
    }
}

fn header_at(bytes: &[u8]) -> Result<&Elf32Header, KernelError> {
    if bytes.len() < core::mem::size_of::<Elf32Header>() {
        return Err(invalid("too short for an ELF header"));
    }
    // SAFETY: length checked above; `#[repr(C)]` fixes the byte layout to
    // match the on-disk header.
    Ok(unsafe { &*(bytes.as_ptr() as *const Elf32Header) })
}

/// Validate the ELF32/i386/executable header. Equivalent to the original
/// kernel's `elf_check_header`.
pub fn elf_check_header(bytes: &[u8]) -> Result<(), KernelError> {
    let hdr = header_at(bytes)?;
    if hdr.e_ident[0..4] != EI_MAG {
        return Err(invalid("missing ELF magic"));
    }
    if hdr.e_ident[4] != ELFCLASS32 {
        return Err(invalid("not a 32-bit ELF"));
    }
    if hdr.e_ident[5] != ELFDATA2LSB {
        return Err(invalid("not little-endian"));
    }
    if hdr.e_type != ET_EXEC {
        return Err(invalid("not a statically linked executable"));
    }
    if hdr.e_machine != EM_386 {
        return Err(invalid("not an i386 binary"));
    }
    Ok(())
}

/// Walk the program header table and classify each `PT_LOAD` segment into
/// text/rodata/data by its flags. Equivalent to the original kernel's
/// `elf_load_helper`.
pub fn elf_load_helper(bytes: &[u8]) -> Result<SimpleElf32, KernelError> {
    elf_check_header(bytes)?;
    let hdr = header_at(bytes)?;
    let mut out = SimpleElf32 {
        entry: hdr.e_entry,
        ..Default::default()
    };

    let phoff = hdr.e_phoff as usize;
    let phentsize = hdr.e_phentsize as usize;
    let phnum = hdr.e_phnum as usize;
    if phentsize < core::mem::size_of::<Elf32ProgramHeader>() {
        return Err(invalid("program header entry too small"));
    }

    for i in 0..phnum {
        let off = phoff + i * phentsize;
        if off + core::mem::size_of::<Elf32ProgramHeader>() > bytes.len() {
            return Err(invalid("program header table out of bounds"));
        }
        // SAFETY: bounds checked above; `#[repr(C)]` matches the on-disk
        // layout.
        let ph = unsafe { &*(bytes.as_ptr().add(off) as *const Elf32ProgramHeader) };
        if ph.p_type != PT_LOAD {
            continue;
        }
        let segment = Segment {
            file_offset: ph.p_offset,
            vaddr: ph.p_vaddr,
            file_len: ph.p_filesz,
            mem_len: ph.p_memsz,
            writable: ph.p_flags & PF_W != 0,
        };
        if ph.p_flags & PF_X != 0 {
            out.text = Some(segment);
        } else if segment.writable {
            out.data = Some(segment);
        } else {
            out.rodata = Some(segment);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_header(e_type: u16, machine: u16) -> [u8; core::mem::size_of::<Elf32Header>()] {
        let mut buf = [0u8; core::mem::size_of::<Elf32Header>()];
        buf[0..4].copy_from_slice(&EI_MAG);
        buf[4] = ELFCLASS32;
        buf[5] = ELFDATA2LSB;
        buf[16..18].copy_from_slice(&e_type.to_le_bytes());
        buf[18..20].copy_from_slice(&machine.to_le_bytes());
        buf
    }

    #[test]
    fn rejects_missing_magic() {
        let buf = [0u8; 64];
        assert!(elf_check_header(&buf).is_err());
    }

    #[test]
    fn accepts_well_formed_header() {
        let buf = fake_header(ET_EXEC, EM_386);
        assert!(elf_check_header(&buf).is_ok());
    }

    #[test]
    fn rejects_wrong_machine() {
        let buf = fake_header(ET_EXEC, 0x3E); // EM_X86_64
        assert!(elf_check_header(&buf).is_err());
    }
}
