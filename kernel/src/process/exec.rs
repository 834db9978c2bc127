//! `exec` (spec component J): replace the calling task's user image with
//! a freshly loaded ELF binary on a freshly built address space and user
//! stack. Valid only from a single-threaded task, exactly like `fork`.

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch;
use crate::arch::usermode;
use crate::elf::{self, Segment};
use crate::error::KernelError;
use crate::image;
use crate::mm::page_table::scratch_write_byte;
use crate::mm::vas::{AddressSpace, RegionFlags};
use crate::mm::FRAME_SIZE;
use crate::sched;

const USER_STACK_SIZE: u32 = 256 * 1024;
const USER_STACK_TOP: u32 = 0xC000_0000;
const USER_STACK_BASE: u32 = USER_STACK_TOP - USER_STACK_SIZE;

fn invalid(value: &'static str) -> KernelError {
    KernelError::InvalidArgument {
        name: "exec",
        value,
    }
}

/// Load `name` from the image table and transfer the calling thread to
/// it in user mode. Never returns on success; by the time `exec` could
/// return at all, the task's old address space is gone.
pub fn exec(name: &str, argv: Vec<String>) -> Result<(), KernelError> {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };
    if !task.is_single_threaded() {
        return Err(KernelError::InvalidState {
            expected: "single-threaded task",
            actual: "task has more than one live thread",
        });
    }

    let bytes = image::find(name).ok_or_else(|| invalid("no such program image"))?;
    let parsed = elf::elf_load_helper(bytes)?;

    let new_space = AddressSpace::new()?;
    if let Some(seg) = parsed.text {
        load_segment(&new_space, bytes, seg, RegionFlags::USER)?;
    }
    if let Some(seg) = parsed.rodata {
        load_segment(&new_space, bytes, seg, RegionFlags::USER)?;
    }
    if let Some(seg) = parsed.data {
        load_segment(
            &new_space,
            bytes,
            seg,
            RegionFlags::USER | RegionFlags::WRITABLE,
        )?;
    }

    new_space.alloc(
        USER_STACK_BASE,
        USER_STACK_SIZE,
        RegionFlags::USER | RegionFlags::WRITABLE,
    )?;
    let stack_top = build_initial_stack(&new_space, name, &argv)?;

    task.address_space.lock().free_all();
    *task.address_space.lock() = new_space;

    // SAFETY: `task.address_space` now holds the directory just built
    // above, fully populated; loading it makes its mappings visible
    // before anything (including the `iretd` below) can rely on them.
    unsafe { arch::write_cr3(task.address_space.lock().cr3()) };

    // SAFETY: `parsed.entry` is the validated entry point of the image
    // just loaded into a `PT_LOAD` text segment; `stack_top` is the
    // stack this function just built and mapped user-writable in the
    // address space now active in CR3.
    unsafe { usermode::enter_usermode(parsed.entry, stack_top) }
}

fn align_up(addr: u32, align: u32) -> u32 {
    (addr + align - 1) & !(align - 1)
}

/// Copy one ELF segment into `space`, backing every page it spans with a
/// real (non-ZFOD) frame and filling it from `image` -- `file_len` bytes
/// of content followed by zero-filled bss out to `mem_len`.
fn load_segment(
    space: &AddressSpace,
    image: &[u8],
    segment: Segment,
    flags: RegionFlags,
) -> Result<(), KernelError> {
    let page_start = segment.vaddr & !(FRAME_SIZE as u32 - 1);
    let region_end = align_up(segment.vaddr + segment.mem_len, FRAME_SIZE as u32);
    space.alloc(page_start, region_end - page_start, flags)?;

    let mut addr = page_start;
    while addr < region_end {
        space.page_fault(addr, false)?;
        let frame = space.frame_at(addr).expect("just faulted in above");

        let mut buf = [0u8; FRAME_SIZE];
        for (i, slot) in buf.iter_mut().enumerate() {
            let file_addr = addr + i as u32;
            if file_addr >= segment.vaddr && file_addr < segment.vaddr + segment.file_len {
                let file_off = (segment.file_offset + (file_addr - segment.vaddr)) as usize;
                *slot = image[file_off];
            }
        }
        // SAFETY: `buf` is a local buffer inside the kernel's own
        // identity-mapped memory, readable regardless of which directory
        // is active; `frame` was just mapped for `addr` above.
        unsafe { crate::mm::page_table::scratch_copy_from(frame, buf.as_ptr() as u32) };

        addr += FRAME_SIZE as u32;
    }
    Ok(())
}

fn write_byte(space: &AddressSpace, addr: u32, byte: u8) -> Result<(), KernelError> {
    space.page_fault(addr, true)?;
    let frame = space.frame_at(addr).expect("just faulted in above");
    let offset = addr & (FRAME_SIZE as u32 - 1);
    scratch_write_byte(frame, offset, byte);
    Ok(())
}

fn write_bytes(space: &AddressSpace, addr: u32, bytes: &[u8]) -> Result<(), KernelError> {
    for (i, &b) in bytes.iter().enumerate() {
        write_byte(space, addr + i as u32, b)?;
    }
    Ok(())
}

fn write_u32(space: &AddressSpace, addr: u32, value: u32) -> Result<(), KernelError> {
    write_bytes(space, addr, &value.to_le_bytes())
}

/// Write `s` (plus a NUL terminator) just below `*sp`, move `*sp` down
/// past it, and return the address the string now starts at.
fn write_string(space: &AddressSpace, sp: &mut u32, s: &str) -> Result<u32, KernelError> {
    let bytes = s.as_bytes();
    *sp -= bytes.len() as u32 + 1;
    let addr = *sp;
    write_bytes(space, addr, bytes)?;
    write_byte(space, addr + bytes.len() as u32, 0)?;
    Ok(addr)
}

/// Build a fresh user stack matching the C runtime's `main(argc, argv)`
/// convention: strings packed at the top of the stack, then a
/// NULL-terminated array of pointers to them in ascending index order,
/// then `argc`/`argv`/a fake return address so execution can fall
/// straight into the entry point as a cdecl call.
fn build_initial_stack(
    space: &AddressSpace,
    name: &str,
    argv: &[String],
) -> Result<u32, KernelError> {
    let mut sp = USER_STACK_TOP;

    let mut arg_ptrs = Vec::with_capacity(argv.len() + 1);
    arg_ptrs.push(write_string(space, &mut sp, name)?);
    for arg in argv {
        arg_ptrs.push(write_string(space, &mut sp, arg)?);
    }

    sp &= !0x3;

    sp -= 4;
    write_u32(space, sp, 0)?; // argv[] NULL terminator
    for &ptr in arg_ptrs.iter().rev() {
        sp -= 4;
        write_u32(space, sp, ptr)?;
    }
    let argv_ptr = sp;
    let argc = arg_ptrs.len() as u32;

    sp -= 4;
    write_u32(space, sp, argv_ptr)?;
    sp -= 4;
    write_u32(space, sp, argc)?;
    sp -= 4;
    write_u32(space, sp, 0)?; // fake return address; entry never returns

    Ok(sp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(space: &AddressSpace, addr: u32) -> u32 {
        let frame = space.frame_at(addr & !(FRAME_SIZE as u32 - 1)).unwrap();
        let offset = addr & (FRAME_SIZE as u32 - 1);
        // SAFETY: host test target never enables paging, so `frame` is
        // directly addressable memory.
        unsafe { core::ptr::read_unaligned((frame + offset) as *const u32) }
    }

    fn read_str(space: &AddressSpace, addr: u32) -> String {
        let mut out = Vec::new();
        let mut a = addr;
        loop {
            let frame = space.frame_at(a & !(FRAME_SIZE as u32 - 1)).unwrap();
            let offset = a & (FRAME_SIZE as u32 - 1);
            // SAFETY: see `read_u32`.
            let b = unsafe { *((frame + offset) as *const u8) };
            if b == 0 {
                break;
            }
            out.push(b);
            a += 1;
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn initial_stack_lays_out_argv_in_ascending_order() {
        let space = AddressSpace::new_for_test();
        space
            .alloc(
                USER_STACK_BASE,
                USER_STACK_SIZE,
                RegionFlags::WRITABLE | RegionFlags::USER,
            )
            .unwrap();

        let sp = build_initial_stack(
            &space,
            "prog",
            &[String::from("one"), String::from("two")],
        )
        .unwrap();

        let argc = read_u32(&space, sp + 4);
        let argv_ptr = read_u32(&space, sp + 8);
        assert_eq!(argc, 3);

        let ptr0 = read_u32(&space, argv_ptr);
        let ptr1 = read_u32(&space, argv_ptr + 4);
        let ptr2 = read_u32(&space, argv_ptr + 8);
        let null = read_u32(&space, argv_ptr + 12);
        assert_eq!(null, 0);
        assert!(ptr0 < ptr1 && ptr1 < ptr2);

        assert_eq!(read_str(&space, ptr0), "prog");
        assert_eq!(read_str(&space, ptr1), "one");
        assert_eq!(read_str(&space, ptr2), "two");
    }

    #[test]
    fn load_segment_zero_fills_bss_tail() {
        let space = AddressSpace::new_for_test();
        let image: &[u8] = &[0xAA, 0xBB, 0xCC, 0xDD];
        let segment = Segment {
            file_offset: 0,
            vaddr: 0x2000,
            file_len: 4,
            mem_len: FRAME_SIZE as u32,
            writable: true,
        };
        load_segment(&space, image, segment, RegionFlags::USER | RegionFlags::WRITABLE).unwrap();

        let frame = space.frame_at(0x2000).unwrap();
        // SAFETY: host test target never enables paging.
        let bytes = unsafe { core::slice::from_raw_parts(frame as *const u8, FRAME_SIZE) };
        assert_eq!(&bytes[0..4], image);
        assert_eq!(bytes[4], 0);
        assert_eq!(bytes[FRAME_SIZE - 1], 0);
    }
}
