//! Validated copies between kernel and user memory (spec component L).
//!
//! Every syscall argument that is a user pointer goes through here rather
//! than a raw dereference: the destination/source range is checked
//! against the calling task's region map (so an argument pointing at
//! unmapped or wrong-permission memory is rejected before anything is
//! touched) and faulted in on demand, the same way a hardware page fault
//! would, so a lazily backed or ZFOD page a syscall is the first to
//! touch still works.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{KernelError, SyscallError};
use crate::mm::vas::RegionFlags;
use crate::mm::{VirtAddr, FRAME_SIZE};
use crate::process::task::Task;

const MAX_STRING_LEN: usize = 4096;
const MAX_ARGV_ENTRIES: usize = 128;

fn ensure_range(task: &Task, addr: VirtAddr, len: usize, write: bool) -> Result<(), KernelError> {
    if len == 0 {
        return Ok(());
    }
    let vas = task.address_space.lock();
    let end = addr.checked_add(len as u32).ok_or(KernelError::InvalidAddress { addr: addr as usize })?;
    let mut page = addr & !(FRAME_SIZE as u32 - 1);
    while page < end {
        let flags = vas
            .get_attrs(page)
            .ok_or(KernelError::UnmappedMemory { addr: page as usize })?;
        if !flags.contains(RegionFlags::USER) {
            return Err(KernelError::InvalidAddress { addr: page as usize });
        }
        vas.ensure_mapped(page, write)?;
        page += FRAME_SIZE as u32;
    }
    Ok(())
}

/// Copy `buf.len()` bytes from the calling task's memory at `addr` into
/// `buf`. Rejects the call outright (no partial copy) if any touched
/// page falls outside a region the task owns.
pub fn copy_from_user(task: &Task, addr: VirtAddr, buf: &mut [u8]) -> Result<(), KernelError> {
    ensure_range(task, addr, buf.len(), false)?;
    // SAFETY: `ensure_range` has just validated and faulted in every page
    // of `[addr, addr + buf.len())` as user-readable in `task`'s address
    // space, which is the one currently active in CR3 for the calling
    // thread.
    unsafe { core::ptr::copy_nonoverlapping(addr as *const u8, buf.as_mut_ptr(), buf.len()) };
    Ok(())
}

/// Copy `buf` into the calling task's memory at `addr`.
pub fn copy_to_user(task: &Task, addr: VirtAddr, buf: &[u8]) -> Result<(), KernelError> {
    ensure_range(task, addr, buf.len(), true)?;
    // SAFETY: see `copy_from_user`; `ensure_range` additionally checked
    // the range is writable.
    unsafe { core::ptr::copy_nonoverlapping(buf.as_ptr(), addr as *mut u8, buf.len()) };
    Ok(())
}

/// Copy a NUL-terminated string out of user memory, up to
/// `MAX_STRING_LEN` bytes excluding the terminator.
pub fn copy_str_from_user(task: &Task, addr: VirtAddr) -> Result<String, KernelError> {
    let mut out = Vec::new();
    let mut cursor = addr;
    loop {
        if out.len() >= MAX_STRING_LEN {
            return Err(SyscallError::StringTooLong { max: MAX_STRING_LEN }.into());
        }
        let mut byte = [0u8; 1];
        copy_from_user(task, cursor, &mut byte)?;
        if byte[0] == 0 {
            break;
        }
        out.push(byte[0]);
        cursor += 1;
    }
    String::from_utf8(out).map_err(|_| SyscallError::InvalidArgument { arg: 0 }.into())
}

/// Copy a NUL-terminated, NULL-terminated `argv`-style array of string
/// pointers out of user memory (as `exec` takes).
pub fn copy_argv_from_user(task: &Task, addr: VirtAddr) -> Result<Vec<String>, KernelError> {
    let mut argv = Vec::new();
    let mut cursor = addr;
    loop {
        if argv.len() >= MAX_ARGV_ENTRIES {
            return Err(SyscallError::InvalidArgument { arg: 1 }.into());
        }
        let mut ptr_bytes = [0u8; 4];
        copy_from_user(task, cursor, &mut ptr_bytes)?;
        let entry = u32::from_ne_bytes(ptr_bytes);
        if entry == 0 {
            break;
        }
        argv.push(copy_str_from_user(task, entry)?);
        cursor += 4;
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::task::TaskId;

    #[test]
    fn round_trips_a_buffer_through_a_writable_region() {
        let task = Task::new_for_test(TaskId(1));
        let addr = 0x0200_0000;
        task.address_space
            .lock()
            .alloc(addr, FRAME_SIZE as u32, RegionFlags::WRITABLE | RegionFlags::USER)
            .unwrap();

        copy_to_user(&task, addr, b"hello").unwrap();
        let mut buf = [0u8; 5];
        copy_from_user(&task, addr, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn rejects_a_pointer_outside_any_region() {
        let task = Task::new_for_test(TaskId(2));
        let mut buf = [0u8; 4];
        assert!(copy_from_user(&task, 0x0300_0000, &mut buf).is_err());
    }

    #[test]
    fn reads_a_nul_terminated_string() {
        let task = Task::new_for_test(TaskId(3));
        let addr = 0x0400_0000;
        task.address_space
            .lock()
            .alloc(addr, FRAME_SIZE as u32, RegionFlags::WRITABLE | RegionFlags::USER)
            .unwrap();
        copy_to_user(&task, addr, b"hi\0").unwrap();
        assert_eq!(copy_str_from_user(&task, addr).unwrap(), "hi");
    }
}
