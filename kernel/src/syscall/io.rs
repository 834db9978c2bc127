//! Console and image-table syscalls: `getchar`/`readline`/`print`/
//! `set_term_color`/`set_cursor_pos`/`get_cursor_pos`/`readfile`.

use alloc::vec;

use crate::console;
use crate::image;
use crate::mm::user_validation::{copy_from_user, copy_str_from_user, copy_to_user};
use crate::sched;

/// Blocks until a character is available, polling the non-blocking
/// console driver between `yield_now` calls (see `console`'s module
/// doc).
pub fn sys_getchar() -> i32 {
    loop {
        if let Some(b) = console::readchar() {
            return b as i32;
        }
        sched::yield_now();
    }
}

/// `readline(size, buf)`: blocks until a full line (or `size` bytes,
/// whichever comes first) is available, then copies it to user memory.
pub fn sys_readline(args: [u32; 4]) -> i32 {
    let size = args[0] as usize;
    let buf_addr = args[1];
    if size == 0 {
        return 0;
    }

    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };

    let mut local = vec![0u8; size];
    let mut n = 0;
    while n < size {
        let got = console::readline(&mut local[n..]);
        if got == 0 {
            sched::yield_now();
            continue;
        }
        n += got;
        if local[n - 1] == b'\n' {
            break;
        }
    }

    if copy_to_user(task, buf_addr, &local[..n]).is_err() {
        return -1;
    }
    n as i32
}

/// `print(size, buf)`: copy `size` bytes from user memory and write them
/// to the console.
pub fn sys_print(args: [u32; 4]) -> i32 {
    let size = args[0] as usize;
    let buf_addr = args[1];

    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };

    let mut local = vec![0u8; size];
    if copy_from_user(task, buf_addr, &mut local).is_err() {
        return -1;
    }
    console::putbytes(&local);
    0
}

pub fn sys_set_term_color(args: [u32; 4]) -> i32 {
    match console::set_term_color(args[0] as u8) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn sys_set_cursor_pos(args: [u32; 4]) -> i32 {
    match console::set_cursor_pos(args[0] as usize, args[1] as usize) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// `get_cursor_pos(row*, col*)`: writes through either pointer that is
/// non-null.
pub fn sys_get_cursor_pos(args: [u32; 4]) -> i32 {
    let (row, col) = console::get_cursor_pos();

    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };

    if args[0] != 0 && copy_to_user(task, args[0], &(row as u32).to_le_bytes()).is_err() {
        return -1;
    }
    if args[1] != 0 && copy_to_user(task, args[1], &(col as u32).to_le_bytes()).is_err() {
        return -1;
    }
    0
}

/// `readfile(name, buf, count, offset)`: a read-only window onto the
/// in-memory image table, the only "file" surface this kernel has.
pub fn sys_readfile(args: [u32; 4]) -> i32 {
    let name_addr = args[0];
    let buf_addr = args[1];
    let count = args[2] as usize;
    let offset = args[3] as usize;

    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };

    let name = match copy_str_from_user(task, name_addr) {
        Ok(s) => s,
        Err(_) => return -1,
    };

    let mut local = vec![0u8; count];
    let n = match image::getbytes(&name, offset, count, &mut local) {
        Ok(n) => n,
        Err(_) => return -1,
    };

    if copy_to_user(task, buf_addr, &local[..n]).is_err() {
        return -1;
    }
    n as i32
}
