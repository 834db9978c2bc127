//! `get_ticks`/`sleep` (spec component H's syscall surface).

pub fn sys_get_ticks() -> i32 {
    crate::timer::get_ticks() as i32
}

pub fn sys_sleep(args: [u32; 4]) -> i32 {
    crate::timer::sleep(args[0]);
    0
}
