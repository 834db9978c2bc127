//! Syscall vector numbers, read out of `eax` by `dispatch`. Values are an
//! internal convention; nothing outside this kernel depends on them.

pub const SYS_FORK: u32 = 0;
pub const SYS_THREAD_FORK: u32 = 1;
pub const SYS_EXEC: u32 = 2;
pub const SYS_SET_STATUS: u32 = 3;
pub const SYS_VANISH: u32 = 4;
pub const SYS_TASK_VANISH: u32 = 5;
pub const SYS_WAIT: u32 = 6;
pub const SYS_GETTID: u32 = 7;
pub const SYS_YIELD: u32 = 8;
pub const SYS_DESCHEDULE: u32 = 9;
pub const SYS_MAKE_RUNNABLE: u32 = 10;
pub const SYS_GET_TICKS: u32 = 11;
pub const SYS_SLEEP: u32 = 12;
pub const SYS_NEW_PAGES: u32 = 13;
pub const SYS_REMOVE_PAGES: u32 = 14;
pub const SYS_GETCHAR: u32 = 15;
pub const SYS_READLINE: u32 = 16;
pub const SYS_PRINT: u32 = 17;
pub const SYS_SET_TERM_COLOR: u32 = 18;
pub const SYS_SET_CURSOR_POS: u32 = 19;
pub const SYS_GET_CURSOR_POS: u32 = 20;
pub const SYS_HALT: u32 = 21;
pub const SYS_READFILE: u32 = 22;
pub const SYS_SWEXN: u32 = 23;
pub const SYS_MISBEHAVE: u32 = 24;
