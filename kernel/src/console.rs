//! Console and keyboard boundary module.
//!
//! Named in spec.md §1 as a thin out-of-scope collaborator (console
//! raster output, keyboard device programming), but `print`/`getchar`/
//! `readline`/`set_term_color`/`set_cursor_pos` need something concrete
//! to demo end to end. `CONSOLE` owns the VGA text buffer's cursor/color
//! state and a small keyboard input ring, both serialized by one spinlock
//! per spec.md §6's "all serialized by the driver's own mutex" contract.

use core::ptr::write_volatile;

use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};

use crate::arch;
use crate::arch::context::Ureg;
use crate::error::KernelError;
use crate::sync::spinlock::Ticket;

const VGA_BUFFER: *mut u16 = 0xb8000 as *mut u16;
const ROWS: usize = 25;
const COLS: usize = 80;

const KEYBOARD_DATA_PORT: u16 = 0x60;
const CRTC_INDEX: u16 = 0x3D4;
const CRTC_DATA: u16 = 0x3D5;

const INPUT_RING_SIZE: usize = 256;

struct ConsoleState {
    row: usize,
    col: usize,
    color: u8,
    ring: [u8; INPUT_RING_SIZE],
    read_idx: usize,
    write_idx: usize,
}

impl ConsoleState {
    const fn new() -> Self {
        ConsoleState {
            row: 0,
            col: 0,
            color: 0x07,
            ring: [0; INPUT_RING_SIZE],
            read_idx: 0,
            write_idx: 0,
        }
    }

    fn cell(row: usize, col: usize) -> isize {
        (row * COLS + col) as isize
    }

    fn putc(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            _ => {
                if self.col >= COLS {
                    self.newline();
                }
                let entry = (self.color as u16) << 8 | byte as u16;
                // SAFETY: row/col are kept in [0, ROWS)/[0, COLS) by
                // `newline`/`scroll`; VGA_BUFFER is the well-known
                // identity-mapped text-mode framebuffer.
                unsafe { write_volatile(VGA_BUFFER.offset(Self::cell(self.row, self.col)), entry) };
                self.col += 1;
            }
        }
    }

    fn newline(&mut self) {
        self.col = 0;
        self.row += 1;
        if self.row >= ROWS {
            self.scroll();
            self.row = ROWS - 1;
        }
    }

    fn scroll(&mut self) {
        for row in 1..ROWS {
            for col in 0..COLS {
                // SAFETY: see `putc`.
                unsafe {
                    let entry = core::ptr::read_volatile(VGA_BUFFER.offset(Self::cell(row, col)));
                    write_volatile(VGA_BUFFER.offset(Self::cell(row - 1, col)), entry);
                }
            }
        }
        let blank = (self.color as u16) << 8 | b' ' as u16;
        for col in 0..COLS {
            // SAFETY: see `putc`.
            unsafe { write_volatile(VGA_BUFFER.offset(Self::cell(ROWS - 1, col)), blank) };
        }
    }

    fn push_input(&mut self, byte: u8) {
        let next = (self.write_idx + 1) % INPUT_RING_SIZE;
        if next == self.read_idx {
            return; // ring full: drop rather than block an interrupt handler
        }
        self.ring[self.write_idx] = byte;
        self.write_idx = next;
    }

    fn pop_input(&mut self) -> Option<u8> {
        if self.read_idx == self.write_idx {
            return None;
        }
        let byte = self.ring[self.read_idx];
        self.read_idx = (self.read_idx + 1) % INPUT_RING_SIZE;
        Some(byte)
    }
}

static CONSOLE: Ticket<ConsoleState> = Ticket::new(ConsoleState::new());

/// Write `bytes` to the console, honoring the current cursor/color state.
/// Non-printable bytes other than `\n` are rendered as `?`.
pub fn putbytes(bytes: &[u8]) {
    let mut state = CONSOLE.lock();
    for &b in bytes {
        match b {
            0x20..=0x7e | b'\n' => state.putc(b),
            _ => state.putc(b'?'),
        }
    }
    update_hw_cursor(state.row, state.col);
}

/// Set the foreground color used by subsequent `putbytes` calls (low 4
/// bits, per the VGA text-mode palette).
pub fn set_term_color(color: u8) -> Result<(), KernelError> {
    if color > 0x0F {
        return Err(KernelError::InvalidArgument {
            name: "color",
            value: "must be a 4-bit VGA color index",
        });
    }
    CONSOLE.lock().color = color;
    Ok(())
}

pub fn set_cursor_pos(row: usize, col: usize) -> Result<(), KernelError> {
    if row >= ROWS || col >= COLS {
        return Err(KernelError::InvalidArgument {
            name: "cursor position",
            value: "out of bounds",
        });
    }
    let mut state = CONSOLE.lock();
    state.row = row;
    state.col = col;
    update_hw_cursor(row, col);
    Ok(())
}

pub fn get_cursor_pos() -> (usize, usize) {
    let state = CONSOLE.lock();
    (state.row, state.col)
}

fn update_hw_cursor(row: usize, col: usize) {
    let pos = (row * COLS + col) as u16;
    // SAFETY: 0x3D4/0x3D5 are the well-known VGA CRTC index/data ports;
    // this is the documented two-register cursor-position update sequence.
    unsafe {
        arch::outb(CRTC_INDEX, 0x0F);
        arch::outb(CRTC_DATA, (pos & 0xFF) as u8);
        arch::outb(CRTC_INDEX, 0x0E);
        arch::outb(CRTC_DATA, ((pos >> 8) & 0xFF) as u8);
    }
}

/// Non-blocking read of one already-buffered input character.
pub fn readchar() -> Option<u8> {
    CONSOLE.lock().pop_input()
}

/// Drain up to `buf.len()` already-buffered input bytes, stopping early at
/// a newline. Non-blocking at the driver layer, per spec.md §6; a
/// genuinely blocking `readline` syscall is built on top of this by the
/// caller polling between `sched::yield_now` calls.
pub fn readline(buf: &mut [u8]) -> usize {
    let mut state = CONSOLE.lock();
    let mut n = 0;
    while n < buf.len() {
        match state.pop_input() {
            Some(b) => {
                buf[n] = b;
                n += 1;
                if b == b'\n' {
                    break;
                }
            }
            None => break,
        }
    }
    n
}

lazy_static! {
    /// Scancode-set-1 decode state machine (shift/caps/ctrl tracking lives
    /// here, not in `ConsoleState`).
    static ref KEYBOARD: Ticket<Keyboard<layouts::Us104Key, ScancodeSet1>> = Ticket::new(Keyboard::new(
        ScancodeSet1::new(),
        layouts::Us104Key,
        HandleControl::Ignore,
    ));
}

/// Keyboard IRQ1 handler: read the scancode, decode it, and push any
/// printable result onto the input ring. Always acks both the keyboard
/// controller (by reading its data port) and the PIC.
pub extern "C" fn irq_handler(_ureg: *mut Ureg) {
    // SAFETY: 0x60 is the well-known keyboard controller data port.
    let scancode = unsafe { arch::inb(KEYBOARD_DATA_PORT) };

    let mut keyboard = KEYBOARD.lock();
    if let Ok(Some(event)) = keyboard.add_byte(scancode) {
        if let Some(DecodedKey::Unicode(ch)) = keyboard.process_keyevent(event) {
            if ch.is_ascii() {
                CONSOLE.lock().push_input(ch as u8);
            }
        }
    }
    drop(keyboard);

    arch::notify_eoi(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_decodes_a_letter_make_code_to_ascii() {
        let mut kb = Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore);
        let event = kb.add_byte(0x10).unwrap().expect("a make code decodes to an event");
        let key = kb.process_keyevent(event).expect("a key-down event decodes to a key");
        assert_eq!(key, DecodedKey::Unicode('q'));
    }

    #[test]
    fn input_ring_round_trips_in_order() {
        let mut state = ConsoleState::new();
        state.push_input(b'h');
        state.push_input(b'i');
        assert_eq!(state.pop_input(), Some(b'h'));
        assert_eq!(state.pop_input(), Some(b'i'));
        assert_eq!(state.pop_input(), None);
    }
}
