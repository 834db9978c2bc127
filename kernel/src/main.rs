//! Kernel binary shim.
//!
//! Everything -- the multiboot header, `_start`, and `kernel_entry` -- is
//! built into the library crate (`arch::x86::boot` emits `_start` via
//! `global_asm!`, referencing `pebble_kernel::kernel_entry` directly).
//! This binary exists only so `cargo build --bin pebble-kernel` produces a
//! linkable ELF; pulling in the library as `extern crate` is what forces
//! the linker to keep `_start`'s object code instead of discarding it as
//! unreferenced.

#![no_std]
#![no_main]

extern crate pebble_kernel as _;
