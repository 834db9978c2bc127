//! Boots the real kernel image with the `test-kernel` feature enabled and
//! checks that it reaches the post-init smoke-exit hook in
//! `pebble_kernel::kernel_entry` without panicking.
//!
//! Not runnable by `cargo test` directly -- there is no hosted way to
//! execute a multiboot ELF. Build and run it under QEMU:
//!
//! ```text
//! cargo build --test end_to_end --features test-kernel --target i686-unknown-none
//! qemu-system-i386 -kernel target/.../end_to_end -device isa-debug-exit,iobase=0xf4,iosize=4 -serial stdio
//! ```
//!
//! A `0x10` exit code (QEMU maps it to process exit `33`) means every
//! core subsystem -- frame allocator, paging, scheduler, the first
//! task/thread -- initialized cleanly; `0x11` (-> `35`) means it panicked
//! first. This file supplies no code of its own: linking `pebble_kernel`
//! in is enough, since `arch::x86::boot`'s `_start` is what actually runs.

#![no_std]
#![no_main]

extern crate pebble_kernel as _;
