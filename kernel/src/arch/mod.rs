//! Architecture layer. This kernel targets a single architecture --
//! 32-bit protected-mode x86 -- so there is no multi-arch dispatch here,
//! only a re-export of the concrete `x86` module.

pub mod x86;

pub use x86::*;
