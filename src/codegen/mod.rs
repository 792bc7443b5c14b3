//! Assembly emission for resolved Niflheim modules.
//!
//! The pipeline stops at text assembly: the front end (external to this
//! crate) produces a [`ir::ResolvedModule`], `emit_module` lowers it to an
//! Intel-syntax `.s` translation unit, and the system assembler and linker
//! combine it with the runtime static library.

pub mod asm;
pub mod emit;
pub mod ir;
pub mod layout;
pub mod runtime_abi;

pub use emit::emit_module;
pub use ir::{ResolvedModule, Ty};
