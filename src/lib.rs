//! Niflheim - compiler backend and managed runtime for a small statically
//! typed language targeting Linux x86-64.
//!
//! This crate packages the two halves that sit below the (external) front
//! end: the code generator that lowers resolved modules to Intel-syntax
//! assembly, and the managed runtime the generated code links against:
//! allocation, a stop-the-world mark-sweep collector, the shadow-stack root
//! protocol, and the built-in heap types.

pub mod codegen;
pub mod config;
pub mod runtime;

// Re-export commonly used types
pub use codegen::{ResolvedModule, Ty, emit_module};
pub use config::GcConfig;
pub use runtime::{RtGcStats, set_gc_config};
