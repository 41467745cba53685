//! Farro compiler core
//!
//! Turns the typed IR defined in `farro_ir` into LLVM IR through inkwell.
//! The host front end owns parsing and checking; this crate owns everything
//! from the typed tree down: type layout resolution, calling convention
//! classification, and expression/statement code generation. Compilation is
//! driven one function at a time through [`codegen::CodeGen`].

pub mod codegen;
pub mod diagnostics;
