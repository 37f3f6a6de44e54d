//! # dsm-extract - Region Extraction for Distributed Shared Memory
//!
//! A compiler pass that moves computation to the data. Programs written
//! against a partitioned global address space access remote memory through
//! pointers in a distinguished address space; every such access is a round
//! trip to the core owning the memory. This pass finds those accesses,
//! grows each into the largest block of code that can run entirely on the
//! owning core, and replaces it with a single remote invocation.
//!
//! ## Quick Start
//!
//! ```rust
//! use dsm_extract::compiler::ir::{Builder, Module, Type, Value};
//! use dsm_extract::compiler::{ExtractorOptions, ExtractorPass, RuntimePrimitives};
//!
//! # fn main() -> dsm_extract::Result<()> {
//! let mut module = Module::new("counter");
//! RuntimePrimitives::declare(&mut module, &ExtractorOptions::default());
//!
//! // i64 bump(ptr addrspace(100) %p) { v = *p; *p = v + 1; return v + 1 }
//! let f = module.add_function("bump", vec![Type::global_ptr()], Type::I64);
//! module.function_mut(f).attrs.task = true;
//! let entry = module.add_block(f, "entry");
//! let mut b = Builder::new(&mut module, f);
//! b.position_at_end(entry);
//! let v = b.load(Type::I64, Value::Arg(0), "v");
//! let next = b.add(v, Value::i64(1), "next");
//! b.store(next, Value::Arg(0));
//! b.ret(Some(next));
//!
//! let report = ExtractorPass::new(ExtractorOptions::default()).run(&mut module)?;
//! assert_eq!(report.extracted_functions(), vec!["bump.d0"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Module → Provenance → Anchors → Region Growth → Extraction → Verification
//! ```
//!
//! ### Main Components
//!
//! - [`compiler::ir`] - typed SSA IR with address-space-tagged pointers
//! - [`compiler::provenance`] - reduces addresses to their root pointer
//! - [`compiler::region`] - grows anchors into single-entry regions
//! - [`compiler::extract`] - outlines regions behind `call_on`
//! - [`compiler::ExtractorPass`] - drives the pass over task functions
//! - [`runtime::Interpreter`] - reference execution for equivalence checks
//!
//! ## Address Spaces
//!
//! | Space | Tag | Meaning |
//! |-------|-----|---------|
//! | local | 0 | core-private memory |
//! | global | 100 | partitioned across cores, owner encoded in the pointer |
//! | symmetric | 200 | replicated at the same address on every core |
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result`]. Internal inconsistencies of
//! the pass classify as [`error::ErrorSeverity::Fatal`]; a module must not
//! be emitted after one. Missing runtime primitives are not an error: the
//! pass reports its regions without rewriting anything.

#![allow(clippy::needless_range_loop)] // Index needed for error messages

/// Version of the extraction pass
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;
pub mod runtime;

// Re-export main types
pub use compiler::{ExtractionReport, ExtractorOptions, ExtractorPass};
pub use error::{Error, ErrorSeverity, Result};
pub use runtime::{Interpreter, InterpreterOptions};
