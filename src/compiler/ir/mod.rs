//! # Intermediate Representation (IR)
//!
//! Typed SSA IR with address-space-tagged pointers, the form the extraction
//! pass reads and rewrites.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── types.rs        # Type, IntWidth, AddressSpace, data layout
//! ├── instruction.rs  # Ids, Value, InstKind, ConstExpr, Instruction
//! ├── program.rs      # Module, Function, BasicBlock arenas and CFG edits
//! ├── builder.rs      # Builder for emitting instructions
//! └── memory_model.rs # Storage classes of pointer roots
//! ```
//!
//! ## Key Types
//!
//! - [`Module`] - arenas of functions, blocks, instructions, globals and
//!   folded constant expressions
//! - [`Value`] - `Copy` SSA value (instruction result, argument, constant)
//! - [`InstKind`] - instruction payload (memory, arithmetic, control flow)
//! - [`Builder`] - insertion-point based instruction emitter
//! - [`RootInfo`] / [`PointerClass`] - provenance root classification

mod builder;
mod instruction;
pub mod memory_model;
mod program;
mod types;

pub use builder::Builder;
pub use instruction::{
    BinOp, BlockId, CastOp, CmpPred, ConstExpr, ExprId, FuncId, GlobalId, InstId, InstKind,
    Instruction, Value,
};
pub use memory_model::{PointerClass, RootInfo};
pub use program::{BasicBlock, FnAttrs, Function, GlobalVar, Linkage, Module};
pub use types::{AddressSpace, IntWidth, Type};
