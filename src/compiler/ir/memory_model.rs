//! Storage classes of pointer roots
//!
//! Relocation safety is decided from where a pointer comes from, not from
//! alias analysis. Once provenance analysis has reduced an address to its
//! root value, the root is classified here:
//!
//! - **Global**: typed in the distributed-global address space; the owning
//!   core is encoded in the pointer and only that core accesses it locally
//! - **Symmetric**: typed in the replicated address space; valid at the same
//!   address on every core
//! - **Static**: a global variable, laid out identically on every core
//! - **Constant**: any module-level constant (functions, integers, null,
//!   folded expressions)
//! - **Stack**: an alloca or a parameter of the enclosing function
//! - **Other**: anything else (loaded pointers, call results, ...)
//!
//! The predicates are independent: a global-space parameter is both a
//! global pointer and a stack value. [`PointerClass`] summarizes them by
//! taking the first class that matches in the order above.

use super::instruction::{FuncId, InstKind, Value};
use super::program::Module;
use super::types::AddressSpace;
use serde::Serialize;

/// Summary classification of a provenance root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerClass {
    /// Distributed-global address space pointer
    Global,
    /// Symmetric address space pointer
    Symmetric,
    /// Global variable
    Static,
    /// Module-level constant
    Constant,
    /// Stack allocation or function parameter
    Stack,
    /// Unknown origin
    Other,
}

/// Classifies a provenance root as seen from inside `func`
#[derive(Debug, Clone, Copy)]
pub struct RootInfo {
    /// The root value
    pub root: Value,
    space: Option<AddressSpace>,
    is_static: bool,
    is_const: bool,
    is_stack: bool,
}

impl RootInfo {
    /// Inspect `root` in the context of `func`
    pub fn of(module: &Module, func: FuncId, root: Value) -> Self {
        let space = module.value_type(func, root).address_space();
        let is_stack = match root {
            Value::Arg(_) => true,
            Value::Inst(id) => matches!(module.inst(id).kind, InstKind::Alloca { .. }),
            _ => false,
        };
        Self {
            root,
            space,
            is_static: matches!(root, Value::Global(_)),
            is_const: root.is_constant(),
            is_stack,
        }
    }

    /// Pointer typed in the distributed-global space
    pub fn is_global_ptr(&self) -> bool {
        self.space == Some(AddressSpace::Global)
    }

    /// Pointer typed in the symmetric space
    pub fn is_symmetric_ptr(&self) -> bool {
        self.space == Some(AddressSpace::Symmetric)
    }

    /// Global variable
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Module-level constant (global variables included)
    pub fn is_const(&self) -> bool {
        self.is_const
    }

    /// Alloca or parameter
    pub fn is_stack(&self) -> bool {
        self.is_stack
    }

    /// Consistently addressable from any core without relocation
    pub fn is_core_independent(&self) -> bool {
        self.is_symmetric_ptr() || self.is_static() || self.is_const()
    }

    /// Summary classification
    pub fn class(&self) -> PointerClass {
        if self.is_global_ptr() {
            PointerClass::Global
        } else if self.is_symmetric_ptr() {
            PointerClass::Symmetric
        } else if self.is_static {
            PointerClass::Static
        } else if self.is_const {
            PointerClass::Constant
        } else if self.is_stack {
            PointerClass::Stack
        } else {
            PointerClass::Other
        }
    }
}
