//! # Pointer Provenance Analysis
//!
//! Reduces the address operand of every load and store to the root pointer
//! it is derived from, then annotates the instruction with that root.
//!
//! Walking backward from an address:
//!
//! | Step | Behaviour |
//! |------|-----------|
//! | gep, not in-bounds | stop, the gep is the root |
//! | gep in-bounds on a global pointer, first index non-zero | stop, the offset may move to another core |
//! | gep in-bounds otherwise | continue through the base |
//! | cast | continue through the operand while the result stays a pointer |
//! | folded constant expression | materialize and walk it like an instruction |
//! | anything else | root |
//!
//! An anchor is a load or store whose root is a global-space pointer or a
//! stack value.

use super::ir::{AddressSpace, ExprId, FuncId, InstId, InstKind, Module, RootInfo, Value};

/// One backward step through an address computation
enum AddressStep<'a> {
    /// Indexed address computation
    Indexed {
        base: Value,
        indices: &'a [Value],
        in_bounds: bool,
    },
    /// Type conversion
    Cast { operand: Value },
    /// Compile-time folded expression
    Folded(ExprId),
    /// Provenance root
    Root,
}

impl<'a> AddressStep<'a> {
    fn of_kind(kind: &'a InstKind) -> Self {
        match kind {
            InstKind::Gep {
                base,
                indices,
                in_bounds,
                ..
            } => AddressStep::Indexed {
                base: *base,
                indices,
                in_bounds: *in_bounds,
            },
            InstKind::Cast { value, .. } => AddressStep::Cast { operand: *value },
            _ => AddressStep::Root,
        }
    }

    fn of_value(module: &'a Module, value: Value) -> Self {
        match value {
            Value::Inst(id) => Self::of_kind(&module.inst(id).kind),
            Value::Expr(id) => AddressStep::Folded(id),
            _ => AddressStep::Root,
        }
    }
}

/// Returns the provenance root of `value` as seen from inside `func`
pub fn search(module: &Module, func: FuncId, value: Value) -> Value {
    walk(module, func, value, AddressStep::of_value(module, value))
}

fn walk(module: &Module, func: FuncId, this: Value, step: AddressStep<'_>) -> Value {
    match step {
        AddressStep::Indexed {
            base,
            indices,
            in_bounds,
        } => {
            if !in_bounds {
                return this;
            }
            let space = module.value_type(func, base).address_space();
            if space == Some(AddressSpace::Global) {
                if let Some(first) = indices.first() {
                    if !first.is_zero() {
                        return this;
                    }
                }
            }
            search(module, func, base)
        }
        AddressStep::Cast { operand } => {
            let root = search(module, func, operand);
            if module.value_type(func, root).is_pointer() {
                root
            } else {
                this
            }
        }
        AddressStep::Folded(id) => {
            let temporary = module.expr(id).as_instruction();
            // the temporary only lives for this walk; if it is its own root,
            // the folded expression stands in for it
            walk(module, func, this, AddressStep::of_kind(&temporary))
        }
        AddressStep::Root => this,
    }
}

/// Root recorded on `inst` by [`analyze_provenance`]
pub fn provenance_of(module: &Module, inst: InstId) -> Option<Value> {
    module.inst(inst).provenance
}

/// Whether `inst` seeds a candidate region
pub fn is_anchor(module: &Module, func: FuncId, inst: InstId) -> bool {
    match provenance_of(module, inst) {
        Some(root) => {
            let info = RootInfo::of(module, func, root);
            info.is_global_ptr() || info.is_stack()
        }
        None => false,
    }
}

/// Annotates every load and store of `func` with its provenance root and
/// returns the anchors in program order
pub fn analyze_provenance(module: &mut Module, func: FuncId) -> Vec<InstId> {
    let mut anchors = Vec::new();
    for inst in module.function_insts(func) {
        let Some(ptr) = module.inst(inst).kind.pointer_operand() else {
            continue;
        };
        let root = search(module, func, ptr);
        module.inst_mut(inst).provenance = Some(root);
        if is_anchor(module, func, inst) {
            anchors.push(inst);
        }
    }
    anchors
}
