//! IR instruction definitions

use super::types::{IntWidth, Type};

/// Function handle (index into the module's function arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

/// Basic block handle (index into the module's block arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Instruction handle (index into the module's instruction arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// Global variable handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u32);

/// Folded constant expression handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// An SSA value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// Result of an instruction
    Inst(InstId),
    /// Parameter of the function the use appears in
    Arg(u32),
    /// Address of a global variable
    Global(GlobalId),
    /// Address of a function
    Func(FuncId),
    /// Integer constant
    ConstInt(IntWidth, i64),
    /// Null pointer in an address space
    Null(super::types::AddressSpace),
    /// Compile-time folded address expression
    Expr(ExprId),
}

impl Value {
    /// Builds an integer constant
    pub fn int(width: IntWidth, value: i64) -> Self {
        Value::ConstInt(width, value)
    }

    /// `i32` constant
    pub fn i32(value: i64) -> Self {
        Value::ConstInt(IntWidth::I32, value)
    }

    /// `i64` constant
    pub fn i64(value: i64) -> Self {
        Value::ConstInt(IntWidth::I64, value)
    }

    /// Instruction defining this value, if any
    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns true for module-level constants (addressable from any core)
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Value::Global(_)
                | Value::Func(_)
                | Value::ConstInt(..)
                | Value::Null(_)
                | Value::Expr(_)
        )
    }

    /// Returns true if this is the integer constant zero
    pub fn is_zero(&self) -> bool {
        matches!(self, Value::ConstInt(_, 0))
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}

/// Binary integer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Signed division
    SDiv,
    /// Signed remainder
    SRem,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Shift left
    Shl,
    /// Logical shift right
    LShr,
}

/// Integer comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpPred {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Signed less than
    Slt,
    /// Signed less or equal
    Sle,
    /// Signed greater than
    Sgt,
    /// Signed greater or equal
    Sge,
    /// Unsigned less than
    Ult,
}

/// Conversion operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    /// Pointer reinterpretation within one address space
    Bitcast,
    /// Pointer conversion between address spaces
    AddrSpaceCast,
    /// Pointer to integer
    PtrToInt,
    /// Integer to pointer
    IntToPtr,
    /// Integer truncation
    Trunc,
    /// Zero extension
    ZExt,
    /// Sign extension
    SExt,
}

/// Instruction payload
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Stack slot: result = alloca ty
    Alloca {
        /// Allocated type
        ty: Type,
    },
    /// result = *ptr
    Load {
        /// Address operand
        ptr: Value,
    },
    /// *ptr = value
    Store {
        /// Stored value
        value: Value,
        /// Address operand
        ptr: Value,
    },
    /// Indexed address computation
    Gep {
        /// Base pointer
        base: Value,
        /// Type the first index steps over
        source_ty: Type,
        /// Index list
        indices: Vec<Value>,
        /// Whether the computation is declared to stay within the object
        in_bounds: bool,
    },
    /// Type conversion
    Cast {
        /// Conversion kind
        op: CastOp,
        /// Converted value
        value: Value,
    },
    /// Integer arithmetic
    Binary {
        /// Operation
        op: BinOp,
        /// Left operand
        lhs: Value,
        /// Right operand
        rhs: Value,
    },
    /// Integer comparison producing `i1`
    Cmp {
        /// Predicate
        pred: CmpPred,
        /// Left operand
        lhs: Value,
        /// Right operand
        rhs: Value,
    },
    /// Control-flow merge
    Phi {
        /// (value, predecessor) pairs
        incoming: Vec<(Value, BlockId)>,
    },
    /// Function call
    Call {
        /// Callee (direct `Value::Func` or an indirect pointer)
        callee: Value,
        /// Arguments
        args: Vec<Value>,
    },
    /// Unconditional branch
    Br {
        /// Target block
        dest: BlockId,
    },
    /// Two-way branch on an `i1`
    CondBr {
        /// Condition
        cond: Value,
        /// Target when true
        then_dest: BlockId,
        /// Target when false
        else_dest: BlockId,
    },
    /// Multi-way branch
    Switch {
        /// Scrutinee
        value: Value,
        /// Target when no case matches
        default: BlockId,
        /// (case value, target) pairs
        cases: Vec<(i64, BlockId)>,
    },
    /// Function return
    Ret {
        /// Returned value
        value: Option<Value>,
    },
    /// Marks unreachable control flow
    Unreachable,
}

impl InstKind {
    /// Returns true for block terminators
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }

    /// Returns true for loads and stores
    pub fn is_memory_access(&self) -> bool {
        matches!(self, InstKind::Load { .. } | InstKind::Store { .. })
    }

    /// Address operand of a load or store
    pub fn pointer_operand(&self) -> Option<Value> {
        match self {
            InstKind::Load { ptr } | InstKind::Store { ptr, .. } => Some(*ptr),
            _ => None,
        }
    }

    /// Value operands in order
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::Alloca { .. } | InstKind::Br { .. } | InstKind::Unreachable => vec![],
            InstKind::Load { ptr } => vec![*ptr],
            InstKind::Store { value, ptr } => vec![*value, *ptr],
            InstKind::Gep { base, indices, .. } => {
                let mut ops = vec![*base];
                ops.extend(indices.iter().copied());
                ops
            }
            InstKind::Cast { value, .. } => vec![*value],
            InstKind::Binary { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            InstKind::Phi { incoming } => incoming.iter().map(|(v, _)| *v).collect(),
            InstKind::Call { callee, args } => {
                let mut ops = vec![*callee];
                ops.extend(args.iter().copied());
                ops
            }
            InstKind::CondBr { cond, .. } => vec![*cond],
            InstKind::Switch { value, .. } => vec![*value],
            InstKind::Ret { value } => value.iter().copied().collect(),
        }
    }

    /// Mutable references to every value operand
    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            InstKind::Alloca { .. } | InstKind::Br { .. } | InstKind::Unreachable => vec![],
            InstKind::Load { ptr } => vec![ptr],
            InstKind::Store { value, ptr } => vec![value, ptr],
            InstKind::Gep { base, indices, .. } => {
                let mut ops = vec![base];
                ops.extend(indices.iter_mut());
                ops
            }
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Binary { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            InstKind::Phi { incoming } => incoming.iter_mut().map(|(v, _)| v).collect(),
            InstKind::Call { callee, args } => {
                let mut ops = vec![callee];
                ops.extend(args.iter_mut());
                ops
            }
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Switch { value, .. } => vec![value],
            InstKind::Ret { value } => value.iter_mut().collect(),
        }
    }

    /// Successor blocks of a terminator, in operand order (may repeat)
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { dest } => vec![*dest],
            InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            InstKind::Switch { default, cases, .. } => {
                let mut succs = vec![*default];
                succs.extend(cases.iter().map(|(_, b)| *b));
                succs
            }
            _ => vec![],
        }
    }

    /// Mutable references to every block operand (branch targets and phi
    /// incoming blocks)
    pub fn blocks_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            InstKind::Br { dest } => vec![dest],
            InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![then_dest, else_dest],
            InstKind::Switch { default, cases, .. } => {
                let mut blocks = vec![default];
                blocks.extend(cases.iter_mut().map(|(_, b)| b));
                blocks
            }
            InstKind::Phi { incoming } => incoming.iter_mut().map(|(_, b)| b).collect(),
            _ => vec![],
        }
    }

    /// Retargets every branch edge to `from` so it goes to `to`
    pub fn replace_successor(&mut self, from: BlockId, to: BlockId) {
        if matches!(self, InstKind::Phi { .. }) {
            return;
        }
        for block in self.blocks_mut() {
            if *block == from {
                *block = to;
            }
        }
    }

    /// Replaces every operand equal to `from` with `to`; returns whether
    /// anything changed
    pub fn replace_operand(&mut self, from: Value, to: Value) -> bool {
        let mut changed = false;
        for op in self.operands_mut() {
            if *op == from {
                *op = to;
                changed = true;
            }
        }
        changed
    }
}

/// Compile-time folded address expression (the constant form of a gep or
/// cast over module-level constants)
#[derive(Debug, Clone, PartialEq)]
pub enum ConstExpr {
    /// Folded indexed address computation
    Gep {
        /// Base pointer
        base: Value,
        /// Type the first index steps over
        source_ty: Type,
        /// Index list
        indices: Vec<Value>,
        /// In-bounds flag
        in_bounds: bool,
    },
    /// Folded conversion
    Cast {
        /// Conversion kind
        op: CastOp,
        /// Converted value
        value: Value,
        /// Result type
        to: Type,
    },
}

impl ConstExpr {
    /// Materializes the expression as a free-standing instruction payload
    pub fn as_instruction(&self) -> InstKind {
        match self {
            ConstExpr::Gep {
                base,
                source_ty,
                indices,
                in_bounds,
            } => InstKind::Gep {
                base: *base,
                source_ty: source_ty.clone(),
                indices: indices.clone(),
                in_bounds: *in_bounds,
            },
            ConstExpr::Cast { op, value, .. } => InstKind::Cast {
                op: *op,
                value: *value,
            },
        }
    }

    /// The operand the expression is computed from
    pub fn base(&self) -> Value {
        match self {
            ConstExpr::Gep { base, .. } => *base,
            ConstExpr::Cast { value, .. } => *value,
        }
    }
}

/// An instruction together with its analysis annotation
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Operation
    pub kind: InstKind,
    /// Result type (`Void` when the instruction produces no value)
    pub ty: Type,
    /// Parent block; `None` once detached
    pub block: Option<BlockId>,
    /// Optional name used when printing
    pub name: Option<String>,
    /// Root pointer this instruction dereferences, set by provenance analysis
    pub provenance: Option<Value>,
}

impl Instruction {
    /// Creates an unattached instruction
    pub fn new(kind: InstKind, ty: Type) -> Self {
        Self {
            kind,
            ty,
            block: None,
            name: None,
            provenance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_successors_include_default() {
        let kind = InstKind::Switch {
            value: Value::i32(0),
            default: BlockId(9),
            cases: vec![(0, BlockId(1)), (1, BlockId(2))],
        };
        assert_eq!(kind.successors(), vec![BlockId(9), BlockId(1), BlockId(2)]);
        assert!(kind.is_terminator());
    }

    #[test]
    fn test_replace_successor_skips_phi() {
        let mut phi = InstKind::Phi {
            incoming: vec![(Value::i32(1), BlockId(3))],
        };
        phi.replace_successor(BlockId(3), BlockId(4));
        assert_eq!(
            phi,
            InstKind::Phi {
                incoming: vec![(Value::i32(1), BlockId(3))]
            }
        );

        let mut br = InstKind::CondBr {
            cond: Value::int(IntWidth::I1, 1),
            then_dest: BlockId(3),
            else_dest: BlockId(3),
        };
        br.replace_successor(BlockId(3), BlockId(4));
        assert_eq!(br.successors(), vec![BlockId(4), BlockId(4)]);
    }

    #[test]
    fn test_replace_operand() {
        let mut kind = InstKind::Store {
            value: Value::Arg(0),
            ptr: Value::Arg(0),
        };
        assert!(kind.replace_operand(Value::Arg(0), Value::Arg(1)));
        assert_eq!(kind.operands(), vec![Value::Arg(1), Value::Arg(1)]);
        assert!(!kind.replace_operand(Value::Arg(0), Value::Arg(2)));
    }

    #[test]
    fn test_folded_expressions_materialize() {
        let gep = ConstExpr::Gep {
            base: Value::Arg(0),
            source_ty: Type::I64,
            indices: vec![Value::i32(0)],
            in_bounds: true,
        };
        assert_eq!(
            gep.as_instruction(),
            InstKind::Gep {
                base: Value::Arg(0),
                source_ty: Type::I64,
                indices: vec![Value::i32(0)],
                in_bounds: true,
            }
        );

        let cast = ConstExpr::Cast {
            op: CastOp::AddrSpaceCast,
            value: Value::Arg(1),
            to: Type::global_ptr(),
        };
        assert_eq!(
            cast.as_instruction(),
            InstKind::Cast {
                op: CastOp::AddrSpaceCast,
                value: Value::Arg(1),
            }
        );
        assert_eq!(cast.base(), Value::Arg(1));
    }
}
