//! Instruction builder
//!
//! Appends instructions at an insertion point inside one function, the way
//! a front end lowers code into the IR.

use super::instruction::{
    BinOp, BlockId, CastOp, CmpPred, FuncId, InstId, InstKind, Value,
};
use super::program::Module;
use super::types::Type;

/// Where the next instruction goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertPoint {
    End(BlockId),
    Before(InstId),
}

/// Builder positioned inside one function of a module
pub struct Builder<'m> {
    module: &'m mut Module,
    func: FuncId,
    point: Option<InsertPoint>,
}

impl<'m> Builder<'m> {
    /// Create a builder for `func` with no insertion point
    pub fn new(module: &'m mut Module, func: FuncId) -> Self {
        Self {
            module,
            func,
            point: None,
        }
    }

    /// Function being built
    pub fn func(&self) -> FuncId {
        self.func
    }

    /// Access the underlying module
    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    /// Append subsequent instructions to the end of `block`
    pub fn position_at_end(&mut self, block: BlockId) {
        self.point = Some(InsertPoint::End(block));
    }

    /// Insert subsequent instructions right before `inst`
    pub fn position_before(&mut self, inst: InstId) {
        self.point = Some(InsertPoint::Before(inst));
    }

    /// Creates a block at the end of the function layout
    pub fn add_block(&mut self, name: &str) -> BlockId {
        self.module.add_block(self.func, name)
    }

    fn emit(&mut self, kind: InstKind, ty: Type, name: &str) -> InstId {
        let name = (!name.is_empty()).then(|| name.to_string());
        match self.point {
            Some(InsertPoint::End(block)) => self.module.append_inst(block, kind, ty, name),
            Some(InsertPoint::Before(anchor)) => {
                let block = self.module.inst(anchor).block;
                let index = self.module.inst_index(anchor).ok();
                match (block, index) {
                    (Some(block), Some(index)) => {
                        self.module.insert_inst(block, index, kind, ty, name)
                    }
                    _ => panic!("builder positioned before a detached instruction"),
                }
            }
            None => panic!("builder has no insertion point"),
        }
    }

    /// `alloca ty`
    pub fn alloca(&mut self, ty: Type, name: &str) -> Value {
        self.emit(InstKind::Alloca { ty }, Type::ptr(), name).into()
    }

    /// `load ty, ptr`
    pub fn load(&mut self, ty: Type, ptr: Value, name: &str) -> Value {
        self.emit(InstKind::Load { ptr }, ty, name).into()
    }

    /// `store value, ptr`
    pub fn store(&mut self, value: Value, ptr: Value) -> InstId {
        self.emit(InstKind::Store { value, ptr }, Type::Void, "")
    }

    /// Indexed address computation; the result keeps the base's address space
    pub fn gep(
        &mut self,
        source_ty: Type,
        base: Value,
        indices: Vec<Value>,
        in_bounds: bool,
        name: &str,
    ) -> Value {
        let ty = self.module.value_type(self.func, base);
        self.emit(
            InstKind::Gep {
                base,
                source_ty,
                indices,
                in_bounds,
            },
            ty,
            name,
        )
        .into()
    }

    /// In-bounds `gep` shorthand
    pub fn gep_inbounds(
        &mut self,
        source_ty: Type,
        base: Value,
        indices: Vec<Value>,
        name: &str,
    ) -> Value {
        self.gep(source_ty, base, indices, true, name)
    }

    /// Conversion to `to`
    pub fn cast(&mut self, op: CastOp, value: Value, to: Type, name: &str) -> Value {
        self.emit(InstKind::Cast { op, value }, to, name).into()
    }

    /// Integer arithmetic; the result has the left operand's type
    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value, name: &str) -> Value {
        let ty = self.module.value_type(self.func, lhs);
        self.emit(InstKind::Binary { op, lhs, rhs }, ty, name).into()
    }

    /// `add lhs, rhs`
    pub fn add(&mut self, lhs: Value, rhs: Value, name: &str) -> Value {
        self.binary(BinOp::Add, lhs, rhs, name)
    }

    /// Integer comparison
    pub fn cmp(&mut self, pred: CmpPred, lhs: Value, rhs: Value, name: &str) -> Value {
        self.emit(InstKind::Cmp { pred, lhs, rhs }, Type::I1, name)
            .into()
    }

    /// Control-flow merge
    pub fn phi(&mut self, ty: Type, incoming: Vec<(Value, BlockId)>, name: &str) -> Value {
        self.emit(InstKind::Phi { incoming }, ty, name).into()
    }

    /// Direct call; returns the call instruction's value (`Void` typed for
    /// void callees)
    pub fn call(&mut self, callee: FuncId, args: Vec<Value>, name: &str) -> Value {
        let ret = self.module.function(callee).ret.clone();
        self.emit(
            InstKind::Call {
                callee: Value::Func(callee),
                args,
            },
            ret,
            name,
        )
        .into()
    }

    /// `br dest`
    pub fn br(&mut self, dest: BlockId) -> InstId {
        self.emit(InstKind::Br { dest }, Type::Void, "")
    }

    /// `br cond, then, else`
    pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) -> InstId {
        self.emit(
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            },
            Type::Void,
            "",
        )
    }

    /// `switch value, default [cases]`
    pub fn switch(&mut self, value: Value, default: BlockId, cases: Vec<(i64, BlockId)>) -> InstId {
        self.emit(
            InstKind::Switch {
                value,
                default,
                cases,
            },
            Type::Void,
            "",
        )
    }

    /// `ret value`
    pub fn ret(&mut self, value: Option<Value>) -> InstId {
        self.emit(InstKind::Ret { value }, Type::Void, "")
    }

    /// `unreachable`
    pub fn unreachable(&mut self) -> InstId {
        self.emit(InstKind::Unreachable, Type::Void, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::AddressSpace;

    #[test]
    fn test_gep_keeps_address_space() {
        let mut module = Module::new("test");
        let f = module.add_function("f", vec![Type::global_ptr()], Type::Void);
        let entry = module.add_block(f, "entry");
        let mut b = Builder::new(&mut module, f);
        b.position_at_end(entry);
        let p = b.gep_inbounds(Type::I64, Value::Arg(0), vec![Value::i64(1)], "p");
        b.ret(None);
        assert_eq!(
            module.value_type(f, p),
            Type::Ptr(AddressSpace::Global)
        );
    }

    #[test]
    fn test_position_before_inserts_in_order() {
        let mut module = Module::new("test");
        let f = module.add_function("f", vec![], Type::Void);
        let entry = module.add_block(f, "entry");
        let mut b = Builder::new(&mut module, f);
        b.position_at_end(entry);
        let ret = b.ret(None);
        b.position_before(ret);
        let slot = b.alloca(Type::I32, "slot");
        b.store(Value::i32(7), slot);
        let insts = &module.block(entry).insts;
        assert_eq!(insts.len(), 3);
        assert_eq!(*insts.last().unwrap(), ret);
        assert_eq!(Value::Inst(insts[0]), slot);
    }
}
