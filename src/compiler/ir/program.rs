//! IR module, function and basic block definitions
//!
//! Blocks and instructions live in module-wide arenas and are referenced by
//! stable ids. Every instruction records its parent block and every block
//! records its owning function, so "does this reference resolve inside
//! function F" is a direct lookup. Predecessor and user lists are derived
//! on demand from the current instruction stream and are never cached.

use super::instruction::{
    BlockId, ConstExpr, ExprId, FuncId, GlobalId, InstId, InstKind, Instruction, Value,
};
use super::types::{AddressSpace, Type};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Declarative function attributes consumed by the extraction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FnAttrs {
    /// Eligible as an extraction root
    pub task: bool,
    /// Treated as side-effect-free with respect to data placement
    pub unbound: bool,
    /// Does not read or write memory
    pub no_memory: bool,
}

/// Symbol visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Linkage {
    /// Visible outside the module
    #[default]
    External,
    /// Private to the module
    Internal,
}

/// A function definition or declaration
#[derive(Debug, Clone)]
pub struct Function {
    /// Symbol name
    pub name: String,
    /// Parameter types
    pub params: Vec<Type>,
    /// Return type
    pub ret: Type,
    /// Attributes
    pub attrs: FnAttrs,
    /// Linkage
    pub linkage: Linkage,
    /// Block order; the first block is the entry
    pub layout: Vec<BlockId>,
}

impl Function {
    /// A function without blocks is only a declaration
    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    /// Entry block of a definition
    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }
}

/// A basic block
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Label identifying this basic block
    pub name: String,
    /// Owning function
    pub func: FuncId,
    /// Instructions in program order; the last one is the terminator
    pub insts: Vec<InstId>,
    /// Set once the block has been unlinked from its function
    pub detached: bool,
}

/// A global variable
#[derive(Debug, Clone)]
pub struct GlobalVar {
    /// Symbol name
    pub name: String,
    /// Stored type
    pub ty: Type,
    /// Address space the variable lives in
    pub space: AddressSpace,
    /// Initial bytes (zero-filled to the type size when shorter)
    pub init: Vec<u8>,
}

/// Complete IR module
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Module identifier used in diagnostics and dump file names
    pub name: String,
    /// Function arena
    pub functions: Vec<Function>,
    /// Block arena
    pub blocks: Vec<BasicBlock>,
    /// Instruction arena
    pub insts: Vec<Instruction>,
    /// Global variables
    pub globals: Vec<GlobalVar>,
    /// Folded constant expressions
    pub exprs: Vec<ConstExpr>,
}

impl Module {
    /// Create a new empty module
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Adds a function declaration; add blocks to turn it into a definition
    pub fn add_function(&mut self, name: &str, params: Vec<Type>, ret: Type) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Function {
            name: name.to_string(),
            params,
            ret,
            attrs: FnAttrs::default(),
            linkage: Linkage::External,
            layout: Vec::new(),
        });
        id
    }

    /// Adds a global variable
    pub fn add_global(&mut self, name: &str, ty: Type, space: AddressSpace) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(GlobalVar {
            name: name.to_string(),
            ty,
            space,
            init: Vec::new(),
        });
        id
    }

    /// Interns a folded constant expression
    pub fn add_expr(&mut self, expr: ConstExpr) -> Value {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        Value::Expr(id)
    }

    /// Appends a new empty block to a function's layout
    pub fn add_block(&mut self, func: FuncId, name: &str) -> BlockId {
        let id = self.new_block(func, name);
        self.functions[func.0 as usize].layout.push(id);
        id
    }

    /// Inserts a new empty block right before `before` in the layout
    pub fn add_block_before(&mut self, func: FuncId, name: &str, before: BlockId) -> BlockId {
        let id = self.new_block(func, name);
        let layout = &mut self.functions[func.0 as usize].layout;
        let pos = layout.iter().position(|b| *b == before).unwrap_or(layout.len());
        layout.insert(pos, id);
        id
    }

    fn new_block(&mut self, func: FuncId, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            name: name.to_string(),
            func,
            insts: Vec::new(),
            detached: false,
        });
        id
    }

    /// Creates an instruction and inserts it at `index` within `block`
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstKind,
        ty: Type,
        name: Option<String>,
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        let mut inst = Instruction::new(kind, ty);
        inst.block = Some(block);
        inst.name = name;
        self.insts.push(inst);
        self.blocks[block.0 as usize].insts.insert(index, id);
        id
    }

    /// Creates an instruction at the end of `block`
    pub fn append_inst(
        &mut self,
        block: BlockId,
        kind: InstKind,
        ty: Type,
        name: Option<String>,
    ) -> InstId {
        let index = self.block(block).insts.len();
        self.insert_inst(block, index, kind, ty, name)
    }

    /// Creates an instruction right before the terminator of `block`
    pub fn insert_before_terminator(
        &mut self,
        block: BlockId,
        kind: InstKind,
        ty: Type,
        name: Option<String>,
    ) -> InstId {
        let insts = &self.block(block).insts;
        let index = match insts.last() {
            Some(last) if self.inst(*last).kind.is_terminator() => insts.len() - 1,
            _ => insts.len(),
        };
        self.insert_inst(block, index, kind, ty, name)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Function by id
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    /// Mutable function by id
    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    /// Looks a function up by symbol name
    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    /// All function ids in definition order
    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> {
        (0..self.functions.len() as u32).map(FuncId)
    }

    /// Block by id
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    /// Instruction by id
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0 as usize]
    }

    /// Mutable instruction by id
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.0 as usize]
    }

    /// Folded expression by id
    pub fn expr(&self, id: ExprId) -> &ConstExpr {
        &self.exprs[id.0 as usize]
    }

    /// Parent block of an attached instruction
    pub fn inst_block(&self, id: InstId) -> Result<BlockId> {
        self.inst(id)
            .block
            .ok_or_else(|| Error::invalid_ir(format!("instruction %{} is detached", id.0)))
    }

    /// Function owning an attached instruction
    pub fn inst_function(&self, id: InstId) -> Option<FuncId> {
        self.inst(id).block.map(|b| self.block(b).func)
    }

    /// Position of an instruction within its block
    pub fn inst_index(&self, id: InstId) -> Result<usize> {
        let block = self.inst_block(id)?;
        self.block(block)
            .insts
            .iter()
            .position(|i| *i == id)
            .ok_or_else(|| Error::invalid_ir(format!("instruction %{} not in its block", id.0)))
    }

    /// Instruction preceding `id` in its block
    pub fn prev_inst(&self, id: InstId) -> Option<InstId> {
        let block = self.inst(id).block?;
        let insts = &self.block(block).insts;
        let pos = insts.iter().position(|i| *i == id)?;
        pos.checked_sub(1).map(|p| insts[p])
    }

    /// First instruction of a block
    pub fn first_inst(&self, block: BlockId) -> Option<InstId> {
        self.block(block).insts.first().copied()
    }

    /// Terminator of a block
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.block(block)
            .insts
            .last()
            .copied()
            .filter(|i| self.inst(*i).kind.is_terminator())
    }

    /// Distinct successor blocks in terminator operand order
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        let mut succs = Vec::new();
        if let Some(term) = self.terminator(block) {
            for succ in self.inst(term).kind.successors() {
                if !succs.contains(&succ) {
                    succs.push(succ);
                }
            }
        }
        succs
    }

    /// Distinct predecessor blocks in layout order
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        let func = self.block(block).func;
        self.function(func)
            .layout
            .iter()
            .copied()
            .filter(|b| self.successors(*b).contains(&block))
            .collect()
    }

    /// Instructions of `func` that use `value` as an operand
    pub fn users(&self, func: FuncId, value: Value) -> Vec<InstId> {
        let mut users = Vec::new();
        for &block in &self.function(func).layout {
            for &inst in &self.block(block).insts {
                if self.inst(inst).kind.operands().contains(&value) {
                    users.push(inst);
                }
            }
        }
        users
    }

    /// All attached instructions of a function in layout order
    pub fn function_insts(&self, func: FuncId) -> Vec<InstId> {
        self.function(func)
            .layout
            .iter()
            .flat_map(|b| self.block(*b).insts.iter().copied())
            .collect()
    }

    /// Type of a value as seen from inside `func`
    pub fn value_type(&self, func: FuncId, value: Value) -> Type {
        match value {
            Value::Inst(id) => self.inst(id).ty.clone(),
            Value::Arg(index) => self
                .function(func)
                .params
                .get(index as usize)
                .cloned()
                .unwrap_or(Type::Void),
            Value::Global(id) => Type::Ptr(self.globals[id.0 as usize].space),
            Value::Func(_) => Type::ptr(),
            Value::ConstInt(width, _) => Type::Int(width),
            Value::Null(space) => Type::Ptr(space),
            Value::Expr(id) => match self.expr(id) {
                ConstExpr::Gep { base, .. } => self.value_type(func, *base),
                ConstExpr::Cast { to, .. } => to.clone(),
            },
        }
    }

    // ------------------------------------------------------------------
    // Structural edits
    // ------------------------------------------------------------------

    /// Splits `block` before `at`. Instructions from `at` onward move to a
    /// new block placed right after `block`, which then ends in a branch to
    /// it. Phi nodes in the moved terminator's successors are updated to
    /// name the new block as their predecessor.
    pub fn split_block(&mut self, block: BlockId, at: InstId, name: &str) -> Result<BlockId> {
        if self.inst(at).block != Some(block) {
            return Err(Error::invalid_ir(format!(
                "cannot split block {} at instruction %{} it does not contain",
                self.block(block).name,
                at.0
            )));
        }
        let pos = self.inst_index(at)?;
        let func = self.block(block).func;

        let new_block = self.new_block(func, name);
        let layout = &mut self.functions[func.0 as usize].layout;
        let layout_pos = layout
            .iter()
            .position(|b| *b == block)
            .map(|p| p + 1)
            .unwrap_or(layout.len());
        layout.insert(layout_pos, new_block);

        let moved: Vec<InstId> = self.blocks[block.0 as usize].insts.split_off(pos);
        for &inst in &moved {
            self.insts[inst.0 as usize].block = Some(new_block);
        }
        self.blocks[new_block.0 as usize].insts = moved;

        for succ in self.successors(new_block) {
            self.retarget_phis(succ, block, new_block);
        }

        self.append_inst(block, InstKind::Br { dest: new_block }, Type::Void, None);
        Ok(new_block)
    }

    /// Rewrites phi incoming blocks in `block` from `from` to `to`
    pub fn retarget_phis(&mut self, block: BlockId, from: BlockId, to: BlockId) {
        let insts = self.block(block).insts.clone();
        for inst in insts {
            if let InstKind::Phi { incoming } = &mut self.insts[inst.0 as usize].kind {
                for (_, pred) in incoming.iter_mut() {
                    if *pred == from {
                        *pred = to;
                    }
                }
            }
        }
    }

    /// Retargets the terminator of `block` from `from` to `to`
    pub fn replace_successor(&mut self, block: BlockId, from: BlockId, to: BlockId) {
        if let Some(term) = self.terminator(block) {
            self.insts[term.0 as usize].kind.replace_successor(from, to);
        }
    }

    /// Replaces `from` with `to` in every instruction of `func` accepted by
    /// `filter`; returns the number of rewritten instructions
    pub fn replace_uses_in(
        &mut self,
        func: FuncId,
        from: Value,
        to: Value,
        mut filter: impl FnMut(InstId) -> bool,
    ) -> usize {
        let mut count = 0;
        for inst in self.function_insts(func) {
            if filter(inst) && self.insts[inst.0 as usize].kind.replace_operand(from, to) {
                count += 1;
            }
        }
        count
    }

    /// Unlinks a block from its function; its instructions become detached
    pub fn detach_block(&mut self, block: BlockId) {
        let func = self.block(block).func;
        self.functions[func.0 as usize].layout.retain(|b| *b != block);
        let insts = std::mem::take(&mut self.blocks[block.0 as usize].insts);
        for inst in insts {
            let slot = &mut self.insts[inst.0 as usize];
            slot.block = None;
            slot.provenance = None;
        }
        self.blocks[block.0 as usize].detached = true;
    }

    /// Returns `base` if no function uses it yet, otherwise `base.N` for the
    /// smallest free N
    pub fn unique_function_name(&self, base: &str) -> String {
        let taken: HashSet<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        if !taken.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}.{}", base, n))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    /// Functions called directly from `func`, in first-call order
    pub fn direct_callees(&self, func: FuncId) -> Vec<FuncId> {
        let mut callees = Vec::new();
        for inst in self.function_insts(func) {
            if let InstKind::Call {
                callee: Value::Func(callee),
                ..
            } = self.inst(inst).kind
            {
                if !callees.contains(&callee) {
                    callees.push(callee);
                }
            }
        }
        callees
    }

    /// Map from each attached instruction of `func` to its parent block
    pub fn block_map(&self, func: FuncId) -> HashMap<InstId, BlockId> {
        let mut map = HashMap::new();
        for &block in &self.function(func).layout {
            for &inst in &self.block(block).insts {
                map.insert(inst, block);
            }
        }
        map
    }
}
