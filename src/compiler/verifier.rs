//! # IR Verifier
//!
//! Validates functions before and after region extraction.
//! Structural checks cover block shape, phi placement, references across
//! function boundaries and phi/predecessor agreement; the dominance check
//! requires every definition to dominate its uses.
//!
//! The containment checks used by the extractor live here too:
//! [`verify_containment`] for a freshly built function and
//! [`verify_detachable`] for the block set about to be unlinked.

use super::ir::{BlockId, FuncId, InstId, InstKind, Module, Value};
use super::region::describe;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Verification result with warnings
#[derive(Debug)]
pub struct VerifyResult {
    /// Function is well formed
    pub valid: bool,
    /// Errors that make the function malformed
    pub errors: Vec<VerifyError>,
    /// Warnings (non-fatal)
    pub warnings: Vec<String>,
    /// Statistics
    pub stats: FunctionStats,
}

/// Function statistics
#[derive(Debug, Default)]
pub struct FunctionStats {
    /// Blocks in the layout
    pub block_count: usize,
    /// Attached instructions
    pub instruction_count: usize,
    /// Blocks not reachable from the entry
    pub unreachable_blocks: usize,
    /// Call instructions
    pub call_count: usize,
}

/// Verification error types
#[derive(Debug, Clone)]
pub enum VerifyError {
    /// Block does not end in a terminator.
    MissingTerminator {
        /// Block name
        block: String,
    },

    /// Terminator in the middle of a block.
    TerminatorNotLast {
        /// Block name
        block: String,
        /// Offending instruction
        inst: String,
    },

    /// Phi node after a non-phi instruction.
    PhiNotAtStart {
        /// Offending phi
        inst: String,
    },

    /// Instruction's recorded parent disagrees with the layout.
    ParentMismatch {
        /// Offending instruction
        inst: String,
    },

    /// Reference to a block of another function or a detached block.
    ForeignBlock {
        /// Referencing instruction
        inst: String,
        /// Referenced block
        target: String,
    },

    /// Operand defined in another function or detached.
    ForeignValue {
        /// Using instruction
        inst: String,
        /// Referenced value
        value: String,
    },

    /// Argument index beyond the parameter list.
    BadArgument {
        /// Using instruction
        inst: String,
        /// Argument index
        index: u32,
    },

    /// Phi incoming blocks differ from the block's predecessors.
    PhiPredecessorMismatch {
        /// Offending phi
        inst: String,
    },

    /// The entry block is a branch target.
    EntryHasPredecessors {
        /// Entry block name
        block: String,
    },

    /// A use is not dominated by its definition.
    UseNotDominated {
        /// Using instruction
        inst: String,
        /// Used value
        value: String,
    },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::MissingTerminator { block } => {
                write!(f, "Block {} has no terminator", block)
            }
            VerifyError::TerminatorNotLast { block, inst } => {
                write!(f, "Terminator {} is not last in block {}", inst, block)
            }
            VerifyError::PhiNotAtStart { inst } => {
                write!(f, "Phi {} follows a non-phi instruction", inst)
            }
            VerifyError::ParentMismatch { inst } => {
                write!(f, "Instruction {} records the wrong parent block", inst)
            }
            VerifyError::ForeignBlock { inst, target } => {
                write!(f, "{} references block {} outside its function", inst, target)
            }
            VerifyError::ForeignValue { inst, value } => {
                write!(f, "{} uses {} defined outside its function", inst, value)
            }
            VerifyError::BadArgument { inst, index } => {
                write!(f, "{} uses missing argument {}", inst, index)
            }
            VerifyError::PhiPredecessorMismatch { inst } => {
                write!(f, "Phi {} does not match its block's predecessors", inst)
            }
            VerifyError::EntryHasPredecessors { block } => {
                write!(f, "Entry block {} has predecessors", block)
            }
            VerifyError::UseNotDominated { inst, value } => {
                write!(f, "{} uses {} which does not dominate it", inst, value)
            }
        }
    }
}

/// IR function verifier
pub struct Verifier {
    /// Check def-use dominance
    check_dominance: bool,
    /// Strict mode (treat warnings as errors)
    strict: bool,
}

impl Verifier {
    /// Creates a verifier with dominance checking on and strict mode off
    pub fn new() -> Self {
        Self {
            check_dominance: true,
            strict: false,
        }
    }

    /// Enable strict mode
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Skip the dominance check
    pub fn structural_only(mut self) -> Self {
        self.check_dominance = false;
        self
    }

    /// Verify every defined function of a module
    pub fn verify_module(&self, module: &Module) -> Vec<(FuncId, VerifyResult)> {
        module
            .function_ids()
            .filter(|f| !module.function(*f).is_declaration())
            .map(|f| (f, self.verify(module, f)))
            .collect()
    }

    /// Verify one function
    pub fn verify(&self, module: &Module, func: FuncId) -> VerifyResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let function = module.function(func);

        let mut stats = FunctionStats {
            block_count: function.layout.len(),
            ..FunctionStats::default()
        };

        let owned_block = |block: BlockId| {
            let data = module.block(block);
            data.func == func && !data.detached
        };

        for &block in &function.layout {
            let data = module.block(block);
            let insts = &data.insts;
            stats.instruction_count += insts.len();

            match insts.last() {
                Some(last) if module.inst(*last).kind.is_terminator() => {}
                _ => errors.push(VerifyError::MissingTerminator {
                    block: data.name.clone(),
                }),
            }

            let mut past_phis = false;
            for (pos, &inst) in insts.iter().enumerate() {
                let kind = &module.inst(inst).kind;
                if module.inst(inst).block != Some(block) {
                    errors.push(VerifyError::ParentMismatch {
                        inst: describe(module, inst),
                    });
                }
                if kind.is_terminator() && pos + 1 != insts.len() {
                    errors.push(VerifyError::TerminatorNotLast {
                        block: data.name.clone(),
                        inst: describe(module, inst),
                    });
                }
                match kind {
                    InstKind::Phi { .. } if past_phis => {
                        errors.push(VerifyError::PhiNotAtStart {
                            inst: describe(module, inst),
                        })
                    }
                    InstKind::Phi { .. } => {}
                    InstKind::Call { .. } => {
                        stats.call_count += 1;
                        past_phis = true;
                    }
                    _ => past_phis = true,
                }

                for target in kind.successors() {
                    if !owned_block(target) {
                        errors.push(VerifyError::ForeignBlock {
                            inst: describe(module, inst),
                            target: module.block(target).name.clone(),
                        });
                    }
                }
                for op in kind.operands() {
                    match op {
                        Value::Inst(def) if module.inst_function(def) != Some(func) => {
                            errors.push(VerifyError::ForeignValue {
                                inst: describe(module, inst),
                                value: describe(module, def),
                            })
                        }
                        Value::Arg(index) if index as usize >= function.params.len() => {
                            errors.push(VerifyError::BadArgument {
                                inst: describe(module, inst),
                                index,
                            })
                        }
                        _ => {}
                    }
                }

                if let InstKind::Phi { incoming } = kind {
                    let mut from: Vec<BlockId> = incoming.iter().map(|(_, b)| *b).collect();
                    from.sort();
                    from.dedup();
                    let mut preds = module.predecessors(block);
                    preds.sort();
                    if from != preds || incoming.iter().any(|(_, b)| !owned_block(*b)) {
                        errors.push(VerifyError::PhiPredecessorMismatch {
                            inst: describe(module, inst),
                        });
                    }
                }
            }
        }

        if let Some(entry) = function.entry() {
            if !module.predecessors(entry).is_empty() {
                errors.push(VerifyError::EntryHasPredecessors {
                    block: module.block(entry).name.clone(),
                });
            }
        }

        // dominance is meaningless over broken references
        if errors.is_empty() && !function.is_declaration() {
            let dom = DominatorTree::compute(module, func);
            for &block in &function.layout {
                if !dom.is_reachable(block) {
                    stats.unreachable_blocks += 1;
                    warnings.push(format!(
                        "Block {} is unreachable from the entry",
                        module.block(block).name
                    ));
                }
            }
            if self.check_dominance {
                errors.extend(dominance_errors(module, func, &dom));
            }
        }

        let valid = errors.is_empty() && (!self.strict || warnings.is_empty());

        VerifyResult {
            valid,
            errors,
            warnings,
            stats,
        }
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

fn dominance_errors(module: &Module, func: FuncId, dom: &DominatorTree) -> Vec<VerifyError> {
    let mut errors = Vec::new();
    let positions: HashMap<InstId, (BlockId, usize)> = module
        .function(func)
        .layout
        .iter()
        .flat_map(|b| {
            module
                .block(*b)
                .insts
                .iter()
                .enumerate()
                .map(move |(pos, inst)| (*inst, (*b, pos)))
        })
        .collect();

    for (&user, &(block, pos)) in &positions {
        if !dom.is_reachable(block) {
            continue;
        }
        let kind = &module.inst(user).kind;
        let uses: Vec<(Value, BlockId, usize)> = match kind {
            // a phi operand is used at the end of its incoming block
            InstKind::Phi { incoming } => incoming
                .iter()
                .map(|(v, b)| (*v, *b, module.block(*b).insts.len()))
                .collect(),
            _ => kind
                .operands()
                .into_iter()
                .map(|v| (v, block, pos))
                .collect(),
        };
        for (value, use_block, use_pos) in uses {
            let Value::Inst(def) = value else {
                continue;
            };
            let Some(&(def_block, def_pos)) = positions.get(&def) else {
                continue;
            };
            if !dom.is_reachable(use_block) {
                continue;
            }
            let dominated = if def_block == use_block {
                def_pos < use_pos
            } else {
                dom.dominates(def_block, use_block)
            };
            if !dominated {
                errors.push(VerifyError::UseNotDominated {
                    inst: describe(module, user),
                    value: describe(module, def),
                });
            }
        }
    }
    errors.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    errors
}

/// Immediate dominators of the reachable blocks of a function
#[derive(Debug, Clone)]
pub struct DominatorTree {
    idom: HashMap<BlockId, BlockId>,
    order: HashMap<BlockId, usize>,
}

impl DominatorTree {
    /// Iterative dominator computation over reverse postorder
    /// (Cooper, Harvey and Kennedy)
    pub fn compute(module: &Module, func: FuncId) -> Self {
        let Some(entry) = module.function(func).entry() else {
            return Self {
                idom: HashMap::new(),
                order: HashMap::new(),
            };
        };

        let rpo = reverse_postorder(module, entry);
        let order: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in module.predecessors(block) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &order, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self { idom, order }
    }

    /// Whether `block` is reachable from the entry
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.order.contains_key(&block)
    }

    /// Immediate dominator; the entry is its own
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    /// Whether `a` dominates `b` (reflexive)
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom.get(&current) {
                Some(&parent) if parent != current => current = parent,
                _ => return false,
            }
        }
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    order: &HashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while order[&a] > order[&b] {
            a = idom[&a];
        }
        while order[&b] > order[&a] {
            b = idom[&b];
        }
    }
    a
}

fn reverse_postorder(module: &Module, entry: BlockId) -> Vec<BlockId> {
    let mut visited = HashSet::new();
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, 0usize)];
    visited.insert(entry);
    while let Some((block, next)) = stack.pop() {
        let succs = module.successors(block);
        if next < succs.len() {
            stack.push((block, next + 1));
            let succ = succs[next];
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
        }
    }
    postorder.reverse();
    postorder
}

/// Checks that every value and block referenced from `func` resolves
/// inside `func`
pub fn verify_containment(module: &Module, func: FuncId) -> Result<()> {
    let function = module.function(func);
    for inst in module.function_insts(func) {
        let kind = &module.inst(inst).kind;
        for op in kind.operands() {
            let escaped = match op {
                Value::Inst(def) => module.inst_function(def) != Some(func),
                Value::Arg(index) => index as usize >= function.params.len(),
                _ => false,
            };
            if escaped {
                return Err(Error::UseEscaped {
                    function: function.name.clone(),
                    user: describe(module, inst),
                    value: value_name(module, op),
                });
            }
        }
        let mut targets = kind.successors();
        if let InstKind::Phi { incoming } = kind {
            targets.extend(incoming.iter().map(|(_, b)| *b));
        }
        for target in targets {
            let data = module.block(target);
            if data.func != func || data.detached {
                return Err(Error::EdgeEscaped {
                    function: function.name.clone(),
                    block: describe(module, inst),
                    target: data.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Checks that nothing outside `blocks` still refers to them or to the
/// values they define
pub fn verify_detachable(module: &Module, func: FuncId, blocks: &HashSet<BlockId>) -> Result<()> {
    let function = module.function(func);
    for &block in &function.layout {
        if blocks.contains(&block) {
            continue;
        }
        for &inst in &module.block(block).insts {
            let kind = &module.inst(inst).kind;
            for op in kind.operands() {
                if let Value::Inst(def) = op {
                    if module.inst(def).block.is_some_and(|b| blocks.contains(&b)) {
                        return Err(Error::UseEscaped {
                            function: function.name.clone(),
                            user: describe(module, inst),
                            value: describe(module, def),
                        });
                    }
                }
            }
            let mut targets = kind.successors();
            if let InstKind::Phi { incoming } = kind {
                targets.extend(incoming.iter().map(|(_, b)| *b));
            }
            if let Some(target) = targets.into_iter().find(|t| blocks.contains(t)) {
                return Err(Error::EdgeEscaped {
                    function: function.name.clone(),
                    block: module.block(block).name.clone(),
                    target: module.block(target).name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn value_name(module: &Module, value: Value) -> String {
    match value {
        Value::Inst(id) => describe(module, id),
        Value::Arg(index) => format!("argument {}", index),
        other => format!("{:?}", other),
    }
}
