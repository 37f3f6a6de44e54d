//! # Region Extraction
//!
//! Moves a grown [`CandidateRegion`] into a new function and replaces it in
//! the original function with a remote call:
//!
//! ```text
//!   caller                                   new function (in, out) -> i16
//!   ──────                                   ─────────────────────────────
//!   store inputs -> in record                entry: load inputs from `in`
//!   core = resolve_owning_core(target)       <cloned region blocks>
//!   code = call_on(core, fn, in, out)          store outputs to `out`
//!   load outputs <- out record               exitN: br ret
//!   switch code -> original successors       ret:   phi [N, exitN] ; ret
//! ```
//!
//! The replacement is built completely and checked for containment before
//! the original region blocks are detached.

use super::ir::{
    BlockId, CastOp, FuncId, InstId, InstKind, IntWidth, Linkage, Module, Type, Value,
};
use super::region::{describe, CandidateRegion, Relocation};
use super::verifier;
use super::ExtractorOptions;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// The two runtime entry points extracted code is invoked through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimePrimitives {
    /// `resolve_owning_core(ptr addrspace(global)) -> i16`
    pub owning_core: FuncId,
    /// `call_on(core, fn, in, in_size, out, out_size) -> i16`
    pub call_on: FuncId,
}

impl RuntimePrimitives {
    /// Looks both primitives up by their configured symbol names
    pub fn find(module: &Module, options: &ExtractorOptions) -> Option<Self> {
        Some(Self {
            owning_core: module.function_by_name(&options.owning_core_symbol)?,
            call_on: module.function_by_name(&options.call_on_symbol)?,
        })
    }

    /// Declares both primitives with their canonical signatures
    pub fn declare(module: &mut Module, options: &ExtractorOptions) -> Self {
        let owning_core = module.function_by_name(&options.owning_core_symbol).unwrap_or_else(|| {
            module.add_function(&options.owning_core_symbol, vec![Type::global_ptr()], Type::I16)
        });
        let call_on = module.function_by_name(&options.call_on_symbol).unwrap_or_else(|| {
            module.add_function(
                &options.call_on_symbol,
                vec![
                    Type::I16,
                    Type::ptr(),
                    Type::ptr(),
                    Type::I64,
                    Type::ptr(),
                    Type::I64,
                ],
                Type::I16,
            )
        });
        Self {
            owning_core,
            call_on,
        }
    }
}

/// Insertion-ordered set of values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSet {
    items: Vec<Value>,
    index: HashSet<Value>,
}

impl ValueSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` unless present; returns whether it was new
    pub fn insert(&mut self, value: Value) -> bool {
        if self.index.insert(value) {
            self.items.push(value);
            true
        } else {
            false
        }
    }

    /// Membership test
    pub fn contains(&self, value: &Value) -> bool {
        self.index.contains(value)
    }

    /// Values in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Values in insertion order
    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }
}

/// Values crossing the region boundary
#[derive(Debug, Clone, Default)]
pub struct Frontier {
    /// Used inside, defined outside (parameters included)
    pub inputs: ValueSet,
    /// Defined inside, used outside
    pub outputs: ValueSet,
}

/// Result of extracting one region
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The new function
    pub function: FuncId,
    /// Block in the original function performing the remote call
    pub call_block: BlockId,
    /// Region inputs in record order
    pub inputs: Vec<Value>,
    /// Region outputs in record order
    pub outputs: Vec<Value>,
    /// Dispatch targets indexed by exit code
    pub exit_targets: Vec<BlockId>,
    /// Rewrites later regions of the same function must apply
    pub relocation: Relocation,
}

/// Splits blocks so the region entry and every exit target start a block,
/// then returns the region's blocks in layout order
pub fn normalize_boundaries(
    module: &mut Module,
    region: &CandidateRegion,
    tag: &str,
) -> Result<(BlockId, Vec<BlockId>)> {
    let mut bb_in = module.inst_block(region.entry)?;
    if module.first_inst(bb_in) != Some(region.entry) {
        bb_in = module.split_block(bb_in, region.entry, &format!("{}.eblk", tag))?;
    }

    let mut blocks = HashSet::new();
    blocks.insert(bb_in);
    for (&after, &before) in &region.exits {
        let bb_exit = module.inst_block(before)?;
        if module.inst_block(after)? == bb_exit {
            module.split_block(bb_exit, after, &format!("{}.exit", tag))?;
        }
        blocks.insert(bb_exit);
    }

    region.visit(module, |inst| {
        if let Some(block) = module.inst(inst).block {
            blocks.insert(block);
        }
    })?;

    let ordered = module
        .function(region.func)
        .layout
        .iter()
        .copied()
        .filter(|b| blocks.contains(b))
        .collect();
    Ok((bb_in, ordered))
}

/// Computes region inputs and outputs over a normalized region
pub fn compute_frontier(
    module: &Module,
    region: &CandidateRegion,
    blocks: &HashSet<BlockId>,
) -> Result<Frontier> {
    let in_region = |inst: InstId| {
        module
            .inst(inst)
            .block
            .is_some_and(|b| blocks.contains(&b))
    };
    let defined_in_caller = |value: Value| match value {
        Value::Arg(_) => true,
        Value::Inst(inst) => !in_region(inst),
        _ => false,
    };

    let mut users: HashMap<Value, Vec<InstId>> = HashMap::new();
    for inst in module.function_insts(region.func) {
        for op in module.inst(inst).kind.operands() {
            users.entry(op).or_default().push(inst);
        }
    }

    let mut order = Vec::new();
    region.visit(module, |inst| order.push(inst))?;

    let mut frontier = Frontier::default();
    for inst in order {
        for op in module.inst(inst).kind.operands() {
            if defined_in_caller(op) {
                frontier.inputs.insert(op);
            }
        }
        let value = Value::Inst(inst);
        if let Some(uses) = users.get(&value) {
            if uses.iter().any(|user| !in_region(*user)) {
                frontier.outputs.insert(value);
            }
        }
    }
    Ok(frontier)
}

/// Extracts `region` from its function into a new function invoked through
/// the runtime primitives
pub fn extract_region(
    module: &mut Module,
    region: &CandidateRegion,
    primitives: &RuntimePrimitives,
) -> Result<Extraction> {
    let old_fn = region.func;
    let tag = format!("d{}", region.id);
    debug!(region = region.id, target = ?region.target_ptr, "extracting region");

    // 1. boundaries
    let (bb_in, region_blocks) = normalize_boundaries(module, region, &tag)?;
    let block_set: HashSet<BlockId> = region_blocks.iter().copied().collect();

    // 2. frontier
    let frontier = compute_frontier(module, region, &block_set)?;
    let inputs = frontier.inputs.as_slice().to_vec();
    let outputs = frontier.outputs.as_slice().to_vec();

    // 3. marshaling records
    let in_ty = Type::Struct(inputs.iter().map(|v| module.value_type(old_fn, *v)).collect());
    let out_ty = Type::Struct(
        outputs
            .iter()
            .map(|v| module.value_type(old_fn, *v))
            .collect(),
    );

    // 4. new function shell and cloned body
    let name = module.unique_function_name(&format!(
        "{}.{}",
        module.function(old_fn).name,
        tag
    ));
    let new_fn = module.add_function(&name, vec![Type::ptr(), Type::ptr()], Type::I16);
    module.function_mut(new_fn).linkage = Linkage::Internal;
    let new_entry = module.add_block(new_fn, &format!("{}.entry", tag));

    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    for &bb in &region_blocks {
        let clone_name = format!("{}.clone", module.block(bb).name);
        block_map.insert(bb, module.add_block(new_fn, &clone_name));
    }
    let mut value_map: HashMap<Value, Value> = HashMap::new();
    for &bb in &region_blocks {
        for inst in module.block(bb).insts.clone() {
            let data = module.inst(inst).clone();
            let copy = module.append_inst(block_map[&bb], data.kind, data.ty, data.name);
            value_map.insert(Value::Inst(inst), Value::Inst(copy));
        }
    }

    for (i, input) in inputs.iter().enumerate() {
        let slot = module.append_inst(
            new_entry,
            record_field(&in_ty, Value::Arg(0), i),
            Type::ptr(),
            Some(format!("in.{}.addr", i)),
        );
        let ty = module.value_type(old_fn, *input);
        let loaded = module.append_inst(
            new_entry,
            InstKind::Load {
                ptr: Value::Inst(slot),
            },
            ty,
            Some(format!("in.{}", value_label(module, *input))),
        );
        value_map.insert(*input, Value::Inst(loaded));
    }
    module.append_inst(
        new_entry,
        InstKind::Br {
            dest: block_map[&bb_in],
        },
        Type::Void,
        None,
    );

    for &bb in &region_blocks {
        for inst in module.block(block_map[&bb]).insts.clone() {
            let kind = &mut module.inst_mut(inst).kind;
            for op in kind.operands_mut() {
                if let Some(mapped) = value_map.get(&*op) {
                    *op = *mapped;
                }
            }
            for target in kind.blocks_mut() {
                if let Some(mapped) = block_map.get(&*target) {
                    *target = *mapped;
                }
            }
        }
    }

    // exits: one stub per exit feeding the return selector
    let ret_block = module.add_block(new_fn, &format!("{}.ret", tag));
    let mut ret_incoming = Vec::new();
    let mut exit_edges = Vec::new();
    for (code, (&after, &before)) in region.exits.iter().enumerate() {
        let pred_old = module.inst_block(before)?;
        let target_old = module.inst_block(after)?;
        if module.first_inst(target_old) != Some(after) {
            return Err(Error::invalid_ir(format!(
                "exit target {} does not start a block",
                describe(module, after)
            )));
        }
        let pred_clone = *block_map.get(&pred_old).ok_or_else(|| {
            Error::invalid_ir(format!(
                "exit source {} lies outside the region",
                describe(module, before)
            ))
        })?;
        let stub = module.add_block(new_fn, &format!("{}.exit{}", tag, code));
        module.append_inst(stub, InstKind::Br { dest: ret_block }, Type::Void, None);
        let cloned_target = block_map.get(&target_old).copied().unwrap_or(target_old);
        module.replace_successor(pred_clone, cloned_target, stub);
        ret_incoming.push((exit_code(code), stub));
        exit_edges.push((pred_old, target_old));
    }
    if ret_incoming.is_empty() {
        module.append_inst(
            ret_block,
            InstKind::Ret {
                value: Some(exit_code(0)),
            },
            Type::Void,
            None,
        );
    } else {
        let selector = module.append_inst(
            ret_block,
            InstKind::Phi {
                incoming: ret_incoming,
            },
            Type::I16,
            Some("ret.phi".to_string()),
        );
        module.append_inst(
            ret_block,
            InstKind::Ret {
                value: Some(Value::Inst(selector)),
            },
            Type::Void,
            None,
        );
    }

    // 5. capture outputs at the end of their defining cloned block
    for (i, output) in outputs.iter().enumerate() {
        let cloned = value_map
            .get(output)
            .and_then(|v| v.as_inst())
            .ok_or_else(|| Error::invalid_ir("output was not cloned".to_string()))?;
        let block = module.inst_block(cloned)?;
        let slot = module.insert_before_terminator(
            block,
            record_field(&out_ty, Value::Arg(1), i),
            Type::ptr(),
            Some(format!("out.{}.addr", i)),
        );
        module.insert_before_terminator(
            block,
            InstKind::Store {
                value: Value::Inst(cloned),
                ptr: Value::Inst(slot),
            },
            Type::Void,
            None,
        );
    }

    // 6. call site in the original function
    let bb_call = module.add_block_before(old_fn, &format!("{}.call", tag), bb_in);
    let external_preds: Vec<BlockId> = module
        .predecessors(bb_in)
        .into_iter()
        .filter(|b| !block_set.contains(b))
        .collect();
    for pred in external_preds {
        module.replace_successor(pred, bb_in, bb_call);
    }

    let mut alloca_block = module
        .function(old_fn)
        .entry()
        .ok_or_else(|| Error::invalid_ir("function lost its entry block".to_string()))?;
    if alloca_block == bb_call {
        alloca_block = module.add_block_before(old_fn, &format!("{}.prologue", tag), bb_call);
        module.append_inst(alloca_block, InstKind::Br { dest: bb_call }, Type::Void, None);
    }
    let in_record = Value::Inst(module.insert_inst(
        alloca_block,
        0,
        InstKind::Alloca { ty: in_ty.clone() },
        Type::ptr(),
        Some(format!("{}.struct.in", tag)),
    ));
    let out_record = Value::Inst(module.insert_inst(
        alloca_block,
        1,
        InstKind::Alloca { ty: out_ty.clone() },
        Type::ptr(),
        Some(format!("{}.struct.out", tag)),
    ));

    for (i, input) in inputs.iter().enumerate() {
        let slot = module.append_inst(
            bb_call,
            record_field(&in_ty, in_record, i),
            Type::ptr(),
            Some(format!("{}.gep.in", tag)),
        );
        module.append_inst(
            bb_call,
            InstKind::Store {
                value: *input,
                ptr: Value::Inst(slot),
            },
            Type::Void,
            None,
        );
    }

    let mut target = region.target_ptr;
    if module.value_type(old_fn, target) != Type::global_ptr() {
        target = Value::Inst(module.append_inst(
            bb_call,
            InstKind::Cast {
                op: CastOp::AddrSpaceCast,
                value: target,
            },
            Type::global_ptr(),
            Some(format!("{}.target", tag)),
        ));
    }
    let core_ty = module.function(primitives.owning_core).ret.clone();
    let core = Value::Inst(module.append_inst(
        bb_call,
        InstKind::Call {
            callee: Value::Func(primitives.owning_core),
            args: vec![target],
        },
        core_ty,
        Some(format!("{}.target_core", tag)),
    ));
    let code_ty = module.function(primitives.call_on).ret.clone();
    let code = Value::Inst(module.append_inst(
        bb_call,
        InstKind::Call {
            callee: Value::Func(primitives.call_on),
            args: vec![
                core,
                Value::Func(new_fn),
                in_record,
                Value::i64(in_ty.size() as i64),
                out_record,
                Value::i64(out_ty.size() as i64),
            ],
        },
        code_ty,
        Some(format!("{}.call_on", tag)),
    ));

    // 8. reload outputs after the call
    let mut relocation = Relocation::default();
    for (i, output) in outputs.iter().enumerate() {
        let slot = module.append_inst(
            bb_call,
            record_field(&out_ty, out_record, i),
            Type::ptr(),
            Some(format!("{}.gep.out", tag)),
        );
        let ty = module.value_type(old_fn, *output);
        let reloaded = module.append_inst(
            bb_call,
            InstKind::Load {
                ptr: Value::Inst(slot),
            },
            ty,
            Some(format!("out.{}", value_label(module, *output))),
        );
        relocation.replaced.insert(*output, Value::Inst(reloaded));
    }

    // 7. dispatch on the exit code
    let bad_exit = module.add_block(old_fn, &format!("{}.bad_exit", tag));
    module.append_inst(bad_exit, InstKind::Unreachable, Type::Void, None);
    let mut cases = Vec::new();
    let mut exit_targets = Vec::new();
    for (code_index, (pred_old, target_old)) in exit_edges.iter().enumerate() {
        let dispatch = if block_set.contains(target_old) {
            // loop back into the region entry: run the relocated body again
            bb_call
        } else {
            module.retarget_phis(*target_old, *pred_old, bb_call);
            *target_old
        };
        cases.push((code_index as i64, dispatch));
        exit_targets.push(dispatch);
    }
    module.append_inst(
        bb_call,
        InstKind::Switch {
            value: code,
            default: bad_exit,
            cases,
        },
        Type::Void,
        None,
    );

    let outside: HashSet<InstId> = module
        .function_insts(old_fn)
        .into_iter()
        .filter(|inst| {
            module
                .inst(*inst)
                .block
                .is_some_and(|b| !block_set.contains(&b))
        })
        .collect();
    for (output, reloaded) in &relocation.replaced {
        module.replace_uses_in(old_fn, *output, *reloaded, |inst| outside.contains(&inst));
    }
    for inst in &outside {
        let annotated = module.inst(*inst).provenance;
        if let Some(replacement) = annotated.and_then(|p| relocation.replaced.get(&p)) {
            module.inst_mut(*inst).provenance = Some(*replacement);
        }
    }
    relocation.entry_forward = module
        .first_inst(bb_call)
        .map(|first| (region.entry, first));

    // 9. validate, then unlink the original region
    verifier::verify_containment(module, new_fn)?;
    verifier::verify_detachable(module, old_fn, &block_set)?;
    for &bb in &region_blocks {
        module.detach_block(bb);
    }

    info!(
        region = region.id,
        function = %module.function(old_fn).name,
        extracted = %module.function(new_fn).name,
        inputs = inputs.len(),
        outputs = outputs.len(),
        exits = exit_targets.len(),
        "extracted region"
    );

    Ok(Extraction {
        function: new_fn,
        call_block: bb_call,
        inputs,
        outputs,
        exit_targets,
        relocation,
    })
}

fn exit_code(code: usize) -> Value {
    Value::int(IntWidth::I16, code as i64)
}

fn record_field(record_ty: &Type, record: Value, index: usize) -> InstKind {
    InstKind::Gep {
        base: record,
        source_ty: record_ty.clone(),
        indices: vec![Value::i32(0), Value::i32(index as i64)],
        in_bounds: true,
    }
}

fn value_label(module: &Module, value: Value) -> String {
    match value {
        Value::Inst(id) => module
            .inst(id)
            .name
            .clone()
            .unwrap_or_else(|| id.0.to_string()),
        Value::Arg(i) => format!("arg{}", i),
        other => format!("{:?}", other),
    }
}
