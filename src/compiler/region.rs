//! # Candidate Region Growth
//!
//! Grows an anchor instruction into the largest connected set of
//! instructions that can run together on the core owning the anchor's
//! target pointer.
//!
//! Growth walks forward through blocks from a worklist of block-entry
//! points. A block whose every instruction is admitted becomes committed;
//! a successor is entered only when its first instruction is admitted and
//! all of its predecessors are committed, which keeps the region
//! single-entry. Successors blocked only by uncommitted predecessors go on
//! a retry list that is re-examined once the worklist drains, so merge
//! points are admitted when their last predecessor commits.

use super::ir::{FuncId, InstId, InstKind, Module, RootInfo, Value};
use super::provenance::provenance_of;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Region identifier, unique within one pass run
pub type RegionId = u64;

/// Per-run state shared by every component of the pass
#[derive(Debug, Default)]
pub struct PassContext {
    next_region_id: RegionId,
    candidate_map: HashMap<InstId, RegionId>,
}

impl PassContext {
    /// Fresh context for one pass run
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next region id
    pub fn next_region_id(&mut self) -> RegionId {
        let id = self.next_region_id;
        self.next_region_id += 1;
        id
    }

    /// Region owning `inst`, if any
    pub fn owner(&self, inst: InstId) -> Option<RegionId> {
        self.candidate_map.get(&inst).copied()
    }

    /// Records `region` as the owner of `inst`. Ownership is exclusive: an
    /// instruction already owned by another region keeps its owner and
    /// `false` is returned.
    pub fn claim(&mut self, inst: InstId, region: RegionId) -> bool {
        match self.candidate_map.get(&inst) {
            Some(owner) => *owner == region,
            None => {
                self.candidate_map.insert(inst, region);
                true
            }
        }
    }

    /// Every instruction owned by `region`
    pub fn owned_by(&self, region: RegionId) -> Vec<InstId> {
        let mut insts: Vec<InstId> = self
            .candidate_map
            .iter()
            .filter(|(_, owner)| **owner == region)
            .map(|(inst, _)| *inst)
            .collect();
        insts.sort();
        insts
    }
}

/// FIFO queue that accepts each element at most once over its lifetime
#[derive(Debug)]
pub struct UniqueQueue<T> {
    queue: VecDeque<T>,
    seen: HashSet<T>,
}

impl<T: Copy + Eq + std::hash::Hash> UniqueQueue<T> {
    /// Empty queue
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Enqueues `item` unless it was ever enqueued before
    pub fn push(&mut self, item: T) -> bool {
        if self.seen.insert(item) {
            self.queue.push_back(item);
            true
        } else {
            false
        }
    }

    /// Dequeues the oldest item
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    /// Returns true when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T: Copy + Eq + std::hash::Hash> Default for UniqueQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A relocatable region grown from an anchor
#[derive(Debug, Clone)]
pub struct CandidateRegion {
    /// Region id
    pub id: RegionId,
    /// Function containing the region
    pub func: FuncId,
    /// First instruction of the region
    pub entry: InstId,
    /// First out-of-region instruction on each leaving edge, mapped to the
    /// last in-region instruction on that edge
    pub exits: BTreeMap<InstId, InstId>,
    /// Pointer whose owning core executes the region
    pub target_ptr: Value,
    /// Roots whose accesses are certified safe inside the region
    pub valid_ptrs: HashSet<Value>,
    /// Instructions claimed during growth, in claim order
    pub members: Vec<InstId>,
}

impl CandidateRegion {
    /// Region seeded at `entry`, targeting `target_ptr`
    pub fn new(id: RegionId, func: FuncId, entry: InstId, target_ptr: Value) -> Self {
        let mut valid_ptrs = HashSet::new();
        valid_ptrs.insert(target_ptr);
        Self {
            id,
            func,
            entry,
            exits: BTreeMap::new(),
            target_ptr,
            valid_ptrs,
            members: Vec::new(),
        }
    }

    /// Whether `inst` can execute on the target core
    pub fn valid_in_region(&self, module: &Module, inst: InstId) -> bool {
        let kind = &module.inst(inst).kind;
        match kind {
            // control must return to the caller's dispatch, and stack slots
            // belong to the caller's frame
            InstKind::Ret { .. } | InstKind::Unreachable | InstKind::Alloca { .. } => {
                return false
            }
            _ => {}
        }
        if !may_access_memory(module, kind) {
            return true;
        }
        if let Some(root) = provenance_of(module, inst) {
            let info = RootInfo::of(module, self.func, root);
            return self.valid_ptrs.contains(&root) || info.is_core_independent();
        }
        match kind {
            InstKind::Call {
                callee: Value::Func(callee),
                ..
            } => {
                let attrs = &module.function(*callee).attrs;
                if attrs.unbound || attrs.no_memory {
                    return true;
                }
                debug!(
                    region = self.id,
                    inst = inst.0,
                    callee = %module.function(*callee).name,
                    "call without provenance or memory attributes"
                );
            }
            InstKind::Call { .. } => {
                debug!(region = self.id, inst = inst.0, "indirect call without provenance");
            }
            _ => {
                debug!(region = self.id, inst = inst.0, "memory access without provenance");
            }
        }
        false
    }

    /// Validity plus exclusive ownership
    fn admits(&self, module: &Module, ctx: &PassContext, inst: InstId) -> bool {
        if let Some(owner) = ctx.owner(inst) {
            if owner != self.id {
                debug!(
                    region = self.id,
                    owner,
                    inst = inst.0,
                    "instruction already owned by another region"
                );
                return false;
            }
        }
        self.valid_in_region(module, inst)
    }

    fn record_exit(&mut self, module: &Module, target: InstId, last: InstId) -> Result<()> {
        match self.exits.get(&target) {
            Some(existing) if *existing != last => Err(Error::ConflictingExit {
                region: self.id,
                target: describe(module, target),
                existing: describe(module, *existing),
                incoming: describe(module, last),
            }),
            _ => {
                self.exits.insert(target, last);
                Ok(())
            }
        }
    }

    /// Grows the region to its maximal extent, claiming every admitted
    /// instruction in `ctx`
    pub fn expand(&mut self, module: &Module, ctx: &mut PassContext) -> Result<()> {
        let mut worklist = UniqueQueue::new();
        worklist.push(self.entry);
        let mut committed = HashSet::new();
        let mut try_again = Vec::new();
        let entry_block = module.inst_block(self.entry)?;

        loop {
            while let Some(start) = worklist.pop() {
                let block = module.inst_block(start)?;
                let insts = &module.block(block).insts;
                let mut pos = module.inst_index(start)?;

                while pos < insts.len() && self.admits(module, ctx, insts[pos]) {
                    ctx.claim(insts[pos], self.id);
                    self.members.push(insts[pos]);
                    pos += 1;
                }

                if pos < insts.len() {
                    let Some(prev) = pos.checked_sub(1).map(|p| insts[p]) else {
                        return Err(Error::invalid_ir(format!(
                            "region {} cannot admit its own start {}",
                            self.id,
                            describe(module, start)
                        )));
                    };
                    self.record_exit(module, insts[pos], prev)?;
                    continue;
                }

                committed.insert(block);
                let last = insts[insts.len() - 1];
                for succ in module.successors(block) {
                    let Some(target) = module.first_inst(succ) else {
                        continue;
                    };
                    // the part of the entry block above the entry is never re-entered
                    let above_entry = succ == entry_block && target != self.entry;
                    let valid = !above_entry && self.admits(module, ctx, target);
                    let mut preds_committed = true;
                    if valid {
                        for pred in module.predecessors(succ) {
                            if !committed.contains(&pred) {
                                debug!(
                                    region = self.id,
                                    block = %module.block(succ).name,
                                    pred = %module.block(pred).name,
                                    "deferring block with uncommitted predecessor"
                                );
                                preds_committed = false;
                            }
                        }
                        if !preds_committed && !try_again.contains(&succ) {
                            try_again.push(succ);
                        }
                    }

                    if valid && preds_committed {
                        try_again.retain(|b| *b != succ);
                        worklist.push(target);
                    } else if !valid {
                        self.record_exit(module, target, last)?;
                    }
                }
            }

            let ready = try_again.iter().position(|block| {
                module
                    .predecessors(*block)
                    .iter()
                    .all(|pred| committed.contains(pred))
            });
            let Some(index) = ready else {
                break;
            };
            let block = try_again.remove(index);
            let Some(target) = module.first_inst(block) else {
                continue;
            };
            debug!(region = self.id, block = %module.block(block).name, "retrying deferred block");
            worklist.push(target);
        }

        // blocks still waiting on an outside predecessor are left through
        // every committed one
        for block in try_again {
            let Some(target) = module.first_inst(block) else {
                continue;
            };
            for pred in module.predecessors(block) {
                if !committed.contains(&pred) {
                    continue;
                }
                if let Some(last) = module.terminator(pred) {
                    self.record_exit(module, target, last)?;
                }
            }
        }

        Ok(())
    }

    /// Visits every region instruction reachable from the entry without
    /// crossing an exit, in walk order
    pub fn visit(&self, module: &Module, mut yield_inst: impl FnMut(InstId)) -> Result<()> {
        let mut queue = UniqueQueue::new();
        queue.push(self.entry);
        while let Some(start) = queue.pop() {
            let block = module.inst_block(start)?;
            let insts = &module.block(block).insts;
            let mut pos = module.inst_index(start)?;
            let mut stopped = false;
            while pos < insts.len() {
                if self.exits.contains_key(&insts[pos]) {
                    stopped = true;
                    break;
                }
                yield_inst(insts[pos]);
                pos += 1;
            }
            if !stopped {
                for succ in module.successors(block) {
                    if let Some(first) = module.first_inst(succ) {
                        queue.push(first);
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks that every visited instruction is owned by this region
    pub fn verify_ownership(&self, module: &Module, ctx: &PassContext) -> Result<()> {
        let mut mismatch = None;
        self.visit(module, |inst| {
            if mismatch.is_none() && ctx.owner(inst) != Some(self.id) {
                mismatch = Some(inst);
            }
        })?;
        match mismatch {
            Some(inst) => Err(Error::OwnershipMismatch {
                region: self.id,
                inst: describe(module, inst),
                owner: ctx.owner(inst),
            }),
            None => Ok(()),
        }
    }

    /// Applies the IR rewrites made by extracting an earlier region of the
    /// same function
    pub fn apply_relocation(&mut self, relocation: &Relocation) {
        if let Some((old_entry, new_entry)) = relocation.entry_forward {
            if let Some(before) = self.exits.remove(&old_entry) {
                self.exits.insert(new_entry, before);
            }
        }
        if let Some(replacement) = relocation.replaced.get(&self.target_ptr) {
            warn!(
                region = self.id,
                "target pointer was produced by an extracted region, using its reloaded copy"
            );
            self.target_ptr = *replacement;
        }
        self.valid_ptrs = self
            .valid_ptrs
            .iter()
            .map(|p| relocation.replaced.get(p).copied().unwrap_or(*p))
            .collect();
    }

    /// Logs a summary of the grown region
    pub fn log_header(&self, module: &Module) {
        debug!(
            region = self.id,
            function = %module.function(self.func).name,
            entry = %describe(module, self.entry),
            members = self.members.len(),
            exits = self.exits.len(),
            "candidate region"
        );
        for (target, last) in &self.exits {
            debug!(
                region = self.id,
                target = %describe(module, *target),
                from = %describe(module, *last),
                "exit"
            );
        }
    }
}

/// Rewrites performed by one extraction that later regions of the same
/// function must observe
#[derive(Debug, Clone, Default)]
pub struct Relocation {
    /// The extracted region's entry and the first instruction of the call
    /// block that replaced it
    pub entry_forward: Option<(InstId, InstId)>,
    /// Output values mapped to the values reloaded after the remote call
    pub replaced: HashMap<Value, Value>,
}

/// Whether executing `kind` may read or write memory
pub fn may_access_memory(module: &Module, kind: &InstKind) -> bool {
    match kind {
        InstKind::Load { .. } | InstKind::Store { .. } => true,
        InstKind::Call { callee, .. } => match callee {
            Value::Func(f) => !module.function(*f).attrs.no_memory,
            _ => true,
        },
        _ => false,
    }
}

/// Short printable form of an instruction for diagnostics
pub fn describe(module: &Module, inst: InstId) -> String {
    let data = module.inst(inst);
    let block = data
        .block
        .map(|b| module.block(b).name.clone())
        .unwrap_or_else(|| "<detached>".to_string());
    match &data.name {
        Some(name) => format!("%{} in {}", name, block),
        None => format!("%{} in {}", inst.0, block),
    }
}
