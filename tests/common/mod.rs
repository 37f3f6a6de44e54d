//! Shared IR fixtures and execution helpers for the integration tests

#![allow(dead_code)]

use dsm_extract::compiler::ir::{BlockId, Builder, CmpPred, FuncId, InstKind, Module, Type, Value};
use dsm_extract::compiler::{ExtractorOptions, RuntimePrimitives};
use dsm_extract::runtime::{Interpreter, InterpreterOptions, RemoteCall};

/// Module with the runtime primitives declared
pub fn module_with_primitives(name: &str) -> Module {
    let mut module = Module::new(name);
    RuntimePrimitives::declare(&mut module, &ExtractorOptions::default());
    module
}

/// Declares a task function with blocks named by `blocks`
pub fn task(module: &mut Module, name: &str, params: Vec<Type>, ret: Type, blocks: &[&str]) -> (FuncId, Vec<BlockId>) {
    let f = module.add_function(name, params, ret);
    module.function_mut(f).attrs.task = true;
    let ids = blocks.iter().map(|b| module.add_block(f, b)).collect();
    (f, ids)
}

/// Appends an incoming edge to an existing phi
pub fn add_incoming(module: &mut Module, phi: Value, value: Value, from: BlockId) {
    if let InstKind::Phi { incoming } = &mut module.inst_mut(phi.as_inst().unwrap()).kind {
        incoming.push((value, from));
    }
}

/// `i64 single(ptr addrspace(100) %p) { ret load %p }`
pub fn single_load(module: &mut Module) -> FuncId {
    let (f, blocks) = task(module, "single", vec![Type::global_ptr()], Type::I64, &["entry"]);
    let mut b = Builder::new(module, f);
    b.position_at_end(blocks[0]);
    let v = b.load(Type::I64, Value::Arg(0), "v");
    b.ret(Some(v));
    f
}

/// Sums both fields of a two-word record behind a global pointer
pub fn two_field_loads(module: &mut Module) -> FuncId {
    let pair = Type::Struct(vec![Type::I64, Type::I64]);
    let (f, blocks) = task(module, "pair_sum", vec![Type::global_ptr()], Type::I64, &["entry"]);
    let mut b = Builder::new(module, f);
    b.position_at_end(blocks[0]);
    let first = b.gep_inbounds(pair.clone(), Value::Arg(0), vec![Value::i32(0), Value::i32(0)], "first");
    let a = b.load(Type::I64, first, "a");
    let second = b.gep_inbounds(pair, Value::Arg(0), vec![Value::i32(0), Value::i32(1)], "second");
    let c = b.load(Type::I64, second, "c");
    let sum = b.add(a, c, "sum");
    b.ret(Some(sum));
    f
}

/// Loads through `%p`, then branches; only the `then` side reads `%q`
///
/// ```text
/// entry: v = load p; br v > 0, then, else
/// then:  w = load q; br join
/// else:  br join
/// join:  r = phi [w, then], [v, else]; ret r
/// ```
pub fn branch_two_pointers(module: &mut Module) -> FuncId {
    let (f, blocks) = task(
        module,
        "branchy",
        vec![Type::global_ptr(), Type::global_ptr()],
        Type::I64,
        &["entry", "then", "else", "join"],
    );
    let [entry, then, els, join] = [blocks[0], blocks[1], blocks[2], blocks[3]];
    let mut b = Builder::new(module, f);
    b.position_at_end(entry);
    let v = b.load(Type::I64, Value::Arg(0), "v");
    let positive = b.cmp(CmpPred::Sgt, v, Value::i64(0), "positive");
    b.cond_br(positive, then, els);
    b.position_at_end(then);
    let w = b.load(Type::I64, Value::Arg(1), "w");
    b.br(join);
    b.position_at_end(els);
    b.br(join);
    b.position_at_end(join);
    let r = b.phi(Type::I64, vec![(w, then), (v, els)], "r");
    b.ret(Some(r));
    f
}

/// Diamond whose arms both stay local to `%p`'s core
///
/// ```text
/// entry: v = load p; br v > 0, left, right
/// left:  a = v + 1; br join
/// right: c = v + 2; br join
/// join:  m = phi [a, left], [c, right]; store m, p; ret m
/// ```
pub fn diamond(module: &mut Module) -> FuncId {
    let (f, blocks) = task(
        module,
        "diamond",
        vec![Type::global_ptr()],
        Type::I64,
        &["entry", "left", "right", "join"],
    );
    let [entry, left, right, join] = [blocks[0], blocks[1], blocks[2], blocks[3]];
    let mut b = Builder::new(module, f);
    b.position_at_end(entry);
    let v = b.load(Type::I64, Value::Arg(0), "v");
    let positive = b.cmp(CmpPred::Sgt, v, Value::i64(0), "positive");
    b.cond_br(positive, left, right);
    b.position_at_end(left);
    let a = b.add(v, Value::i64(1), "a");
    b.br(join);
    b.position_at_end(right);
    let c = b.add(v, Value::i64(2), "c");
    b.br(join);
    b.position_at_end(join);
    let m = b.phi(Type::I64, vec![(a, left), (c, right)], "m");
    b.store(m, Value::Arg(0));
    b.ret(Some(m));
    f
}

/// Three-way switch whose arms rejoin before writing back
///
/// ```text
/// entry: v = load p; switch v [1 -> a, 2 -> b], default c
/// a:     x = v + 10; br join
/// b:     y = v + 20; br join
/// c:     br join
/// join:  m = phi [x, a], [y, b], [v, c]; store m, p; ret m
/// ```
pub fn switch_merge(module: &mut Module) -> FuncId {
    let (f, blocks) = task(
        module,
        "switchy",
        vec![Type::global_ptr()],
        Type::I64,
        &["entry", "a", "b", "c", "join"],
    );
    let [entry, a, bb, c, join] = [blocks[0], blocks[1], blocks[2], blocks[3], blocks[4]];
    let mut b = Builder::new(module, f);
    b.position_at_end(entry);
    let v = b.load(Type::I64, Value::Arg(0), "v");
    b.switch(v, c, vec![(1, a), (2, bb)]);
    b.position_at_end(a);
    let x = b.add(v, Value::i64(10), "x");
    b.br(join);
    b.position_at_end(bb);
    let y = b.add(v, Value::i64(20), "y");
    b.br(join);
    b.position_at_end(c);
    b.br(join);
    b.position_at_end(join);
    let m = b.phi(Type::I64, vec![(x, a), (y, bb), (v, c)], "m");
    b.store(m, Value::Arg(0));
    b.ret(Some(m));
    f
}

/// Diamond whose merge block starts with a load through a second pointer
pub fn diamond_foreign_merge(module: &mut Module) -> FuncId {
    let (f, blocks) = task(
        module,
        "foreign_merge",
        vec![Type::global_ptr(), Type::global_ptr()],
        Type::I64,
        &["entry", "left", "right", "join"],
    );
    let [entry, left, right, join] = [blocks[0], blocks[1], blocks[2], blocks[3]];
    let mut b = Builder::new(module, f);
    b.position_at_end(entry);
    let v = b.load(Type::I64, Value::Arg(0), "v");
    let positive = b.cmp(CmpPred::Sgt, v, Value::i64(0), "positive");
    b.cond_br(positive, left, right);
    b.position_at_end(left);
    b.br(join);
    b.position_at_end(right);
    b.br(join);
    b.position_at_end(join);
    let w = b.load(Type::I64, Value::Arg(1), "w");
    b.ret(Some(w));
    f
}

/// Sums `*p` over `n` iterations, reading `%p` on every iteration
///
/// ```text
/// entry:  br header
/// header: i = phi [0, entry], [i1, header]; acc = phi [0, entry], [acc1, header]
///         v = load p; acc1 = acc + v; i1 = i + 1; br i1 < n, header, exit
/// exit:   ret acc1
/// ```
pub fn accumulate_loop(module: &mut Module) -> FuncId {
    let (f, blocks) = task(
        module,
        "accumulate",
        vec![Type::global_ptr(), Type::I64],
        Type::I64,
        &["entry", "header", "exit"],
    );
    let [entry, header, exit] = [blocks[0], blocks[1], blocks[2]];
    let mut b = Builder::new(module, f);
    b.position_at_end(entry);
    b.br(header);
    b.position_at_end(header);
    let i = b.phi(Type::I64, vec![(Value::i64(0), entry)], "i");
    let acc = b.phi(Type::I64, vec![(Value::i64(0), entry)], "acc");
    let v = b.load(Type::I64, Value::Arg(0), "v");
    let acc1 = b.add(acc, v, "acc1");
    let i1 = b.add(i, Value::i64(1), "i1");
    let more = b.cmp(CmpPred::Slt, i1, Value::Arg(1), "more");
    b.cond_br(more, header, exit);
    b.position_at_end(exit);
    b.ret(Some(acc1));
    add_incoming(module, i, i1, header);
    add_incoming(module, acc, acc1, header);
    f
}

/// Increments `*p`, hands the new value to a helper, then returns it
///
/// The helper call has no memory attributes, so the region stops in the
/// middle of the entry block.
pub fn mid_block_exit(module: &mut Module) -> FuncId {
    let helper = module.add_function("observe", vec![Type::I64], Type::I64);
    let helper_entry = module.add_block(helper, "entry");
    let mut b = Builder::new(module, helper);
    b.position_at_end(helper_entry);
    let doubled = b.add(Value::Arg(0), Value::Arg(0), "doubled");
    b.ret(Some(doubled));

    let (f, blocks) = task(module, "bump_observe", vec![Type::global_ptr()], Type::I64, &["entry"]);
    let mut b = Builder::new(module, f);
    b.position_at_end(blocks[0]);
    let v = b.load(Type::I64, Value::Arg(0), "v");
    let next = b.add(v, Value::i64(1), "next");
    b.store(next, Value::Arg(0));
    let seen = b.call(helper, vec![next], "seen");
    let total = b.add(seen, next, "total");
    b.ret(Some(total));
    f
}

/// Follows a global pointer stored behind another global pointer
///
/// ```text
/// entry: q = load p          ; region 0, target p
///        x = load q          ; region 1, target q
///        ret x
/// ```
pub fn pointer_chase(module: &mut Module) -> FuncId {
    let (f, blocks) = task(module, "chase", vec![Type::global_ptr()], Type::I64, &["entry"]);
    let mut b = Builder::new(module, f);
    b.position_at_end(blocks[0]);
    let q = b.load(Type::global_ptr(), Value::Arg(0), "q");
    let x = b.load(Type::I64, q, "x");
    b.ret(Some(x));
    f
}

/// Result of one interpreted run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Returned value
    pub result: Option<u64>,
    /// Final contents of every cell, two words each
    pub cells: Vec<(u64, u64)>,
    /// Remote calls made during the run
    pub remote_calls: Vec<RemoteCall>,
}

/// Runs `func` with one two-word global cell per `(core, value)` entry,
/// passed as pointer arguments ahead of `scalars`
pub fn execute(module: &Module, func: &str, cells: &[(u16, u64)], scalars: &[u64]) -> Outcome {
    let mut interp = Interpreter::new(module, InterpreterOptions::default()).unwrap();
    let mut pointers = Vec::new();
    for &(core, value) in cells {
        let ptr = interp.memory_mut().allocate_on(core, 16, 8).unwrap();
        interp.memory_mut().write(ptr, 8, value).unwrap();
        interp.memory_mut().write(ptr + 8, 8, value.wrapping_mul(3)).unwrap();
        pointers.push(ptr);
    }
    let mut args = pointers.clone();
    args.extend_from_slice(scalars);
    let result = interp.call_by_name(func, &args).unwrap();
    let cells = pointers
        .iter()
        .map(|p| {
            (
                interp.memory().read(*p, 8).unwrap(),
                interp.memory().read(*p + 8, 8).unwrap(),
            )
        })
        .collect();
    Outcome {
        result,
        cells,
        remote_calls: interp.trace().to_vec(),
    }
}
