//! Behavioral equivalence of extracted modules
//!
//! Every fixture is interpreted before and after the pass with identical
//! memory contents. Results and final memory must match; the rewritten
//! module must additionally reach the owning cores through `call_on`.

mod common;

use common::*;
use dsm_extract::compiler::ir::{Builder, Module, Type, Value};
use dsm_extract::compiler::{ExtractorOptions, ExtractorPass};
use dsm_extract::runtime::{owning_core, Interpreter, InterpreterOptions};

fn extracted(module: &Module) -> Module {
    let mut rewritten = module.clone();
    ExtractorPass::new(ExtractorOptions::default())
        .run(&mut rewritten)
        .unwrap();
    rewritten
}

/// Runs `func` on both modules and returns the rewritten outcome
fn check(module: &Module, func: &str, cells: &[(u16, u64)], scalars: &[u64]) -> Outcome {
    let rewritten = extracted(module);
    let before = execute(module, func, cells, scalars);
    let after = execute(&rewritten, func, cells, scalars);
    assert!(before.remote_calls.is_empty());
    assert_eq!(before.result, after.result, "result of {}", func);
    assert_eq!(before.cells, after.cells, "memory after {}", func);
    after
}

fn cores(outcome: &Outcome) -> Vec<u16> {
    outcome.remote_calls.iter().map(|c| c.core).collect()
}

// =============================================================================
// STRAIGHT-LINE CODE
// =============================================================================

#[test]
fn test_single_load_runs_on_owner() {
    let mut module = module_with_primitives("single");
    single_load(&mut module);

    let after = check(&module, "single", &[(4, 42)], &[]);
    assert_eq!(after.result, Some(42));
    assert_eq!(cores(&after), vec![4]);
    assert_eq!(after.remote_calls[0].function, "single.d0");
    assert_eq!(after.remote_calls[0].exit_code, 0);
}

#[test]
fn test_field_loads_run_in_one_call() {
    let mut module = module_with_primitives("pair");
    two_field_loads(&mut module);

    let after = check(&module, "pair_sum", &[(2, 7)], &[]);
    assert_eq!(after.result, Some(28));
    assert_eq!(cores(&after), vec![2]);
}

#[test]
fn test_mid_block_exit_preserves_side_effects() {
    let mut module = module_with_primitives("observe");
    mid_block_exit(&mut module);

    let after = check(&module, "bump_observe", &[(3, 9)], &[]);
    assert_eq!(after.result, Some(30));
    assert_eq!(after.cells[0].0, 10);
    assert_eq!(cores(&after), vec![3]);
    assert_eq!(after.remote_calls[0].input_size, 8);
    assert_eq!(after.remote_calls[0].output_size, 8);
}

// =============================================================================
// CONTROL FLOW
// =============================================================================

#[test]
fn test_branch_visits_each_owner_on_its_path() {
    let mut module = module_with_primitives("branchy");
    branch_two_pointers(&mut module);

    let taken = check(&module, "branchy", &[(2, 5), (3, 11)], &[]);
    assert_eq!(taken.result, Some(11));
    assert_eq!(cores(&taken), vec![2, 3]);

    let skipped = check(&module, "branchy", &[(2, (-5i64) as u64), (3, 11)], &[]);
    assert_eq!(skipped.result, Some((-5i64) as u64));
    assert_eq!(cores(&skipped), vec![2]);
    assert_eq!(skipped.remote_calls[0].exit_code, 1);
}

#[test]
fn test_diamond_writes_back_on_owner() {
    let mut module = module_with_primitives("diamond");
    diamond(&mut module);

    let positive = check(&module, "diamond", &[(6, 10)], &[]);
    assert_eq!(positive.result, Some(11));
    assert_eq!(positive.cells[0].0, 11);
    assert_eq!(cores(&positive), vec![6]);

    let negative = check(&module, "diamond", &[(6, (-1i64) as u64)], &[]);
    assert_eq!(negative.result, Some(1));
    assert_eq!(negative.cells[0].0, 1);
}

#[test]
fn test_switch_merge_runs_in_one_call() {
    let mut module = module_with_primitives("switchy");
    switch_merge(&mut module);

    for (start, expected) in [(1, 11), (2, 22), (7, 7)] {
        let after = check(&module, "switchy", &[(5, start)], &[]);
        assert_eq!(after.result, Some(expected));
        assert_eq!(after.cells[0].0, expected);
        assert_eq!(cores(&after), vec![5]);
    }
}

#[test]
fn test_loop_makes_one_call_per_iteration() {
    let mut module = module_with_primitives("loop");
    accumulate_loop(&mut module);

    let after = check(&module, "accumulate", &[(1, 7)], &[4]);
    assert_eq!(after.result, Some(28));
    assert_eq!(cores(&after), vec![1; 4]);
    let codes: Vec<u64> = after.remote_calls.iter().map(|c| c.exit_code).collect();
    assert_eq!(codes, vec![0, 0, 0, 1]);
    // pointer plus three words in, two words out
    assert_eq!(after.remote_calls[0].input_size, 32);
    assert_eq!(after.remote_calls[0].output_size, 16);
}

// =============================================================================
// POINTERS PRODUCED BY REGIONS
// =============================================================================

#[test]
fn test_pointer_chase_follows_each_owner() {
    let mut module = module_with_primitives("chase");
    pointer_chase(&mut module);
    let rewritten = extracted(&module);

    let run = |module: &Module| {
        let mut interp = Interpreter::new(module, InterpreterOptions::default()).unwrap();
        let inner = interp.memory_mut().allocate_on(5, 8, 8).unwrap();
        interp.memory_mut().write(inner, 8, 99).unwrap();
        let outer = interp.memory_mut().allocate_on(2, 8, 8).unwrap();
        interp.memory_mut().write(outer, 8, inner).unwrap();
        assert_eq!(owning_core(inner), 5);
        let result = interp.call_by_name("chase", &[outer]).unwrap();
        let cores: Vec<u16> = interp.trace().iter().map(|c| c.core).collect();
        (result, cores)
    };

    let (before, no_calls) = run(&module);
    let (after, calls) = run(&rewritten);
    assert_eq!(before, Some(99));
    assert_eq!(after, before);
    assert!(no_calls.is_empty());
    assert_eq!(calls, vec![2, 5]);
}

#[test]
fn test_stack_region_runs_on_core_zero() {
    let mut module = module_with_primitives("stack");
    let (f, blocks) = task(&mut module, "local", vec![], Type::I64, &["entry"]);
    let mut b = Builder::new(&mut module, f);
    b.position_at_end(blocks[0]);
    let slot = b.alloca(Type::I64, "slot");
    b.store(Value::i64(5), slot);
    let v = b.load(Type::I64, slot, "v");
    b.ret(Some(v));

    let mut rewritten = module.clone();
    let options = ExtractorOptions {
        grow_stack_anchors: true,
        ..ExtractorOptions::default()
    };
    ExtractorPass::new(options).run(&mut rewritten).unwrap();

    let before = execute(&module, "local", &[], &[]);
    let after = execute(&rewritten, "local", &[], &[]);
    assert_eq!(before.result, Some(5));
    assert_eq!(after.result, Some(5));
    assert_eq!(cores(&after), vec![0]);
}
