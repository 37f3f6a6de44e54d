use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dsm_extract::compiler::ir::{Builder, Module, Type, Value};
use dsm_extract::compiler::{ExtractorOptions, ExtractorPass, RuntimePrimitives};
use dsm_extract::runtime::{Interpreter, InterpreterOptions};

/// Chain of `width` blocks, each updating its own global pointer
fn ladder(width: usize) -> Module {
    let mut module = Module::new("ladder");
    RuntimePrimitives::declare(&mut module, &ExtractorOptions::default());
    let f = module.add_function("ladder", vec![Type::global_ptr(); width], Type::I64);
    module.function_mut(f).attrs.task = true;
    let blocks: Vec<_> = (0..=width)
        .map(|i| module.add_block(f, &format!("step{}", i)))
        .collect();

    let mut b = Builder::new(&mut module, f);
    let mut acc = Value::i64(0);
    for i in 0..width {
        b.position_at_end(blocks[i]);
        let v = b.load(Type::I64, Value::Arg(i as u32), "v");
        let next = b.add(acc, v, "acc");
        b.store(next, Value::Arg(i as u32));
        acc = next;
        b.br(blocks[i + 1]);
    }
    b.position_at_end(blocks[width]);
    b.ret(Some(acc));
    module
}

fn extraction_benchmark(c: &mut Criterion) {
    let module = ladder(32);
    c.bench_function("extract 32 regions", |b| {
        b.iter(|| {
            let mut module = black_box(&module).clone();
            ExtractorPass::new(ExtractorOptions::default())
                .run(&mut module)
                .unwrap()
        })
    });
}

fn interpreter_benchmark(c: &mut Criterion) {
    let mut module = ladder(8);
    ExtractorPass::new(ExtractorOptions::default())
        .run(&mut module)
        .unwrap();

    c.bench_function("interpret extracted ladder", |b| {
        b.iter(|| {
            let mut interp = Interpreter::new(&module, InterpreterOptions::default()).unwrap();
            let args: Vec<u64> = (0..8u16)
                .map(|core| {
                    let ptr = interp.memory_mut().allocate_on(core, 8, 8).unwrap();
                    interp.memory_mut().write(ptr, 8, core as u64).unwrap();
                    ptr
                })
                .collect();
            interp.call_by_name("ladder", black_box(&args)).unwrap()
        })
    });
}

criterion_group!(benches, extraction_benchmark, interpreter_benchmark);
criterion_main!(benches);
