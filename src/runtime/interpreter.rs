//! Reference interpreter for IR functions
//!
//! Executes functions over a flat [`Memory`] with every value held as a
//! `u64` masked to its type's width. The two runtime primitives are served
//! locally: `resolve_owning_core` decodes the core bits of a global-space
//! pointer and `call_on` runs the relocated function to completion on the
//! calling thread, recording a [`RemoteCall`] for each invocation.

use super::memory::{owning_core, Memory};
use super::InterpreterOptions;
use crate::compiler::ir::{
    BinOp, BlockId, CastOp, CmpPred, ConstExpr, FuncId, GlobalId, InstId, InstKind, Module, Type,
    Value,
};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use tracing::trace;

const FUNCTION_TAG: u64 = 1 << 63;

/// One invocation of the `call_on` primitive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCall {
    /// Core the call was directed to
    pub core: u16,
    /// Invoked function
    pub function: String,
    /// Size of the input record in bytes
    pub input_size: u64,
    /// Size of the output record in bytes
    pub output_size: u64,
    /// Exit code returned by the function
    pub exit_code: u64,
}

enum Flow {
    Continue,
    Jump(BlockId),
    Return(Option<u64>),
}

struct Frame {
    func: FuncId,
    args: Vec<u64>,
    values: HashMap<InstId, u64>,
}

/// IR interpreter over one module
pub struct Interpreter<'m> {
    module: &'m Module,
    options: InterpreterOptions,
    memory: Memory,
    globals: Vec<u64>,
    steps: u64,
    depth: usize,
    trace: Vec<RemoteCall>,
}

impl<'m> Interpreter<'m> {
    /// Creates an interpreter and lays out the module's global variables
    pub fn new(module: &'m Module, options: InterpreterOptions) -> Result<Self> {
        let mut memory = Memory::new(options.memory_limit);
        let mut globals = Vec::with_capacity(module.globals.len());
        for global in &module.globals {
            let size = global.ty.size();
            let address = memory.allocate(size, global.ty.align())?;
            let init = &global.init[..global.init.len().min(size as usize)];
            memory.write_bytes(address, init)?;
            globals.push(address);
        }
        Ok(Self {
            module,
            options,
            memory,
            globals,
            steps: 0,
            depth: 0,
            trace: Vec::new(),
        })
    }

    /// Memory state
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Mutable memory state, for setting up arguments
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Address of a global variable
    pub fn global_address(&self, global: GlobalId) -> u64 {
        self.globals[global.0 as usize]
    }

    /// Remote calls made so far, in call order
    pub fn trace(&self) -> &[RemoteCall] {
        &self.trace
    }

    /// Instructions executed so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Calls a function by symbol name
    pub fn call_by_name(&mut self, name: &str, args: &[u64]) -> Result<Option<u64>> {
        let func = self
            .module
            .function_by_name(name)
            .ok_or_else(|| Error::UnknownFunction {
                name: name.to_string(),
            })?;
        self.call(func, args)
    }

    /// Calls a function with raw argument words
    pub fn call(&mut self, func: FuncId, args: &[u64]) -> Result<Option<u64>> {
        let module = self.module;
        let function = module.function(func);

        if function.name == self.options.owning_core_symbol {
            let [pointer] = args else {
                return Err(arity_error(&function.name, 1, args.len()));
            };
            return Ok(Some(owning_core(*pointer) as u64));
        }
        if function.name == self.options.call_on_symbol {
            return self.call_on(args).map(Some);
        }
        if function.is_declaration() {
            return Err(Error::UnknownFunction {
                name: function.name.clone(),
            });
        }
        if args.len() != function.params.len() {
            return Err(arity_error(&function.name, function.params.len(), args.len()));
        }
        if self.depth >= self.options.max_call_depth {
            return Err(Error::runtime(format!(
                "call depth exceeded ({}) calling {}",
                self.options.max_call_depth, function.name
            )));
        }

        self.depth += 1;
        let result = self.execute(func, args.to_vec());
        self.depth -= 1;
        result
    }

    fn call_on(&mut self, args: &[u64]) -> Result<u64> {
        let [target_core, target, input, input_size, output, output_size] = args else {
            return Err(arity_error(&self.options.call_on_symbol, 6, args.len()));
        };
        if target & FUNCTION_TAG == 0 {
            return Err(Error::runtime(format!(
                "call_on target 0x{:x} is not a function",
                target
            )));
        }
        let func = FuncId((target & !FUNCTION_TAG) as u32);
        let slot = self.trace.len();
        self.trace.push(RemoteCall {
            core: *target_core as u16,
            function: self.module.function(func).name.clone(),
            input_size: *input_size,
            output_size: *output_size,
            exit_code: 0,
        });
        trace!(core = *target_core, function = %self.trace[slot].function, "remote call");
        let code = self.call(func, &[*input, *output])?.unwrap_or(0);
        self.trace[slot].exit_code = code;
        Ok(code)
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.options.max_steps {
            return Err(Error::ExecutionLimitExceeded {
                limit: self.options.max_steps,
            });
        }
        Ok(())
    }

    fn execute(&mut self, func: FuncId, args: Vec<u64>) -> Result<Option<u64>> {
        let module = self.module;
        let mut frame = Frame {
            func,
            args,
            values: HashMap::new(),
        };
        let mut block = module
            .function(func)
            .entry()
            .ok_or_else(|| Error::runtime("function has no entry block"))?;
        let mut pred: Option<BlockId> = None;

        loop {
            let insts = &module.block(block).insts;

            // phis read their inputs before any of them is written
            let mut incoming_values = Vec::new();
            let mut pos = 0;
            while let Some(&inst) = insts.get(pos) {
                let InstKind::Phi { incoming } = &module.inst(inst).kind else {
                    break;
                };
                self.tick()?;
                let from = pred.ok_or_else(|| Error::runtime("phi in entry block"))?;
                let (value, _) = incoming
                    .iter()
                    .find(|(_, b)| *b == from)
                    .ok_or_else(|| {
                        Error::runtime(format!(
                            "phi in {} has no incoming value for {}",
                            module.block(block).name,
                            module.block(from).name
                        ))
                    })?;
                incoming_values.push((inst, self.eval(&frame, *value)?));
                pos += 1;
            }
            frame.values.extend(incoming_values);

            let mut next = None;
            for &inst in &insts[pos..] {
                self.tick()?;
                match self.step(&mut frame, inst)? {
                    Flow::Continue => {}
                    Flow::Jump(target) => {
                        next = Some(target);
                        break;
                    }
                    Flow::Return(value) => return Ok(value),
                }
            }
            let Some(next) = next else {
                return Err(Error::runtime(format!(
                    "block {} has no terminator",
                    module.block(block).name
                )));
            };
            pred = Some(block);
            block = next;
        }
    }

    fn step(&mut self, frame: &mut Frame, inst: InstId) -> Result<Flow> {
        let module = self.module;
        let data = module.inst(inst);
        let result = match &data.kind {
            InstKind::Alloca { ty } => self.memory.allocate(ty.size(), ty.align())?,
            InstKind::Load { ptr } => {
                scalar(&data.ty)?;
                let address = self.eval(frame, *ptr)?;
                self.memory.read(address, data.ty.size())?
            }
            InstKind::Store { value, ptr } => {
                let ty = module.value_type(frame.func, *value);
                scalar(&ty)?;
                let v = self.eval(frame, *value)?;
                let address = self.eval(frame, *ptr)?;
                self.memory.write(address, ty.size(), v)?;
                return Ok(Flow::Continue);
            }
            InstKind::Gep {
                base,
                source_ty,
                indices,
                ..
            } => {
                let base = self.eval(frame, *base)?;
                let indices = indices
                    .iter()
                    .map(|i| self.eval_signed(frame, *i))
                    .collect::<Result<Vec<_>>>()?;
                gep_address(base, source_ty, &indices)?
            }
            InstKind::Cast { op, value } => {
                let from = module.value_type(frame.func, *value);
                let v = self.eval(frame, *value)?;
                convert(*op, v, &from, &data.ty)
            }
            InstKind::Binary { op, lhs, rhs } => {
                let bits = bit_width(&data.ty);
                let l = self.eval(frame, *lhs)?;
                let r = self.eval(frame, *rhs)?;
                binary(*op, l, r, bits)?
            }
            InstKind::Cmp { pred, lhs, rhs } => {
                let bits = bit_width(&module.value_type(frame.func, *lhs));
                let l = self.eval(frame, *lhs)?;
                let r = self.eval(frame, *rhs)?;
                compare(*pred, l, r, bits) as u64
            }
            InstKind::Phi { .. } => {
                return Err(Error::runtime("phi after a non-phi instruction"));
            }
            InstKind::Call { callee, args } => {
                let target = self.resolve_callee(frame, *callee)?;
                let argv = args
                    .iter()
                    .map(|a| self.eval(frame, *a))
                    .collect::<Result<Vec<_>>>()?;
                let returned = self.call(target, &argv)?;
                if data.ty == Type::Void {
                    return Ok(Flow::Continue);
                }
                returned.unwrap_or(0)
            }
            InstKind::Br { dest } => return Ok(Flow::Jump(*dest)),
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            } => {
                let taken = self.eval(frame, *cond)? & 1 == 1;
                return Ok(Flow::Jump(if taken { *then_dest } else { *else_dest }));
            }
            InstKind::Switch {
                value,
                default,
                cases,
            } => {
                let v = self.eval_signed(frame, *value)?;
                let dest = cases
                    .iter()
                    .find(|(case, _)| *case == v)
                    .map(|(_, b)| *b)
                    .unwrap_or(*default);
                return Ok(Flow::Jump(dest));
            }
            InstKind::Ret { value } => {
                let value = value.map(|v| self.eval(frame, v)).transpose()?;
                return Ok(Flow::Return(value));
            }
            InstKind::Unreachable => {
                return Err(Error::Unreachable {
                    function: module.function(frame.func).name.clone(),
                });
            }
        };
        frame.values.insert(inst, truncate(&data.ty, result));
        Ok(Flow::Continue)
    }

    fn resolve_callee(&self, frame: &Frame, callee: Value) -> Result<FuncId> {
        match callee {
            Value::Func(func) => Ok(func),
            other => {
                let pointer = self.eval(frame, other)?;
                if pointer & FUNCTION_TAG == 0 {
                    return Err(Error::runtime(format!(
                        "indirect call through non-function 0x{:x}",
                        pointer
                    )));
                }
                Ok(FuncId((pointer & !FUNCTION_TAG) as u32))
            }
        }
    }

    fn eval(&self, frame: &Frame, value: Value) -> Result<u64> {
        match value {
            Value::Inst(id) => frame.values.get(&id).copied().ok_or_else(|| {
                Error::runtime(format!("use of %{} before its definition", id.0))
            }),
            Value::Arg(index) => frame
                .args
                .get(index as usize)
                .copied()
                .ok_or_else(|| Error::runtime(format!("missing argument {}", index))),
            Value::Global(id) => Ok(self.global_address(id)),
            Value::Func(id) => Ok(FUNCTION_TAG | id.0 as u64),
            Value::ConstInt(width, v) => Ok(v as u64 & width.mask()),
            Value::Null(_) => Ok(0),
            Value::Expr(id) => match self.module.expr(id) {
                ConstExpr::Gep {
                    base,
                    source_ty,
                    indices,
                    ..
                } => {
                    let base = self.eval(frame, *base)?;
                    let indices = indices
                        .iter()
                        .map(|i| self.eval_signed(frame, *i))
                        .collect::<Result<Vec<_>>>()?;
                    gep_address(base, source_ty, &indices)
                }
                ConstExpr::Cast { op, value, to } => {
                    let from = self.module.value_type(frame.func, *value);
                    let v = self.eval(frame, *value)?;
                    Ok(truncate(to, convert(*op, v, &from, to)))
                }
            },
        }
    }

    fn eval_signed(&self, frame: &Frame, value: Value) -> Result<i64> {
        let bits = bit_width(&self.module.value_type(frame.func, value));
        Ok(sign_extend(self.eval(frame, value)?, bits))
    }
}

fn arity_error(name: &str, expected: usize, got: usize) -> Error {
    Error::runtime(format!(
        "{} expects {} arguments, got {}",
        name, expected, got
    ))
}

fn scalar(ty: &Type) -> Result<()> {
    if ty.is_scalar() {
        Ok(())
    } else {
        Err(Error::runtime(format!("memory access of aggregate type {}", ty)))
    }
}

fn bit_width(ty: &Type) -> u32 {
    ty.int_width().map(|w| w.bits()).unwrap_or(64)
}

fn truncate(ty: &Type, value: u64) -> u64 {
    match ty.int_width() {
        Some(width) => value & width.mask(),
        None => value,
    }
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn gep_address(base: u64, source_ty: &Type, indices: &[i64]) -> Result<u64> {
    let Some((first, rest)) = indices.split_first() else {
        return Ok(base);
    };
    let mut address = base.wrapping_add(first.wrapping_mul(source_ty.size() as i64) as u64);
    let mut ty = source_ty;
    for &index in rest {
        match ty {
            Type::Struct(_) => {
                let offset = ty.field_offset(index as usize).ok_or_else(|| {
                    Error::runtime(format!("field {} out of range for {}", index, ty))
                })?;
                address = address.wrapping_add(offset);
            }
            Type::Array(elem, _) => {
                address = address.wrapping_add(index.wrapping_mul(elem.size() as i64) as u64);
            }
            other => {
                return Err(Error::runtime(format!("cannot index into {}", other)));
            }
        }
        ty = ty
            .element(index as u64)
            .ok_or_else(|| Error::runtime(format!("cannot index into {}", ty)))?;
    }
    Ok(address)
}

fn convert(op: CastOp, value: u64, from: &Type, to: &Type) -> u64 {
    match op {
        CastOp::SExt => sign_extend(value, bit_width(from)) as u64 & low_mask(bit_width(to)),
        CastOp::ZExt => value & low_mask(bit_width(from)),
        CastOp::Trunc => value & low_mask(bit_width(to)),
        CastOp::Bitcast | CastOp::AddrSpaceCast | CastOp::PtrToInt | CastOp::IntToPtr => value,
    }
}

fn binary(op: BinOp, l: u64, r: u64, bits: u32) -> Result<u64> {
    let mask = low_mask(bits);
    let value = match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::SDiv | BinOp::SRem => {
            let (a, b) = (sign_extend(l, bits), sign_extend(r, bits));
            if b == 0 {
                return Err(Error::runtime("division by zero"));
            }
            if op == BinOp::SDiv {
                a.wrapping_div(b) as u64
            } else {
                a.wrapping_rem(b) as u64
            }
        }
        BinOp::And => l & r,
        BinOp::Or => l | r,
        BinOp::Xor => l ^ r,
        BinOp::Shl => l.wrapping_shl((r % bits as u64) as u32),
        BinOp::LShr => (l & mask) >> (r % bits as u64),
    };
    Ok(value & mask)
}

fn compare(pred: CmpPred, l: u64, r: u64, bits: u32) -> bool {
    let (sl, sr) = (sign_extend(l, bits), sign_extend(r, bits));
    match pred {
        CmpPred::Eq => l == r,
        CmpPred::Ne => l != r,
        CmpPred::Slt => sl < sr,
        CmpPred::Sle => sl <= sr,
        CmpPred::Sgt => sl > sr,
        CmpPred::Sge => sl >= sr,
        CmpPred::Ult => (l & low_mask(bits)) < (r & low_mask(bits)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::extract::RuntimePrimitives;
    use crate::compiler::ir::{AddressSpace, Builder, IntWidth};
    use crate::compiler::ExtractorOptions;

    fn sum_to(module: &mut Module) -> FuncId {
        let f = module.add_function("sum_to", vec![Type::I64], Type::I64);
        let entry = module.add_block(f, "entry");
        let header = module.add_block(f, "header");
        let exit = module.add_block(f, "exit");
        let mut b = Builder::new(module, f);
        b.position_at_end(entry);
        b.br(header);
        b.position_at_end(header);
        let i = b.phi(Type::I64, vec![(Value::i64(0), entry)], "i");
        let acc = b.phi(Type::I64, vec![(Value::i64(0), entry)], "acc");
        let next_i = b.add(i, Value::i64(1), "next_i");
        let next_acc = b.add(acc, next_i, "next_acc");
        let done = b.cmp(CmpPred::Sge, next_i, Value::Arg(0), "done");
        b.cond_br(done, exit, header);
        b.position_at_end(exit);
        b.ret(Some(next_acc));
        for (phi, next) in [(i, next_i), (acc, next_acc)] {
            if let InstKind::Phi { incoming } = &mut module.inst_mut(phi.as_inst().unwrap()).kind {
                incoming.push((next, header));
            }
        }
        f
    }

    #[test]
    fn test_loop_with_phis() {
        let mut module = Module::new("test");
        let f = sum_to(&mut module);
        let mut interp = Interpreter::new(&module, InterpreterOptions::default()).unwrap();
        assert_eq!(interp.call(f, &[10]).unwrap(), Some(55));
    }

    #[test]
    fn test_step_limit() {
        let mut module = Module::new("test");
        let f = sum_to(&mut module);
        let options = InterpreterOptions {
            max_steps: 50,
            ..InterpreterOptions::default()
        };
        let mut interp = Interpreter::new(&module, options).unwrap();
        assert!(matches!(
            interp.call(f, &[1_000]),
            Err(Error::ExecutionLimitExceeded { limit: 50 })
        ));
    }

    #[test]
    fn test_struct_gep_and_narrow_store() {
        let mut module = Module::new("test");
        let record = Type::Struct(vec![Type::I8, Type::I32, Type::I64]);
        let f = module.add_function("fill", vec![], Type::I64);
        let entry = module.add_block(f, "entry");
        let mut b = Builder::new(&mut module, f);
        b.position_at_end(entry);
        let slot = b.alloca(record.clone(), "slot");
        let field = b.gep_inbounds(record, slot, vec![Value::i32(0), Value::i32(2)], "field");
        b.store(Value::i64(-2), field);
        let wide = b.load(Type::I64, field, "wide");
        let narrow = b.cast(CastOp::Trunc, wide, Type::I8, "narrow");
        let back = b.cast(CastOp::SExt, narrow, Type::I64, "back");
        b.ret(Some(back));
        let mut interp = Interpreter::new(&module, InterpreterOptions::default()).unwrap();
        assert_eq!(interp.call(f, &[]).unwrap(), Some(-2i64 as u64));
    }

    #[test]
    fn test_primitives_record_remote_call() {
        let mut module = Module::new("test");
        let primitives = RuntimePrimitives::declare(&mut module, &ExtractorOptions::default());
        let body = module.add_function("body", vec![Type::ptr(), Type::ptr()], Type::I16);
        let entry = module.add_block(body, "entry");
        let caller = module.add_function("caller", vec![Type::global_ptr()], Type::I16);
        let caller_entry = module.add_block(caller, "entry");
        let mut b = Builder::new(&mut module, body);
        b.position_at_end(entry);
        b.ret(Some(Value::int(IntWidth::I16, 1)));
        let mut b = Builder::new(&mut module, caller);
        b.position_at_end(caller_entry);
        let core = b.call(primitives.owning_core, vec![Value::Arg(0)], "core");
        let code = b.call(
            primitives.call_on,
            vec![
                core,
                Value::Func(body),
                Value::Null(AddressSpace::Local),
                Value::i64(0),
                Value::Null(AddressSpace::Local),
                Value::i64(0),
            ],
            "code",
        );
        b.ret(Some(code));

        let mut interp = Interpreter::new(&module, InterpreterOptions::default()).unwrap();
        let target = interp.memory_mut().allocate_on(5, 8, 8).unwrap();
        assert_eq!(interp.call(caller, &[target]).unwrap(), Some(1));
        assert_eq!(
            interp.trace(),
            &[RemoteCall {
                core: 5,
                function: "body".to_string(),
                input_size: 0,
                output_size: 0,
                exit_code: 1,
            }]
        );
    }

    #[test]
    fn test_unreachable_and_unknown_function() {
        let mut module = Module::new("test");
        let ext = module.add_function("external", vec![], Type::Void);
        let f = module.add_function("f", vec![], Type::Void);
        let entry = module.add_block(f, "entry");
        let mut b = Builder::new(&mut module, f);
        b.position_at_end(entry);
        b.unreachable();
        let mut interp = Interpreter::new(&module, InterpreterOptions::default()).unwrap();
        assert!(matches!(interp.call(f, &[]), Err(Error::Unreachable { .. })));
        assert!(matches!(
            interp.call(ext, &[]),
            Err(Error::UnknownFunction { .. })
        ));
    }
}
