//! Debug utilities for region extraction
//!
//! Tools for inspecting IR and candidate regions.

use super::ir::{BlockId, CastOp, ConstExpr, FuncId, InstId, InstKind, Module, Value};
use super::region::PassContext;
use std::fmt::Write as _;

const REGION_COLORS: [&str; 20] = [
    "red",
    "blue",
    "green",
    "gold",
    "cyan",
    "purple",
    "orange",
    "darkgreen",
    "coral",
    "deeppink",
    "deepskyblue",
    "orchid",
    "brown",
    "yellowgreen",
    "midnightblue",
    "firebrick",
    "peachpuff",
    "yellow",
    "limegreen",
    "khaki",
];

/// Color used for a region in dot output
pub fn region_color(region: u64) -> &'static str {
    REGION_COLORS[(region % REGION_COLORS.len() as u64) as usize]
}

/// Print a function in human-readable format
pub fn dump_function(module: &Module, func: FuncId) {
    println!("═══════════════════════════════════════════════════════════");
    println!("{}", format_function(module, func));
    println!("═══════════════════════════════════════════════════════════\n");
}

/// Format an operand
pub fn format_value(module: &Module, value: Value) -> String {
    match value {
        Value::Inst(id) => match &module.inst(id).name {
            Some(name) => format!("%{}", name),
            None => format!("%{}", id.0),
        },
        Value::Arg(i) => format!("%arg{}", i),
        Value::Global(id) => format!("@{}", module.globals[id.0 as usize].name),
        Value::Func(id) => format!("@{}", module.function(id).name),
        Value::ConstInt(width, v) => format!("i{} {}", width.bits(), v),
        Value::Null(space) => format!("null addrspace({})", space.tag()),
        Value::Expr(id) => match module.expr(id) {
            ConstExpr::Gep { base, indices, .. } => format!(
                "gep({}, {})",
                format_value(module, *base),
                format_list(module, indices)
            ),
            ConstExpr::Cast { op, value, to } => {
                format!("{}({} to {})", cast_name(*op), format_value(module, *value), to)
            }
        },
    }
}

fn format_list(module: &Module, values: &[Value]) -> String {
    values
        .iter()
        .map(|v| format_value(module, *v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn cast_name(op: CastOp) -> &'static str {
    match op {
        CastOp::Bitcast => "bitcast",
        CastOp::AddrSpaceCast => "addrspacecast",
        CastOp::PtrToInt => "ptrtoint",
        CastOp::IntToPtr => "inttoptr",
        CastOp::Trunc => "trunc",
        CastOp::ZExt => "zext",
        CastOp::SExt => "sext",
    }
}

fn block_label(module: &Module, block: BlockId) -> String {
    format!("%{}", module.block(block).name)
}

/// Format a single instruction
pub fn format_inst(module: &Module, inst: InstId) -> String {
    let data = module.inst(inst);
    let body = match &data.kind {
        InstKind::Alloca { ty } => format!("alloca {}", ty),
        InstKind::Load { ptr } => format!("load {}, {}", data.ty, format_value(module, *ptr)),
        InstKind::Store { value, ptr } => format!(
            "store {}, {}",
            format_value(module, *value),
            format_value(module, *ptr)
        ),
        InstKind::Gep {
            base,
            source_ty,
            indices,
            in_bounds,
        } => format!(
            "getelementptr{} {}, {}, {}",
            if *in_bounds { " inbounds" } else { "" },
            source_ty,
            format_value(module, *base),
            format_list(module, indices)
        ),
        InstKind::Cast { op, value } => format!(
            "{} {} to {}",
            cast_name(*op),
            format_value(module, *value),
            data.ty
        ),
        InstKind::Binary { op, lhs, rhs } => format!(
            "{} {}, {}",
            format!("{:?}", op).to_lowercase(),
            format_value(module, *lhs),
            format_value(module, *rhs)
        ),
        InstKind::Cmp { pred, lhs, rhs } => format!(
            "icmp {} {}, {}",
            format!("{:?}", pred).to_lowercase(),
            format_value(module, *lhs),
            format_value(module, *rhs)
        ),
        InstKind::Phi { incoming } => {
            let arms: Vec<String> = incoming
                .iter()
                .map(|(v, b)| format!("[{}, {}]", format_value(module, *v), block_label(module, *b)))
                .collect();
            format!("phi {} {}", data.ty, arms.join(", "))
        }
        InstKind::Call { callee, args } => format!(
            "call {} {}({})",
            data.ty,
            format_value(module, *callee),
            format_list(module, args)
        ),
        InstKind::Br { dest } => format!("br {}", block_label(module, *dest)),
        InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        } => format!(
            "br {}, {}, {}",
            format_value(module, *cond),
            block_label(module, *then_dest),
            block_label(module, *else_dest)
        ),
        InstKind::Switch {
            value,
            default,
            cases,
        } => {
            let arms: Vec<String> = cases
                .iter()
                .map(|(c, b)| format!("{} -> {}", c, block_label(module, *b)))
                .collect();
            format!(
                "switch {}, {} [{}]",
                format_value(module, *value),
                block_label(module, *default),
                arms.join(", ")
            )
        }
        InstKind::Ret { value: Some(v) } => format!("ret {}", format_value(module, *v)),
        InstKind::Ret { value: None } => "ret void".to_string(),
        InstKind::Unreachable => "unreachable".to_string(),
    };
    if data.ty.is_scalar() && !matches!(data.kind, InstKind::Store { .. }) {
        format!("{} = {}", format_value(module, Value::Inst(inst)), body)
    } else {
        body
    }
}

/// Textual listing of a function
pub fn format_function(module: &Module, func: FuncId) -> String {
    let function = module.function(func);
    let params: Vec<String> = function
        .params
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("{} %arg{}", ty, i))
        .collect();
    let mut out = String::new();
    let keyword = if function.is_declaration() {
        "declare"
    } else {
        "define"
    };
    let _ = write!(
        out,
        "{} {} @{}({})",
        keyword,
        function.ret,
        function.name,
        params.join(", ")
    );
    if function.is_declaration() {
        out.push('\n');
        return out;
    }
    out.push_str(" {\n");
    for &block in &function.layout {
        let _ = writeln!(out, "{}:", module.block(block).name);
        for &inst in &module.block(block).insts {
            let _ = writeln!(out, "  {}", format_inst(module, inst));
        }
    }
    out.push_str("}\n");
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Graphviz rendering of a function with every claimed instruction colored
/// by its owning region
pub fn regions_to_dot(module: &Module, func: FuncId, ctx: &PassContext) -> String {
    let function = module.function(func);
    let mut out = String::new();
    out.push_str("digraph TaskFunction {\n");
    let _ = writeln!(out, "  label=\"{}\"", escape_html(&function.name));
    out.push_str("  node[shape=record];\n");

    for &block in &function.layout {
        let _ = writeln!(out, "  \"b{}\" [label=<", block.0);
        out.push_str("  <table cellborder='0' border='0'>\n");
        let _ = writeln!(
            out,
            "    <tr><td align='left'>{}</td></tr>",
            escape_html(&module.block(block).name)
        );
        for &inst in &module.block(block).insts {
            let text = escape_html(&format_inst(module, inst));
            match ctx.owner(inst) {
                Some(region) => {
                    let _ = writeln!(
                        out,
                        "    <tr><td align='left'><font color='{}'>{}</font></td></tr>",
                        region_color(region),
                        text
                    );
                }
                None => {
                    let _ = writeln!(out, "    <tr><td align='left'>{}</td></tr>", text);
                }
            }
        }
        out.push_str("  </table>\n");
        out.push_str("  >];\n");
        for succ in module.successors(block) {
            let _ = writeln!(out, "  \"b{}\"->\"b{}\"", block.0, succ.0);
        }
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Builder, Type};

    fn sample() -> (Module, FuncId, InstId) {
        let mut module = Module::new("test");
        let f = module.add_function("get", vec![Type::global_ptr()], Type::I64);
        let entry = module.add_block(f, "entry");
        let mut b = Builder::new(&mut module, f);
        b.position_at_end(entry);
        let v = b.load(Type::I64, Value::Arg(0), "v");
        b.ret(Some(v));
        (module, f, v.as_inst().unwrap())
    }

    #[test]
    fn test_format_function() {
        let (module, f, _) = sample();
        let text = format_function(&module, f);
        assert!(text.starts_with("define i64 @get(ptr addrspace(100) %arg0)"));
        assert!(text.contains("%v = load i64, %arg0"));
        assert!(text.contains("ret %v"));
    }

    #[test]
    fn test_regions_to_dot_colors_claimed_instructions() {
        let (module, f, load) = sample();
        let mut ctx = PassContext::new();
        let region = ctx.next_region_id();
        ctx.claim(load, region);
        let dot = regions_to_dot(&module, f, &ctx);
        assert!(dot.starts_with("digraph TaskFunction {"));
        assert!(dot.contains("<font color='red'>%v = load i64, %arg0</font>"));
        assert_eq!(region_color(21), "blue");
    }
}
