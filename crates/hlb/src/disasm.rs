//! Human-readable disassembly: function headers, register tables and one
//! annotated row per opcode.

use crate::module::{Function, Module, Native};
use crate::opcodes::{Opcode, Reg, RefFun};
use crate::types::{Type, TypeObj};

/// Display name of a type, favoring the source-level name where one exists.
pub fn type_name(m: &Module, t: &Type) -> String {
    match t {
        Type::Obj(o) | Type::Struct(o) => m.str_(o.name).unwrap_or("?").to_string(),
        Type::Abstract { name } => m.str_(*name).unwrap_or("?").to_string(),
        Type::Enum(e) => m.str_(e.name).unwrap_or("?").to_string(),
        Type::Virtual { fields } => {
            let names: Vec<&str> = fields
                .iter()
                .map(|f| m.str_(f.name).unwrap_or("?"))
                .collect();
            format!("Virtual[{}]", names.join(", "))
        }
        Type::Null(inner) => match m.ty(*inner) {
            Some(t) => format!("Null<{}>", type_name(m, t)),
            None => "Null".to_string(),
        },
        Type::Ref(_) => "Ref".to_string(),
        Type::Packed(_) => "Packed".to_string(),
        Type::Fun(_) => "Fun".to_string(),
        Type::Method(_) => "Method".to_string(),
        other => format!("{:?}", other.kind()),
    }
}

/// The object type and proto entry implementing `findex` as an instance
/// method, if any.
pub fn proto_for(m: &Module, findex: RefFun) -> Option<(&TypeObj, usize)> {
    for t in &m.types {
        if let Some(obj) = t.as_obj() {
            for (i, p) in obj.protos.iter().enumerate() {
                if p.findex == findex {
                    return Some((obj, i));
                }
            }
        }
    }
    None
}

/// The object type and field name that `findex` is bound to (statics and
/// init-bound closures), if any.
pub fn binding_for(m: &Module, findex: RefFun) -> Option<(&TypeObj, String)> {
    for t in &m.types {
        if let Some(obj) = t.as_obj() {
            for b in &obj.bindings {
                if b.findex == findex {
                    let fields = obj.resolve_fields(&m.types).ok()?;
                    let name = fields
                        .get(b.field)
                        .and_then(|f| m.str_(f.name))
                        .unwrap_or("?");
                    return Some((obj, name.to_string()));
                }
            }
        }
    }
    None
}

/// `Class.method` for a findex reachable through a proto or a binding.
pub fn func_name(m: &Module, findex: RefFun) -> Option<String> {
    if let Some((obj, pidx)) = proto_for(m, findex) {
        let class = m.str_(obj.name).unwrap_or("?");
        let name = m.str_(obj.protos[pidx].name).unwrap_or("?");
        return Some(format!("{class}.{name}"));
    }
    if let Some((obj, field)) = binding_for(m, findex) {
        let class = m.str_(obj.name).unwrap_or("?");
        return Some(format!("{class}.{field}"));
    }
    None
}

/// Bindings hold statics; protos hold instance methods.
pub fn is_static(m: &Module, findex: RefFun) -> bool {
    binding_for(m, findex).is_some()
}

/// Signature line for a function: findex, resolved name, argument and
/// return types, and the source file when debug info is present.
pub fn func_header(m: &Module, f: &Function) -> String {
    let name = func_name(m, f.findex()).unwrap_or_else(|| "<none>".to_string());
    let stat = if is_static(m, f.findex()) { "static " } else { "" };
    let sig = match m.ty(f.ty()).and_then(|t| t.as_fun()) {
        Some(fun) => {
            let args: Vec<String> = fun
                .args
                .iter()
                .map(|a| m.ty(*a).map(|t| type_name(m, t)).unwrap_or_else(|| "?".into()))
                .collect();
            let ret = m
                .ty(fun.ret)
                .map(|t| type_name(m, t))
                .unwrap_or_else(|| "?".into());
            format!("({}) -> {}", args.join(", "), ret)
        }
        None => "(no fun type, this is a bug!)".to_string(),
    };
    let file = f
        .debug()
        .and_then(|d| d.first())
        .and_then(|(fidx, _)| m.debug_files.as_ref()?.get(*fidx as usize))
        .map(|f| format!(" (from {f})"))
        .unwrap_or_default();
    format!("f@{} {}{} {}{}", f.findex().0, stat, name, sig, file)
}

pub fn native_header(m: &Module, n: &Native) -> String {
    let lib = m.str_(n.lib).unwrap_or("?");
    let name = m.str_(n.name).unwrap_or("?");
    let sig = match m.ty(n.ty).and_then(|t| t.as_fun()) {
        Some(fun) => {
            let args: Vec<String> = fun
                .args
                .iter()
                .map(|a| m.ty(*a).map(|t| type_name(m, t)).unwrap_or_else(|| "?".into()))
                .collect();
            let ret = m
                .ty(fun.ret)
                .map(|t| type_name(m, t))
                .unwrap_or_else(|| "?".into());
            format!("({}) -> {}", args.join(", "), ret)
        }
        None => "(no fun type, this is a bug!)".to_string(),
    };
    format!("f@{} {lib}.{name} [native] {sig}", n.findex.0)
}

/// Field name for `field` on the object type of register `obj`.
fn field_name(m: &Module, f: &Function, obj: Reg, field: usize) -> String {
    let resolved = f
        .regs()
        .get(obj.0 as usize)
        .and_then(|r| m.ty(*r))
        .and_then(|t| t.as_obj())
        .and_then(|o| {
            let fields = o.resolve_fields(&m.types).ok()?;
            fields.get(field).and_then(|fld| m.str_(fld.name)).map(str::to_string)
        });
    resolved.unwrap_or_else(|| format!("field{field}"))
}

/// One-line pseudo rendering of a single opcode, for listing rows.
pub fn pseudo_op(m: &Module, f: &Function, op: &Opcode, idx: usize) -> String {
    use Opcode::*;
    let target = |off: i32| (idx as i64 + 1 + off as i64).to_string();
    match op {
        Mov { dst, src } => format!("reg{} = reg{}", dst.0, src.0),
        Int { dst, ptr } => format!(
            "reg{} = {}",
            dst.0,
            m.ints.get(ptr.0).copied().unwrap_or_default()
        ),
        Float { dst, ptr } => format!(
            "reg{} = {}",
            dst.0,
            m.floats.get(ptr.0).copied().unwrap_or_default()
        ),
        Bool { dst, value } => format!("reg{} = {}", dst.0, value),
        String { dst, ptr } => format!("reg{} = \"{}\"", dst.0, m.str_(*ptr).unwrap_or("?")),
        Null { dst } => format!("reg{} = null", dst.0),
        Add { dst, a, b } => format!("reg{} = reg{} + reg{}", dst.0, a.0, b.0),
        Sub { dst, a, b } => format!("reg{} = reg{} - reg{}", dst.0, a.0, b.0),
        Mul { dst, a, b } => format!("reg{} = reg{} * reg{}", dst.0, a.0, b.0),
        SDiv { dst, a, b } | UDiv { dst, a, b } => {
            format!("reg{} = reg{} / reg{}", dst.0, a.0, b.0)
        }
        SMod { dst, a, b } | UMod { dst, a, b } => {
            format!("reg{} = reg{} % reg{}", dst.0, a.0, b.0)
        }
        Shl { dst, a, b } => format!("reg{} = reg{} << reg{}", dst.0, a.0, b.0),
        SShr { dst, a, b } | UShr { dst, a, b } => {
            format!("reg{} = reg{} >> reg{}", dst.0, a.0, b.0)
        }
        And { dst, a, b } => format!("reg{} = reg{} & reg{}", dst.0, a.0, b.0),
        Or { dst, a, b } => format!("reg{} = reg{} | reg{}", dst.0, a.0, b.0),
        Xor { dst, a, b } => format!("reg{} = reg{} ^ reg{}", dst.0, a.0, b.0),
        Neg { dst, src } => format!("reg{} = -reg{}", dst.0, src.0),
        Not { dst, src } => format!("reg{} = !reg{}", dst.0, src.0),
        Incr { dst } => format!("reg{}++", dst.0),
        Decr { dst } => format!("reg{}--", dst.0),
        Call0 { dst, fun } => format!("reg{} = f@{}()", dst.0, fun.0),
        Call1 { dst, fun, arg0 } => format!("reg{} = f@{}(reg{})", dst.0, fun.0, arg0.0),
        Call2 { dst, fun, arg0, arg1 } => {
            format!("reg{} = f@{}(reg{}, reg{})", dst.0, fun.0, arg0.0, arg1.0)
        }
        Call3 { dst, fun, arg0, arg1, arg2 } => format!(
            "reg{} = f@{}(reg{}, reg{}, reg{})",
            dst.0, fun.0, arg0.0, arg1.0, arg2.0
        ),
        Call4 { dst, fun, arg0, arg1, arg2, arg3 } => format!(
            "reg{} = f@{}(reg{}, reg{}, reg{}, reg{})",
            dst.0, fun.0, arg0.0, arg1.0, arg2.0, arg3.0
        ),
        CallN { dst, fun, args } => format!("reg{} = f@{}({})", dst.0, fun.0, reg_list(args)),
        CallMethod { dst, field, args } => match args.split_first() {
            Some((recv, rest)) => format!(
                "reg{} = reg{}.{}({})",
                dst.0,
                recv.0,
                field_name(m, f, *recv, field.0),
                reg_list(rest)
            ),
            None => format!("reg{} = .field{}()", dst.0, field.0),
        },
        CallThis { dst, field, args } => format!(
            "reg{} = this.{}({})",
            dst.0,
            field_name(m, f, Reg(0), field.0),
            reg_list(args)
        ),
        CallClosure { dst, fun, args } => {
            format!("reg{} = reg{}({})", dst.0, fun.0, reg_list(args))
        }
        StaticClosure { dst, fun } => format!("reg{} = f@{}", dst.0, fun.0),
        InstanceClosure { dst, fun, obj } => {
            format!("reg{} = reg{}.f@{}", dst.0, obj.0, fun.0)
        }
        VirtualClosure { dst, obj, field } => {
            format!("reg{} = reg{}.vtable[reg{}]", dst.0, obj.0, field.0)
        }
        GetGlobal { dst, global } => match m.const_str(*global) {
            Some(s) => format!("reg{} = \"{}\" (g@{})", dst.0, s, global.0),
            None => format!("reg{} = g@{}", dst.0, global.0),
        },
        SetGlobal { global, src } => format!("g@{} = reg{}", global.0, src.0),
        Field { dst, obj, field } => format!(
            "reg{} = reg{}.{}",
            dst.0,
            obj.0,
            field_name(m, f, *obj, field.0)
        ),
        SetField { obj, field, src } => format!(
            "reg{}.{} = reg{}",
            obj.0,
            field_name(m, f, *obj, field.0),
            src.0
        ),
        GetThis { dst, field } => format!(
            "reg{} = this.{}",
            dst.0,
            field_name(m, f, Reg(0), field.0)
        ),
        SetThis { field, src } => format!(
            "this.{} = reg{}",
            field_name(m, f, Reg(0), field.0),
            src.0
        ),
        DynGet { dst, obj, field } => {
            format!("reg{} = reg{}.{}", dst.0, obj.0, m.str_(*field).unwrap_or("?"))
        }
        DynSet { obj, field, src } => {
            format!("reg{}.{} = reg{}", obj.0, m.str_(*field).unwrap_or("?"), src.0)
        }
        JTrue { cond, offset } => format!("if reg{}: jump to {}", cond.0, target(*offset)),
        JFalse { cond, offset } => format!("if !reg{}: jump to {}", cond.0, target(*offset)),
        JNull { reg, offset } => format!("if reg{} == null: jump to {}", reg.0, target(*offset)),
        JNotNull { reg, offset } => {
            format!("if reg{} != null: jump to {}", reg.0, target(*offset))
        }
        JSLt { a, b, offset } | JULt { a, b, offset } => {
            format!("if reg{} < reg{}: jump to {}", a.0, b.0, target(*offset))
        }
        JSGte { a, b, offset } | JUGte { a, b, offset } | JNotLt { a, b, offset } => {
            format!("if reg{} >= reg{}: jump to {}", a.0, b.0, target(*offset))
        }
        JSGt { a, b, offset } => format!("if reg{} > reg{}: jump to {}", a.0, b.0, target(*offset)),
        JSLte { a, b, offset } | JNotGte { a, b, offset } => {
            format!("if reg{} <= reg{}: jump to {}", a.0, b.0, target(*offset))
        }
        JEq { a, b, offset } => format!("if reg{} == reg{}: jump to {}", a.0, b.0, target(*offset)),
        JNotEq { a, b, offset } => {
            format!("if reg{} != reg{}: jump to {}", a.0, b.0, target(*offset))
        }
        JAlways { offset } => format!("jump to {}", target(*offset)),
        ToDyn { dst, src } | ToVirtual { dst, src } | SafeCast { dst, src }
        | UnsafeCast { dst, src } => format!("reg{} = cast reg{}", dst.0, src.0),
        ToSFloat { dst, src } | ToUFloat { dst, src } => {
            format!("reg{} = float(reg{})", dst.0, src.0)
        }
        ToInt { dst, src } => format!("reg{} = int(reg{})", dst.0, src.0),
        Label => "label".to_string(),
        Ret { ret } => {
            let void = f
                .regs()
                .get(ret.0 as usize)
                .and_then(|r| m.ty(*r))
                .map(|t| t.is_void())
                .unwrap_or(false);
            if void {
                "return".to_string()
            } else {
                format!("return reg{}", ret.0)
            }
        }
        Throw { exc } | Rethrow { exc } => format!("throw reg{}", exc.0),
        Switch { reg, offsets, end } => {
            let cases = offsets
                .iter()
                .enumerate()
                .filter(|(_, off)| **off != 0)
                .map(|(i, off)| format!("{i}: {}", target(*off)))
                .collect::<Vec<_>>();
            format!(
                "switch reg{} [{}] (end: {})",
                reg.0,
                cases.join(", "),
                target(*end)
            )
        }
        NullCheck { reg } => format!("if reg{} == null: error", reg.0),
        Trap { exc, offset } => format!("trap to reg{} (end: {})", exc.0, target(*offset)),
        EndTrap { exc } => format!("end trap to reg{}", exc.0),
        GetArray { dst, array, index } => {
            format!("reg{} = reg{}[reg{}]", dst.0, array.0, index.0)
        }
        SetArray { array, index, src } => {
            format!("reg{}[reg{}] = reg{}", array.0, index.0, src.0)
        }
        New { dst } => {
            let ty = f
                .regs()
                .get(dst.0 as usize)
                .and_then(|r| m.ty(*r))
                .map(|t| type_name(m, t))
                .unwrap_or_else(|| "?".into());
            format!("reg{} = new {}", dst.0, ty)
        }
        ArraySize { dst, array } => format!("reg{} = len(reg{})", dst.0, array.0),
        Ref { dst, src } => format!("reg{} = &reg{}", dst.0, src.0),
        Unref { dst, src } => format!("reg{} = *reg{}", dst.0, src.0),
        other => format!("{other:?}"),
    }
}

fn reg_list(args: &[Reg]) -> String {
    args.iter()
        .map(|r| format!("reg{}", r.0))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Full printout of one function: header, register types, assigns, and one
/// row per op.
pub fn func(m: &Module, f: &Function) -> String {
    let mut out = String::new();
    out.push_str(&func_header(m, f));
    out.push_str("\nReg types:\n");
    for (i, reg) in f.regs().iter().enumerate() {
        let name = m
            .ty(*reg)
            .map(|t| type_name(m, t))
            .unwrap_or_else(|| "?".into());
        out.push_str(&format!("  {i}. {name}\n"));
    }
    if let Some(assigns) = f.assigns() {
        if !assigns.is_empty() {
            out.push_str("\nAssigns:\n");
            for (name, op) in assigns {
                out.push_str(&format!(
                    "  op {}: {}\n",
                    op - 1,
                    m.str_(*name).unwrap_or("?")
                ));
            }
        }
    }
    out.push_str("\nOps:\n");
    for (i, op) in f.ops().iter().enumerate() {
        out.push_str(&format!(
            "{i:>4}. {:<16} {}\n",
            op.name(),
            pseudo_op(m, f, op, i)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::{RefField, RefInt, RefString, RefType};
    use crate::types::{Binding, ObjField, ObjProto, TypeFun};

    fn sample_module() -> Module {
        let mut m = Module::new(5);
        m.strings = vec![
            "Point".into(),   // 0
            "x".into(),       // 1
            "length".into(),  // 2
            "origin".into(),  // 3
        ];
        m.ints = vec![42];
        m.types = vec![
            Type::Void, // 0
            Type::I32,  // 1
            Type::Fun(TypeFun { args: vec![], ret: RefType(0) }), // 2
            Type::Obj(TypeObj {
                name: RefString(0),
                super_: None,
                global: None,
                fields: vec![
                    ObjField { name: RefString(1), ty: RefType(1) },
                    ObjField { name: RefString(3), ty: RefType(1) },
                ],
                protos: vec![ObjProto { name: RefString(2), findex: RefFun(0), pindex: -1 }],
                bindings: vec![Binding { field: 1, findex: RefFun(1) }],
            }), // 3
        ];
        m.functions = vec![
            Function::new(
                RefType(2),
                RefFun(0),
                vec![RefType(3), RefType(1), RefType(0)],
                vec![
                    Opcode::Int { dst: Reg(1), ptr: RefInt(0) },
                    Opcode::Field { dst: Reg(1), obj: Reg(0), field: RefField(0) },
                    Opcode::Ret { ret: Reg(2) },
                ],
            ),
            Function::new(RefType(2), RefFun(1), vec![RefType(0)], vec![
                Opcode::Ret { ret: Reg(0) },
            ]),
        ];
        m
    }

    #[test]
    fn resolves_method_names() {
        let m = sample_module();
        assert_eq!(func_name(&m, RefFun(0)).as_deref(), Some("Point.length"));
        assert_eq!(func_name(&m, RefFun(1)).as_deref(), Some("Point.origin"));
        assert!(func_name(&m, RefFun(9)).is_none());
        assert!(!is_static(&m, RefFun(0)));
        assert!(is_static(&m, RefFun(1)));
    }

    #[test]
    fn header_shows_signature() {
        let m = sample_module();
        let h = func_header(&m, &m.functions[0]);
        assert!(h.starts_with("f@0 Point.length"), "{h}");
        assert!(h.contains("() -> Void"), "{h}");
    }

    #[test]
    fn listing_resolves_fields_and_pools() {
        let m = sample_module();
        let text = func(&m, &m.functions[0]);
        assert!(text.contains("reg1 = 42"), "{text}");
        assert!(text.contains("reg1 = reg0.x"), "{text}");
        assert!(text.contains("return"), "{text}");
    }

    #[test]
    fn void_return_renders_bare() {
        let m = sample_module();
        let op = Opcode::Ret { ret: Reg(2) };
        assert_eq!(pseudo_op(&m, &m.functions[0], &op, 2), "return");
    }
}
