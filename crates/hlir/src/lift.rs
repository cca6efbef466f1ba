//! Phase A of the lifter: translating straight-line op runs into IR
//! statements, consulting register types for field names, void-ness and
//! comparison selection.
//!
//! Control-flow opcodes (`J*`, `Switch`, `Trap`, `EndTrap`) are left for
//! the structurer; `Label` and `Nop` lift to nothing. Anything else the
//! lifter does not understand becomes `Stmt::Untranslated`, which is
//! always safe but opaque.

use std::collections::HashSet;

use hlb::opcodes::{Opcode, Reg, RefFun, RefType};
use hlb::types::{Type, TypeKind};
use hlb::{Function, Module};
use tracing::trace;

use crate::ir::*;

/// Everything phase A and the passes need to know about one function.
pub struct FuncCtx<'m> {
    pub m: &'m Module,
    pub f: &'m Function,
    /// Source-level name per register, recovered from `assigns`.
    pub names: Vec<Option<String>>,
    /// Registers `0..nargs` hold the arguments (receiver first for
    /// methods).
    pub nargs: usize,
    /// `true` when register 0 is an implicit receiver.
    pub is_method: bool,
    bool_ty: RefType,
}

impl<'m> FuncCtx<'m> {
    pub fn new(m: &'m Module, f: &'m Function) -> FuncCtx<'m> {
        let fun_ty = m.ty(f.ty()).and_then(|t| t.as_fun());
        let nargs = fun_ty.map(|ft| ft.args.len()).unwrap_or(0);
        let is_method = matches!(m.ty(f.ty()), Some(Type::Method(_)));
        let bool_ty = m.find_prim_type(TypeKind::Bool).unwrap_or(RefType(0));
        FuncCtx {
            m,
            f,
            names: recover_names(m, f),
            nargs,
            is_method,
            bool_ty,
        }
    }

    pub fn reg_ty(&self, r: Reg) -> RefType {
        self.f.regs().get(r.0 as usize).copied().unwrap_or(RefType(0))
    }

    pub fn is_void_reg(&self, r: Reg) -> bool {
        self.m
            .ty(self.reg_ty(r))
            .map(|t| t.is_void())
            .unwrap_or(false)
    }

    /// A read or write of a register as an expression. Names are applied
    /// later by the naming pass.
    pub fn reg_expr(&self, r: Reg) -> Expr {
        let ty = self.reg_ty(r);
        if (r.0 as usize) < self.nargs {
            Expr::new(ty, ExprKind::Arg { reg: r, name: None })
        } else {
            Expr::new(ty, ExprKind::Local { reg: r, name: None })
        }
    }

    pub fn bool_ty(&self) -> RefType {
        self.bool_ty
    }

    /// Resolved field name on the type held by `obj`, falling back to a
    /// positional placeholder.
    pub fn field_name(&self, obj: Reg, field: usize) -> String {
        let resolved = match self.m.ty(self.reg_ty(obj)) {
            Some(Type::Obj(o)) | Some(Type::Struct(o)) => o
                .resolve_fields(&self.m.types)
                .ok()
                .and_then(|fs| fs.get(field).and_then(|f| self.m.str_(f.name)).map(str::to_string)),
            Some(Type::Virtual { fields }) => fields
                .get(field)
                .and_then(|f| self.m.str_(f.name))
                .map(str::to_string),
            _ => None,
        };
        resolved.unwrap_or_else(|| format!("field{field}"))
    }

    /// Proto (vtable) entry `idx` on the type held by `obj`.
    pub fn proto(&self, obj: Reg, idx: usize) -> Option<(RefFun, String)> {
        let o = self.m.ty(self.reg_ty(obj))?.as_obj()?;
        let p = o.protos.get(idx)?;
        Some((p.findex, self.m.str_(p.name).unwrap_or("?").to_string()))
    }
}

/// Register names from the debug `assigns` table: a negative op index
/// names argument register `-op - 1`, a positive one names the
/// destination register of op `op - 1`. Conflicting names are dropped.
fn recover_names(m: &Module, f: &Function) -> Vec<Option<String>> {
    let mut sets: Vec<HashSet<String>> = vec![HashSet::new(); f.regs().len()];
    if let Some(assigns) = f.assigns() {
        for (name, op) in assigns {
            let reg = if *op < 0 {
                Some((-op - 1) as usize)
            } else {
                f.ops()
                    .get((*op - 1) as usize)
                    .and_then(|o| o.dst())
                    .map(|r| r.0 as usize)
            };
            if let (Some(reg), Some(name)) = (reg, m.str_(*name)) {
                if reg < sets.len() {
                    sets[reg].insert(name.to_string());
                }
            }
        }
    }
    sets.into_iter()
        .map(|s| {
            if s.len() == 1 {
                s.into_iter().next()
            } else {
                None
            }
        })
        .collect()
}

/// Lift the non-control ops in `start..=end` to statements.
pub fn lift_range(ctx: &FuncCtx<'_>, start: usize, end: usize) -> Block {
    let mut out = Vec::new();
    for pc in start..=end {
        if let Some(stmt) = lift_op(ctx, pc) {
            out.push(stmt);
        }
    }
    out
}

/// Lift the op at `pc`, or `None` for control flow and no-ops.
pub fn lift_op(ctx: &FuncCtx<'_>, pc: usize) -> Option<Stmt> {
    use Opcode::*;
    let op = &ctx.f.ops()[pc];
    let m = ctx.m;

    let assign = |dst: Reg, kind: ExprKind| {
        Some(Stmt::Assign {
            dst: ctx.reg_expr(dst),
            src: Expr::new(ctx.reg_ty(dst), kind),
        })
    };
    let arith = |dst: Reg, op: BinOp, a: Reg, b: Reg| {
        assign(
            dst,
            ExprKind::Arith {
                op,
                lhs: Box::new(ctx.reg_expr(a)),
                rhs: Box::new(ctx.reg_expr(b)),
            },
        )
    };
    let unop = |dst: Reg, op: UnOp, src: Reg| {
        assign(dst, ExprKind::Unop { op, expr: Box::new(ctx.reg_expr(src)) })
    };
    let cast = |dst: Reg, kind: CastKind, src: Reg| {
        assign(dst, ExprKind::Cast { kind, expr: Box::new(ctx.reg_expr(src)) })
    };
    let call = |dst: Reg, target: CallTarget, args: Vec<Expr>| {
        let expr = Expr::new(ctx.reg_ty(dst), ExprKind::Call { target, args });
        if ctx.is_void_reg(dst) {
            Some(Stmt::ExprStmt(expr))
        } else {
            Some(Stmt::Assign { dst: ctx.reg_expr(dst), src: expr })
        }
    };
    let regs = |rs: &[Reg]| rs.iter().map(|r| ctx.reg_expr(*r)).collect::<Vec<_>>();
    let step = |dst: Reg, op: BinOp| {
        let one = Expr::new(ctx.reg_ty(dst), ExprKind::Const(ConstVal::Int(1)));
        assign(
            dst,
            ExprKind::Arith { op, lhs: Box::new(ctx.reg_expr(dst)), rhs: Box::new(one) },
        )
    };
    let field = |obj: Reg, field: usize| ExprKind::Field {
        obj: Box::new(ctx.reg_expr(obj)),
        name: ctx.field_name(obj, field),
    };

    match op {
        Mov { dst, src } => Some(Stmt::Assign { dst: ctx.reg_expr(*dst), src: ctx.reg_expr(*src) }),
        Int { dst, ptr } => assign(
            *dst,
            ExprKind::Const(ConstVal::Int(m.ints.get(ptr.0).copied().unwrap_or_default())),
        ),
        Float { dst, ptr } => assign(
            *dst,
            ExprKind::Const(ConstVal::Float(m.floats.get(ptr.0).copied().unwrap_or_default())),
        ),
        Bool { dst, value } => assign(*dst, ExprKind::Const(ConstVal::Bool(*value))),
        String { dst, ptr } => assign(
            *dst,
            ExprKind::Const(ConstVal::Str(m.str_(*ptr).unwrap_or_default().to_string())),
        ),
        Bytes { dst, ptr } => assign(*dst, ExprKind::Const(ConstVal::Bytes(ptr.0))),
        Null { dst } => assign(*dst, ExprKind::Const(ConstVal::Null)),

        Add { dst, a, b } => arith(*dst, BinOp::Add, *a, *b),
        Sub { dst, a, b } => arith(*dst, BinOp::Sub, *a, *b),
        Mul { dst, a, b } => arith(*dst, BinOp::Mul, *a, *b),
        SDiv { dst, a, b } | UDiv { dst, a, b } => arith(*dst, BinOp::Div, *a, *b),
        SMod { dst, a, b } | UMod { dst, a, b } => arith(*dst, BinOp::Mod, *a, *b),
        Shl { dst, a, b } => arith(*dst, BinOp::Shl, *a, *b),
        SShr { dst, a, b } => arith(*dst, BinOp::Shr, *a, *b),
        UShr { dst, a, b } => arith(*dst, BinOp::UShr, *a, *b),
        And { dst, a, b } => arith(*dst, BinOp::And, *a, *b),
        Or { dst, a, b } => arith(*dst, BinOp::Or, *a, *b),
        Xor { dst, a, b } => arith(*dst, BinOp::Xor, *a, *b),
        Neg { dst, src } => unop(*dst, UnOp::Neg, *src),
        Not { dst, src } => unop(*dst, UnOp::Not, *src),
        Incr { dst } => step(*dst, BinOp::Add),
        Decr { dst } => step(*dst, BinOp::Sub),

        Call0 { dst, fun } => call(*dst, CallTarget::Fun(*fun), vec![]),
        Call1 { dst, fun, arg0 } => call(*dst, CallTarget::Fun(*fun), regs(&[*arg0])),
        Call2 { dst, fun, arg0, arg1 } => call(*dst, CallTarget::Fun(*fun), regs(&[*arg0, *arg1])),
        Call3 { dst, fun, arg0, arg1, arg2 } => {
            call(*dst, CallTarget::Fun(*fun), regs(&[*arg0, *arg1, *arg2]))
        }
        Call4 { dst, fun, arg0, arg1, arg2, arg3 } => {
            call(*dst, CallTarget::Fun(*fun), regs(&[*arg0, *arg1, *arg2, *arg3]))
        }
        CallN { dst, fun, args } => call(*dst, CallTarget::Fun(*fun), regs(args)),
        CallMethod { dst, field, args } => match args.split_first() {
            Some((recv, rest)) => call(
                *dst,
                CallTarget::Method {
                    obj: Box::new(ctx.reg_expr(*recv)),
                    name: method_name(ctx, *recv, field.0),
                },
                regs(rest),
            ),
            // A method call with no receiver is malformed; keep it opaque.
            None => Some(Stmt::Untranslated(op.clone())),
        },
        CallThis { dst, field, args } => call(
            *dst,
            CallTarget::Method {
                obj: Box::new(ctx.reg_expr(Reg(0))),
                name: method_name(ctx, Reg(0), field.0),
            },
            regs(args),
        ),
        CallClosure { dst, fun, args } => {
            call(*dst, CallTarget::Closure(Box::new(ctx.reg_expr(*fun))), regs(args))
        }

        StaticClosure { dst, fun } => assign(*dst, ExprKind::Closure { fun: *fun, bound: None }),
        InstanceClosure { dst, fun, obj } => assign(
            *dst,
            ExprKind::Closure { fun: *fun, bound: Some(Box::new(ctx.reg_expr(*obj))) },
        ),
        VirtualClosure { dst, obj, field } => match ctx.proto(*obj, field.0 as usize) {
            Some((fun, _)) => assign(
                *dst,
                ExprKind::Closure { fun, bound: Some(Box::new(ctx.reg_expr(*obj))) },
            ),
            None => Some(Stmt::Untranslated(op.clone())),
        },

        GetGlobal { dst, global } => match m.const_str(*global) {
            Some(s) => assign(*dst, ExprKind::Const(ConstVal::Str(s))),
            None => assign(*dst, ExprKind::Global { idx: global.0 }),
        },
        SetGlobal { global, src } => {
            let ty = m.globals.get(global.0).copied().unwrap_or(RefType(0));
            Some(Stmt::Assign {
                dst: Expr::new(ty, ExprKind::Global { idx: global.0 }),
                src: ctx.reg_expr(*src),
            })
        }

        Field { dst, obj, field: fld } => assign(*dst, field(*obj, fld.0)),
        SetField { obj, field: fld, src } => Some(Stmt::Assign {
            dst: Expr::new(ctx.reg_ty(*src), field(*obj, fld.0)),
            src: ctx.reg_expr(*src),
        }),
        GetThis { dst, field: fld } => assign(*dst, field(Reg(0), fld.0)),
        SetThis { field: fld, src } => Some(Stmt::Assign {
            dst: Expr::new(ctx.reg_ty(*src), field(Reg(0), fld.0)),
            src: ctx.reg_expr(*src),
        }),
        DynGet { dst, obj, field: name } => assign(
            *dst,
            ExprKind::Field {
                obj: Box::new(ctx.reg_expr(*obj)),
                name: m.str_(*name).unwrap_or("?").to_string(),
            },
        ),
        DynSet { obj, field: name, src } => Some(Stmt::Assign {
            dst: Expr::new(
                ctx.reg_ty(*src),
                ExprKind::Field {
                    obj: Box::new(ctx.reg_expr(*obj)),
                    name: m.str_(*name).unwrap_or("?").to_string(),
                },
            ),
            src: ctx.reg_expr(*src),
        }),

        GetArray { dst, array, index } => assign(
            *dst,
            ExprKind::Index {
                obj: Box::new(ctx.reg_expr(*array)),
                index: Box::new(ctx.reg_expr(*index)),
            },
        ),
        SetArray { array, index, src } => Some(Stmt::Assign {
            dst: Expr::new(
                ctx.reg_ty(*src),
                ExprKind::Index {
                    obj: Box::new(ctx.reg_expr(*array)),
                    index: Box::new(ctx.reg_expr(*index)),
                },
            ),
            src: ctx.reg_expr(*src),
        }),
        ArraySize { dst, array } => assign(
            *dst,
            ExprKind::Field { obj: Box::new(ctx.reg_expr(*array)), name: "length".into() },
        ),

        ToDyn { dst, src } => cast(*dst, CastKind::ToDyn, *src),
        ToSFloat { dst, src } => cast(*dst, CastKind::ToSFloat, *src),
        ToUFloat { dst, src } => cast(*dst, CastKind::ToUFloat, *src),
        ToInt { dst, src } => cast(*dst, CastKind::ToInt, *src),
        SafeCast { dst, src } => cast(*dst, CastKind::SafeCast, *src),
        UnsafeCast { dst, src } => cast(*dst, CastKind::UnsafeCast, *src),
        ToVirtual { dst, src } => cast(*dst, CastKind::ToVirtual, *src),

        New { dst } => assign(*dst, ExprKind::New),
        MakeEnum { dst, construct, args } => assign(
            *dst,
            ExprKind::EnumConstruct { construct: construct.0, args: regs(args) },
        ),
        EnumAlloc { dst, construct } => {
            assign(*dst, ExprKind::EnumConstruct { construct: construct.0, args: vec![] })
        }

        Ret { ret } => Some(Stmt::Return(if ctx.is_void_reg(*ret) {
            None
        } else {
            Some(ctx.reg_expr(*ret))
        })),
        Throw { exc } | Rethrow { exc } => Some(Stmt::Throw(ctx.reg_expr(*exc))),

        // Handled by the structurer.
        JTrue { .. } | JFalse { .. } | JNull { .. } | JNotNull { .. } | JSLt { .. }
        | JSGte { .. } | JSGt { .. } | JSLte { .. } | JULt { .. } | JUGte { .. }
        | JNotLt { .. } | JNotGte { .. } | JEq { .. } | JNotEq { .. } | JAlways { .. }
        | Switch { .. } | Trap { .. } | EndTrap { .. } => None,

        // Markers and padding.
        Label | Nop => None,

        other => {
            trace!(op = other.name(), pc, "no lifting for opcode");
            Some(Stmt::Untranslated(other.clone()))
        }
    }
}

/// Method name for a vtable slot, preferring the proto table of the
/// receiver's type.
fn method_name(ctx: &FuncCtx<'_>, recv: Reg, idx: usize) -> String {
    ctx.proto(recv, idx)
        .map(|(_, name)| name)
        .unwrap_or_else(|| format!("method{idx}"))
}

/// The condition under which a conditional branch is taken.
pub fn branch_cond(ctx: &FuncCtx<'_>, op: &Opcode) -> Option<Expr> {
    use Opcode::*;
    let cmp = |cmp_op: CmpOp, a: Reg, b: Reg| {
        Some(Expr::new(
            ctx.bool_ty(),
            ExprKind::Cmp {
                op: cmp_op,
                lhs: Box::new(ctx.reg_expr(a)),
                rhs: Box::new(ctx.reg_expr(b)),
            },
        ))
    };
    let null_cmp = |cmp_op: CmpOp, r: Reg| {
        Some(Expr::new(
            ctx.bool_ty(),
            ExprKind::Cmp {
                op: cmp_op,
                lhs: Box::new(ctx.reg_expr(r)),
                rhs: Box::new(Expr::new(ctx.reg_ty(r), ExprKind::Const(ConstVal::Null))),
            },
        ))
    };
    match op {
        JTrue { cond, .. } => Some(ctx.reg_expr(*cond)),
        JFalse { cond, .. } => Some(negate(ctx, ctx.reg_expr(*cond))),
        JNull { reg, .. } => null_cmp(CmpOp::Eq, *reg),
        JNotNull { reg, .. } => null_cmp(CmpOp::NotEq, *reg),
        JSLt { a, b, .. } | JULt { a, b, .. } => cmp(CmpOp::Lt, *a, *b),
        JSGte { a, b, .. } | JUGte { a, b, .. } => cmp(CmpOp::Gte, *a, *b),
        JSGt { a, b, .. } => cmp(CmpOp::Gt, *a, *b),
        JSLte { a, b, .. } => cmp(CmpOp::Lte, *a, *b),
        JNotLt { a, b, .. } => cmp(CmpOp::NotLt, *a, *b),
        JNotGte { a, b, .. } => cmp(CmpOp::NotGte, *a, *b),
        JEq { a, b, .. } => cmp(CmpOp::Eq, *a, *b),
        JNotEq { a, b, .. } => cmp(CmpOp::NotEq, *a, *b),
        _ => None,
    }
}

/// Branch-exact logical negation.
pub fn negate(ctx: &FuncCtx<'_>, expr: Expr) -> Expr {
    match expr.kind {
        ExprKind::Cmp { op, lhs, rhs } => {
            Expr::new(expr.ty, ExprKind::Cmp { op: op.negate(), lhs, rhs })
        }
        ExprKind::Unop { op: UnOp::Not, expr: inner } => *inner,
        ExprKind::Const(ConstVal::Bool(b)) => {
            Expr::new(expr.ty, ExprKind::Const(ConstVal::Bool(!b)))
        }
        kind => Expr::new(
            ctx.bool_ty(),
            ExprKind::Unop { op: UnOp::Not, expr: Box::new(Expr::new(expr.ty, kind)) },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlb::opcodes::{RefInt, RefString};
    use hlb::types::TypeFun;

    fn module() -> Module {
        let mut m = Module::new(4);
        m.strings = vec!["total".into()];
        m.ints = vec![7];
        m.types = vec![
            Type::Void,
            Type::I32,
            Type::Bool,
            Type::Fun(TypeFun { args: vec![RefType(1)], ret: RefType(1) }),
        ];
        m
    }

    #[test]
    fn constants_and_arith_lift_to_assigns() {
        let m = module();
        let f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(1), RefType(1)],
            vec![
                Opcode::Int { dst: Reg(1), ptr: RefInt(0) },
                Opcode::Add { dst: Reg(1), a: Reg(1), b: Reg(0) },
                Opcode::Ret { ret: Reg(1) },
            ],
        );
        let ctx = FuncCtx::new(&m, &f);
        let block = lift_range(&ctx, 0, 2);
        assert_eq!(block.len(), 3);
        assert!(matches!(
            &block[0],
            Stmt::Assign { src: Expr { kind: ExprKind::Const(ConstVal::Int(7)), .. }, .. }
        ));
        assert!(matches!(
            &block[1],
            Stmt::Assign { src: Expr { kind: ExprKind::Arith { op: BinOp::Add, .. }, .. }, .. }
        ));
        assert!(matches!(&block[2], Stmt::Return(Some(_))));
    }

    #[test]
    fn arg_registers_lift_as_args() {
        let m = module();
        let f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(1), RefType(1)],
            vec![Opcode::Ret { ret: Reg(0) }],
        );
        let ctx = FuncCtx::new(&m, &f);
        assert!(matches!(ctx.reg_expr(Reg(0)).kind, ExprKind::Arg { .. }));
        assert!(matches!(ctx.reg_expr(Reg(1)).kind, ExprKind::Local { .. }));
    }

    #[test]
    fn void_call_becomes_expression_statement() {
        let m = module();
        let f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(1), RefType(0)],
            vec![Opcode::Call0 { dst: Reg(1), fun: RefFun(2) }],
        );
        let ctx = FuncCtx::new(&m, &f);
        assert!(matches!(lift_op(&ctx, 0), Some(Stmt::ExprStmt(_))));
    }

    #[test]
    fn void_return_is_bare() {
        let m = module();
        let f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(0)],
            vec![Opcode::Ret { ret: Reg(0) }],
        );
        let ctx = FuncCtx::new(&m, &f);
        assert!(matches!(lift_op(&ctx, 0), Some(Stmt::Return(None))));
    }

    #[test]
    fn names_recovered_from_assigns() {
        let m = module();
        let mut f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(1), RefType(1)],
            vec![
                Opcode::Int { dst: Reg(1), ptr: RefInt(0) },
                Opcode::Ret { ret: Reg(1) },
            ],
        );
        // "total" names the destination of op 0.
        f.set_assigns(vec![(RefString(0), 1)]);
        let ctx = FuncCtx::new(&m, &f);
        assert_eq!(ctx.names[1].as_deref(), Some("total"));
        assert_eq!(ctx.names[0], None);
    }

    #[test]
    fn negative_assign_names_argument() {
        let m = module();
        let mut f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(1)],
            vec![Opcode::Ret { ret: Reg(0) }],
        );
        f.set_assigns(vec![(RefString(0), -1)]);
        let ctx = FuncCtx::new(&m, &f);
        assert_eq!(ctx.names[0].as_deref(), Some("total"));
    }

    #[test]
    fn branch_conditions_pick_comparison_ops() {
        let m = module();
        let f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(1), RefType(1)],
            vec![Opcode::Ret { ret: Reg(0) }],
        );
        let ctx = FuncCtx::new(&m, &f);
        let cond = branch_cond(&ctx, &Opcode::JSLt { a: Reg(0), b: Reg(1), offset: 1 }).unwrap();
        assert!(matches!(cond.kind, ExprKind::Cmp { op: CmpOp::Lt, .. }));
        let neg = negate(&ctx, cond);
        assert!(matches!(neg.kind, ExprKind::Cmp { op: CmpOp::Gte, .. }));

        let unknown = branch_cond(&ctx, &Opcode::Nop);
        assert!(unknown.is_none());
    }

    #[test]
    fn unknown_opcode_becomes_untranslated() {
        let m = module();
        let f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(1), RefType(1)],
            vec![Opcode::Prefetch { value: Reg(0), field: hlb::opcodes::RefField(0), mode: 1 }],
        );
        let ctx = FuncCtx::new(&m, &f);
        assert!(matches!(lift_op(&ctx, 0), Some(Stmt::Untranslated(_))));
    }
}
