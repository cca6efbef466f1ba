//! Rendering structured IR as readable pseudo-Haxe. Nesting indents by
//! four spaces; parentheses appear only where precedence demands them.

use hlb::disasm;
use hlb::opcodes::{Reg, RefFun, RefType};
use hlb::Module;

use crate::ir::*;
use crate::lift::FuncCtx;

/// Pseudo-source for one function: signature line plus structured body.
pub fn function(ctx: &FuncCtx<'_>, body: &Block) -> String {
    let m = ctx.m;
    let f = ctx.f;
    let name = disasm::func_name(m, f.findex()).unwrap_or_else(|| format!("f@{}", f.findex().0));
    let (params, ret) = match m.ty(f.ty()).and_then(|t| t.as_fun()) {
        Some(fun) => {
            let skip = usize::from(ctx.is_method);
            let params = fun
                .args
                .iter()
                .enumerate()
                .skip(skip)
                .map(|(i, a)| format!("{}: {}", arg_name(ctx, i), haxe_type(m, *a)))
                .collect::<Vec<_>>()
                .join(", ");
            (params, haxe_type(m, fun.ret))
        }
        None => (String::new(), "?".to_string()),
    };
    let mut p = Printer { ctx, out: String::new(), indent: 0 };
    p.line(&format!("function {name}({params}): {ret} {{"));
    p.indent += 1;
    p.block(body);
    p.indent -= 1;
    p.line("}");
    p.out
}

fn arg_name(ctx: &FuncCtx<'_>, i: usize) -> String {
    if ctx.is_method && i == 0 {
        return "this".into();
    }
    ctx.names
        .get(i)
        .and_then(|n| n.clone())
        .unwrap_or_else(|| format!("reg{i}"))
}

/// Type display names in the pseudo dialect.
pub fn haxe_type(m: &Module, t: RefType) -> String {
    let name = match m.ty(t) {
        Some(ty) => disasm::type_name(m, ty),
        None => return "?".into(),
    };
    match name.as_str() {
        "I32" => "Int".into(),
        "UI8" | "UI16" | "I64" => "Int".into(),
        "F32" | "F64" => "Float".into(),
        "Bytes" => "hl.Bytes".into(),
        "Dyn" => "Dynamic".into(),
        "Fun" | "Method" => "Function".into(),
        "TypeType" => "Type".into(),
        _ => name,
    }
}

struct Printer<'a, 'm> {
    ctx: &'a FuncCtx<'m>,
    out: String,
    indent: usize,
}

const ATOM: u8 = 100;

fn bin_symbol(op: BinOp) -> (&'static str, u8) {
    match op {
        BinOp::Mul => ("*", 80),
        BinOp::Div => ("/", 80),
        BinOp::Mod => ("%", 80),
        BinOp::Add => ("+", 70),
        BinOp::Sub => ("-", 70),
        BinOp::Shl => ("<<", 60),
        BinOp::Shr => (">>", 60),
        BinOp::UShr => (">>>", 60),
        BinOp::And => ("&", 40),
        BinOp::Xor => ("^", 35),
        BinOp::Or => ("|", 30),
    }
}

impl<'a, 'm> Printer<'a, 'm> {
    fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn block(&mut self, block: &Block) {
        for stmt in block {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { dst, src } => {
                let line = format!("{} = {};", self.expr(dst, 0), self.expr(src, 0));
                self.line(&line);
            }
            Stmt::ExprStmt(e) => {
                let line = format!("{};", self.expr(e, 0));
                self.line(&line);
            }
            Stmt::Return(None) => self.line("return;"),
            Stmt::Return(Some(e)) => {
                let line = format!("return {};", self.expr(e, 0));
                self.line(&line);
            }
            Stmt::Throw(e) => {
                let line = format!("throw {};", self.expr(e, 0));
                self.line(&line);
            }
            Stmt::Break => self.line("break;"),
            Stmt::Continue => self.line("continue;"),
            Stmt::Jump { target } => self.line(&format!("goto {target};")),
            Stmt::Untranslated(op) => self.line(&format!("/* {} */", op.name())),
            Stmt::If { cond, then_blk, else_blk } => self.if_chain(cond, then_blk, else_blk),
            Stmt::Loop { kind, header, cond, body } => self.loop_stmt(*kind, header, cond, body),
            Stmt::Switch { scrutinee, cases, default } => {
                let line = format!("switch ({}) {{", self.expr(scrutinee, 0));
                self.line(&line);
                self.indent += 1;
                for (value, blk) in cases {
                    self.line(&format!("case {value}:"));
                    self.indent += 1;
                    self.block(blk);
                    self.indent -= 1;
                }
                if !default.is_empty() {
                    self.line("default:");
                    self.indent += 1;
                    self.block(default);
                    self.indent -= 1;
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Try { body, catches } => {
                self.line("try {");
                self.indent += 1;
                self.block(body);
                self.indent -= 1;
                for (var, blk) in catches {
                    let line = format!(
                        "}} catch ({}: {}) {{",
                        self.expr(var, ATOM),
                        haxe_type(self.ctx.m, var.ty)
                    );
                    self.line(&line);
                    self.indent += 1;
                    self.block(blk);
                    self.indent -= 1;
                }
                self.line("}");
            }
        }
    }

    fn if_chain(&mut self, cond: &Expr, then_blk: &Block, else_blk: &Block) {
        let line = format!("if ({}) {{", self.expr(cond, 0));
        self.line(&line);
        self.indent += 1;
        self.block(then_blk);
        self.indent -= 1;
        match else_blk.as_slice() {
            [] => self.line("}"),
            [Stmt::If { cond, then_blk, else_blk }] => {
                // `} else if` chains stay flat.
                for _ in 0..self.indent {
                    self.out.push_str("    ");
                }
                self.out.push_str("} else ");
                let line = format!("if ({}) {{", self.expr(cond, 0));
                self.out.push_str(&line);
                self.out.push('\n');
                self.indent += 1;
                self.block(then_blk);
                self.indent -= 1;
                match else_blk.as_slice() {
                    [] => self.line("}"),
                    _ => {
                        self.line("} else {");
                        self.indent += 1;
                        self.block(else_blk);
                        self.indent -= 1;
                        self.line("}");
                    }
                }
            }
            _ => {
                self.line("} else {");
                self.indent += 1;
                self.block(else_blk);
                self.indent -= 1;
                self.line("}");
            }
        }
    }

    fn loop_stmt(&mut self, kind: LoopKind, header: &Block, cond: &Option<Expr>, body: &Block) {
        match (kind, cond) {
            (LoopKind::PreTested, Some(c)) if header.is_empty() => {
                let line = format!("while ({}) {{", self.expr(c, 0));
                self.line(&line);
                self.indent += 1;
                self.block(body);
                self.indent -= 1;
                self.line("}");
            }
            (LoopKind::PostTested, Some(c)) => {
                self.line("do {");
                self.indent += 1;
                self.block(header);
                self.block(body);
                self.indent -= 1;
                let line = format!("}} while ({});", self.expr(c, 0));
                self.line(&line);
            }
            _ => {
                // Header statements re-run before the test, so the test
                // moves inside.
                self.line("while (true) {");
                self.indent += 1;
                self.block(header);
                if let Some(c) = cond {
                    let neg = crate::lift::negate(self.ctx, c.clone());
                    let line = format!("if ({}) break;", self.expr(&neg, 0));
                    self.line(&line);
                }
                self.block(body);
                self.indent -= 1;
                self.line("}");
            }
        }
    }

    /// Render an expression; parenthesized if it binds looser than
    /// `min_prec`.
    fn expr(&self, e: &Expr, min_prec: u8) -> String {
        let (text, prec) = self.expr_prec(e);
        if prec < min_prec {
            format!("({text})")
        } else {
            text
        }
    }

    fn expr_prec(&self, e: &Expr) -> (String, u8) {
        let m = self.ctx.m;
        match &e.kind {
            ExprKind::Const(c) => (
                match c {
                    ConstVal::Int(v) => v.to_string(),
                    ConstVal::Float(v) => v.to_string(),
                    ConstVal::Bool(v) => v.to_string(),
                    ConstVal::Str(s) => format!("{s:?}"),
                    ConstVal::Bytes(i) => format!("bytes@{i}"),
                    ConstVal::Null => "null".to_string(),
                },
                ATOM,
            ),
            ExprKind::Local { reg, name } => (self.reg_name(*reg, name), ATOM),
            ExprKind::Arg { reg, name } => {
                if self.ctx.is_method && reg.0 == 0 {
                    ("this".to_string(), ATOM)
                } else {
                    (self.reg_name(*reg, name), ATOM)
                }
            }
            ExprKind::Global { idx } => (format!("g@{idx}"), ATOM),
            ExprKind::Field { obj, name } => {
                (format!("{}.{name}", self.expr(obj, ATOM)), ATOM)
            }
            ExprKind::Index { obj, index } => (
                format!("{}[{}]", self.expr(obj, ATOM), self.expr(index, 0)),
                ATOM,
            ),
            ExprKind::Arith { op, lhs, rhs } => {
                let (sym, prec) = bin_symbol(*op);
                (
                    format!(
                        "{} {sym} {}",
                        self.expr(lhs, prec),
                        self.expr(rhs, prec + 1)
                    ),
                    prec,
                )
            }
            ExprKind::Cmp { op, lhs, rhs } => match op {
                CmpOp::NotLt => (
                    format!("!({} < {})", self.expr(lhs, 50), self.expr(rhs, 51)),
                    90,
                ),
                CmpOp::NotGte => (
                    format!("!({} >= {})", self.expr(lhs, 50), self.expr(rhs, 51)),
                    90,
                ),
                _ => {
                    let (sym, prec) = match op {
                        CmpOp::Eq => ("==", 45),
                        CmpOp::NotEq => ("!=", 45),
                        CmpOp::Lt => ("<", 50),
                        CmpOp::Lte => ("<=", 50),
                        CmpOp::Gt => (">", 50),
                        CmpOp::Gte => (">=", 50),
                        CmpOp::NotLt | CmpOp::NotGte => unreachable!(),
                    };
                    (
                        format!(
                            "{} {sym} {}",
                            self.expr(lhs, prec),
                            self.expr(rhs, prec + 1)
                        ),
                        prec,
                    )
                }
            },
            ExprKind::Unop { op, expr } => {
                let sym = match op {
                    UnOp::Neg => "-",
                    UnOp::Not => "!",
                };
                (format!("{sym}{}", self.expr(expr, 90)), 90)
            }
            ExprKind::Cast { kind, expr } => {
                let f = match kind {
                    CastKind::ToInt => "int",
                    CastKind::ToSFloat | CastKind::ToUFloat => "float",
                    CastKind::ToDyn => "dyn",
                    CastKind::ToVirtual => "virtual",
                    CastKind::SafeCast => "cast",
                    CastKind::UnsafeCast => "rawcast",
                };
                (format!("{f}({})", self.expr(expr, 0)), ATOM)
            }
            ExprKind::New => (format!("new {}()", haxe_type(m, e.ty)), ATOM),
            ExprKind::Closure { fun, bound } => (self.closure_text(*fun, bound), ATOM),
            ExprKind::EnumConstruct { construct, args } => {
                let name = match m.ty(e.ty) {
                    Some(hlb::types::Type::Enum(en)) => en
                        .constructs
                        .get(*construct)
                        .and_then(|c| m.str_(c.name))
                        .map(str::to_string),
                    _ => None,
                }
                .unwrap_or_else(|| format!("construct{construct}"));
                (format!("{name}({})", self.args_text(args)), ATOM)
            }
            ExprKind::Call { target, args } => {
                let callee = match target {
                    CallTarget::Fun(f) => disasm::func_name(m, *f)
                        .unwrap_or_else(|| format!("f@{}", f.0)),
                    CallTarget::Method { obj, name } => {
                        format!("{}.{name}", self.expr(obj, ATOM))
                    }
                    CallTarget::Closure(c) => match &c.kind {
                        ExprKind::Closure { fun, bound } => self.closure_text(*fun, bound),
                        _ => self.expr(c, ATOM),
                    },
                };
                (format!("{callee}({})", self.args_text(args)), ATOM)
            }
        }
    }

    fn reg_name(&self, reg: Reg, name: &Option<String>) -> String {
        name.clone().unwrap_or_else(|| format!("reg{}", reg.0))
    }

    fn args_text(&self, args: &[Expr]) -> String {
        args.iter()
            .map(|a| self.expr(a, 0))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `obj.method` for a bound closure, `Class.method` or `f@N` otherwise.
    fn closure_text(&self, fun: RefFun, bound: &Option<Box<Expr>>) -> String {
        let m = self.ctx.m;
        match bound {
            Some(obj) => {
                let method = disasm::proto_for(m, fun)
                    .map(|(o, p)| m.str_(o.protos[p].name).unwrap_or("?").to_string())
                    .or_else(|| disasm::binding_for(m, fun).map(|(_, name)| name))
                    .unwrap_or_else(|| format!("f@{}", fun.0));
                format!("{}.{method}", self.expr(obj, ATOM))
            }
            None => disasm::func_name(m, fun).unwrap_or_else(|| format!("f@{}", fun.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlb::opcodes::{Opcode, RefFun};
    use hlb::types::{Type, TypeFun};
    use hlb::Function;

    fn ctx_module() -> (Module, Function) {
        let mut m = Module::new(4);
        m.types = vec![
            Type::Void,
            Type::I32,
            Type::Bool,
            Type::Fun(TypeFun { args: vec![], ret: RefType(0) }),
        ];
        let f = Function::new(
            RefType(3),
            RefFun(0),
            vec![RefType(1); 6],
            vec![Opcode::Ret { ret: Reg(0) }],
        );
        (m, f)
    }

    fn int(v: i32) -> Expr {
        Expr::new(RefType(1), ExprKind::Const(ConstVal::Int(v)))
    }

    fn local(r: u32) -> Expr {
        Expr::new(RefType(1), ExprKind::Local { reg: Reg(r), name: None })
    }

    fn arith(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::new(
            RefType(1),
            ExprKind::Arith { op, lhs: Box::new(l), rhs: Box::new(r) },
        )
    }

    #[test]
    fn precedence_parenthesizes_only_when_needed() {
        let (m, f) = ctx_module();
        let ctx = FuncCtx::new(&m, &f);
        let p = Printer { ctx: &ctx, out: Default::default(), indent: 0 };

        // (1 + 2) * 3 keeps its parens; 1 + 2 * 3 drops them.
        let grouped = arith(BinOp::Mul, arith(BinOp::Add, int(1), int(2)), int(3));
        assert_eq!(p.expr(&grouped, 0), "(1 + 2) * 3");
        let flat = arith(BinOp::Add, int(1), arith(BinOp::Mul, int(2), int(3)));
        assert_eq!(p.expr(&flat, 0), "1 + 2 * 3");
        // Left-associative subtraction keeps right-side parens.
        let sub = arith(BinOp::Sub, int(1), arith(BinOp::Sub, int(2), int(3)));
        assert_eq!(p.expr(&sub, 0), "1 - (2 - 3)");
    }

    #[test]
    fn empty_function_renders_minimal_form() {
        let (m, f) = ctx_module();
        let ctx = FuncCtx::new(&m, &f);
        let text = function(&ctx, &vec![Stmt::Return(None)]);
        assert!(text.contains("function f@0(): Void {"), "{text}");
        assert!(text.contains("    return;"), "{text}");
        assert!(text.trim_end().ends_with('}'), "{text}");
    }

    #[test]
    fn if_without_else_omits_it() {
        let (m, f) = ctx_module();
        let ctx = FuncCtx::new(&m, &f);
        let body = vec![
            Stmt::If {
                cond: Expr::new(
                    RefType(2),
                    ExprKind::Cmp {
                        op: CmpOp::Gt,
                        lhs: Box::new(local(1)),
                        rhs: Box::new(int(5)),
                    },
                ),
                then_blk: vec![Stmt::Assign { dst: local(2), src: int(1) }],
                else_blk: vec![],
            },
            Stmt::Return(None),
        ];
        let text = function(&ctx, &body);
        assert!(text.contains("if (reg1 > 5) {"), "{text}");
        assert!(!text.contains("else"), "{text}");
    }

    #[test]
    fn loops_render_by_kind() {
        let (m, f) = ctx_module();
        let ctx = FuncCtx::new(&m, &f);
        let cond = Expr::new(
            RefType(2),
            ExprKind::Cmp { op: CmpOp::Lt, lhs: Box::new(local(1)), rhs: Box::new(int(5)) },
        );
        let text = function(
            &ctx,
            &vec![
                Stmt::Loop {
                    kind: LoopKind::PreTested,
                    header: vec![],
                    cond: Some(cond.clone()),
                    body: vec![Stmt::Break],
                },
                Stmt::Loop {
                    kind: LoopKind::PostTested,
                    header: vec![],
                    cond: Some(cond),
                    body: vec![Stmt::Continue],
                },
                Stmt::Loop { kind: LoopKind::Infinite, header: vec![], cond: None, body: vec![] },
            ],
        );
        assert!(text.contains("while (reg1 < 5) {"), "{text}");
        assert!(text.contains("} while (reg1 < 5);"), "{text}");
        assert!(text.contains("while (true) {"), "{text}");
    }

    #[test]
    fn untranslated_renders_as_comment() {
        let (m, f) = ctx_module();
        let ctx = FuncCtx::new(&m, &f);
        let text = function(
            &ctx,
            &vec![Stmt::Untranslated(Opcode::NullCheck { reg: Reg(0) })],
        );
        assert!(text.contains("/* NullCheck */"), "{text}");
    }
}
