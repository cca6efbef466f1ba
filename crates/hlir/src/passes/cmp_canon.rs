//! Comparison canonicalization: constants move to the right-hand side,
//! mirroring the operator.

use crate::ir::{walk_exprs_mut, Block, ExprKind};
use crate::lift::FuncCtx;
use crate::passes::Pass;

pub struct CmpCanonPass;

impl Pass for CmpCanonPass {
    fn name(&self) -> &str {
        "cmp_canon"
    }

    fn run(&self, body: &mut Block, _ctx: &FuncCtx<'_>) -> usize {
        let mut swapped = 0;
        walk_exprs_mut(body, &mut |e| {
            if let ExprKind::Cmp { op, lhs, rhs } = &mut e.kind {
                let const_on_left = matches!(lhs.kind, ExprKind::Const(_))
                    && !matches!(rhs.kind, ExprKind::Const(_));
                if const_on_left {
                    if let Some(mirrored) = op.mirror() {
                        std::mem::swap(lhs, rhs);
                        *op = mirrored;
                        swapped += 1;
                    }
                }
            }
        });
        swapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CmpOp, ConstVal, Expr, Stmt};
    use crate::lift::FuncCtx;
    use hlb::opcodes::{Opcode, Reg, RefFun, RefType};
    use hlb::types::{Type, TypeFun};
    use hlb::{Function, Module};

    fn ctx_module() -> (Module, Function) {
        let mut m = Module::new(4);
        m.types = vec![
            Type::Void,
            Type::I32,
            Type::Fun(TypeFun { args: vec![RefType(1)], ret: RefType(1) }),
        ];
        let f = Function::new(
            RefType(2),
            RefFun(0),
            vec![RefType(1); 2],
            vec![Opcode::Ret { ret: Reg(0) }],
        );
        (m, f)
    }

    #[test]
    fn constant_moves_right_and_mirrors() {
        let (m, f) = ctx_module();
        let ctx = FuncCtx::new(&m, &f);
        // 5 < x  ->  x > 5
        let mut body = vec![Stmt::Return(Some(Expr::new(
            RefType(1),
            ExprKind::Cmp {
                op: CmpOp::Lt,
                lhs: Box::new(Expr::new(RefType(1), ExprKind::Const(ConstVal::Int(5)))),
                rhs: Box::new(ctx.reg_expr(Reg(0))),
            },
        )))];
        assert_eq!(CmpCanonPass.run(&mut body, &ctx), 1);
        match &body[0] {
            Stmt::Return(Some(Expr { kind: ExprKind::Cmp { op, lhs, rhs }, .. })) => {
                assert_eq!(*op, CmpOp::Gt);
                assert!(matches!(lhs.kind, ExprKind::Arg { .. }));
                assert!(matches!(rhs.kind, ExprKind::Const(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(CmpCanonPass.run(&mut body, &ctx), 0);
    }

    #[test]
    fn nan_sensitive_ops_stay_put() {
        let (m, f) = ctx_module();
        let ctx = FuncCtx::new(&m, &f);
        let mut body = vec![Stmt::Return(Some(Expr::new(
            RefType(1),
            ExprKind::Cmp {
                op: CmpOp::NotLt,
                lhs: Box::new(Expr::new(RefType(1), ExprKind::Const(ConstVal::Int(5)))),
                rhs: Box::new(ctx.reg_expr(Reg(0))),
            },
        )))];
        assert_eq!(CmpCanonPass.run(&mut body, &ctx), 0);
    }
}
