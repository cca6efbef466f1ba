//! Constant folding for integer, float and boolean operands. Division by a
//! zero constant is left in place for the runtime to raise.

use crate::ir::{walk_exprs_mut, BinOp, Block, CmpOp, ConstVal, ExprKind, UnOp};
use crate::lift::FuncCtx;
use crate::passes::Pass;

pub struct ConstFoldPass;

impl Pass for ConstFoldPass {
    fn name(&self) -> &str {
        "const_fold"
    }

    fn run(&self, body: &mut Block, _ctx: &FuncCtx<'_>) -> usize {
        let mut folded = 0;
        // Expression walks visit leaves first, so nested folds cascade in
        // one pass.
        walk_exprs_mut(body, &mut |e| {
            let new_kind = match &e.kind {
                ExprKind::Arith { op, lhs, rhs } => match (&lhs.kind, &rhs.kind) {
                    (ExprKind::Const(a), ExprKind::Const(b)) => {
                        fold_arith(*op, a, b).map(ExprKind::Const)
                    }
                    _ => None,
                },
                ExprKind::Cmp { op, lhs, rhs } => match (&lhs.kind, &rhs.kind) {
                    (ExprKind::Const(a), ExprKind::Const(b)) => {
                        fold_cmp(*op, a, b).map(|b| ExprKind::Const(ConstVal::Bool(b)))
                    }
                    _ => None,
                },
                ExprKind::Unop { op, expr } => match (&op, &expr.kind) {
                    (UnOp::Neg, ExprKind::Const(ConstVal::Int(v))) => {
                        Some(ExprKind::Const(ConstVal::Int(v.wrapping_neg())))
                    }
                    (UnOp::Neg, ExprKind::Const(ConstVal::Float(v))) => {
                        Some(ExprKind::Const(ConstVal::Float(-v)))
                    }
                    (UnOp::Not, ExprKind::Const(ConstVal::Bool(v))) => {
                        Some(ExprKind::Const(ConstVal::Bool(!v)))
                    }
                    _ => None,
                },
                _ => None,
            };
            if let Some(kind) = new_kind {
                e.kind = kind;
                folded += 1;
            }
        });
        folded
    }
}

fn fold_arith(op: BinOp, a: &ConstVal, b: &ConstVal) -> Option<ConstVal> {
    match (a, b) {
        (ConstVal::Int(a), ConstVal::Int(b)) => {
            let (a, b) = (*a, *b);
            Some(ConstVal::Int(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return None;
                    }
                    a.wrapping_div(b)
                }
                BinOp::Mod => {
                    if b == 0 {
                        return None;
                    }
                    a.wrapping_rem(b)
                }
                BinOp::Shl => a.wrapping_shl(b as u32),
                BinOp::Shr => a.wrapping_shr(b as u32),
                BinOp::UShr => (a as u32).wrapping_shr(b as u32) as i32,
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Xor => a ^ b,
            }))
        }
        (ConstVal::Float(a), ConstVal::Float(b)) => {
            let (a, b) = (*a, *b);
            Some(ConstVal::Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                _ => return None,
            }))
        }
        (ConstVal::Bool(a), ConstVal::Bool(b)) => Some(ConstVal::Bool(match op {
            BinOp::And => *a && *b,
            BinOp::Or => *a || *b,
            BinOp::Xor => a != b,
            _ => return None,
        })),
        _ => None,
    }
}

fn fold_cmp(op: CmpOp, a: &ConstVal, b: &ConstVal) -> Option<bool> {
    match (a, b) {
        (ConstVal::Int(a), ConstVal::Int(b)) => Some(match op {
            CmpOp::Eq => a == b,
            CmpOp::NotEq => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Lte => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Gte => a >= b,
            CmpOp::NotLt => !(a < b),
            CmpOp::NotGte => !(a >= b),
        }),
        (ConstVal::Float(a), ConstVal::Float(b)) => Some(match op {
            CmpOp::Eq => a == b,
            CmpOp::NotEq => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Lte => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Gte => a >= b,
            CmpOp::NotLt => !(a < b),
            CmpOp::NotGte => !(a >= b),
        }),
        (ConstVal::Bool(a), ConstVal::Bool(b)) => match op {
            CmpOp::Eq => Some(a == b),
            CmpOp::NotEq => Some(a != b),
            _ => None,
        },
        _ => None,
    }
}
