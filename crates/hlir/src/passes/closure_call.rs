//! Virtual-closure call recognition: a closure bound into a single-use
//! temporary and invoked right away becomes a direct bound call, so
//! `this.obj.method(args)` reads like a call instead of three statements.

use crate::ir::{Block, CallTarget, ExprKind, Stmt};
use crate::lift::FuncCtx;
use crate::passes::{count_reads, Pass};

pub struct ClosureCallPass;

impl Pass for ClosureCallPass {
    fn name(&self) -> &str {
        "closure_call"
    }

    fn run(&self, body: &mut Block, _ctx: &FuncCtx<'_>) -> usize {
        let reads = count_reads(body);
        rewrite(body, &reads)
    }
}

fn reg_of(kind: &ExprKind) -> Option<u32> {
    match kind {
        ExprKind::Local { reg, .. } | ExprKind::Arg { reg, .. } => Some(reg.0),
        _ => None,
    }
}

/// The call-target temporary of a statement, when the statement is a call
/// through a closure register.
fn closure_callee(stmt: &Stmt) -> Option<u32> {
    let expr = match stmt {
        Stmt::Assign { src, .. } => src,
        Stmt::ExprStmt(e) => e,
        _ => return None,
    };
    match &expr.kind {
        ExprKind::Call { target: CallTarget::Closure(c), .. } => reg_of(&c.kind),
        _ => None,
    }
}

fn set_closure_target(stmt: &mut Stmt, closure: crate::ir::Expr) {
    let expr = match stmt {
        Stmt::Assign { src, .. } => src,
        Stmt::ExprStmt(e) => e,
        _ => return,
    };
    if let ExprKind::Call { target, .. } = &mut expr.kind {
        *target = CallTarget::Closure(Box::new(closure));
    }
}

fn rewrite(block: &mut Block, reads: &std::collections::HashMap<u32, usize>) -> usize {
    let mut rewritten = 0;
    let mut i = 0;
    while i + 1 < block.len() {
        // tmp = closure; ... tmp(args)  with tmp used only by the call.
        let closure_tmp = match &block[i] {
            Stmt::Assign { dst, src } => match (&dst.kind, &src.kind) {
                (ExprKind::Local { reg, .. }, ExprKind::Closure { .. })
                    if reads.get(&reg.0).copied().unwrap_or(0) == 1 =>
                {
                    Some(reg.0)
                }
                _ => None,
            },
            _ => None,
        };
        let matched = closure_tmp.is_some() && closure_callee(&block[i + 1]) == closure_tmp;
        if matched {
            // Fold a single-use adjacent definition of the bound receiver
            // in too, so `this`-loads travel with the closure. Adjacency
            // keeps evaluation order, so purity is not required.
            let mut closure = match block.remove(i) {
                Stmt::Assign { src, .. } => src,
                _ => unreachable!(),
            };
            if i > 0 {
                let bound_reg = match &closure.kind {
                    ExprKind::Closure { bound: Some(b), .. } => reg_of(&b.kind),
                    _ => None,
                };
                let producer = match (&block[i - 1], bound_reg) {
                    (Stmt::Assign { dst, src }, Some(b))
                        if reg_of(&dst.kind) == Some(b)
                            && reads.get(&b).copied().unwrap_or(0) == 1
                            && !matches!(src.kind, ExprKind::Call { .. }) =>
                    {
                        true
                    }
                    _ => false,
                };
                if producer {
                    if let Stmt::Assign { src, .. } = block.remove(i - 1) {
                        if let ExprKind::Closure { bound, .. } = &mut closure.kind {
                            *bound = Some(Box::new(src));
                        }
                        i -= 1;
                    }
                }
            }
            set_closure_target(&mut block[i], closure);
            rewritten += 1;
        }
        i += 1;
    }
    for stmt in block.iter_mut() {
        for child in stmt.child_blocks_mut() {
            rewritten += rewrite(child, reads);
        }
    }
    rewritten
}
