//! IR-to-IR rewrites. Each pass is idempotent, preserves observable
//! side-effect order, and reports how many rewrites it made.

use std::collections::HashMap;

use tracing::trace;

use crate::ir::{walk_stmts_mut, Block, CastKind, Expr, ExprKind, Stmt};
use crate::lift::FuncCtx;

pub mod branch_fold;
pub mod closure_call;
pub mod cmp_canon;
pub mod const_fold;
pub mod dead_store;
pub mod move_elim;
pub mod name_locals;

pub use branch_fold::BranchFoldPass;
pub use closure_call::ClosureCallPass;
pub use cmp_canon::CmpCanonPass;
pub use const_fold::ConstFoldPass;
pub use dead_store::DeadStorePass;
pub use move_elim::MoveElimPass;
pub use name_locals::NameLocalsPass;

pub trait Pass {
    fn name(&self) -> &str;
    /// Rewrite `body` in place; returns the number of rewrites applied.
    fn run(&self, body: &mut Block, ctx: &FuncCtx<'_>) -> usize;
}

/// The fixed pipeline, in order: naming, folding, dead stores, redundant
/// moves, comparison canonicalization, constant branches, closure calls.
pub fn optimize(body: &mut Block, ctx: &FuncCtx<'_>) -> usize {
    let passes: Vec<Box<dyn Pass>> = vec![
        Box::new(NameLocalsPass),
        Box::new(ConstFoldPass),
        Box::new(DeadStorePass),
        Box::new(MoveElimPass),
        Box::new(CmpCanonPass),
        Box::new(BranchFoldPass),
        Box::new(ClosureCallPass),
    ];
    let mut total = 0;
    for pass in &passes {
        let n = pass.run(body, ctx);
        trace!(pass = pass.name(), rewrites = n);
        total += n;
    }
    total
}

/// Register read counts over the whole tree. The root of an assignment
/// destination is a write, not a read; everything else (including the
/// object of a field store) reads.
pub(crate) fn count_reads(body: &mut Block) -> HashMap<u32, usize> {
    let mut counts = HashMap::new();
    walk_stmts_mut(body, &mut |stmt| match stmt {
        Stmt::Assign { dst, src } => {
            collect_reads(src, &mut counts);
            if !matches!(dst.kind, ExprKind::Local { .. } | ExprKind::Arg { .. }) {
                collect_reads(dst, &mut counts);
            }
        }
        other => {
            other.walk_exprs_mut(&mut |e| {
                if let ExprKind::Local { reg, .. } | ExprKind::Arg { reg, .. } = e.kind {
                    *counts.entry(reg.0).or_insert(0) += 1;
                }
            });
        }
    });
    counts
}

fn collect_reads(expr: &mut Expr, counts: &mut HashMap<u32, usize>) {
    expr.walk_mut(&mut |e| {
        if let ExprKind::Local { reg, .. } | ExprKind::Arg { reg, .. } = e.kind {
            *counts.entry(reg.0).or_insert(0) += 1;
        }
    });
}

/// True when evaluating the expression has no observable effect: safe to
/// drop if its value is unused. Field and index reads can throw on null
/// and calls run arbitrary code, so both stay.
pub(crate) fn is_pure(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Const(_) | ExprKind::Local { .. } | ExprKind::Arg { .. }
        | ExprKind::Global { .. } | ExprKind::New => true,
        ExprKind::Arith { lhs, rhs, .. } | ExprKind::Cmp { lhs, rhs, .. } => {
            is_pure(lhs) && is_pure(rhs)
        }
        ExprKind::Unop { expr, .. } => is_pure(expr),
        ExprKind::Cast { kind, expr } => *kind != CastKind::SafeCast && is_pure(expr),
        ExprKind::Closure { bound, .. } => bound.as_deref().map(is_pure).unwrap_or(true),
        ExprKind::EnumConstruct { args, .. } => args.iter().all(is_pure),
        ExprKind::Field { .. } | ExprKind::Index { .. } | ExprKind::Call { .. } => false,
    }
}
