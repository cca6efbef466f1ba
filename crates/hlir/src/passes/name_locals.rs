//! Register coalescing by name: `reg_N` locals take the source-level names
//! recovered from the debug `assigns` table.

use crate::ir::{walk_exprs_mut, Block, ExprKind};
use crate::lift::FuncCtx;
use crate::passes::Pass;

pub struct NameLocalsPass;

impl Pass for NameLocalsPass {
    fn name(&self) -> &str {
        "name_locals"
    }

    fn run(&self, body: &mut Block, ctx: &FuncCtx<'_>) -> usize {
        let mut renamed = 0;
        walk_exprs_mut(body, &mut |e| {
            if let ExprKind::Local { reg, name } | ExprKind::Arg { reg, name } = &mut e.kind {
                if name.is_none() {
                    if let Some(Some(n)) = ctx.names.get(reg.0 as usize) {
                        *name = Some(n.clone());
                        renamed += 1;
                    }
                }
            }
        });
        renamed
    }
}
