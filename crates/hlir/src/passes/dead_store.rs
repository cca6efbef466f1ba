//! Dead-store elimination: assignments to locals that are never read on
//! any path, with a side-effect-free right-hand side, disappear.

use crate::ir::{Block, ExprKind, Stmt};
use crate::lift::FuncCtx;
use crate::passes::{count_reads, is_pure, Pass};

pub struct DeadStorePass;

impl Pass for DeadStorePass {
    fn name(&self) -> &str {
        "dead_store"
    }

    fn run(&self, body: &mut Block, _ctx: &FuncCtx<'_>) -> usize {
        let reads = count_reads(body);
        let dead = |stmt: &Stmt| match stmt {
            Stmt::Assign { dst, src } => match dst.kind {
                ExprKind::Local { reg, .. } => {
                    reads.get(&reg.0).copied().unwrap_or(0) == 0 && is_pure(src)
                }
                _ => false,
            },
            _ => false,
        };
        sweep(body, &dead)
    }
}

fn sweep(block: &mut Block, dead: &dyn Fn(&Stmt) -> bool) -> usize {
    let before = block.len();
    block.retain(|stmt| !dead(stmt));
    let mut removed = before - block.len();
    for stmt in block.iter_mut() {
        for child in stmt.child_blocks_mut() {
            removed += sweep(child, dead);
        }
    }
    removed
}
