//! Constant-branch folding: `if (true) { A } else { B }` becomes `A`
//! spliced into the surrounding block, and the mirror case becomes `B`.

use crate::ir::{Block, ConstVal, ExprKind, Stmt};
use crate::lift::FuncCtx;
use crate::passes::Pass;

pub struct BranchFoldPass;

impl Pass for BranchFoldPass {
    fn name(&self) -> &str {
        "branch_fold"
    }

    fn run(&self, body: &mut Block, _ctx: &FuncCtx<'_>) -> usize {
        fold(body)
    }
}

fn fold(block: &mut Block) -> usize {
    let mut folded = 0;
    // Children first, so a constant if nested in a surviving branch also
    // folds this run.
    for stmt in block.iter_mut() {
        for child in stmt.child_blocks_mut() {
            folded += fold(child);
        }
    }
    let mut i = 0;
    while i < block.len() {
        let taken = match &block[i] {
            Stmt::If { cond, .. } => match cond.kind {
                ExprKind::Const(ConstVal::Bool(b)) => Some(b),
                _ => None,
            },
            _ => None,
        };
        if let Some(b) = taken {
            if let Stmt::If { then_blk, else_blk, .. } = block.remove(i) {
                let chosen = if b { then_blk } else { else_blk };
                let len = chosen.len();
                block.splice(i..i, chosen);
                folded += 1;
                i += len;
                continue;
            }
        }
        i += 1;
    }
    folded
}
