//! Redundant-move removal: `x = x` disappears, and a single-use temporary
//! feeding the immediately following assignment collapses into it.

use crate::ir::{Block, ExprKind, Stmt};
use crate::lift::FuncCtx;
use crate::passes::{count_reads, Pass};

pub struct MoveElimPass;

impl Pass for MoveElimPass {
    fn name(&self) -> &str {
        "move_elim"
    }

    fn run(&self, body: &mut Block, _ctx: &FuncCtx<'_>) -> usize {
        let removed = strip_self_moves(body);
        let reads = count_reads(body);
        removed + collapse(body, &reads)
    }
}

fn reg_of(kind: &ExprKind) -> Option<u32> {
    match kind {
        ExprKind::Local { reg, .. } | ExprKind::Arg { reg, .. } => Some(reg.0),
        _ => None,
    }
}

fn strip_self_moves(block: &mut Block) -> usize {
    let before = block.len();
    block.retain(|stmt| {
        !matches!(stmt, Stmt::Assign { dst, src }
            if reg_of(&dst.kind).is_some() && reg_of(&dst.kind) == reg_of(&src.kind))
    });
    let mut removed = before - block.len();
    for stmt in block.iter_mut() {
        for child in stmt.child_blocks_mut() {
            removed += strip_self_moves(child);
        }
    }
    removed
}

/// `tmp = e; y = tmp` with `tmp` read exactly once becomes `y = e`.
/// Adjacency keeps effect order intact, so `e` need not be pure.
fn collapse(block: &mut Block, reads: &std::collections::HashMap<u32, usize>) -> usize {
    let mut removed = 0;
    let mut i = 0;
    while i + 1 < block.len() {
        let tmp = match &block[i] {
            Stmt::Assign { dst, .. } => match dst.kind {
                ExprKind::Local { reg, .. } => {
                    if reads.get(&reg.0).copied().unwrap_or(0) == 1 {
                        Some(reg.0)
                    } else {
                        None
                    }
                }
                _ => None,
            },
            _ => None,
        };
        let feeds_next = match (tmp, &block[i + 1]) {
            (Some(t), Stmt::Assign { src, .. }) => reg_of(&src.kind) == Some(t),
            _ => false,
        };
        if feeds_next {
            let producer = block.remove(i);
            if let (Stmt::Assign { src: e, .. }, Stmt::Assign { src, .. }) =
                (producer, &mut block[i])
            {
                *src = e;
                removed += 1;
                continue;
            }
        }
        i += 1;
    }
    for stmt in block.iter_mut() {
        for child in stmt.child_blocks_mut() {
            removed += collapse(child, reads);
        }
    }
    removed
}
