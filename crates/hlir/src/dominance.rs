//! Dominator and post-dominator trees via the Cooper-Harvey-Kennedy
//! iteration. Loop recovery keys off dominance (a back-edge is an edge
//! whose target dominates its source); conditional reconvergence keys off
//! immediate post-dominators.

use crate::cfg::{BlockId, Cfg};

const UNDEF: usize = usize::MAX;

pub struct DomTree {
    /// idom[b]; entry maps to itself, unreachable blocks to `UNDEF`.
    idom: Vec<usize>,
    /// Id of the virtual exit in a post-dominator tree, `UNDEF` otherwise.
    exit: usize,
}

impl DomTree {
    /// Dominators of `cfg`, rooted at block 0.
    pub fn dominators(cfg: &Cfg) -> DomTree {
        let n = cfg.blocks.len();
        let succs: Vec<Vec<BlockId>> = cfg.blocks.iter().map(|b| b.succ_ids().collect()).collect();
        let preds: Vec<Vec<BlockId>> = cfg.blocks.iter().map(|b| b.predecessors.clone()).collect();
        if n == 0 {
            return DomTree { idom: vec![], exit: UNDEF };
        }
        build(n, 0, &succs, &preds, UNDEF)
    }

    /// Post-dominators of `cfg`: dominators of the edge-reversed graph from
    /// a virtual exit joined to every terminator block.
    pub fn post_dominators(cfg: &Cfg) -> DomTree {
        let n = cfg.blocks.len();
        if n == 0 {
            return DomTree { idom: vec![], exit: UNDEF };
        }
        let exit = n;
        let mut succs: Vec<Vec<BlockId>> = cfg.blocks.iter().map(|b| b.predecessors.clone()).collect();
        let mut preds: Vec<Vec<BlockId>> = cfg.blocks.iter().map(|b| b.succ_ids().collect()).collect();
        succs.push(Vec::new());
        preds.push(Vec::new());
        for b in &cfg.blocks {
            if b.successors.is_empty() {
                succs[exit].push(b.id);
                preds[b.id].push(exit);
            }
        }
        build(n + 1, exit, &succs, &preds, exit)
    }

    /// True if `a` (post-)dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut cur = b;
        while cur != UNDEF && self.idom[cur] != cur {
            cur = self.idom[cur];
            if cur == a {
                return true;
            }
        }
        false
    }

    /// The immediate (post-)dominator, `None` for the root, the virtual
    /// exit, or unreachable blocks.
    pub fn idom_of(&self, b: BlockId) -> Option<BlockId> {
        let d = *self.idom.get(b)?;
        if d == UNDEF || d == b || d == self.exit {
            None
        } else {
            Some(d)
        }
    }
}

/// One CHK fixpoint run. `succs` drives the RPO walk from `entry`; `preds`
/// drives the intersection step.
fn build(
    n: usize,
    entry: usize,
    succs: &[Vec<BlockId>],
    preds: &[Vec<BlockId>],
    exit: usize,
) -> DomTree {
    let rpo = reverse_postorder(n, entry, succs);
    let mut rpo_number = vec![UNDEF; n];
    for (pos, &b) in rpo.iter().enumerate() {
        rpo_number[b] = pos;
    }

    let mut idom = vec![UNDEF; n];
    idom[entry] = entry;
    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let mut new_idom = UNDEF;
            for &p in &preds[b] {
                if idom[p] != UNDEF {
                    new_idom = if new_idom == UNDEF {
                        p
                    } else {
                        intersect(&idom, &rpo_number, new_idom, p)
                    };
                }
            }
            if new_idom != UNDEF && idom[b] != new_idom {
                idom[b] = new_idom;
                changed = true;
            }
        }
    }

    DomTree { idom, exit }
}

fn intersect(idom: &[usize], rpo_number: &[usize], mut b1: BlockId, mut b2: BlockId) -> BlockId {
    while b1 != b2 {
        while rpo_number[b1] > rpo_number[b2] {
            b1 = idom[b1];
        }
        while rpo_number[b2] > rpo_number[b1] {
            b2 = idom[b2];
        }
    }
    b1
}

fn reverse_postorder(n: usize, entry: usize, succs: &[Vec<BlockId>]) -> Vec<BlockId> {
    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited[entry] = true;
    while let Some((block, idx)) = stack.last_mut() {
        let b = *block;
        if *idx < succs[b].len() {
            let s = succs[b][*idx];
            *idx += 1;
            if !visited[s] {
                visited[s] = true;
                stack.push((s, 0));
            }
        } else {
            postorder.push(b);
            stack.pop();
        }
    }
    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlb::opcodes::{Opcode, Reg, RefFun, RefInt, RefType};
    use hlb::Function;

    fn cfg(ops: Vec<Opcode>) -> Cfg {
        Cfg::build(&Function::new(RefType(0), RefFun(0), vec![RefType(0); 8], ops))
    }

    fn diamond() -> Cfg {
        // b0: JTrue -> b2; b1: then, JAlways -> b3; b2: else; b3: join
        cfg(vec![
            Opcode::JTrue { cond: Reg(0), offset: 2 },
            Opcode::Int { dst: Reg(1), ptr: RefInt(0) },
            Opcode::JAlways { offset: 1 },
            Opcode::Int { dst: Reg(1), ptr: RefInt(1) },
            Opcode::Ret { ret: Reg(1) },
        ])
    }

    #[test]
    fn entry_dominates_everything() {
        let g = diamond();
        let dom = DomTree::dominators(&g);
        for b in 0..g.blocks.len() {
            assert!(dom.dominates(0, b), "entry should dominate block {b}");
        }
        assert!(!dom.dominates(1, 3));
        assert!(!dom.dominates(2, 3));
        assert_eq!(dom.idom_of(0), None);
        assert_eq!(dom.idom_of(3), Some(0));
    }

    #[test]
    fn diamond_join_is_immediate_post_dominator() {
        let g = diamond();
        let pdom = DomTree::post_dominators(&g);
        assert_eq!(pdom.idom_of(0), Some(3));
        assert_eq!(pdom.idom_of(1), Some(3));
        assert_eq!(pdom.idom_of(2), Some(3));
        // The join's only post-dominator is the virtual exit.
        assert_eq!(pdom.idom_of(3), None);
    }

    #[test]
    fn loop_header_dominates_latch() {
        // b0: Int; b1: Incr + JSLt back to b1; b2: Ret
        let g = cfg(vec![
            Opcode::Int { dst: Reg(0), ptr: RefInt(0) },
            Opcode::Incr { dst: Reg(0) },
            Opcode::JSLt { a: Reg(0), b: Reg(1), offset: -2 },
            Opcode::Ret { ret: Reg(0) },
        ]);
        let dom = DomTree::dominators(&g);
        let header = g.block_of[1];
        // The back-edge source is the header itself here.
        assert!(dom.dominates(header, header));
        assert!(g.blocks[header].predecessors.contains(&header));
    }

    #[test]
    fn chain_has_linear_idoms() {
        let g = cfg(vec![
            Opcode::JAlways { offset: 0 },
            Opcode::JAlways { offset: 0 },
            Opcode::Ret { ret: Reg(0) },
        ]);
        let dom = DomTree::dominators(&g);
        assert_eq!(dom.idom_of(1), Some(0));
        assert_eq!(dom.idom_of(2), Some(1));
        let pdom = DomTree::post_dominators(&g);
        assert_eq!(pdom.idom_of(0), Some(1));
        assert_eq!(pdom.idom_of(1), Some(2));
    }

    #[test]
    fn infinite_loop_has_no_post_dominator() {
        // b0: Label; Incr; JAlways back — never exits
        let g = cfg(vec![
            Opcode::Label,
            Opcode::Incr { dst: Reg(0) },
            Opcode::JAlways { offset: -3 },
        ]);
        let pdom = DomTree::post_dominators(&g);
        assert_eq!(pdom.idom_of(0), None);
    }
}
