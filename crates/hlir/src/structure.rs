//! Phase B of the lifter: turning the flat block graph into nested
//! conditionals, loops, switches and try/catch.
//!
//! Loops come first from dominance (a back-edge is an edge whose target
//! dominates its source); `Label` is only ever corroborating. Conditionals
//! reconverge at the branch block's immediate post-dominator. Shapes that
//! do not match any pattern degrade per edge to a `Stmt::Jump`, never by
//! reordering or dropping statements.

use hlb::opcodes::Opcode;
use tracing::trace;

use crate::cfg::{BlockId, Cfg, EdgeKind};
use crate::dominance::DomTree;
use crate::ir::{Block, LoopKind, Stmt};
use crate::lift::{self, FuncCtx};

/// Recover a structured statement tree for the whole function.
pub fn structure(ctx: &FuncCtx<'_>, cfg: &Cfg) -> Block {
    if cfg.blocks.is_empty() {
        return Vec::new();
    }
    let mut s = Structurer {
        ctx,
        cfg,
        dom: DomTree::dominators(cfg),
        pdom: DomTree::post_dominators(cfg),
        visited: vec![false; cfg.blocks.len()],
        loops: Vec::new(),
    };
    let mut out = Vec::new();
    s.emit_region(Some(0), None, &mut out);
    out
}

#[derive(Clone, Copy)]
struct LoopCtx {
    header: BlockId,
    follow: Option<BlockId>,
}

struct Structurer<'a, 'm> {
    ctx: &'a FuncCtx<'m>,
    cfg: &'a Cfg,
    dom: DomTree,
    pdom: DomTree,
    visited: Vec<bool>,
    loops: Vec<LoopCtx>,
}

impl<'a, 'm> Structurer<'a, 'm> {
    /// Emit blocks starting at `cur` until the region boundary `stop` (or a
    /// terminator) is reached.
    fn emit_region(&mut self, mut cur: Option<BlockId>, stop: Option<BlockId>, out: &mut Block) {
        while let Some(b) = cur {
            if Some(b) == stop {
                break;
            }
            if let Some(lp) = self.loops.last().copied() {
                if b == lp.header {
                    out.push(Stmt::Continue);
                    break;
                }
                if Some(b) == lp.follow {
                    out.push(Stmt::Break);
                    break;
                }
            }
            if self.visited[b] {
                // Re-converging on an already-emitted block: an irreducible
                // or overlapping shape. Keep the raw jump.
                trace!(block = b, "unstructured edge, keeping jump");
                out.push(Stmt::Jump { target: self.cfg.blocks[b].start });
                break;
            }
            if self.is_loop_header(b) {
                cur = self.structure_loop(b, out);
                continue;
            }
            cur = self.emit_block(b, stop, out);
        }
    }

    fn is_loop_header(&self, b: BlockId) -> bool {
        self.cfg.blocks[b]
            .predecessors
            .iter()
            .any(|&p| self.dom.dominates(b, p))
    }

    /// Statements for an edge that leaves the current region, if it does.
    fn exit_stmts(&self, b: BlockId, stop: Option<BlockId>) -> Option<Block> {
        if Some(b) == stop {
            return Some(vec![]);
        }
        if let Some(lp) = self.loops.last() {
            if b == lp.header {
                return Some(vec![Stmt::Continue]);
            }
            if Some(b) == lp.follow {
                return Some(vec![Stmt::Break]);
            }
        }
        None
    }

    fn edge_of(&self, b: BlockId, kind: EdgeKind) -> Option<BlockId> {
        self.cfg.blocks[b]
            .successors
            .iter()
            .find(|(_, k)| *k == kind)
            .map(|(s, _)| *s)
    }

    /// Emit one block's statements and dispatch on its terminator.
    /// Returns the block control continues at, if any.
    fn emit_block(&mut self, b: BlockId, stop: Option<BlockId>, out: &mut Block) -> Option<BlockId> {
        self.visited[b] = true;
        let (start, end) = {
            let blk = &self.cfg.blocks[b];
            (blk.start, blk.end)
        };
        out.extend(lift::lift_range(self.ctx, start, end));

        let op = &self.ctx.f.ops()[end];
        match op {
            Opcode::Ret { .. } | Opcode::Throw { .. } | Opcode::Rethrow { .. } => None,
            Opcode::JAlways { .. } => self.edge_of(b, EdgeKind::Unconditional),
            op if op.is_cond_branch() => {
                let (t, fl) = match (self.edge_of(b, EdgeKind::True), self.edge_of(b, EdgeKind::False)) {
                    (Some(t), Some(fl)) => (t, fl),
                    // Zero-offset branch collapsed to a plain edge.
                    _ => return self.edge_of(b, EdgeKind::Unconditional),
                };
                let cond = lift::branch_cond(self.ctx, op)
                    .expect("conditional branch without a condition");
                match (self.exit_stmts(t, stop), self.exit_stmts(fl, stop)) {
                    (Some(te), Some(fe)) => {
                        out.push(Stmt::If { cond, then_blk: te, else_blk: fe });
                        None
                    }
                    (Some(te), None) => {
                        if te.is_empty() {
                            // Taken branch goes straight to the join: flip
                            // so the remaining path forms the body.
                            let mut then_blk = Vec::new();
                            self.emit_region(Some(fl), Some(t), &mut then_blk);
                            out.push(Stmt::If {
                                cond: lift::negate(self.ctx, cond),
                                then_blk,
                                else_blk: vec![],
                            });
                            Some(t)
                        } else {
                            out.push(Stmt::If { cond, then_blk: te, else_blk: vec![] });
                            Some(fl)
                        }
                    }
                    (None, Some(fe)) => {
                        if fe.is_empty() {
                            let mut then_blk = Vec::new();
                            self.emit_region(Some(t), Some(fl), &mut then_blk);
                            out.push(Stmt::If { cond, then_blk, else_blk: vec![] });
                            Some(fl)
                        } else {
                            out.push(Stmt::If {
                                cond: lift::negate(self.ctx, cond),
                                then_blk: fe,
                                else_blk: vec![],
                            });
                            Some(t)
                        }
                    }
                    (None, None) => {
                        let join = self.pdom.idom_of(b);
                        let mut then_blk = Vec::new();
                        self.emit_region(Some(t), join, &mut then_blk);
                        let mut else_blk = Vec::new();
                        self.emit_region(Some(fl), join, &mut else_blk);
                        if then_blk.is_empty() && !else_blk.is_empty() {
                            // An if with only a fall-through body reads
                            // better on the negated condition.
                            out.push(Stmt::If {
                                cond: lift::negate(self.ctx, cond),
                                then_blk: else_blk,
                                else_blk: vec![],
                            });
                        } else {
                            out.push(Stmt::If { cond, then_blk, else_blk });
                        }
                        join
                    }
                }
            }
            Opcode::Switch { reg, offsets, .. } => {
                let join = self.pdom.idom_of(b);
                let mut cases = Vec::new();
                for (i, off) in offsets.iter().enumerate() {
                    if *off == 0 {
                        continue;
                    }
                    let target = self.cfg.block_of[(end as i64 + 1 + *off as i64) as usize];
                    let mut blk = Vec::new();
                    self.emit_region(Some(target), join, &mut blk);
                    cases.push((i as i32, blk));
                }
                let mut default = Vec::new();
                self.emit_region(self.edge_of(b, EdgeKind::Unconditional), join, &mut default);
                out.push(Stmt::Switch {
                    scrutinee: self.ctx.reg_expr(*reg),
                    cases,
                    default,
                });
                join
            }
            Opcode::Trap { exc, .. } => {
                let handler = match self.edge_of(b, EdgeKind::Trap) {
                    Some(h) => h,
                    None => return self.edge_of(b, EdgeKind::Unconditional),
                };
                let join = self.pdom.idom_of(b);
                let mut body = Vec::new();
                self.emit_region(self.edge_of(b, EdgeKind::Unconditional), join, &mut body);
                let mut catch = Vec::new();
                self.emit_region(Some(handler), join, &mut catch);
                out.push(Stmt::Try {
                    body,
                    catches: vec![(self.ctx.reg_expr(*exc), catch)],
                });
                join
            }
            _ => self.edge_of(b, EdgeKind::Unconditional),
        }
    }

    /// Structure the loop headed at `h`; returns the follow block.
    fn structure_loop(&mut self, h: BlockId, out: &mut Block) -> Option<BlockId> {
        self.visited[h] = true;
        let latches: Vec<BlockId> = self.cfg.blocks[h]
            .predecessors
            .iter()
            .copied()
            .filter(|&p| self.dom.dominates(h, p))
            .collect();
        let nodes = self.natural_loop(h, &latches);
        let (hstart, hend) = {
            let blk = &self.cfg.blocks[h];
            (blk.start, blk.end)
        };
        let hop = &self.ctx.f.ops()[hend];

        // Pre-tested: the header's conditional either stays or leaves.
        if hop.is_cond_branch() {
            if let (Some(t), Some(fl)) =
                (self.edge_of(h, EdgeKind::True), self.edge_of(h, EdgeKind::False))
            {
                let t_in = nodes.contains(&t);
                let fl_in = nodes.contains(&fl);
                if t_in != fl_in {
                    let cond = lift::branch_cond(self.ctx, hop)
                        .expect("conditional branch without a condition");
                    let (stay, follow, cond) = if t_in {
                        (t, fl, cond)
                    } else {
                        (fl, t, lift::negate(self.ctx, cond))
                    };
                    let header = lift::lift_range(self.ctx, hstart, hend);
                    self.loops.push(LoopCtx { header: h, follow: Some(follow) });
                    if stay == h {
                        // Single-block loop: the "header" is the whole body
                        // and the test sits at its tail.
                        self.loops.pop();
                        out.push(Stmt::Loop {
                            kind: LoopKind::PostTested,
                            header: vec![],
                            cond: Some(cond),
                            body: header,
                        });
                        return Some(follow);
                    }
                    let mut body = Vec::new();
                    self.emit_region(Some(stay), Some(h), &mut body);
                    self.loops.pop();
                    out.push(Stmt::Loop {
                        kind: LoopKind::PreTested,
                        header,
                        cond: Some(cond),
                        body,
                    });
                    return Some(follow);
                }
            }
        }

        // Post-tested: the conditional exit sits on the single latch.
        if let [l] = latches[..] {
            let lop = &self.ctx.f.ops()[self.cfg.blocks[l].end];
            if l != h && lop.is_cond_branch() {
                if let (Some(t), Some(fl)) =
                    (self.edge_of(l, EdgeKind::True), self.edge_of(l, EdgeKind::False))
                {
                    let exit = if t == h && !nodes.contains(&fl) {
                        Some((fl, false))
                    } else if fl == h && !nodes.contains(&t) {
                        Some((t, true))
                    } else {
                        None
                    };
                    if let Some((follow, negate_cond)) = exit {
                        self.loops.push(LoopCtx { header: h, follow: Some(follow) });
                        let mut body = Vec::new();
                        let cur = self.emit_block(h, Some(l), &mut body);
                        self.emit_region(cur, Some(l), &mut body);
                        self.visited[l] = true;
                        let (lstart, lend) = {
                            let blk = &self.cfg.blocks[l];
                            (blk.start, blk.end)
                        };
                        body.extend(lift::lift_range(self.ctx, lstart, lend));
                        self.loops.pop();
                        let cond = lift::branch_cond(self.ctx, lop)
                            .expect("conditional branch without a condition");
                        let cond = if negate_cond {
                            lift::negate(self.ctx, cond)
                        } else {
                            cond
                        };
                        out.push(Stmt::Loop {
                            kind: LoopKind::PostTested,
                            header: vec![],
                            cond: Some(cond),
                            body,
                        });
                        return Some(follow);
                    }
                }
            }
        }

        // Infinite: exits only via break edges inside the body. Pick the
        // earliest exit block as the follow.
        let mut exits: Vec<BlockId> = nodes
            .iter()
            .flat_map(|&n| self.cfg.blocks[n].succ_ids())
            .filter(|s| !nodes.contains(s))
            .collect();
        exits.sort_by_key(|&b| self.cfg.blocks[b].start);
        exits.dedup();
        let follow = exits.first().copied();
        self.loops.push(LoopCtx { header: h, follow });
        let mut body = Vec::new();
        let cur = self.emit_block(h, Some(h), &mut body);
        self.emit_region(cur, Some(h), &mut body);
        self.loops.pop();
        out.push(Stmt::Loop {
            kind: LoopKind::Infinite,
            header: vec![],
            cond: None,
            body,
        });
        follow
    }

    /// The natural loop of `h`: everything that reaches a latch without
    /// passing through `h`.
    fn natural_loop(&self, h: BlockId, latches: &[BlockId]) -> Vec<BlockId> {
        let mut nodes = vec![h];
        let mut work: Vec<BlockId> = latches.to_vec();
        while let Some(n) = work.pop() {
            if !nodes.contains(&n) {
                nodes.push(n);
                work.extend(self.cfg.blocks[n].predecessors.iter().copied());
            }
        }
        nodes
    }
}
