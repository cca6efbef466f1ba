//! Basic-block construction over a function's op list.

use hlb::opcodes::{Opcode, Reg};
use hlb::Function;

pub type BlockId = usize;

/// Why control moves along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Unconditional,
    /// Branch taken.
    True,
    /// Branch fall-through.
    False,
    /// Switch case by index.
    Switch(usize),
    /// Exception edge from a `Trap` to its handler.
    Trap,
}

/// A maximal straight-line op run: `start..=end`, ending at a terminator or
/// just before another block's leader.
#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub start: usize,
    pub end: usize,
    pub successors: Vec<(BlockId, EdgeKind)>,
    pub predecessors: Vec<BlockId>,
    /// Blocks the entry cannot reach are kept but flagged.
    pub reachable: bool,
}

impl BasicBlock {
    pub fn succ_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.successors.iter().map(|(b, _)| *b)
    }
}

/// An op range protected by an exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapRegion {
    /// First protected op (the one after the `Trap`).
    pub start: usize,
    /// One past the last protected op (the `EndTrap`, or the function end
    /// when unmatched).
    pub end: usize,
    /// First op of the handler.
    pub handler: usize,
    /// Register the caught exception lands in.
    pub reg: Reg,
}

#[derive(Debug)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
    /// op index -> owning block id.
    pub block_of: Vec<BlockId>,
    pub traps: Vec<TrapRegion>,
}

impl Cfg {
    /// Partition `f`'s ops into blocks and compute typed edges.
    ///
    /// Leaders: op 0, every jump target, the op after every branch or
    /// `Ret`/`Throw`/`EndTrap`, `Trap` handlers, and `Label` ops.
    pub fn build(f: &Function) -> Cfg {
        let ops = f.ops();
        let n = ops.len();
        if n == 0 {
            return Cfg {
                blocks: vec![],
                block_of: vec![],
                traps: vec![],
            };
        }

        let target = |i: usize, off: i32| (i as i64 + 1 + off as i64) as usize;

        let mut is_leader = vec![false; n];
        is_leader[0] = true;
        for (i, op) in ops.iter().enumerate() {
            let splits_after = op.is_cond_branch()
                || op.is_terminator()
                || matches!(
                    op,
                    Opcode::Switch { .. } | Opcode::Trap { .. } | Opcode::EndTrap { .. }
                );
            if splits_after && i + 1 < n {
                is_leader[i + 1] = true;
            }
            if let Some(off) = op.jump_offset() {
                let t = target(i, off);
                if t < n {
                    is_leader[t] = true;
                }
            }
            if let Opcode::Switch { offsets, end, .. } = op {
                for off in offsets {
                    let t = target(i, *off);
                    if t < n {
                        is_leader[t] = true;
                    }
                }
                let t = target(i, *end);
                if t < n {
                    is_leader[t] = true;
                }
            }
            if matches!(op, Opcode::Label) {
                is_leader[i] = true;
            }
        }

        let mut blocks: Vec<BasicBlock> = Vec::new();
        let mut block_of = vec![0usize; n];
        let mut start = 0usize;
        for i in 1..=n {
            if i == n || is_leader[i] {
                let id = blocks.len();
                blocks.push(BasicBlock {
                    id,
                    start,
                    end: i - 1,
                    successors: vec![],
                    predecessors: vec![],
                    reachable: false,
                });
                for j in start..i {
                    block_of[j] = id;
                }
                start = i;
            }
        }

        for b in 0..blocks.len() {
            let last = blocks[b].end;
            let op = &ops[last];
            let mut succs: Vec<(BlockId, EdgeKind)> = Vec::new();
            let push = |succs: &mut Vec<(BlockId, EdgeKind)>, t: usize, kind: EdgeKind| {
                if t < n {
                    succs.push((block_of[t], kind));
                }
            };
            match op {
                Opcode::Ret { .. } | Opcode::Throw { .. } | Opcode::Rethrow { .. } => {}
                Opcode::JAlways { offset } => {
                    push(&mut succs, target(last, *offset), EdgeKind::Unconditional)
                }
                Opcode::Switch { offsets, .. } => {
                    for (i, off) in offsets.iter().enumerate() {
                        // Zero-offset cases fall into the default region.
                        if *off != 0 {
                            push(&mut succs, target(last, *off), EdgeKind::Switch(i));
                        }
                    }
                    // The default region starts right after the switch.
                    push(&mut succs, last + 1, EdgeKind::Unconditional);
                }
                Opcode::Trap { offset, .. } => {
                    push(&mut succs, last + 1, EdgeKind::Unconditional);
                    let h = target(last, *offset);
                    if h != last + 1 {
                        push(&mut succs, h, EdgeKind::Trap);
                    }
                }
                op if op.is_cond_branch() => {
                    let off = op.jump_offset().unwrap_or(0);
                    if off == 0 {
                        // Branch to its own fall-through: a single edge.
                        push(&mut succs, last + 1, EdgeKind::Unconditional);
                    } else {
                        push(&mut succs, target(last, off), EdgeKind::True);
                        push(&mut succs, last + 1, EdgeKind::False);
                    }
                }
                _ => push(&mut succs, last + 1, EdgeKind::Unconditional),
            }
            blocks[b].successors = succs;
        }

        for b in 0..blocks.len() {
            let succs: Vec<BlockId> = blocks[b].succ_ids().collect();
            for s in succs {
                if !blocks[s].predecessors.contains(&b) {
                    blocks[s].predecessors.push(b);
                }
            }
        }

        // Reachability from the entry block.
        let mut stack = vec![0usize];
        while let Some(b) = stack.pop() {
            if blocks[b].reachable {
                continue;
            }
            blocks[b].reachable = true;
            stack.extend(blocks[b].succ_ids());
        }

        // Trap regions nest; match each EndTrap to the innermost open Trap.
        let mut traps = Vec::new();
        let mut open: Vec<(usize, usize, Reg)> = Vec::new();
        for (i, op) in ops.iter().enumerate() {
            match op {
                Opcode::Trap { exc, offset } => open.push((i, target(i, *offset), *exc)),
                Opcode::EndTrap { .. } => {
                    if let Some((trap_pc, handler, reg)) = open.pop() {
                        traps.push(TrapRegion {
                            start: trap_pc + 1,
                            end: i,
                            handler,
                            reg,
                        });
                    }
                }
                _ => {}
            }
        }
        for (trap_pc, handler, reg) in open {
            traps.push(TrapRegion {
                start: trap_pc + 1,
                end: n,
                handler,
                reg,
            });
        }

        Cfg {
            blocks,
            block_of,
            traps,
        }
    }

    /// The trap region opened by the `Trap` op at `pc`, if any.
    pub fn trap_at(&self, pc: usize) -> Option<&TrapRegion> {
        self.traps.iter().find(|t| t.start == pc + 1)
    }
}
