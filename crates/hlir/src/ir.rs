//! The decompiler's structured intermediate representation.
//!
//! Expressions carry the type of the register (or pool slot) they came
//! from; statements form nested blocks. Anything the lifter cannot express
//! survives as `Stmt::Untranslated` or `Stmt::Jump` so no semantics are
//! silently dropped.

use hlb::opcodes::{Opcode, Reg, RefFun, RefType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    UShr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// `!(a < b)`; kept separate from `Gte` because of NaN.
    NotLt,
    /// `!(a >= b)`.
    NotGte,
}

impl CmpOp {
    /// The exact branch complement.
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::NotEq,
            CmpOp::NotEq => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Gte,
            CmpOp::Gte => CmpOp::Lt,
            CmpOp::Gt => CmpOp::Lte,
            CmpOp::Lte => CmpOp::Gt,
            CmpOp::NotLt => CmpOp::Lt,
            CmpOp::NotGte => CmpOp::Gte,
        }
    }

    /// Mirror for operand swapping (`5 < x` -> `x > 5`). `NotLt`/`NotGte`
    /// have no mirrored form and stay put.
    pub fn mirror(self) -> Option<CmpOp> {
        match self {
            CmpOp::Eq => Some(CmpOp::Eq),
            CmpOp::NotEq => Some(CmpOp::NotEq),
            CmpOp::Lt => Some(CmpOp::Gt),
            CmpOp::Gt => Some(CmpOp::Lt),
            CmpOp::Lte => Some(CmpOp::Gte),
            CmpOp::Gte => Some(CmpOp::Lte),
            CmpOp::NotLt | CmpOp::NotGte => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    ToDyn,
    ToSFloat,
    ToUFloat,
    ToInt,
    SafeCast,
    UnsafeCast,
    ToVirtual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstVal {
    Int(i32),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Bytes pool entry, by index.
    Bytes(usize),
    Null,
}

/// Where a call goes.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Direct call by findex.
    Fun(RefFun),
    /// Virtual dispatch: `obj.name(...)`.
    Method { obj: Box<Expr>, name: String },
    /// Invoking a closure value.
    Closure(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub ty: RefType,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(ty: RefType, kind: ExprKind) -> Expr {
        Expr { ty, kind }
    }

    /// Visit this expression and every sub-expression, leaves first.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match &mut self.kind {
            ExprKind::Const(_) | ExprKind::Local { .. } | ExprKind::Arg { .. }
            | ExprKind::New | ExprKind::Global { .. } => {}
            ExprKind::Field { obj, .. } => obj.walk_mut(f),
            ExprKind::Index { obj, index } => {
                obj.walk_mut(f);
                index.walk_mut(f);
            }
            ExprKind::Arith { lhs, rhs, .. } | ExprKind::Cmp { lhs, rhs, .. } => {
                lhs.walk_mut(f);
                rhs.walk_mut(f);
            }
            ExprKind::Unop { expr, .. } | ExprKind::Cast { expr, .. } => expr.walk_mut(f),
            ExprKind::Call { target, args } => {
                match target {
                    CallTarget::Fun(_) => {}
                    CallTarget::Method { obj, .. } => obj.walk_mut(f),
                    CallTarget::Closure(c) => c.walk_mut(f),
                }
                for a in args {
                    a.walk_mut(f);
                }
            }
            ExprKind::Closure { bound, .. } => {
                if let Some(b) = bound {
                    b.walk_mut(f);
                }
            }
            ExprKind::EnumConstruct { args, .. } => {
                for a in args {
                    a.walk_mut(f);
                }
            }
        }
        f(self);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(ConstVal),
    /// A non-argument register.
    Local { reg: Reg, name: Option<String> },
    /// An argument register (`reg` index < the function arity).
    Arg { reg: Reg, name: Option<String> },
    Field { obj: Box<Expr>, name: String },
    Index { obj: Box<Expr>, index: Box<Expr> },
    Arith { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Cmp { op: CmpOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unop { op: UnOp, expr: Box<Expr> },
    Call { target: CallTarget, args: Vec<Expr> },
    /// Allocation of this expression's type.
    New,
    Cast { kind: CastKind, expr: Box<Expr> },
    Closure { fun: RefFun, bound: Option<Box<Expr>> },
    EnumConstruct { construct: usize, args: Vec<Expr> },
    Global { idx: usize },
}

/// How a recovered loop tests its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// `while (cond) { ... }`
    PreTested,
    /// `do { ... } while (cond);`
    PostTested,
    /// `while (true) { ... }`, exits only via `break`.
    Infinite,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { dst: Expr, src: Expr },
    /// A call evaluated for effect (void destination).
    ExprStmt(Expr),
    Return(Option<Expr>),
    Throw(Expr),
    If { cond: Expr, then_blk: Block, else_blk: Block },
    Loop {
        kind: LoopKind,
        /// Statements re-evaluated before the test on each iteration.
        header: Block,
        /// `None` for infinite loops.
        cond: Option<Expr>,
        body: Block,
    },
    Break,
    Continue,
    Switch { scrutinee: Expr, cases: Vec<(i32, Block)>, default: Block },
    Try { body: Block, catches: Vec<(Expr, Block)> },
    /// Unstructured control flow preserved from a shape the lifter could
    /// not match; `target` is an op index.
    Jump { target: usize },
    Untranslated(Opcode),
}

impl Stmt {
    /// Visit every expression in this statement (not descending into
    /// nested statement blocks).
    pub fn walk_exprs_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match self {
            Stmt::Assign { dst, src } => {
                dst.walk_mut(f);
                src.walk_mut(f);
            }
            Stmt::ExprStmt(e) | Stmt::Throw(e) => e.walk_mut(f),
            Stmt::Return(Some(e)) => e.walk_mut(f),
            Stmt::Return(None) | Stmt::Break | Stmt::Continue | Stmt::Jump { .. }
            | Stmt::Untranslated(_) => {}
            Stmt::If { cond, .. } => cond.walk_mut(f),
            Stmt::Loop { cond, .. } => {
                if let Some(c) = cond {
                    c.walk_mut(f);
                }
            }
            Stmt::Switch { scrutinee, .. } => scrutinee.walk_mut(f),
            Stmt::Try { catches, .. } => {
                for (var, _) in catches {
                    var.walk_mut(f);
                }
            }
        }
    }

    /// The blocks nested directly under this statement.
    pub fn child_blocks_mut(&mut self) -> Vec<&mut Block> {
        match self {
            Stmt::If { then_blk, else_blk, .. } => vec![then_blk, else_blk],
            Stmt::Loop { header, body, .. } => vec![header, body],
            Stmt::Switch { cases, default, .. } => {
                let mut out: Vec<&mut Block> = cases.iter_mut().map(|(_, b)| b).collect();
                out.push(default);
                out
            }
            Stmt::Try { body, catches } => {
                let mut out = vec![body];
                out.extend(catches.iter_mut().map(|(_, b)| b));
                out
            }
            _ => vec![],
        }
    }
}

/// Visit every statement in a block tree, depth-first, parents before
/// children.
pub fn walk_stmts_mut(block: &mut Block, f: &mut impl FnMut(&mut Stmt)) {
    for stmt in block.iter_mut() {
        f(stmt);
        for child in stmt.child_blocks_mut() {
            walk_stmts_mut(child, f);
        }
    }
}

/// Visit every expression in a block tree.
pub fn walk_exprs_mut(block: &mut Block, f: &mut impl FnMut(&mut Expr)) {
    walk_stmts_mut(block, &mut |stmt| stmt.walk_exprs_mut(f));
}
