//! Decompiler for HashLink bytecode: control-flow graphs, a structured IR,
//! an optimizer pipeline, and a pseudo-Haxe emitter on top of the `hlb`
//! codec.
//!
//! Recovery failures are never fatal: unmatched control flow degrades to
//! preserved jumps and unknown opcodes to opaque statements, so output is
//! always produced for a parseable module.

pub mod cfg;
pub mod dominance;
pub mod dot;
pub mod ir;
pub mod lift;
pub mod passes;
pub mod pseudo;
pub mod structure;

use hlb::{Error, Module, RefFun};
use tracing::debug;

pub use cfg::Cfg;
pub use ir::Block;
pub use lift::FuncCtx;

fn function_of(m: &Module, findex: RefFun) -> Result<&hlb::Function, Error> {
    m.function(findex).ok_or(Error::InvalidReference {
        what: "function",
        index: findex.0 as i64,
        len: m.functions.len(),
    })
}

/// Control-flow graph of one function.
pub fn cfg_of(m: &Module, findex: RefFun) -> Result<Cfg, Error> {
    Ok(Cfg::build(function_of(m, findex)?))
}

/// Structured, optimized IR of one function.
pub fn ir_of(m: &Module, findex: RefFun) -> Result<Block, Error> {
    let f = function_of(m, findex)?;
    let ctx = FuncCtx::new(m, f);
    let cfg = Cfg::build(f);
    let mut body = structure::structure(&ctx, &cfg);
    let rewrites = passes::optimize(&mut body, &ctx);
    debug!(findex = findex.0, rewrites, "lifted function");
    Ok(body)
}

/// Pseudo-source of one function.
pub fn pseudo_of(m: &Module, findex: RefFun) -> Result<String, Error> {
    let f = function_of(m, findex)?;
    let ctx = FuncCtx::new(m, f);
    let body = ir_of(m, findex)?;
    Ok(pseudo::function(&ctx, &body))
}

/// Graphviz rendering of one function's CFG.
pub fn dot_of(m: &Module, findex: RefFun) -> Result<String, Error> {
    let f = function_of(m, findex)?;
    Ok(dot::cfg_dot(m, f, &Cfg::build(f)))
}
