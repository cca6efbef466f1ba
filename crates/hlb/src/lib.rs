//! Reader, writer and patcher for HashLink bytecode (`.hl` / `hlboot.dat`
//! modules, versions 4 and 5).
//!
//! The codec is lossless: `serialize(&parse(bytes)?)` reproduces the input
//! byte-for-byte, and patching one function's ops perturbs only that
//! function's encoding. Decompilation lives in the `hlir` crate; this crate
//! stops at the typed module and a raw disassembly listing.

pub mod buf;
pub mod disasm;
pub mod error;
pub mod module;
pub mod opcodes;
pub mod types;

pub use error::Error;
pub use module::{parse, serialize, BytesPool, Constant, Function, GlobalValue, Module, Native};
pub use opcodes::{Opcode, Reg, RefFun, RefType};

/// Raw op listing of one function (or the header line of a native).
pub fn disasm_of(m: &Module, findex: RefFun) -> Result<String, Error> {
    if let Some(f) = m.function(findex) {
        return Ok(disasm::func(m, f));
    }
    if let Some(n) = m.native(findex) {
        return Ok(disasm::native_header(m, n));
    }
    Err(Error::InvalidReference {
        what: "function",
        index: findex.0 as i64,
        len: m.functions.len() + m.natives.len(),
    })
}
