//! The top-level module container and its binary codec.
//!
//! Reading preserves everything needed to re-emit the module byte-for-byte:
//! pool order, indices, and for each function the raw byte span it was
//! decoded from. Mutation goes through the patch helpers, which drop the
//! preserved span of the touched function only; everything else re-emits
//! verbatim, so a one-op patch perturbs no other function's bytes.

use std::collections::HashMap;

use memchr::memmem;
use tracing::debug;

use crate::buf::{Reader, Writer};
use crate::error::Error;
use crate::opcodes::{Opcode, RefFun, RefGlobal, RefString, RefType};
use crate::types::{Pools, Type, TypeKind};

pub(crate) const MAGIC: &[u8; 3] = b"HLB";

/// A native function imported from a `.hdll` library.
#[derive(Debug, Clone, PartialEq)]
pub struct Native {
    pub lib: RefString,
    pub name: RefString,
    pub ty: RefType,
    pub findex: RefFun,
}

/// A constant-object definition initializing one global.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub global: RefGlobal,
    /// Pool indices, interpreted against the global object's field types.
    pub fields: Vec<u32>,
}

/// One resolved field of a constant object.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalValue {
    Int(i32),
    Float(f64),
    Str(String),
    /// A field whose type the initializer does not interpret.
    Raw(u32),
}

/// The byte-constant pool: a single blob plus entry start positions, kept
/// exactly as read so odd layouts (gaps, unordered positions) survive a
/// round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BytesPool {
    blob: Vec<u8>,
    positions: Vec<u32>,
}

impl BytesPool {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Entry `i`, sliced from its position to the next one (or blob end).
    pub fn entry(&self, i: usize) -> Option<&[u8]> {
        let start = *self.positions.get(i)? as usize;
        let end = self
            .positions
            .get(i + 1)
            .map(|p| *p as usize)
            .unwrap_or(self.blob.len());
        self.blob.get(start..end)
    }

    /// Replace the whole pool; positions are recomputed back-to-back.
    pub fn set_entries(&mut self, entries: Vec<Vec<u8>>) {
        self.blob.clear();
        self.positions.clear();
        for e in entries {
            self.positions.push(self.blob.len() as u32);
            self.blob.extend_from_slice(&e);
        }
    }
}

/// A function body: registers, ops, and the optional debug streams.
///
/// Fields are private so mutation is forced through the methods that
/// invalidate the preserved raw encoding.
#[derive(Debug, Clone)]
pub struct Function {
    ty: RefType,
    findex: RefFun,
    regs: Vec<RefType>,
    ops: Vec<Opcode>,
    /// Per-op `(file, line)`; file is `-1` until the stream sets one.
    debug: Option<Vec<(i32, i32)>>,
    /// `(name, op_idx)`; `op_idx < 0` names argument register
    /// `-op_idx - 1`, otherwise the destination of op `op_idx - 1`.
    assigns: Option<Vec<(RefString, i32)>>,
    raw: Option<Vec<u8>>,
}

impl Function {
    pub fn new(ty: RefType, findex: RefFun, regs: Vec<RefType>, ops: Vec<Opcode>) -> Self {
        Function {
            ty,
            findex,
            regs,
            ops,
            debug: None,
            assigns: None,
            raw: None,
        }
    }

    pub fn ty(&self) -> RefType {
        self.ty
    }

    pub fn findex(&self) -> RefFun {
        self.findex
    }

    pub fn regs(&self) -> &[RefType] {
        &self.regs
    }

    pub fn ops(&self) -> &[Opcode] {
        &self.ops
    }

    pub fn debug(&self) -> Option<&[(i32, i32)]> {
        self.debug.as_deref()
    }

    pub fn assigns(&self) -> Option<&[(RefString, i32)]> {
        self.assigns.as_deref()
    }

    pub fn set_assigns(&mut self, assigns: Vec<(RefString, i32)>) {
        self.raw = None;
        self.assigns = Some(assigns);
    }

    pub fn set_debug(&mut self, debug: Vec<(i32, i32)>) {
        self.raw = None;
        self.debug = Some(debug);
    }

    /// Mutable op access. Drops the preserved encoding: the function will
    /// re-encode minimally on the next serialize.
    pub fn ops_mut(&mut self) -> &mut Vec<Opcode> {
        self.raw = None;
        &mut self.ops
    }

    pub fn regs_mut(&mut self) -> &mut Vec<RefType> {
        self.raw = None;
        &mut self.regs
    }

    /// Replace the op at `pc`, keeping every index stable.
    pub fn patch_op(&mut self, pc: usize, op: Opcode) -> Result<(), Error> {
        if pc >= self.ops.len() {
            return Err(Error::InvalidReference {
                what: "op",
                index: pc as i64,
                len: self.ops.len(),
            });
        }
        self.raw = None;
        self.ops[pc] = op;
        Ok(())
    }

    fn read(
        r: &mut Reader<'_>,
        pools: &Pools,
        has_debug: bool,
        ndebugfiles: usize,
    ) -> Result<Function, Error> {
        let start = r.pos();
        let ty = RefType(r.index("type", pools.ntypes)?);
        let findex = RefFun(r.index("function", pools.nfindexes)?);
        let fidx = findex.0 as u32;
        let nregs = r.varuint()? as usize;
        let nops = r.varuint()? as usize;
        let mut regs = Vec::with_capacity(nregs);
        for _ in 0..nregs {
            regs.push(RefType(r.index("type", pools.ntypes).map_err(|e| e.in_function(fidx))?));
        }
        let mut ops = Vec::with_capacity(nops);
        for _ in 0..nops {
            ops.push(Opcode::read(r, pools).map_err(|e| e.in_function(fidx))?);
        }
        let mut debug = None;
        let mut assigns = None;
        if has_debug {
            debug = Some(read_debug(r, nops, ndebugfiles).map_err(|e| e.in_function(fidx))?);
            if pools.version >= 3 {
                let nassigns = r.varuint()? as usize;
                let mut list = Vec::with_capacity(nassigns);
                for _ in 0..nassigns {
                    let name = RefString(r.index("string", pools.nstrings).map_err(|e| e.in_function(fidx))?);
                    let op = r.varint()?;
                    list.push((name, op));
                }
                assigns = Some(list);
            }
        }

        // Every jump must land inside the op list.
        for (i, op) in ops.iter().enumerate() {
            let check = |off: i32| -> Result<(), Error> {
                let target = i as i64 + 1 + off as i64;
                if target < 0 || target >= nops as i64 {
                    return Err(Error::JumpOutOfBounds {
                        findex: fidx,
                        op: i,
                        target,
                        nops,
                    });
                }
                Ok(())
            };
            if let Some(off) = op.jump_offset() {
                check(off)?;
            }
            if let Opcode::Switch { offsets, end, .. } = op {
                for off in offsets {
                    check(*off)?;
                }
                check(*end)?;
            }
        }

        Ok(Function {
            ty,
            findex,
            regs,
            ops,
            debug,
            assigns,
            raw: Some(r.span(start).to_vec()),
        })
    }

    fn write(&self, w: &mut Writer, has_debug: bool, version: u8) -> Result<(), Error> {
        if let Some(raw) = &self.raw {
            w.raw(raw);
            return Ok(());
        }
        w.varuint(self.ty.0 as u32)?;
        w.varuint(self.findex.0 as u32)?;
        w.varuint(self.regs.len() as u32)?;
        w.varuint(self.ops.len() as u32)?;
        for reg in &self.regs {
            w.varuint(reg.0 as u32)?;
        }
        for op in &self.ops {
            op.write(w)?;
        }
        if has_debug {
            // A function added by a patcher may have no debug stream of its
            // own; the format still requires one per op.
            match &self.debug {
                Some(pairs) => write_debug(w, pairs),
                None => write_debug(w, &vec![(-1, 0); self.ops.len()]),
            }
            if version >= 3 {
                let assigns = self.assigns.as_deref().unwrap_or(&[]);
                w.varuint(assigns.len() as u32)?;
                for (name, op) in assigns {
                    w.varuint(name.0 as u32)?;
                    w.varint(*op)?;
                }
            }
        }
        Ok(())
    }
}

/// A parsed program.
#[derive(Debug, Clone)]
pub struct Module {
    pub version: u8,
    pub flags: u32,
    pub ints: Vec<i32>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    pub bytes: BytesPool,
    /// Present iff the debug flag is set.
    pub debug_files: Option<Vec<String>>,
    pub types: Vec<Type>,
    pub globals: Vec<RefType>,
    pub natives: Vec<Native>,
    pub functions: Vec<Function>,
    pub constants: Vec<Constant>,
    pub entrypoint: RefFun,
    /// Byte offset where each section started, in parse order.
    sections: Vec<(&'static str, usize)>,
}

impl Module {
    /// An empty module shell, for building bytecode programmatically.
    pub fn new(version: u8) -> Module {
        Module {
            version,
            flags: 0,
            ints: Vec::new(),
            floats: Vec::new(),
            strings: Vec::new(),
            bytes: BytesPool::default(),
            debug_files: None,
            types: Vec::new(),
            globals: Vec::new(),
            natives: Vec::new(),
            functions: Vec::new(),
            constants: Vec::new(),
            entrypoint: RefFun(0),
            sections: Vec::new(),
        }
    }

    pub fn has_debug(&self) -> bool {
        self.flags & 1 != 0
    }

    /// The section a byte offset of the original input falls into.
    pub fn section_at(&self, offset: usize) -> Option<&'static str> {
        self.sections
            .iter()
            .rev()
            .find(|(_, start)| offset >= *start)
            .map(|(name, _)| *name)
    }

    pub fn ty(&self, r: RefType) -> Option<&Type> {
        self.types.get(r.0)
    }

    pub fn str_(&self, r: RefString) -> Option<&str> {
        self.strings.get(r.0).map(|s| s.as_str())
    }

    /// The function with the given findex, if it is not a native.
    pub fn function(&self, f: RefFun) -> Option<&Function> {
        self.functions.iter().find(|fun| fun.findex == f)
    }

    pub fn function_mut(&mut self, f: RefFun) -> Option<&mut Function> {
        self.functions.iter_mut().find(|fun| fun.findex == f)
    }

    pub fn native(&self, f: RefFun) -> Option<&Native> {
        self.natives.iter().find(|n| n.findex == f)
    }

    /// Append a string to the pool and return its index. Existing indices
    /// are never disturbed.
    pub fn add_string(&mut self, s: impl Into<String>) -> RefString {
        self.strings.push(s.into());
        RefString(self.strings.len() - 1)
    }

    /// First type-table entry of a payload-free kind.
    pub fn find_prim_type(&self, kind: TypeKind) -> Option<RefType> {
        self.types
            .iter()
            .position(|t| t.kind() == kind)
            .map(RefType)
    }

    /// One past the highest findex in use, for injecting new functions or
    /// natives.
    pub fn next_free_findex(&self) -> RefFun {
        let top = self
            .functions
            .iter()
            .map(|f| f.findex.0)
            .chain(self.natives.iter().map(|n| n.findex.0))
            .max();
        RefFun(top.map(|t| t + 1).unwrap_or(0))
    }

    /// Replace one op of one function, leaving every other byte of the
    /// module untouched on re-serialize.
    pub fn patch_op(&mut self, f: RefFun, pc: usize, op: Opcode) -> Result<(), Error> {
        let fidx = f.0 as u32;
        let len = self.functions.len();
        let fun = self.function_mut(f).ok_or(Error::InvalidReference {
            what: "function",
            index: f.0 as i64,
            len,
        })?;
        fun.patch_op(pc, op).map_err(|e| e.in_function(fidx))
    }

    /// The constant-object initializer for a global, if any.
    pub fn constant_for(&self, global: RefGlobal) -> Option<&Constant> {
        self.constants.iter().find(|c| c.global == global)
    }

    /// Resolve one constant against its object layout into
    /// field-name/value pairs.
    pub fn const_fields(&self, c: &Constant) -> Result<Vec<(String, GlobalValue)>, Error> {
        let gty = self.globals.get(c.global.0).ok_or(Error::InvalidReference {
            what: "global",
            index: c.global.0 as i64,
            len: self.globals.len(),
        })?;
        let obj = self
            .ty(*gty)
            .and_then(|t| t.as_obj())
            .ok_or(Error::InvalidReference {
                what: "constant object type",
                index: gty.0 as i64,
                len: self.types.len(),
            })?;
        let fields = obj.resolve_fields(&self.types)?;
        let mut out = Vec::with_capacity(c.fields.len());
        for (i, &v) in c.fields.iter().enumerate() {
            let field = fields.get(i).ok_or(Error::InvalidReference {
                what: "constant field",
                index: i as i64,
                len: fields.len(),
            })?;
            let name = self.str_(field.name).unwrap_or("?").to_string();
            let value = match self.ty(field.ty).map(|t| t.kind()) {
                Some(TypeKind::UI8 | TypeKind::UI16 | TypeKind::I32 | TypeKind::I64) => self
                    .ints
                    .get(v as usize)
                    .map(|i| GlobalValue::Int(*i))
                    .unwrap_or(GlobalValue::Raw(v)),
                Some(TypeKind::F32 | TypeKind::F64) => self
                    .floats
                    .get(v as usize)
                    .map(|f| GlobalValue::Float(*f))
                    .unwrap_or(GlobalValue::Raw(v)),
                Some(TypeKind::Bytes) => self
                    .strings
                    .get(v as usize)
                    .map(|s| GlobalValue::Str(s.clone()))
                    .unwrap_or(GlobalValue::Raw(v)),
                _ => GlobalValue::Raw(v),
            };
            out.push((name, value));
        }
        Ok(out)
    }

    /// Every constant, resolved. The view `const_str` reads from.
    pub fn init_globals(&self) -> HashMap<usize, Vec<(String, GlobalValue)>> {
        let mut out = HashMap::new();
        for c in &self.constants {
            if let Ok(fields) = self.const_fields(c) {
                out.insert(c.global.0, fields);
            }
        }
        out
    }

    /// A global holding a constant `String` object, read back as text.
    pub fn const_str(&self, global: RefGlobal) -> Option<String> {
        let c = self.constant_for(global)?;
        let obj = self.ty(*self.globals.get(global.0)?)?.as_obj()?;
        if self.str_(obj.name) != Some("String") {
            return None;
        }
        match self.const_fields(c).ok()?.into_iter().next()? {
            (_, GlobalValue::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// Parse a module from a byte buffer. The `HLB` magic may sit at a nonzero
/// offset; everything before it is skipped.
pub fn parse(bytes: &[u8]) -> Result<Module, Error> {
    let at = memmem::find(bytes, MAGIC).ok_or(Error::NoMagic)?;
    let mut r = Reader::new(bytes);
    r.seek(at);
    debug!(offset = at, "found HLB magic");

    let mut sections: Vec<(&'static str, usize)> = Vec::new();
    let mut track = |name: &'static str, r: &Reader<'_>| sections.push((name, r.pos()));

    track("header", &r);
    r.take(3, "magic")?;
    let version = r.u8("version")?;
    if !(2..=5).contains(&version) {
        return Err(Error::UnsupportedVersion(version));
    }
    let flags = r.varuint()?;
    let has_debug = flags & 1 != 0;
    let nints = r.varuint()? as usize;
    let nfloats = r.varuint()? as usize;
    let nstrings = r.varuint()? as usize;
    let nbytes = if version >= 5 { r.varuint()? as usize } else { 0 };
    let ntypes = r.varuint()? as usize;
    let nglobals = r.varuint()? as usize;
    let nnatives = r.varuint()? as usize;
    let nfunctions = r.varuint()? as usize;
    let nconstants = if version >= 4 { r.varuint()? as usize } else { 0 };
    let entrypoint = RefFun(r.varuint()? as usize);
    debug!(version, nints, nfloats, nstrings, ntypes, nfunctions, "parsed header");

    let pools = Pools {
        version,
        nints,
        nfloats,
        nstrings,
        nbytes,
        ntypes,
        nglobals,
        nfindexes: nfunctions + nnatives,
    };

    track("ints", &r);
    let mut ints = Vec::with_capacity(nints);
    for _ in 0..nints {
        ints.push(r.i32("int pool entry")?);
    }

    track("floats", &r);
    let mut floats = Vec::with_capacity(nfloats);
    for _ in 0..nfloats {
        floats.push(r.f64("float pool entry")?);
    }

    track("strings", &r);
    let strings = read_strings_block(&mut r, nstrings)?;

    let bytes_pool = if version >= 5 {
        track("bytes", &r);
        read_bytes_pool(&mut r, nbytes)?
    } else {
        BytesPool::default()
    };

    let debug_files = if has_debug {
        track("debug files", &r);
        let n = r.varuint()? as usize;
        Some(read_strings_block(&mut r, n)?)
    } else {
        None
    };
    let ndebugfiles = debug_files.as_ref().map(|d| d.len()).unwrap_or(0);

    track("types", &r);
    let mut types = Vec::with_capacity(ntypes);
    for _ in 0..ntypes {
        types.push(Type::read(&mut r, &pools)?);
    }

    track("globals", &r);
    let mut globals = Vec::with_capacity(nglobals);
    for _ in 0..nglobals {
        globals.push(RefType(r.index("type", ntypes)?));
    }

    track("natives", &r);
    let mut natives = Vec::with_capacity(nnatives);
    for _ in 0..nnatives {
        natives.push(Native {
            lib: RefString(r.index("string", nstrings)?),
            name: RefString(r.index("string", nstrings)?),
            ty: RefType(r.index("type", ntypes)?),
            findex: RefFun(r.index("function", pools.nfindexes)?),
        });
    }

    track("functions", &r);
    let mut functions = Vec::with_capacity(nfunctions);
    for _ in 0..nfunctions {
        functions.push(Function::read(&mut r, &pools, has_debug, ndebugfiles)?);
    }

    track("constants", &r);
    let mut constants = Vec::with_capacity(nconstants);
    for _ in 0..nconstants {
        let global = RefGlobal(r.index("global", nglobals)?);
        let nfields = r.varuint()? as usize;
        let mut fields = Vec::with_capacity(nfields);
        for _ in 0..nfields {
            fields.push(r.varuint()?);
        }
        constants.push(Constant { global, fields });
    }

    if nfunctions + nnatives > 0
        && !functions.iter().any(|f| f.findex == entrypoint)
        && !natives.iter().any(|n| n.findex == entrypoint)
    {
        return Err(Error::InvalidReference {
            what: "entrypoint",
            index: entrypoint.0 as i64,
            len: nfunctions + nnatives,
        });
    }

    debug!(end = r.pos(), "module parsed");
    Ok(Module {
        version,
        flags,
        ints,
        floats,
        strings,
        bytes: bytes_pool,
        debug_files,
        types,
        globals,
        natives,
        functions,
        constants,
        entrypoint,
        sections,
    })
}

/// Serialize a module. Counts are recomputed from the pools; an unmodified
/// parse re-emits its input bytes exactly.
pub fn serialize(m: &Module) -> Result<Vec<u8>, Error> {
    let mut w = Writer::new();
    w.raw(MAGIC);
    w.u8(m.version);
    w.varuint(m.flags)?;
    w.varuint(m.ints.len() as u32)?;
    w.varuint(m.floats.len() as u32)?;
    w.varuint(m.strings.len() as u32)?;
    if m.version >= 5 {
        w.varuint(m.bytes.len() as u32)?;
    }
    w.varuint(m.types.len() as u32)?;
    w.varuint(m.globals.len() as u32)?;
    w.varuint(m.natives.len() as u32)?;
    w.varuint(m.functions.len() as u32)?;
    if m.version >= 4 {
        w.varuint(m.constants.len() as u32)?;
    }
    w.varuint(m.entrypoint.0 as u32)?;

    for i in &m.ints {
        w.i32(*i);
    }
    for f in &m.floats {
        w.f64(*f);
    }
    write_strings_block(&mut w, &m.strings)?;
    if m.version >= 5 {
        w.i32(m.bytes.blob.len() as i32);
        w.raw(&m.bytes.blob);
        for p in &m.bytes.positions {
            w.varuint(*p)?;
        }
    }
    if m.has_debug() {
        let files = m.debug_files.as_deref().unwrap_or(&[]);
        w.varuint(files.len() as u32)?;
        write_strings_block(&mut w, files)?;
    }
    for t in &m.types {
        t.write(&mut w)?;
    }
    for g in &m.globals {
        w.varuint(g.0 as u32)?;
    }
    for n in &m.natives {
        w.varuint(n.lib.0 as u32)?;
        w.varuint(n.name.0 as u32)?;
        w.varuint(n.ty.0 as u32)?;
        w.varuint(n.findex.0 as u32)?;
    }
    for f in &m.functions {
        f.write(&mut w, m.has_debug(), m.version)
            .map_err(|e| e.in_function(f.findex.0 as u32))?;
    }
    if m.version >= 4 {
        for c in &m.constants {
            w.varuint(c.global.0 as u32)?;
            w.varuint(c.fields.len() as u32)?;
            for f in &c.fields {
                w.varuint(*f)?;
            }
        }
    }
    debug!(len = w.len(), "module serialized");
    Ok(w.into_bytes())
}

/// A strings block: 4-byte blob size, NUL-terminated string data, then one
/// varint length per string.
fn read_strings_block(r: &mut Reader<'_>, n: usize) -> Result<Vec<String>, Error> {
    let at = r.pos();
    let size = r.i32("strings block size")?;
    if size < 0 {
        return Err(Error::Malformed {
            offset: at,
            what: format!("negative strings block size {size}"),
        });
    }
    let data = r.take(size as usize, "strings blob")?;
    let mut out = Vec::with_capacity(n);
    let mut pos = 0usize;
    for _ in 0..n {
        let at = r.pos();
        let len = r.varuint()? as usize;
        if pos + len >= data.len() {
            return Err(Error::Malformed {
                offset: at,
                what: format!("string of length {len} overruns block"),
            });
        }
        if data[pos + len] != 0 {
            return Err(Error::Malformed {
                offset: at,
                what: "string is not NUL-terminated".into(),
            });
        }
        let s = std::str::from_utf8(&data[pos..pos + len]).map_err(|_| Error::Malformed {
            offset: at,
            what: "string is not valid UTF-8".into(),
        })?;
        out.push(s.to_string());
        pos += len + 1;
    }
    Ok(out)
}

fn write_strings_block(w: &mut Writer, strings: &[String]) -> Result<(), Error> {
    let total: usize = strings.iter().map(|s| s.len() + 1).sum();
    w.i32(total as i32);
    for s in strings {
        w.raw(s.as_bytes());
        w.u8(0);
    }
    for s in strings {
        w.varuint(s.len() as u32)?;
    }
    Ok(())
}

fn read_bytes_pool(r: &mut Reader<'_>, n: usize) -> Result<BytesPool, Error> {
    let at = r.pos();
    let size = r.i32("bytes pool size")?;
    if size < 0 {
        return Err(Error::Malformed {
            offset: at,
            what: format!("negative bytes pool size {size}"),
        });
    }
    let blob = r.take(size as usize, "bytes blob")?.to_vec();
    let mut positions = Vec::with_capacity(n);
    for _ in 0..n {
        let at = r.pos();
        let p = r.varuint()?;
        if p as usize > blob.len() {
            return Err(Error::Malformed {
                offset: at,
                what: format!("bytes position {p} outside blob"),
            });
        }
        positions.push(p);
    }
    Ok(BytesPool { blob, positions })
}

/// Decode the run-length line-number stream: one `(file, line)` pair per op.
fn read_debug(r: &mut Reader<'_>, nops: usize, nfiles: usize) -> Result<Vec<(i32, i32)>, Error> {
    let mut out = Vec::with_capacity(nops);
    let mut curfile: i32 = -1;
    let mut curline: i32 = 0;
    while out.len() < nops {
        let at = r.pos();
        let c = r.u8("debug info")? as i32;
        if c & 1 != 0 {
            let hi = c >> 1;
            curfile = (hi << 8) | r.u8("debug info")? as i32;
            if curfile as usize >= nfiles {
                return Err(Error::InvalidReference {
                    what: "debug file",
                    index: curfile as i64,
                    len: nfiles,
                });
            }
        } else if c & 2 != 0 {
            let delta = c >> 6;
            let mut count = (c >> 2) & 15;
            if out.len() + count as usize > nops {
                return Err(Error::Malformed {
                    offset: at,
                    what: "debug repeat count overruns op list".into(),
                });
            }
            while count > 0 {
                out.push((curfile, curline));
                count -= 1;
            }
            curline += delta;
        } else if c & 4 != 0 {
            curline += c >> 3;
            out.push((curfile, curline));
        } else {
            let b2 = r.u8("debug info")? as i32;
            let b3 = r.u8("debug info")? as i32;
            curline = (c >> 3) | (b2 << 5) | (b3 << 13);
            out.push((curfile, curline));
        }
    }
    Ok(out)
}

fn flush_repeat(w: &mut Writer, curpos: &mut i32, rcount: &mut i32, pos: i32) {
    while *rcount > 15 {
        w.u8((15 << 2) | 2);
        *rcount -= 15;
    }
    if *rcount > 0 {
        let mut delta = pos - *curpos;
        if !(0 < delta && delta < 4) {
            delta = 0;
        }
        w.u8(((delta << 6) | (*rcount << 2) | 2) as u8);
        *rcount = 0;
        *curpos += delta;
    }
}

/// Encode the line-number stream with the upstream writer's scheme.
fn write_debug(w: &mut Writer, pairs: &[(i32, i32)]) {
    let mut curfile: i32 = -1;
    let mut curpos: i32 = 0;
    let mut rcount: i32 = 0;
    for &(f, p) in pairs {
        if f != curfile {
            flush_repeat(w, &mut curpos, &mut rcount, p);
            curfile = f;
            w.u8(((f >> 7) | 1) as u8);
            w.u8((f & 0xFF) as u8);
        }
        if p != curpos {
            flush_repeat(w, &mut curpos, &mut rcount, p);
        }
        if p == curpos {
            rcount += 1;
        } else {
            let delta = p - curpos;
            if 0 < delta && delta < 32 {
                w.u8(((delta << 3) | 4) as u8);
            } else {
                w.u8(((p << 3) & 0xFF) as u8);
                w.u8(((p >> 5) & 0xFF) as u8);
                w.u8(((p >> 13) & 0xFF) as u8);
            }
            curpos = p;
        }
    }
    let final_pos = curpos;
    flush_repeat(w, &mut curpos, &mut rcount, final_pos);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::{Reader, Writer};

    #[test]
    fn strings_block_roundtrip() {
        let strings = vec!["".to_string(), "hello".to_string(), "héllo".to_string()];
        let mut w = Writer::new();
        write_strings_block(&mut w, &strings).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(read_strings_block(&mut r, 3).unwrap(), strings);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn strings_block_missing_terminator() {
        // size 4, data "abcd" (no NUL), one string of length 4
        let mut w = Writer::new();
        w.i32(4);
        w.raw(b"abcd");
        w.varuint(4).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            read_strings_block(&mut r, 1),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn bytes_pool_entries() {
        let mut pool = BytesPool::default();
        pool.set_entries(vec![vec![1, 2, 3], vec![], vec![4]]);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.entry(0), Some(&[1u8, 2, 3][..]));
        assert_eq!(pool.entry(1), Some(&[][..]));
        assert_eq!(pool.entry(2), Some(&[4u8][..]));
        assert_eq!(pool.entry(3), None);
    }

    #[test]
    fn debug_stream_roundtrip() {
        let pairs: Vec<(i32, i32)> = vec![
            (0, 10),
            (0, 10),
            (0, 10),
            (0, 12),
            (0, 12),
            (1, 300),
            (1, 301),
            (1, 9000),
        ];
        let mut w = Writer::new();
        write_debug(&mut w, &pairs);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(read_debug(&mut r, pairs.len(), 2).unwrap(), pairs);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn debug_stream_long_run() {
        // more than 15 repeats forces chained repeat markers
        let pairs: Vec<(i32, i32)> = std::iter::repeat((0, 5)).take(40).collect();
        let mut w = Writer::new();
        write_debug(&mut w, &pairs);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(read_debug(&mut r, pairs.len(), 1).unwrap(), pairs);
    }

    #[test]
    fn debug_file_out_of_range() {
        let pairs = vec![(3, 1)];
        let mut w = Writer::new();
        write_debug(&mut w, &pairs);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            read_debug(&mut r, 1, 2),
            Err(Error::InvalidReference { what: "debug file", .. })
        ));
    }
}
