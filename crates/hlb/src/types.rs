//! The type table: a sum type per HashLink type kind, addressed by index.
//!
//! The table may contain cycles (class A holding a field of class B and the
//! other way around), so types reference each other through [`RefType`]
//! indices and never through pointers. Resolution happens at query time.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::buf::{Reader, Writer};
use crate::error::Error;
use crate::opcodes::{RefFun, RefString, RefType};

/// Serialization tag of a type. The order defines the on-disk numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeKind {
    Void = 0,
    UI8 = 1,
    UI16 = 2,
    I32 = 3,
    I64 = 4,
    F32 = 5,
    F64 = 6,
    Bool = 7,
    Bytes = 8,
    Dyn = 9,
    Fun = 10,
    Obj = 11,
    Array = 12,
    TypeType = 13,
    Ref = 14,
    Virtual = 15,
    DynObj = 16,
    Abstract = 17,
    Enum = 18,
    Null = 19,
    Method = 20,
    Struct = 21,
    Packed = 22,
}

/// Header-declared pool sizes, threaded through the readers so every
/// reference is bounds-checked as it is decoded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pools {
    pub version: u8,
    pub nints: usize,
    pub nfloats: usize,
    pub nstrings: usize,
    pub nbytes: usize,
    pub ntypes: usize,
    pub nglobals: usize,
    pub nfindexes: usize,
}

/// Signature of a function or method type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeFun {
    pub args: Vec<RefType>,
    pub ret: RefType,
}

/// A named, typed slot on an object or virtual type.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjField {
    pub name: RefString,
    pub ty: RefType,
}

/// A virtual method table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjProto {
    pub name: RefString,
    pub findex: RefFun,
    /// Slot in the parent vtable being overridden; negative when none.
    /// Carried verbatim.
    pub pindex: i32,
}

/// Attaches a function to an object-field slot (static methods and
/// closures bound at init).
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Index into the flattened field list (superclass fields first).
    pub field: usize,
    pub findex: RefFun,
}

/// Class or struct layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeObj {
    pub name: RefString,
    pub super_: Option<RefType>,
    /// Raw global-value slot as encoded; `0` on the wire means none.
    pub global: Option<u32>,
    pub fields: Vec<ObjField>,
    pub protos: Vec<ObjProto>,
    pub bindings: Vec<Binding>,
}

impl TypeObj {
    /// Flattened field list over the whole hierarchy, superclass fields
    /// first. Field references in opcodes index into this list.
    pub fn resolve_fields<'a>(&'a self, types: &'a [Type]) -> Result<Vec<&'a ObjField>, Error> {
        let mut chain: Vec<&TypeObj> = vec![self];
        let mut seen: Vec<usize> = Vec::new();
        let mut cur = self.super_;
        while let Some(sup) = cur {
            if seen.contains(&sup.0) {
                return Err(Error::CyclicInheritance);
            }
            seen.push(sup.0);
            match types.get(sup.0) {
                Some(Type::Obj(o)) | Some(Type::Struct(o)) => {
                    chain.push(o);
                    cur = o.super_;
                }
                _ => {
                    return Err(Error::InvalidReference {
                        what: "superclass type",
                        index: sup.0 as i64,
                        len: types.len(),
                    })
                }
            }
        }
        Ok(chain
            .iter()
            .rev()
            .flat_map(|o| o.fields.iter())
            .collect())
    }
}

/// One variant of an enum type, with its payload tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumConstruct {
    pub name: RefString,
    pub params: Vec<RefType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeEnum {
    pub name: RefString,
    pub global: Option<u32>,
    pub constructs: Vec<EnumConstruct>,
}

/// A type table entry. Primitive kinds carry no payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    UI8,
    UI16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Bytes,
    Dyn,
    Fun(TypeFun),
    Obj(TypeObj),
    Array,
    TypeType,
    Ref(RefType),
    Virtual { fields: Vec<ObjField> },
    DynObj,
    Abstract { name: RefString },
    Enum(TypeEnum),
    Null(RefType),
    Method(TypeFun),
    Struct(TypeObj),
    Packed(RefType),
}

impl Type {
    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Void => TypeKind::Void,
            Type::UI8 => TypeKind::UI8,
            Type::UI16 => TypeKind::UI16,
            Type::I32 => TypeKind::I32,
            Type::I64 => TypeKind::I64,
            Type::F32 => TypeKind::F32,
            Type::F64 => TypeKind::F64,
            Type::Bool => TypeKind::Bool,
            Type::Bytes => TypeKind::Bytes,
            Type::Dyn => TypeKind::Dyn,
            Type::Fun(_) => TypeKind::Fun,
            Type::Obj(_) => TypeKind::Obj,
            Type::Array => TypeKind::Array,
            Type::TypeType => TypeKind::TypeType,
            Type::Ref(_) => TypeKind::Ref,
            Type::Virtual { .. } => TypeKind::Virtual,
            Type::DynObj => TypeKind::DynObj,
            Type::Abstract { .. } => TypeKind::Abstract,
            Type::Enum(_) => TypeKind::Enum,
            Type::Null(_) => TypeKind::Null,
            Type::Method(_) => TypeKind::Method,
            Type::Struct(_) => TypeKind::Struct,
            Type::Packed(_) => TypeKind::Packed,
        }
    }

    /// The function signature payload, if this is a `Fun` or `Method`.
    pub fn as_fun(&self) -> Option<&TypeFun> {
        match self {
            Type::Fun(f) | Type::Method(f) => Some(f),
            _ => None,
        }
    }

    /// The object payload, if this is an `Obj` or `Struct`.
    pub fn as_obj(&self) -> Option<&TypeObj> {
        match self {
            Type::Obj(o) | Type::Struct(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub(crate) fn read(r: &mut Reader<'_>, pools: &Pools) -> Result<Type, Error> {
        let at = r.pos();
        let tag = r.u8("type kind")?;
        let kind = TypeKind::try_from(tag).map_err(|_| Error::Malformed {
            offset: at,
            what: format!("invalid type kind {tag}"),
        })?;
        Ok(match kind {
            TypeKind::Void => Type::Void,
            TypeKind::UI8 => Type::UI8,
            TypeKind::UI16 => Type::UI16,
            TypeKind::I32 => Type::I32,
            TypeKind::I64 => Type::I64,
            TypeKind::F32 => Type::F32,
            TypeKind::F64 => Type::F64,
            TypeKind::Bool => Type::Bool,
            TypeKind::Bytes => Type::Bytes,
            TypeKind::Dyn => Type::Dyn,
            TypeKind::Array => Type::Array,
            TypeKind::TypeType => Type::TypeType,
            TypeKind::DynObj => Type::DynObj,
            TypeKind::Fun => Type::Fun(read_fun(r, pools)?),
            TypeKind::Method => Type::Method(read_fun(r, pools)?),
            TypeKind::Obj => Type::Obj(read_obj(r, pools)?),
            TypeKind::Struct => Type::Struct(read_obj(r, pools)?),
            TypeKind::Ref => Type::Ref(read_tref(r, pools)?),
            TypeKind::Null => Type::Null(read_tref(r, pools)?),
            TypeKind::Packed => Type::Packed(read_tref(r, pools)?),
            TypeKind::Abstract => Type::Abstract {
                name: read_sref(r, pools)?,
            },
            TypeKind::Virtual => {
                let nfields = r.varuint()? as usize;
                let mut fields = Vec::with_capacity(nfields);
                for _ in 0..nfields {
                    fields.push(read_field(r, pools)?);
                }
                Type::Virtual { fields }
            }
            TypeKind::Enum => {
                let name = read_sref(r, pools)?;
                let global = match r.varuint()? {
                    0 => None,
                    g => Some(g),
                };
                let nconstructs = r.varuint()? as usize;
                let mut constructs = Vec::with_capacity(nconstructs);
                for _ in 0..nconstructs {
                    let name = read_sref(r, pools)?;
                    let nparams = r.varuint()? as usize;
                    let mut params = Vec::with_capacity(nparams);
                    for _ in 0..nparams {
                        params.push(read_tref(r, pools)?);
                    }
                    constructs.push(EnumConstruct { name, params });
                }
                Type::Enum(TypeEnum {
                    name,
                    global,
                    constructs,
                })
            }
        })
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.u8(self.kind().into());
        match self {
            Type::Void
            | Type::UI8
            | Type::UI16
            | Type::I32
            | Type::I64
            | Type::F32
            | Type::F64
            | Type::Bool
            | Type::Bytes
            | Type::Dyn
            | Type::Array
            | Type::TypeType
            | Type::DynObj => {}
            Type::Fun(f) | Type::Method(f) => write_fun(f, w)?,
            Type::Obj(o) | Type::Struct(o) => write_obj(o, w)?,
            Type::Ref(t) | Type::Null(t) | Type::Packed(t) => w.varuint(t.0 as u32)?,
            Type::Abstract { name } => w.varuint(name.0 as u32)?,
            Type::Virtual { fields } => {
                w.varuint(fields.len() as u32)?;
                for f in fields {
                    w.varuint(f.name.0 as u32)?;
                    w.varuint(f.ty.0 as u32)?;
                }
            }
            Type::Enum(e) => {
                w.varuint(e.name.0 as u32)?;
                w.varuint(e.global.unwrap_or(0))?;
                w.varuint(e.constructs.len() as u32)?;
                for c in &e.constructs {
                    w.varuint(c.name.0 as u32)?;
                    w.varuint(c.params.len() as u32)?;
                    for p in &c.params {
                        w.varuint(p.0 as u32)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn read_tref(r: &mut Reader<'_>, pools: &Pools) -> Result<RefType, Error> {
    Ok(RefType(r.index("type", pools.ntypes)?))
}

fn read_sref(r: &mut Reader<'_>, pools: &Pools) -> Result<RefString, Error> {
    Ok(RefString(r.index("string", pools.nstrings)?))
}

fn read_field(r: &mut Reader<'_>, pools: &Pools) -> Result<ObjField, Error> {
    Ok(ObjField {
        name: read_sref(r, pools)?,
        ty: read_tref(r, pools)?,
    })
}

fn read_fun(r: &mut Reader<'_>, pools: &Pools) -> Result<TypeFun, Error> {
    let nargs = r.u8("fun arity")? as usize;
    let mut args = Vec::with_capacity(nargs);
    for _ in 0..nargs {
        args.push(read_tref(r, pools)?);
    }
    let ret = read_tref(r, pools)?;
    Ok(TypeFun { args, ret })
}

fn write_fun(f: &TypeFun, w: &mut Writer) -> Result<(), Error> {
    if f.args.len() > u8::MAX as usize {
        return Err(Error::Oversized(f.args.len() as i64));
    }
    w.u8(f.args.len() as u8);
    for a in &f.args {
        w.varuint(a.0 as u32)?;
    }
    w.varuint(f.ret.0 as u32)
}

fn read_obj(r: &mut Reader<'_>, pools: &Pools) -> Result<TypeObj, Error> {
    let name = read_sref(r, pools)?;
    let sup = r.varint()?;
    let super_ = if sup < 0 {
        None
    } else if (sup as usize) < pools.ntypes {
        Some(RefType(sup as usize))
    } else {
        return Err(Error::InvalidReference {
            what: "superclass type",
            index: sup as i64,
            len: pools.ntypes,
        });
    };
    let global = match r.varuint()? {
        0 => None,
        g => Some(g),
    };
    let nfields = r.varuint()? as usize;
    let nprotos = r.varuint()? as usize;
    let nbindings = r.varuint()? as usize;
    let mut fields = Vec::with_capacity(nfields);
    for _ in 0..nfields {
        fields.push(read_field(r, pools)?);
    }
    let mut protos = Vec::with_capacity(nprotos);
    for _ in 0..nprotos {
        protos.push(ObjProto {
            name: read_sref(r, pools)?,
            findex: RefFun(r.index("function", pools.nfindexes)?),
            pindex: r.varint()?,
        });
    }
    let mut bindings = Vec::with_capacity(nbindings);
    for _ in 0..nbindings {
        bindings.push(Binding {
            field: r.varuint()? as usize,
            findex: RefFun(r.index("function", pools.nfindexes)?),
        });
    }
    Ok(TypeObj {
        name,
        super_,
        global,
        fields,
        protos,
        bindings,
    })
}

fn write_obj(o: &TypeObj, w: &mut Writer) -> Result<(), Error> {
    w.varuint(o.name.0 as u32)?;
    match o.super_ {
        Some(s) => w.varint(s.0 as i32)?,
        None => w.varint(-1)?,
    }
    w.varuint(o.global.unwrap_or(0))?;
    w.varuint(o.fields.len() as u32)?;
    w.varuint(o.protos.len() as u32)?;
    w.varuint(o.bindings.len() as u32)?;
    for f in &o.fields {
        w.varuint(f.name.0 as u32)?;
        w.varuint(f.ty.0 as u32)?;
    }
    for p in &o.protos {
        w.varuint(p.name.0 as u32)?;
        w.varuint(p.findex.0 as u32)?;
        w.varint(p.pindex)?;
    }
    for b in &o.bindings {
        w.varuint(b.field as u32)?;
        w.varuint(b.findex.0 as u32)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> Pools {
        Pools {
            version: 5,
            nints: 16,
            nfloats: 16,
            nstrings: 16,
            nbytes: 16,
            ntypes: 16,
            nglobals: 16,
            nfindexes: 16,
        }
    }

    fn roundtrip(t: &Type) -> Type {
        let mut w = Writer::new();
        t.write(&mut w).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let back = Type::read(&mut r, &pools()).unwrap();
        assert_eq!(r.remaining(), 0);
        back
    }

    #[test]
    fn primitive_kinds() {
        for t in [Type::Void, Type::I32, Type::F64, Type::Bool, Type::Dyn, Type::Array] {
            assert_eq!(roundtrip(&t), t);
        }
    }

    #[test]
    fn fun_signature() {
        let t = Type::Fun(TypeFun {
            args: vec![RefType(3), RefType(6)],
            ret: RefType(0),
        });
        assert_eq!(roundtrip(&t), t);
    }

    #[test]
    fn obj_payload() {
        let t = Type::Obj(TypeObj {
            name: RefString(1),
            super_: Some(RefType(2)),
            global: Some(4),
            fields: vec![ObjField {
                name: RefString(2),
                ty: RefType(3),
            }],
            protos: vec![ObjProto {
                name: RefString(3),
                findex: RefFun(7),
                pindex: -1,
            }],
            bindings: vec![Binding {
                field: 0,
                findex: RefFun(8),
            }],
        });
        assert_eq!(roundtrip(&t), t);
    }

    #[test]
    fn enum_payload() {
        let t = Type::Enum(TypeEnum {
            name: RefString(5),
            global: None,
            constructs: vec![
                EnumConstruct {
                    name: RefString(6),
                    params: vec![RefType(3)],
                },
                EnumConstruct {
                    name: RefString(7),
                    params: vec![],
                },
            ],
        });
        assert_eq!(roundtrip(&t), t);
    }

    #[test]
    fn invalid_kind_rejected() {
        let mut r = Reader::new(&[23]);
        assert!(matches!(
            Type::read(&mut r, &pools()),
            Err(Error::Malformed { offset: 0, .. })
        ));
    }

    #[test]
    fn out_of_range_type_ref() {
        // Ref -> type 40, table only has 16 entries
        let mut w = Writer::new();
        w.u8(TypeKind::Ref.into());
        w.varuint(40).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            Type::read(&mut r, &pools()),
            Err(Error::InvalidReference { what: "type", index: 40, .. })
        ));
    }

    #[test]
    fn inherited_fields_flatten_super_first() {
        // types[0] = base with field a; types[1] = derived with field b
        let base = Type::Obj(TypeObj {
            name: RefString(0),
            super_: None,
            global: None,
            fields: vec![ObjField {
                name: RefString(1),
                ty: RefType(0),
            }],
            protos: vec![],
            bindings: vec![],
        });
        let derived_obj = TypeObj {
            name: RefString(2),
            super_: Some(RefType(0)),
            global: None,
            fields: vec![ObjField {
                name: RefString(3),
                ty: RefType(0),
            }],
            protos: vec![],
            bindings: vec![],
        };
        let types = vec![base, Type::Obj(derived_obj.clone())];
        let fields = derived_obj.resolve_fields(&types).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, RefString(1));
        assert_eq!(fields[1].name, RefString(3));
    }

    #[test]
    fn inheritance_cycle_detected() {
        let mk = |sup: usize| {
            Type::Obj(TypeObj {
                name: RefString(0),
                super_: Some(RefType(sup)),
                global: None,
                fields: vec![],
                protos: vec![],
                bindings: vec![],
            })
        };
        let types = vec![mk(1), mk(0)];
        let obj = types[0].as_obj().unwrap();
        assert!(matches!(
            obj.resolve_fields(&types),
            Err(Error::CyclicInheritance)
        ));
    }
}
