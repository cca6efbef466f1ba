use thiserror::Error;

/// Errors produced while reading, validating or writing a bytecode module.
#[derive(Debug, Error)]
pub enum Error {
    /// The buffer contains no `HLB` magic anywhere.
    #[error("no HLB magic found in buffer")]
    NoMagic,

    /// Ran off the end of the input.
    #[error("truncated input at byte {offset} while reading {what}")]
    Truncated { offset: usize, what: &'static str },

    #[error("unsupported bytecode version {0} (supported: 4, 5)")]
    UnsupportedVersion(u8),

    /// Structurally invalid data at a known offset.
    #[error("malformed bytecode at byte {offset}: {what}")]
    Malformed { offset: usize, what: String },

    /// An index into one of the pools is out of range.
    #[error("{what} index {index} out of range ({len} entries)")]
    InvalidReference {
        what: &'static str,
        index: i64,
        len: usize,
    },

    /// A jump lands outside the enclosing function's op list.
    #[error("f@{findex}, op {op}: jump target {target} outside function ({nops} ops)")]
    JumpOutOfBounds {
        findex: u32,
        op: usize,
        target: i64,
        nops: usize,
    },

    /// An opcode tag outside the catalog for the module's version.
    #[error("unsupported opcode tag {tag} at byte {offset}")]
    UnsupportedOpcode { tag: u8, offset: usize },

    /// A class hierarchy that loops back on itself.
    #[error("cyclic inheritance in class hierarchy")]
    CyclicInheritance,

    /// A value too large for the variable-length encoding.
    #[error("value {0} cannot be varint-encoded (magnitude >= 0x20000000)")]
    Oversized(i64),

    /// Parse or serialization failure localized to one function.
    #[error("in f@{findex}: {source}")]
    InFunction {
        findex: u32,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn in_function(self, findex: u32) -> Error {
        match self {
            Error::InFunction { .. } => self,
            other => Error::InFunction {
                findex,
                source: Box::new(other),
            },
        }
    }
}
