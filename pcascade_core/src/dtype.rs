//! Element type tags and the codec-family dispatch table.

use std::fmt;

use crate::error::{CascadeError, Result};

/// Raw tags at or above this value describe fixed-size arrays of a base type.
const FIXED_ARRAY_OFFSET: i32 = 20;
/// Raw tags at or above this value describe pointers or variable-length arrays.
const POINTER_OFFSET: i32 = 40;
/// `char*`.
const CHAR_STAR: i32 = 7;

/// Numeric element kinds a cascade can carry. Discriminants are the on-disk
/// datatype byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementTypeTag {
    None = 0,
    I8 = 1,
    I16 = 2,
    I32 = 3,
    F32 = 5,
    F64 = 8,
    U8 = 11,
    U16 = 12,
    U32 = 13,
    I64 = 16,
    U64 = 17,
}

impl ElementTypeTag {
    pub const ALL_NUMERIC: [ElementTypeTag; 10] = [
        ElementTypeTag::I8,
        ElementTypeTag::I16,
        ElementTypeTag::I32,
        ElementTypeTag::I64,
        ElementTypeTag::U8,
        ElementTypeTag::U16,
        ElementTypeTag::U32,
        ElementTypeTag::U64,
        ElementTypeTag::F32,
        ElementTypeTag::F64,
    ];

    /// Parse a raw tag. Pointer, array, and unknown tags are rejected.
    pub fn from_raw(raw: i32) -> Result<Self> {
        if raw == CHAR_STAR || raw >= FIXED_ARRAY_OFFSET || raw < 0 {
            return Err(CascadeError::UnsupportedType(raw));
        }
        let tag = match raw {
            0 => ElementTypeTag::None,
            1 => ElementTypeTag::I8,
            2 => ElementTypeTag::I16,
            3 => ElementTypeTag::I32,
            5 => ElementTypeTag::F32,
            8 => ElementTypeTag::F64,
            11 => ElementTypeTag::U8,
            12 => ElementTypeTag::U16,
            13 => ElementTypeTag::U32,
            16 => ElementTypeTag::I64,
            17 => ElementTypeTag::U64,
            other => return Err(CascadeError::UnsupportedType(other)),
        };
        Ok(tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementTypeTag::None => "none",
            ElementTypeTag::I8 => "i8",
            ElementTypeTag::I16 => "i16",
            ElementTypeTag::I32 => "i32",
            ElementTypeTag::I64 => "i64",
            ElementTypeTag::U8 => "u8",
            ElementTypeTag::U16 => "u16",
            ElementTypeTag::U32 => "u32",
            ElementTypeTag::U64 => "u64",
            ElementTypeTag::F32 => "f32",
            ElementTypeTag::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL_NUMERIC.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for ElementTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for ElementTypeTag {
    type Error = CascadeError;

    fn try_from(raw: u8) -> Result<Self> {
        Self::from_raw(raw as i32)
    }
}

/// Which codec family handles an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    /// Lossy, level-driven floating point transform.
    Float,
    /// Lossless integer codec; levels carry no meaning.
    Exact,
}

/// Float widths the float family understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatKind {
    F32,
    F64,
}

impl FloatKind {
    pub fn element_size(self) -> usize {
        match self {
            FloatKind::F32 => 4,
            FloatKind::F64 => 8,
        }
    }

    /// Explicit mantissa bits of the IEEE 754 layout.
    pub fn mantissa_bits(self) -> u32 {
        match self {
            FloatKind::F32 => 23,
            FloatKind::F64 => 52,
        }
    }
}

/// Result of a dispatch-table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSelection {
    pub tag: ElementTypeTag,
    pub family: CodecFamily,
    pub element_size: usize,
    pub signed: bool,
}

impl CodecSelection {
    /// Float width, for float-family selections.
    pub fn float_kind(&self) -> Option<FloatKind> {
        match self.tag {
            ElementTypeTag::F32 => Some(FloatKind::F32),
            ElementTypeTag::F64 => Some(FloatKind::F64),
            _ => None,
        }
    }

    /// `len` must be a whole number of elements; a trailing partial element is
    /// an error, never truncated.
    pub fn check_alignment(&self, len: usize) -> Result<()> {
        if len % self.element_size != 0 {
            return Err(CascadeError::MisalignedBuffer {
                len,
                element_size: self.element_size,
            });
        }
        Ok(())
    }
}

/// Map an element type to its codec family and element size.
pub fn select_codec(tag: ElementTypeTag) -> Result<CodecSelection> {
    use CodecFamily::{Exact, Float};
    let (family, element_size, signed) = match tag {
        ElementTypeTag::None => return Err(CascadeError::UnsupportedType(tag as i32)),
        ElementTypeTag::F32 => (Float, 4, true),
        ElementTypeTag::F64 => (Float, 8, true),
        ElementTypeTag::I8 => (Exact, 1, true),
        ElementTypeTag::I16 => (Exact, 2, true),
        ElementTypeTag::I32 => (Exact, 4, true),
        ElementTypeTag::I64 => (Exact, 8, true),
        ElementTypeTag::U8 => (Exact, 1, false),
        ElementTypeTag::U16 => (Exact, 2, false),
        ElementTypeTag::U32 => (Exact, 4, false),
        ElementTypeTag::U64 => (Exact, 8, false),
    };
    Ok(CodecSelection {
        tag,
        family,
        element_size,
        signed,
    })
}

/// Look up a raw datatype byte straight from a header.
pub fn select_codec_raw(raw: i32) -> Result<CodecSelection> {
    select_codec(ElementTypeTag::from_raw(raw)?)
}
