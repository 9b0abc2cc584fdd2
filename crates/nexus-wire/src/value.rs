//! The streamed value model: type codes and the `Value` enum.
//!
//! Every value that travels on the wire is one of the eight primitive
//! scalar kinds, a nullable string, a homogeneous ordered list, or a
//! registered composite type (class code + fields). The type code is
//! what makes the encoding self-describing: `write_value` emits the
//! code first, and `read_value` uses it to pick the decoder.

use std::fmt;

/// Hard cap on homogeneous list length.
pub const MAX_LIST_LEN: usize = 32767;

// ---------------------------------------------------------------------------
// TypeCode
// ---------------------------------------------------------------------------

/// A wire-level type code.
///
/// Codes 1–10 are reserved for the built-in kinds; registered composite
/// types start at [`TypeCode::FIRST_COMPOSITE`]. The code for a given
/// composite must match on both ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeCode(pub i16);

impl TypeCode {
    pub const BOOL: TypeCode = TypeCode(1);
    pub const BYTE: TypeCode = TypeCode(2);
    pub const SHORT: TypeCode = TypeCode(3);
    pub const CHAR: TypeCode = TypeCode(4);
    pub const INT: TypeCode = TypeCode(5);
    pub const LONG: TypeCode = TypeCode(6);
    pub const FLOAT: TypeCode = TypeCode(7);
    pub const DOUBLE: TypeCode = TypeCode(8);
    pub const STRING: TypeCode = TypeCode(9);
    pub const LIST: TypeCode = TypeCode(10);

    /// The first code available to registered composite types.
    pub const FIRST_COMPOSITE: TypeCode = TypeCode(32);

    /// Returns `true` if this code belongs to a registered composite
    /// type rather than a built-in kind.
    pub fn is_composite(self) -> bool {
        self.0 >= Self::FIRST_COMPOSITE.0
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single streamed value.
///
/// `String` carries `Option<String>` because strings are nullable on
/// the wire (a presence flag precedes the bytes). `List` elements must
/// all share one runtime type; this is enforced at write time, not by
/// the type system. `Composite` pairs a registered class code with the
/// fields its codec knows how to lay out.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    List(Vec<Value>),
    Composite(TypeCode, Vec<Value>),
}

impl Value {
    /// Returns the wire type code of this value.
    ///
    /// Two values share a runtime type iff their codes are equal;
    /// for composites that means the same registered class code.
    pub fn type_code(&self) -> TypeCode {
        match self {
            Value::Bool(_) => TypeCode::BOOL,
            Value::Byte(_) => TypeCode::BYTE,
            Value::Short(_) => TypeCode::SHORT,
            Value::Char(_) => TypeCode::CHAR,
            Value::Int(_) => TypeCode::INT,
            Value::Long(_) => TypeCode::LONG,
            Value::Float(_) => TypeCode::FLOAT,
            Value::Double(_) => TypeCode::DOUBLE,
            Value::String(_) => TypeCode::STRING,
            Value::List(_) => TypeCode::LIST,
            Value::Composite(code, _) => *code,
        }
    }

    /// Convenience constructor for a present string.
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Some(s.into()))
    }

    /// Convenience constructor for an absent (null) string.
    pub fn null_string() -> Value {
        Value::String(None)
    }
}
