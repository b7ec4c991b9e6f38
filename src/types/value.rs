use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use time::OffsetDateTime;

/// Runtime value exchanged between entities, filters, and the driver.
#[derive(Clone, Debug)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer; narrower integer properties widen into it.
    Int(i64),
    /// 64-bit floating point value.
    Float(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Point in time with offset.
    Timestamp(OffsetDateTime),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compares two values for sorting; nulls sort high.
    ///
    /// Integers and floats compare numerically with each other. Values of
    /// unrelated kinds order by variant rank so the ordering stays total.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::Bytes(_) => 3,
            Value::Timestamp(_) => 4,
            Value::Null => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Timestamp(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Column type codes as reported by database metadata.
///
/// The numeric codes follow the JDBC `java.sql.Types` constants so that
/// metadata from any driver can be carried without translation tables.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    VarChar,
    LongVarChar,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Null,
    Other,
    Blob,
    Clob,
    Boolean,
}

impl SqlType {
    /// Returns the JDBC type code.
    pub fn code(self) -> i32 {
        match self {
            SqlType::Bit => -7,
            SqlType::TinyInt => -6,
            SqlType::SmallInt => 5,
            SqlType::Integer => 4,
            SqlType::BigInt => -5,
            SqlType::Float => 6,
            SqlType::Real => 7,
            SqlType::Double => 8,
            SqlType::Numeric => 2,
            SqlType::Decimal => 3,
            SqlType::Char => 1,
            SqlType::VarChar => 12,
            SqlType::LongVarChar => -1,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::Timestamp => 93,
            SqlType::Binary => -2,
            SqlType::VarBinary => -3,
            SqlType::LongVarBinary => -4,
            SqlType::Null => 0,
            SqlType::Other => 1111,
            SqlType::Blob => 2004,
            SqlType::Clob => 2005,
            SqlType::Boolean => 16,
        }
    }

    pub fn is_character(self) -> bool {
        matches!(
            self,
            SqlType::Char | SqlType::VarChar | SqlType::LongVarChar | SqlType::Clob
        )
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary | SqlType::Blob
        )
    }

    pub fn is_exact_numeric(self) -> bool {
        matches!(
            self,
            SqlType::TinyInt
                | SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Numeric
                | SqlType::Decimal
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Bit => "BIT",
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE",
            SqlType::Numeric => "NUMERIC",
            SqlType::Decimal => "DECIMAL",
            SqlType::Char => "CHAR",
            SqlType::VarChar => "VARCHAR",
            SqlType::LongVarChar => "LONGVARCHAR",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Binary => "BINARY",
            SqlType::VarBinary => "VARBINARY",
            SqlType::LongVarBinary => "LONGVARBINARY",
            SqlType::Null => "NULL",
            SqlType::Other => "OTHER",
            SqlType::Blob => "BLOB",
            SqlType::Clob => "CLOB",
            SqlType::Boolean => "BOOLEAN",
        };
        f.write_str(name)
    }
}
