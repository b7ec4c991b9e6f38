//! Property-to-column type compatibility and storage adapters.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::driver::ColumnInfo;
use crate::schema::entity::PropertyType;
use crate::types::{SqlType, Value};

/// Converts between a property's natural type and a different storage type.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Adapter {
    /// `bool` stored as `'Y'` / `'N'`.
    YesNo,
    /// `bool` stored as 1 / 0 in a numeric column.
    BoolNumber,
    /// Timestamp stored as RFC 3339 text.
    TimestampText,
    /// Timestamp stored as milliseconds since the Unix epoch.
    TimestampMillis,
    /// String stored as UTF-8 bytes.
    TextBytes,
}

impl Adapter {
    /// Built-in adapters tried, in order, when no direct mapping exists.
    pub const SEARCH_ORDER: [Adapter; 5] = [
        Adapter::BoolNumber,
        Adapter::YesNo,
        Adapter::TimestampMillis,
        Adapter::TimestampText,
        Adapter::TextBytes,
    ];

    pub fn adapts(self, ty: PropertyType) -> bool {
        match self {
            Adapter::YesNo | Adapter::BoolNumber => ty == PropertyType::Bool,
            Adapter::TimestampText | Adapter::TimestampMillis => ty == PropertyType::Timestamp,
            Adapter::TextBytes => ty.is_text(),
        }
    }

    /// Whether the storage side of the adapter fits the column.
    pub fn stores_in(self, column: &ColumnInfo) -> bool {
        let sql = column.sql_type;
        match self {
            Adapter::YesNo => sql.is_character(),
            Adapter::BoolNumber => sql.is_exact_numeric() || sql == SqlType::Bit,
            Adapter::TimestampText => sql.is_character(),
            Adapter::TimestampMillis => {
                matches!(sql, SqlType::BigInt | SqlType::Integer)
                    || (matches!(sql, SqlType::Numeric | SqlType::Decimal)
                        && column.decimal_digits.unwrap_or(0) == 0)
            }
            Adapter::TextBytes => sql.is_binary(),
        }
    }

    /// Converts a property value into its storage form.
    pub fn to_storage(self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (self, value) {
            (Adapter::YesNo, Value::Bool(b)) => Ok(Value::Text(if b { "Y" } else { "N" }.into())),
            (Adapter::BoolNumber, Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
            (Adapter::TimestampText, Value::Timestamp(ts)) => ts
                .format(&Rfc3339)
                .map(Value::Text)
                .map_err(|err| err.to_string()),
            (Adapter::TimestampMillis, Value::Timestamp(ts)) => {
                let millis = ts.unix_timestamp_nanos() / 1_000_000;
                i64::try_from(millis)
                    .map(Value::Int)
                    .map_err(|_| format!("timestamp {ts} out of range"))
            }
            (Adapter::TextBytes, Value::Text(s)) => Ok(Value::Bytes(s.into_bytes())),
            (adapter, other) => Err(format!(
                "{adapter:?} cannot store a {} value",
                other.type_name()
            )),
        }
    }

    /// Converts a stored value back into the property's natural form.
    pub fn from_storage(self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (self, value) {
            (Adapter::YesNo, Value::Text(s)) => match s.trim() {
                "Y" | "y" => Ok(Value::Bool(true)),
                "N" | "n" => Ok(Value::Bool(false)),
                other => Err(format!("expected 'Y' or 'N', found '{other}'")),
            },
            (Adapter::BoolNumber, Value::Int(i)) => Ok(Value::Bool(i != 0)),
            (Adapter::BoolNumber, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Adapter::TimestampText, Value::Text(s)) => parse_timestamp(&s),
            (Adapter::TimestampText, Value::Timestamp(ts)) => Ok(Value::Timestamp(ts)),
            (Adapter::TimestampMillis, Value::Int(millis)) => {
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
                    .map(Value::Timestamp)
                    .map_err(|err| err.to_string())
            }
            (Adapter::TextBytes, Value::Bytes(bytes)) => String::from_utf8(bytes)
                .map(Value::Text)
                .map_err(|err| err.to_string()),
            (adapter, other) => Err(format!(
                "{adapter:?} cannot load a {} value",
                other.type_name()
            )),
        }
    }
}

/// How a property's values reach its column.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mapping {
    Direct,
    Adapted(Adapter),
}

/// Direct compatibility between a natural type and a column.
pub fn is_compatible(ty: PropertyType, column: &ColumnInfo) -> bool {
    let sql = column.sql_type;
    // Columns without a declared type accept anything.
    if matches!(sql, SqlType::Other | SqlType::Null) {
        return true;
    }
    match ty {
        PropertyType::Bool => matches!(sql, SqlType::Bit | SqlType::Boolean),
        PropertyType::I8 | PropertyType::I16 | PropertyType::I32 | PropertyType::I64 => match sql {
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => true,
            SqlType::Numeric | SqlType::Decimal => {
                column.decimal_digits.unwrap_or(0) == 0
                    && match (column.size, ty.integer_digits()) {
                        (Some(precision), Some(needed)) => precision <= needed,
                        _ => true,
                    }
            }
            _ => false,
        },
        PropertyType::F32 | PropertyType::F64 => matches!(
            sql,
            SqlType::Float | SqlType::Real | SqlType::Double | SqlType::Numeric | SqlType::Decimal
        ),
        PropertyType::Char => {
            sql.is_character() && (sql != SqlType::Char || column.size.unwrap_or(1) == 1)
        }
        PropertyType::String => sql.is_character(),
        PropertyType::Bytes => sql.is_binary(),
        PropertyType::Timestamp => matches!(sql, SqlType::Timestamp | SqlType::Date),
    }
}

/// Picks how a property maps to a column.
///
/// A declared adapter wins when its storage side fits. Otherwise direct
/// compatibility is checked, then the built-in adapters in search order.
pub fn choose_mapping(
    ty: PropertyType,
    declared: Option<Adapter>,
    column: &ColumnInfo,
) -> Option<Mapping> {
    if let Some(adapter) = declared {
        return (adapter.adapts(ty) && adapter.stores_in(column)).then_some(Mapping::Adapted(adapter));
    }
    if is_compatible(ty, column) {
        return Some(Mapping::Direct);
    }
    Adapter::SEARCH_ORDER
        .into_iter()
        .find(|a| a.adapts(ty) && a.stores_in(column))
        .map(Mapping::Adapted)
}

/// Normalizes a value read from a directly mapped column.
///
/// Drivers hand back their own storage classes (SQLite returns booleans as
/// integers and timestamps as text); this widens them to the natural type.
pub fn coerce(ty: PropertyType, value: Value) -> Result<Value, String> {
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (PropertyType::Bool, Value::Int(i)) => Ok(Value::Bool(i != 0)),
        (PropertyType::Bool, Value::Text(s)) => match s.as_str() {
            "true" | "TRUE" | "1" => Ok(Value::Bool(true)),
            "false" | "FALSE" | "0" => Ok(Value::Bool(false)),
            other => Err(format!("'{other}' is not a boolean")),
        },
        (t, Value::Float(f)) if t.is_integer() => {
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(Value::Int(f as i64))
            } else {
                Err(format!("{f} is not an integer"))
            }
        }
        (t, Value::Text(s)) if t.is_integer() => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|err| err.to_string()),
        (t, Value::Int(i)) if t.is_float() => Ok(Value::Float(i as f64)),
        (t, Value::Text(s)) if t.is_float() => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|err| err.to_string()),
        (PropertyType::Timestamp, Value::Text(s)) => parse_timestamp(&s),
        (PropertyType::Timestamp, Value::Int(secs)) => OffsetDateTime::from_unix_timestamp(secs)
            .map(Value::Timestamp)
            .map_err(|err| err.to_string()),
        (PropertyType::String | PropertyType::Char, Value::Int(i)) => Ok(Value::Text(i.to_string())),
        (_, value) => Ok(value),
    }
}

fn parse_timestamp(text: &str) -> Result<Value, String> {
    OffsetDateTime::parse(text.trim(), &Rfc3339)
        .map(Value::Timestamp)
        .map_err(|err| format!("'{text}' is not an RFC 3339 timestamp: {err}"))
}
