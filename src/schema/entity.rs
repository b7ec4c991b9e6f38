//! Declared entity model.
//!
//! Entity definitions are what a code generator would emit for each Storable
//! type: the property list with types, nullability and relationships, plus the
//! primary and alternate keys. Nothing here touches the database.

use std::fmt;

use crate::schema::types::Adapter;
use crate::types::{FetchResult, Value};

/// Natural type of a declared property.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PropertyType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Char,
    String,
    Bytes,
    Timestamp,
}

impl PropertyType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PropertyType::I8 | PropertyType::I16 | PropertyType::I32 | PropertyType::I64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, PropertyType::F32 | PropertyType::F64)
    }

    pub fn is_text(self) -> bool {
        matches!(self, PropertyType::Char | PropertyType::String)
    }

    /// Decimal digits needed to hold any value of an integer type.
    pub(crate) fn integer_digits(self) -> Option<u32> {
        match self {
            PropertyType::I8 => Some(3),
            PropertyType::I16 => Some(5),
            PropertyType::I32 => Some(10),
            PropertyType::I64 => Some(19),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyType::Bool => "bool",
            PropertyType::I8 => "i8",
            PropertyType::I16 => "i16",
            PropertyType::I32 => "i32",
            PropertyType::I64 => "i64",
            PropertyType::F32 => "f32",
            PropertyType::F64 => "f64",
            PropertyType::Char => "char",
            PropertyType::String => "string",
            PropertyType::Bytes => "bytes",
            PropertyType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Relationship from one entity to another.
///
/// `internal[i]` on the declaring entity equals `external[i]` on the target.
#[derive(Clone, Debug)]
pub struct JoinDef {
    pub target: fn() -> EntityDef,
    pub internal: Vec<String>,
    pub external: Vec<String>,
    /// One-to-many joins can only be filtered through `exists`.
    pub to_many: bool,
}

impl JoinDef {
    /// Many-to-one join through the given property pairs.
    pub fn to_one(target: fn() -> EntityDef, pairs: &[(&str, &str)]) -> Self {
        Self::new(target, pairs, false)
    }

    /// One-to-many join through the given property pairs.
    pub fn to_many(target: fn() -> EntityDef, pairs: &[(&str, &str)]) -> Self {
        Self::new(target, pairs, true)
    }

    fn new(target: fn() -> EntityDef, pairs: &[(&str, &str)], to_many: bool) -> Self {
        Self {
            target,
            internal: pairs.iter().map(|(i, _)| (*i).to_owned()).collect(),
            external: pairs.iter().map(|(_, e)| (*e).to_owned()).collect(),
            to_many,
        }
    }
}

/// A named, typed field of an entity.
#[derive(Clone, Debug)]
pub struct PropertyDef {
    pub name: String,
    pub ty: PropertyType,
    pub nullable: bool,
    /// Computed in-process; never stored.
    pub derived: bool,
    /// Explicit column names, replacing the generated candidates.
    pub aliases: Vec<String>,
    pub join: Option<JoinDef>,
    pub version: bool,
    pub sequence: Option<String>,
    pub adapter: Option<Adapter>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            derived: false,
            aliases: Vec::new(),
            join: None,
            version: false,
            sequence: None,
            adapter: None,
        }
    }

    /// Property referencing another entity. Join properties hold no column.
    pub fn join(name: impl Into<String>, join: JoinDef) -> Self {
        let mut def = Self::new(name, PropertyType::I64);
        def.nullable = true;
        def.join = Some(join);
        def
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn derived(mut self) -> Self {
        self.derived = true;
        self
    }

    pub fn alias(mut self, column: impl Into<String>) -> Self {
        self.aliases.push(column.into());
        self
    }

    pub fn version(mut self) -> Self {
        self.version = true;
        self
    }

    pub fn sequence(mut self, name: impl Into<String>) -> Self {
        self.sequence = Some(name.into());
        self
    }

    pub fn adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// True when the property maps onto a column.
    pub fn is_stored(&self) -> bool {
        !self.derived && self.join.is_none()
    }
}

/// Declared shape of a Storable type.
#[derive(Clone, Debug)]
pub struct EntityDef {
    pub name: String,
    /// Explicit table names, replacing the generated candidates.
    pub table_aliases: Vec<String>,
    pub properties: Vec<PropertyDef>,
    pub primary_key: Vec<String>,
    pub alternate_keys: Vec<Vec<String>>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_aliases: Vec::new(),
            properties: Vec::new(),
            primary_key: Vec::new(),
            alternate_keys: Vec::new(),
        }
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_aliases.push(name.into());
        self
    }

    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    pub fn primary_key(mut self, names: &[&str]) -> Self {
        self.primary_key = names.iter().map(|n| (*n).to_owned()).collect();
        self
    }

    pub fn alternate_key(mut self, names: &[&str]) -> Self {
        self.alternate_keys
            .push(names.iter().map(|n| (*n).to_owned()).collect());
        self
    }

    pub fn find(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Stored properties in declaration order; this is the row layout.
    pub fn stored(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.is_stored())
    }

    pub fn version_property(&self) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.version && p.is_stored())
    }
}

/// Random access to one fetched row, by stored-property index.
///
/// Values have already been converted to the property's natural type.
pub trait RowReader {
    fn len(&self) -> usize;
    fn value(&self, index: usize) -> FetchResult<Value>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A relational record type mapped to a table.
///
/// Implementations are normally generated; the persistence core only needs to
/// construct instances from rows and read or write properties by name.
pub trait Storable: Sized + Send + 'static {
    fn definition() -> EntityDef;

    /// Builds an instance from a row laid out in stored-property order.
    fn load(row: &dyn RowReader) -> FetchResult<Self>;

    /// Reads a property, derived ones included. `None` for unknown names.
    fn get(&self, property: &str) -> Option<Value>;

    /// Writes a stored property. Returns false for unknown names.
    fn set(&mut self, property: &str, value: Value) -> bool;

    /// Reads a property through a join path.
    ///
    /// The default only understands single-segment paths; entities that keep
    /// their joined instances loaded can override it.
    fn get_path(&self, path: &[String]) -> Option<Value> {
        match path {
            [single] => self.get(single),
            _ => None,
        }
    }
}
