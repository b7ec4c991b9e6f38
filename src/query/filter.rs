//! Filter trees over entity properties.
//!
//! Filters are built with a small fluent API and combined with `and`, `or` and
//! `not`. Parameter placeholders are numbered in order of appearance; combining
//! two filters renumbers the right-hand side so numbering stays canonical.

use std::cmp::Ordering;
use std::fmt;

use crate::schema::{EntityDef, Storable};
use crate::types::{FetchError, FetchResult, Value};

/// Relational comparison operator.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    pub fn sql(self) -> &'static str {
        match self {
            RelOp::Eq => " = ",
            RelOp::Ne => " <> ",
            RelOp::Lt => " < ",
            RelOp::Le => " <= ",
            RelOp::Gt => " > ",
            RelOp::Ge => " >= ",
        }
    }

    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Ge => RelOp::Lt,
            RelOp::Gt => RelOp::Le,
            RelOp::Le => RelOp::Gt,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            RelOp::Eq => ordering == Ordering::Equal,
            RelOp::Ne => ordering != Ordering::Equal,
            RelOp::Lt => ordering == Ordering::Less,
            RelOp::Le => ordering != Ordering::Greater,
            RelOp::Gt => ordering == Ordering::Greater,
            RelOp::Ge => ordering != Ordering::Less,
        }
    }

    /// `actual op expected` as SQL would decide it. A null operand turns
    /// equality into `IS NULL` / `IS NOT NULL`; any other null never matches.
    fn holds(self, actual: &Value, expected: &Value) -> bool {
        match (self, actual.is_null(), expected.is_null()) {
            (RelOp::Eq, _, true) => actual.is_null(),
            (RelOp::Ne, _, true) => !actual.is_null(),
            (_, true, _) | (_, _, true) => false,
            _ => self.accepts(actual.compare(expected)),
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql().trim())
    }
}

/// Property path through zero or more joins, e.g. `dept.name`.
///
/// Each segment carries an outer-join flag, written by parenthesizing the
/// segment: `(dept).name` reaches `name` through a left outer join.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ChainedProperty {
    segments: Vec<String>,
    outer: Vec<bool>,
}

impl ChainedProperty {
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        let mut outer = Vec::new();
        for raw in path.split('.') {
            let raw = raw.trim();
            match raw.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
                Some(inner) => {
                    segments.push(inner.trim().to_owned());
                    outer.push(true);
                }
                None => {
                    segments.push(raw.to_owned());
                    outer.push(false);
                }
            }
        }
        Self { segments, outer }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The segment naming the final property.
    pub fn last(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_outer(&self, index: usize) -> bool {
        self.outer.get(index).copied().unwrap_or(false)
    }
}

impl From<&str> for ChainedProperty {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl fmt::Display for ChainedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            if self.is_outer(i) {
                write!(f, "({segment})")?;
            } else {
                f.write_str(segment)?;
            }
        }
        Ok(())
    }
}

/// Right-hand side of a property comparison.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Operand {
    Constant(Value),
    /// Zero-based position in the values supplied at execution.
    Param(usize),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PropertyFilter {
    pub property: ChainedProperty,
    pub op: RelOp,
    pub operand: Operand,
}

/// Boolean filter tree.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Filter {
    /// Matches everything.
    Open,
    /// Matches nothing.
    Closed,
    Property(PropertyFilter),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    /// Some row of a joined entity satisfies `filter`.
    Exists {
        property: ChainedProperty,
        filter: Box<Filter>,
        negated: bool,
    },
}

/// Start of a property comparison; see [`Filter::prop`].
#[derive(Clone, Debug)]
pub struct PropertyRef(ChainedProperty);

impl PropertyRef {
    fn compare(self, op: RelOp, operand: Operand) -> Filter {
        Filter::Property(PropertyFilter {
            property: self.0,
            op,
            operand,
        })
    }

    pub fn eq(self, value: impl Into<Value>) -> Filter {
        self.compare(RelOp::Eq, Operand::Constant(value.into()))
    }

    pub fn ne(self, value: impl Into<Value>) -> Filter {
        self.compare(RelOp::Ne, Operand::Constant(value.into()))
    }

    pub fn lt(self, value: impl Into<Value>) -> Filter {
        self.compare(RelOp::Lt, Operand::Constant(value.into()))
    }

    pub fn le(self, value: impl Into<Value>) -> Filter {
        self.compare(RelOp::Le, Operand::Constant(value.into()))
    }

    pub fn gt(self, value: impl Into<Value>) -> Filter {
        self.compare(RelOp::Gt, Operand::Constant(value.into()))
    }

    pub fn ge(self, value: impl Into<Value>) -> Filter {
        self.compare(RelOp::Ge, Operand::Constant(value.into()))
    }

    pub fn is_null(self) -> Filter {
        self.eq(Value::Null)
    }

    pub fn not_null(self) -> Filter {
        self.ne(Value::Null)
    }

    /// Comparison against a value supplied at execution.
    pub fn param(self, op: RelOp) -> Filter {
        self.compare(op, Operand::Param(0))
    }

    pub fn eq_param(self) -> Filter {
        self.param(RelOp::Eq)
    }

    pub fn ne_param(self) -> Filter {
        self.param(RelOp::Ne)
    }
}

impl Filter {
    pub fn open() -> Self {
        Filter::Open
    }

    pub fn closed() -> Self {
        Filter::Closed
    }

    pub fn prop(path: &str) -> PropertyRef {
        PropertyRef(ChainedProperty::parse(path))
    }

    pub fn exists(path: &str, filter: Filter) -> Self {
        Filter::Exists {
            property: ChainedProperty::parse(path),
            filter: Box::new(filter),
            negated: false,
        }
    }

    pub fn not_exists(path: &str, filter: Filter) -> Self {
        Filter::Exists {
            property: ChainedProperty::parse(path),
            filter: Box::new(filter),
            negated: true,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Filter::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Filter::Closed)
    }

    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Closed, _) | (_, Filter::Closed) => Filter::Closed,
            (Filter::Open, other) => other,
            (this, Filter::Open) => this,
            (this, mut other) => {
                other.shift_params(this.param_count());
                Filter::And(Box::new(this), Box::new(other))
            }
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Open, _) | (_, Filter::Open) => Filter::Open,
            (Filter::Closed, other) => other,
            (this, Filter::Closed) => this,
            (this, mut other) => {
                other.shift_params(this.param_count());
                Filter::Or(Box::new(this), Box::new(other))
            }
        }
    }

    /// Logical negation, pushed down to the leaves.
    pub fn not(self) -> Filter {
        match self {
            Filter::Open => Filter::Closed,
            Filter::Closed => Filter::Open,
            Filter::Property(mut p) => {
                p.op = p.op.negate();
                Filter::Property(p)
            }
            Filter::And(l, r) => Filter::Or(Box::new(l.not()), Box::new(r.not())),
            Filter::Or(l, r) => Filter::And(Box::new(l.not()), Box::new(r.not())),
            Filter::Exists {
                property,
                filter,
                negated,
            } => Filter::Exists {
                property,
                filter,
                negated: !negated,
            },
        }
    }

    /// Number of parameter placeholders.
    pub fn param_count(&self) -> usize {
        match self {
            Filter::Open | Filter::Closed => 0,
            Filter::Property(p) => usize::from(matches!(p.operand, Operand::Param(_))),
            Filter::And(l, r) | Filter::Or(l, r) => l.param_count() + r.param_count(),
            Filter::Exists { filter, .. } => filter.param_count(),
        }
    }

    fn shift_params(&mut self, offset: usize) {
        match self {
            Filter::Open | Filter::Closed => {}
            Filter::Property(p) => {
                if let Operand::Param(index) = &mut p.operand {
                    *index += offset;
                }
            }
            Filter::And(l, r) | Filter::Or(l, r) => {
                l.shift_params(offset);
                r.shift_params(offset);
            }
            Filter::Exists { filter, .. } => filter.shift_params(offset),
        }
    }

    /// Conjunctive normal form clauses. Leaves keep their parameter indexes,
    /// so a placeholder duplicated by distribution still binds the same value.
    pub fn conjuncts(&self) -> Vec<Filter> {
        match self {
            Filter::Open => Vec::new(),
            Filter::And(l, r) => {
                let mut clauses = l.conjuncts();
                clauses.extend(r.conjuncts());
                clauses
            }
            Filter::Or(l, r) => {
                let left = l.conjuncts();
                let right = r.conjuncts();
                let mut clauses = Vec::with_capacity(left.len() * right.len());
                for a in &left {
                    for b in &right {
                        clauses.push(Filter::Or(Box::new(a.clone()), Box::new(b.clone())));
                    }
                }
                clauses
            }
            other => vec![other.clone()],
        }
    }

    /// Rejoins clauses with AND without renumbering parameters.
    pub fn conjoin(clauses: Vec<Filter>) -> Filter {
        clauses
            .into_iter()
            .reduce(|acc, clause| Filter::And(Box::new(acc), Box::new(clause)))
            .unwrap_or(Filter::Open)
    }

    /// True when any leaf, outside `exists` sub-filters, reaches a derived property.
    pub fn references_derived(&self, def: &EntityDef) -> bool {
        match self {
            Filter::Open | Filter::Closed => false,
            Filter::Property(p) => is_derived(def, &p.property),
            Filter::And(l, r) | Filter::Or(l, r) => {
                l.references_derived(def) || r.references_derived(def)
            }
            Filter::Exists { property, filter, .. } => {
                match join_target(def, property.segments()) {
                    Some(target) => filter.references_derived(&target),
                    None => false,
                }
            }
        }
    }

    /// Evaluates the filter against a loaded entity.
    ///
    /// Nulls follow SQL: only `= null` matches a null value, and `<>`, `<`,
    /// `>` and friends reject it.
    pub fn matches<T: Storable>(&self, entity: &T, values: &[Value]) -> FetchResult<bool> {
        match self {
            Filter::Open => Ok(true),
            Filter::Closed => Ok(false),
            Filter::Property(p) => {
                let actual = entity.get_path(p.property.segments()).ok_or_else(|| {
                    FetchError::invalid(format!(
                        "property '{}' cannot be evaluated on a loaded entity",
                        p.property
                    ))
                })?;
                let expected = match &p.operand {
                    Operand::Constant(value) => value,
                    Operand::Param(index) => values.get(*index).ok_or_else(|| {
                        FetchError::invalid(format!("no value bound for parameter {index}"))
                    })?,
                };
                Ok(p.op.holds(&actual, expected))
            }
            Filter::And(l, r) => Ok(l.matches(entity, values)? && r.matches(entity, values)?),
            Filter::Or(l, r) => Ok(l.matches(entity, values)? || r.matches(entity, values)?),
            Filter::Exists { property, .. } => Err(FetchError::invalid(format!(
                "exists over '{property}' cannot be evaluated on a loaded entity"
            ))),
        }
    }
}

/// Whether any segment of the chain is a derived property.
pub(crate) fn is_derived(def: &EntityDef, chain: &ChainedProperty) -> bool {
    let mut current = def.clone();
    for (i, segment) in chain.segments().iter().enumerate() {
        let Some(property) = current.find(segment) else {
            return false;
        };
        if property.derived {
            return true;
        }
        if i + 1 < chain.len() {
            match &property.join {
                Some(join) => current = (join.target)(),
                None => return false,
            }
        }
    }
    false
}

fn join_target(def: &EntityDef, segments: &[String]) -> Option<EntityDef> {
    let mut current = def.clone();
    for segment in segments {
        let join = current.find(segment)?.join.as_ref()?;
        current = (join.target)();
    }
    Some(current)
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Open => f.write_str("open"),
            Filter::Closed => f.write_str("closed"),
            Filter::Property(p) => match &p.operand {
                Operand::Constant(value) => write!(f, "{} {} {}", p.property, p.op, value),
                Operand::Param(index) => write!(f, "{} {} ?{}", p.property, p.op, index),
            },
            Filter::And(l, r) => {
                let wrap = |inner: &Filter| matches!(inner, Filter::Or(..));
                if wrap(l) {
                    write!(f, "({l})")?;
                } else {
                    write!(f, "{l}")?;
                }
                f.write_str(" & ")?;
                if wrap(r) {
                    write!(f, "({r})")
                } else {
                    write!(f, "{r}")
                }
            }
            Filter::Or(l, r) => write!(f, "{l} | {r}"),
            Filter::Exists {
                property,
                filter,
                negated,
            } => {
                if *negated {
                    f.write_str("!")?;
                }
                write!(f, "{property}({filter})")
            }
        }
    }
}
