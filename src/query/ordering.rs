use std::cmp::Ordering;
use std::fmt;

use crate::query::filter::{is_derived, ChainedProperty};
use crate::schema::{EntityDef, Storable};
use crate::types::Value;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
    /// Any order is acceptable; rendered as ascending.
    Unspecified,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct OrderedProperty {
    pub property: ChainedProperty,
    pub direction: Direction,
}

impl OrderedProperty {
    /// Parses `+name`, `-dept.name` or `~name`. No prefix means ascending.
    pub fn parse(term: &str) -> Self {
        let term = term.trim();
        let (direction, path) = match term.chars().next() {
            Some('+') => (Direction::Ascending, &term[1..]),
            Some('-') => (Direction::Descending, &term[1..]),
            Some('~') => (Direction::Unspecified, &term[1..]),
            _ => (Direction::Ascending, term),
        };
        Self {
            property: ChainedProperty::parse(path),
            direction,
        }
    }
}

impl fmt::Display for OrderedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            Direction::Ascending => '+',
            Direction::Descending => '-',
            Direction::Unspecified => '~',
        };
        write!(f, "{sign}{}", self.property)
    }
}

/// Sort specification: properties compared in order.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct OrderingList(Vec<OrderedProperty>);

impl OrderingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(terms: &[&str]) -> Self {
        Self(terms.iter().map(|t| OrderedProperty::parse(t)).collect())
    }

    pub fn then(mut self, term: &str) -> Self {
        self.0.push(OrderedProperty::parse(term));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrderedProperty> {
        self.0.iter()
    }

    /// Splits at the first derived term: the prefix can be sorted by the
    /// database, the rest must be sorted in process.
    pub fn split_derived(&self, def: &EntityDef) -> (OrderingList, OrderingList) {
        let cut = self
            .0
            .iter()
            .position(|term| is_derived(def, &term.property))
            .unwrap_or(self.0.len());
        (Self(self.0[..cut].to_vec()), Self(self.0[cut..].to_vec()))
    }

    pub fn compare<T: Storable>(&self, a: &T, b: &T) -> Ordering {
        for term in &self.0 {
            let path = term.property.segments();
            let left = a.get_path(path).unwrap_or(Value::Null);
            let right = b.get_path(path).unwrap_or(Value::Null);
            let ordering = match term.direction {
                Direction::Descending => right.compare(&left),
                _ => left.compare(&right),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for OrderingList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}
