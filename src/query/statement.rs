//! SQL text with deferred parameter binding.
//!
//! A statement is a list of segments. Most are literal text; parameter
//! segments become `?` and pull their value from the filter values at render
//! time. Nullable equality segments render as `IS NULL` / `IS NOT NULL` when
//! the bound value is null, so the text depends on the values.

use std::fmt::Write as _;

use crate::query::filter::RelOp;
use crate::schema::Adapter;
use crate::types::{FetchError, FetchResult, Value};

/// Where a placeholder's value comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamSource {
    /// Position in the execution values.
    Value(usize),
    /// Filter constant that could not be inlined.
    Constant(Value),
}

/// One placeholder and how to produce its value.
#[derive(Clone, Debug)]
pub struct ParamMarker {
    /// Property path, for error messages.
    pub property: String,
    pub source: ParamSource,
    pub adapter: Option<Adapter>,
}

impl ParamMarker {
    fn raw_value(&self, values: &[Value]) -> FetchResult<Value> {
        match &self.source {
            ParamSource::Constant(value) => Ok(value.clone()),
            ParamSource::Value(index) => values.get(*index).cloned().ok_or_else(|| {
                FetchError::invalid(format!(
                    "no value bound for parameter {index} ({})",
                    self.property
                ))
            }),
        }
    }

    fn storage_value(&self, raw: Value) -> FetchResult<Value> {
        match self.adapter {
            None => Ok(raw),
            Some(adapter) => adapter.to_storage(raw).map_err(|reason| FetchError::Conversion {
                property: self.property.clone(),
                reason,
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Segment {
    Literal(String),
    Param(usize),
    /// `column = ?` or `column <> ?`, switching to a null test for null values.
    NullableCompare {
        column: String,
        op: RelOp,
        marker: usize,
    },
}

/// SQL ready to bind.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Clone, Debug, Default)]
pub struct SqlStatement {
    segments: Vec<Segment>,
    markers: Vec<ParamMarker>,
}

impl SqlStatement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(&mut self, text: &str) {
        if let Some(Segment::Literal(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Literal(text.to_owned()));
        }
    }

    pub fn param(&mut self, marker: ParamMarker) {
        self.markers.push(marker);
        self.segments.push(Segment::Param(self.markers.len() - 1));
    }

    pub fn nullable_compare(&mut self, column: String, op: RelOp, marker: ParamMarker) {
        self.markers.push(marker);
        self.segments.push(Segment::NullableCompare {
            column,
            op,
            marker: self.markers.len() - 1,
        });
    }

    /// Appends another statement, renumbering its markers.
    pub fn append(&mut self, other: &SqlStatement) {
        let offset = self.markers.len();
        self.markers.extend(other.markers.iter().cloned());
        for segment in &other.segments {
            match segment {
                Segment::Literal(text) => self.literal(text),
                Segment::Param(marker) => self.segments.push(Segment::Param(marker + offset)),
                Segment::NullableCompare { column, op, marker } => {
                    self.segments.push(Segment::NullableCompare {
                        column: column.clone(),
                        op: *op,
                        marker: marker + offset,
                    })
                }
            }
        }
    }

    pub fn markers(&self) -> &[ParamMarker] {
        &self.markers
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Text with every placeholder shown as `?`. Nullable comparisons show
    /// their non-null form.
    pub fn shape(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(_) => out.push('?'),
                Segment::NullableCompare { column, op, .. } => {
                    let _ = write!(out, "{column}{}?", op.sql());
                }
            }
        }
        out
    }

    /// Produces the SQL text and parameter list for the given values.
    pub fn render(&self, values: &[Value]) -> FetchResult<BoundStatement> {
        let mut sql = String::new();
        let mut params = Vec::with_capacity(self.markers.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => sql.push_str(text),
                Segment::Param(index) => {
                    let marker = &self.markers[*index];
                    params.push(marker.storage_value(marker.raw_value(values)?)?);
                    sql.push('?');
                }
                Segment::NullableCompare { column, op, marker } => {
                    let marker = &self.markers[*marker];
                    let raw = marker.raw_value(values)?;
                    sql.push_str(column);
                    if raw.is_null() {
                        sql.push_str(if *op == RelOp::Eq {
                            " IS NULL"
                        } else {
                            " IS NOT NULL"
                        });
                    } else {
                        sql.push_str(op.sql());
                        sql.push('?');
                        params.push(marker.storage_value(raw)?);
                    }
                }
            }
        }
        Ok(BoundStatement { sql, params })
    }
}
