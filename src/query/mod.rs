#![forbid(unsafe_code)]

//! Query model, SQL compilation and execution.
//!
//! A [`Filter`] and an [`OrderingList`] are compiled against resolved entity
//! metadata into a [`CompiledQuery`]: a SELECT with its joins and bind
//! markers, plus whatever part of the query must run in process. The
//! [`QueryExecutor`] binds values and returns a cursor.

/// Filter trees and chained property paths.
pub mod filter;

/// Ordering terms.
pub mod ordering;

/// Join graph for chained properties.
pub mod join;

/// SQL text with deferred parameter markers.
pub mod statement;

/// Filter and ordering compilation.
pub mod compiler;

/// Binding and execution of compiled queries.
pub mod executor;

pub use compiler::{compile, CompiledQuery};
pub use executor::QueryExecutor;
pub use filter::{ChainedProperty, Filter, Operand, PropertyFilter, PropertyRef, RelOp};
pub use join::{JoinGraph, JoinNode};
pub use ordering::{Direction, OrderedProperty, OrderingList};
pub use statement::{BoundStatement, SqlStatement};
