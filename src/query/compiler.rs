//! Compiles a filter and ordering into SQL plus an in-process remainder.

use std::fmt::Write as _;
use std::hash::Hasher;
use std::sync::Arc;

use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

use crate::query::filter::{Filter, Operand, PropertyFilter, RelOp};
use crate::query::join::JoinGraph;
use crate::query::ordering::{Direction, OrderingList};
use crate::query::statement::{ParamMarker, ParamSource, SqlStatement};
use crate::schema::{EntityDef, MetadataProvider, ResolvedEntity, ResolvedProperty};
use crate::types::{FetchError, FetchResult, Value};

/// Everything needed to run one query shape.
#[derive(Debug)]
pub struct CompiledQuery {
    pub entity: Arc<ResolvedEntity>,
    /// Full SELECT including ORDER BY.
    pub select: SqlStatement,
    /// FROM list (without the keyword) holding only joins the filter needs.
    pub filter_from: String,
    /// WHERE body (without the keyword), absent for open filters.
    pub where_clause: Option<SqlStatement>,
    pub aliased: bool,
    pub root_alias: String,
    /// Ordering handled by ORDER BY.
    pub sql_ordering: OrderingList,
    /// Conjuncts the database cannot evaluate.
    pub remainder_filter: Option<Filter>,
    /// Ordering applied in process after the SQL ordering.
    pub remainder_ordering: OrderingList,
    pub param_count: usize,
    pub plan_hash: u64,
    /// The filter can match nothing; no statement runs.
    pub closed: bool,
}

impl CompiledQuery {
    pub fn has_remainder(&self) -> bool {
        self.remainder_filter.is_some() || !self.remainder_ordering.is_empty()
    }

    pub fn count(&self) -> SqlStatement {
        let mut stmt = SqlStatement::new();
        stmt.literal("SELECT COUNT(*) FROM ");
        stmt.literal(&self.filter_from);
        if let Some(where_clause) = &self.where_clause {
            stmt.literal(" WHERE ");
            stmt.append(where_clause);
        }
        stmt
    }

    /// Bulk delete of every row the SQL filter matches.
    ///
    /// With joins the rows are selected through a correlated EXISTS on the
    /// primary key, since DELETE cannot name joined tables portably.
    pub fn delete(&self) -> SqlStatement {
        let table = self.entity.table_name();
        let mut stmt = SqlStatement::new();
        stmt.literal("DELETE FROM ");
        stmt.literal(&table);
        if !self.aliased {
            if let Some(where_clause) = &self.where_clause {
                stmt.literal(" WHERE ");
                stmt.append(where_clause);
            }
            return stmt;
        }
        stmt.literal(" WHERE EXISTS (SELECT 1 FROM ");
        stmt.literal(&self.filter_from);
        stmt.literal(" WHERE ");
        let correlation: Vec<String> = self
            .entity
            .primary_key()
            .map(|p| {
                format!(
                    "{}.{} = {}.{}",
                    self.root_alias,
                    p.column_name(),
                    table,
                    p.column_name()
                )
            })
            .collect();
        stmt.literal(&correlation.join(" AND "));
        if let Some(where_clause) = &self.where_clause {
            stmt.literal(" AND (");
            stmt.append(where_clause);
            stmt.literal(")");
        }
        stmt.literal(")");
        stmt
    }

    pub fn explain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "entity: {} ({})", self.entity.name(), self.entity.table_name());
        if self.closed {
            out.push_str("filter is closed; no statement is executed\n");
        } else {
            let _ = writeln!(out, "select: {}", self.select.shape());
            let _ = writeln!(out, "count: {}", self.count().shape());
            let _ = writeln!(out, "delete: {}", self.delete().shape());
            if let Some(remainder) = &self.remainder_filter {
                let _ = writeln!(out, "remainder filter: {remainder}");
            }
            if !self.remainder_ordering.is_empty() {
                let _ = writeln!(out, "remainder ordering: {}", self.remainder_ordering);
            }
        }
        let _ = writeln!(out, "plan hash: {:016x}", self.plan_hash);
        out
    }
}

/// Splits a filter into the part SQL can evaluate and a derived remainder.
///
/// Only filters touching derived properties are split. When no conjunct is
/// SQL-capable the whole filter stays in process.
pub fn split_filter(filter: &Filter, def: &EntityDef) -> (Filter, Option<Filter>) {
    if !filter.references_derived(def) {
        return (filter.clone(), None);
    }
    let (derived, plain): (Vec<_>, Vec<_>) = filter
        .conjuncts()
        .into_iter()
        .partition(|clause| clause.references_derived(def));
    if plain.is_empty() {
        return (Filter::Open, Some(filter.clone()));
    }
    (Filter::conjoin(plain), Some(Filter::conjoin(derived)))
}

pub fn compile(
    provider: &dyn MetadataProvider,
    entity: Arc<ResolvedEntity>,
    filter: &Filter,
    ordering: &OrderingList,
) -> FetchResult<CompiledQuery> {
    let param_count = filter.param_count();
    if filter.is_closed() {
        return Ok(CompiledQuery {
            filter_from: entity.table_name(),
            entity,
            select: SqlStatement::new(),
            where_clause: None,
            aliased: false,
            root_alias: "T0".to_owned(),
            sql_ordering: OrderingList::new(),
            remainder_filter: None,
            remainder_ordering: OrderingList::new(),
            param_count,
            plan_hash: 0,
            closed: true,
        });
    }

    let (sql_filter, remainder_filter) = split_filter(filter, &entity.def);
    if let Some(remainder) = &remainder_filter {
        reject_remainder_exists(remainder)?;
    }
    let (sql_ordering, remainder_ordering) = ordering.split_derived(&entity.def);

    let mut graph = JoinGraph::new(Arc::clone(&entity), 0);
    graph.add_filter(&sql_filter, provider)?;
    for term in sql_ordering.iter() {
        graph.add_chain(&term.property, 1, false, provider)?;
    }

    let where_clause = if sql_filter.is_open() {
        None
    } else {
        let mut where_clause = SqlStatement::new();
        render_filter(&sql_filter, &mut graph, provider, Context::Top, &mut where_clause)?;
        Some(where_clause)
    };

    let columns: Vec<String> = entity
        .properties
        .iter()
        .map(|p| graph.qualify(graph.root(), p.column_name()))
        .collect();
    let mut select = SqlStatement::new();
    select.literal("SELECT ");
    select.literal(&columns.join(", "));
    select.literal(" FROM ");
    select.literal(&graph.render_from(false));
    if let Some(where_clause) = &where_clause {
        select.literal(" WHERE ");
        select.append(where_clause);
    }
    if !sql_ordering.is_empty() {
        let mut terms = Vec::with_capacity(sql_ordering.len());
        for term in sql_ordering.iter() {
            let (column, _) = graph.column(&term.property)?;
            terms.push(match term.direction {
                Direction::Descending => format!("{column} DESC"),
                _ => column,
            });
        }
        select.literal(" ORDER BY ");
        select.literal(&terms.join(", "));
    }

    let mut hasher = Xxh64::new(0);
    hasher.write(select.shape().as_bytes());
    if let Some(remainder) = &remainder_filter {
        hasher.write(remainder.to_string().as_bytes());
    }
    hasher.write(remainder_ordering.to_string().as_bytes());
    hasher.write_u64(param_count as u64);
    let plan_hash = hasher.finish();

    let compiled = CompiledQuery {
        filter_from: graph.render_from(true),
        aliased: graph.aliased(),
        root_alias: graph.root().alias().to_owned(),
        entity,
        select,
        where_clause,
        sql_ordering,
        remainder_filter,
        remainder_ordering,
        param_count,
        plan_hash,
        closed: false,
    };
    debug!(
        entity = compiled.entity.name(),
        sql = %compiled.select.shape(),
        remainder = compiled.has_remainder(),
        plan_hash = compiled.plan_hash,
        "compiled query"
    );
    Ok(compiled)
}

fn reject_remainder_exists(filter: &Filter) -> FetchResult<()> {
    match filter {
        Filter::Exists { property, .. } => Err(FetchError::invalid(format!(
            "exists over '{property}' references a derived property"
        ))),
        Filter::And(l, r) | Filter::Or(l, r) => {
            reject_remainder_exists(l)?;
            reject_remainder_exists(r)
        }
        _ => Ok(()),
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Context {
    Top,
    And,
    Or,
}

fn render_filter(
    filter: &Filter,
    graph: &mut JoinGraph,
    provider: &dyn MetadataProvider,
    context: Context,
    out: &mut SqlStatement,
) -> FetchResult<()> {
    match filter {
        Filter::Open => out.literal("1 = 1"),
        Filter::Closed => out.literal("1 = 0"),
        Filter::Property(leaf) => {
            let (column, property) = graph.column(&leaf.property)?;
            render_leaf(leaf, column, property, out);
        }
        Filter::And(l, r) => {
            render_filter(l, graph, provider, Context::And, out)?;
            out.literal(" AND ");
            render_filter(r, graph, provider, Context::And, out)?;
        }
        Filter::Or(l, r) => {
            let wrap = context == Context::And;
            if wrap {
                out.literal("(");
            }
            render_filter(l, graph, provider, Context::Or, out)?;
            out.literal(" OR ");
            render_filter(r, graph, provider, Context::Or, out)?;
            if wrap {
                out.literal(")");
            }
        }
        Filter::Exists {
            property,
            filter: sub_filter,
            negated,
        } => {
            let parent = graph.locate(property, property.len().saturating_sub(1))?;
            let parent_entity = Arc::clone(parent.entity());
            let parent_alias = parent.alias().to_owned();
            let join = parent_entity
                .def
                .find(property.last())
                .and_then(|p| p.join.clone())
                .ok_or_else(|| {
                    FetchError::invalid(format!("exists needs a join property, found '{property}'"))
                })?;
            let target = provider.resolve(&(join.target)())?;

            let mut sub_graph = JoinGraph::new(Arc::clone(&target), graph.next_alias());
            sub_graph.force_alias();
            sub_graph.add_filter(sub_filter, provider)?;
            let mut sub_where = SqlStatement::new();
            if !sub_filter.is_open() {
                render_filter(sub_filter, &mut sub_graph, provider, Context::And, &mut sub_where)?;
            }
            graph.set_next_alias(sub_graph.next_alias());

            let mut correlation = Vec::with_capacity(join.internal.len());
            for (internal, external) in join.internal.iter().zip(&join.external) {
                let parent_column = parent_entity.property(internal).ok_or_else(|| {
                    FetchError::invalid(format!("join '{property}' uses unknown property '{internal}'"))
                })?;
                let child_column = target.property(external).ok_or_else(|| {
                    FetchError::invalid(format!("join '{property}' targets unknown property '{external}'"))
                })?;
                correlation.push(format!(
                    "{}.{} = {}.{}",
                    sub_graph.root().alias(),
                    child_column.column_name(),
                    parent_alias,
                    parent_column.column_name()
                ));
            }

            out.literal(if *negated {
                "NOT EXISTS (SELECT 1 FROM "
            } else {
                "EXISTS (SELECT 1 FROM "
            });
            out.literal(&sub_graph.render_from(false));
            out.literal(" WHERE ");
            out.literal(&correlation.join(" AND "));
            if !sub_where.is_empty() {
                out.literal(" AND ");
                out.append(&sub_where);
            }
            out.literal(")");
        }
    }
    Ok(())
}

fn render_leaf(
    leaf: &PropertyFilter,
    column: String,
    property: &ResolvedProperty,
    out: &mut SqlStatement,
) {
    let marker = |source: ParamSource| ParamMarker {
        property: leaf.property.to_string(),
        source,
        adapter: property.adapter(),
    };
    match &leaf.operand {
        Operand::Constant(Value::Null) if matches!(leaf.op, RelOp::Eq | RelOp::Ne) => {
            out.literal(&column);
            out.literal(if leaf.op == RelOp::Eq {
                " IS NULL"
            } else {
                " IS NOT NULL"
            });
        }
        Operand::Constant(value) => match inline_literal(property, value) {
            Some(text) => {
                out.literal(&column);
                out.literal(leaf.op.sql());
                out.literal(&text);
            }
            None => {
                out.literal(&column);
                out.literal(leaf.op.sql());
                out.param(marker(ParamSource::Constant(value.clone())));
            }
        },
        Operand::Param(index) => {
            if property.nullable && matches!(leaf.op, RelOp::Eq | RelOp::Ne) {
                out.nullable_compare(column, leaf.op, marker(ParamSource::Value(*index)));
            } else {
                out.literal(&column);
                out.literal(leaf.op.sql());
                out.param(marker(ParamSource::Value(*index)));
            }
        }
    }
}

/// SQL literal for a constant, when inlining it cannot change its meaning.
fn inline_literal(property: &ResolvedProperty, value: &Value) -> Option<String> {
    if property.adapter().is_some() {
        return None;
    }
    match value {
        Value::Int(i) if property.ty.is_integer() || property.ty.is_float() => Some(i.to_string()),
        Value::Float(f) if property.ty.is_float() && f.is_finite() => Some(format!("{f:?}")),
        Value::Text(s) if property.ty.is_text() => Some(format!("'{}'", s.replace('\'', "''"))),
        _ => None,
    }
}
