//! Join graph built from the property chains a query touches.
//!
//! Every distinct `(join property, outer)` step from a node becomes one child,
//! so chains sharing a prefix share joins. Aliases `T0`, `T1`, ... are handed
//! out in the order nodes are created, which keeps the SQL deterministic.

use std::sync::Arc;

use crate::query::filter::{ChainedProperty, Filter};
use crate::schema::{MetadataProvider, ResolvedEntity, ResolvedProperty};
use crate::types::{FetchError, FetchResult};

#[derive(Debug)]
pub struct JoinNode {
    entity: Arc<ResolvedEntity>,
    alias: String,
    edges: Vec<JoinEdge>,
}

#[derive(Debug)]
struct JoinEdge {
    property: String,
    outer: bool,
    /// `(parent column, child column)` pairs.
    on: Vec<(String, String)>,
    /// Reached by a filter chain, not only by the ordering.
    for_filter: bool,
    node: JoinNode,
}

impl JoinNode {
    fn new(entity: Arc<ResolvedEntity>, alias: String) -> Self {
        Self {
            entity,
            alias,
            edges: Vec::new(),
        }
    }

    pub fn entity(&self) -> &Arc<ResolvedEntity> {
        &self.entity
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

#[derive(Debug)]
pub struct JoinGraph {
    root: JoinNode,
    next_alias: usize,
    alias_forced: bool,
}

impl JoinGraph {
    /// Graph rooted at `entity`, numbering aliases from `first_alias`.
    pub fn new(entity: Arc<ResolvedEntity>, first_alias: usize) -> Self {
        Self {
            root: JoinNode::new(entity, format!("T{first_alias}")),
            next_alias: first_alias + 1,
            alias_forced: false,
        }
    }

    pub fn root(&self) -> &JoinNode {
        &self.root
    }

    pub fn next_alias(&self) -> usize {
        self.next_alias
    }

    pub(crate) fn set_next_alias(&mut self, next: usize) {
        self.next_alias = self.next_alias.max(next);
    }

    /// Always qualify columns, even without joins.
    pub fn force_alias(&mut self) {
        self.alias_forced = true;
    }

    pub fn aliased(&self) -> bool {
        self.alias_forced || !self.root.edges.is_empty()
    }

    /// Adds the joins every leaf of `filter` needs. `exists` sub-filters are
    /// not walked; they compile against their own graph.
    pub fn add_filter(&mut self, filter: &Filter, provider: &dyn MetadataProvider) -> FetchResult<()> {
        match filter {
            Filter::Open | Filter::Closed => Ok(()),
            Filter::Property(p) => self.add_chain(&p.property, 1, true, provider),
            Filter::And(l, r) | Filter::Or(l, r) => {
                self.add_filter(l, provider)?;
                self.add_filter(r, provider)
            }
            Filter::Exists { property, .. } => {
                self.force_alias();
                self.add_chain(property, 1, true, provider)
            }
        }
    }

    /// Adds joins for every segment of `chain` except the last `keep` ones.
    pub fn add_chain(
        &mut self,
        chain: &ChainedProperty,
        keep: usize,
        for_filter: bool,
        provider: &dyn MetadataProvider,
    ) -> FetchResult<()> {
        let hops = chain.len().saturating_sub(keep);
        let mut next_alias = self.next_alias;
        let mut node = &mut self.root;
        for (i, segment) in chain.segments()[..hops].iter().enumerate() {
            let outer = chain.is_outer(i);
            let position = node
                .edges
                .iter()
                .position(|e| e.property == *segment && e.outer == outer);
            let position = match position {
                Some(position) => position,
                None => {
                    let edge = new_edge(&node.entity, segment, outer, next_alias, provider)?;
                    next_alias += 1;
                    node.edges.push(edge);
                    node.edges.len() - 1
                }
            };
            let edge = &mut node.edges[position];
            edge.for_filter |= for_filter;
            node = &mut edge.node;
        }
        self.next_alias = next_alias;
        Ok(())
    }

    /// Node reached by following the first `hops` segments of `chain`.
    pub fn locate(&self, chain: &ChainedProperty, hops: usize) -> FetchResult<&JoinNode> {
        let mut node = &self.root;
        for (i, segment) in chain.segments()[..hops.min(chain.len())].iter().enumerate() {
            let outer = chain.is_outer(i);
            node = node
                .edges
                .iter()
                .find(|e| e.property == *segment && e.outer == outer)
                .map(|e| &e.node)
                .ok_or_else(|| FetchError::invalid(format!("no join for '{chain}'")))?;
        }
        Ok(node)
    }

    /// Column reference for the last segment of `chain`.
    pub fn column(&self, chain: &ChainedProperty) -> FetchResult<(String, &ResolvedProperty)> {
        let node = self.locate(chain, chain.len().saturating_sub(1))?;
        let name = chain.last();
        let property = node.entity.property(name).ok_or_else(|| {
            match node.entity.def.find(name) {
                Some(def) if def.derived => FetchError::invalid(format!(
                    "derived property '{chain}' cannot be used in SQL"
                )),
                Some(_) => FetchError::invalid(format!(
                    "join property '{chain}' cannot be compared directly"
                )),
                None => FetchError::invalid(format!(
                    "'{}' has no property '{name}'",
                    node.entity.name()
                )),
            }
        })?;
        Ok((self.qualify(node, property.column_name()), property))
    }

    pub fn qualify(&self, node: &JoinNode, column: &str) -> String {
        if self.aliased() {
            format!("{}.{}", node.alias, column)
        } else {
            column.to_owned()
        }
    }

    /// Renders the FROM list, without the `FROM` keyword.
    ///
    /// Joins reached only by the ordering are rendered as outer joins so they
    /// never drop rows. With `filter_only` they are left out entirely.
    pub fn render_from(&self, filter_only: bool) -> String {
        let mut out = self.root.entity.table_name();
        if self.aliased() {
            out.push(' ');
            out.push_str(&self.root.alias);
        }
        render_joins(&self.root, filter_only, &mut out);
        out
    }
}

fn new_edge(
    parent: &ResolvedEntity,
    segment: &str,
    outer: bool,
    alias: usize,
    provider: &dyn MetadataProvider,
) -> FetchResult<JoinEdge> {
    let property = parent.def.find(segment).ok_or_else(|| {
        FetchError::invalid(format!("'{}' has no property '{segment}'", parent.name()))
    })?;
    let join = property.join.as_ref().ok_or_else(|| {
        FetchError::invalid(format!(
            "'{}.{segment}' is not a join property",
            parent.name()
        ))
    })?;
    if join.to_many {
        return Err(FetchError::invalid(format!(
            "to-many join '{}.{segment}' can only be filtered with exists",
            parent.name()
        )));
    }
    let child = provider.resolve(&(join.target)())?;
    let mut on = Vec::with_capacity(join.internal.len());
    for (internal, external) in join.internal.iter().zip(&join.external) {
        let parent_column = parent.property(internal).ok_or_else(|| {
            FetchError::invalid(format!("join '{segment}' uses unknown property '{internal}'"))
        })?;
        let child_column = child.property(external).ok_or_else(|| {
            FetchError::invalid(format!(
                "join '{segment}' targets unknown property '{}.{external}'",
                child.name()
            ))
        })?;
        on.push((
            parent_column.column_name().to_owned(),
            child_column.column_name().to_owned(),
        ));
    }
    Ok(JoinEdge {
        property: segment.to_owned(),
        outer,
        on,
        for_filter: false,
        node: JoinNode::new(child, format!("T{alias}")),
    })
}

fn render_joins(node: &JoinNode, filter_only: bool, out: &mut String) {
    for edge in &node.edges {
        if filter_only && !edge.for_filter {
            continue;
        }
        out.push_str(if edge.outer || !edge.for_filter {
            " LEFT OUTER JOIN "
        } else {
            " INNER JOIN "
        });
        out.push_str(&edge.node.entity.table_name());
        out.push(' ');
        out.push_str(&edge.node.alias);
        out.push_str(" ON ");
        for (i, (parent, child)) in edge.on.iter().enumerate() {
            if i > 0 {
                out.push_str(" AND ");
            }
            out.push_str(&format!("{}.{} = {}.{}", node.alias, parent, edge.node.alias, child));
        }
        render_joins(&edge.node, filter_only, out);
    }
}
