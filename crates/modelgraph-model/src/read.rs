// ABOUTME: Read query assembler: a breadth-first plan over the model registry and one
// ABOUTME: bounded-depth traversal statement collecting nodes and relationships per level

use futures::future::try_join_all;
use modelgraph_core::{node_id, ModelGraphError, NodeId, Object, Result, Statement};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

use crate::coalesce::{compute_tree, Coalescer};
use crate::composition::{Composition, Direction, OrderBy};
use crate::cypher::{edge_pattern, node_projection, quote, rel_projection, rel_types};
use crate::predicate::Predicate;
use crate::schema::{ModelId, ModelRef, Schema};

/// A related node looked up alongside the root without being owned by it.
#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    /// Key the matches are stored under on the root.
    pub name: String,
    pub model: ModelId,
    pub rel: String,
    pub direction: Direction,
    pub many: bool,
}

impl Include {
    pub fn new(name: impl Into<String>, model: ModelId, rel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model,
            rel: rel.into(),
            direction: Direction::Out,
            many: false,
        }
    }

    pub fn incoming(mut self) -> Self {
        self.direction = Direction::In;
        self
    }

    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }
}

/// Per-call read options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    /// Composition levels to expand; defaults to the configured read depth.
    pub depth: Option<usize>,
    /// Expand only this composition of the root.
    pub restrict_to: Option<String>,
    pub include: Vec<Include>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    /// Root ordering for multi-root reads.
    pub order_by: Option<OrderBy>,
    /// Extra Cypher conditions on `root`, joined with `AND`.
    pub filters: Vec<String>,
    /// Deepest level whose `compute` hooks still run; the root is level 0.
    pub compute_depth: Option<usize>,
}

impl ReadOptions {
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn restricted(mut self, name: &str) -> Self {
        self.restrict_to = Some(name.to_string());
        self
    }

    pub fn including(mut self, include: Include) -> Self {
        self.include.push(include);
        self
    }

    pub fn paged(mut self, skip: usize, limit: usize) -> Self {
        self.skip = Some(skip);
        self.limit = Some(limit);
        self
    }

    pub fn ordered(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn filter(mut self, condition: impl Into<String>) -> Self {
        self.filters.push(condition.into());
        self
    }

    pub fn compute_until(mut self, depth: usize) -> Self {
        self.compute_depth = Some(depth);
        self
    }
}

/// A composition expected at one level of a read, together with the model that owns it.
#[derive(Debug, Clone, Copy)]
pub struct PlanEntry<'a> {
    pub owner: ModelId,
    pub composition: &'a Composition,
}

/// Breadth-first expansion of compositions over models (not instances).
/// Level `k` holds every composition reachable from level `k - 1`'s models.
#[derive(Debug, Clone, Default)]
pub struct ReadPlan<'a> {
    levels: Vec<Vec<PlanEntry<'a>>>,
}

impl<'a> ReadPlan<'a> {
    pub fn build(schema: &'a Schema, root: ModelId, depth: usize, restrict_to: Option<&str>) -> Self {
        let mut levels = Vec::new();
        let mut frontier = BTreeSet::from([root]);

        for level in 0..depth {
            let mut entries = Vec::new();
            for owner in &frontier {
                for comp in schema.get(*owner).compositions() {
                    if level == 0 && restrict_to.is_some_and(|name| name != comp.name) {
                        continue;
                    }
                    entries.push(PlanEntry {
                        owner: *owner,
                        composition: comp,
                    });
                }
            }
            if entries.is_empty() {
                break;
            }
            frontier = entries.iter().map(|e| e.composition.target).collect();
            levels.push(entries);
        }

        Self { levels }
    }

    /// Number of levels that will actually be matched.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> &[PlanEntry<'a>] {
        &self.levels[index]
    }

    /// The composition `owner` reaches through `rel` in `direction` at `level`.
    pub fn lookup(
        &self,
        level: usize,
        owner: ModelId,
        rel: &str,
        direction: Direction,
    ) -> Option<&PlanEntry<'a>> {
        self.levels.get(level)?.iter().find(|e| {
            e.owner == owner && e.composition.rel == rel && e.composition.direction == direction
        })
    }

    fn rel_types(&self, level: usize, direction: Direction) -> Option<String> {
        let types: BTreeSet<&str> = self.levels[level]
            .iter()
            .filter(|e| e.composition.direction == direction)
            .map(|e| e.composition.rel.as_str())
            .collect();
        (!types.is_empty()).then(|| rel_types(types))
    }
}

/// Renders the single traversal statement for a read.
pub struct ReadQuery<'a> {
    schema: &'a Schema,
    root_model: ModelId,
    plan: &'a ReadPlan<'a>,
    options: &'a ReadOptions,
}

impl<'a> ReadQuery<'a> {
    pub fn new(
        schema: &'a Schema,
        root_model: ModelId,
        plan: &'a ReadPlan<'a>,
        options: &'a ReadOptions,
    ) -> Self {
        Self {
            schema,
            root_model,
            plan,
            options,
        }
    }

    pub fn render(&self, root_id: Option<NodeId>, predicate: Option<&Predicate>) -> Statement {
        let mut params = Object::new();
        let mut clauses = Vec::new();
        let label = quote(self.schema.get(self.root_model).label());

        let mut conditions = Vec::new();
        if let Some(id) = root_id {
            params.insert("root_id".to_string(), Value::from(id));
            conditions.push("id(root) = $root_id".to_string());
        }
        if let Some(condition) = predicate.and_then(|p| p.render("root", &mut params)) {
            conditions.push(condition);
        }
        conditions.extend(self.options.filters.iter().cloned());
        if conditions.is_empty() {
            clauses.push(format!("MATCH (root:{})", label));
        } else {
            clauses.push(format!("MATCH (root:{}) WHERE {}", label, conditions.join(" AND ")));
        }

        let order = self.options.order_by.as_ref().map(|o| {
            format!(
                "ORDER BY root.{}{}",
                quote(&o.property),
                if o.descending { " DESC" } else { "" }
            )
        });
        let mut paging = vec!["WITH root".to_string()];
        paging.extend(order.clone());
        if let Some(skip) = self.options.skip {
            params.insert("skip".to_string(), Value::from(skip));
            paging.push("SKIP $skip".to_string());
        }
        if let Some(limit) = self.options.limit {
            params.insert("limit".to_string(), Value::from(limit));
            paging.push("LIMIT $limit".to_string());
        }
        if paging.len() > 1 {
            clauses.push(paging.join(" "));
        }

        let mut carried = vec!["root".to_string()];
        if self.plan.depth() > 0 {
            clauses.push("WITH root, [root] AS nodes0".to_string());
            carried.push("nodes0".to_string());
        }
        for k in 1..=self.plan.depth() {
            clauses.extend(self.level_clauses(k, &mut carried));
        }
        for (i, include) in self.options.include.iter().enumerate() {
            let var = format!("inc{}", i);
            let target = format!("{}:{}", var, quote(self.schema.get(include.model).label()));
            clauses.push(format!(
                "OPTIONAL MATCH {}",
                edge_pattern("root", None, &quote(&include.rel), include.direction, &target)
            ));
            clauses.push(format!(
                "WITH {}, collect(DISTINCT {var}) AS {var}",
                carried.join(", ")
            ));
            carried.push(var);
        }

        clauses.push(self.return_clause(order));
        Statement {
            text: clauses.join("\n"),
            params,
        }
    }

    fn level_clauses(&self, k: usize, carried: &mut Vec<String>) -> Vec<String> {
        let parent = format!("p{}", k);
        let mut clauses = vec![format!(
            "UNWIND CASE WHEN size(nodes{prev}) = 0 THEN [null] ELSE nodes{prev} END AS {parent}",
            prev = k - 1
        )];

        let mut nodes = Vec::new();
        let mut rels = Vec::new();
        for (direction, tag) in [(Direction::Out, "o"), (Direction::In, "i")] {
            let Some(types) = self.plan.rel_types(k - 1, direction) else {
                continue;
            };
            let rel_var = format!("r{}{}", tag, k);
            let node_var = format!("n{}{}", tag, k);
            clauses.push(format!(
                "OPTIONAL MATCH {}",
                edge_pattern(&parent, Some(&rel_var), &types, direction, &node_var)
            ));
            nodes.push(format!("collect(DISTINCT {})", node_var));
            rels.push(format!("collect(DISTINCT {})", rel_var));
        }

        clauses.push(format!(
            "WITH {}, {} AS nodes{k}, {} AS rels{k}",
            carried.join(", "),
            nodes.join(" + "),
            rels.join(" + ")
        ));
        carried.push(format!("nodes{}", k));
        carried.push(format!("rels{}", k));
        clauses
    }

    fn return_clause(&self, order: Option<String>) -> String {
        let id_field = self.schema.id_field();
        let mut columns = vec![format!("{} AS root", node_projection("root", id_field))];
        for k in 1..=self.plan.depth() {
            columns.push(format!(
                "[n IN nodes{k} | {}] AS nodes{k}",
                node_projection("n", id_field)
            ));
            columns.push(format!("[r IN rels{k} | {}] AS rels{k}", rel_projection("r")));
        }
        for i in 0..self.options.include.len() {
            columns.push(format!(
                "[n IN inc{i} | {}] AS inc{i}",
                node_projection("n", id_field)
            ));
        }

        let mut clause = format!("RETURN {}", columns.join(", "));
        if let Some(order) = order {
            clause.push(' ');
            clause.push_str(&order);
        }
        clause
    }
}

impl<'a> ModelRef<'a> {
    /// Reads one root with its compositions, or `None` when no such node exists.
    pub async fn read(&self, id: &Value) -> Result<Option<Object>> {
        self.read_with(id, ReadOptions::default()).await
    }

    pub async fn read_with(&self, id: &Value, options: ReadOptions) -> Result<Option<Object>> {
        let id = self.require_id(id)?;
        let found = self.run_read(Some(id), None, &options).await?;
        Ok(found.into_iter().next())
    }

    /// Every node of this model, honouring paging, ordering and filters.
    pub async fn find_all(&self, options: ReadOptions) -> Result<Vec<Object>> {
        self.run_read(None, None, &options).await
    }

    pub async fn where_matching(
        &self,
        predicate: &Predicate,
        options: ReadOptions,
    ) -> Result<Vec<Object>> {
        self.run_read(None, Some(predicate), &options).await
    }

    /// Whether a node of this model has the given identifier. Values that carry
    /// no identifier simply do not exist.
    pub async fn exists(&self, id: &Value) -> Result<bool> {
        let Some(id) = node_id(id, self.schema.id_field()) else {
            return Ok(false);
        };
        let statement = Statement::new(format!(
            "MATCH (root:{}) WHERE id(root) = $root_id RETURN count(root) AS count",
            quote(self.label())
        ))
        .bind("root_id", id);

        let result = self.schema.db().execute(statement).await?;
        let count = result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(count > 0)
    }

    /// Reads the value of one composition of a stored root.
    ///
    /// `None` when the root does not exist or a single-valued composition is empty;
    /// a `many` composition of an existing root is always a list.
    pub async fn read_composition(&self, id: &Value, name: &str) -> Result<Option<Value>> {
        let comp = self.model.composition(name).ok_or_else(|| {
            ModelGraphError::InvalidComposition(format!(
                "{} has no composition '{}'",
                self.label(),
                name
            ))
        })?;
        let options = ReadOptions::default().restricted(name);
        let Some(mut root) = self.read_with(id, options).await? else {
            return Ok(None);
        };
        Ok(match root.remove(name) {
            Some(value) => Some(value),
            None if comp.is_many() => Some(Value::Array(Vec::new())),
            None => None,
        })
    }

    /// Runs the `compute` hooks over a nested object, children first.
    pub async fn compute(&self, object: Object) -> Result<Object> {
        compute_tree(self.schema, self.model, object, 0, None).await
    }

    fn require_id(&self, id: &Value) -> Result<NodeId> {
        node_id(id, self.schema.id_field()).ok_or_else(|| {
            ModelGraphError::validation(format!("{} is not a {} identifier", id, self.label()))
        })
    }

    async fn run_read(
        &self,
        root_id: Option<NodeId>,
        predicate: Option<&Predicate>,
        options: &ReadOptions,
    ) -> Result<Vec<Object>> {
        let schema = self.schema;
        if let Some(name) = &options.restrict_to {
            if self.model.composition(name).is_none() {
                return Err(ModelGraphError::InvalidComposition(format!(
                    "{} has no composition '{}'",
                    self.label(),
                    name
                )));
            }
        }

        let depth = options.depth.unwrap_or(schema.config().default_read_depth);
        let plan = ReadPlan::build(schema, self.model.id(), depth, options.restrict_to.as_deref());
        let statement = ReadQuery::new(schema, self.model.id(), &plan, options).render(root_id, predicate);
        debug!("Read statement for {}:\n{}", self.label(), statement.text);

        let result = schema.db().execute(statement).await.map_err(|e| {
            error!("Read of {} failed: {}", self.label(), e);
            e
        })?;

        let coalescer = Coalescer::new(schema, self.model.id(), &plan, options);
        let roots = result
            .into_records()
            .iter()
            .map(|record| coalescer.coalesce(record))
            .collect::<Result<Vec<_>>>()?;
        let roots = try_join_all(
            roots
                .into_iter()
                .map(|root| compute_tree(schema, self.model, root, 0, options.compute_depth)),
        )
        .await?;

        info!(
            "Read {} roots of {} ({} levels)",
            roots.len(),
            self.label(),
            plan.depth()
        );
        Ok(roots)
    }
}
