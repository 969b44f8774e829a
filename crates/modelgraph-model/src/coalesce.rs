// ABOUTME: Coalescer: folds per-level node and relationship collections back into nested objects
// ABOUTME: Also hosts the recursive compute pass shared by saves and reads

use futures::future::{try_join_all, BoxFuture, FutureExt};
use modelgraph_core::{object_id, ModelGraphError, NodeId, Object, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::composition::{Composition, Direction};
use crate::model::Model;
use crate::read::{ReadOptions, ReadPlan};
use crate::schema::{ModelId, Schema};
use crate::sort::sort_compositions;

#[derive(Debug, Clone, Deserialize)]
struct RelRecord {
    start: NodeId,
    end: NodeId,
    #[serde(rename = "type")]
    rel_type: String,
}

struct Link<'a> {
    parent: NodeId,
    child: NodeId,
    composition: &'a Composition,
}

type Level = HashMap<NodeId, (ModelId, Object)>;

pub struct Coalescer<'a> {
    schema: &'a Schema,
    root_model: ModelId,
    plan: &'a ReadPlan<'a>,
    options: &'a ReadOptions,
}

impl<'a> Coalescer<'a> {
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

    /// Rebuilds one root from a single result row.
    pub fn coalesce(&self, record: &Object) -> Result<Object> {
        let id_field = self.schema.id_field();
        let root = match record.get("root") {
            Some(Value::Object(root)) => root.clone(),
            _ => return Err(ModelGraphError::statement("read result has no root column")),
        };
        let root_id = object_id(&root, id_field)
            .ok_or_else(|| ModelGraphError::statement("read result root carries no identifier"))?;

        let mut levels: Vec<Level> = vec![HashMap::from([(root_id, (self.root_model, root))])];
        let mut links: Vec<Vec<Link<'a>>> = vec![Vec::new()];

        // Top-down: decide which model every node plays at every level.
        for k in 1..=self.plan.depth() {
            let collected = nodes_by_id(record.get(&format!("nodes{}", k)), id_field);
            let rels: Vec<RelRecord> = match record.get(&format!("rels{}", k)) {
                Some(value) if !value.is_null() => serde_json::from_value(value.clone())?,
                _ => Vec::new(),
            };

            let previous = &levels[k - 1];
            let mut level = Level::new();
            let mut level_links = Vec::new();
            for rel in rels {
                let Some((parent, child, composition)) = self.resolve(k - 1, previous, &rel) else {
                    continue;
                };
                let Some(node) = collected.get(&child) else {
                    continue;
                };
                level
                    .entry(child)
                    .or_insert_with(|| (composition.target, node.clone()));
                level_links.push(Link {
                    parent,
                    child,
                    composition,
                });
            }
            levels.push(level);
            links.push(level_links);
        }

        // Bottom-up: attach every level's children under their parents.
        for k in (1..levels.len()).rev() {
            let mut grouped: HashMap<NodeId, Vec<(&Composition, Value)>> = HashMap::new();
            for link in &links[k] {
                if let Some((_, child)) = levels[k].get(&link.child) {
                    grouped
                        .entry(link.parent)
                        .or_default()
                        .push((link.composition, Value::Object(child.clone())));
                }
            }

            let parents = &mut levels[k - 1];
            for (parent_id, children) in grouped {
                let Some((model_id, parent)) = parents.get_mut(&parent_id) else {
                    continue;
                };
                attach(parent, children);
                sort_compositions(self.schema.get(*model_id), parent);
            }
        }

        let (_, mut root) = levels
            .swap_remove(0)
            .remove(&root_id)
            .ok_or_else(|| ModelGraphError::statement("read result lost its root"))?;
        self.merge_includes(&mut root, record);
        Ok(root)
    }

    /// Finds the parent, the child and the composition a relationship stands for.
    fn resolve(
        &self,
        level: usize,
        previous: &Level,
        rel: &RelRecord,
    ) -> Option<(NodeId, NodeId, &'a Composition)> {
        if let Some((owner, _)) = previous.get(&rel.start) {
            if let Some(entry) = self.plan.lookup(level, *owner, &rel.rel_type, Direction::Out) {
                return Some((rel.start, rel.end, entry.composition));
            }
        }
        if let Some((owner, _)) = previous.get(&rel.end) {
            if let Some(entry) = self.plan.lookup(level, *owner, &rel.rel_type, Direction::In) {
                return Some((rel.end, rel.start, entry.composition));
            }
        }
        None
    }

    fn merge_includes(&self, root: &mut Object, record: &Object) {
        for (i, include) in self.options.include.iter().enumerate() {
            let Some(Value::Array(found)) = record.get(&format!("inc{}", i)) else {
                continue;
            };
            if found.is_empty() {
                continue;
            }
            let value = if !include.many && found.len() == 1 {
                found[0].clone()
            } else {
                Value::Array(found.clone())
            };
            root.insert(include.name.clone(), value);
        }
    }
}

fn nodes_by_id(value: Option<&Value>, id_field: &str) -> HashMap<NodeId, Object> {
    let Some(Value::Array(nodes)) = value else {
        return HashMap::new();
    };
    nodes
        .iter()
        .filter_map(|node| {
            let node = node.as_object()?;
            Some((object_id(node, id_field)?, node.clone()))
        })
        .collect()
}

fn attach(parent: &mut Object, children: Vec<(&Composition, Value)>) {
    let mut by_name: Vec<(&Composition, Vec<Value>)> = Vec::new();
    for (composition, child) in children {
        match by_name.iter_mut().find(|(c, _)| c.name == composition.name) {
            Some((_, list)) => list.push(child),
            None => by_name.push((composition, vec![child])),
        }
    }
    for (composition, list) in by_name {
        parent.insert(composition.name.clone(), composition.unwrap_children(list));
    }
}

/// Runs `compute` bottom-up below and on `object`. Nothing deeper than
/// `cutoff` (root = 0) is computed.
pub(crate) fn compute_tree<'s>(
    schema: &'s Schema,
    model: &'s Model,
    object: Object,
    depth: usize,
    cutoff: Option<usize>,
) -> BoxFuture<'s, Result<Object>> {
    async move {
        if cutoff.is_some_and(|max| depth > max) {
            return Ok(object);
        }
        let object = compute_children(schema, model, object, depth, cutoff).await?;
        model.compute.run(object).await
    }
    .boxed()
}

/// Computes every composed child of `object`, leaving `object` itself alone.
pub(crate) async fn compute_children(
    schema: &Schema,
    model: &Model,
    mut object: Object,
    depth: usize,
    cutoff: Option<usize>,
) -> Result<Object> {
    let mut pending = Vec::new();
    for comp in model.compositions() {
        let Some(value) = object.remove(&comp.name) else {
            continue;
        };
        let target = schema.get(comp.target);
        pending.push(async move {
            let value = match value {
                Value::Array(items) => Value::Array(
                    try_join_all(
                        items
                            .into_iter()
                            .map(|item| compute_value(schema, target, item, depth + 1, cutoff)),
                    )
                    .await?,
                ),
                other => compute_value(schema, target, other, depth + 1, cutoff).await?,
            };
            Ok::<_, ModelGraphError>((comp.name.clone(), value))
        });
    }
    for (name, value) in try_join_all(pending).await? {
        object.insert(name, value);
    }
    Ok(object)
}

async fn compute_value(
    schema: &Schema,
    model: &Model,
    value: Value,
    depth: usize,
    cutoff: Option<usize>,
) -> Result<Value> {
    match value {
        Value::Object(object) => Ok(Value::Object(
            compute_tree(schema, model, object, depth, cutoff).await?,
        )),
        other => Ok(other),
    }
}
