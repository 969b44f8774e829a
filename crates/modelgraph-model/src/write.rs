// ABOUTME: Commit executor: before-commit hook pipeline, one atomic write statement,
// ABOUTME: reassembly of the nested shape, indexing and after-commit hooks

use futures::future::{try_join_all, BoxFuture, FutureExt};
use modelgraph_core::{node_id, object_id, ModelGraphError, Object, Result};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::coalesce::{compute_children, compute_tree};
use crate::composition::{elements, Composition};
use crate::compose::{QueryComposer, SaveOptions};
use crate::graph::{CompositionGraph, CompositionScope, GraphBuilder, NodeIndex};
use crate::model::Model;
use crate::schema::{ModelRef, Schema};
use crate::sort::sort_compositions;

impl<'a> ModelRef<'a> {
    /// Saves `object` and every composed child in one statement.
    ///
    /// The returned object mirrors the input's nesting, with identifiers,
    /// timestamps and computed fields filled in.
    ///
    /// Indexing runs after the statement commits. An [`ModelGraphError::Index`]
    /// error therefore means the graph was written but the indexes may be stale.
    pub async fn save(&self, object: Object) -> Result<Object> {
        self.save_with(object, SaveOptions::default()).await
    }

    pub async fn save_with(&self, object: Object, options: SaveOptions) -> Result<Object> {
        let schema = self.schema;
        let model = self.model;
        if let Some(name) = &options.restrict_to {
            self.writable_composition(name)?;
            if object_id(&object, schema.id_field()).is_none() {
                return Err(ModelGraphError::UnsavedRoot(format!(
                    "{} must be saved before writing its '{}' composition",
                    model.label(),
                    name
                )));
            }
        }
        let restricted = options.restrict_to.is_some();

        let prepared = before_commit(schema, model, object, options.scope(), !restricted).await?;

        let graph = GraphBuilder::new(schema, options.scope())
            .root_as_reference(restricted)
            .build(model.id(), &prepared);
        let statement = QueryComposer::new(schema, &graph, &options).compose();
        debug!("Save statement for {}:\n{}", model.label(), statement.text);

        let result = schema.db().execute(statement).await.map_err(|e| {
            error!("Save of {} failed: {}", model.label(), e);
            match e.into_conflict() {
                ModelGraphError::Conflict(message) => {
                    ModelGraphError::Conflict(name_unique_indexes(schema, &graph, message))
                }
                other => other,
            }
        })?;
        let record = result.into_records().into_iter().next().ok_or_else(|| {
            ModelGraphError::statement(format!(
                "save of {} matched no rows; a bound identifier does not exist",
                model.label()
            ))
        })?;

        let saved = reassemble(schema, &graph, 0, &record, &prepared, options.scope())?;
        if let Err(e) = index_created(self, &graph, &record).await {
            error!("Indexing after committed save of {} failed: {}", model.label(), e);
            return Err(e);
        }

        let saved = after_commit(schema, model, saved, !restricted).await?;
        let saved = if restricted {
            compute_children(schema, model, saved, 0, None).await?
        } else {
            compute_tree(schema, model, saved, 0, None).await?
        };

        info!("Saved {} ({} nodes)", model.label(), graph.len());
        Ok(saved)
    }

    /// Relates additional children through composition `name`, keeping the ones already there.
    ///
    /// `root` is the saved root object or its bare identifier. Children may be
    /// new objects, saved objects or bare identifiers. The result has the shape
    /// of `value`: a list for a list, a single object otherwise.
    pub async fn push(&self, root: &Value, name: &str, value: Value) -> Result<Value> {
        self.save_restricted(root, name, value, true).await
    }

    /// Replaces the children of composition `name` with `value`, disconnecting the rest.
    pub async fn save_composition(&self, root: &Value, name: &str, value: Value) -> Result<Value> {
        self.save_restricted(root, name, value, false).await
    }

    async fn save_restricted(
        &self,
        root: &Value,
        name: &str,
        value: Value,
        keep_redundancy: bool,
    ) -> Result<Value> {
        self.writable_composition(name)?;
        let id_field = self.schema.id_field();
        let root_id = node_id(root, id_field).ok_or_else(|| {
            ModelGraphError::UnsavedRoot(format!(
                "{} has no '{}' to attach '{}' to",
                self.label(),
                id_field,
                name
            ))
        })?;

        let as_list = value.is_array();
        let mut shell = Object::new();
        shell.insert(id_field.to_string(), Value::from(root_id));
        shell.insert(name.to_string(), value);

        let options = SaveOptions {
            exclude_compositions: false,
            restrict_to: Some(name.to_string()),
            keep_redundancy,
        };
        let mut saved = self.save_with(shell, options).await?;
        let children = saved.remove(name).unwrap_or(Value::Null);

        Ok(match children {
            Value::Array(mut items) if !as_list && items.len() == 1 => items.remove(0),
            Value::Array(items) => Value::Array(items),
            Value::Null if as_list => Value::Array(Vec::new()),
            other if as_list => Value::Array(vec![other]),
            other => other,
        })
    }

    /// Runs the whitelist and the `prepare` chain of this model on `object` alone.
    pub async fn prepare(&self, object: Object) -> Result<Object> {
        self.model.run_prepare(object).await
    }

    /// Runs every `validate` hook of this model on `object` alone.
    pub async fn validate(&self, object: &Object) -> Result<()> {
        self.model.validate.run(object).await
    }

    /// Writes a saved object into every index whose condition holds.
    /// Without an indexer configured this is a no-op.
    pub async fn index(&self, object: &Object) -> Result<()> {
        let Some(indexer) = self.schema.indexer() else {
            return Ok(());
        };
        let id = object_id(object, self.schema.id_field()).ok_or_else(|| {
            ModelGraphError::Index(format!("cannot index an unsaved {}", self.label()))
        })?;

        for index in self.model.indexes() {
            if !index.applies_to(object).await? {
                continue;
            }
            let key = index.key_for(object).await?;
            let value = index.value_for(object).await?;
            indexer
                .index(&index.index_name, id, &key, &value)
                .await
                .map_err(|e| match e {
                    ModelGraphError::Index(_) => e,
                    other => ModelGraphError::Index(other.to_string()),
                })?;
        }
        Ok(())
    }

    pub async fn read_by_index(&self, index_name: &str, key: &str, value: &Value) -> Result<Vec<Object>> {
        match self.schema.indexer() {
            Some(indexer) => indexer.read_by_index(index_name, key, value).await,
            None => Err(ModelGraphError::Index(format!(
                "no indexer configured to read '{}'",
                index_name
            ))),
        }
    }

    pub(crate) fn writable_composition(&self, name: &str) -> Result<&'a Composition> {
        self.model
            .composition(name)
            .filter(|c| !c.transient)
            .ok_or_else(|| {
                ModelGraphError::InvalidComposition(format!(
                    "{} has no writable composition '{}'",
                    self.label(),
                    name
                ))
            })
    }
}

/// Depth-first prepare, validate and before-save over the source tree.
/// Siblings are processed concurrently; the first failure aborts the save.
fn before_commit<'s>(
    schema: &'s Schema,
    model: &'s Model,
    object: Object,
    scope: CompositionScope<'s>,
    run_hooks: bool,
) -> BoxFuture<'s, Result<Object>> {
    async move {
        let mut object = if run_hooks {
            let object = model.run_prepare(object).await?;
            model.validate.run(&object).await?;
            model.before_save.fire(&object);
            object
        } else {
            object
        };

        let mut pending = Vec::new();
        for comp in model.compositions() {
            if comp.transient || !scope.allows(&comp.name) {
                continue;
            }
            if let Some(value) = object.remove(&comp.name) {
                pending.push(prepare_composition(schema, comp, value));
            }
        }
        for (name, value) in try_join_all(pending).await? {
            object.insert(name, value);
        }
        Ok(object)
    }
    .boxed()
}

async fn prepare_composition(
    schema: &Schema,
    comp: &Composition,
    value: Value,
) -> Result<(String, Value)> {
    let target = schema.get(comp.target);
    let value = match value {
        Value::Array(items) => Value::Array(
            try_join_all(items.into_iter().map(|item| prepare_child(schema, target, item))).await?,
        ),
        other => prepare_child(schema, target, other).await?,
    };
    Ok((comp.name.clone(), value))
}

async fn prepare_child(schema: &Schema, model: &Model, value: Value) -> Result<Value> {
    match value {
        Value::Object(object) => Ok(Value::Object(
            before_commit(schema, model, object, CompositionScope::All, true).await?,
        )),
        other => Ok(other),
    }
}

/// Rebuilds the nested object for `index` from the statement's flat bindings.
fn reassemble(
    schema: &Schema,
    graph: &CompositionGraph,
    index: NodeIndex,
    record: &Object,
    source: &Object,
    scope: CompositionScope<'_>,
) -> Result<Object> {
    let node = graph.node(index);
    let mut object = match record.get(&node.var) {
        Some(Value::Object(saved)) => saved.clone(),
        _ => {
            return Err(ModelGraphError::statement(format!(
                "save result is missing column '{}'",
                node.var
            )))
        }
    };

    for comp in schema.get(node.model).compositions() {
        if comp.transient || !scope.allows(&comp.name) {
            continue;
        }
        let Some(given) = source.get(&comp.name) else {
            continue;
        };
        if given.is_null() {
            object.insert(comp.name.clone(), Value::Null);
            continue;
        }

        // Mirrors the builder: objects and bare identifiers became children, anything else was dropped.
        let id_field = schema.id_field();
        let sources = elements(given).into_iter().filter_map(|element| match element {
            Value::Object(child) => Some(Some(child)),
            other => node_id(other, id_field).map(|_| None),
        });
        let links = node.children.iter().filter(|l| l.composition == comp.name);

        let empty = Object::new();
        let mut children = Vec::new();
        for (link, child_source) in links.zip(sources) {
            // Reference nodes were never expanded, so their nested source is ignored.
            let child_source = match graph.node(link.node).properties {
                Some(_) => child_source.unwrap_or(&empty),
                None => &empty,
            };
            children.push(Value::Object(reassemble(
                schema,
                graph,
                link.node,
                record,
                child_source,
                CompositionScope::All,
            )?));
        }
        object.insert(comp.name.clone(), comp.unwrap_children(children));
    }

    for (name, value) in &node.passthrough {
        object.insert(name.clone(), value.clone());
    }
    Ok(object)
}

/// Appends the unique indexes that could have rejected nodes created by this save.
fn name_unique_indexes(schema: &Schema, graph: &CompositionGraph, message: String) -> String {
    let mut names: Vec<&str> = Vec::new();
    for node in graph.nodes().iter().filter(|n| n.unique.is_some()) {
        if let Some(unique) = schema.get(node.model).uniqueness() {
            if !names.contains(&unique.index_name.as_str()) {
                names.push(&unique.index_name);
            }
        }
    }
    if names.is_empty() {
        message
    } else {
        format!("{} (unique index {})", message, names.join(", "))
    }
}

async fn index_created(model: &ModelRef<'_>, graph: &CompositionGraph, record: &Object) -> Result<()> {
    if model.schema.indexer().is_none() {
        return Ok(());
    }
    for node in graph.nodes().iter().filter(|n| n.is_created()) {
        if let Some(Value::Object(saved)) = record.get(&node.var) {
            model.schema.model(node.model).index(saved).await?;
        }
    }
    Ok(())
}

/// Orders compositions and fires after-save listeners at every level.
fn after_commit<'s>(
    schema: &'s Schema,
    model: &'s Model,
    mut object: Object,
    run_hooks: bool,
) -> BoxFuture<'s, Result<Object>> {
    async move {
        sort_compositions(model, &mut object);
        if run_hooks {
            model.after_save.fire(&object);
        }

        let mut pending = Vec::new();
        for comp in model.compositions() {
            if comp.transient {
                continue;
            }
            if let Some(value) = object.remove(&comp.name) {
                let target = schema.get(comp.target);
                pending.push(async move {
                    let value = match value {
                        Value::Array(items) => Value::Array(
                            try_join_all(items.into_iter().map(|item| after_child(schema, target, item)))
                                .await?,
                        ),
                        other => after_child(schema, target, other).await?,
                    };
                    Ok::<_, ModelGraphError>((comp.name.clone(), value))
                });
            }
        }
        for (name, value) in try_join_all(pending).await? {
            object.insert(name, value);
        }
        Ok(object)
    }
    .boxed()
}

async fn after_child(schema: &Schema, model: &Model, value: Value) -> Result<Value> {
    match value {
        Value::Object(object) => Ok(Value::Object(after_commit(schema, model, object, true).await?)),
        other => Ok(other),
    }
}
