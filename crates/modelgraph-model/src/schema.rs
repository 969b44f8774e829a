use modelgraph_core::{GraphDatabase, Indexer, ModelGraphConfig};
use std::sync::Arc;

use crate::model::Model;

/// Handle to a model inside a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(usize);

impl ModelId {
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

/// Process-lifetime registry of every model plus the collaborators they share.
///
/// Models live in an arena and point at each other through [`ModelId`], so
/// self-composition and cyclic composition graphs need no shared ownership.
/// Configure it during startup, then wrap it in an `Arc`.
pub struct Schema {
    models: Vec<Model>,
    db: Arc<dyn GraphDatabase>,
    indexer: Option<Arc<dyn Indexer>>,
    config: ModelGraphConfig,
}

impl Schema {
    pub fn new(db: Arc<dyn GraphDatabase>, config: ModelGraphConfig) -> Self {
        Self {
            models: Vec::new(),
            db,
            indexer: None,
            config,
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Registers a new model under `label`.
    pub fn define(&mut self, label: &str) -> ModelId {
        let id = ModelId(self.models.len());
        self.models.push(Model::new(id, label, &self.config.id_field));
        id
    }

    pub fn model_mut(&mut self, id: ModelId) -> &mut Model {
        &mut self.models[id.0]
    }

    pub fn get(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    pub fn find(&self, label: &str) -> Option<ModelId> {
        self.models.iter().find(|m| m.label() == label).map(Model::id)
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    /// Operation handle for one model.
    pub fn model(&self, id: ModelId) -> ModelRef<'_> {
        ModelRef {
            schema: self,
            model: self.get(id),
        }
    }

    pub fn db(&self) -> &Arc<dyn GraphDatabase> {
        &self.db
    }

    pub fn indexer(&self) -> Option<&Arc<dyn Indexer>> {
        self.indexer.as_ref()
    }

    pub fn config(&self) -> &ModelGraphConfig {
        &self.config
    }

    pub fn id_field(&self) -> &str {
        &self.config.id_field
    }
}

/// Borrowed view of a model together with its schema; every save and read goes through it.
#[derive(Clone, Copy)]
pub struct ModelRef<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) model: &'a Model,
}

impl<'a> ModelRef<'a> {
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn model(&self) -> &'a Model {
        self.model
    }

    pub fn label(&self) -> &'a str {
        self.model.label()
    }
}
