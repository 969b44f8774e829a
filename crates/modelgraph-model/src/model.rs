use modelgraph_core::{Object, Result};
use std::future::Future;
use std::sync::Arc;

use crate::composition::{Composition, CompositionOptions};
use crate::hooks::{Notifier, Transform, TransformChain, ValidationFanOut, Validator};
use crate::index::{IndexDescriptor, UniquenessDescriptor};
use crate::schema::ModelId;

/// Names of the fields maintained when a model uses timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampPolicy {
    pub created: String,
    pub updated: String,
}

impl Default for TimestampPolicy {
    fn default() -> Self {
        Self {
            created: "created".to_string(),
            updated: "updated".to_string(),
        }
    }
}

/// Entity registry entry: everything the engine knows about one application type.
///
/// Models are configured during setup through [`crate::Schema::model_mut`] and
/// are read-only once the schema is shared.
pub struct Model {
    id: ModelId,
    label: String,
    id_field: String,
    fields: Vec<String>,
    compositions: Vec<Composition>,
    indexes: Vec<IndexDescriptor>,
    uniqueness: Option<UniquenessDescriptor>,
    timestamps: Option<TimestampPolicy>,
    pub(crate) prepare: TransformChain,
    pub(crate) validate: ValidationFanOut,
    pub(crate) before_save: Notifier,
    pub(crate) after_save: Notifier,
    pub(crate) compute: TransformChain,
}

impl Model {
    pub(crate) fn new(id: ModelId, label: &str, id_field: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            id_field: id_field.to_string(),
            fields: Vec::new(),
            compositions: Vec::new(),
            indexes: IndexDescriptor::defaults(label, id_field),
            uniqueness: None,
            timestamps: None,
            prepare: TransformChain::default(),
            validate: ValidationFanOut::default(),
            before_save: Notifier::default(),
            after_save: Notifier::default(),
            compute: TransformChain::default(),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Changes the label and re-derives the default indexes that embed it.
    pub fn set_label(&mut self, label: impl Into<String>) -> &mut Self {
        self.label = label.into();
        self.indexes.retain(|index| !index.is_default);
        let mut indexes = IndexDescriptor::defaults(&self.label, &self.id_field);
        indexes.append(&mut self.indexes);
        self.indexes = indexes;
        self
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Persisted-property whitelist; empty keeps every property.
    pub fn set_fields<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declares (or replaces) the composition stored under `name`.
    pub fn compose(
        &mut self,
        target: ModelId,
        name: &str,
        rel: &str,
        opts: CompositionOptions,
    ) -> &mut Self {
        let composition = Composition::new(target, name, rel, opts);
        match self.compositions.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = composition,
            None => self.compositions.push(composition),
        }
        self
    }

    pub fn compositions(&self) -> &[Composition] {
        &self.compositions
    }

    pub fn composition(&self, name: &str) -> Option<&Composition> {
        self.compositions.iter().find(|c| c.name == name)
    }

    pub fn has_compositions(&self) -> bool {
        !self.compositions.is_empty()
    }

    pub fn add_index(&mut self, index: IndexDescriptor) -> &mut Self {
        self.indexes.push(index);
        self
    }

    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    pub fn set_uniqueness(&mut self, uniqueness: UniquenessDescriptor) -> &mut Self {
        self.uniqueness = Some(uniqueness);
        self
    }

    /// Shorthand for a unique property named after the model's label.
    pub fn set_unique_key(&mut self, key: &str, return_old_on_conflict: bool) -> &mut Self {
        let index_name = format!("{}_{}", self.label, key);
        self.set_uniqueness(UniquenessDescriptor::new(
            index_name,
            key,
            return_old_on_conflict,
        ))
    }

    pub fn uniqueness(&self) -> Option<&UniquenessDescriptor> {
        self.uniqueness.as_ref()
    }

    pub fn use_timestamps(&mut self) -> &mut Self {
        self.timestamps = Some(TimestampPolicy::default());
        self
    }

    pub fn use_timestamps_with(&mut self, created: &str, updated: &str) -> &mut Self {
        self.timestamps = Some(TimestampPolicy {
            created: created.to_string(),
            updated: updated.to_string(),
        });
        self
    }

    pub fn timestamps(&self) -> Option<&TimestampPolicy> {
        self.timestamps.as_ref()
    }

    pub fn on_prepare<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Object) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Object>> + Send + 'static,
    {
        self.prepare.push_fn(hook);
        self
    }

    pub fn add_preparer(&mut self, preparer: Arc<dyn Transform>) -> &mut Self {
        self.prepare.push(preparer);
        self
    }

    pub fn on_validate<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Object) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.validate.push_fn(hook);
        self
    }

    pub fn add_validator(&mut self, validator: Arc<dyn Validator>) -> &mut Self {
        self.validate.push(validator);
        self
    }

    pub fn on_before_save<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&Object) + Send + Sync + 'static,
    {
        self.before_save.push(listener);
        self
    }

    pub fn on_after_save<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&Object) + Send + Sync + 'static,
    {
        self.after_save.push(listener);
        self
    }

    /// Registers a derived-field transform run after every save and read.
    pub fn on_compute<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Object) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Object>> + Send + 'static,
    {
        self.compute.push_fn(hook);
        self
    }

    pub fn add_computer(&mut self, computer: Arc<dyn Transform>) -> &mut Self {
        self.compute.push(computer);
        self
    }

    /// Drops properties outside the whitelist, keeping identifier, compositions and timestamps.
    pub(crate) fn whitelist(&self, object: Object) -> Object {
        if self.fields.is_empty() {
            return object;
        }
        object
            .into_iter()
            .filter(|(key, _)| {
                self.fields.contains(key)
                    || *key == self.id_field
                    || self.composition(key).is_some()
                    || self
                        .timestamps
                        .as_ref()
                        .is_some_and(|t| *key == t.created || *key == t.updated)
            })
            .collect()
    }

    /// Whitelist followed by the registered `prepare` chain.
    pub(crate) async fn run_prepare(&self, object: Object) -> Result<Object> {
        self.prepare.run(self.whitelist(object)).await
    }
}
