use futures::future::{self, BoxFuture, FutureExt};
use modelgraph_core::{Object, Result};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Index name used by the default per-model indexes.
pub const NODE_INDEX: &str = "nodes";

type Extractor<T> = Arc<dyn Fn(Object) -> BoxFuture<'static, Result<T>> + Send + Sync>;
type ConditionFn = Arc<dyn Fn(&Object) -> bool + Send + Sync>;

fn immediate<T, F>(f: F) -> Extractor<T>
where
    T: Send + 'static,
    F: Fn(&Object) -> T + Send + Sync + 'static,
{
    Arc::new(move |object: Object| future::ready(Ok(f(&object))).boxed())
}

fn deferred<T, F, Fut>(f: F) -> Extractor<T>
where
    F: Fn(Object) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move |object: Object| f(object).boxed())
}

/// Describes how a saved object is written into a key/value index.
///
/// Extractors are either plain closures ([`IndexDescriptor::new`], [`IndexDescriptor::when`])
/// or async ones ([`IndexDescriptor::new_async`], [`IndexDescriptor::when_async`]).
#[derive(Clone)]
pub struct IndexDescriptor {
    pub index_name: String,
    key: Extractor<String>,
    value: Extractor<Value>,
    condition: Extractor<bool>,
    pub(crate) is_default: bool,
}

impl IndexDescriptor {
    pub fn new<K, V>(index_name: impl Into<String>, key: K, value: V) -> Self
    where
        K: Fn(&Object) -> String + Send + Sync + 'static,
        V: Fn(&Object) -> Value + Send + Sync + 'static,
    {
        Self {
            index_name: index_name.into(),
            key: immediate(key),
            value: immediate(value),
            condition: immediate(|_| true),
            is_default: false,
        }
    }

    pub fn new_async<K, KFut, V, VFut>(index_name: impl Into<String>, key: K, value: V) -> Self
    where
        K: Fn(Object) -> KFut + Send + Sync + 'static,
        KFut: Future<Output = Result<String>> + Send + 'static,
        V: Fn(Object) -> VFut + Send + Sync + 'static,
        VFut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            index_name: index_name.into(),
            key: deferred(key),
            value: deferred(value),
            condition: immediate(|_| true),
            is_default: false,
        }
    }

    /// Restricts the index to objects satisfying `condition`.
    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&Object) -> bool + Send + Sync + 'static,
    {
        self.condition = immediate(condition);
        self
    }

    pub fn when_async<C, Fut>(mut self, condition: C) -> Self
    where
        C: Fn(Object) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        self.condition = deferred(condition);
        self
    }

    pub async fn applies_to(&self, object: &Object) -> Result<bool> {
        (self.condition)(object.clone()).await
    }

    pub async fn key_for(&self, object: &Object) -> Result<String> {
        (self.key)(object.clone()).await
    }

    pub async fn value_for(&self, object: &Object) -> Result<Value> {
        (self.value)(object.clone()).await
    }

    /// The two indexes every model carries: `type = label` and `label = id`.
    pub(crate) fn defaults(label: &str, id_field: &str) -> Vec<Self> {
        let type_value = label.to_string();
        let label_key = label.to_string();
        let id_field = id_field.to_string();

        let mut by_type = Self::new(
            NODE_INDEX,
            |_| "type".to_string(),
            move |_| Value::String(type_value.clone()),
        );
        by_type.is_default = true;

        let mut by_id = Self::new(
            NODE_INDEX,
            move |_| label_key.clone(),
            move |object| object.get(&id_field).cloned().unwrap_or(Value::Null),
        );
        by_id.is_default = true;

        vec![by_type, by_id]
    }
}

impl fmt::Debug for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("index_name", &self.index_name)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// Unique key enforced on newly created nodes of a model.
#[derive(Clone)]
pub struct UniquenessDescriptor {
    /// Name of the backing constraint; named in conflict errors.
    pub index_name: String,
    /// Property holding the unique value.
    pub key: String,
    /// Return the pre-existing node instead of failing on collision.
    pub return_old_on_conflict: bool,
    condition: ConditionFn,
}

impl UniquenessDescriptor {
    pub fn new(index_name: impl Into<String>, key: impl Into<String>, return_old: bool) -> Self {
        Self {
            index_name: index_name.into(),
            key: key.into(),
            return_old_on_conflict: return_old,
            condition: Arc::new(|_| true),
        }
    }

    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&Object) -> bool + Send + Sync + 'static,
    {
        self.condition = Arc::new(condition);
        self
    }

    pub fn applies_to(&self, object: &Object) -> bool {
        (self.condition)(object)
    }
}

impl fmt::Debug for UniquenessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniquenessDescriptor")
            .field("index_name", &self.index_name)
            .field("key", &self.key)
            .field("return_old_on_conflict", &self.return_old_on_conflict)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgraph_core::ModelGraphError;
    use serde_json::json;

    #[tokio::test]
    async fn default_indexes_use_label_and_id() {
        let defaults = IndexDescriptor::defaults("Beer", "id");
        let object = json!({"id": 4, "name": "IPA"}).as_object().cloned().unwrap();

        assert_eq!(defaults.len(), 2);
        assert!(defaults.iter().all(|d| d.is_default && d.index_name == NODE_INDEX));
        assert_eq!(defaults[0].key_for(&object).await.unwrap(), "type");
        assert_eq!(defaults[0].value_for(&object).await.unwrap(), json!("Beer"));
        assert_eq!(defaults[1].key_for(&object).await.unwrap(), "Beer");
        assert_eq!(defaults[1].value_for(&object).await.unwrap(), json!(4));
    }

    #[tokio::test]
    async fn conditions_gate_indexes() {
        let index = IndexDescriptor::new("by_name", |_| "name".into(), |o| o["name"].clone())
            .when(|o| o.contains_key("name"));
        let named = json!({"name": "x"}).as_object().cloned().unwrap();
        assert!(index.applies_to(&named).await.unwrap());
        assert!(!index.applies_to(&Object::new()).await.unwrap());
    }

    #[tokio::test]
    async fn async_extractors_are_awaited() {
        let index = IndexDescriptor::new_async(
            "by_brewery",
            |o: Object| async move {
                tokio::task::yield_now().await;
                Ok(format!("brewery:{}", o["brewery"].as_str().unwrap_or("")))
            },
            |o: Object| async move { Ok(o["name"].clone()) },
        )
        .when_async(|o: Object| async move {
            match o.get("brewery") {
                Some(Value::String(_)) => Ok(true),
                Some(_) => Err(ModelGraphError::Index("brewery must be a name".into())),
                None => Ok(false),
            }
        });

        let beer = json!({"name": "IPA", "brewery": "Harbour"}).as_object().cloned().unwrap();
        assert!(index.applies_to(&beer).await.unwrap());
        assert_eq!(index.key_for(&beer).await.unwrap(), "brewery:Harbour");
        assert_eq!(index.value_for(&beer).await.unwrap(), json!("IPA"));

        let odd = json!({"brewery": 3}).as_object().cloned().unwrap();
        assert!(index.applies_to(&odd).await.is_err());
        assert!(!index.applies_to(&Object::new()).await.unwrap());
    }
}
