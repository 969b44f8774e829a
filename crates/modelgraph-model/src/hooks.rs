// ABOUTME: Typed lifecycle hook pipelines run around every save and read
// ABOUTME: Transform chains, a validation fan-out and fire-and-forget notifiers

use async_trait::async_trait;
use futures::future::try_join_all;
use modelgraph_core::{Object, Result};
use std::future::Future;
use std::sync::Arc;

/// A step that receives an object and hands back a (possibly) changed one.
///
/// This is the plug point for external schema/type-casting collaborators.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(&self, object: Object) -> Result<Object>;
}

/// A check that accepts or rejects an object without changing it.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, object: &Object) -> Result<()>;
}

pub type Listener = Arc<dyn Fn(&Object) + Send + Sync>;

struct FnTransform<F>(F);

#[async_trait]
impl<F, Fut> Transform for FnTransform<F>
where
    F: Fn(Object) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Object>> + Send + 'static,
{
    async fn apply(&self, object: Object) -> Result<Object> {
        (self.0)(object).await
    }
}

struct FnValidator<F>(F);

#[async_trait]
impl<F, Fut> Validator for FnValidator<F>
where
    F: Fn(Object) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn validate(&self, object: &Object) -> Result<()> {
        (self.0)(object.clone()).await
    }
}

/// Ordered transform chain: each step receives the previous step's output.
#[derive(Clone, Default)]
pub struct TransformChain {
    steps: Vec<Arc<dyn Transform>>,
}

impl TransformChain {
    pub fn push(&mut self, step: Arc<dyn Transform>) {
        self.steps.push(step);
    }

    pub fn push_fn<F, Fut>(&mut self, step: F)
    where
        F: Fn(Object) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Object>> + Send + 'static,
    {
        self.steps.push(Arc::new(FnTransform(step)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(&self, mut object: Object) -> Result<Object> {
        for step in &self.steps {
            object = step.apply(object).await?;
        }
        Ok(object)
    }
}

/// Validators run concurrently; the first failure wins and the rest are dropped.
#[derive(Clone, Default)]
pub struct ValidationFanOut {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidationFanOut {
    pub fn push(&mut self, validator: Arc<dyn Validator>) {
        self.validators.push(validator);
    }

    pub fn push_fn<F, Fut>(&mut self, validator: F)
    where
        F: Fn(Object) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.validators.push(Arc::new(FnValidator(validator)));
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub async fn run(&self, object: &Object) -> Result<()> {
        try_join_all(self.validators.iter().map(|v| v.validate(object))).await?;
        Ok(())
    }
}

/// Notification-only listeners; nothing they do can affect the pipeline.
#[derive(Clone, Default)]
pub struct Notifier {
    listeners: Vec<Listener>,
}

impl Notifier {
    pub fn push<F>(&mut self, listener: F)
    where
        F: Fn(&Object) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn fire(&self, object: &Object) {
        for listener in &self.listeners {
            listener(object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgraph_core::ModelGraphError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn object(value: serde_json::Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn transforms_run_in_registration_order() {
        let mut chain = TransformChain::default();
        chain.push_fn(|mut o: Object| async move {
            o.insert("n".into(), json!(o["n"].as_i64().unwrap_or(0) + 1));
            Ok(o)
        });
        chain.push_fn(|mut o: Object| async move {
            o.insert("n".into(), json!(o["n"].as_i64().unwrap_or(0) * 10));
            Ok(o)
        });

        let out = tokio_test::block_on(chain.run(object(json!({"n": 1})))).unwrap();
        assert_eq!(out["n"], json!(20));
    }

    #[test]
    fn failing_transform_stops_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut chain = TransformChain::default();
        chain.push_fn(|_o: Object| async { Err(ModelGraphError::validation("nope")) });
        chain.push_fn(move |o: Object| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(o) }
        });

        let result = tokio_test::block_on(chain.run(Object::new()));
        assert!(matches!(result, Err(ModelGraphError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn any_validator_failure_rejects() {
        let mut fan_out = ValidationFanOut::default();
        fan_out.push_fn(|_o: Object| async { Ok(()) });
        fan_out.push_fn(|o: Object| async move {
            if o.get("age").and_then(|a| a.as_i64()).unwrap_or(0) > 15 {
                Err(ModelGraphError::field_validation("age", "too old"))
            } else {
                Ok(())
            }
        });

        assert!(fan_out.run(&object(json!({"age": 10}))).await.is_ok());
        assert!(fan_out.run(&object(json!({"age": 25}))).await.is_err());
    }

    #[test]
    fn notifier_calls_every_listener() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut notifier = Notifier::default();
        for _ in 0..3 {
            let hits = hits.clone();
            notifier.push(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        notifier.fire(&Object::new());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
