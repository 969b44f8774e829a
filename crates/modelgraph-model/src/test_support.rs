use async_trait::async_trait;
use modelgraph_core::{GraphDatabase, ModelGraphConfig, Object, QueryResult, Result, Statement};
use serde_json::Value;
use std::sync::Arc;

use crate::composition::CompositionOptions;
use crate::schema::{ModelId, Schema};

/// Database that accepts everything and returns nothing; for pure rendering tests.
pub struct NullDatabase;

#[async_trait]
impl GraphDatabase for NullDatabase {
    async fn execute(&self, _statement: Statement) -> Result<QueryResult> {
        Ok(QueryResult::default())
    }
}

pub fn object(value: Value) -> Object {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

/// `Meal -[matches]-> Beer` with `matchingBeers` as a many composition.
pub fn meal_schema() -> (Schema, ModelId, ModelId) {
    let mut schema = Schema::new(Arc::new(NullDatabase), ModelGraphConfig::default());
    let meal = schema.define("Meal");
    let beer = schema.define("Beer");
    schema
        .model_mut(meal)
        .compose(beer, "matchingBeers", "matches", CompositionOptions::many());
    (schema, meal, beer)
}
