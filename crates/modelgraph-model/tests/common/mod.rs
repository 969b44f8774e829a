#![allow(dead_code)]

use async_trait::async_trait;
use modelgraph_model::{
    CompositionOptions, GraphDatabase, Indexer, ModelGraphConfig, ModelGraphError, ModelId,
    NodeId, Object, QueryResult, Result, Schema, Statement,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;

/// Records every statement and replays queued results in order.
/// An empty queue answers with an empty table.
#[derive(Default)]
pub struct ScriptedDatabase {
    responses: Mutex<VecDeque<Result<QueryResult>>>,
    statements: Mutex<Vec<Statement>>,
}

impl ScriptedDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, result: QueryResult) {
        self.responses.lock().push_back(Ok(result));
    }

    /// Queues a single-row result built from `(column, value)` pairs.
    pub fn respond_row(&self, row: Value) {
        let object = row.as_object().cloned().unwrap_or_default();
        let (columns, values): (Vec<String>, Vec<Value>) = object.into_iter().unzip();
        self.respond(QueryResult::new(columns, vec![values]));
    }

    pub fn respond_rows(&self, rows: Vec<Value>) {
        let mut columns = Vec::new();
        let mut table = Vec::new();
        for row in rows {
            let object = row.as_object().cloned().unwrap_or_default();
            columns = object.keys().cloned().collect();
            table.push(object.into_iter().map(|(_, v)| v).collect());
        }
        self.respond(QueryResult::new(columns, table));
    }

    pub fn fail(&self, error: ModelGraphError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().clone()
    }

    pub fn last(&self) -> Statement {
        self.statements
            .lock()
            .last()
            .cloned()
            .expect("no statement was executed")
    }
}

#[async_trait]
impl GraphDatabase for ScriptedDatabase {
    async fn execute(&self, statement: Statement) -> Result<QueryResult> {
        self.statements.lock().push(statement);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResult::default()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexCall {
    pub index_name: String,
    pub node: NodeId,
    pub key: String,
    pub value: Value,
}

#[derive(Default)]
pub struct RecordingIndexer {
    pub calls: Mutex<Vec<IndexCall>>,
}

#[async_trait]
impl Indexer for RecordingIndexer {
    async fn index(&self, index_name: &str, node: NodeId, key: &str, value: &Value) -> Result<()> {
        self.calls.lock().push(IndexCall {
            index_name: index_name.to_string(),
            node,
            key: key.to_string(),
            value: value.clone(),
        });
        Ok(())
    }

    async fn read_by_index(&self, index_name: &str, key: &str, value: &Value) -> Result<Vec<Object>> {
        let calls = self.calls.lock();
        Ok(calls
            .iter()
            .filter(|c| c.index_name == index_name && c.key == key && &c.value == value)
            .map(|c| object(json!({"id": c.node})))
            .collect())
    }
}

/// Rejects every write, as an unreachable index store would.
pub struct FailingIndexer;

#[async_trait]
impl Indexer for FailingIndexer {
    async fn index(&self, index_name: &str, _node: NodeId, _key: &str, _value: &Value) -> Result<()> {
        Err(ModelGraphError::Index(format!("{} is unavailable", index_name)))
    }

    async fn read_by_index(&self, _index_name: &str, _key: &str, _value: &Value) -> Result<Vec<Object>> {
        Ok(Vec::new())
    }
}

pub fn object(value: Value) -> Object {
    value.as_object().cloned().expect("expected a JSON object")
}

/// `Meal -[matches]-> Beer`, `matchingBeers` is a many composition.
pub fn meal_schema(db: Arc<ScriptedDatabase>) -> (Schema, ModelId, ModelId) {
    let mut schema = Schema::new(db, ModelGraphConfig::default());
    let meal = schema.define("Meal");
    let beer = schema.define("Beer");
    schema
        .model_mut(meal)
        .compose(beer, "matchingBeers", "matches", CompositionOptions::many());
    (schema, meal, beer)
}
