use crate::{NodeId, Object, QueryResult, Result, Statement};
use async_trait::async_trait;
use serde_json::Value;

/// The single capability the engine needs from a graph database: run one
/// parametrized statement atomically and hand back its result table.
#[async_trait]
pub trait GraphDatabase: Send + Sync {
    async fn execute(&self, statement: Statement) -> Result<QueryResult>;
}

/// Legacy key/value index collaborator.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, index_name: &str, node: NodeId, key: &str, value: &Value)
        -> Result<()>;

    async fn read_by_index(&self, index_name: &str, key: &str, value: &Value)
        -> Result<Vec<Object>>;
}
