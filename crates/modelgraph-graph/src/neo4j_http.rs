// ABOUTME: GraphDatabase implementation over the Neo4j transactional HTTP endpoint
// ABOUTME: Sends one statement per commit request and maps Neo4j errors into the engine taxonomy

use async_trait::async_trait;
use modelgraph_core::{
    GraphDatabase, ModelGraphError, Neo4jConfig, Object, QueryResult, Result, Statement,
};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    statements: [StatementPayload<'a>; 1],
}

#[derive(Debug, Serialize)]
struct StatementPayload<'a> {
    statement: &'a str,
    parameters: &'a Object,
    #[serde(rename = "resultDataContents")]
    result_data_contents: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<RowData>,
}

#[derive(Debug, Deserialize)]
struct RowData {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Neo4jError {
    code: String,
    message: String,
}

/// Neo4j client speaking the `/db/{database}/tx/commit` endpoint.
///
/// Each call is an auto-committed transaction holding exactly one statement,
/// so the database's per-statement atomicity is the only consistency boundary.
#[derive(Clone)]
pub struct Neo4jHttpDatabase {
    client: Client,
    commit_url: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl Neo4jHttpDatabase {
    pub fn new(config: &Neo4jConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ModelGraphError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        info!(
            "Initializing Neo4j HTTP database at {} (database: {})",
            config.url, config.database
        );

        Ok(Self {
            client,
            commit_url: commit_url(&config.url, &config.database),
            username: config.username.clone(),
            password: config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string()),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn commit_url(&self) -> &str {
        &self.commit_url
    }
}

fn commit_url(base: &str, database: &str) -> String {
    format!("{}/db/{}/tx/commit", base.trim_end_matches('/'), database)
}

/// Turns a commit response body into a result table, surfacing the first reported error.
fn into_query_result(response: CommitResponse) -> Result<QueryResult> {
    if let Some(err) = response.errors.into_iter().next() {
        return Err(ModelGraphError::Statement {
            code: Some(err.code),
            message: err.message,
        });
    }

    let Some(result) = response.results.into_iter().next() else {
        return Ok(QueryResult::default());
    };

    Ok(QueryResult::new(
        result.columns,
        result.data.into_iter().map(|d| d.row).collect(),
    ))
}

#[async_trait]
impl GraphDatabase for Neo4jHttpDatabase {
    async fn execute(&self, statement: Statement) -> Result<QueryResult> {
        debug!(
            "Executing statement with {} parameters: {}",
            statement.params.len(),
            statement.text
        );

        let body = CommitRequest {
            statements: [StatementPayload {
                statement: &statement.text,
                parameters: &statement.params,
                result_data_contents: ["row"],
            }],
        };

        let mut request = self
            .client
            .post(&self.commit_url)
            .header("Accept", "application/json")
            .json(&body);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ModelGraphError::statement("Neo4j request timed out"))?
            .map_err(|e| {
                error!("Neo4j request failed: {}", e);
                ModelGraphError::statement(format!("Neo4j request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Neo4j responded with HTTP {}: {}", status, text);
            return Err(ModelGraphError::statement(format!(
                "Neo4j responded with HTTP {}: {}",
                status, text
            )));
        }

        let payload: CommitResponse = response.json().await.map_err(|e| {
            ModelGraphError::statement(format!("Failed to parse Neo4j response: {}", e))
        })?;

        into_query_result(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: Value) -> Result<QueryResult> {
        into_query_result(serde_json::from_value(body).unwrap())
    }

    #[test]
    fn builds_commit_url_without_double_slash() {
        assert_eq!(
            commit_url("http://localhost:7474/", "neo4j"),
            "http://localhost:7474/db/neo4j/tx/commit"
        );
    }

    #[test]
    fn rows_are_taken_from_first_result() {
        let table = parse(json!({
            "results": [{
                "columns": ["meal_0", "beer_1"],
                "data": [{"row": [{"id": 1, "name": "Meal"}, {"id": 2, "name": "A"}], "meta": []}]
            }],
            "errors": []
        }))
        .unwrap();

        assert_eq!(table.columns, vec!["meal_0", "beer_1"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][1]["name"], json!("A"));
    }

    #[test]
    fn constraint_errors_are_recognised_as_conflicts() {
        let err = parse(json!({
            "results": [],
            "errors": [{
                "code": "Neo.ClientError.Schema.ConstraintValidationFailed",
                "message": "Node(0) already exists with label `Beer` and property `name` = 'IPA'"
            }]
        }))
        .unwrap_err();

        assert!(err.is_uniqueness_violation());
        assert!(matches!(err.into_conflict(), ModelGraphError::Conflict(_)));
    }

    #[test]
    fn empty_results_yield_empty_table() {
        let table = parse(json!({"results": [], "errors": []})).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn request_body_matches_endpoint_shape() {
        let statement = Statement::new("RETURN $x AS x").bind("x", 1);
        let body = CommitRequest {
            statements: [StatementPayload {
                statement: &statement.text,
                parameters: &statement.params,
                result_data_contents: ["row"],
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "statements": [{
                    "statement": "RETURN $x AS x",
                    "parameters": {"x": 1},
                    "resultDataContents": ["row"]
                }]
            })
        );
    }
}
