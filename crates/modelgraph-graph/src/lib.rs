#[cfg(feature = "neo4j")]
pub mod neo4j_http;

#[cfg(feature = "neo4j")]
pub use neo4j_http::*;
