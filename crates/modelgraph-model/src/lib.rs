//! Composition persistence engine for labeled-property graph databases.
//!
//! A [`Schema`] holds one [`Model`] per application type. Saving an object
//! through [`Schema::model`] writes it and every composed child in one
//! atomic statement; reading rebuilds the same nested shape from a single
//! bounded-depth traversal.

pub mod coalesce;
pub mod compose;
pub mod composition;
pub mod cypher;
pub mod graph;
pub mod hooks;
pub mod index;
pub mod model;
pub mod predicate;
pub mod read;
pub mod schema;
pub mod sort;
pub mod write;

#[cfg(test)]
mod test_support;

pub use coalesce::Coalescer;
pub use compose::{QueryComposer, SaveOptions};
pub use composition::{Cardinality, Composition, CompositionOptions, Direction, OrderBy};
pub use graph::{CompositionGraph, CompositionScope, GraphBuilder, GraphNode};
pub use hooks::{Notifier, Transform, TransformChain, ValidationFanOut, Validator};
pub use index::{IndexDescriptor, UniquenessDescriptor, NODE_INDEX};
pub use model::{Model, TimestampPolicy};
pub use predicate::{Matcher, Predicate};
pub use read::{Include, ReadOptions, ReadPlan, ReadQuery};
pub use schema::{ModelId, ModelRef, Schema};

pub use modelgraph_core::{
    GraphDatabase, Indexer, ModelGraphConfig, ModelGraphError, NodeId, Object, QueryResult, Result,
    Statement,
};
