pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{ModelGraphConfig, Neo4jConfig};
pub use error::*;
pub use traits::*;
pub use types::*;
