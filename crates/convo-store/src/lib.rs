pub mod error;
pub mod graph;
pub mod schema;
pub mod script;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use graph::{AncestorPath, GraphStore, NewSnapshot, PathNode};
pub use script::ReplayScript;
pub use sqlite::SqliteGraphStore;
