pub mod connection;
pub mod fixtures;
pub mod gateway;
pub mod introspect;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{AutomotiveSeedDataset, SeedResult};
pub use gateway::SqliteGateway;
pub use introspect::{fetch_schema, SchemaCache};
