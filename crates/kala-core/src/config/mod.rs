//! Layered TOML configuration, following the loader/schema split used
//! elsewhere in this lineage for persistent daemon configuration.

pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load, load_from, save};
pub use schema::{AppConfig, DbConfig, GateConfig, GateKind, HttpConfig};
