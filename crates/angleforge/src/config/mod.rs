pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    BillingConfig, Config, DatabaseConfig, LayoutsConfig, LogFormat, LoggingConfig,
    ReconcilerConfig, UpstreamConfig,
};
