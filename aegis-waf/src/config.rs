pub mod snapshot;
pub mod types;

pub use snapshot::{ConfigManager, ConfigVersion, Snapshot};
pub use types::Config;
