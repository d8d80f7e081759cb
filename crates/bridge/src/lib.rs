pub mod bridge;
pub mod context;
pub mod dispatcher;
pub mod metrics;
pub mod mirror;
pub mod registrar;
pub mod router;
pub mod settings;
pub mod status;
pub mod timer;

pub use bridge::{Bridge, Route};
pub use context::{Context, Transport};
pub use metrics::Metrics;
pub use settings::{BridgeConfig, BridgeSettings, IdentityStore, SettingsError};
