pub mod client;
pub mod config;
pub mod push;

pub use client::OctoPrintClient;
pub use config::OctoPrintConfig;
pub use push::{run_push_listener, CurrentTracker, HostUpdate};
