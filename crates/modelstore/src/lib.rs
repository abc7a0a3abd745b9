//! Model store harvester: configuration, wiring and the HTTP trigger.

pub mod config;
pub mod http;
pub mod wiring;

pub use config::{AppConfig, SinkKind};
pub use http::{router, serve, AppState, HarvestBackend};
pub use wiring::{build_harvester, LiveBackend};
