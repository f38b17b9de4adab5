//! Live telemetry monitoring for simulation servers.
//!
//! The `pipeline` module is the entry point: a `Pipeline` owns the monitors
//! opened by the user, keeps the server subscriptions in sync with them and
//! moves samples from a `transport` to a `Presenter`.

pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod transport;
pub mod wire;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, Presenter};
pub use transport::Transport;
