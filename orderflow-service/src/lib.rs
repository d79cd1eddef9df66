//! Order pipeline service
//!
//! Runs the order consumer, the dead-letter sink and the HTTP ingress on an
//! in-memory broker, configured from environment variables.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod http;
pub mod telemetry;

pub use app::Service;
pub use crate::config::{ConfigLoadError, EnvConfig, LogFormat, ServiceConfig};
