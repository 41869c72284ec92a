//! Core types for the tripwire overload-mitigation benchmark.
//!
//! This crate holds everything shared between the load-generating client,
//! the simulated server and the policy layer: the configuration primitives,
//! the weighted service-time distributions, the Prometheus metrics registry
//! and the error taxonomy.

pub mod config;
pub mod error;
pub mod metrics;
pub mod service_time;

pub use config::{ClientConfig, ServerConfig, SimRequest, Stage, Workload};
pub use error::{TripwireError, TripwireResult};
pub use service_time::{WeightedServiceTime, WeightedServiceTimes};
