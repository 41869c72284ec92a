//! The tripwire benchmarking harness.
//!
//! Drives a synthetic HTTP client against a synthetic bounded-concurrency
//! HTTP server through a configurable resilience-policy pipeline, recording
//! per-request outcomes and per-policy state as Prometheus time series so
//! overload-mitigation strategies can be scored side by side.

pub mod client;
pub mod config;
pub mod control;
pub mod runner;
pub mod server;

pub use config::{Config, StrategyConfig};
