//! Observability for the authentication controller.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
