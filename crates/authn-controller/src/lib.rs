//! Authentication Controller Library
//!
//! Compiles declarative request-authentication policy into per-route
//! verification plans for a reverse-proxy data plane, and keeps the remote
//! JWKS key material those plans depend on fresh.
//!
//! # Architecture
//!
//! ```text
//! ConfigSnapshot -> providers (validate) -> compiler -> CompiledPolicy
//!                                                     -> keys::KeyCache (ensure/release)
//! request -> verifier (plan + Key Cache snapshots) -> VerificationOutcome
//! ```
//!
//! # Modules
//!
//! - `providers` - Provider Registry and the `JWT` provider type
//! - `compiler` - Route bindings to verification plans and upstream descriptors
//! - `keys` - JWKS fetcher, parsed key sets and the Key Cache
//! - `verifier` - Per-request verification against a plan
//! - `controller` - Applies snapshots and publishes the compiled policy
//! - `status` - Provider, route and endpoint conditions
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` / `routes` - Health, status and metrics HTTP surface
//! - `observability` - Prometheus metrics
//! - `tasks` - Background policy reloading

pub mod compiler;
pub mod config;
pub mod controller;
pub mod errors;
pub mod handlers;
pub mod keys;
pub mod observability;
pub mod providers;
pub mod routes;
pub mod status;
pub mod tasks;
pub mod verifier;
