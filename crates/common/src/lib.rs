//! Common utilities and types shared across the authentication controller crates.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for JWT utilities (inspection, time claims, key decoding)
pub mod jwt;
