//! Background tasks for the authentication controller.
//!
//! # Tasks
//!
//! - `policy_watcher` - Polls the policy file and applies changed snapshots

pub mod policy_watcher;

pub use policy_watcher::{load_snapshot, start_policy_watcher};
