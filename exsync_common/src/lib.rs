//! Exposure Sync Common Library
//!
//! Shared vocabulary for every crate in the workspace: the named digital
//! lines, the sampled line bundle, the driver contract, the injectable clock
//! and the TOML configuration tree.
//!
//! # Module Structure
//!
//! - [`io`] - Line roles and the role-to-channel map
//! - [`hal`] - Driver trait, HAL error type, bundle and edge types
//! - [`clock`] - Monotonic/wall clock abstraction with a manual test clock
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - System-wide constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use exsync_common::prelude::*;
//!
//! let config = SyncConfig::default();
//! assert!(config.validate().is_ok());
//! ```

pub mod clock;
pub mod config;
pub mod consts;
pub mod hal;
pub mod io;
pub mod prelude;
