//! Named digital lines.
//!
//! - [`role`] - `InputRole` / `OutputRole` enums with stable string names
//! - [`map`] - `LineMap`, the immutable role-to-channel binding built at startup

pub mod map;
pub mod role;
