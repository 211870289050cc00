//! # Hearth Core
//!
//! Dependency-light building blocks shared by every Hearth crate:
//!
//! - **Path matching**: [`PathMatcher`] compiles templates (`/chat/:room`) and
//!   raw regular expressions into a pure predicate over request paths.
//! - **Scope-bound disposal**: [`Scope`] collects disposal actions for
//!   everything a plugin registers, so tearing the scope down removes exactly
//!   what that plugin created.
//!
//! Networking lives in `hearth-transport`; plugin lifecycle in
//! `hearth-framework`.

pub mod error;
pub mod pattern;
pub mod scope;

pub use error::{PatternError, PatternResult};
pub use pattern::{IntoPatterns, MatchOptions, PathMatcher, PathParams, PathPattern};
pub use scope::Scope;
