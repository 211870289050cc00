//! Error types for the Hearth core.

use thiserror::Error;

// =============================================================================
// Pattern Errors
// =============================================================================

/// Errors raised while compiling a path pattern.
///
/// A registration that fails with a `PatternError` adds nothing to any table.
#[derive(Debug, Clone, Error)]
pub enum PatternError {
    /// No pattern was supplied (empty list).
    #[error("no path pattern supplied")]
    Empty,

    /// A `:` was not followed by a parameter name.
    #[error("missing parameter name at offset {offset} in '{pattern}'")]
    MissingParameterName {
        /// The offending pattern.
        pattern: String,
        /// Byte offset of the `:`.
        offset: usize,
    },

    /// A `(` without its closing `)` (or the reverse).
    #[error("unbalanced group at offset {offset} in '{pattern}'")]
    UnbalancedGroup {
        /// The offending pattern.
        pattern: String,
        /// Byte offset of the group start.
        offset: usize,
    },

    /// A group's expression starts with `?`, which would make the group
    /// itself non-capturing.
    #[error("group expression cannot start with '?' at offset {offset} in '{pattern}'")]
    GroupModifier {
        /// The offending pattern.
        pattern: String,
        /// Byte offset of the group start.
        offset: usize,
    },

    /// A custom parameter expression contains a capturing group.
    #[error("capturing groups are not allowed in '{pattern}', use (?:...) instead")]
    CapturingGroup {
        /// The offending pattern.
        pattern: String,
    },

    /// The template ends with a lone backslash.
    #[error("trailing escape in '{pattern}'")]
    TrailingEscape {
        /// The offending pattern.
        pattern: String,
    },

    /// The compiled expression was rejected by the regex engine.
    #[error("invalid path expression '{pattern}': {source}")]
    InvalidRegex {
        /// The offending pattern.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
}

/// Result type for pattern compilation.
pub type PatternResult<T> = Result<T, PatternError>;
