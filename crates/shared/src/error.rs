//! Errors shared by the relay and its clients.

use thiserror::Error;

/// Reasons an announcement is refused before it is ever sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("announcement text is empty")]
    EmptyText,

    #[error("announcement text is {len} characters, the limit is {max}")]
    TextTooLong { len: usize, max: usize },

    #[error("at least one language must be selected")]
    NoLanguages,

    #[error("unsupported language code: {0}")]
    UnknownLanguage(String),

    #[error("language selected more than once: {0}")]
    DuplicateLanguage(String),
}
