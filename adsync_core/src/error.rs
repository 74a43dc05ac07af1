use std::error::Error as StdError;

/// Common error type for `adsync_core`.
///
/// Store backends should preserve the underlying error chain where possible via
/// `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Input the caller has to fix: unknown entity type, a record that is not a field
    /// mapping, a missing linkage field, bad configuration. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Keyed lookup found nothing. Expected and non-fatal.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "adsync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
