use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{fanout::FanoutError, feed::FeedError, repos::RepoError},
    infra::error::InfraError,
};

/// Error chain of a failure, outermost first, for structured reporting.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Fanout(#[from] FanoutError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Errors caused by the invocation rather than by the system.
    pub fn is_client_error(&self) -> bool {
        match self {
            AppError::Validation(_)
            | AppError::Fanout(FanoutError::PostNotFound(_)) => true,
            AppError::Feed(err) => err.is_client_error(),
            _ => false,
        }
    }
}
