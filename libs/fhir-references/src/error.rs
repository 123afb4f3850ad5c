//! Error types for reference rewriting

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] lumen_models::Error),

    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("no sourceAssigningAuthority security tag on {resource}")]
    MissingSourceAssigningAuthority { resource: String },

    #[error("reference rewrite timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Model(err) => err.is_client_error(),
            Self::InvalidReference { .. } | Self::MissingSourceAssigningAuthority { .. } => true,
            Self::Timeout(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
