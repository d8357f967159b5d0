//! Login error kinds.
//!
//! Every login step resolves to either a value or one of these kinds. Handlers map
//! them to a `status` string in the response body; the internal detail carried by
//! `Unexpected` is only ever logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("needs association")]
    NeedsAssociation,
    #[error("external identity already associated with another user")]
    AlreadyAssociated,
    #[error("invalid request")]
    InvalidRequest,
    #[error("bad token")]
    BadToken,
    #[error("app forbidden: {name}")]
    AppForbidden { name: String },
    #[error("app not confirmed")]
    AppNotConfirmed,
    #[error("invalid app")]
    InvalidApp,
    #[error("unexpected error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl LoginError {
    /// Wire status string for the response body.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Unauthorized => "Unauthorized",
            Self::NeedsAssociation => "NeedsAssociation",
            Self::AlreadyAssociated => "AlreadyAssociated",
            Self::InvalidRequest => "InvalidRequest",
            Self::BadToken => "BadToken",
            Self::AppForbidden { .. } => "AppForbidden",
            Self::AppNotConfirmed => "AppNotConfirmed",
            Self::InvalidApp => "InvalidApp",
            Self::Unexpected(_) => "UnexpectedError",
        }
    }
}

impl From<sqlx::Error> for LoginError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unexpected(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_are_stable() {
        assert_eq!(LoginError::NotFound.status(), "NotFound");
        assert_eq!(LoginError::Unauthorized.status(), "Unauthorized");
        assert_eq!(
            LoginError::AppForbidden {
                name: "Desk".to_string()
            }
            .status(),
            "AppForbidden"
        );
        assert_eq!(
            LoginError::Unexpected(anyhow::anyhow!("boom")).status(),
            "UnexpectedError"
        );
    }

    #[test]
    fn unexpected_keeps_context_in_display() {
        let err = LoginError::Unexpected(anyhow::anyhow!("db down").context("insert token"));
        assert!(err.to_string().contains("insert token"));
        assert!(err.to_string().contains("db down"));
    }
}
