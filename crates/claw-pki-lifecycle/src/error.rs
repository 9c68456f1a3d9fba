//! PKI lifecycle error types.

use thiserror::Error;

/// Result type for PKI lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// PKI lifecycle error variants.
///
/// The set is closed so callers can match on recoverability: configuration
/// errors need operator action, everything else may clear up on a later pass.
#[derive(Debug, Error)]
pub enum Error {
    /// The desired configuration is self-contradictory or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Key generation, signing, or parsing failed.
    #[error("{operation} failed for '{subject}': {reason}")]
    Crypto {
        /// The primitive that failed (e.g. "generate key pair").
        operation: &'static str,
        /// The certificate the operation was working on (`ca` or a leaf name).
        subject: String,
        /// Underlying failure.
        reason: String,
    },

    /// Persisted state exists but cannot be decoded.
    #[error("persisted PKI state unreadable ({field}): {reason}")]
    StateUnreadable {
        /// The blob field that failed to decode.
        field: String,
        /// Underlying failure.
        reason: String,
    },

    /// A prerequisite the caller should have supplied is missing.
    #[error("dependency not ready: {dependency}: {reason}")]
    DependencyNotReady {
        /// The missing dependency.
        dependency: String,
        /// Why it could not be supplied.
        reason: String,
    },
}

/// Coarse error classification surfaced through status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// See [`Error::Config`].
    Config,
    /// See [`Error::Crypto`].
    Crypto,
    /// See [`Error::StateUnreadable`].
    StateUnreadable,
    /// See [`Error::DependencyNotReady`].
    DependencyNotReady,
}

impl Error {
    /// Creates a [`Error::Crypto`] error.
    pub(crate) fn crypto(
        operation: &'static str,
        subject: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Crypto {
            operation,
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a [`Error::StateUnreadable`] error.
    pub(crate) fn unreadable(field: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::StateUnreadable {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the class of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Config,
            Self::Crypto { .. } => ErrorClass::Crypto,
            Self::StateUnreadable { .. } => ErrorClass::StateUnreadable,
            Self::DependencyNotReady { .. } => ErrorClass::DependencyNotReady,
        }
    }

    /// Returns whether retrying the same input on a later pass may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Crypto { .. } | Self::DependencyNotReady { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        let err = Error::Config("renewal window must be shorter than validity".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: renewal window must be shorter than validity"
        );

        let err = Error::crypto("sign certificate", "filebeat", "bad key");
        assert_eq!(
            err.to_string(),
            "sign certificate failed for 'filebeat': bad key"
        );

        let err = Error::unreadable("ca.crt", "not PEM");
        assert_eq!(
            err.to_string(),
            "persisted PKI state unreadable (ca.crt): not PEM"
        );
    }

    #[test]
    fn retryable_classes() {
        assert!(!Error::Config("x".into()).is_retryable());
        assert!(Error::crypto("generate key pair", "ca", "entropy").is_retryable());
        assert!(!Error::unreadable("ca.key", "garbage").is_retryable());
        assert!(Error::DependencyNotReady {
            dependency: "pki store".into(),
            reason: "timeout".into(),
        }
        .is_retryable());
    }

    #[test]
    fn class_matches_variant() {
        assert_eq!(Error::Config("x".into()).class(), ErrorClass::Config);
        assert_eq!(
            Error::unreadable("ca.crt", "x").class(),
            ErrorClass::StateUnreadable
        );
    }
}
