//! Caller-side reconciliation: read the store, run the engine, apply the write.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::codec::PersistedPkiState;
use crate::config::{DesiredCertificateSet, IdentityTemplate};
use crate::engine::{Action, PkiEngine, PkiWrite, WriteKind};
use crate::error::{Error, ErrorClass};
use crate::object::{CurrentObject, ObjectMeta};
use crate::provider::CryptoProvider;
use crate::store::{PkiStore, StoreError};
use crate::types::CertName;

/// Default delay before retrying when a dependency is not ready.
pub const DEFAULT_NOT_READY_BACKOFF_SECS: u64 = 10;

/// Reconciler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    /// Identity of the root CA.
    pub identity: IdentityTemplate,
    /// Requeue delay when the persisted object cannot be read.
    pub not_ready_backoff_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            identity: IdentityTemplate::default(),
            not_ready_backoff_secs: DEFAULT_NOT_READY_BACKOFF_SECS,
        }
    }
}

impl ReconcilerConfig {
    /// Parses settings from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed or the identity is
    /// invalid.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid reconciler config: {e}")))?;
        config.identity.validate()?;
        Ok(config)
    }

    /// Returns the not-ready backoff.
    #[must_use]
    pub const fn not_ready_backoff(&self) -> Duration {
        Duration::from_secs(self.not_ready_backoff_secs)
    }
}

/// Errors that end a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The engine rejected the pass.
    #[error(transparent)]
    Pki(#[from] Error),

    /// The store rejected the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Returns whether running the pass again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Pki(e) => e.is_retryable(),
            Self::Store(e) => !matches!(e, StoreError::NotFound(_)),
        }
    }
}

/// Expiry summary of a written state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkiStatus {
    /// CA common name.
    pub ca_common_name: Option<String>,
    /// CA expiry.
    pub ca_not_after: Option<DateTime<Utc>>,
    /// Leaf expiry by name.
    pub certificates: BTreeMap<CertName, DateTime<Utc>>,
}

impl PkiStatus {
    /// Summarizes a state.
    #[must_use]
    pub fn from_state(state: &PersistedPkiState) -> Self {
        Self {
            ca_common_name: state.ca().map(|ca| ca.common_name().to_owned()),
            ca_not_after: state.ca().map(|ca| ca.certificate().not_after()),
            certificates: state
                .leaves()
                .iter()
                .map(|(name, leaf)| (name.clone(), leaf.certificate().not_after()))
                .collect(),
        }
    }
}

/// Result of a pass that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing needed to change.
    Unchanged,
    /// A write was applied.
    Written {
        /// Kind of write.
        kind: WriteKind,
        /// Version of the object after the write.
        version: u64,
        /// Why the write happened.
        reasons: Vec<String>,
        /// Summary of the written state.
        status: PkiStatus,
    },
    /// A dependency was missing; run the pass again later.
    NotReady {
        /// When to run again.
        requeue_after: Duration,
        /// The missing dependency.
        dependency: String,
        /// Why it was missing.
        reason: String,
    },
}

impl Outcome {
    /// Returns the error class a status condition should report, if any.
    #[must_use]
    pub const fn error_class(&self) -> Option<ErrorClass> {
        match self {
            Self::NotReady { .. } => Some(ErrorClass::DependencyNotReady),
            Self::Unchanged | Self::Written { .. } => None,
        }
    }
}

/// Runs reconciliation passes against one store.
pub struct Reconciler<P, S> {
    provider: P,
    store: S,
    config: ReconcilerConfig,
}

impl<P: CryptoProvider, S: PkiStore> Reconciler<P, S> {
    /// Creates a reconciler.
    #[must_use]
    pub const fn new(provider: P, store: S, config: ReconcilerConfig) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    /// Returns the store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Runs one pass for the object at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Pki`] for configuration, crypto, and
    /// unreadable-state failures, and [`ReconcileError::Store`] when the
    /// write is rejected (including version conflicts).
    pub fn reconcile(
        &self,
        key: &str,
        desired: &DesiredCertificateSet,
        desired_meta: &ObjectMeta,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ReconcileError> {
        let (current, version) = match self.store.get(key) {
            Ok(Some(read)) => (CurrentObject::Found(read.value), Some(read.version)),
            Ok(None) => (CurrentObject::Missing, None),
            Err(StoreError::Unavailable(reason)) => (CurrentObject::Unavailable { reason }, None),
            Err(e) => return Err(e.into()),
        };

        let engine = PkiEngine::new(&self.provider, &self.config.identity);
        let write = match engine.reconcile(desired, desired_meta, &current, now) {
            Ok(Action::NoOp) => return Ok(Outcome::Unchanged),
            Ok(Action::Write(write)) => *write,
            Err(Error::DependencyNotReady { dependency, reason }) => {
                let requeue_after = self.config.not_ready_backoff();
                warn!(
                    key,
                    %dependency,
                    %reason,
                    ?requeue_after,
                    "dependency not ready, requeueing"
                );
                return Ok(Outcome::NotReady {
                    requeue_after,
                    dependency,
                    reason,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let PkiWrite {
            kind,
            object,
            state,
            reasons,
        } = write;
        let version = match version {
            Some(expected) => self.store.update(key, object, expected)?,
            None => self.store.create(key, object)?,
        };

        info!(key, ?kind, version, reasons = ?reasons, "PKI object written");
        Ok(Outcome::Written {
            kind,
            version,
            reasons,
            status: PkiStatus::from_state(&state),
        })
    }
}
