//! Reconciliation diff engine.
//!
//! One call compares the desired certificate set against a snapshot of the
//! persisted object and describes at most one write. The engine performs no
//! I/O; the caller applies the write.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::ca::CaManager;
use crate::codec::{self, CaStatus, DecodedState, PersistedPkiState};
use crate::config::{DesiredCertificateSet, IdentityTemplate, RenewalPolicy};
use crate::error::{Error, Result};
use crate::issuer::{diff_names, LeafIssuer, LeafRequest};
use crate::object::{CurrentObject, ObjectMeta, PkiObject};
use crate::provider::CryptoProvider;
use crate::types::CertName;

/// Dependency name reported when the persisted object cannot be read.
pub const PKI_OBJECT_DEPENDENCY: &str = "pki object";

const REASON_BOOTSTRAP: &str = "Generate new certificates";
const REASON_ROTATE: &str = "Renew all certificates";
const REASON_METADATA: &str = "Update metadata";

/// How the described write relates to the current object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WriteKind {
    /// No object existed.
    Create,
    /// Certificate data changed.
    Update,
    /// Only metadata changed; data bytes are the current ones.
    MetadataOnly,
}

/// A write the caller should apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiWrite {
    /// Create, update, or metadata only.
    pub kind: WriteKind,
    /// The full object to persist.
    pub object: PkiObject,
    /// The state encoded in `object.data`.
    pub state: PersistedPkiState,
    /// Human-readable change reasons, in the order they were decided.
    pub reasons: Vec<String>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do.
    NoOp,
    /// Persist this write.
    Write(Box<PkiWrite>),
}

impl Action {
    /// Returns the write, if any.
    #[must_use]
    pub fn write(&self) -> Option<&PkiWrite> {
        match self {
            Self::NoOp => None,
            Self::Write(write) => Some(&**write),
        }
    }
}

/// Drives CA bootstrap, rotation, and incremental leaf changes.
pub struct PkiEngine<'a, P: CryptoProvider + ?Sized> {
    provider: &'a P,
    identity: &'a IdentityTemplate,
}

impl<'a, P: CryptoProvider + ?Sized> PkiEngine<'a, P> {
    /// Creates an engine for one pass.
    #[must_use]
    pub const fn new(provider: &'a P, identity: &'a IdentityTemplate) -> Self {
        Self { provider, identity }
    }

    /// Computes the action that brings `current` in line with `desired`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the desired set is invalid
    /// - [`Error::DependencyNotReady`] if `current` is unavailable
    /// - [`Error::StateUnreadable`] if the persisted CA cannot be loaded
    /// - [`Error::Crypto`] if key generation or signing fails
    pub fn reconcile(
        &self,
        desired: &DesiredCertificateSet,
        desired_meta: &ObjectMeta,
        current: &CurrentObject,
        now: DateTime<Utc>,
    ) -> Result<Action> {
        if !desired.enabled {
            debug!("PKI disabled, leaving persisted state untouched");
            return Ok(Action::NoOp);
        }

        let policy = desired.policy()?;
        let requests = desired.leaf_requests()?;

        let existing = match current {
            CurrentObject::Unavailable { reason } => {
                return Err(Error::DependencyNotReady {
                    dependency: PKI_OBJECT_DEPENDENCY.into(),
                    reason: reason.clone(),
                });
            }
            CurrentObject::Missing => None,
            CurrentObject::Found(object) => Some(object),
        };

        let decoded = match existing {
            Some(object) => codec::decode(self.provider, &object.data)?,
            None => DecodedState {
                state: PersistedPkiState::default(),
                ca_status: CaStatus::Absent,
                skipped: Vec::new(),
                unknown: Vec::new(),
            },
        };

        let ca_manager = CaManager::new(self.provider, self.identity);
        let issuer = LeafIssuer::new(self.provider);

        let ca = match decoded.state.ca() {
            Some(ca) if !ca_manager.needs_bootstrap(&decoded) => ca,
            _ => {
                info!(
                    ca = ?decoded.ca_status,
                    certificates = requests.len(),
                    "bootstrapping PKI"
                );
                let state = self.regenerate(&requests, &policy, now)?;
                let reasons = with_dropped_fields(REASON_BOOTSTRAP, &decoded);
                return Ok(write_action(existing, desired_meta, state, reasons));
            }
        };

        let rotate = ca_manager.needs_rotation(ca, &policy, now)
            || decoded.state.leaves().values().any(|leaf| {
                issuer.needs_renewal(leaf, &policy, now) || issuer.is_orphaned(leaf, ca)
            });
        if rotate {
            info!(
                certificates = requests.len(),
                "rotating certificate authority and all certificates"
            );
            let state = self.regenerate(&requests, &policy, now)?;
            let reasons = with_dropped_fields(REASON_ROTATE, &decoded);
            return Ok(write_action(existing, desired_meta, state, reasons));
        }

        let desired_names: BTreeSet<CertName> = requests.keys().cloned().collect();
        let diff = diff_names(&desired_names, &decoded.state.leaf_names());

        let mut state = decoded.state.clone();
        let mut reasons = Vec::new();
        for (name, request) in &requests {
            if diff.added.contains(name) {
                state.insert_leaf(issuer.issue(ca, request, &policy, now)?);
                reasons.push(format!("Add certificate for {name}"));
            } else if decoded
                .state
                .leaf(name)
                .is_some_and(|leaf| issuer.sans_changed(leaf, request))
            {
                state.insert_leaf(issuer.issue(ca, request, &policy, now)?);
                reasons.push(format!("Update certificate for {name}"));
            }
        }
        for name in &diff.removed {
            state.remove_leaf(name);
            reasons.push(format!("Remove certificate for {name}"));
        }
        for skipped in &decoded.skipped {
            if !desired.certificates.contains_key(&skipped.name) {
                reasons.push(format!("Remove certificate for {}", skipped.name));
            }
        }
        reasons.extend(decoded.unknown.iter().map(|key| drop_reason(key)));

        if !reasons.is_empty() {
            info!(changes = reasons.len(), "updating certificates");
            return Ok(write_action(existing, desired_meta, state, reasons));
        }

        match existing {
            Some(object) if !desired_meta.is_satisfied_by(&object.metadata) => {
                info!("updating PKI object metadata");
                Ok(Action::Write(Box::new(PkiWrite {
                    kind: WriteKind::MetadataOnly,
                    object: PkiObject {
                        metadata: desired_meta.merged_onto(&object.metadata),
                        data: object.data.clone(),
                    },
                    state,
                    reasons: vec![REASON_METADATA.into()],
                })))
            }
            _ => {
                debug!("PKI up to date");
                Ok(Action::NoOp)
            }
        }
    }

    /// Creates a fresh CA, then issues every requested leaf against it.
    fn regenerate(
        &self,
        requests: &BTreeMap<CertName, LeafRequest>,
        policy: &RenewalPolicy,
        now: DateTime<Utc>,
    ) -> Result<PersistedPkiState> {
        let ca = CaManager::new(self.provider, self.identity).create(policy, now)?;
        let issuer = LeafIssuer::new(self.provider);
        let leaves = requests
            .values()
            .map(|request| issuer.issue(&ca, request, policy, now))
            .collect::<Result<Vec<_>>>()?;

        let mut state = PersistedPkiState::with_ca(ca);
        for leaf in leaves {
            state.insert_leaf(leaf);
        }
        Ok(state)
    }
}

fn drop_reason(key: &str) -> String {
    format!("Remove unrecognized field {key}")
}

fn with_dropped_fields(reason: &str, decoded: &DecodedState) -> Vec<String> {
    std::iter::once(reason.to_owned())
        .chain(decoded.unknown.iter().map(|key| drop_reason(key)))
        .collect()
}

fn write_action(
    existing: Option<&PkiObject>,
    desired_meta: &ObjectMeta,
    state: PersistedPkiState,
    reasons: Vec<String>,
) -> Action {
    let (kind, metadata) = match existing {
        Some(object) => (WriteKind::Update, desired_meta.merged_onto(&object.metadata)),
        None => (WriteKind::Create, desired_meta.clone()),
    };
    Action::Write(Box::new(PkiWrite {
        kind,
        object: PkiObject {
            metadata,
            data: codec::encode(&state),
        },
        state,
        reasons,
    }))
}
