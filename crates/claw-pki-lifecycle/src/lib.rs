//! Self-signed PKI lifecycle management for Clawbernetes.
#![forbid(unsafe_code)]
//!
//! This crate keeps a root Certificate Authority and a set of named leaf
//! certificates in sync with a declared [`DesiredCertificateSet`], persisting
//! all key material in one opaque key/bytes blob.
//!
//! # Overview
//!
//! The `claw-pki-lifecycle` crate provides:
//! - CA bootstrap and full rotation when the CA or any leaf nears expiry
//! - Incremental leaf issuance, reissue on SAN changes, and removal
//! - A bit-exact blob codec (`ca.key`, `ca.pub`, `ca.crt`, `ca.crl`,
//!   `<name>.crt`, `<name>.key`)
//! - A pluggable [`CryptoProvider`] with an `rcgen`/`rsa` default
//! - A store-driven [`Reconciler`] with optimistic concurrency
//!
//! # Example
//!
//! ```
//! use claw_pki_lifecycle::{
//!     Action, CurrentObject, DesiredCertificateSet, IdentityTemplate, ObjectMeta, PkiEngine,
//!     RcgenProvider,
//! };
//!
//! let provider = RcgenProvider::new();
//! let identity = IdentityTemplate::default();
//! let engine = PkiEngine::new(&provider, &identity);
//!
//! let desired = DesiredCertificateSet::enabled().with_certificate("filebeat", ["*.domain.com"]);
//! let action = engine
//!     .reconcile(&desired, &ObjectMeta::default(), &CurrentObject::Missing, chrono::Utc::now())
//!     .unwrap();
//!
//! let Action::Write(write) = action else { unreachable!() };
//! assert_eq!(write.reasons, ["Generate new certificates"]);
//! assert!(write.object.data.contains_key("filebeat.crt"));
//! ```
//!
//! # Modules
//!
//! - [`engine`] - Reconciliation diff engine
//! - [`reconciler`] - Store-driven reconciliation pass
//! - [`ca`] - Certificate Authority state and manager
//! - [`issuer`] - Leaf certificate requests and issuance
//! - [`codec`] - Persisted blob layout
//! - [`provider`] - Cryptographic primitives
//! - [`store`] - Versioned object store
//! - [`validation`] - Expiry and chain checks
//! - [`config`] - Desired set, renewal policy, CA identity
//! - [`object`] - Persisted object and metadata
//! - [`types`] - Core types (`CertName`, `Certificate`, `PrivateKey`)
//! - [`error`] - Error types

pub mod ca;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod issuer;
pub mod object;
pub mod provider;
pub mod reconciler;
pub mod store;
pub mod types;
pub mod validation;

// Re-export commonly used types at crate root
pub use ca::{CaManager, CertificateAuthority};
pub use codec::{decode, encode, CaStatus, DecodedState, PersistedPkiState, SkippedLeaf};
pub use config::{DesiredCertificateSet, DesiredLeaf, IdentityTemplate, RenewalPolicy};
pub use engine::{Action, PkiEngine, PkiWrite, WriteKind};
pub use error::{Error, ErrorClass, Result};
pub use issuer::{
    diff_names, LeafCertificate, LeafIssuer, LeafRequest, LeafRequestBuilder, NameDiff,
};
pub use object::{Blob, CurrentObject, ObjectMeta, OwnerReference, PkiObject};
pub use provider::{CryptoProvider, RcgenProvider};
pub use reconciler::{Outcome, PkiStatus, ReconcileError, Reconciler, ReconcilerConfig};
pub use store::{MemoryStore, PkiStore, StoreError, StoreResult, Versioned};
pub use types::{CertName, Certificate, PrivateKey, SubjectAltName};
pub use validation::{renewal_due, verify_issued_by};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::net::{IpAddr, Ipv4Addr};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn full_workflow_test() {
        // 1. Configure
        let desired = DesiredCertificateSet::from_json(
            r#"{
                "enabled": true,
                "certificates": {
                    "filebeat": { "subjectAltNames": ["*.domain.com"] },
                    "fluentd": { "subjectAltIPs": ["10.0.0.5"] }
                }
            }"#,
        )
        .unwrap();
        let meta = ObjectMeta::default().with_label("app", "logging");
        let reconciler = Reconciler::new(
            RcgenProvider::new(),
            MemoryStore::new(),
            ReconcilerConfig::default(),
        );

        // 2. Bootstrap
        let outcome = reconciler.reconcile("pki", &desired, &meta, t0()).unwrap();
        assert!(matches!(outcome, Outcome::Written { kind: WriteKind::Create, .. }));

        // 3. Inspect persisted state
        let stored = reconciler.store().get("pki").unwrap().unwrap();
        let provider = RcgenProvider::new();
        let decoded = decode(&provider, &stored.value.data).unwrap();
        assert_eq!(decoded.ca_status, CaStatus::Loaded);

        let ca = decoded.state.ca().unwrap();
        let fluentd = decoded.state.leaf(&CertName::new("fluentd").unwrap()).unwrap();
        assert_eq!(fluentd.subject_alt_names(), ["fluentd"]);
        assert_eq!(fluentd.subject_alt_ips(), [IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))]);
        verify_issued_by(fluentd.certificate(), ca.certificate()).unwrap();

        // 4. Steady state
        let outcome = reconciler
            .reconcile("pki", &desired, &meta, t0() + Duration::days(100))
            .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);

        // 5. Rotation near expiry replaces the CA
        let outcome = reconciler
            .reconcile("pki", &desired, &meta, t0() + Duration::days(380))
            .unwrap();
        assert!(matches!(
            outcome,
            Outcome::Written { kind: WriteKind::Update, version: 2, ref reasons, .. }
                if reasons == &["Renew all certificates"]
        ));
        let rotated = reconciler.store().get("pki").unwrap().unwrap();
        assert_ne!(rotated.value.data["ca.key"], stored.value.data["ca.key"]);
    }
}
