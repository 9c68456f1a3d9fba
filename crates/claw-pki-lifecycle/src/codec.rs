//! Mapping between [`PersistedPkiState`] and the persisted blob.
//!
//! Layout, values are raw PEM bytes:
//!
//! | key           | value                       |
//! |---------------|-----------------------------|
//! | `ca.key`      | CA private key              |
//! | `ca.pub`      | CA public key               |
//! | `ca.crt`      | CA certificate              |
//! | `ca.crl`      | CA revocation list          |
//! | `<name>.crt`  | leaf certificate            |
//! | `<name>.key`  | leaf private key            |

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::ca::CertificateAuthority;
use crate::error::{Error, Result};
use crate::issuer::LeafCertificate;
use crate::object::Blob;
use crate::provider::CryptoProvider;
use crate::types::{CertName, PrivateKey, RESERVED_NAME};

/// CA private key field.
pub const CA_KEY: &str = "ca.key";
/// CA public key field.
pub const CA_PUBLIC_KEY: &str = "ca.pub";
/// CA certificate field.
pub const CA_CERT: &str = "ca.crt";
/// CA revocation list field.
pub const CA_CRL: &str = "ca.crl";
/// Suffix of leaf certificate fields.
pub const CERT_SUFFIX: &str = ".crt";
/// Suffix of leaf private key fields.
pub const KEY_SUFFIX: &str = ".key";

const CA_FIELDS: [&str; 4] = [CA_KEY, CA_PUBLIC_KEY, CA_CERT, CA_CRL];

/// Everything the PKI keeps between passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedPkiState {
    ca: Option<CertificateAuthority>,
    leaves: BTreeMap<CertName, LeafCertificate>,
}

impl PersistedPkiState {
    /// Creates a state holding only `ca`.
    #[must_use]
    pub fn with_ca(ca: CertificateAuthority) -> Self {
        Self {
            ca: Some(ca),
            leaves: BTreeMap::new(),
        }
    }

    /// Returns the CA, if one is loaded.
    #[must_use]
    pub const fn ca(&self) -> Option<&CertificateAuthority> {
        self.ca.as_ref()
    }

    /// Returns the leaves keyed by name.
    #[must_use]
    pub const fn leaves(&self) -> &BTreeMap<CertName, LeafCertificate> {
        &self.leaves
    }

    /// Returns one leaf.
    #[must_use]
    pub fn leaf(&self, name: &CertName) -> Option<&LeafCertificate> {
        self.leaves.get(name)
    }

    /// Returns the set of leaf names.
    #[must_use]
    pub fn leaf_names(&self) -> BTreeSet<CertName> {
        self.leaves.keys().cloned().collect()
    }

    /// Inserts or replaces a leaf under its own name.
    pub fn insert_leaf(&mut self, leaf: LeafCertificate) {
        self.leaves.insert(leaf.name().clone(), leaf);
    }

    /// Removes a leaf.
    pub fn remove_leaf(&mut self, name: &CertName) -> Option<LeafCertificate> {
        self.leaves.remove(name)
    }
}

/// How much of the CA was found in the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaStatus {
    /// None of the CA fields are present.
    Absent,
    /// Some CA fields are present, the listed ones are missing or empty.
    Incomplete {
        /// Missing fields.
        missing: Vec<&'static str>,
    },
    /// The CA loaded.
    Loaded,
}

/// A leaf entry that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLeaf {
    /// Name taken from the blob key, possibly invalid.
    pub name: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of decoding a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedState {
    /// The decoded state.
    pub state: PersistedPkiState,
    /// What happened to the CA fields.
    pub ca_status: CaStatus,
    /// Leaves that were present but unreadable.
    pub skipped: Vec<SkippedLeaf>,
    /// Fields that belong to neither the CA nor a leaf; never re-encoded.
    pub unknown: Vec<String>,
}

/// Decodes a persisted blob.
///
/// A partial CA decodes as no CA. Unreadable leaves are skipped and reported.
/// A leaf only decodes when its private key loads and matches its
/// certificate. Fields outside the layout are listed in
/// [`DecodedState::unknown`].
///
/// # Errors
///
/// Returns [`Error::StateUnreadable`] when all four CA fields are present but
/// do not load.
pub fn decode<P: CryptoProvider + ?Sized>(provider: &P, blob: &Blob) -> Result<DecodedState> {
    let missing: Vec<&'static str> = CA_FIELDS
        .into_iter()
        .filter(|key| field(blob, key).is_none())
        .collect();

    let ca_fields = (
        field(blob, CA_KEY),
        field(blob, CA_PUBLIC_KEY),
        field(blob, CA_CERT),
        field(blob, CA_CRL),
    );
    let (ca, ca_status) = match ca_fields {
        (Some(key), Some(public), Some(cert), Some(crl)) => {
            let ca = provider.load_ca(key, public, cert, crl).map_err(|e| match e {
                Error::Crypto { subject, reason, .. } => Error::unreadable(subject, reason),
                other => other,
            })?;
            (Some(ca), CaStatus::Loaded)
        }
        _ if missing.len() == CA_FIELDS.len() => (None, CaStatus::Absent),
        _ => {
            debug!(?missing, "certificate authority incomplete");
            (None, CaStatus::Incomplete { missing })
        }
    };

    let mut leaves = BTreeMap::new();
    let mut skipped = Vec::new();
    for (key, value) in blob {
        let Some(stem) = key.strip_suffix(CERT_SUFFIX) else {
            continue;
        };
        if stem == RESERVED_NAME {
            continue;
        }
        match decode_leaf(provider, blob, stem, value) {
            Ok(leaf) => {
                leaves.insert(leaf.name().clone(), leaf);
            }
            Err(reason) => {
                warn!(name = stem, %reason, "skipping unreadable certificate");
                skipped.push(SkippedLeaf {
                    name: stem.to_owned(),
                    reason,
                });
            }
        }
    }

    let unknown: Vec<String> = blob
        .keys()
        .filter(|key| !is_layout_field(blob, key))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        warn!(?unknown, "ignoring unrecognized fields");
    }

    debug!(
        ca = ?ca_status,
        leaves = leaves.len(),
        skipped = skipped.len(),
        "decoded PKI state"
    );

    Ok(DecodedState {
        state: PersistedPkiState { ca, leaves },
        ca_status,
        skipped,
        unknown,
    })
}

/// CA fields, any `<name>.crt`, and a `<name>.key` next to its `<name>.crt`.
fn is_layout_field(blob: &Blob, key: &str) -> bool {
    if CA_FIELDS.contains(&key) || key.ends_with(CERT_SUFFIX) {
        return true;
    }
    key.strip_suffix(KEY_SUFFIX)
        .is_some_and(|stem| blob.contains_key(&format!("{stem}{CERT_SUFFIX}")))
}

fn decode_leaf<P: CryptoProvider + ?Sized>(
    provider: &P,
    blob: &Blob,
    stem: &str,
    cert_pem: &[u8],
) -> std::result::Result<LeafCertificate, String> {
    let name = CertName::new(stem).map_err(|e| e.to_string())?;
    let key_pem = field(blob, &format!("{stem}{KEY_SUFFIX}"))
        .ok_or_else(|| "private key missing".to_owned())?;
    let certificate = provider
        .parse_certificate_pem(cert_pem)
        .map_err(|e| e.to_string())?;
    provider
        .verify_key_pair(&certificate, key_pem)
        .map_err(|e| e.to_string())?;
    let key_pem = String::from_utf8(key_pem.to_vec()).map_err(|e| e.to_string())?;
    Ok(LeafCertificate::from_parts(
        name,
        certificate,
        PrivateKey::new(key_pem),
    ))
}

/// Returns a field's bytes; empty values count as absent.
fn field<'a>(blob: &'a Blob, key: &str) -> Option<&'a [u8]> {
    blob.get(key)
        .map(Vec::as_slice)
        .filter(|value| !value.is_empty())
}

/// Encodes state into a blob. Untouched PEM text round-trips byte for byte.
#[must_use]
pub fn encode(state: &PersistedPkiState) -> Blob {
    let mut blob = Blob::new();
    if let Some(ca) = state.ca() {
        blob.insert(CA_KEY.into(), ca.private_key().pem().as_bytes().to_vec());
        blob.insert(CA_PUBLIC_KEY.into(), ca.public_key().as_bytes().to_vec());
        blob.insert(CA_CERT.into(), ca.certificate().pem().as_bytes().to_vec());
        blob.insert(CA_CRL.into(), ca.revocation_list().as_bytes().to_vec());
    }
    for (name, leaf) in state.leaves() {
        blob.insert(
            format!("{name}{CERT_SUFFIX}"),
            leaf.certificate().pem().as_bytes().to_vec(),
        );
        blob.insert(
            format!("{name}{KEY_SUFFIX}"),
            leaf.private_key().pem().as_bytes().to_vec(),
        );
    }
    blob
}
