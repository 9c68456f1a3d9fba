//! Leaf certificate requests, issuance, and per-leaf lifecycle checks.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::ca::CertificateAuthority;
use crate::config::RenewalPolicy;
use crate::error::{Error, Result};
use crate::provider::CryptoProvider;
use crate::types::{CertName, Certificate, PrivateKey, SubjectAltName};
use crate::validation::renewal_due;

/// Request to issue one named leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRequest {
    name: CertName,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
}

impl LeafRequest {
    /// Creates a request builder. The name is always the first DNS SAN.
    #[must_use]
    pub fn builder(name: CertName) -> LeafRequestBuilder {
        LeafRequestBuilder {
            dns_names: vec![name.as_str().to_owned()],
            ip_addresses: Vec::new(),
            name,
        }
    }

    /// Returns the certificate name.
    #[must_use]
    pub const fn name(&self) -> &CertName {
        &self.name
    }

    /// Returns the DNS SANs, starting with the name.
    #[must_use]
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// Returns the IP SANs.
    #[must_use]
    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }

    /// Returns all SANs, DNS names first.
    #[must_use]
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        self.dns_names
            .iter()
            .cloned()
            .map(SubjectAltName::Dns)
            .chain(self.ip_addresses.iter().copied().map(SubjectAltName::Ip))
            .collect()
    }
}

/// Builder for leaf requests. Duplicate SANs are dropped, first one wins.
#[derive(Debug)]
pub struct LeafRequestBuilder {
    name: CertName,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
}

impl LeafRequestBuilder {
    /// Adds a DNS subject alternative name.
    #[must_use]
    pub fn dns(mut self, dns: impl Into<String>) -> Self {
        let dns = dns.into();
        if !self.dns_names.contains(&dns) {
            self.dns_names.push(dns);
        }
        self
    }

    /// Adds an IP subject alternative name.
    #[must_use]
    pub fn ip(mut self, ip: IpAddr) -> Self {
        if !self.ip_addresses.contains(&ip) {
            self.ip_addresses.push(ip);
        }
        self
    }

    /// Builds the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a DNS name is blank, contains whitespace,
    /// or is not ASCII.
    pub fn build(self) -> Result<LeafRequest> {
        for dns in &self.dns_names {
            if dns.is_empty() || dns.chars().any(char::is_whitespace) || !dns.is_ascii() {
                return Err(Error::Config(format!(
                    "certificate '{}': invalid DNS SAN '{dns}'",
                    self.name
                )));
            }
        }
        Ok(LeafRequest {
            name: self.name,
            dns_names: self.dns_names,
            ip_addresses: self.ip_addresses,
        })
    }
}

/// An issued leaf certificate with its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct LeafCertificate {
    name: CertName,
    certificate: Certificate,
    private_key: PrivateKey,
}

impl LeafCertificate {
    /// Assembles a leaf from its parts.
    #[must_use]
    pub const fn from_parts(
        name: CertName,
        certificate: Certificate,
        private_key: PrivateKey,
    ) -> Self {
        Self {
            name,
            certificate,
            private_key,
        }
    }

    /// Returns the leaf name.
    #[must_use]
    pub const fn name(&self) -> &CertName {
        &self.name
    }

    /// Returns the certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns the private key.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Returns the DNS SANs embedded in the certificate.
    #[must_use]
    pub fn subject_alt_names(&self) -> Vec<&str> {
        self.certificate.dns_names()
    }

    /// Returns the IP SANs embedded in the certificate.
    #[must_use]
    pub fn subject_alt_ips(&self) -> Vec<IpAddr> {
        self.certificate.ip_addresses()
    }
}

impl std::fmt::Debug for LeafCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCertificate")
            .field("name", &self.name)
            .field("not_after", &self.certificate.not_after())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Result of comparing desired and current leaf names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameDiff {
    /// Desired but not present.
    pub added: BTreeSet<CertName>,
    /// Present but no longer desired.
    pub removed: BTreeSet<CertName>,
}

impl NameDiff {
    /// Returns `true` when nothing was added or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Plain set difference in both directions, iterated in sorted order.
#[must_use]
pub fn diff_names(desired: &BTreeSet<CertName>, current: &BTreeSet<CertName>) -> NameDiff {
    NameDiff {
        added: desired.difference(current).cloned().collect(),
        removed: current.difference(desired).cloned().collect(),
    }
}

/// Issues leaf certificates and evaluates their lifecycle.
pub struct LeafIssuer<'a, P: CryptoProvider + ?Sized> {
    provider: &'a P,
}

impl<'a, P: CryptoProvider + ?Sized> LeafIssuer<'a, P> {
    /// Creates an issuer.
    #[must_use]
    pub const fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Issues a leaf signed by `ca`.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub fn issue(
        &self,
        ca: &CertificateAuthority,
        request: &LeafRequest,
        policy: &RenewalPolicy,
        now: DateTime<Utc>,
    ) -> Result<LeafCertificate> {
        self.provider.issue_certificate(
            ca,
            request,
            policy.validity_days,
            policy.key_bit_size,
            now,
        )
    }

    /// Returns `true` when the leaf is inside the renewal window.
    #[must_use]
    pub fn needs_renewal(
        &self,
        leaf: &LeafCertificate,
        policy: &RenewalPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        let expiry = self.provider.certificate_expiry(leaf.certificate());
        let due = renewal_due(expiry, policy.renewal_window(), now);
        if due {
            info!(name = %leaf.name(), %expiry, "certificate inside renewal window");
        }
        due
    }

    /// Returns `true` when the leaf does not verify against `ca`.
    #[must_use]
    pub fn is_orphaned(&self, leaf: &LeafCertificate, ca: &CertificateAuthority) -> bool {
        match self.provider.verify_issued_by(leaf.certificate(), ca.certificate()) {
            Ok(()) => false,
            Err(e) => {
                info!(name = %leaf.name(), error = %e, "certificate not issued by current CA");
                true
            }
        }
    }

    /// Returns `true` when the leaf's SANs differ from the request's.
    #[must_use]
    pub fn sans_changed(&self, leaf: &LeafCertificate, request: &LeafRequest) -> bool {
        let current: BTreeSet<SubjectAltName> = leaf.certificate().san().iter().cloned().collect();
        let desired: BTreeSet<SubjectAltName> = request.subject_alt_names().into_iter().collect();
        let changed = current != desired;
        if changed {
            debug!(name = %leaf.name(), "subject alternative names changed");
        }
        changed
    }
}
