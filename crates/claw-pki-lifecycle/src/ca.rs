//! Certificate Authority state and the bootstrap/rotation decisions around it.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::codec::DecodedState;
use crate::config::{IdentityTemplate, RenewalPolicy};
use crate::error::Result;
use crate::provider::CryptoProvider;
use crate::types::{Certificate, PrivateKey};
use crate::validation::renewal_due;

/// Root CA key material. All four parts are always present together.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateAuthority {
    certificate: Certificate,
    private_key: PrivateKey,
    public_key: String,
    revocation_list: String,
}

impl CertificateAuthority {
    /// Assembles a CA from already validated parts.
    ///
    /// Providers are responsible for checking that the parts belong together.
    #[must_use]
    pub const fn from_parts(
        certificate: Certificate,
        private_key: PrivateKey,
        public_key: String,
        revocation_list: String,
    ) -> Self {
        Self {
            certificate,
            private_key,
            public_key,
            revocation_list,
        }
    }

    /// Returns the CA common name.
    #[must_use]
    pub fn common_name(&self) -> &str {
        self.certificate.subject()
    }

    /// Returns the self-signed CA certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns the CA private key.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Returns the PEM-encoded CA public key.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Returns the PEM-encoded certificate revocation list.
    #[must_use]
    pub fn revocation_list(&self) -> &str {
        &self.revocation_list
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("common_name", &self.common_name())
            .field("not_after", &self.certificate.not_after())
            .field("private_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Owns CA bootstrap, expiry evaluation, and rotation.
pub struct CaManager<'a, P: CryptoProvider + ?Sized> {
    provider: &'a P,
    identity: &'a IdentityTemplate,
}

impl<'a, P: CryptoProvider + ?Sized> CaManager<'a, P> {
    /// Creates a manager that issues CAs with the given identity.
    #[must_use]
    pub const fn new(provider: &'a P, identity: &'a IdentityTemplate) -> Self {
        Self { provider, identity }
    }

    /// Returns `true` when no usable CA was decoded (absent or incomplete).
    #[must_use]
    pub fn needs_bootstrap(&self, decoded: &DecodedState) -> bool {
        decoded.state.ca().is_none()
    }

    /// Returns `true` when the CA certificate is inside the renewal window.
    #[must_use]
    pub fn needs_rotation(
        &self,
        ca: &CertificateAuthority,
        policy: &RenewalPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        let expiry = self.provider.certificate_expiry(ca.certificate());
        let due = renewal_due(expiry, policy.renewal_window(), now);
        if due {
            info!(%expiry, "certificate authority inside renewal window");
        } else {
            debug!(%expiry, "certificate authority still valid");
        }
        due
    }

    /// Creates a fresh CA.
    ///
    /// # Errors
    ///
    /// Propagates provider failures; nothing is returned on partial success.
    pub fn create(
        &self,
        policy: &RenewalPolicy,
        now: DateTime<Utc>,
    ) -> Result<CertificateAuthority> {
        self.identity.validate()?;
        self.provider
            .generate_ca(self.identity, policy.validity_days, policy.key_bit_size, now)
    }
}
