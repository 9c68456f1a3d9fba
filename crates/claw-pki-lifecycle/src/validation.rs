//! Certificate validation utilities.
//!
//! Every time-dependent check takes the evaluation instant explicitly so a
//! reconciliation pass sees one consistent `now`.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};
use crate::types::Certificate;

/// Returns `true` once `expiry - window < now`.
///
/// Equality does not trigger renewal.
#[must_use]
pub fn renewal_due(expiry: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    expiry - window < now
}

/// Verifies that `cert` was issued by `issuer`.
///
/// Checks that the issuer name matches the issuer's subject and that the
/// signature verifies against the issuer's public key. Validity periods are
/// not checked; expiry is handled by the renewal policy.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if either certificate cannot be parsed, the
/// names disagree, or the signature does not verify.
pub fn verify_issued_by(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    debug!(subject = cert.subject(), issuer = issuer.subject(), "verifying certificate chain");

    if cert.issuer() != issuer.subject() {
        return Err(Error::crypto(
            "verify certificate",
            cert.subject(),
            format!(
                "issuer '{}' does not match CA subject '{}'",
                cert.issuer(),
                issuer.subject()
            ),
        ));
    }

    let (_, parsed_cert) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::crypto("verify certificate", cert.subject(), e))?;
    let (_, parsed_issuer) = X509Certificate::from_der(issuer.der())
        .map_err(|e| Error::crypto("verify certificate", issuer.subject(), e))?;

    parsed_cert
        .verify_signature(Some(parsed_issuer.public_key()))
        .map_err(|e| {
            Error::crypto(
                "verify certificate",
                cert.subject(),
                format!("signature verification failed: {e:?}"),
            )
        })
}
