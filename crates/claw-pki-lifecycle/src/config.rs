//! Desired PKI configuration: renewal policy, CA identity, and the named
//! leaf certificates a cluster wants.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::issuer::LeafRequest;
use crate::types::CertName;

/// Default certificate validity in days.
pub const DEFAULT_VALIDITY_DAYS: u32 = 397;

/// Default renewal window in days.
pub const DEFAULT_RENEWAL_WINDOW_DAYS: u32 = 30;

/// Default RSA key size in bits.
pub const DEFAULT_KEY_BIT_SIZE: usize = 2048;

/// Smallest RSA key the signing backend accepts.
pub const MIN_KEY_BIT_SIZE: usize = 2048;

/// Largest RSA key the signing backend accepts.
pub const MAX_KEY_BIT_SIZE: usize = 4096;

/// How long certificates live and when they are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenewalPolicy {
    /// Validity of newly issued certificates, in days.
    pub validity_days: u32,
    /// Replace a certificate once it is this close to expiry, in days.
    pub renewal_window_days: u32,
    /// RSA key size for newly generated keys.
    pub key_bit_size: usize,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            validity_days: DEFAULT_VALIDITY_DAYS,
            renewal_window_days: DEFAULT_RENEWAL_WINDOW_DAYS,
            key_bit_size: DEFAULT_KEY_BIT_SIZE,
        }
    }
}

impl RenewalPolicy {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the policy is inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.validity_days == 0 {
            return Err(Error::Config("validityDays must be greater than 0".into()));
        }
        if self.renewal_window_days >= self.validity_days {
            return Err(Error::Config(format!(
                "renewalWindowDays ({}) must be shorter than validityDays ({})",
                self.renewal_window_days, self.validity_days
            )));
        }
        if !(MIN_KEY_BIT_SIZE..=MAX_KEY_BIT_SIZE).contains(&self.key_bit_size) {
            return Err(Error::Config(format!(
                "keyBitSize {} outside supported range {MIN_KEY_BIT_SIZE}..={MAX_KEY_BIT_SIZE}",
                self.key_bit_size
            )));
        }
        Ok(())
    }

    /// Returns the certificate validity as a duration.
    #[must_use]
    pub fn validity(&self) -> Duration {
        Duration::days(i64::from(self.validity_days))
    }

    /// Returns the renewal window as a duration.
    #[must_use]
    pub fn renewal_window(&self) -> Duration {
        Duration::days(i64::from(self.renewal_window_days))
    }
}

/// Subject fields of the root CA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityTemplate {
    /// CA common name; stable for the lifetime of the system.
    pub common_name: String,
    /// Organization (O).
    pub organization: String,
    /// Locality (L).
    pub locality: String,
    /// Country (C).
    pub country: String,
}

impl Default for IdentityTemplate {
    fn default() -> Self {
        Self {
            common_name: "Clawbernetes PKI Root CA".into(),
            organization: "Clawbernetes".into(),
            locality: "Cluster".into(),
            country: "US".into(),
        }
    }
}

impl IdentityTemplate {
    /// Validates the template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the common name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.common_name.trim().is_empty() {
            return Err(Error::Config("CA commonName cannot be empty".into()));
        }
        Ok(())
    }
}

/// SANs requested for one leaf certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesiredLeaf {
    /// Extra DNS names; the leaf name is always the first DNS SAN.
    pub subject_alt_names: Vec<String>,
    /// IP literals.
    #[serde(rename = "subjectAltIPs", alias = "subjectAltIps")]
    pub subject_alt_ips: Vec<String>,
}

/// Declarative PKI input for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesiredCertificateSet {
    /// Whether PKI is managed at all.
    pub enabled: bool,
    /// Overrides [`RenewalPolicy::validity_days`].
    pub validity_days: Option<u32>,
    /// Overrides [`RenewalPolicy::renewal_window_days`].
    pub renewal_window_days: Option<u32>,
    /// Overrides [`RenewalPolicy::key_bit_size`].
    pub key_bit_size: Option<usize>,
    /// Leaf certificates keyed by name.
    pub certificates: BTreeMap<String, DesiredLeaf>,
}

impl DesiredCertificateSet {
    /// Creates an enabled set with no certificates.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Adds a leaf certificate with the given extra DNS names.
    #[must_use]
    pub fn with_certificate<I, S>(mut self, name: impl Into<String>, dns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.certificates.insert(
            name.into(),
            DesiredLeaf {
                subject_alt_names: dns.into_iter().map(Into::into).collect(),
                subject_alt_ips: Vec::new(),
            },
        );
        self
    }

    /// Parses a set from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON does not match the schema.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid certificate set: {e}")))
    }

    /// Resolves the effective renewal policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the overrides produce an invalid policy.
    pub fn policy(&self) -> Result<RenewalPolicy> {
        let defaults = RenewalPolicy::default();
        let policy = RenewalPolicy {
            validity_days: self.validity_days.unwrap_or(defaults.validity_days),
            renewal_window_days: self
                .renewal_window_days
                .unwrap_or(defaults.renewal_window_days),
            key_bit_size: self.key_bit_size.unwrap_or(defaults.key_bit_size),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Builds validated issuance requests for every desired leaf.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid names, empty DNS names, or IP
    /// literals that do not parse.
    pub fn leaf_requests(&self) -> Result<BTreeMap<CertName, LeafRequest>> {
        self.certificates
            .iter()
            .map(|(name, leaf)| {
                let name = CertName::new(name.as_str())?;
                let mut builder = LeafRequest::builder(name.clone());
                for dns in &leaf.subject_alt_names {
                    builder = builder.dns(dns.as_str());
                }
                for ip in &leaf.subject_alt_ips {
                    let addr: IpAddr = ip.parse().map_err(|e| {
                        Error::Config(format!("certificate '{name}': invalid IP SAN '{ip}': {e}"))
                    })?;
                    builder = builder.ip(addr);
                }
                Ok((name, builder.build()?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn renewal_policy_defaults() {
        let policy = RenewalPolicy::default();
        assert_eq!(policy.validity_days, 397);
        assert_eq!(policy.renewal_window_days, 30);
        assert_eq!(policy.key_bit_size, 2048);
        policy.validate().expect("defaults are valid");
    }

    #[test_case(0, 0, 2048 ; "zero validity")]
    #[test_case(30, 30, 2048 ; "window equals validity")]
    #[test_case(30, 60, 2048 ; "window exceeds validity")]
    #[test_case(397, 30, 1024 ; "key too small")]
    #[test_case(397, 30, 8192 ; "key too large")]
    fn renewal_policy_invalid(validity: u32, window: u32, bits: usize) {
        let policy = RenewalPolicy {
            validity_days: validity,
            renewal_window_days: window,
            key_bit_size: bits,
        };
        assert!(matches!(policy.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn policy_applies_overrides() {
        let set = DesiredCertificateSet {
            validity_days: Some(90),
            renewal_window_days: Some(7),
            key_bit_size: Some(3072),
            ..DesiredCertificateSet::enabled()
        };
        let policy = set.policy().expect("valid policy");
        assert_eq!(policy.validity_days, 90);
        assert_eq!(policy.renewal_window_days, 7);
        assert_eq!(policy.key_bit_size, 3072);
        assert_eq!(policy.validity(), Duration::days(90));
        assert_eq!(policy.renewal_window(), Duration::days(7));
    }

    #[test]
    fn policy_rejects_window_override_past_validity() {
        let set = DesiredCertificateSet {
            validity_days: Some(10),
            ..DesiredCertificateSet::enabled()
        };
        assert!(set.policy().is_err());
    }

    #[test]
    fn from_json_camel_case() {
        let set = DesiredCertificateSet::from_json(
            r#"{
                "enabled": true,
                "validityDays": 397,
                "renewalWindowDays": 30,
                "certificates": {
                    "filebeat": { "subjectAltNames": ["*.domain.com"] },
                    "fluentd": { "subjectAltIPs": ["10.0.0.1"] }
                }
            }"#,
        )
        .expect("parse");

        assert!(set.enabled);
        assert_eq!(set.validity_days, Some(397));
        assert_eq!(set.certificates.len(), 2);
        assert_eq!(
            set.certificates["filebeat"].subject_alt_names,
            vec!["*.domain.com".to_string()]
        );
    }

    #[test]
    fn from_json_defaults_to_disabled() {
        let set = DesiredCertificateSet::from_json("{}").expect("parse");
        assert!(!set.enabled);
        assert!(set.certificates.is_empty());
    }

    #[test]
    fn from_json_rejects_wrong_types() {
        let result = DesiredCertificateSet::from_json(r#"{"enabled": "yes"}"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn leaf_requests_prepend_name() {
        let set = DesiredCertificateSet::enabled().with_certificate("filebeat", ["*.domain.com"]);
        let requests = set.leaf_requests().expect("valid");
        let name = CertName::new("filebeat").expect("valid name");
        assert_eq!(requests[&name].dns_names(), ["filebeat", "*.domain.com"]);
    }

    #[test]
    fn leaf_requests_reject_bad_ip() {
        let mut set = DesiredCertificateSet::enabled();
        set.certificates.insert(
            "filebeat".into(),
            DesiredLeaf {
                subject_alt_names: Vec::new(),
                subject_alt_ips: vec!["10.0.0.300".into()],
            },
        );
        assert!(matches!(set.leaf_requests(), Err(Error::Config(_))));
    }

    #[test]
    fn leaf_requests_reject_reserved_name() {
        let set = DesiredCertificateSet::enabled().with_certificate("ca", Vec::<String>::new());
        assert!(matches!(set.leaf_requests(), Err(Error::Config(_))));
    }

    #[test]
    fn leaf_requests_reject_empty_dns() {
        let set = DesiredCertificateSet::enabled().with_certificate("filebeat", [" "]);
        assert!(matches!(set.leaf_requests(), Err(Error::Config(_))));
    }

    #[test]
    fn identity_template_requires_common_name() {
        let identity = IdentityTemplate {
            common_name: String::new(),
            ..IdentityTemplate::default()
        };
        assert!(identity.validate().is_err());
        IdentityTemplate::default().validate().expect("default is valid");
    }
}
