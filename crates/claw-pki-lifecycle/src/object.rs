//! The persisted PKI object and its metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque key to bytes payload of the persisted object.
pub type Blob = BTreeMap<String, Vec<u8>>;

/// Reference to the object that owns the persisted PKI object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the owner.
    pub api_version: String,
    /// Kind of the owner.
    pub kind: String,
    /// Name of the owner.
    pub name: String,
    /// Unique id of the owner.
    pub uid: String,
    /// Whether the owner is the managing controller.
    #[serde(default)]
    pub controller: bool,
}

/// Labels, annotations, and ownership of the persisted object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
    /// Owner references.
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Adds an owner reference.
    #[must_use]
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    /// Returns `true` when `current` already carries everything in `self`.
    ///
    /// Extra labels and annotations on `current` are tolerated; owner
    /// references must match exactly.
    #[must_use]
    pub fn is_satisfied_by(&self, current: &Self) -> bool {
        contains_all(&current.labels, &self.labels)
            && contains_all(&current.annotations, &self.annotations)
            && current.owner_references == self.owner_references
    }

    /// Merges `self` over `current`: desired entries win, extra current
    /// entries are kept, owner references are replaced.
    #[must_use]
    pub fn merged_onto(&self, current: &Self) -> Self {
        let mut merged = current.clone();
        merged
            .labels
            .extend(self.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .annotations
            .extend(self.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.owner_references.clone_from(&self.owner_references);
        merged
    }
}

fn contains_all(have: &BTreeMap<String, String>, want: &BTreeMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

/// The persisted PKI object: metadata plus the blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkiObject {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Key material, see [`crate::codec`] for the layout.
    pub data: Blob,
}

/// Snapshot of the persisted object as seen by one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentObject {
    /// No object exists yet.
    Missing,
    /// The object as it was read.
    Found(PkiObject),
    /// The store could not be read.
    Unavailable {
        /// Why the read failed.
        reason: String,
    },
}
