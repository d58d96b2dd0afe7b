//! Namespace locators and downstream namespace naming.
//!
//! A downstream namespace carries its upstream origin as a JSON annotation.
//! Its name is a hash of that same JSON, so the mapping can be recomputed from
//! nothing but the locator after a crash: there is no lookup table to lose.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};

use crate::error::{SyncError, SyncResult};
use crate::object::Object;
use crate::target::SyncTarget;
use crate::wellknown::{DOWNSTREAM_NAMESPACE_PREFIX, NAMESPACE_LOCATOR_ANNOTATION};

/// Sync target a downstream namespace belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub workspace: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceLocator {
    pub logical_cluster: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_target: Option<TargetRef>,
}

impl NamespaceLocator {
    /// Whether a namespace with this locator is owned by `target`.
    /// Locators written without a target (single-target mode) match any target.
    pub fn matches_target(&self, target: &SyncTarget) -> bool {
        match &self.sync_target {
            Some(t) => t.workspace == target.workspace && t.uid == target.uid,
            None => true,
        }
    }

    pub fn to_annotation(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn locator_for(logical_cluster: &str, namespace: &str, target: Option<&SyncTarget>) -> NamespaceLocator {
    NamespaceLocator {
        logical_cluster: logical_cluster.to_string(),
        namespace: namespace.to_string(),
        sync_target: target.map(SyncTarget::target_ref),
    }
}

/// Deterministic downstream namespace name for a locator.
///
/// `tandem-` followed by 12 base36 characters of the SHA-224 of the locator
/// JSON: a valid DNS-1123 label of fixed length.
pub fn downstream_namespace_for(locator: &NamespaceLocator) -> String {
    // Serialising a struct of plain strings cannot fail.
    let encoded = serde_json::to_vec(locator).unwrap_or_default();
    format!("{DOWNSTREAM_NAMESPACE_PREFIX}{}", short_hash(&encoded, 12))
}

/// Decode the locator annotation of a downstream namespace.
///
/// `Ok(None)` when the annotation is absent or empty; a decode failure is
/// [`SyncError::Malformed`] and must not be retried.
pub fn parse_locator(namespace: &Object) -> SyncResult<Option<NamespaceLocator>> {
    match namespace.annotation(NAMESPACE_LOCATOR_ANNOTATION) {
        None | Some("") => Ok(None),
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| SyncError::malformed("namespace locator", format!("namespace {}: {e}", namespace.name()))),
    }
}

/// Lowercase base36 of the SHA-224 of `data`, truncated to its last `len` digits.
pub(crate) fn short_hash(data: &[u8], len: usize) -> String {
    let digest = Sha224::digest(data);
    let encoded = base36(&digest);
    let start = encoded.len().saturating_sub(len);
    encoded.get(start..).unwrap_or_default().to_string()
}

// Fixed width for a 224-bit value so truncation never sees a short string.
const BASE36_WIDTH: usize = 44;

fn base36(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    // little-endian base36 digits
    let mut digits: Vec<u8> = Vec::with_capacity(BASE36_WIDTH);
    for &byte in bytes {
        let mut carry = u32::from(byte);
        for d in digits.iter_mut() {
            let v = u32::from(*d) * 256 + carry;
            *d = (v % 36) as u8;
            carry = v / 36;
        }
        while carry > 0 {
            digits.push((carry % 36) as u8);
            carry /= 36;
        }
    }
    digits.resize(digits.len().max(BASE36_WIDTH), 0);
    digits.iter().rev().map(|&d| char::from(ALPHABET[usize::from(d)])).collect()
}
