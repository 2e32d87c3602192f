// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Structural diffing between entity snapshots and integrity verification of
//! a [`VersionRecord`] history.
//!
//! The diff shape mirrors the ancestor workspace's `diff_receipts`
//! (`abp-receipt::diff`): walk the known fields, push a change only where the
//! serialized values differ. Chain verification mirrors `ReceiptChain::verify`
//! (`abp-receipt::chain`): every entry's stored hash must match its
//! recomputed hash, and `version_no` must be dense and monotonic.

use chrono::{DateTime, Utc};
use marketsync_core::{ChangeKind, EntityKind, FieldChange, VersionRecord, canonical_checksum};
use serde_json::Value;

/// Errors from version-chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// A record's stored checksum does not match its snapshot.
    ChecksumMismatch {
        /// The `version_no` with the mismatched checksum.
        version_no: u64,
    },
    /// `version_no` was not dense/monotonic.
    SequenceGap {
        /// The expected next `version_no`.
        expected: u64,
        /// The `version_no` actually found.
        got: u64,
    },
    /// The chain was empty when a non-empty chain was expected.
    EmptyChain,
    /// The first record in the chain was not a `Create`.
    MissingInitialCreate,
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChecksumMismatch { version_no } => write!(f, "checksum mismatch at version {version_no}"),
            Self::SequenceGap { expected, got } => write!(f, "sequence gap: expected version {expected}, got {got}"),
            Self::EmptyChain => write!(f, "version chain is empty"),
            Self::MissingInitialCreate => write!(f, "version chain does not start with a Create"),
        }
    }
}

impl std::error::Error for ChainError {}

/// Verify that a `(entity_type, entity_id)` version history is internally
/// consistent: dense/monotonic `version_no`, matching checksums, and a
/// leading `Create`.
///
/// # Errors
///
/// See [`ChainError`] variants.
pub fn verify_version_chain(records: &[VersionRecord]) -> Result<(), ChainError> {
    if records.is_empty() {
        return Err(ChainError::EmptyChain);
    }
    if records[0].change_kind != ChangeKind::Create {
        return Err(ChainError::MissingInitialCreate);
    }
    for (i, record) in records.iter().enumerate() {
        let expected = i as u64 + 1;
        if record.version_no != expected {
            return Err(ChainError::SequenceGap {
                expected,
                got: record.version_no,
            });
        }
        let recomputed = canonical_checksum(&record.snapshot).unwrap_or_default();
        if recomputed != record.checksum {
            return Err(ChainError::ChecksumMismatch { version_no: record.version_no });
        }
    }
    Ok(())
}

/// Compare two canonical JSON object snapshots field by field.
///
/// Only top-level keys are compared; a nested object that changed is
/// reported as a single [`FieldChange`] on its top-level key, matching the
/// "compare as JSON" fallback the ancestor diff uses for composite fields.
#[must_use]
pub fn diff_snapshots(old: &Value, new: &Value) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let empty = serde_json::Map::new();
    let old_obj = old.as_object().unwrap_or(&empty);
    let new_obj = new.as_object().unwrap_or(&empty);

    for (key, new_value) in new_obj {
        match old_obj.get(key) {
            None => changes.push(FieldChange {
                field: key.clone(),
                before: None,
                after: Some(new_value.clone()),
            }),
            Some(old_value) if old_value != new_value => changes.push(FieldChange {
                field: key.clone(),
                before: Some(old_value.clone()),
                after: Some(new_value.clone()),
            }),
            _ => {}
        }
    }
    for (key, old_value) in old_obj {
        if !new_obj.contains_key(key) {
            changes.push(FieldChange {
                field: key.clone(),
                before: Some(old_value.clone()),
                after: None,
            });
        }
    }
    changes.sort_by(|a, b| a.field.cmp(&b.field));
    changes
}

/// Compute the next [`VersionRecord`] for an entity, or `None` if nothing
/// changed since `previous` (a no-op write is never recorded).
///
/// `previous` is `None` for a brand-new entity, in which case the result is
/// always `Some` with [`ChangeKind::Create`] and an empty diff.
#[must_use]
pub fn next_version(
    previous: Option<&VersionRecord>,
    entity_type: EntityKind,
    entity_id: uuid::Uuid,
    author: &str,
    timestamp: DateTime<Utc>,
    snapshot: Value,
    change_kind_override: Option<ChangeKind>,
) -> Option<VersionRecord> {
    let checksum = canonical_checksum(&snapshot).ok()?;

    match previous {
        None => Some(VersionRecord {
            entity_type,
            entity_id,
            version_no: 1,
            change_kind: change_kind_override.unwrap_or(ChangeKind::Create),
            author: author.to_string(),
            timestamp,
            checksum,
            snapshot,
            diff: Vec::new(),
        }),
        Some(prev) => {
            if let Some(kind) = change_kind_override {
                if kind != ChangeKind::Update {
                    return Some(VersionRecord {
                        entity_type,
                        entity_id,
                        version_no: prev.version_no + 1,
                        change_kind: kind,
                        author: author.to_string(),
                        timestamp,
                        checksum,
                        snapshot,
                        diff: Vec::new(),
                    });
                }
            }
            if checksum == prev.checksum {
                return None;
            }
            let diff = diff_snapshots(&prev.snapshot, &snapshot);
            Some(VersionRecord {
                entity_type,
                entity_id,
                version_no: prev.version_no + 1,
                change_kind: ChangeKind::Update,
                author: author.to_string(),
                timestamp,
                checksum,
                snapshot,
                diff,
            })
        }
    }
}
