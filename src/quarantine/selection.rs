//! Selection rules: which resolved files get relocated.

#![allow(missing_docs)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifierKind, DIGEST_LEN, Fingerprint};
use crate::tree::FileId;

/// Rule applied to the resolved records once classification is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRule {
    /// Every record whose header matched.
    MatchAll,
    /// Every record but the first of each equal-digest bucket.
    KeepFirstPerDigest,
}

impl SelectionRule {
    /// The rule paired with a classifier.
    pub const fn for_kind(kind: ClassifierKind) -> Self {
        match kind {
            ClassifierKind::Signature => Self::MatchAll,
            ClassifierKind::Digest => Self::KeepFirstPerDigest,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MatchAll => "match_all",
            Self::KeepFirstPerDigest => "keep_first_per_digest",
        }
    }

    /// Apply the rule to records listed in resolution order.
    ///
    /// Resolution order is checkpoint load order followed by this run's
    /// classification order. For digests it decides which member of a bucket
    /// is retained, and buckets are emitted in order of first appearance.
    pub fn select(self, resolved: &[(FileId, Fingerprint)]) -> Selection {
        self.select_present(resolved, |_| true)
    }

    /// Like [`Self::select`], but a duplicate bucket retains its first member
    /// for which `is_present` holds. Records whose source is already gone
    /// (moved by an earlier run) can then never be the copy that stays.
    pub fn select_present<F>(self, resolved: &[(FileId, Fingerprint)], is_present: F) -> Selection
    where
        F: Fn(FileId) -> bool,
    {
        match self {
            Self::MatchAll => Selection {
                selected: resolved
                    .iter()
                    .filter(|(_, fp)| matches!(fp, Fingerprint::Signature(true)))
                    .map(|(id, _)| *id)
                    .collect(),
                retained: Vec::new(),
                duplicate_groups: 0,
            },
            Self::KeepFirstPerDigest => keep_first_per_digest(resolved, is_present),
        }
    }
}

/// Files chosen for relocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// To be moved, in bucket order.
    pub selected: Vec<FileId>,
    /// Kept in place as the representative of a duplicate group.
    pub retained: Vec<FileId>,
    /// Buckets with more than one member.
    pub duplicate_groups: usize,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

fn keep_first_per_digest(
    resolved: &[(FileId, Fingerprint)],
    is_present: impl Fn(FileId) -> bool,
) -> Selection {
    let mut bucket_of: HashMap<[u8; DIGEST_LEN], usize> = HashMap::new();
    let mut buckets: Vec<Vec<FileId>> = Vec::new();
    for (id, fingerprint) in resolved {
        let Fingerprint::Digest(digest) = fingerprint else {
            continue;
        };
        let slot = *bucket_of.entry(*digest).or_insert_with(|| {
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[slot].push(*id);
    }

    let mut selection = Selection::default();
    for bucket in buckets.into_iter().filter(|b| b.len() > 1) {
        selection.duplicate_groups += 1;
        // With no member left in place nothing gets moved anyway.
        let keep = bucket.iter().position(|&id| is_present(id)).unwrap_or(0);
        selection.retained.push(bucket[keep]);
        selection
            .selected
            .extend(bucket.iter().enumerate().filter(|&(i, _)| i != keep).map(|(_, &id)| id));
    }
    selection
}
