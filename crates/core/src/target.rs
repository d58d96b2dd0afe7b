//! Identity of the sync target a syncer instance represents.

use serde::{Deserialize, Serialize};

use crate::locator::{short_hash, TargetRef};
use crate::wellknown::{
    DELETION_ANNOTATION_PREFIX, FINALIZERS_ANNOTATION_PREFIX, SPEC_DIFF_ANNOTATION_PREFIX, STATE_LABEL_PREFIX,
    STATUS_ANNOTATION_PREFIX, SYNCER_FINALIZER_PREFIX,
};

/// Physical cluster binding. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub workspace: String,
    pub name: String,
    pub uid: String,
    /// Short hash of workspace and name, used in annotation and label keys.
    pub key: String,
}

impl SyncTarget {
    pub fn new(workspace: &str, name: &str, uid: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            key: sync_target_key(workspace, name),
        }
    }

    pub fn target_ref(&self) -> TargetRef {
        TargetRef { workspace: self.workspace.clone(), uid: self.uid.clone() }
    }

    pub fn finalizer(&self) -> String {
        format!("{SYNCER_FINALIZER_PREFIX}{}", self.name)
    }

    pub fn state_label(&self) -> String {
        format!("{STATE_LABEL_PREFIX}{}", self.key)
    }

    pub fn spec_diff_annotation(&self) -> String {
        format!("{SPEC_DIFF_ANNOTATION_PREFIX}{}", self.key)
    }

    pub fn status_annotation(&self) -> String {
        format!("{STATUS_ANNOTATION_PREFIX}{}", self.key)
    }

    /// Deletion intent: the upstream scheduler wants the object off this target.
    pub fn deletion_annotation(&self) -> String {
        format!("{DELETION_ANNOTATION_PREFIX}{}", self.key)
    }

    /// External ownership: some other actor still holds the object on this target.
    pub fn finalizers_annotation(&self) -> String {
        format!("{FINALIZERS_ANNOTATION_PREFIX}{}", self.key)
    }
}

/// 8 lowercase base36 characters derived from workspace and name.
pub fn sync_target_key(workspace: &str, name: &str) -> String {
    short_hash(format!("{workspace}{name}").as_bytes(), 8)
}
