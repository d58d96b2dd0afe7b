//! Update filters for the event handlers.
//!
//! Each side ignores the fields the other side writes, so the spec and status
//! reconcilers do not wake each other up in a loop.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use tandem_core::wellknown::STATUS_ANNOTATION_PREFIX;
use tandem_core::Object;

fn without_status_annotations(obj: &Object) -> BTreeMap<String, String> {
    let mut annotations = obj.annotations();
    annotations.retain(|k, _| !k.starts_with(STATUS_ANNOTATION_PREFIX));
    annotations
}

/// Upstream filter: true when `old` and `new` differ at most in `status`
/// and in per-target status annotations.
pub fn deep_equal_apart_from_status(old: &Object, new: &Object) -> bool {
    if without_status_annotations(old) != without_status_annotations(new) {
        return false;
    }
    if old.labels() != new.labels() || old.finalizers() != new.finalizers() {
        return false;
    }
    if old.is_being_deleted() != new.is_being_deleted() {
        return false;
    }
    let keys = old.content().keys().chain(new.content().keys());
    for key in keys {
        if key == "metadata" || key == "status" {
            continue;
        }
        if old.get(key) != new.get(key) {
            return false;
        }
    }
    true
}

/// Downstream filter: true when finalizers and `status` are unchanged.
pub fn deep_equal_finalizers_and_status(old: &Object, new: &Object) -> bool {
    let status = |o: &Object| o.get("status").cloned().unwrap_or(Json::Null);
    old.finalizers() == new.finalizers() && status(old) == status(new)
}
