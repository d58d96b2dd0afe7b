//! Untyped object document.
//!
//! Every synced resource travels as an [`Object`]: an ordered JSON tree that
//! keeps fields it does not understand verbatim, so a round trip through the
//! syncer never loses data the target API server knows about.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::SyncError;
use crate::wellknown::LOGICAL_CLUSTER_ANNOTATION;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(Map<String, Value>);

impl TryFrom<Value> for Object {
    type Error = SyncError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SyncError::malformed("object", format!("expected a JSON object, got {other}"))),
        }
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o.0)
    }
}

impl Object {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        let mut o = Self::default();
        o.insert("apiVersion", Value::String(api_version.to_string()));
        o.insert("kind", Value::String(kind.to_string()));
        o.set_name(name);
        o
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: &str, value: Value) -> Option<Value> {
        self.0.insert(field.to_string(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(Value::as_str)
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get("metadata").and_then(Value::as_object)
    }

    /// Mutable metadata, created (or replaced if it is not a map) on demand.
    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        as_map(self.0.entry("metadata").or_insert_with(|| Value::Object(Map::new())))
    }

    fn meta_str(&self, field: &str) -> Option<&str> {
        self.metadata().and_then(|m| m.get(field)).and_then(Value::as_str)
    }

    pub fn remove_meta(&mut self, field: &str) -> Option<Value> {
        self.0.get_mut("metadata").and_then(Value::as_object_mut).and_then(|m| m.remove(field))
    }

    pub fn name(&self) -> &str {
        self.meta_str("name").unwrap_or("")
    }

    pub fn set_name(&mut self, name: &str) {
        self.metadata_mut().insert("name".into(), Value::String(name.to_string()));
    }

    /// Namespace, `None` for cluster-scoped objects.
    pub fn namespace(&self) -> Option<&str> {
        self.meta_str("namespace").filter(|ns| !ns.is_empty())
    }

    pub fn set_namespace(&mut self, ns: Option<&str>) {
        match ns {
            Some(ns) => {
                self.metadata_mut().insert("namespace".into(), Value::String(ns.to_string()));
            }
            None => {
                self.remove_meta("namespace");
            }
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.meta_str("uid")
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta_str("resourceVersion")
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata().map(|m| m.get("deletionTimestamp").is_some_and(|v| !v.is_null())).unwrap_or(false)
    }

    /// Logical cluster recorded on the object, if any.
    pub fn logical_cluster(&self) -> Option<&str> {
        self.annotation(LOGICAL_CLUSTER_ANNOTATION).filter(|c| !c.is_empty())
    }

    fn string_map(&self, field: &str) -> BTreeMap<String, String> {
        self.metadata()
            .and_then(|m| m.get(field))
            .and_then(Value::as_object)
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
            .unwrap_or_default()
    }

    fn string_map_mut(&mut self, field: &str) -> &mut Map<String, Value> {
        as_map(self.metadata_mut().entry(field).or_insert_with(|| Value::Object(Map::new())))
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map("annotations")
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.string_map_mut("annotations").insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<String> {
        let removed = self
            .0
            .get_mut("metadata")
            .and_then(|m| m.get_mut("annotations"))
            .and_then(Value::as_object_mut)
            .and_then(|a| a.remove(key));
        removed.and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map("labels")
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        self.string_map_mut("labels").insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn finalizers(&self) -> SmallVec<[String; 4]> {
        self.metadata()
            .and_then(|m| m.get("finalizers"))
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Replace the finalizer list; an empty list removes the field.
    pub fn set_finalizers<I, S>(&mut self, finalizers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list: Vec<Value> = finalizers.into_iter().map(|f| Value::String(f.into())).collect();
        if list.is_empty() {
            self.remove_meta("finalizers");
        } else {
            self.metadata_mut().insert("finalizers".into(), Value::Array(list));
        }
    }
}

/// Borrow `slot` as a map, replacing whatever non-map value it held.
fn as_map(slot: &mut Value) -> &mut Map<String, Value> {
    match slot {
        Value::Object(m) => m,
        other => {
            *other = Value::Object(Map::new());
            as_map(other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> Object {
        Object::try_from(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "teamA",
                "uid": "1111",
                "annotations": { LOGICAL_CLUSTER_ANNOTATION: "ws-1", "a": "b" },
                "finalizers": ["one", "two"],
                "x-unknown": { "kept": true }
            },
            "spec": { "replicas": 2 },
            "zzz": [1, 2, 3]
        }))
        .unwrap()
    }

    #[test]
    fn accessors_read_metadata() {
        let o = deployment();
        assert_eq!(o.name(), "web");
        assert_eq!(o.namespace(), Some("teamA"));
        assert_eq!(o.uid(), Some("1111"));
        assert_eq!(o.logical_cluster(), Some("ws-1"));
        assert_eq!(o.annotation("a"), Some("b"));
        assert_eq!(o.finalizers().to_vec(), vec!["one".to_string(), "two".to_string()]);
        assert!(!o.is_being_deleted());
    }

    #[test]
    fn unknown_fields_round_trip_in_order() {
        let o = deployment();
        let text = serde_json::to_string(&o).unwrap();
        let back: Object = serde_json::from_str(&text).unwrap();
        assert_eq!(back, o);
        let keys: Vec<_> = back.content().keys().cloned().collect();
        assert_eq!(keys, ["apiVersion", "kind", "metadata", "spec", "zzz"]);
        assert_eq!(back.metadata().unwrap()["x-unknown"], json!({ "kept": true }));
    }

    #[test]
    fn finalizers_empty_list_removes_field() {
        let mut o = deployment();
        o.set_finalizers(Vec::<String>::new());
        assert!(!o.metadata().unwrap().contains_key("finalizers"));
        o.set_finalizers(["x"]);
        assert!(o.has_finalizer("x"));
    }

    #[test]
    fn annotations_created_on_demand() {
        let mut o = Object::new("v1", "Namespace", "ns");
        assert!(o.annotations().is_empty());
        o.set_annotation("k", "v");
        o.set_label("l", "1");
        assert_eq!(o.annotation("k"), Some("v"));
        assert_eq!(o.labels().get("l").map(String::as_str), Some("1"));
        assert_eq!(o.remove_annotation("k").as_deref(), Some("v"));
        assert_eq!(o.annotation("k"), None);
    }

    #[test]
    fn non_object_is_malformed() {
        let err = Object::try_from(json!([1, 2])).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn deletion_timestamp_marks_deletion() {
        let mut o = deployment();
        o.metadata_mut().insert("deletionTimestamp".into(), json!("2024-01-01T00:00:00Z"));
        assert!(o.is_being_deleted());
    }
}
