mod common;

use common::*;
use serde_json::json;
use tandem_core::wellknown::{LOGICAL_CLUSTER_ANNOTATION, NAMESPACE_LOCATOR_ANNOTATION, STATE_SYNC};
use tandem_core::{
    downstream_namespace_for, locator_for, ClientError, ObjectRef, QueueKey, ResourceType, SyncError,
};
use tandem_queue::Reconciler;

fn key(gvr: ResourceType, k: &str) -> QueueKey {
    QueueKey::new(gvr, k)
}

fn upstream_ref(name: &str) -> ObjectRef {
    ObjectRef::new(deployments(), Some("teamA"), name).in_cluster("ws-1")
}

#[tokio::test(start_paused = true)]
async fn upsert_creates_shadow_namespace_and_applies_cleaned_copy() {
    let env = Env::new(config(target(), false)).await;
    env.up.set(&deployments(), vec![upstream_deployment("ws-1", "teamA", "web")]).await;

    env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap();

    let ns = downstream_namespace_for(&locator_for("ws-1", "teamA", None));
    let calls = env.downstream.take_calls();
    assert_eq!(calls.len(), 2, "{calls:?}");
    assert_eq!(calls[0].op, "create");
    assert_eq!(calls[0].target, ObjectRef::new(ResourceType::namespaces(), None, &ns));
    let created = calls[0].body.as_ref().unwrap();
    assert_eq!(
        created.annotation(NAMESPACE_LOCATOR_ANNOTATION),
        Some(r#"{"logicalCluster":"ws-1","namespace":"teamA"}"#)
    );
    assert_eq!(created.labels().get(&target().state_label()).map(String::as_str), Some(STATE_SYNC));

    assert_eq!(calls[1].op, "apply");
    assert_eq!(calls[1].target, ObjectRef::new(deployments(), Some(&ns), "web"));
    let applied = calls[1].body.as_ref().unwrap();
    assert_eq!(applied.namespace(), Some(ns.as_str()));
    assert_eq!(applied.name(), "web");
    assert!(applied.uid().is_none());
    assert!(applied.resource_version().is_none());
    assert!(applied.annotation(LOGICAL_CLUSTER_ANNOTATION).is_none());
    let env_vars = applied.get("spec").unwrap()["template"]["spec"]["containers"][0]["env"].clone();
    assert!(env_vars.as_array().unwrap().contains(&json!({"name": "KUBERNETES_SERVICE_HOST", "value": "tandem.example"})));
    assert!(env.upstream.calls().is_empty(), "simple mode never writes upstream on upsert");
}

#[tokio::test(start_paused = true)]
async fn repeated_upserts_apply_identical_bodies() {
    let env = Env::new(config(target(), false)).await;
    env.up.set(&deployments(), vec![upstream_deployment("ws-1", "teamA", "web")]).await;
    let k = key(deployments(), "teamA/ws-1|web");

    env.spec.reconcile(&k).await.unwrap();
    let first = env.downstream.take_calls();
    // the namespace now shows up in the downstream cache
    env.down.set(&ResourceType::namespaces(), vec![shadow_namespace(&locator_for("ws-1", "teamA", None))]).await;
    env.spec.reconcile(&k).await.unwrap();
    let second = env.downstream.take_calls();

    assert_eq!(second.len(), 1, "namespace is not created twice: {second:?}");
    assert_eq!(second[0], first[1]);
}

#[tokio::test(start_paused = true)]
async fn existing_namespace_race_is_not_an_error() {
    let env = Env::new(config(target(), false)).await;
    env.up.set(&deployments(), vec![upstream_deployment("ws-1", "teamA", "web")]).await;
    let ns = downstream_namespace_for(&locator_for("ws-1", "teamA", None));
    env.downstream.fail_next("create", ClientError::AlreadyExists(ns));

    env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap();
    assert_eq!(env.downstream.ops(), vec!["create", "apply"]);
}

#[tokio::test(start_paused = true)]
async fn upstream_absence_deletes_downstream_copy() {
    let env = Env::new(config(target(), false)).await;
    let ns = downstream_namespace_for(&locator_for("ws-1", "teamA", None));
    let down = ObjectRef::new(deployments(), Some(&ns), "web");
    env.downstream.seed(down.clone(), downstream_deployment(&ns, "web", None));
    let k = key(deployments(), "teamA/ws-1|web");

    env.spec.reconcile(&k).await.unwrap();
    assert!(env.downstream.object(&down).is_none());
    // already gone: still a success
    env.spec.reconcile(&k).await.unwrap();
    assert_eq!(env.downstream.ops(), vec!["delete", "delete"]);
}

#[tokio::test(start_paused = true)]
async fn root_ca_configmap_is_renamed_downstream() {
    let env = Env::new(config(target(), false)).await;
    let mut cm = tandem_core::Object::new("v1", "ConfigMap", "kube-root-ca.crt");
    cm.set_namespace(Some("teamA"));
    cm.set_annotation(LOGICAL_CLUSTER_ANNOTATION, "ws-1");
    env.up.set(&configmaps(), vec![cm]).await;

    env.spec.reconcile(&key(configmaps(), "teamA/ws-1|kube-root-ca.crt")).await.unwrap();
    let calls = env.downstream.calls();
    let apply = calls.iter().find(|c| c.op == "apply").unwrap();
    assert_eq!(apply.target.name, "tandem-root-ca.crt");
    assert_eq!(apply.body.as_ref().unwrap().name(), "tandem-root-ca.crt");
}

#[tokio::test(start_paused = true)]
async fn cluster_scoped_keys_are_skipped() {
    let env = Env::new(config(target(), false)).await;
    env.spec.reconcile(&key(deployments(), "ws-1|web")).await.unwrap();
    assert!(env.downstream.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn keys_without_cluster_are_malformed() {
    let env = Env::new(config(target(), false)).await;
    let err = env.spec.reconcile(&key(deployments(), "teamA/web")).await.unwrap_err();
    assert!(matches!(err, SyncError::Malformed { .. }), "{err}");
    assert!(!err.is_retryable());
    let err = env.spec.reconcile(&key(deployments(), "a/b/c")).await.unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn apply_failures_are_retryable() {
    let env = Env::new(config(target(), false)).await;
    env.up.set(&deployments(), vec![upstream_deployment("ws-1", "teamA", "web")]).await;
    env.downstream.fail_next("apply", ClientError::Transport("connection reset".into()));

    let err = env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap_err();
    assert!(err.is_retryable(), "{err}");
}

#[tokio::test(start_paused = true)]
async fn advanced_mode_adds_finalizer_and_applies_overlay() {
    let env = Env::new(config(target(), true)).await;
    let t = target();
    let mut up = upstream_deployment("ws-1", "teamA", "web");
    up.set_annotation(&t.spec_diff_annotation(), r#"[{"op":"replace","path":"/replicas","value":3}]"#);
    env.upstream.seed(upstream_ref("web"), up.clone());
    env.up.set(&deployments(), vec![up]).await;

    env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap();

    let up_calls = env.upstream.calls();
    assert_eq!(up_calls.len(), 1, "{up_calls:?}");
    assert_eq!(up_calls[0].op, "update");
    assert!(up_calls[0].body.as_ref().unwrap().has_finalizer(&t.finalizer()));

    let ns = downstream_namespace_for(&locator_for("ws-1", "teamA", Some(&t)));
    let applied = env.downstream.object(&ObjectRef::new(deployments(), Some(&ns), "web")).unwrap();
    assert_eq!(applied.get("spec").unwrap()["replicas"], json!(3));
    assert!(applied.finalizers().is_empty(), "upstream finalizers stay upstream");
    let created = env.downstream.object(&ObjectRef::new(ResourceType::namespaces(), None, &ns)).unwrap();
    let locator = created.annotation(NAMESPACE_LOCATOR_ANNOTATION).unwrap();
    assert!(locator.contains(&t.uid), "{locator}");
}

#[tokio::test(start_paused = true)]
async fn finalizer_is_not_added_twice() {
    let env = Env::new(config(target(), true)).await;
    let mut up = upstream_deployment("ws-1", "teamA", "web");
    up.set_finalizers([target().finalizer()]);
    env.up.set(&deployments(), vec![up]).await;

    env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap();
    assert!(env.upstream.calls().is_empty());
    assert!(env.downstream.ops().contains(&"apply"));
}

#[tokio::test(start_paused = true)]
async fn bad_overlay_is_retried_and_nothing_is_applied() {
    let env = Env::new(config(target(), true)).await;
    let t = target();
    let mut up = upstream_deployment("ws-1", "teamA", "web");
    up.set_finalizers([t.finalizer()]);
    up.set_annotation(&t.spec_diff_annotation(), r#"[{"op":"remove","path":"/nope"}]"#);
    env.up.set(&deployments(), vec![up]).await;

    let err = env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap_err();
    assert!(matches!(err, SyncError::Overlay { .. }), "{err}");
    assert!(err.is_retryable());
    assert!(!env.downstream.ops().contains(&"apply"));
}

#[tokio::test(start_paused = true)]
async fn overlay_is_ignored_in_simple_mode() {
    let env = Env::new(config(target(), false)).await;
    let mut up = upstream_deployment("ws-1", "teamA", "web");
    up.set_annotation(&target().spec_diff_annotation(), r#"[{"op":"replace","path":"/replicas","value":3}]"#);
    env.up.set(&deployments(), vec![up]).await;

    env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap();
    let ns = downstream_namespace_for(&locator_for("ws-1", "teamA", None));
    let applied = env.downstream.object(&ObjectRef::new(deployments(), Some(&ns), "web")).unwrap();
    assert_eq!(applied.get("spec").unwrap()["replicas"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn deletion_intent_removes_downstream_then_finalizer() {
    let env = Env::new(config(target(), true)).await;
    let t = target();
    let mut up = upstream_deployment("ws-1", "teamA", "web");
    up.set_finalizers([t.finalizer(), "other.example/keep".to_string()]);
    up.set_annotation(&t.deletion_annotation(), "2026-01-01T00:00:00Z");
    env.upstream.seed(upstream_ref("web"), up.clone());
    env.up.set(&deployments(), vec![up]).await;
    let ns = downstream_namespace_for(&locator_for("ws-1", "teamA", Some(&t)));
    let down = ObjectRef::new(deployments(), Some(&ns), "web");
    env.downstream.seed(down.clone(), downstream_deployment(&ns, "web", None));

    env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap();

    assert!(env.downstream.object(&down).is_none());
    let ops = env.downstream.ops();
    assert!(ops.ends_with(&["delete", "get"]), "{ops:?}");
    assert!(!ops.contains(&"apply"));
    let remaining = env.upstream.object(&upstream_ref("web")).unwrap().finalizers();
    assert_eq!(remaining.to_vec(), vec!["other.example/keep".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn graceful_delete_keeps_finalizer_until_gone() {
    let env = Env::new(config(target(), true)).await;
    let t = target();
    let mut up = upstream_deployment("ws-1", "teamA", "web");
    up.set_finalizers([t.finalizer()]);
    up.set_annotation(&t.deletion_annotation(), "2026-01-01T00:00:00Z");
    env.upstream.seed(upstream_ref("web"), up.clone());
    env.up.set(&deployments(), vec![up]).await;
    let ns = downstream_namespace_for(&locator_for("ws-1", "teamA", Some(&t)));
    env.downstream.seed(ObjectRef::new(deployments(), Some(&ns), "web"), downstream_deployment(&ns, "web", None));
    env.downstream.set_graceful_delete(true);

    env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap();
    assert!(env.upstream.calls().is_empty(), "finalizer stays while the copy terminates");
}

#[tokio::test(start_paused = true)]
async fn external_holders_block_deletion_intent() {
    let env = Env::new(config(target(), true)).await;
    let t = target();
    let mut up = upstream_deployment("ws-1", "teamA", "web");
    up.set_finalizers([t.finalizer()]);
    up.set_annotation(&t.deletion_annotation(), "2026-01-01T00:00:00Z");
    up.set_annotation(&t.finalizers_annotation(), "external-controller");
    env.up.set(&deployments(), vec![up]).await;

    env.spec.reconcile(&key(deployments(), "teamA/ws-1|web")).await.unwrap();
    let ops = env.downstream.ops();
    assert!(ops.contains(&"apply"), "{ops:?}");
    assert!(!ops.contains(&"delete"));
}
