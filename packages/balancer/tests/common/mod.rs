//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use balancer_core::config::SpotPreference;
use balancer_core::kernel::testing::{test_config, FakeOrchestrator, InMemoryStore};
use balancer_core::server::app::AppState;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::AdmissionReview;
use serde_json::{json, Value};

/// A strict-mode [`AppState`] over in-memory fakes, plus handles to them.
pub fn app_state(
    mode: SpotPreference,
    default_ratio: f64,
) -> (AppState, Arc<InMemoryStore>, Arc<FakeOrchestrator>) {
    let config = Arc::new(test_config(mode, default_ratio));
    let store = Arc::new(InMemoryStore::default());
    let orchestrator = Arc::new(FakeOrchestrator::new(&config));
    let state = AppState::new(config, store.clone(), orchestrator.clone());
    (state, store, orchestrator)
}

/// An executor pod fixture; `capacity` pre-sets the capacity-type selector.
pub fn executor_pod(namespace: &str, name: &str, job_id: &str, capacity: Option<&str>) -> Pod {
    let mut spec = json!({
        "containers": [{"name": "executor", "image": "spark:3.5.1"}],
    });
    if let Some(capacity) = capacity {
        spec["nodeSelector"] = json!({"karpenter.sh/capacity-type": capacity});
    }
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {
                "spark-role": "executor",
                "spark-app-selector": job_id,
            },
        },
        "spec": spec,
    }))
    .expect("executor pod fixture deserializes")
}

/// A driver pod fixture; `ratio` sets the spot-ratio annotation verbatim.
pub fn driver_pod(namespace: &str, job_id: &str, ratio: Option<&str>) -> Pod {
    let mut metadata = json!({
        "name": format!("{job_id}-driver"),
        "namespace": namespace,
        "labels": {
            "spark-role": "driver",
            "spark-app-selector": job_id,
        },
    });
    if let Some(ratio) = ratio {
        metadata["annotations"] = json!({"spot-balancer.io/spot-ratio": ratio});
    }
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": metadata,
        "spec": {"containers": [{"name": "driver", "image": "spark:3.5.1"}]},
    }))
    .expect("driver pod fixture deserializes")
}

/// A pod that is not part of any Spark job.
pub fn unrelated_pod(namespace: &str, name: &str) -> Pod {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {"app": "nginx"},
        },
        "spec": {"containers": [{"name": "web", "image": "nginx"}]},
    }))
    .expect("unrelated pod fixture deserializes")
}

fn review(operation: &str, object: Value, old_object: Value, name: &str, namespace: &str) -> AdmissionReview<Pod> {
    serde_json::from_value(json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
            "requestResource": {"group": "", "version": "v1", "resource": "pods"},
            "name": name,
            "namespace": namespace,
            "operation": operation,
            "userInfo": {"username": "system:serviceaccount:spark:spark-operator"},
            "object": object,
            "oldObject": old_object,
            "dryRun": false,
        },
    }))
    .expect("admission review fixture deserializes")
}

/// An admission review for a pod CREATE.
pub fn create_review(pod: &Pod) -> AdmissionReview<Pod> {
    review(
        "CREATE",
        serde_json::to_value(pod).unwrap(),
        Value::Null,
        pod.metadata.name.as_deref().unwrap_or_default(),
        pod.metadata.namespace.as_deref().unwrap_or_default(),
    )
}

/// An admission review for a pod DELETE (the pod rides in `oldObject`).
pub fn delete_review(pod: &Pod) -> AdmissionReview<Pod> {
    review(
        "DELETE",
        Value::Null,
        serde_json::to_value(pod).unwrap(),
        pod.metadata.name.as_deref().unwrap_or_default(),
        pod.metadata.namespace.as_deref().unwrap_or_default(),
    )
}

/// Decode and apply a response's JSON patch to the pod, returning the
/// patched pod document.
pub fn apply_patch(pod: &Pod, patch_bytes: &[u8]) -> Value {
    let patch: json_patch::Patch =
        serde_json::from_slice(patch_bytes).expect("response patch deserializes");
    let mut doc = serde_json::to_value(pod).unwrap();
    json_patch::patch(&mut doc, &patch).expect("patch applies to the pod");
    doc
}
