//! End-to-end admission scenarios against the handlers, using in-memory
//! fakes for the state store and the orchestrator.

mod common;

use std::sync::Arc;

use axum::extract::Extension;
use axum::Json;
use balancer_core::config::SpotPreference;
use balancer_core::kernel::testing::FailingStore;
use balancer_core::kernel::StateStore;
use balancer_core::server::app::AppState;
use balancer_core::server::routes::{mutate_handler, validate_handler};
use kube::core::admission::AdmissionResponse;
use serde_json::json;

use common::{app_state, create_review, delete_review, driver_pod, executor_pod, unrelated_pod};

async fn mutate(state: &AppState, review: kube::core::admission::AdmissionReview<k8s_openapi::api::core::v1::Pod>) -> AdmissionResponse {
    let Json(reviewed) = mutate_handler(Extension(state.clone()), Json(review)).await;
    reviewed.response.expect("mutate response present")
}

async fn validate(state: &AppState, review: kube::core::admission::AdmissionReview<k8s_openapi::api::core::v1::Pod>) -> AdmissionResponse {
    let Json(reviewed) = validate_handler(Extension(state.clone()), Json(review)).await;
    reviewed.response.expect("validate response present")
}

#[tokio::test]
async fn test_s1_full_spot() {
    let (state, store, _) = app_state(SpotPreference::Strict, 1.0);

    for i in 0..5 {
        let pod = executor_pod("spark", &format!("exec-{i}"), "j1", None);
        let response = mutate(&state, create_review(&pod)).await;
        assert!(response.allowed);
        let doc = common::apply_patch(&pod, response.patch.as_deref().expect("patch emitted"));
        assert_eq!(doc["spec"]["nodeSelector"]["karpenter.sh/capacity-type"], "spot");
        assert_eq!(doc["spec"]["nodeSelector"]["spark-role"], "executor");
    }

    let counter = store.get("exec-count:spark:j1").await.unwrap().unwrap();
    assert_eq!(counter, "0:5");
}

#[tokio::test]
async fn test_s2_full_on_demand_from_annotation() {
    let (state, store, orchestrator) = app_state(SpotPreference::Strict, 0.5);
    orchestrator.push_pod(driver_pod("spark", "j2", Some("0.0")));

    for i in 0..5 {
        let pod = executor_pod("spark", &format!("exec-{i}"), "j2", None);
        let response = mutate(&state, create_review(&pod)).await;
        let doc = common::apply_patch(&pod, response.patch.as_deref().unwrap());
        assert_eq!(
            doc["spec"]["nodeSelector"]["karpenter.sh/capacity-type"],
            "on-demand"
        );
    }

    let counter = store.get("exec-count:spark:j2").await.unwrap().unwrap();
    assert_eq!(counter, "5:0");
    // The resolved ratio is cached for later admissions.
    let ratio = store.get("job-ratio:spark:j2").await.unwrap().unwrap();
    assert_eq!(ratio, "0.000");
}

#[tokio::test]
async fn test_s3_seventy_thirty_mix() {
    let (state, store, orchestrator) = app_state(SpotPreference::Strict, 0.5);
    orchestrator.push_pod(driver_pod("spark", "j3", Some("0.7")));

    for i in 0..10 {
        let pod = executor_pod("spark", &format!("exec-{i}"), "j3", None);
        let response = mutate(&state, create_review(&pod)).await;
        assert!(response.allowed);
        assert!(response.patch.is_some());
    }

    let counter = store.get("exec-count:spark:j3").await.unwrap().unwrap();
    assert_eq!(counter, "3:7");
}

#[tokio::test]
async fn test_s4_delete_decrements_and_ignores_unlabeled() {
    let (state, store, _) = app_state(SpotPreference::Strict, 0.5);
    store
        .set(
            "exec-count:spark:j3",
            "3:7",
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap();

    for i in 0..2 {
        let pod = executor_pod("spark", &format!("exec-{i}"), "j3", Some("spot"));
        let response = validate(&state, delete_review(&pod)).await;
        assert!(response.allowed);
    }
    let counter = store.get("exec-count:spark:j3").await.unwrap().unwrap();
    assert_eq!(counter, "3:5");

    // A delete without a capacity selector leaves the counter alone.
    let unlabeled = executor_pod("spark", "exec-x", "j3", None);
    let response = validate(&state, delete_review(&unlabeled)).await;
    assert!(response.allowed);
    let counter = store.get("exec-count:spark:j3").await.unwrap().unwrap();
    assert_eq!(counter, "3:5");
}

#[tokio::test]
async fn test_s6_best_effort_emits_no_capacity_selector() {
    let (state, store, _) = app_state(SpotPreference::BestEffort, 0.9);

    let pod = executor_pod("spark", "exec-0", "j6", None);
    let response = mutate(&state, create_review(&pod)).await;
    assert!(response.allowed);
    let doc = common::apply_patch(&pod, response.patch.as_deref().expect("role patch emitted"));
    assert_eq!(doc["spec"]["nodeSelector"], json!({"spark-role": "executor"}));

    // No counter, no cached ratio.
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_non_executor_pod_passes_through() {
    let (state, store, _) = app_state(SpotPreference::Strict, 1.0);
    let pod = unrelated_pod("default", "web-1");

    let response = mutate(&state, create_review(&pod)).await;
    assert!(response.allowed);
    assert!(response.patch.is_none());

    let response = validate(&state, delete_review(&pod)).await;
    assert!(response.allowed);
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_executor_without_job_id_passes_through() {
    let (state, store, _) = app_state(SpotPreference::Strict, 1.0);
    let pod: k8s_openapi::api::core::v1::Pod = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "exec-orphan",
            "namespace": "spark",
            "labels": {"spark-role": "executor"},
        },
        "spec": {"containers": [{"name": "executor", "image": "spark:3.5.1"}]},
    }))
    .unwrap();

    let response = mutate(&state, create_review(&pod)).await;
    assert!(response.allowed);
    assert!(response.patch.is_none());
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_strict_overwrites_preexisting_capacity_selector() {
    let (state, _, _) = app_state(SpotPreference::Strict, 1.0);
    let pod = executor_pod("spark", "exec-0", "j9", Some("on-demand"));

    let response = mutate(&state, create_review(&pod)).await;
    let doc = common::apply_patch(&pod, response.patch.as_deref().unwrap());
    assert_eq!(doc["spec"]["nodeSelector"]["karpenter.sh/capacity-type"], "spot");
}

#[tokio::test]
async fn test_mutate_fails_open_on_store_outage() {
    let config = Arc::new(balancer_core::kernel::testing::test_config(
        SpotPreference::Strict,
        1.0,
    ));
    let store = Arc::new(FailingStore);
    let orchestrator = Arc::new(balancer_core::kernel::testing::FakeOrchestrator::new(&config));
    let state = AppState::new(config, store, orchestrator);

    let pod = executor_pod("spark", "exec-0", "j1", None);
    let response = mutate(&state, create_review(&pod)).await;
    assert!(response.allowed);
    assert!(response.patch.is_none());
    let snapshot = state.counters.snapshot();
    assert!(snapshot.fail_open_allows >= 1);
}

#[tokio::test]
async fn test_delete_never_blocks_on_store_outage() {
    let config = Arc::new(balancer_core::kernel::testing::test_config(
        SpotPreference::Strict,
        1.0,
    ));
    let store = Arc::new(FailingStore);
    let orchestrator = Arc::new(balancer_core::kernel::testing::FakeOrchestrator::new(&config));
    let state = AppState::new(config, store, orchestrator);

    let pod = executor_pod("spark", "exec-0", "j1", Some("spot"));
    let response = validate(&state, delete_review(&pod)).await;
    assert!(response.allowed);
}

#[tokio::test]
async fn test_malformed_review_is_rejected() {
    let (state, _, _) = app_state(SpotPreference::Strict, 1.0);
    // A review with no request payload cannot identify a pod to allow.
    let review: kube::core::admission::AdmissionReview<k8s_openapi::api::core::v1::Pod> =
        serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
        }))
        .unwrap();
    let Json(reviewed) = mutate_handler(Extension(state), Json(review)).await;
    let response = reviewed.response.expect("invalid response present");
    assert!(!response.allowed);
}

#[tokio::test]
async fn test_update_operation_passes_through() {
    let (state, store, _) = app_state(SpotPreference::Strict, 1.0);
    let pod = executor_pod("spark", "exec-0", "j1", None);
    let mut review_value = serde_json::to_value(create_review(&pod)).unwrap();
    review_value["request"]["operation"] = json!("UPDATE");
    let review = serde_json::from_value(review_value).unwrap();

    let response = mutate(&state, review).await;
    assert!(response.allowed);
    assert!(response.patch.is_none());
    assert!(store.keys().is_empty());
}
