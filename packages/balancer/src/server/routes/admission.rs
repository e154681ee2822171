//! Admission endpoints: `/mutate` on pod CREATE and `/validate` on pod
//! DELETE.
//!
//! The mutate handler injects node-selector entries steering executor pods
//! toward the chosen capacity type; the validate handler only decrements
//! the job's counter and never blocks a delete. Admission never blocks a
//! pod because of this system: every failure past envelope parsing allows
//! the pod unchanged, and the reconciler corrects any counter drift that
//! causes.

use axum::extract::Extension;
use axum::Json;
use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{Config, SpotPreference};
use crate::domains::placement::CapacityType;
use crate::server::app::AppState;

/// Mutating webhook for pod CREATE.
///
/// Non-executor pods and executors without a job id pass through
/// unchanged; that is normal traffic, not an error.
pub async fn mutate_handler(
    Extension(state): Extension<AppState>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "malformed admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    let response = AdmissionResponse::from(&request);

    if !matches!(request.operation, Operation::Create) || request.dry_run {
        return Json(response.into_review());
    }
    let Some(pod) = request.object.as_ref() else {
        return Json(response.into_review());
    };

    let config = &state.config;
    if pod_label(pod, &config.workload_role_label) != Some(config.executor_role_value.as_str()) {
        return Json(response.into_review());
    }
    let Some(job_id) = pod_label(pod, &config.job_id_label) else {
        debug!("executor pod without a job id label; admitting unchanged");
        return Json(response.into_review());
    };
    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.metadata.namespace.clone())
        .unwrap_or_default();

    let outcome = tokio::time::timeout(config.webhook_timeout, async {
        match config.spot_preference {
            // No decision is made in best-effort mode, so the ratio is
            // never resolved and no ratio key is created for the job.
            SpotPreference::BestEffort => {
                state
                    .tracker
                    .admit(&namespace, job_id, config.default_spot_ratio)
                    .await
            }
            SpotPreference::Strict => {
                let ratio = state.resolver.resolve(&namespace, job_id).await;
                state.tracker.admit(&namespace, job_id, ratio).await
            }
        }
    })
    .await;

    let decision = match outcome {
        Ok(Ok(decision)) => decision,
        Ok(Err(e)) => {
            warn!(
                namespace = %namespace,
                job_id = %job_id,
                error = %e,
                "placement failed; admitting without a patch"
            );
            state.counters.record_admission_error();
            state.counters.record_fail_open();
            return Json(response.into_review());
        }
        Err(_) => {
            warn!(
                namespace = %namespace,
                job_id = %job_id,
                "placement timed out; admitting without a patch"
            );
            state.counters.record_fail_open();
            return Json(response.into_review());
        }
    };

    let capacity_label = decision
        .capacity
        .map(|capacity| capacity.as_label_value())
        .unwrap_or("unlabeled");
    let patch = build_node_selector_patch(pod, config, decision.capacity);
    match response.with_patch(patch) {
        Ok(patched) => {
            info!(
                namespace = %namespace,
                job_id = %job_id,
                capacity = %capacity_label,
                counts = %decision.counts,
                "executor placed"
            );
            Json(patched.into_review())
        }
        Err(e) => {
            warn!(error = %e, "failed to attach patch; admitting unchanged");
            state.counters.record_admission_error();
            Json(AdmissionResponse::from(&request).into_review())
        }
    }
}

/// Validating webhook for pod DELETE.
///
/// Its only job is the counter decrement side effect; the response is
/// always `allowed` for a well-formed request.
pub async fn validate_handler(
    Extension(state): Extension<AppState>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "malformed admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    let response = AdmissionResponse::from(&request);

    if !matches!(request.operation, Operation::Delete) || request.dry_run {
        return Json(response.into_review());
    }
    // On DELETE the pod being removed arrives as `old_object`.
    let Some(pod) = request.old_object.as_ref() else {
        return Json(response.into_review());
    };

    let config = &state.config;
    if pod_label(pod, &config.workload_role_label) != Some(config.executor_role_value.as_str()) {
        return Json(response.into_review());
    }
    let Some(capacity) = capacity_selector(pod, &config.capacity_type_label) else {
        // Unlabeled (best-effort) executors keep no state to release.
        return Json(response.into_review());
    };
    let Some(job_id) = pod_label(pod, &config.job_id_label) else {
        return Json(response.into_review());
    };
    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.metadata.namespace.clone())
        .unwrap_or_default();

    let outcome = tokio::time::timeout(
        config.webhook_timeout,
        state.tracker.release(&namespace, job_id, capacity),
    )
    .await;
    match outcome {
        Ok(Ok(counts)) => {
            info!(
                namespace = %namespace,
                job_id = %job_id,
                capacity = %capacity,
                counts = %counts,
                "executor released"
            );
        }
        Ok(Err(e)) => {
            warn!(
                namespace = %namespace,
                job_id = %job_id,
                error = %e,
                "failed to decrement counter; reconciliation will correct it"
            );
            state.counters.record_admission_error();
        }
        Err(_) => {
            warn!(
                namespace = %namespace,
                job_id = %job_id,
                "counter decrement timed out; reconciliation will correct it"
            );
            state.counters.record_fail_open();
        }
    }

    Json(response.into_review())
}

/// Build the JSON patch injecting node-selector entries.
///
/// `add` on an existing key replaces its value, so a pre-set capacity
/// selector is overwritten in strict mode while unrelated entries are
/// preserved. Without a capacity choice (best-effort) only the workload
/// role selector is emitted.
fn build_node_selector_patch(pod: &Pod, config: &Config, capacity: Option<CapacityType>) -> Patch {
    let mut entries: Vec<(&str, &str)> = vec![(
        config.workload_role_label.as_str(),
        config.executor_role_value.as_str(),
    )];
    if let Some(capacity) = capacity {
        entries.push((config.capacity_type_label.as_str(), capacity.as_label_value()));
    }

    let has_selector = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_selector.as_ref())
        .is_some();
    let ops: Vec<Value> = if has_selector {
        entries
            .iter()
            .map(|(key, value)| {
                json!({
                    "op": "add",
                    "path": format!("/spec/nodeSelector/{}", escape_pointer_segment(key)),
                    "value": value,
                })
            })
            .collect()
    } else {
        let selector: serde_json::Map<String, Value> = entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), json!(value)))
            .collect();
        vec![json!({
            "op": "add",
            "path": "/spec/nodeSelector",
            "value": selector,
        })]
    };

    serde_json::from_value(Value::Array(ops)).expect("literal patch operations always deserialize")
}

/// Escape a map key for use as a JSON-pointer segment (RFC 6901).
fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn pod_label<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata.labels.as_ref()?.get(key).map(String::as_str)
}

fn capacity_selector(pod: &Pod, label: &str) -> Option<CapacityType> {
    let selector = pod.spec.as_ref()?.node_selector.as_ref()?;
    CapacityType::from_label_value(selector.get(label)?)
}
