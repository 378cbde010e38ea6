//! Webhook trigger intake and resume (§4.9, §6.2).

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::api::{
    error::ApiResult,
    models::WebhookAcceptedResponse,
    routes::AppState,
};
use crate::suspend::{self, ResumeOutcome};
use crate::trigger::{self, WebhookOutcome};

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `POST /webhooks/{flowId}`: the public intake endpoint (§4.9 Webhook).
pub async fn trigger_webhook(
    State(app_state): State<AppState>,
    Path(flow_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let signature = header_str(&headers, "x-webhook-signature");
    let idempotency_key = header_str(&headers, "x-idempotency-key");

    let outcome = trigger::trigger_webhook(
        &app_state.pool,
        app_state.bus.as_ref(),
        &app_state.secrets,
        &app_state.limiters,
        &flow_id,
        &body,
        signature,
        idempotency_key,
    )
    .await?;

    Ok(match outcome {
        WebhookOutcome::Scheduled { run_id, scheduled_nodes } => (
            StatusCode::ACCEPTED,
            Json(WebhookAcceptedResponse { run_id, scheduled_nodes }),
        )
            .into_response(),
        WebhookOutcome::Replayed { status, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::ACCEPTED);
            (status, Json(body)).into_response()
        }
        WebhookOutcome::Disabled => (StatusCode::FORBIDDEN, Json(Value::String("webhook disabled".into()))).into_response(),
        WebhookOutcome::NoPublishedVersion => {
            (StatusCode::BAD_REQUEST, Json(Value::String("workflow has no published version".into()))).into_response()
        }
        WebhookOutcome::RateLimited => {
            (StatusCode::TOO_MANY_REQUESTS, Json(Value::String("rate limited".into()))).into_response()
        }
        WebhookOutcome::InvalidSignature => {
            (StatusCode::UNAUTHORIZED, Json(Value::String("invalid signature".into()))).into_response()
        }
    })
}

/// `POST /webhooks/resume/{token}`: resolves a webhook-wait suspension
/// (§4.8, §6.2: 202 / 404 / 410 / 409).
pub async fn resume_webhook(
    State(app_state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Response> {
    let outcome = suspend::resume_webhook(&app_state.pool, app_state.bus.as_ref(), &token, payload).await?;

    Ok(match outcome {
        ResumeOutcome::Resumed => StatusCode::ACCEPTED.into_response(),
        ResumeOutcome::NotFound => StatusCode::NOT_FOUND.into_response(),
        ResumeOutcome::Expired => StatusCode::GONE.into_response(),
        ResumeOutcome::RunTerminal => StatusCode::CONFLICT.into_response(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::create_test_app_state;
    use crate::db::repositories::{WorkflowRepository, WorkflowVersionRepository};
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn webhook_for_unknown_workflow_errors() {
        let state = create_test_app_state().await;
        let result = trigger_webhook(
            State(state),
            Path("missing-workflow".to_string()),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await;
        assert!(result.is_err());
    }

    /// §4.9/§6.2 name the header `X-Idempotency-Key`; a duplicate request
    /// carrying it must replay the first response instead of starting a
    /// second run. Drives the handler directly (not `trigger::trigger_webhook`)
    /// so the header-parsing line itself is exercised.
    #[tokio::test]
    async fn duplicate_idempotency_key_header_replays_first_response() {
        let state = create_test_app_state().await;
        WorkflowRepository::create(&state.pool, "wf-1", "Test", "{\"nodes\":[],\"edges\":[]}")
            .await
            .unwrap();
        WorkflowRepository::set_webhook_settings(&state.pool, "wf-1", true, None).await.unwrap();
        let version = WorkflowVersionRepository::create_next(
            &state.pool, "v-1", "wf-1", "{\"nodes\":[],\"edges\":[]}",
        )
        .await
        .unwrap();
        WorkflowRepository::set_active_version(&state.pool, "wf-1", &version.id).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-idempotency-key", HeaderValue::from_static("idem-1"));

        let first = trigger_webhook(
            State(state.clone()),
            Path("wf-1".to_string()),
            headers.clone(),
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap();
        assert_eq!(first.into_response().status(), StatusCode::ACCEPTED);

        let second = trigger_webhook(
            State(state),
            Path("wf-1".to_string()),
            headers,
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap();
        assert_eq!(
            second.into_response().status(),
            StatusCode::ACCEPTED,
            "replayed response reuses the first call's status"
        );
    }

    #[tokio::test]
    async fn resume_unknown_token_is_not_found() {
        let state = create_test_app_state().await;
        let resp = resume_webhook(State(state), Path("nope".to_string()), Json(Value::Null))
            .await
            .unwrap();
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }
}
