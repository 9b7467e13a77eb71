use crate::{
    app::AppState,
    call::{CallConnection, CallFlow},
    event::{parse_notification, EventDetail},
    flowrecord::FlowRecord,
};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{error, info, warn};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/callbacks", post(callbacks))
        .route("/api/incoming", post(incoming_call))
        .route("/api/outbound", post(outbound_call))
        .route("/api/recording", post(recording_status))
        .route("/flows", get(list_flows))
        .route("/flows/kill/{id}", post(kill_flow))
        .route("/flows/{id}/recording/pause", post(pause_recording))
        .route("/flows/{id}/recording/resume", post(resume_recording))
}

/// The platform retries delivery on anything but 2xx, so this endpoint acks
/// everything; malformed payloads are logged and dropped inside the
/// dispatcher instead of surfacing as errors.
pub async fn callbacks(State(state): State<AppState>, body: String) -> Response {
    if let Some(validation) = handshake_response(&body) {
        return Json(validation).into_response();
    }
    state.dispatcher.publish(&body);
    Json(json!({"status": "ok"})).into_response()
}

/// Subscription handshake envelopes are answered before any event reaches
/// the dispatcher.
fn handshake_response(body: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(body).ok()?;
    let entries: Vec<&Value> = match value.as_array() {
        Some(array) => array.iter().collect(),
        None => vec![&value],
    };
    for entry in entries {
        if entry.get("type").and_then(|t| t.as_str()) == Some("SubscriptionValidation") {
            let code = entry.get("validationCode")?.as_str()?;
            return Some(json!({"validationResponse": code}));
        }
    }
    None
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallNotification {
    pub incoming_call_context: String,
    pub from: String,
}

pub async fn incoming_call(
    State(state): State<AppState>,
    Json(notification): Json<IncomingCallNotification>,
) -> Response {
    info!(from = %notification.from, "incoming call");
    let callback_url = format!("{}/api/callbacks", state.config.callback_url);
    match state
        .client
        .answer_call(&notification.incoming_call_context, &callback_url)
        .await
    {
        Ok(call) => {
            let call_id = call.call_connection_id.clone();
            spawn_flow(state, call, notification.from).await;
            Json(json!({"callConnectionId": call_id})).into_response()
        }
        Err(e) => {
            error!("failed to answer call: {:#}", e);
            // still ack the webhook so the platform does not retry-flood us
            Json(json!({"status": "error"})).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialRequest {
    pub target: String,
}

pub async fn outbound_call(
    State(state): State<AppState>,
    Json(request): Json<DialRequest>,
) -> Response {
    let callback_url = format!("{}/api/callbacks", state.config.callback_url);
    match state
        .client
        .create_call(
            &request.target,
            state.config.caller_id.as_deref(),
            &callback_url,
        )
        .await
    {
        Ok(call) => {
            let call_id = call.call_connection_id.clone();
            spawn_flow(state, call, request.target).await;
            Json(json!({"callConnectionId": call_id})).into_response()
        }
        Err(e) => {
            error!(callee = %request.target, "failed to create call: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// Spawns the per-call flow task and emits its record once it terminates.
async fn spawn_flow(state: AppState, call: CallConnection, target: String) {
    let flow = match CallFlow::new(
        call,
        target.clone(),
        state.config.menu.clone(),
        state.dispatcher.clone(),
        state.client.clone(),
        state.config.record_calls,
    ) {
        Ok(flow) => Arc::new(flow),
        Err(e) => {
            error!("refusing to start call flow: {:#}", e);
            return;
        }
    };
    let call_id = flow.call.call_connection_id.clone();
    state
        .active_flows
        .lock()
        .await
        .insert(call_id.clone(), flow.clone());

    let state_clone = state.clone();
    tokio::spawn(async move {
        let start_time = flow.started_at;
        let reason = flow.run().await;
        state_clone.active_flows.lock().await.remove(&call_id);

        let snapshot = flow.state_snapshot();
        let record = FlowRecord {
            call_id: call_id.clone(),
            target,
            start_time,
            end_time: Utc::now(),
            hangup_reason: reason,
            selections: snapshot.collected,
            recording_id: flow.recording_id(),
        };
        if let Some(sender) = state_clone.flowrecord_sender.lock().await.as_ref() {
            if let Err(e) = sender.send(record) {
                error!("failed to send flow record: {}", e);
            }
        }
    });
}

/// Recording webhooks arrive on their own endpoint: completed chunks are
/// fetched into the recordings directory, then every event is handed to the
/// dispatcher like any other notification.
pub async fn recording_status(State(state): State<AppState>, body: String) -> Response {
    if let Some(validation) = handshake_response(&body) {
        return Json(validation).into_response();
    }
    for event in parse_notification(&body) {
        if let EventDetail::RecordingStatusChanged {
            recording_id,
            content_location: Some(location),
            ..
        } = &event.detail
        {
            let name = recording_id
                .clone()
                .unwrap_or_else(|| event.call_connection_id.clone());
            let location = location.clone();
            let root = state.config.recordings_path.clone();
            tokio::spawn(async move {
                if let Err(e) = download_recording(&location, &root, &name).await {
                    error!(recording_id = %name, "failed to download recording: {:#}", e);
                }
            });
        }
        state.dispatcher.dispatch(event);
    }
    Json(json!({"status": "ok"})).into_response()
}

async fn download_recording(location: &str, root: &str, name: &str) -> Result<()> {
    tokio::fs::create_dir_all(root).await?;
    let response = reqwest::get(location).await?.error_for_status()?;
    let bytes = response.bytes().await?;
    let path = std::path::Path::new(root).join(format!("{}.wav", name));
    let mut file = File::create(&path).await?;
    file.write_all(&bytes).await?;
    info!("recording chunk saved to {}", path.display());
    Ok(())
}

pub async fn list_flows(State(state): State<AppState>) -> Response {
    let flows = json!({
        "flows": state.active_flows.lock().await.iter().map(|(id, flow)| {
            let snapshot = flow.state_snapshot();
            json!({
                "id": id,
                "target": snapshot.target,
                "started_at": flow.started_at.to_rfc3339(),
                "phase": snapshot.phase,
                "node": snapshot.node,
                "attempts": snapshot.attempts,
            })
        }).collect::<Vec<_>>(),
    });
    Json(flows).into_response()
}

pub async fn kill_flow(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Some(flow) = state.active_flows.lock().await.remove(&id) {
        flow.cancel_token.cancel();
        info!("Call flow {} killed", id);
    }
    Json(true).into_response()
}

async fn pause_recording(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    recording_control(state, &id, RecordingControl::Pause).await
}

async fn resume_recording(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    recording_control(state, &id, RecordingControl::Resume).await
}

enum RecordingControl {
    Pause,
    Resume,
}

async fn recording_control(state: AppState, flow_id: &str, op: RecordingControl) -> Response {
    let recording_id = match state.active_flows.lock().await.get(flow_id) {
        Some(flow) => flow.recording_id(),
        None => None,
    };
    let Some(recording_id) = recording_id else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "no active recording for this flow"})),
        )
            .into_response();
    };
    let result = match op {
        RecordingControl::Pause => state.client.pause_recording(&recording_id).await,
        RecordingControl::Resume => state.client.resume_recording(&recording_id).await,
    };
    match result {
        Ok(_) => Json(json!({"recordingId": recording_id})).into_response(),
        Err(e) => {
            warn!(recording_id = %recording_id, "recording control failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
