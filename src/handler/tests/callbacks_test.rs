use crate::app::{AppState, AppStateBuilder};
use crate::call::client::LoggingCallControl;
use crate::config::Config;
use crate::handler::callbacks::{
    callbacks, incoming_call, kill_flow, list_flows, outbound_call, IncomingCallNotification,
};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use std::sync::Arc;
use std::time::Duration;

fn test_state() -> AppState {
    AppStateBuilder::new()
        .config(Config::default())
        .client(Arc::new(LoggingCallControl::default()))
        .build()
        .unwrap()
}

async fn response_json(response: Response) -> serde_json::Value {
    assert!(response.status().is_success());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn callbacks_always_ack_even_for_garbage() {
    let state = test_state();
    let response = callbacks(State(state.clone()), "not json at all".to_string()).await;
    let json = response_json(response).await;
    assert_eq!(json["status"], "ok");

    let response = callbacks(
        State(state),
        r#"[{"type": "NoSuchEvent", "callConnectionId": "x"}]"#.to_string(),
    )
    .await;
    let json = response_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn callbacks_answer_the_subscription_handshake() {
    let state = test_state();
    let body = r#"[{"type": "SubscriptionValidation", "validationCode": "abc-123"}]"#;
    let response = callbacks(State(state), body.to_string()).await;
    let json = response_json(response).await;
    assert_eq!(json["validationResponse"], "abc-123");
}

#[tokio::test]
async fn incoming_call_answers_and_registers_a_flow() {
    let state = test_state();
    let response = incoming_call(
        State(state.clone()),
        Json(IncomingCallNotification {
            incoming_call_context: "ctx-token".to_string(),
            from: "+15550123".to_string(),
        }),
    )
    .await;
    let json = response_json(response).await;
    let call_id = json["callConnectionId"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let flows = state.active_flows.lock().await;
    let flow = flows.get(&call_id).expect("flow should be registered");
    assert_eq!(flow.state_snapshot().target, "+15550123");
    flow.cancel_token.cancel();
}

#[tokio::test]
async fn outbound_call_reports_the_new_connection_id() {
    let state = test_state();
    let response = outbound_call(
        State(state.clone()),
        Json(crate::handler::callbacks::DialRequest {
            target: "+15550199".to_string(),
        }),
    )
    .await;
    let json = response_json(response).await;
    let call_id = json["callConnectionId"].as_str().unwrap().to_string();
    assert!(!call_id.is_empty());

    let flows = state.active_flows.lock().await;
    if let Some(flow) = flows.get(&call_id) {
        flow.cancel_token.cancel();
    }
}

#[tokio::test]
async fn list_and_kill_cover_the_flow_registry() {
    let state = test_state();
    let response = incoming_call(
        State(state.clone()),
        Json(IncomingCallNotification {
            incoming_call_context: "ctx-token".to_string(),
            from: "+15550123".to_string(),
        }),
    )
    .await;
    let json = response_json(response).await;
    let call_id = json["callConnectionId"].as_str().unwrap().to_string();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let listing = response_json(list_flows(State(state.clone())).await).await;
    let flows = listing["flows"].as_array().unwrap();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0]["id"], call_id.as_str());
    assert_eq!(flows[0]["phase"], "awaiting_connect");

    kill_flow(State(state.clone()), Path(call_id)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let listing = response_json(list_flows(State(state)).await).await;
    assert!(listing["flows"].as_array().unwrap().is_empty());
}
