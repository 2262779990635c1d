//! HTTP and WebSocket surface: the Axum `Router` assembled from every domain module in this
//! crate, plus the `/ws/:vessel_id` vessel channel handler.
//!
//! A single free function takes `Arc<Relay>` and returns a `Router`; the vessel WebSocket
//! handler uses Axum's `extract::ws` extractor with a handshake-then-two-loops shape (receive
//! loop draining inbound frames, send loop forwarding queued outbound frames).

pub mod auth;
pub mod capital_flow;
pub mod dispatcher;
pub mod errors;
pub mod local_runner;
pub mod session_registry;
pub mod state;
pub mod task_store;
pub mod testkit;
pub mod validate;
pub mod vessel;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod test_support;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use relay_core::audit;
use relay_core::rate_limit::Bucket;
use relay_core::task::{TaskStatus, TaskType, VesselInbound, VesselOutbound};
use relay_core::worker::{is_apex, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{can_read, can_write, check_relay_token, requester};
use crate::dispatcher::{SpawnMode, SpawnRequest};
use crate::errors::{ApiResult, RelayError};
use crate::state::Relay;
use crate::vessel::ConnectError;

pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/task/:task_id", get(get_task))
        .route("/vessels", get(list_vessels))
        .route("/position-state", get(get_position_state))
        .route("/availability", get(get_availability))
        .route("/activity", get(get_activity))
        .route("/compliance/log", post(post_compliance_log))
        .route("/compliance/report", get(get_compliance_report))
        .route("/spawn", post(post_spawn))
        .route("/session/:session_id", get(get_session))
        .route("/session/:session_id/kill", post(post_kill_session))
        .route("/manager/checkin", post(post_manager_checkin))
        .route("/notify", post(post_notify))
        .route("/assign", post(deprecated_assign))
        .route("/feeds/:name", get(get_feed))
        .route("/worker/:worker/status", get(get_worker_status))
        .route("/worker/:worker/transactions", get(get_worker_transactions))
        .route("/worker/:worker/positions", get(get_worker_positions))
        .route("/worker/:worker/sessions", get(get_worker_sessions))
        .route("/worker/:worker/role", get(get_worker_role).post(post_worker_role))
        .route("/worker/:worker/release", post(post_release_worker))
        .route("/worker/:worker/buy", post(post_buy))
        .route("/worker/:worker/sell", post(post_sell))
        .route("/worker/:worker/transfer", post(post_transfer))
        .route("/worker/:worker/transfer-sol", post(post_transfer_sol))
        .route("/ws/:vessel_id", get(vessel_ws))
        .with_state(relay)
}

/// Checks the shared relay token and resolves the `X-Requester` header to a known identity.
/// Every route in this surface requires both; an anonymous or unrecognized caller is an auth
/// failure, not a degraded-anonymous request.
fn authenticate(relay: &Relay, headers: &HeaderMap) -> ApiResult<String> {
    check_relay_token(relay, headers)?;
    requester(headers).ok_or(RelayError::AuthFailure)
}

async fn rate_limit(relay: &Relay, who: &str, bucket: Bucket) -> ApiResult<()> {
    if relay.rate_limiter.check(who, bucket) {
        return Ok(());
    }
    relay
        .audit
        .record(audit::RATE_LIMITED, json!({"requester": who, "bucket": format!("{bucket:?}")}))
        .await;
    Err(RelayError::RateLimited)
}

fn authorize_write(_relay: &Relay, who: &str, target: &str) -> ApiResult<()> {
    if can_write(who, target) {
        Ok(())
    } else {
        Err(RelayError::CrossAgentViolation)
    }
}

async fn authorize_read(relay: &Relay, who: &str, target: &str) -> ApiResult<()> {
    if can_read(relay, who, target) {
        Ok(())
    } else {
        relay
            .audit
            .record(audit::CROSS_AGENT_DENIED, json!({"requester": who, "target": target}))
            .await;
        Err(RelayError::CrossAgentViolation)
    }
}

// ---------------------------------------------------------------------------------------------
// Task submission / lookup
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TaskSubmitBody {
    vessel_id: String,
    task_type: TaskType,
    payload: Value,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    300
}

#[derive(Debug, Serialize)]
struct TaskResponse {
    task_id: Uuid,
    status: TaskStatus,
}

async fn submit_task(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Json(body): Json<TaskSubmitBody>,
) -> ApiResult<Json<TaskResponse>> {
    let who = authenticate(&relay, &headers)?;
    if !is_apex(&who) {
        return Err(RelayError::CrossAgentViolation);
    }
    rate_limit(&relay, &who, Bucket::Trade).await?;

    let task = relay_core::task::Task::new(body.vessel_id, body.task_type, body.payload, body.priority, body.timeout_seconds);
    let task_id = task.task_id;
    let status = task.status;
    let vessel_id = task.vessel_id.clone();
    relay.tasks.submit(task).await.map_err(|e| RelayError::Internal(e.to_string()))?;

    // Deliver immediately if the vessel is already connected; otherwise the task stays queued
    // and the vessel's connect-time backlog drain delivers it on reconnect.
    if relay.vessels.is_connected(&vessel_id).await {
        if let Ok(Some(queued)) = relay.tasks.next_for_vessel(&vessel_id).await {
            relay.vessels.send(&vessel_id, VesselOutbound::Task { data: queued }).await;
        }
    }

    Ok(Json(TaskResponse { task_id, status }))
}

async fn get_task(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(task_id): UrlPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    let task = relay.tasks.get(task_id).await.map_err(|e| RelayError::Internal(e.to_string()))?;
    let task = task.ok_or(RelayError::NotFound)?;
    authorize_read(&relay, &who, &task.vessel_id).await?;
    Ok(Json(serde_json::to_value(task).map_err(|e| RelayError::Internal(e.to_string()))?))
}

async fn list_vessels(State(relay): State<Arc<Relay>>, headers: HeaderMap) -> ApiResult<Json<Vec<String>>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    Ok(Json(relay.vessels.connected_ids().await))
}

// ---------------------------------------------------------------------------------------------
// Read surface: position-state, availability, activity tail, compliance
// ---------------------------------------------------------------------------------------------

async fn get_position_state(State(relay): State<Arc<Relay>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    if !is_apex(&who) {
        return Err(RelayError::CrossAgentViolation);
    }
    let bytes = tokio::fs::read(&relay.cfg.position_state_path)
        .await
        .map_err(|_| RelayError::NotFound)?;
    let mut value: Value = serde_json::from_slice(&bytes).map_err(|e| RelayError::Internal(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("wallet_pubkey");
    }
    Ok(Json(value))
}

async fn get_availability(State(relay): State<Arc<Relay>>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    Ok(Json(serde_json::to_value(relay.availability.all()).map_err(|e| RelayError::Internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
struct TailQuery {
    #[serde(default = "default_tail_limit")]
    limit: usize,
}

fn default_tail_limit() -> usize {
    100
}

async fn get_activity(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Query(query): Query<TailQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let who = authenticate(&relay, &headers)?;
    if !is_apex(&who) {
        return Err(RelayError::CrossAgentViolation);
    }
    rate_limit(&relay, &who, Bucket::Read).await?;
    Ok(Json(relay.audit.tail(query.limit).await))
}

#[derive(Debug, Deserialize)]
struct ComplianceLogBody {
    event: String,
    #[serde(default)]
    details: Value,
}

async fn post_compliance_log(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Json(body): Json<ComplianceLogBody>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    if !is_apex(&who) {
        return Err(RelayError::CrossAgentViolation);
    }
    relay
        .audit
        .record(audit::COMPLIANCE_LOG, json!({"event": body.event, "details": body.details}))
        .await;
    Ok(Json(json!({"ok": true})))
}

async fn get_compliance_report(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Query(query): Query<TailQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let who = authenticate(&relay, &headers)?;
    if !is_apex(&who) {
        return Err(RelayError::CrossAgentViolation);
    }
    let entries = relay
        .audit
        .tail(query.limit.max(1) * 8)
        .await
        .into_iter()
        .filter(|e| e["action"] == audit::COMPLIANCE_LOG)
        .take(query.limit)
        .collect();
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------------------------
// Feeds read-proxy
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeedQuery {
    #[serde(default = "default_feed_limit")]
    limit: u32,
}

fn default_feed_limit() -> u32 {
    20
}

async fn get_feed(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(name): UrlPath<String>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    let limit = query.limit.min(100);
    let value = relay
        .apex
        .read_proxy(&format!("/feeds/{name}?limit={limit}"))
        .await
        .map_err(errors::apex_error)?;
    Ok(Json(value))
}

// ---------------------------------------------------------------------------------------------
// Per-worker reads: wallet status / transactions / positions / sessions / role
// ---------------------------------------------------------------------------------------------

async fn get_worker_status(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    authorize_read(&relay, &who, &worker).await?;
    let holdings = relay.apex.status(&worker).await.map_err(errors::apex_error)?;
    Ok(Json(serde_json::to_value(holdings).map_err(|e| RelayError::Internal(e.to_string()))?))
}

async fn get_worker_transactions(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    authorize_read(&relay, &who, &worker).await?;
    let value = relay
        .apex
        .read_proxy(&format!("/transactions/{worker}"))
        .await
        .map_err(errors::apex_error)?;
    Ok(Json(value))
}

async fn get_worker_positions(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    authorize_read(&relay, &who, &worker).await?;
    let value = relay
        .apex
        .read_proxy(&format!("/positions/{worker}"))
        .await
        .map_err(errors::apex_error)?;
    Ok(Json(value))
}

async fn get_worker_sessions(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    authorize_read(&relay, &who, &worker).await?;
    let sessions = relay.sessions.list_for_worker(&worker).await;
    Ok(Json(serde_json::to_value(sessions).map_err(|e| RelayError::Internal(e.to_string()))?))
}

async fn get_session(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(session_id): UrlPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    let session = relay.sessions.get(session_id).await.ok_or(RelayError::NotFound)?;
    authorize_read(&relay, &who, &session.worker).await?;
    Ok(Json(serde_json::to_value(session).map_err(|e| RelayError::Internal(e.to_string()))?))
}

async fn get_worker_role(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Read).await?;
    authorize_read(&relay, &who, &worker).await?;
    let record = relay.availability.get(&worker).ok_or(RelayError::NotFound)?;
    Ok(Json(serde_json::to_value(record).map_err(|e| RelayError::Internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
struct RoleBody {
    role: Role,
    assignment: String,
}

async fn post_worker_role(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
    Json(body): Json<RoleBody>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    if !is_apex(&who) {
        return Err(RelayError::CrossAgentViolation);
    }
    if !relay_core::worker::is_whitelisted(&worker) {
        return Err(RelayError::InvalidInput("unknown worker".to_string()));
    }
    relay.availability.mark_busy(&worker, body.role, body.assignment);
    Ok(Json(json!({"ok": true})))
}

async fn post_release_worker(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    if !is_apex(&who) {
        return Err(RelayError::CrossAgentViolation);
    }
    relay.availability.mark_idle(&worker);
    relay.audit.record(audit::CAPITAL_RELEASED, json!({"worker": worker, "manual": true})).await;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
struct ManagerCheckinBody {
    worker: String,
}

async fn post_manager_checkin(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Json(body): Json<ManagerCheckinBody>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    authorize_write(&relay, &who, &body.worker)?;
    relay.availability.heartbeat(&body.worker);
    Ok(Json(json!({"ok": true})))
}

// ---------------------------------------------------------------------------------------------
// Trade-class writes: buy / sell / transfer / transfer-sol
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BuyBody {
    mint: String,
    amount_sol: f64,
    slippage_bps: u32,
}

async fn post_buy(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
    Json(body): Json<BuyBody>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    authorize_write(&relay, &who, &worker)?;
    rate_limit(&relay, &who, Bucket::Trade).await?;
    if !relay.gate.verify(&worker) {
        relay.audit.record(audit::GATE_DENIED, json!({"worker": worker, "op": "buy"})).await;
        return Err(RelayError::GateDenied);
    }
    if !validate::is_valid_mint(&body.mint) || !validate::is_valid_buy_amount(body.amount_sol) || !validate::is_valid_slippage_bps(body.slippage_bps) {
        return Err(RelayError::InvalidInput("invalid buy parameters".to_string()));
    }

    let result = relay
        .apex
        .buy(&relay_core::apex::BuyRequest { worker: worker.clone(), mint: body.mint, amount_sol: body.amount_sol, slippage_bps: body.slippage_bps })
        .await
        .map_err(errors::apex_error)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct SellBody {
    mint: String,
    percent: f64,
    slippage_bps: u32,
}

async fn post_sell(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
    Json(body): Json<SellBody>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    authorize_write(&relay, &who, &worker)?;
    rate_limit(&relay, &who, Bucket::Trade).await?;
    if !relay.gate.verify(&worker) {
        relay.audit.record(audit::GATE_DENIED, json!({"worker": worker, "op": "sell"})).await;
        return Err(RelayError::GateDenied);
    }
    if !validate::is_valid_mint(&body.mint) || !validate::is_valid_sell_percent(body.percent) || !validate::is_valid_slippage_bps(body.slippage_bps) {
        return Err(RelayError::InvalidInput("invalid sell parameters".to_string()));
    }

    relay.audit.record(audit::SELL_REQUESTED, json!({"worker": worker, "mint": body.mint, "percent": body.percent})).await;
    let result = relay
        .apex
        .sell(&relay_core::apex::SellRequest { worker: worker.clone(), mint: body.mint.clone(), percent: body.percent, slippage_bps: body.slippage_bps })
        .await
        .map_err(errors::apex_error)?;
    relay
        .audit
        .record(audit::SELL_RESULT, json!({"worker": worker, "success": result.success, "percent_sold": result.percent_sold}))
        .await;

    if result.success {
        let relay_for_flow = relay.clone();
        let worker_for_flow = worker.clone();
        let percent_sold = result.percent_sold;
        tokio::spawn(async move { capital_flow::run(relay_for_flow, worker_for_flow, percent_sold).await });
    }

    Ok(Json(serde_json::to_value(result).map_err(|e| RelayError::Internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
struct TransferBody {
    mint: String,
    percent: f64,
    destination: String,
}

async fn post_transfer(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
    Json(body): Json<TransferBody>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    authorize_write(&relay, &who, &worker)?;
    rate_limit(&relay, &who, Bucket::Trade).await?;
    if !relay.gate.verify(&worker) {
        relay.audit.record(audit::GATE_DENIED, json!({"worker": worker, "op": "transfer"})).await;
        return Err(RelayError::GateDenied);
    }
    if !validate::is_valid_mint(&body.mint) || !validate::is_valid_transfer_percent(body.percent) {
        return Err(RelayError::InvalidInput("invalid transfer parameters".to_string()));
    }

    let result = relay
        .apex
        .transfer_token(&relay_core::apex::TransferTokenRequest { worker: worker.clone(), mint: body.mint, percent: body.percent, destination: body.destination })
        .await
        .map_err(errors::apex_error)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct TransferSolBody {
    to_worker: String,
    amount_sol: f64,
}

async fn post_transfer_sol(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(worker): UrlPath<String>,
    Json(body): Json<TransferSolBody>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    authorize_write(&relay, &who, &worker)?;
    rate_limit(&relay, &who, Bucket::Trade).await?;
    if !relay.gate.verify(&worker) {
        relay.audit.record(audit::GATE_DENIED, json!({"worker": worker, "op": "transfer-sol"})).await;
        return Err(RelayError::GateDenied);
    }
    if body.amount_sol <= 0.0 {
        return Err(RelayError::InvalidInput("amount_sol must be positive".to_string()));
    }

    let result = relay
        .apex
        .transfer_sol(&relay_core::apex::TransferSolRequest { from_worker: worker.clone(), to_worker: body.to_worker, amount_sol: body.amount_sol })
        .await
        .map_err(errors::apex_error)?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------------------------
// Notify, spawn, kill, deprecated assign
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NotifyBody {
    worker: Option<String>,
    message: String,
}

async fn post_notify(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Json(body): Json<NotifyBody>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    let worker = body.worker.unwrap_or_else(|| who.clone());
    authorize_write(&relay, &who, &worker)?;

    // Clamp per the original's `/notify` proxy (`server/app.py`): 500-char message body.
    let message: String = body.message.chars().take(500).collect();
    let outcome = relay
        .notifier
        .notify(relay_core::notify::Notification { worker: worker.clone(), message: message.clone() })
        .await;
    match outcome {
        Ok(()) => {
            relay.audit.record(audit::NOTIFY_SENT, json!({"worker": worker, "message": message})).await;
            Ok(Json(json!({"ok": true})))
        }
        Err(err) => {
            relay.audit.record(audit::NOTIFY_FAILED, json!({"worker": worker, "error": err.to_string()})).await;
            Err(RelayError::Internal(err.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpawnBody {
    worker: String,
    job_type: String,
    prompt: String,
    mode: String,
    #[serde(default = "default_max_turns")]
    max_turns: u32,
}

fn default_max_turns() -> u32 {
    20
}

#[derive(Debug, Serialize)]
struct SpawnResponseBody {
    session_id: Uuid,
    status: relay_core::session::SessionStatus,
}

async fn post_spawn(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Json(body): Json<SpawnBody>,
) -> ApiResult<Json<SpawnResponseBody>> {
    let who = authenticate(&relay, &headers)?;
    rate_limit(&relay, &who, Bucket::Trade).await?;
    let mode = match body.mode.as_str() {
        "local" => SpawnMode::Local,
        "remote" => SpawnMode::Remote,
        _ => return Err(RelayError::InvalidInput("mode must be 'local' or 'remote'".to_string())),
    };

    let response = dispatcher::spawn(
        &relay,
        SpawnRequest { requester: who, worker: body.worker, job_type: body.job_type, prompt: body.prompt, mode, max_turns: body.max_turns },
    )
    .await?;
    Ok(Json(SpawnResponseBody { session_id: response.session_id, status: response.status }))
}

async fn post_kill_session(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    UrlPath(session_id): UrlPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let who = authenticate(&relay, &headers)?;
    if !is_apex(&who) {
        return Err(RelayError::CrossAgentViolation);
    }
    dispatcher::kill_session(&relay, session_id).await?;
    Ok(Json(json!({"ok": true})))
}

/// Deprecated: preserves the route surface for any caller still probing it, without reviving
/// the legacy write path.
async fn deprecated_assign(State(relay): State<Arc<Relay>>, headers: HeaderMap) -> Response {
    let _ = authenticate(&relay, &headers);
    (
        axum::http::StatusCode::GONE,
        Json(json!({"error": "deprecated; use POST /spawn"})),
    )
        .into_response()
}

// ---------------------------------------------------------------------------------------------
// Vessel WebSocket channel
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VesselAuth {
    token: String,
}

async fn vessel_ws(
    ws: WebSocketUpgrade,
    UrlPath(vessel_id): UrlPath<String>,
    State(relay): State<Arc<Relay>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_vessel_socket(socket, vessel_id, relay))
}

async fn handle_vessel_socket(socket: WebSocket, vessel_id: String, relay: Arc<Relay>) {
    let mut outbound_rx = match relay.vessels.connect(&vessel_id).await {
        Ok((_tx, rx)) => rx,
        Err(reason) => {
            let detail = match reason {
                ConnectError::Duplicate => "vessel already connected",
                ConnectError::Capacity => "connection capacity reached",
            };
            relay
                .audit
                .record(audit::VESSEL_REJECTED, json!({"vessel_id": vessel_id, "reason": detail}))
                .await;
            close_with_reason(socket, detail).await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    let auth_ok = match tokio::time::timeout(crate::vessel::HANDSHAKE_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<VesselAuth>(&text) {
            Ok(auth) => {
                use subtle::ConstantTimeEq;
                let expected = relay.cfg.relay_token.as_bytes();
                let presented = auth.token.as_bytes();
                expected.len() == presented.len() && expected.ct_eq(presented).unwrap_u8() == 1
            }
            Err(_) => false,
        },
        _ => false,
    };

    if !auth_ok {
        relay.vessels.disconnect(&vessel_id).await;
        relay
            .audit
            .record(audit::VESSEL_REJECTED, json!({"vessel_id": vessel_id, "reason": "auth handshake failed"}))
            .await;
        let _ = sink
            .send(Message::Close(Some(CloseFrame { code: 4001, reason: "auth failed".into() })))
            .await;
        return;
    }

    relay.audit.record(audit::VESSEL_CONNECTED, json!({"vessel_id": vessel_id})).await;
    let _ = sink
        .send(Message::Text(json!({"status": "connected", "vessel_id": vessel_id}).to_string()))
        .await;

    // Drain any backlog queued while this vessel was disconnected, in FIFO order, before
    // entering steady state.
    while let Ok(Some(task)) = relay.tasks.next_for_vessel(&vessel_id).await {
        relay.vessels.send(&vessel_id, VesselOutbound::Task { data: task }).await;
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let Ok(msg) = frame else { break };
        match msg {
            Message::Text(text) => {
                let Ok(inbound) = serde_json::from_str::<VesselInbound>(&text) else { continue };
                match inbound {
                    VesselInbound::Result { task_id, status, result } => {
                        dispatcher::handle_remote_result(&relay, task_id, status, result).await;
                    }
                    VesselInbound::CancelAck { task_id, cancelled } => {
                        relay
                            .audit
                            .record(audit::SESSION_KILLED, json!({"vessel_id": vessel_id, "task_id": task_id, "cancelled": cancelled}))
                            .await;
                    }
                    VesselInbound::Heartbeat => {
                        relay.vessels.send(&vessel_id, VesselOutbound::HeartbeatAck).await;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    relay.vessels.disconnect(&vessel_id).await;
    relay.audit.record(audit::VESSEL_DISCONNECTED, json!({"vessel_id": vessel_id})).await;

    let connected = relay.vessels.connected_ids().await;
    for session in relay.sessions.orphan_sweep(&connected).await {
        relay.availability.mark_idle(&session.worker);
        relay
            .audit
            .record(audit::SESSION_ORPHANED, json!({"session_id": session.session_id, "worker": session.worker}))
            .await;
    }
}

async fn close_with_reason(socket: WebSocket, reason: &str) {
    let (mut sink, _stream) = socket.split();
    let _ = sink
        .send(Message::Close(Some(CloseFrame { code: 4009, reason: reason.to_string().into() })))
        .await;
}
