use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::actions::ActionLogService;
use crate::alerts::AlertLogService;
use crate::anticheat::AntiCheatService;
use crate::config::{StudentInfo, TestConfig};
use crate::error::AppError;
use crate::init::InitService;
use crate::judge::JudgeService;
use crate::models::{ActionEvent, GenericResponse};
use crate::network::{PskIssue, StudentNetworkService};
use crate::scoreboard::ScoreboardService;
use crate::violations::ViolationLogService;

/// Services wired once at process start, shared behind the router state.
pub struct AppContext {
    pub judge: Arc<JudgeService>,
    pub anticheat: Arc<AntiCheatService>,
    pub scoreboard: Arc<ScoreboardService>,
    pub network: Arc<StudentNetworkService>,
    pub violations: Arc<ViolationLogService>,
    pub alerts: Arc<AlertLogService>,
    pub actions: Arc<ActionLogService>,
    pub init: Arc<InitService>,
}

fn ok(message: impl Into<String>) -> GenericResponse {
    GenericResponse {
        status: "success".to_string(),
        message: message.into(),
    }
}

pub async fn health_checker() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "success",
        "message": "gradegate server is running"
    }))
}

pub async fn ingest_logs(
    State(ctx): State<Arc<AppContext>>,
    Json(events): Json<Vec<ActionEvent>>,
) -> impl IntoResponse {
    if events.is_empty() {
        return (StatusCode::OK, Json(ok("empty batch received")));
    }

    let batch = events.len();
    let mut accepted = 0usize;
    let mut flagged = 0usize;
    for event in events {
        match ctx.anticheat.handle(event).await {
            Ok(outcome) => {
                accepted += 1;
                if outcome.violation.is_some() {
                    flagged += 1;
                }
            }
            // one bad event must not sink the rest of the batch
            Err(err) => tracing::warn!("[server] anti-cheat processing failed: {}", err),
        }
    }

    if flagged > 0 {
        // recheck historical anomalies without holding up the request
        let alerts = Arc::clone(&ctx.alerts);
        tokio::spawn(async move { alerts.update_and_check().await });
    }

    tracing::info!("[server] ingested {}/{} action events", accepted, batch);
    (
        StatusCode::CREATED,
        Json(ok(format!("ingested {accepted} of {batch} events"))),
    )
}

pub async fn judge_student(
    State(ctx): State<Arc<AppContext>>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match ctx.judge.judge_submission(&student_id).await? {
        Some(results) => Ok(Json(serde_json::json!({
            "status": "success",
            "data": results,
        }))),
        None => Ok(Json(serde_json::json!({
            "status": "success",
            "message": "no submission",
        }))),
    }
}

pub async fn get_scoreboard(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ctx.scoreboard.all().await?))
}

pub async fn get_student_score(
    State(ctx): State<Arc<AppContext>>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = ctx
        .scoreboard
        .by_student(&student_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("scoreboard row for {student_id}")))?;
    Ok(Json(record))
}

pub async fn issue_psk(
    State(ctx): State<Arc<AppContext>>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match ctx.network.issue_psk(&student_id).await? {
        PskIssue::Issued(secret) => Ok(Json(serde_json::json!({
            "status": "success",
            "key": secret,
        }))),
        PskIssue::AlreadyIssued => Ok(Json(serde_json::json!({
            "status": "already_issued",
            "message": "psk was already handed out",
        }))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionLogQuery {
    pub student_id: Option<String>,
    pub ip: Option<String>,
    pub mac: Option<String>,
    pub last: Option<usize>,
}

pub async fn get_action_logs(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ActionLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let logs = if let Some(student_id) = &query.student_id {
        ctx.actions.by_student(student_id).await?
    } else if let Some(ip) = &query.ip {
        ctx.actions.by_ip(ip).await?
    } else if let Some(mac) = &query.mac {
        ctx.actions.by_mac(mac).await?
    } else if let Some(n) = query.last {
        ctx.actions.last_n(n).await?
    } else {
        ctx.actions.all().await?
    };
    Ok(Json(logs))
}

pub async fn get_network_record(
    State(ctx): State<Arc<AppContext>>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = ctx
        .network
        .by_student(&student_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("network row for {student_id}")))?;
    Ok(Json(record))
}

pub async fn clear_network_devices(
    State(ctx): State<Arc<AppContext>>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = ctx.network.clear_devices(&student_id).await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct PskIssuedPayload {
    pub issued: bool,
}

pub async fn set_psk_issued(
    State(ctx): State<Arc<AppContext>>,
    Path(student_id): Path<String>,
    Json(payload): Json<PskIssuedPayload>,
) -> Result<impl IntoResponse, AppError> {
    let record = ctx
        .network
        .set_key_issued(&student_id, payload.issued)
        .await?;
    Ok(Json(record))
}

pub async fn get_violations(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ctx.violations.all().await?))
}

pub async fn get_violation(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = ctx
        .violations
        .by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("violation {id}")))?;
    Ok(Json(record))
}

pub async fn get_student_violations(
    State(ctx): State<Arc<AppContext>>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ctx.violations.by_student(&student_id).await?))
}

pub async fn delete_violation(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !ctx.violations.delete(&id).await? {
        return Err(AppError::not_found(format!("violation {id}")));
    }
    Ok(Json(ok("violation deleted")))
}

pub async fn ack_violation(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !ctx.violations.acknowledge(&id).await? {
        return Err(AppError::not_found(format!("violation {id}")));
    }
    Ok(Json(ok("violation acknowledged")))
}

pub async fn get_alerts(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ctx.alerts.all().await?))
}

pub async fn check_alerts(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    ctx.alerts.update_and_check().await;
    Json(ok("alert recomputation finished"))
}

#[derive(Debug, Deserialize)]
pub struct AckAlertPayload {
    pub is_ok: bool,
}

pub async fn ack_alert(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(payload): Json<AckAlertPayload>,
) -> Result<impl IntoResponse, AppError> {
    if !ctx.alerts.set_ok(&id, payload.is_ok).await? {
        return Err(AppError::not_found(format!("alert {id}")));
    }
    Ok(Json(ok("alert updated")))
}

pub async fn get_alert(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = ctx
        .alerts
        .by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("alert {id}")))?;
    Ok(Json(record))
}

pub async fn delete_alert(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !ctx.alerts.delete(&id).await? {
        return Err(AppError::not_found(format!("alert {id}")));
    }
    Ok(Json(ok("alert deleted")))
}

#[derive(Debug, Deserialize)]
pub struct InitPayload {
    pub config: TestConfig,
    pub students: Vec<StudentInfo>,
}

pub async fn admin_init(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<InitPayload>,
) -> Result<impl IntoResponse, AppError> {
    ctx.init.initialize(payload.config, payload.students).await?;
    Ok((StatusCode::CREATED, Json(ok("exam initialized"))))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetParams {
    #[serde(default)]
    pub clear_settings: bool,
}

pub async fn admin_reset(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<ResetParams>,
) -> Result<impl IntoResponse, AppError> {
    ctx.init.reset(params.clear_settings).await?;
    ctx.alerts.reset_cooldown(true);
    Ok(Json(ok("exam data reset")))
}
