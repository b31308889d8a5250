// src/routes/reminder_routes.rs

use std::str::FromStr;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::AppState,
    reminders::{
        DispatchOptions, DispatchSummary, ReminderScheduler, SchedulerStatus,
        scheduler::MAX_INTERVAL_MINUTES,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reminders/scheduler", get(scheduler_status).post(control_scheduler))
        .route("/reminders/run", post(run_reminders))
}

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    Start,
    Stop,
    Restart,
}

impl FromStr for SchedulerAction {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(SchedulerAction::Start),
            "stop" => Ok(SchedulerAction::Stop),
            "restart" => Ok(SchedulerAction::Restart),
            other => Err(ApiError::BadRequest(
                "INVALID_ACTION",
                format!("unknown action '{other}', expected start, stop or restart"),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    pub interval_minutes: Option<u64>,
}

fn interval_override(minutes: Option<u64>) -> Result<Option<Duration>, ApiError> {
    match minutes {
        None => Ok(None),
        Some(m) if (1..=MAX_INTERVAL_MINUTES).contains(&m) => Ok(Some(Duration::from_secs(m * 60))),
        Some(_) => Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("interval_minutes must be between 1 and {MAX_INTERVAL_MINUTES}"),
        )),
    }
}

pub async fn apply_action(
    scheduler: &ReminderScheduler,
    req: &ControlRequest,
) -> Result<SchedulerStatus, ApiError> {
    let action: SchedulerAction = req.action.parse()?;
    let interval = interval_override(req.interval_minutes)?;

    let status = match action {
        SchedulerAction::Start => scheduler.start(interval).await,
        SchedulerAction::Stop => scheduler.stop().await,
        SchedulerAction::Restart => scheduler.restart(interval).await,
    };
    Ok(status)
}

pub async fn scheduler_status(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<SchedulerStatus>>, ApiError> {
    auth.ensure_staff()?;
    Ok(Json(ApiOk {
        data: state.reminders.status(),
    }))
}

pub async fn control_scheduler(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ControlRequest>,
) -> Result<Json<ApiOk<SchedulerStatus>>, ApiError> {
    auth.ensure_staff()?;
    tracing::info!(user_id = %auth.user_id, action = %req.action, "reminder scheduler control");

    let status = apply_action(&state.reminders, &req).await?;
    Ok(Json(ApiOk { data: status }))
}

/// Runs one pass right now, independent of the background loop.
/// A bare POST without a JSON body runs a normal pass.
fn run_options(body: Option<Json<DispatchOptions>>) -> DispatchOptions {
    body.map(|Json(opts)| opts).unwrap_or_default()
}

pub async fn run_reminders(
    State(state): State<AppState>,
    auth: AuthContext,
    body: Option<Json<DispatchOptions>>,
) -> Result<Json<ApiOk<DispatchSummary>>, ApiError> {
    auth.ensure_staff()?;

    let opts = run_options(body);
    let summary = state.reminders.dispatcher().dispatch(opts).await?;
    Ok(Json(ApiOk { data: summary }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::reminders::testing::{MemoryAppointmentStore, ScriptedSender};
    use crate::reminders::{ReminderDispatcher, SchedulerConfig};

    fn scheduler() -> ReminderScheduler {
        let dispatcher = ReminderDispatcher::new(
            Arc::new(MemoryAppointmentStore::default()),
            Arc::new(ScriptedSender::default()),
        );
        ReminderScheduler::new(Arc::new(dispatcher), SchedulerConfig::default())
    }

    fn req(action: &str, interval_minutes: Option<u64>) -> ControlRequest {
        ControlRequest {
            action: action.into(),
            interval_minutes,
        }
    }

    async fn run_body(req: axum::http::Request<axum::body::Body>) -> DispatchOptions {
        use axum::extract::FromRequest;

        let body = Option::<Json<DispatchOptions>>::from_request(req, &()).await.unwrap();
        run_options(body)
    }

    #[tokio::test]
    async fn run_accepts_a_missing_body() {
        let req = axum::http::Request::post("/api/v1/reminders/run")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(run_body(req).await, DispatchOptions::default());
    }

    #[tokio::test]
    async fn run_reads_options_from_json_body() {
        let req = axum::http::Request::post("/api/v1/reminders/run")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"dry_run": true, "force": true}"#))
            .unwrap();
        assert_eq!(
            run_body(req).await,
            DispatchOptions { force_resend: true, dry_run: true }
        );
    }

    #[test]
    fn parses_actions_case_insensitively() {
        assert_eq!("Start".parse::<SchedulerAction>().unwrap(), SchedulerAction::Start);
        assert_eq!(" stop ".parse::<SchedulerAction>().unwrap(), SchedulerAction::Stop);
        assert_eq!("RESTART".parse::<SchedulerAction>().unwrap(), SchedulerAction::Restart);
        assert!(matches!(
            "pause".parse::<SchedulerAction>(),
            Err(ApiError::BadRequest("INVALID_ACTION", _))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn control_actions_drive_the_scheduler() {
        let s = scheduler();

        let started = apply_action(&s, &req("start", None)).await.unwrap();
        assert_eq!(started, SchedulerStatus { running: true, interval_minutes: 5 });

        let restarted = apply_action(&s, &req("restart", Some(10))).await.unwrap();
        assert_eq!(restarted, SchedulerStatus { running: true, interval_minutes: 10 });

        let stopped = apply_action(&s, &req("stop", None)).await.unwrap();
        assert!(!stopped.running);
    }

    #[tokio::test]
    async fn bad_control_requests_are_rejected() {
        let s = scheduler();

        assert!(matches!(
            apply_action(&s, &req("reboot", None)).await,
            Err(ApiError::BadRequest("INVALID_ACTION", _))
        ));
        assert!(matches!(
            apply_action(&s, &req("start", Some(0))).await,
            Err(ApiError::BadRequest("VALIDATION_ERROR", _))
        ));
        assert!(!s.is_running());
    }
}
