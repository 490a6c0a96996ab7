use log::warn;
use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;

use crate::coordinator::EngineError;
use crate::lifecycle::CommandStatus;
use crate::models::{Command, EnqueueRequest, ReplyRequest};
use crate::queue;
use crate::registry;
use crate::state::AppState;

fn engine_status(err: &EngineError) -> Status {
    match err {
        EngineError::NotFound(_) => Status::NotFound,
        EngineError::Conflict(_) => Status::Conflict,
        EngineError::Protocol(_) => Status::BadRequest,
        _ => Status::InternalServerError,
    }
}

/// Submit a new command for a device
#[post("/api/commands", data = "<new_command>")]
pub async fn submit_command(
    state: &State<AppState>,
    new_command: Json<EnqueueRequest>,
) -> Result<Json<serde_json::Value>, Status> {
    let uuid = state
        .coordinator
        .enqueue(new_command.into_inner())
        .await
        .map_err(|e| engine_status(&e))?;

    Ok(Json(serde_json::json!({ "uuid": uuid })))
}

/// Device contact: hand out the next eligible command, if any
#[post("/api/mdm/<udid>/next")]
pub async fn next_command(
    state: &State<AppState>,
    udid: &str,
) -> Result<Json<serde_json::Value>, Status> {
    let delivered = state
        .coordinator
        .contact(udid.to_string())
        .await
        .map_err(|e| engine_status(&e))?;

    Ok(Json(serde_json::json!({ "command": delivered })))
}

/// Device reply for a previously delivered command
#[post("/api/mdm/<udid>/result", data = "<result>")]
pub async fn report_command_result(
    state: &State<AppState>,
    udid: &str,
    result: Json<ReplyRequest>,
) -> Result<Status, Status> {
    match state.coordinator.reply(udid.to_string(), result.into_inner()).await {
        Ok(_) => Ok(Status::Ok),
        // protocol violations are logged and dropped; the device moves on
        Err(err) => match err {
            EngineError::NotFound(_) | EngineError::Protocol(_) => {
                warn!("discarding reply from {udid}: {err}");
                Ok(Status::Ok)
            }
            _ => Err(Status::InternalServerError),
        },
    }
}

/// List a device's commands, oldest first, optionally filtered by status
#[get("/api/commands?<udid>&<status>")]
pub async fn list_commands(
    state: &State<AppState>,
    udid: &str,
    status: Option<&str>,
) -> Result<Json<Vec<Command>>, Status> {
    let status_filter = match status {
        Some(raw) => Some(CommandStatus::parse(raw).ok_or(Status::BadRequest)?),
        None => None,
    };

    let pool = state.db_pool.clone();
    let udid = udid.to_string();

    let result = rocket::tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|_| Status::InternalServerError)?;
        let device = registry::find_by_udid(&mut conn, &udid)
            .map_err(|_| Status::InternalServerError)?
            .ok_or(Status::NotFound)?;
        queue::list_for_device(&mut conn, device.id, status_filter)
            .map_err(|_| Status::InternalServerError)
    })
    .await
    .map_err(|_| Status::InternalServerError)??;

    Ok(Json(result))
}

/// Cancel a queued command by UUID
#[post("/api/commands/<command_uuid>/cancel")]
pub async fn cancel_command(
    state: &State<AppState>,
    command_uuid: &str,
) -> Result<Status, Status> {
    state
        .coordinator
        .cancel(command_uuid.to_string())
        .await
        .map_err(|e| engine_status(&e))?;

    Ok(Status::Ok)
}
