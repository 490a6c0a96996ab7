use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;

use crate::models::{Device, PushTokenRequest, RegisterRequest};
use crate::registry;
use crate::state::AppState;

/// Register a new device, or refresh an existing enrollment
#[post("/api/devices/register", data = "<info>")]
pub async fn register_device(
    state: &State<AppState>,
    info: Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, Status> {
    let pool = state.db_pool.clone();
    let info = info.into_inner();

    let device = rocket::tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|_| Status::InternalServerError)?;
        registry::register(&mut conn, &info).map_err(|_| Status::InternalServerError)
    })
    .await
    .map_err(|_| Status::InternalServerError)??;

    Ok(Json(serde_json::json!({ "udid": device.udid })))
}

/// Update a device's wake-signal address
#[post("/api/devices/<udid>/token", data = "<body>")]
pub async fn update_push_token(
    state: &State<AppState>,
    udid: &str,
    body: Json<PushTokenRequest>,
) -> Result<Status, Status> {
    let pool = state.db_pool.clone();
    let udid = udid.to_string();
    let token = body.into_inner().push_token;

    let updated = rocket::tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|_| Status::InternalServerError)?;
        registry::update_push_token(&mut conn, &udid, &token)
            .map_err(|_| Status::InternalServerError)
    })
    .await
    .map_err(|_| Status::InternalServerError)??;

    if updated == 0 {
        return Err(Status::NotFound);
    }
    Ok(Status::Ok)
}

/// Get all devices
#[get("/api/devices")]
pub async fn get_devices(state: &State<AppState>) -> Result<Json<Vec<Device>>, Status> {
    let pool = state.db_pool.clone();

    let result = rocket::tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|_| Status::InternalServerError)?;
        registry::list(&mut conn).map_err(|_| Status::InternalServerError)
    })
    .await
    .map_err(|_| Status::InternalServerError)??;

    Ok(Json(result))
}

/// Get details for a specific device
#[get("/api/devices/<udid>")]
pub async fn get_device_details(
    state: &State<AppState>,
    udid: &str,
) -> Result<Json<Device>, Status> {
    let pool = state.db_pool.clone();
    let udid = udid.to_string();

    let device = rocket::tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|_| Status::InternalServerError)?;
        registry::find_by_udid(&mut conn, &udid).map_err(|_| Status::InternalServerError)
    })
    .await
    .map_err(|_| Status::InternalServerError)??;

    device.map(Json).ok_or(Status::NotFound)
}
